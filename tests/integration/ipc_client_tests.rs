//! `HelperClient` against a live helper server.

use std::time::Duration;

use desktop_runner::ipc::client::HelperClient;
use desktop_runner::ipc::protocol::{Route, Status};
use desktop_runner::models::notification::Notification;
use desktop_runner::AppError;

use super::test_helpers::{start_server, unique_address, FakeNotifier};

const TOKEN: &str = "client-test-token";

#[tokio::test]
async fn typed_calls_succeed_with_the_right_token() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(unique_address(dir.path()), TOKEN, FakeNotifier::default()).await;
    let client = HelperClient::new(TOKEN, server.address.clone());

    client.ping().await.unwrap();
    client.refresh().await.unwrap();
    client
        .send_notification(&Notification::new("Hello", "World"))
        .await
        .unwrap();

    assert_eq!(server.notifier.sent().len(), 1);
    assert!(!server.shutdown.is_cancelled());

    client.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.shutdown.cancelled())
        .await
        .unwrap();
    server.server_ct.cancel();
}

#[tokio::test]
async fn non_ok_status_becomes_ipc_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(unique_address(dir.path()), TOKEN, FakeNotifier::default()).await;
    let client = HelperClient::new("wrong", server.address.clone());

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, AppError::Ipc(_)));
    assert!(err.to_string().contains("unauthorized"), "{err}");

    let raw = client.request(Route::Ping, None).await.unwrap();
    assert_eq!(raw.status, Status::Unauthorized);
    server.server_ct.cancel();
}

#[tokio::test]
async fn notifier_failure_surfaces_as_ipc_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(unique_address(dir.path()), TOKEN, FakeNotifier::failing()).await;
    let client = HelperClient::new(TOKEN, server.address.clone());

    let err = client
        .send_notification(&Notification::new("t", "b"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("server_error"), "{err}");
    server.server_ct.cancel();
}

#[tokio::test]
async fn missing_server_is_a_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = HelperClient::new(TOKEN, unique_address(dir.path()))
        .with_timeout(Duration::from_secs(2));

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, AppError::Ipc(_)));
}

#[tokio::test]
async fn stopped_server_refuses_connections() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(unique_address(dir.path()), TOKEN, FakeNotifier::default()).await;
    let client = HelperClient::new(TOKEN, server.address.clone())
        .with_timeout(Duration::from_secs(2));
    client.ping().await.unwrap();

    server.server_ct.cancel();
    server.task.await.unwrap();

    assert!(client.ping().await.is_err());
}
