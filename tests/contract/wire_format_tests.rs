//! JSON shapes exchanged between supervisor and helper.
//!
//! Helpers from a previous agent version may still be running during an
//! upgrade, so these shapes are fixed.

use serde_json::json;

use desktop_runner::ipc::protocol::{IpcRequest, IpcResponse, Route, Status};
use desktop_runner::ipc::server::PONG;
use desktop_runner::models::notification::Notification;

#[test]
fn request_envelope_shape() {
    let request = IpcRequest::new(Route::Ping, "tok", None);
    assert_eq!(
        serde_json::to_value(&request).unwrap(),
        json!({ "route": "ping", "authorization": "Bearer tok" })
    );

    let body = json!({ "title": "t" });
    let request = IpcRequest::new(Route::Notification, "tok", Some(body.clone()));
    assert_eq!(
        serde_json::to_value(&request).unwrap(),
        json!({ "route": "notification", "authorization": "Bearer tok", "body": body })
    );
}

#[test]
fn request_without_optional_fields_parses() {
    let request: IpcRequest = serde_json::from_str(r#"{"route":"ping"}"#).unwrap();
    assert_eq!(request.route, "ping");
    assert!(request.authorization.is_none());
    assert!(request.body.is_none());
}

#[test]
fn request_without_route_is_rejected() {
    assert!(serde_json::from_str::<IpcRequest>(r#"{"authorization":"Bearer x"}"#).is_err());
}

#[test]
fn route_names_are_stable() {
    let names: Vec<&str> = [Route::Ping, Route::Shutdown, Route::Refresh, Route::Notification]
        .into_iter()
        .map(Route::as_str)
        .collect();
    assert_eq!(names, ["ping", "shutdown", "refresh", "notification"]);
}

#[test]
fn status_names_are_snake_case() {
    let cases = [
        (Status::Ok, "ok"),
        (Status::Unauthorized, "unauthorized"),
        (Status::BadRequest, "bad_request"),
        (Status::NotFound, "not_found"),
        (Status::ServerError, "server_error"),
    ];
    for (status, name) in cases {
        assert_eq!(serde_json::to_value(status).unwrap(), json!(name));
        assert_eq!(status.to_string(), name);
    }
}

#[test]
fn response_envelope_shapes() {
    assert_eq!(
        serde_json::to_value(IpcResponse::success(json!({ "pong": PONG }))).unwrap(),
        json!({ "status": "ok", "data": { "pong": "desktop-runner" } })
    );
    assert_eq!(
        serde_json::to_value(IpcResponse::empty()).unwrap(),
        json!({ "status": "ok" })
    );
    assert_eq!(
        serde_json::to_value(IpcResponse::error(Status::Unauthorized, "nope")).unwrap(),
        json!({ "status": "unauthorized", "error": "nope" })
    );
}

#[test]
fn notification_shape() {
    let notification = Notification {
        title: "Restart required".into(),
        body: "Please restart".into(),
        action_uri: Some("agent://restart".into()),
    };
    assert_eq!(
        serde_json::to_value(&notification).unwrap(),
        json!({
            "title": "Restart required",
            "body": "Please restart",
            "action_uri": "agent://restart"
        })
    );

    let minimal: Notification = serde_json::from_value(json!({ "title": "Hi" })).unwrap();
    assert_eq!(minimal, Notification::new("Hi", ""));
    assert_eq!(
        serde_json::to_value(&minimal).unwrap(),
        json!({ "title": "Hi", "body": "" })
    );
}
