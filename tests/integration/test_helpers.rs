//! Shared fixtures for integration tests.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use desktop_runner::ipc::address::IpcAddress;
use desktop_runner::ipc::server::HelperServer;
use desktop_runner::models::notification::Notification;
use desktop_runner::notifier::Notifier;
use desktop_runner::status::StatusCache;
use desktop_runner::{AppError, Result};

// ── Notifier ─────────────────────────────────────────────────────────────

/// Records notifications instead of showing them.
#[derive(Debug, Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub fail: bool,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for FakeNotifier {
    fn send_notification<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail {
                return Err(AppError::Notify("notification center unavailable".into()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        })
    }
}

// ── Standalone server ────────────────────────────────────────────────────

/// A helper IPC server running in the test process.
pub struct TestServer {
    pub address: IpcAddress,
    pub shutdown: CancellationToken,
    pub server_ct: CancellationToken,
    pub notifier: Arc<FakeNotifier>,
    pub refreshes: Arc<AtomicUsize>,
    pub task: tokio::task::JoinHandle<()>,
}

/// An address unique to this test.
pub fn unique_address(dir: &Path) -> IpcAddress {
    let pid = u32::try_from(uuid::Uuid::new_v4().as_u128() % 1_000_000_000).unwrap();
    IpcAddress::for_pid(dir, pid).unwrap()
}

pub async fn start_server(address: IpcAddress, token: &str, notifier: FakeNotifier) -> TestServer {
    start_server_with_status(address, token, notifier, None).await
}

/// Like [`start_server`], also reloading `status` on every refresh.
pub async fn start_server_with_status(
    address: IpcAddress,
    token: &str,
    notifier: FakeNotifier,
    status: Option<Arc<StatusCache>>,
) -> TestServer {
    let shutdown = CancellationToken::new();
    let notifier = Arc::new(notifier);
    let mut server = HelperServer::bind(
        address.clone(),
        token,
        shutdown.clone(),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    )
    .await
    .expect("bind helper server");

    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    server.register_refresh_listener(move || {
        if let Some(status) = &status {
            let _ = status.reload();
        }
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let server_ct = CancellationToken::new();
    let task = server.spawn(server_ct.clone());

    TestServer {
        address,
        shutdown,
        server_ct,
        notifier,
        refreshes,
        task,
    }
}

/// Poll `check` every 20 ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
