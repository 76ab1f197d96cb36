//! Desktop notification delivery inside the helper process.

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use crate::models::notification::Notification;
use crate::{AppError, Result};

/// Delivers notifications to the user's desktop.
pub trait Notifier: Send + Sync {
    /// Show `notification` to the user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notify` if the desktop refused the notification.
    fn send_notification<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Notifier backed by the platform notification service via `notify-rust`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    /// Create a desktop notifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for DesktopNotifier {
    fn send_notification<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let notification = notification.clone();
        Box::pin(async move {
            // `show()` blocks on some platforms.
            let title = notification.title.clone();
            let shown = tokio::task::spawn_blocking(move || {
                notify_rust::Notification::new()
                    .summary(&notification.title)
                    .body(&notification.body)
                    .show()
                    .map(|_| ())
                    .map_err(|err| err.to_string())
            })
            .await
            .map_err(|err| AppError::Notify(format!("notification task panicked: {err}")))?;

            match shown {
                Ok(()) => {
                    info!(%title, "desktop notification sent");
                    Ok(())
                }
                Err(err) => {
                    warn!(%title, %err, "desktop notification failed");
                    Err(AppError::Notify(err))
                }
            }
        })
    }
}
