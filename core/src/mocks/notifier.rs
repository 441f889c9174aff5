use crate::environment::BoxFuture;
use crate::notify::{Notification, Notifier, NotifyError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Notifier that keeps everything it is asked to send.
///
/// Notifications are recorded when `send` is called, before the returned
/// future runs, so tests can assert on them without waiting for the spawned
/// delivery task.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Notifier that delivers successfully.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail (notifications are still recorded).
    pub fn fail_deliveries(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Notifications received so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        let kind = notification.kind();
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
        let failing = self.failing.load(Ordering::SeqCst);
        Box::pin(async move {
            if failing {
                Err(NotifyError(format!("{kind} delivery failed")))
            } else {
                Ok(())
            }
        })
    }
}
