//! Notification sink that writes customer notifications to the log.

use commerce_core::environment::BoxFuture;
use commerce_core::notify::{Notification, NotifyError, Notifier};

/// Logs every notification at `info`. Stands in for an email provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        match &notification {
            Notification::OrderConfirmed {
                order_id,
                order_number,
                email,
                total,
            } => tracing::info!(%order_id, %order_number, %email, %total, "Order confirmation"),
            Notification::PaymentFailed {
                order_id,
                order_number,
                email,
            } => tracing::info!(%order_id, %order_number, %email, "Payment failure notice"),
            Notification::RefundIssued {
                order_id,
                order_number,
                email,
                amount,
                method,
            } => tracing::info!(
                %order_id,
                %order_number,
                %email,
                %amount,
                method = method.as_str(),
                "Refund notice"
            ),
        }
        metrics::counter!("notifications.sent", "kind" => notification.kind()).increment(1);
        Box::pin(async { Ok(()) })
    }
}
