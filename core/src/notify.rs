//! Fire-and-forget customer notifications.
//!
//! Delivery (email, SMS) is an external collaborator. Failures are logged at
//! `warn` and never propagate into the order or refund flow.

use crate::environment::BoxFuture;
use crate::money::Money;
use crate::types::{OrderId, OrderNumber, SettlementMethod};
use std::sync::Arc;
use thiserror::Error;

/// Notification delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Customer-facing events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// Order accepted at checkout
    OrderConfirmed {
        /// Order
        order_id: OrderId,
        /// Displayed number
        order_number: OrderNumber,
        /// Recipient
        email: String,
        /// Charged total
        total: Money,
    },
    /// Provider denied the payment
    PaymentFailed {
        /// Order
        order_id: OrderId,
        /// Displayed number
        order_number: OrderNumber,
        /// Recipient
        email: String,
    },
    /// A refund settled
    RefundIssued {
        /// Order
        order_id: OrderId,
        /// Displayed number
        order_number: OrderNumber,
        /// Recipient
        email: String,
        /// Refunded amount
        amount: Money,
        /// Where the money went
        method: SettlementMethod,
    },
}

impl Notification {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OrderConfirmed { .. } => "order_confirmed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::RefundIssued { .. } => "refund_issued",
        }
    }

    /// Order this notification concerns.
    #[must_use]
    pub const fn order_id(&self) -> OrderId {
        match self {
            Self::OrderConfirmed { order_id, .. }
            | Self::PaymentFailed { order_id, .. }
            | Self::RefundIssued { order_id, .. } => *order_id,
        }
    }
}

/// Notification delivery.
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when delivery fails.
    fn send(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Send without awaiting delivery.
///
/// The future is spawned on the current runtime; a failure is logged and
/// dropped.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let kind = notification.kind();
    let order_id = notification.order_id();
    let delivery = notifier.send(notification);
    tokio::spawn(async move {
        if let Err(e) = delivery.await {
            tracing::warn!(%order_id, kind, error = %e, "Notification delivery failed");
        }
    });
}
