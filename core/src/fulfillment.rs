//! Admin-driven fulfillment transitions.

use crate::environment::CommerceEnvironment;
use crate::error::{CommerceError, StoreError};
use crate::status::OrderStatus;
use crate::store::OrderTransition;
use crate::types::{Order, OrderId};

/// Statuses an admin may set directly. Payment and refund statuses are only
/// reached through the reconciler and the settlement engine.
pub const FULFILLMENT_TARGETS: [OrderStatus; 4] = [
    OrderStatus::Processing,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
    OrderStatus::Cancelled,
];

/// Moves orders through processing, shipping, delivery and cancellation.
#[derive(Clone)]
pub struct Fulfillment {
    env: CommerceEnvironment,
}

impl Fulfillment {
    /// Service over `env`.
    #[must_use]
    pub const fn new(env: CommerceEnvironment) -> Self {
        Self { env }
    }

    /// Advance an order to `target`. Cancellation returns catalog stock.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown order
    /// - `Validation` when `target` is not a fulfillment status
    /// - `Conflict` when the state machine forbids the edge or the order
    ///   changed concurrently
    #[tracing::instrument(skip_all, fields(order_id = %order_id, target = %target))]
    pub async fn advance_fulfillment(&self, order_id: OrderId, target: OrderStatus) -> Result<Order, CommerceError> {
        if !FULFILLMENT_TARGETS.contains(&target) {
            return Err(CommerceError::validation(format!(
                "status {target} cannot be set directly"
            )));
        }
        let order = self
            .env
            .orders
            .order(order_id)
            .await?
            .ok_or_else(|| CommerceError::not_found("order", order_id))?;
        order.status.transition(target)?;

        let transition = OrderTransition {
            restock: target == OrderStatus::Cancelled,
            ..OrderTransition::new(order.id, order.status, target, self.env.clock.now())
        };

        match self.env.orders.apply_transition(transition).await {
            Ok(updated) => {
                tracing::info!(
                    order_number = %updated.order_number,
                    from = %order.status,
                    to = %updated.status,
                    "Order status updated"
                );
                metrics::counter!("orders.transitioned", "to" => target.as_str()).increment(1);
                Ok(updated)
            }
            Err(e @ StoreError::StatusConflict { .. }) => {
                tracing::warn!(error = %e, "Order changed concurrently");
                Err(e.into())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to update order status");
                Err(e.into())
            }
        }
    }
}
