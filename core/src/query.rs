//! Read-side lookups: customer order tracking and store-credit statements.

use crate::environment::CommerceEnvironment;
use crate::error::CommerceError;
use crate::money::Money;
use crate::types::{
    Order, OrderId, OrderNumber, RefundRequest, StoreCreditAccount, StoreCreditTransaction,
    ledger_balance, normalize_email,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle milestone shown to the customer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEvent {
    /// Order created
    Placed,
    /// Provider confirmed payment
    PaymentConfirmed,
    /// Handed to the carrier
    Shipped,
    /// Received by the customer
    Delivered,
    /// Latest refund
    Refunded,
    /// Cancelled before delivery
    Cancelled,
}

/// One timeline row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    /// Milestone
    pub event: TimelineEvent,
    /// When it happened
    pub at: DateTime<Utc>,
}

/// Build the chronological timeline from an order's lifecycle timestamps.
#[must_use]
pub fn timeline(order: &Order) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = [
        (TimelineEvent::Placed, Some(order.created_at)),
        (TimelineEvent::PaymentConfirmed, order.paid_at),
        (TimelineEvent::Shipped, order.shipped_at),
        (TimelineEvent::Delivered, order.delivered_at),
        (TimelineEvent::Refunded, order.refunded_at),
        (TimelineEvent::Cancelled, order.cancelled_at),
    ]
    .into_iter()
    .filter_map(|(event, at)| at.map(|at| TimelineEntry { event, at }))
    .collect();
    // stable: ties keep lifecycle order
    entries.sort_by_key(|entry| entry.at);
    entries
}

/// Order plus its timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderView {
    /// The order
    pub order: Order,
    /// Milestones, oldest first
    pub timeline: Vec<TimelineEntry>,
}

/// Account state and full ledger history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditStatement {
    /// Normalised email
    pub email: String,
    /// Balance computed from the ledger
    pub balance: Money,
    /// Cached account row, absent before the first earn
    pub account: Option<StoreCreditAccount>,
    /// Entries, oldest first
    pub transactions: Vec<StoreCreditTransaction>,
}

/// Read-only service.
#[derive(Clone)]
pub struct OrderQuery {
    env: CommerceEnvironment,
}

impl OrderQuery {
    /// Service over `env`.
    #[must_use]
    pub const fn new(env: CommerceEnvironment) -> Self {
        Self { env }
    }

    /// Customer lookup by order number and email.
    ///
    /// A wrong email is indistinguishable from an unknown number.
    ///
    /// # Errors
    ///
    /// `NotFound` when no order with that number belongs to `email`.
    pub async fn by_number(&self, number: OrderNumber, email: &str) -> Result<OrderView, CommerceError> {
        let order = self
            .env
            .orders
            .order_by_number(number.clone())
            .await?
            .filter(|order| order.belongs_to(email))
            .ok_or_else(|| CommerceError::not_found("order", &number))?;
        Ok(OrderView {
            timeline: timeline(&order),
            order,
        })
    }

    /// Admin lookup by id.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    pub async fn order(&self, id: OrderId) -> Result<OrderView, CommerceError> {
        let order = self
            .env
            .orders
            .order(id)
            .await?
            .ok_or_else(|| CommerceError::not_found("order", id))?;
        Ok(OrderView {
            timeline: timeline(&order),
            order,
        })
    }

    /// Refund requests filed against an order, oldest first.
    ///
    /// # Errors
    ///
    /// `Internal` on storage failure.
    pub async fn refund_requests(&self, order_id: OrderId) -> Result<Vec<RefundRequest>, CommerceError> {
        Ok(self.env.refunds.refund_requests_for_order(order_id).await?)
    }

    /// Store-credit balance and history for an email. Unknown emails get an
    /// empty statement with a zero balance.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank email; `Internal` on storage failure.
    pub async fn credit_statement(&self, email: &str) -> Result<CreditStatement, CommerceError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(CommerceError::validation("email is required"));
        }
        let account = self.env.credit.credit_account(email.clone()).await?;
        let transactions = self.env.credit.credit_transactions(email.clone()).await?;
        Ok(CreditStatement {
            balance: ledger_balance(&transactions),
            email,
            account,
            transactions,
        })
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mocks::fixtures;
    use chrono::Duration;

    #[test]
    fn timeline_lists_present_milestones_in_order() {
        let mut order = fixtures::order(Money::from_cents(10_000));
        order.paid_at = Some(order.created_at + Duration::minutes(1));
        order.shipped_at = Some(order.created_at + Duration::days(1));
        order.delivered_at = Some(order.created_at + Duration::days(3));

        let events: Vec<_> = timeline(&order).into_iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec![
                TimelineEvent::Placed,
                TimelineEvent::PaymentConfirmed,
                TimelineEvent::Shipped,
                TimelineEvent::Delivered,
            ]
        );
    }

    #[test]
    fn fresh_order_only_has_placed() {
        let order = fixtures::order(Money::from_cents(500));
        let entries = timeline(&order);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, TimelineEvent::Placed);
        assert_eq!(entries[0].at, order.created_at);
    }
}
