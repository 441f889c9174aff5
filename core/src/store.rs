//! Storage contracts.
//!
//! The traits are split by concern but are expected to be implemented by one
//! backing store, because several operations must commit as a unit: an order
//! insert with its store-credit spend, an order transition with its restock
//! and dedup record, a refund settlement with its order update and ledger
//! entry.
//!
//! # Dyn Compatibility
//!
//! Methods take owned arguments and return [`BoxFuture`] so the traits can be
//! used as `Arc<dyn OrderStore>` etc. inside [`CommerceEnvironment`].
//!
//! [`CommerceEnvironment`]: crate::environment::CommerceEnvironment

use crate::environment::BoxFuture;
use crate::error::StoreError;
use crate::money::Money;
use crate::status::{OrderStatus, PaymentStatus, RefundStatus};
use crate::types::{
    CreditEntry, Order, OrderId, OrderNumber, PaymentProvider, ProductId, RefundRequest,
    RefundRequestId, SettlementMethod, StockAdjustment, StockLevel, StoreCreditAccount,
    StoreCreditTransaction,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a provider webhook event.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Provider that sent the event
    pub provider: PaymentProvider,
    /// Provider-assigned event id
    pub event_id: String,
}

/// Dedup record written once per (provider, event id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEvent {
    /// Provider whose webhook carried the event.
    pub provider: PaymentProvider,
    /// Provider event id. Unique per provider, and the dedup key together
    /// with `provider`.
    pub event_id: String,
    /// Provider event type, verbatim
    pub event_type: String,
    /// Order the event was matched to. Empty for events that were ignored
    /// before an order was resolved.
    pub order_id: Option<OrderId>,
    /// How the event was handled, as a reconciler outcome label such as
    /// `applied`, `ignored` or `settled`.
    pub outcome: String,
    /// When the event was processed
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Dedup key of this record.
    #[must_use]
    pub fn key(&self) -> EventKey {
        EventKey {
            provider: self.provider,
            event_id: self.event_id.clone(),
        }
    }
}

/// Compare-and-set guard plus new value for `orders.refunded_total`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefundedTotalUpdate {
    /// Refunded total the caller read. The write fails if the stored value
    /// differs.
    pub expected: Money,
    /// Refunded total to write; never above the order total.
    pub new: Money,
}

/// An order mutation applied as one atomic unit.
///
/// The store rejects the whole unit when the order's status is not
/// `expected_status` (or its refunded total is not the expected one), and
/// when `event` is already recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderTransition {
    /// Order to mutate.
    pub order_id: OrderId,
    /// Status the caller read the order in. The unit is rejected with
    /// [`StoreError::StatusConflict`] when the stored status differs.
    pub expected_status: OrderStatus,
    /// Status to write. Equal to `expected_status` for payment-only updates,
    /// which then leave the lifecycle timestamps alone.
    pub new_status: OrderStatus,
    /// New payment status, if it changes
    pub payment_status: Option<PaymentStatus>,
    /// Return everything the order holds ([`Order::reserved`], read under
    /// the same lock as the guards) to stock; missing or inactive products
    /// are skipped
    pub restock: bool,
    /// Refunded-total change, guarded by its own compare-and-set.
    pub refunded_total: Option<RefundedTotalUpdate>,
    /// Webhook dedup record inserted in the same unit. A record that already
    /// exists fails the whole unit with [`StoreError::DuplicateEvent`].
    pub event: Option<ProcessedEvent>,
    /// Mutation time; also stamped on `updated_at` and any lifecycle
    /// timestamp the new status sets.
    pub at: DateTime<Utc>,
}

impl OrderTransition {
    /// Transition with no side effects beyond the status change.
    #[must_use]
    pub const fn new(
        order_id: OrderId,
        expected_status: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            expected_status,
            new_status,
            payment_status: None,
            restock: false,
            refunded_total: None,
            event: None,
            at,
        }
    }

    /// Check the compare-and-set guards against the stored order.
    ///
    /// # Errors
    ///
    /// [`StoreError::StatusConflict`] or [`StoreError::RefundedTotalConflict`]
    /// when the order moved on since the transition was computed.
    pub fn check_guards(&self, order: &Order) -> Result<(), StoreError> {
        if order.status != self.expected_status {
            return Err(StoreError::StatusConflict {
                order_id: order.id,
                expected: self.expected_status,
                actual: order.status,
            });
        }
        if let Some(update) = self.refunded_total {
            if order.refunded_total != update.expected {
                return Err(StoreError::RefundedTotalConflict(order.id));
            }
        }
        Ok(())
    }

    /// Write the new status, payment status, refunded total and lifecycle
    /// timestamps onto `order`. Guards are not checked here.
    ///
    /// Returns the stock to give back, which is taken out of the order's
    /// reservation.
    #[must_use]
    pub fn apply_to(&self, order: &mut Order) -> Vec<StockAdjustment> {
        if order.status != self.new_status {
            match self.new_status {
                OrderStatus::Shipped => order.shipped_at = Some(self.at),
                OrderStatus::Delivered => order.delivered_at = Some(self.at),
                OrderStatus::Cancelled => order.cancelled_at = Some(self.at),
                OrderStatus::Refunded | OrderStatus::PartiallyRefunded => {
                    order.refunded_at = Some(self.at);
                }
                _ => {}
            }
        }
        order.status = self.new_status;
        if let Some(payment_status) = self.payment_status {
            if payment_status == PaymentStatus::Paid && order.paid_at.is_none() {
                order.paid_at = Some(self.at);
            }
            order.payment_status = payment_status;
        }
        if let Some(update) = self.refunded_total {
            order.refunded_total = update.new;
            order.refunded_at = Some(self.at);
        }
        order.updated_at = self.at;
        if self.restock {
            std::mem::take(&mut order.reserved)
        } else {
            Vec::new()
        }
    }
}

/// Admin decision on a pending refund request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedDecision {
    /// Request being decided. It must still be `pending` when the decision
    /// is written.
    pub refund_id: RefundRequestId,
    /// `Approved` or `Denied`
    pub status: RefundStatus,
    /// Amount the reviewer approved, which may be less than requested.
    /// Denials leave it empty.
    pub approved_amount: Option<Money>,
    /// Settlement path chosen by the reviewer. It cannot change after
    /// approval.
    pub method: SettlementMethod,
    /// Reviewer name the admin's bearer token maps to.
    pub reviewed_by: String,
    /// Internal notes, never shown to the customer.
    pub admin_notes: Option<String>,
    /// Customer-facing denial reason
    pub denial_reason: Option<String>,
    /// Decision time
    pub at: DateTime<Utc>,
}

/// Everything that commits when a refund is settled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundSettlement {
    /// Request moving `approved -> refunded`
    pub refund_id: RefundRequestId,
    /// Refund id the provider returned on the original-payment path. It is
    /// unique across requests and is how later refund webhooks are
    /// recognised as echoes.
    pub provider_refund_reference: Option<String>,
    /// Order update: the new status, the refunded-total compare-and-set and
    /// the restock once the order is fully refunded.
    pub order: OrderTransition,
    /// Ledger `earn` entry on the store-credit path.
    pub credit: Option<CreditEntry>,
}

/// Result of a committed settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettledRefund {
    /// Request as stored after the commit, now `refunded`.
    pub refund: RefundRequest,
    /// Order as stored after the commit.
    pub order: Order,
    /// Ledger entry, when settled to store credit
    pub credit_transaction: Option<StoreCreditTransaction>,
}

/// Per-product available quantities.
pub trait InventoryLedger: Send + Sync {
    /// Current stock for a product, `None` when the product is unknown.
    fn stock_level(
        &self,
        product_id: ProductId,
    ) -> BoxFuture<'_, Result<Option<StockLevel>, StoreError>>;

    /// Atomically subtract `quantity` if at least that much is available.
    ///
    /// Returns `false` (and changes nothing) when stock is short or the
    /// product is unknown.
    fn try_decrement(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Add `quantity` back. Returns `false` when the product is unknown or
    /// inactive, in which case nothing changes.
    fn increment(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Take stock for an order: the conditional decrement and the append to
    /// [`Order::reserved`] commit together.
    ///
    /// Returns `false` (and changes nothing) when stock is short, the product
    /// is unknown, or the order has already reached `failed`, `cancelled` or
    /// `refunded`.
    fn reserve_for_order(
        &self,
        order_id: OrderId,
        adjustment: StockAdjustment,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;
}

/// Orders and processed payment events.
pub trait OrderStore: Send + Sync {
    /// Insert a new order, appending `credit` (a checkout spend) in the same unit.
    ///
    /// Fails with [`StoreError::DuplicateOrderNumber`] on a number collision and
    /// [`StoreError::InsufficientCredit`] when the spend exceeds the balance.
    fn insert_order(
        &self,
        order: Order,
        credit: Option<CreditEntry>,
    ) -> BoxFuture<'_, Result<Order, StoreError>>;

    /// Load an order by id.
    fn order(&self, id: OrderId) -> BoxFuture<'_, Result<Option<Order>, StoreError>>;

    /// Load an order by its human-facing number.
    fn order_by_number(
        &self,
        number: OrderNumber,
    ) -> BoxFuture<'_, Result<Option<Order>, StoreError>>;

    /// Resolve an order from its provider correlation key.
    fn order_by_payment_reference(
        &self,
        provider: PaymentProvider,
        reference: String,
    ) -> BoxFuture<'_, Result<Option<Order>, StoreError>>;

    /// Whether the event is already recorded.
    fn is_event_processed(&self, key: EventKey) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Record an event that carries no order mutation. Returns `false` when it
    /// was already recorded.
    fn record_event(&self, event: ProcessedEvent) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Apply a guarded transition; returns the updated order.
    fn apply_transition(
        &self,
        transition: OrderTransition,
    ) -> BoxFuture<'_, Result<Order, StoreError>>;
}

/// Refund requests.
pub trait RefundStore: Send + Sync {
    /// Insert a new (pending) request.
    fn insert_refund_request(
        &self,
        request: RefundRequest,
    ) -> BoxFuture<'_, Result<RefundRequest, StoreError>>;

    /// Load a request.
    fn refund_request(
        &self,
        id: RefundRequestId,
    ) -> BoxFuture<'_, Result<Option<RefundRequest>, StoreError>>;

    /// Requests for an order, oldest first.
    fn refund_requests_for_order(
        &self,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<Vec<RefundRequest>, StoreError>>;

    /// Find the settled request that produced a provider refund id.
    fn refund_by_provider_reference(
        &self,
        reference: String,
    ) -> BoxFuture<'_, Result<Option<RefundRequest>, StoreError>>;

    /// Record an approve/deny decision; only applies to `pending` requests.
    fn record_decision(
        &self,
        decision: RecordedDecision,
    ) -> BoxFuture<'_, Result<RefundRequest, StoreError>>;

    /// Commit a settlement: request `approved -> refunded`, the order
    /// transition and the optional ledger entry, all or nothing.
    fn settle_refund(
        &self,
        settlement: RefundSettlement,
    ) -> BoxFuture<'_, Result<SettledRefund, StoreError>>;
}

/// Store-credit accounts and their append-only history.
pub trait StoreCreditLedger: Send + Sync {
    /// Account for a normalised email.
    fn credit_account(
        &self,
        email: String,
    ) -> BoxFuture<'_, Result<Option<StoreCreditAccount>, StoreError>>;

    /// Ledger entries for an account, oldest first.
    fn credit_transactions(
        &self,
        email: String,
    ) -> BoxFuture<'_, Result<Vec<StoreCreditTransaction>, StoreError>>;

    /// Append one entry, creating the account on first earn. Serialised per
    /// account; the resulting balance is computed from the ledger.
    fn append_credit(
        &self,
        entry: CreditEntry,
    ) -> BoxFuture<'_, Result<StoreCreditTransaction, StoreError>>;
}
