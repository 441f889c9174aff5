use crate::environment::{BoxFuture, Clock};
use crate::error::StoreError;
use crate::money::Money;
use crate::status::RefundStatus;
use crate::store::{
    EventKey, InventoryLedger, OrderStore, OrderTransition, ProcessedEvent, RecordedDecision,
    RefundSettlement, RefundStore, SettledRefund, StoreCreditLedger,
};
use crate::types::{
    CreditEntry, CreditTransactionKind, Order, OrderId, OrderNumber, PaymentProvider, ProductId,
    RefundRequest, RefundRequestId, StockAdjustment, StockLevel, StoreCreditAccount,
    StoreCreditTransaction, StoreCreditTransactionId, ledger_balance,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    products: HashMap<ProductId, StockLevel>,
    failing_decrements: HashSet<ProductId>,
    orders: HashMap<OrderId, Order>,
    events: HashMap<EventKey, ProcessedEvent>,
    refunds: Vec<RefundRequest>,
    accounts: HashMap<String, StoreCreditAccount>,
    ledger: Vec<StoreCreditTransaction>,
}

impl State {
    fn order(&self, id: OrderId) -> Result<&Order, StoreError> {
        self.orders.get(&id).ok_or_else(|| StoreError::NotFound {
            entity: "order",
            id: id.to_string(),
        })
    }

    fn refund_index(&self, id: RefundRequestId) -> Result<usize, StoreError> {
        self.refunds
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "refund_request",
                id: id.to_string(),
            })
    }

    fn check_event(&self, event: Option<&ProcessedEvent>) -> Result<(), StoreError> {
        match event {
            Some(event) if self.events.contains_key(&event.key()) => Err(StoreError::DuplicateEvent {
                provider: event.provider.to_string(),
                event_id: event.event_id.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn restock(&mut self, adjustments: &[StockAdjustment]) {
        for adjustment in adjustments {
            match self.products.get_mut(&adjustment.product_id) {
                Some(level) if level.active => {
                    level.available = level.available.saturating_add(adjustment.quantity);
                }
                _ => {}
            }
        }
    }

    /// Apply a transition whose guards were already checked.
    fn commit_transition(&mut self, transition: OrderTransition) -> Result<Order, StoreError> {
        let order = self
            .orders
            .get_mut(&transition.order_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "order",
                id: transition.order_id.to_string(),
            })?;
        let released = transition.apply_to(order);
        let updated = order.clone();
        self.restock(&released);
        if let Some(event) = transition.event {
            self.events.insert(event.key(), event);
        }
        Ok(updated)
    }

    fn balance(&self, email: &str) -> Money {
        let history: Vec<_> = self
            .ledger
            .iter()
            .filter(|tx| tx.email == email)
            .cloned()
            .collect();
        ledger_balance(&history)
    }

    /// Validate a ledger entry without writing it.
    fn check_credit(&self, entry: &CreditEntry) -> Result<(), StoreError> {
        if entry.kind == CreditTransactionKind::Spend {
            let balance = self.balance(&entry.email);
            if entry.amount > balance {
                return Err(StoreError::InsufficientCredit {
                    email: entry.email.clone(),
                    balance: balance.to_string(),
                    requested: entry.amount.to_string(),
                });
            }
        }
        Ok(())
    }

    fn append_credit(&mut self, entry: CreditEntry, now: DateTime<Utc>) -> StoreCreditTransaction {
        let balance_after = match entry.kind {
            CreditTransactionKind::Earn => self.balance(&entry.email) + entry.amount,
            CreditTransactionKind::Spend => self.balance(&entry.email) - entry.amount,
        };
        let account = self
            .accounts
            .entry(entry.email.clone())
            .or_insert_with(|| StoreCreditAccount {
                email: entry.email.clone(),
                balance: Money::ZERO,
                lifetime_earned: Money::ZERO,
                lifetime_used: Money::ZERO,
                created_at: now,
                updated_at: now,
            });
        match entry.kind {
            CreditTransactionKind::Earn => account.lifetime_earned = account.lifetime_earned + entry.amount,
            CreditTransactionKind::Spend => account.lifetime_used = account.lifetime_used + entry.amount,
        }
        account.balance = balance_after;
        account.updated_at = now;

        let transaction = StoreCreditTransaction {
            id: StoreCreditTransactionId::new(),
            email: entry.email,
            kind: entry.kind,
            amount: entry.amount,
            balance_after,
            source: entry.source,
            order_id: entry.order_id,
            refund_request_id: entry.refund_request_id,
            created_at: now,
        };
        self.ledger.push(transaction.clone());
        transaction
    }
}

/// In-memory implementation of every storage trait.
///
/// A single mutex guards all state, so each compound operation is checked
/// completely before anything is written and commits as one unit, matching
/// the transactional behavior of the Postgres store.
pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Empty store stamping ledger entries with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("Mutex lock failed".to_string()))
    }

    /// Add or replace a catalog product.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn put_product(
        &self,
        product_id: ProductId,
        name: &str,
        available: u32,
        active: bool,
    ) -> Result<(), StoreError> {
        self.lock()?.products.insert(
            product_id,
            StockLevel {
                product_id,
                name: name.to_string(),
                available,
                active,
            },
        );
        Ok(())
    }

    /// Make `try_decrement` and `reserve_for_order` fail for a product, as if its row were locked
    /// by a conflicting writer.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn fail_decrements_for(&self, product_id: ProductId) -> Result<(), StoreError> {
        self.lock()?.failing_decrements.insert(product_id);
        Ok(())
    }

    /// Current available quantity, `None` for unknown products.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn available(&self, product_id: ProductId) -> Result<Option<u32>, StoreError> {
        Ok(self.lock()?.products.get(&product_id).map(|p| p.available))
    }

    /// Number of recorded webhook events.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn processed_event_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.events.len())
    }

    /// Recorded webhook event, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn processed_event(&self, key: &EventKey) -> Result<Option<ProcessedEvent>, StoreError> {
        Ok(self.lock()?.events.get(key).cloned())
    }

    /// Overwrite an order, bypassing every guard (test setup only).
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn put_order(&self, order: Order) -> Result<(), StoreError> {
        self.lock()?.orders.insert(order.id, order);
        Ok(())
    }
}

impl InventoryLedger for InMemoryStore {
    fn stock_level(
        &self,
        product_id: ProductId,
    ) -> BoxFuture<'_, Result<Option<StockLevel>, StoreError>> {
        Box::pin(async move { Ok(self.lock()?.products.get(&product_id).cloned()) })
    }

    fn try_decrement(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            if state.failing_decrements.contains(&product_id) {
                return Err(StoreError::Database(format!(
                    "could not lock inventory row for {product_id}"
                )));
            }
            match state.products.get_mut(&product_id) {
                Some(level) if level.available >= quantity => {
                    level.available -= quantity;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn increment(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            match state.products.get_mut(&product_id) {
                Some(level) if level.active => {
                    level.available = level.available.saturating_add(quantity);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn reserve_for_order(
        &self,
        order_id: OrderId,
        adjustment: StockAdjustment,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            if state.failing_decrements.contains(&adjustment.product_id) {
                return Err(StoreError::Database(format!(
                    "could not lock inventory row for {}",
                    adjustment.product_id
                )));
            }
            if state.order(order_id)?.status.releases_stock() {
                return Ok(false);
            }
            match state.products.get_mut(&adjustment.product_id) {
                Some(level) if level.available >= adjustment.quantity => {
                    level.available -= adjustment.quantity;
                }
                _ => return Ok(false),
            }
            if let Some(order) = state.orders.get_mut(&order_id) {
                order.record_reservation(adjustment);
            }
            Ok(true)
        })
    }
}

impl OrderStore for InMemoryStore {
    fn insert_order(
        &self,
        order: Order,
        credit: Option<CreditEntry>,
    ) -> BoxFuture<'_, Result<Order, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            if state
                .orders
                .values()
                .any(|existing| existing.order_number == order.order_number)
            {
                return Err(StoreError::DuplicateOrderNumber(
                    order.order_number.to_string(),
                ));
            }
            if let (Some(provider), Some(reference)) = (order.provider(), order.payment_reference()) {
                if state.orders.values().any(|existing| {
                    existing.provider() == Some(provider)
                        && existing.payment_reference() == Some(reference)
                }) {
                    return Err(StoreError::DuplicatePaymentReference(reference.to_string()));
                }
            }
            if let Some(entry) = &credit {
                state.check_credit(entry)?;
            }
            if let Some(entry) = credit {
                let now = self.clock.now();
                state.append_credit(entry, now);
            }
            state.orders.insert(order.id, order.clone());
            Ok(order)
        })
    }

    fn order(&self, id: OrderId) -> BoxFuture<'_, Result<Option<Order>, StoreError>> {
        Box::pin(async move { Ok(self.lock()?.orders.get(&id).cloned()) })
    }

    fn order_by_number(
        &self,
        number: OrderNumber,
    ) -> BoxFuture<'_, Result<Option<Order>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .orders
                .values()
                .find(|order| order.order_number == number)
                .cloned())
        })
    }

    fn order_by_payment_reference(
        &self,
        provider: PaymentProvider,
        reference: String,
    ) -> BoxFuture<'_, Result<Option<Order>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .orders
                .values()
                .find(|order| {
                    order.provider() == Some(provider)
                        && order.payment_reference() == Some(reference.as_str())
                })
                .cloned())
        })
    }

    fn is_event_processed(&self, key: EventKey) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.lock()?.events.contains_key(&key)) })
    }

    fn record_event(&self, event: ProcessedEvent) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let key = event.key();
            if state.events.contains_key(&key) {
                return Ok(false);
            }
            state.events.insert(key, event);
            Ok(true)
        })
    }

    fn apply_transition(
        &self,
        transition: OrderTransition,
    ) -> BoxFuture<'_, Result<Order, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            state.check_event(transition.event.as_ref())?;
            transition.check_guards(state.order(transition.order_id)?)?;
            state.commit_transition(transition)
        })
    }
}

impl RefundStore for InMemoryStore {
    fn insert_refund_request(
        &self,
        request: RefundRequest,
    ) -> BoxFuture<'_, Result<RefundRequest, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            state.order(request.order_id)?;
            state.refunds.push(request.clone());
            Ok(request)
        })
    }

    fn refund_request(
        &self,
        id: RefundRequestId,
    ) -> BoxFuture<'_, Result<Option<RefundRequest>, StoreError>> {
        Box::pin(async move { Ok(self.lock()?.refunds.iter().find(|r| r.id == id).cloned()) })
    }

    fn refund_requests_for_order(
        &self,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<Vec<RefundRequest>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .refunds
                .iter()
                .filter(|r| r.order_id == order_id)
                .cloned()
                .collect())
        })
    }

    fn refund_by_provider_reference(
        &self,
        reference: String,
    ) -> BoxFuture<'_, Result<Option<RefundRequest>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .refunds
                .iter()
                .find(|r| r.provider_refund_reference.as_deref() == Some(reference.as_str()))
                .cloned())
        })
    }

    fn record_decision(
        &self,
        decision: RecordedDecision,
    ) -> BoxFuture<'_, Result<RefundRequest, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let index = state.refund_index(decision.refund_id)?;
            let refund = &mut state.refunds[index];
            if refund.status != RefundStatus::Pending {
                return Err(StoreError::RefundStatusConflict {
                    refund_id: refund.id,
                    expected: RefundStatus::Pending,
                    actual: refund.status,
                });
            }
            refund.status = decision.status;
            refund.approved_amount = decision.approved_amount;
            refund.method = decision.method;
            refund.reviewed_by = Some(decision.reviewed_by);
            refund.admin_notes = decision.admin_notes;
            refund.denial_reason = decision.denial_reason;
            refund.reviewed_at = Some(decision.at);
            Ok(refund.clone())
        })
    }

    fn settle_refund(
        &self,
        settlement: RefundSettlement,
    ) -> BoxFuture<'_, Result<SettledRefund, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let index = state.refund_index(settlement.refund_id)?;
            let current = &state.refunds[index];
            if current.status != RefundStatus::Approved {
                return Err(StoreError::RefundStatusConflict {
                    refund_id: current.id,
                    expected: RefundStatus::Approved,
                    actual: current.status,
                });
            }
            if let Some(reference) = &settlement.provider_refund_reference {
                if state
                    .refunds
                    .iter()
                    .any(|r| r.provider_refund_reference.as_ref() == Some(reference))
                {
                    return Err(StoreError::DuplicateRefundReference(reference.clone()));
                }
            }
            settlement
                .order
                .check_guards(state.order(settlement.order.order_id)?)?;
            state.check_event(settlement.order.event.as_ref())?;
            if let Some(entry) = &settlement.credit {
                state.check_credit(entry)?;
            }

            let at = settlement.order.at;
            let order = state.commit_transition(settlement.order)?;
            let credit_transaction = settlement
                .credit
                .map(|entry| state.append_credit(entry, at));
            let refund = &mut state.refunds[index];
            refund.status = RefundStatus::Refunded;
            refund.provider_refund_reference = settlement.provider_refund_reference;
            refund.refunded_at = Some(at);

            Ok(SettledRefund {
                refund: refund.clone(),
                order,
                credit_transaction,
            })
        })
    }
}

impl StoreCreditLedger for InMemoryStore {
    fn credit_account(
        &self,
        email: String,
    ) -> BoxFuture<'_, Result<Option<StoreCreditAccount>, StoreError>> {
        Box::pin(async move { Ok(self.lock()?.accounts.get(&email).cloned()) })
    }

    fn credit_transactions(
        &self,
        email: String,
    ) -> BoxFuture<'_, Result<Vec<StoreCreditTransaction>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .ledger
                .iter()
                .filter(|tx| tx.email == email)
                .cloned()
                .collect())
        })
    }

    fn append_credit(
        &self,
        entry: CreditEntry,
    ) -> BoxFuture<'_, Result<StoreCreditTransaction, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            state.check_credit(&entry)?;
            let now = self.clock.now();
            Ok(state.append_credit(entry, now))
        })
    }
}
