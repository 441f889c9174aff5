//! Orders and processed payment events.

use crate::{PostgresStore, commit, rows, to_i32, write_error};
use chrono::{DateTime, Utc};
use commerce_core::environment::BoxFuture;
use commerce_core::error::StoreError;
use commerce_core::store::{EventKey, OrderStore, OrderTransition, ProcessedEvent};
use commerce_core::types::{
    CreditEntry, Order, OrderId, OrderNumber, PaymentProvider, StockAdjustment,
};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use sqlx::types::Json;

/// Load and lock an order row for the rest of the transaction.
pub(crate) async fn lock_order(conn: &mut PgConnection, id: OrderId) -> Result<Order, StoreError> {
    let row = sqlx::query("SELECT * FROM orders WHERE order_id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to lock order: {e}")))?
        .ok_or_else(|| StoreError::NotFound {
            entity: "order",
            id: id.to_string(),
        })?;
    rows::order(&row)
}

/// Write the mutable columns of an order.
pub(crate) async fn write_order(conn: &mut PgConnection, order: &Order) -> Result<(), StoreError> {
    sqlx::query(
        r"
        UPDATE orders
        SET status = $2,
            payment_status = $3,
            refunded_total = $4,
            updated_at = $5,
            paid_at = $6,
            shipped_at = $7,
            delivered_at = $8,
            refunded_at = $9,
            cancelled_at = $10,
            reserved = $11
        WHERE order_id = $1
        ",
    )
    .bind(order.id.as_uuid())
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(Decimal::from(order.refunded_total))
    .bind(order.updated_at)
    .bind(order.paid_at)
    .bind(order.shipped_at)
    .bind(order.delivered_at)
    .bind(order.refunded_at)
    .bind(order.cancelled_at)
    .bind(Json(&order.reserved))
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to update order: {e}")))?;
    Ok(())
}

/// Return stock; rows for missing or inactive products are left alone.
async fn restock(
    conn: &mut PgConnection,
    adjustments: &[StockAdjustment],
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    for adjustment in adjustments {
        let result = sqlx::query(
            r"
            UPDATE products
            SET available = available + $2, updated_at = $3
            WHERE product_id = $1 AND active
            ",
        )
        .bind(adjustment.product_id.as_uuid())
        .bind(to_i32(adjustment.quantity)?)
        .bind(at)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to restock: {e}")))?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                product_id = %adjustment.product_id,
                quantity = adjustment.quantity,
                "Restock skipped for missing or inactive product"
            );
        }
    }
    Ok(())
}

/// Insert a dedup record. Returns `false` when the key already exists.
async fn insert_event(conn: &mut PgConnection, event: &ProcessedEvent) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r"
        INSERT INTO processed_payment_events
            (provider, event_id, event_type, order_id, outcome, processed_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (provider, event_id) DO NOTHING
        ",
    )
    .bind(event.provider.as_str())
    .bind(&event.event_id)
    .bind(&event.event_type)
    .bind(event.order_id.map(|id| id.as_uuid()))
    .bind(&event.outcome)
    .bind(event.processed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to record payment event: {e}")))?;
    Ok(result.rows_affected() == 1)
}

/// Apply a guarded transition inside an open transaction.
///
/// The dedup record goes in first so a concurrent delivery of the same event
/// blocks on the key and then sees it as a duplicate.
pub(crate) async fn transition_in(
    conn: &mut PgConnection,
    transition: OrderTransition,
) -> Result<Order, StoreError> {
    if let Some(event) = &transition.event {
        if !insert_event(conn, event).await? {
            return Err(StoreError::DuplicateEvent {
                provider: event.provider.to_string(),
                event_id: event.event_id.clone(),
            });
        }
    }

    let mut order = lock_order(conn, transition.order_id).await?;
    transition.check_guards(&order)?;
    let released = transition.apply_to(&mut order);
    write_order(conn, &order).await?;
    restock(conn, &released, transition.at).await?;
    Ok(order)
}

impl PostgresStore {
    /// Processed-event record for a key, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn processed_event(&self, key: &EventKey) -> Result<Option<ProcessedEvent>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM processed_payment_events WHERE provider = $1 AND event_id = $2",
        )
        .bind(key.provider.as_str())
        .bind(&key.event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row.as_ref().map(rows::processed_event).transpose()
    }

    async fn insert_order_tx(
        &self,
        order: Order,
        credit: Option<CreditEntry>,
    ) -> Result<Order, StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r"
            INSERT INTO orders (
                order_id, order_number, customer_email, customer, shipping_address, items,
                subtotal, shipping, tax, discount, total, store_credit_applied,
                currency, status, payment, payment_provider, payment_reference,
                payment_status, mode, refunded_total, reserved,
                created_at, updated_at, paid_at, shipped_at, delivered_at, refunded_at, cancelled_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
            )
            ",
        )
        .bind(order.id.as_uuid())
        .bind(order.order_number.as_str())
        .bind(&order.customer.email)
        .bind(Json(&order.customer))
        .bind(order.shipping_address.as_ref().map(Json))
        .bind(Json(&order.items))
        .bind(Decimal::from(order.totals.subtotal))
        .bind(Decimal::from(order.totals.shipping))
        .bind(Decimal::from(order.totals.tax))
        .bind(Decimal::from(order.totals.discount))
        .bind(Decimal::from(order.totals.total))
        .bind(Decimal::from(order.totals.store_credit))
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(Json(&order.payment))
        .bind(order.provider().map(PaymentProvider::as_str))
        .bind(order.payment_reference())
        .bind(order.payment_status.as_str())
        .bind(order.mode.as_str())
        .bind(Decimal::from(order.refunded_total))
        .bind(Json(&order.reserved))
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .bind(order.refunded_at)
        .bind(order.cancelled_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            let key = match &e {
                sqlx::Error::Database(db_err)
                    if db_err.constraint() == Some(crate::constraints::PAYMENT_REFERENCE) =>
                {
                    order.payment_reference().unwrap_or_default().to_string()
                }
                _ => order.order_number.to_string(),
            };
            write_error(&e, &key)
        })?;

        if let Some(entry) = credit {
            let now = self.clock.now();
            crate::credit::append_in(&mut *tx, entry, now).await?;
        }

        commit(tx).await?;
        Ok(order)
    }
}

impl OrderStore for PostgresStore {
    fn insert_order(
        &self,
        order: Order,
        credit: Option<CreditEntry>,
    ) -> BoxFuture<'_, Result<Order, StoreError>> {
        Box::pin(self.insert_order_tx(order, credit))
    }

    fn order(&self, id: OrderId) -> BoxFuture<'_, Result<Option<Order>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM orders WHERE order_id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            row.as_ref().map(rows::order).transpose()
        })
    }

    fn order_by_number(
        &self,
        number: OrderNumber,
    ) -> BoxFuture<'_, Result<Option<Order>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM orders WHERE order_number = $1")
                .bind(number.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            row.as_ref().map(rows::order).transpose()
        })
    }

    fn order_by_payment_reference(
        &self,
        provider: PaymentProvider,
        reference: String,
    ) -> BoxFuture<'_, Result<Option<Order>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT * FROM orders WHERE payment_provider = $1 AND payment_reference = $2",
            )
            .bind(provider.as_str())
            .bind(&reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
            row.as_ref().map(rows::order).transpose()
        })
    }

    fn is_event_processed(&self, key: EventKey) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                r"
                SELECT EXISTS(
                    SELECT 1 FROM processed_payment_events WHERE provider = $1 AND event_id = $2
                )
                ",
            )
            .bind(key.provider.as_str())
            .bind(&key.event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(exists)
        })
    }

    fn record_event(&self, event: ProcessedEvent) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            insert_event(&mut *conn, &event).await
        })
    }

    fn apply_transition(
        &self,
        transition: OrderTransition,
    ) -> BoxFuture<'_, Result<Order, StoreError>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let order = transition_in(&mut *tx, transition).await?;
            commit(tx).await?;
            Ok(order)
        })
    }
}
