//! Catalog stock.

use crate::orders::{lock_order, write_order};
use crate::{PostgresStore, commit, rows, to_i32};
use chrono::{DateTime, Utc};
use commerce_core::environment::BoxFuture;
use commerce_core::error::StoreError;
use commerce_core::store::InventoryLedger;
use commerce_core::types::{OrderId, ProductId, StockAdjustment, StockLevel};
use sqlx::PgConnection;

/// Conditional update: two buyers racing for the last unit cannot both see
/// `available >= quantity`.
async fn decrement(
    conn: &mut PgConnection,
    product_id: ProductId,
    quantity: u32,
    at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r"
        UPDATE products
        SET available = available - $2, updated_at = $3
        WHERE product_id = $1 AND available >= $2
        ",
    )
    .bind(product_id.as_uuid())
    .bind(to_i32(quantity)?)
    .bind(at)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to decrement stock: {e}")))?;
    Ok(result.rows_affected() == 1)
}

impl PostgresStore {
    /// Insert or replace a product's stock row.
    ///
    /// The catalog itself is managed elsewhere; this keeps the inventory
    /// mirror in sync (and seeds test databases).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn upsert_product(&self, level: &StockLevel) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO products (product_id, name, available, active, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_id) DO UPDATE
            SET name = EXCLUDED.name,
                available = EXCLUDED.available,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(level.product_id.as_uuid())
        .bind(&level.name)
        .bind(to_i32(level.available)?)
        .bind(level.active)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to upsert product: {e}")))?;
        Ok(())
    }
}

impl InventoryLedger for PostgresStore {
    fn stock_level(
        &self,
        product_id: ProductId,
    ) -> BoxFuture<'_, Result<Option<StockLevel>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT product_id, name, available, active FROM products WHERE product_id = $1",
            )
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
            row.as_ref().map(rows::stock_level).transpose()
        })
    }

    fn try_decrement(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| StoreError::Database(format!("Failed to acquire connection: {e}")))?;
            decrement(&mut *conn, product_id, quantity, self.clock.now()).await
        })
    }

    fn increment(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE products
                SET available = available + $2, updated_at = $3
                WHERE product_id = $1 AND active
                ",
            )
            .bind(product_id.as_uuid())
            .bind(to_i32(quantity)?)
            .bind(self.clock.now())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to increment stock: {e}")))?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn reserve_for_order(
        &self,
        order_id: OrderId,
        adjustment: StockAdjustment,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            // Order row first, then product rows: the same lock order as a
            // restocking transition.
            let mut order = lock_order(&mut *tx, order_id).await?;
            if order.status.releases_stock() {
                return Ok(false);
            }
            let now = self.clock.now();
            if !decrement(&mut *tx, adjustment.product_id, adjustment.quantity, now).await? {
                return Ok(false);
            }
            order.record_reservation(adjustment);
            write_order(&mut *tx, &order).await?;
            commit(tx).await?;
            Ok(true)
        })
    }
}
