//! `PostgreSQL` storage for the commerce core.
//!
//! [`PostgresStore`] implements every storage trait from `commerce-core`
//! against one connection pool, so the compound operations the services rely
//! on (an order insert with its store-credit spend, a transition with its
//! restock and dedup record, a refund settlement with its ledger entry) each
//! run inside a single database transaction.
//!
//! Concurrency control is row-level:
//!
//! - inventory decrements are conditional `UPDATE ... WHERE available >= n`
//! - order mutations lock the order row (`SELECT ... FOR UPDATE`) and check
//!   the caller's expected status and refunded total before writing
//! - store-credit appends lock the account row, so balances are serialised
//!   per customer and always recomputed from the ledger
//! - webhook dedup is the `(provider, event_id)` primary key
//!
//! # Example
//!
//! ```no_run
//! use commerce_postgres::PostgresStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/commerce").await?;
//! let store = PostgresStore::new(pool);
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod counters;
mod credit;
mod inventory;
mod orders;
mod refunds;
mod rows;

use chrono::{DateTime, Utc};
use commerce_core::environment::{Clock, SystemClock};
use commerce_core::error::StoreError;
use sqlx::PgPool;
use std::sync::Arc;

/// Constraint names the schema uses for its uniqueness guarantees.
mod constraints {
    pub const ORDER_NUMBER: &str = "orders_order_number_key";
    pub const PAYMENT_REFERENCE: &str = "orders_payment_reference_key";
    pub const REFUND_REFERENCE: &str = "refund_requests_provider_refund_reference_key";
}

/// `PostgreSQL`-backed implementation of the commerce storage traits.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresStore {
    /// Create a store on an existing pool, stamping rows with wall-clock time.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for ledger and catalog timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Delete rate-limit counters whose window ended before `before`.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn purge_rate_limit_counters(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE expires_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "Expired rate-limit counters removed");
        }
        Ok(purged)
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to start transaction: {e}")))
    }
}

async fn commit(tx: sqlx::Transaction<'_, sqlx::Postgres>) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(|e| StoreError::Database(format!("Failed to commit transaction: {e}")))
}

/// Map a write error, turning unique violations on known constraints into
/// their typed [`StoreError`] variants.
fn write_error(e: &sqlx::Error, key: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = e {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(constraints::ORDER_NUMBER) => {
                    return StoreError::DuplicateOrderNumber(key.to_string());
                }
                Some(constraints::PAYMENT_REFERENCE) => {
                    return StoreError::DuplicatePaymentReference(key.to_string());
                }
                Some(constraints::REFUND_REFERENCE) => {
                    return StoreError::DuplicateRefundReference(key.to_string());
                }
                _ => {}
            }
        }
    }
    StoreError::Database(e.to_string())
}

fn to_i32(quantity: u32) -> Result<i32, StoreError> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::Database(format!("Quantity {quantity} exceeds i32::MAX")))
}
