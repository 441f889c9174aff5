//! Shared rate-limit counters.

use crate::PostgresStore;
use chrono::{DateTime, Utc};
use commerce_core::environment::BoxFuture;
use commerce_core::error::StoreError;
use commerce_core::rate_limit::CounterStore;
use std::time::Duration;

impl CounterStore for PostgresStore {
    fn increment(
        &self,
        key: String,
        window_start: DateTime<Utc>,
        window: Duration,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let window = chrono::Duration::from_std(window)
                .map_err(|e| StoreError::Database(format!("Invalid rate-limit window: {e}")))?;
            let (count,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO rate_limit_counters (key, window_start, count, expires_at)
                VALUES ($1, $2, 1, $3)
                ON CONFLICT (key, window_start)
                DO UPDATE SET count = rate_limit_counters.count + 1
                RETURNING count
                ",
            )
            .bind(&key)
            .bind(window_start)
            .bind(window_start + window)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to count request: {e}")))?;

            u64::try_from(count)
                .map_err(|_| StoreError::Serialization(format!("Negative counter value {count}")))
        })
    }
}
