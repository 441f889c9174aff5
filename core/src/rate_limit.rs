//! Fixed-window rate limiting over an external counter store.
//!
//! Handlers stay stateless: the counter lives in the database
//! (`rate_limit_counters`) in production. [`InMemoryCounterStore`] is the
//! degraded mode used in tests and when no shared store is available; it only
//! limits per process.

use crate::environment::{BoxFuture, Clock};
use crate::error::{CommerceError, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Keyed counters bucketed by window.
pub trait CounterStore: Send + Sync {
    /// Atomically add one to the counter for (`key`, `window_start`) and return
    /// the new count. Counters for windows older than `window` may be discarded.
    fn increment(
        &self,
        key: String,
        window_start: DateTime<Utc>,
        window: Duration,
    ) -> BoxFuture<'_, Result<u64, StoreError>>;
}

/// Fixed-window limiter: at most `max_requests` per key per window.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        max_requests: u32,
        window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            max_requests,
            window,
        }
    }

    /// Count one request for `key` and fail once the window's budget is spent.
    ///
    /// # Errors
    ///
    /// [`CommerceError::RateLimited`] when over the limit;
    /// [`CommerceError::Internal`] when the counter store fails.
    pub async fn check_and_record(&self, key: &str) -> Result<(), CommerceError> {
        let now = self.clock.now();
        let (window_start, window_end) = self.window_bounds(now);
        let count = self
            .store
            .increment(key.to_string(), window_start, self.window)
            .await?;

        if count > u64::from(self.max_requests) {
            let retry_after_secs = u64::try_from((window_end - now).num_seconds())
                .unwrap_or(0)
                .max(1);
            tracing::warn!(key, count, retry_after_secs, "Rate limit exceeded");
            return Err(CommerceError::RateLimited { retry_after_secs });
        }
        Ok(())
    }

    fn window_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let window_secs = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX).max(1);
        let start_secs = now.timestamp() - now.timestamp().rem_euclid(window_secs);
        let start = Utc
            .timestamp_opt(start_secs, 0)
            .single()
            .unwrap_or(now);
        let end = start + chrono::Duration::seconds(window_secs);
        (start, end)
    }
}

/// Process-local counter store.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, (DateTime<Utc>, u64)>>,
}

impl InMemoryCounterStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment(
        &self,
        key: String,
        window_start: DateTime<Utc>,
        _window: Duration,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut counters = self
                .counters
                .lock()
                .map_err(|_| StoreError::Database("Mutex lock failed".to_string()))?;
            // A key holds only its current window; older buckets are overwritten.
            counters.retain(|_, (start, _)| *start >= window_start);
            let entry = counters.entry(key).or_insert((window_start, 0));
            if entry.0 != window_start {
                *entry = (window_start, 0);
            }
            entry.1 += 1;
            Ok(entry.1)
        })
    }
}
