//! Dependency injection for the commerce services.
//!
//! All external dependencies (storage, payment providers, notification
//! delivery, time) are abstracted behind traits and handed to the services
//! through a [`CommerceEnvironment`]. Production wiring lives in the server
//! binary; tests use the in-memory doubles from [`crate::mocks`].

use crate::gateway::PaymentGateways;
use crate::notify::Notifier;
use crate::store::{InventoryLedger, OrderStore, RefundStore, StoreCreditLedger};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed, sendable future returned by the dyn-compatible traits in this crate.
///
/// The storage and provider traits return `Pin<Box<dyn Future>>` instead of
/// using `async fn` so they can be used as trait objects (`Arc<dyn OrderStore>`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use commerce_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let now = clock.now();
/// assert!(now.timestamp() > 0);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared dependencies for intake, reconciliation, settlement and queries.
///
/// Every field is an `Arc`, so cloning is cheap and each request handler can
/// own its copy. The storage traits are usually implemented by a single
/// backing store (`PostgresStore` or `InMemoryStore`), which is what lets the
/// compound operations (order transition plus restock plus dedup record) run
/// as one atomic unit.
#[derive(Clone)]
pub struct CommerceEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Per-product available quantities
    pub inventory: Arc<dyn InventoryLedger>,
    /// Orders and processed payment events
    pub orders: Arc<dyn OrderStore>,
    /// Refund requests and their settlement
    pub refunds: Arc<dyn RefundStore>,
    /// Store-credit balances and history
    pub credit: Arc<dyn StoreCreditLedger>,
    /// Provider refund APIs, keyed by provider
    pub gateways: PaymentGateways,
    /// Fire-and-forget customer notifications
    pub notifier: Arc<dyn Notifier>,
}

impl CommerceEnvironment {
    /// Build an environment where one backing store implements every storage trait.
    #[must_use]
    pub fn from_store<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        gateways: PaymentGateways,
        notifier: Arc<dyn Notifier>,
    ) -> Self
    where
        S: InventoryLedger + OrderStore + RefundStore + StoreCreditLedger + 'static,
    {
        Self {
            clock,
            inventory: store.clone(),
            orders: store.clone(),
            refunds: store.clone(),
            credit: store,
            gateways,
            notifier,
        }
    }
}
