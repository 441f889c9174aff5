//! # Commerce Core
//!
//! Order lifecycle and payment-settlement core for a small retail storefront.
//!
//! The crate owns the rules; storage, payment providers, notification delivery
//! and time are injected through [`environment::CommerceEnvironment`].
//!
//! ## Services
//!
//! - [`intake::OrderIntake`]: validate a cart, check stock and credit, persist
//!   the order, reserve inventory
//! - [`reconciler::PaymentReconciler`]: verify provider webhooks and apply each
//!   event to its order exactly once
//! - [`settlement::SettlementEngine`]: customer refund requests, admin review
//!   and settlement to the original payment or to store credit
//! - [`fulfillment::Fulfillment`]: processing, shipping, delivery, cancellation
//! - [`query::OrderQuery`]: order tracking and store-credit statements
//!
//! ## Invariants
//!
//! - Order status only moves along the edges in [`status::OrderStatus`]
//! - Every status write is a compare-and-set on the status that was read
//! - Money is [`money::Money`], fixed at two decimal places
//! - Store-credit balances are always the sum of the append-only ledger
//!
//! ## Example
//!
//! ```
//! use commerce_core::status::OrderStatus;
//!
//! assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Processing));
//! assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Confirmed));
//! ```

pub mod classification;
pub mod environment;
pub mod error;
pub mod fulfillment;
pub mod gateway;
pub mod intake;
pub mod money;
pub mod notify;
pub mod query;
pub mod rate_limit;
pub mod reconciler;
pub mod settlement;
pub mod status;
pub mod store;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod mocks;

// Re-export commonly used types
pub use environment::{BoxFuture, Clock, CommerceEnvironment, SystemClock};
pub use error::{CommerceError, ErrorKind, StoreError};
pub use money::Money;
pub use status::{OrderStatus, PaymentStatus, RefundStatus};
