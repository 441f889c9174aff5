//! Axum HTTP surface for the commerce core.
//!
//! Handlers are thin: parse the request, call one service, map the result.
//! All rules live in `commerce-core`.
//!
//! # Routes
//!
//! ```text
//! GET   /health
//! POST  /api/checkout
//! GET   /api/orders/:order_number?email=
//! POST  /api/orders/:order_number/refund-requests
//! POST  /api/webhooks/stripe
//! POST  /api/webhooks/paypal
//! GET   /api/admin/refund-requests/:id          (bearer)
//! PATCH /api/admin/refund-requests/:id          (bearer)
//! POST  /api/admin/orders/:id/status            (bearer)
//! GET   /api/admin/store-credit/:email          (bearer)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use commerce_web::{AppState, router};
//!
//! let app = router(AppState::new(env).with_admin_tokens(tokens));
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{AdminIdentity, AdminTokens, CorrelationId};
pub use handlers::router;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationIdExt, correlation_id_layer};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
