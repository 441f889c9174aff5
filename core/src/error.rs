//! Error taxonomy.
//!
//! Storage, verification and provider layers each have their own `thiserror`
//! enum. Services convert them into [`CommerceError`], whose [`ErrorKind`] is
//! what callers (HTTP handlers, operators) act on.

use crate::status::{OrderStatus, RefundStatus, TransitionError};
use crate::types::{OrderId, ProductId, RefundRequestId};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity name (`order`, `refund_request`, `product`)
        entity: &'static str,
        /// Identifier as text
        id: String,
    },

    /// Order compare-and-set failed: the status changed underneath us.
    #[error("Order {order_id} status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        /// Order
        order_id: OrderId,
        /// Status the caller computed its transition from
        expected: OrderStatus,
        /// Status currently stored
        actual: OrderStatus,
    },

    /// Order refunded total changed since it was read.
    #[error("Order {0} refunded total changed concurrently")]
    RefundedTotalConflict(OrderId),

    /// Refund request compare-and-set failed.
    #[error("Refund request {refund_id} status conflict: expected {expected}, found {actual}")]
    RefundStatusConflict {
        /// Refund request
        refund_id: RefundRequestId,
        /// Expected status
        expected: RefundStatus,
        /// Stored status
        actual: RefundStatus,
    },

    /// The (provider, event id) pair is already recorded.
    #[error("Payment event already processed: {provider}/{event_id}")]
    DuplicateEvent {
        /// Provider name
        provider: String,
        /// Provider event id
        event_id: String,
    },

    /// Generated order number collided with an existing one.
    #[error("Order number already exists: {0}")]
    DuplicateOrderNumber(String),

    /// Another order already carries this provider payment reference.
    #[error("Payment reference already used by another order: {0}")]
    DuplicatePaymentReference(String),

    /// A provider refund reference is already attached to another request.
    #[error("Provider refund reference already recorded: {0}")]
    DuplicateRefundReference(String),

    /// Store-credit spend exceeds the account balance.
    #[error("Insufficient store credit for {email}: balance {balance}, requested {requested}")]
    InsufficientCredit {
        /// Account
        email: String,
        /// Current balance
        balance: String,
        /// Requested spend
        requested: String,
    },

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Row could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Webhook authenticity failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// A required signature header is absent.
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// The signature header could not be parsed.
    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    /// Signature timestamp outside the tolerance window.
    #[error("Signature timestamp outside tolerance")]
    TimestampOutOfTolerance,

    /// No signature matched.
    #[error("Signature mismatch")]
    SignatureMismatch,

    /// The verifier is not configured (missing secret / webhook id).
    #[error("Webhook verification not configured for {0}")]
    NotConfigured(&'static str),

    /// The provider's verification API could not be reached.
    #[error("Verification service unavailable: {0}")]
    Unavailable(String),
}

/// Failures calling a provider API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The call did not complete within the configured bound.
    #[error("Provider call timed out after {0} ms")]
    Timeout(u64),

    /// Network-level failure.
    #[error("Provider transport error: {0}")]
    Transport(String),

    /// The provider answered with an error.
    #[error("Provider rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Provider message
        message: String,
    },

    /// No credentials configured for this provider.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// The provider response could not be decoded.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Coarse error category driving retry and presentation decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input; rejected before any mutation
    Validation,
    /// Stock shortfall, compare-and-set mismatch, duplicate
    Conflict,
    /// Bad signature or missing credential
    Unauthorized,
    /// Unknown order, refund request or product
    NotFound,
    /// Provider call failed or timed out; no local change was made
    UpstreamFailure,
    /// Too many requests in the current window
    RateLimited,
    /// Unexpected or database failure
    Internal,
}

impl ErrorKind {
    /// Stable snake-case code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::UpstreamFailure => "upstream_failure",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal",
        }
    }

    /// Only upstream failures are worth resubmitting unchanged.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::UpstreamFailure)
    }
}

/// One line of a stock shortfall.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockShortfall {
    /// Product
    pub product_id: ProductId,
    /// Product name
    pub name: String,
    /// Quantity in the cart
    pub requested: u32,
    /// Quantity available
    pub available: u32,
}

/// Service-level error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommerceError {
    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// One or more items cannot be fulfilled from stock.
    #[error("Insufficient stock for {} item(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    /// Concurrent modification, duplicate, or otherwise conflicting state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// State machine refused the transition.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Authentication failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Resource name
        resource: &'static str,
        /// Identifier
        id: String,
    },

    /// Provider call failed; safe to retry.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window resets
        retry_after_secs: u64,
    },

    /// Unexpected failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommerceError {
    /// Taxonomy bucket for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::InsufficientStock(_) | Self::Conflict(_) | Self::InvalidTransition(_) => {
                ErrorKind::Conflict
            }
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Upstream(_) => ErrorKind::UpstreamFailure,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for [`CommerceError::NotFound`].
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`CommerceError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<StoreError> for CommerceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound {
                resource: entity,
                id,
            },
            StoreError::StatusConflict { .. }
            | StoreError::RefundedTotalConflict(_)
            | StoreError::RefundStatusConflict { .. }
            | StoreError::DuplicateEvent { .. }
            | StoreError::DuplicateOrderNumber(_)
            | StoreError::DuplicatePaymentReference(_)
            | StoreError::DuplicateRefundReference(_)
            | StoreError::InsufficientCredit { .. } => Self::Conflict(err.to_string()),
            StoreError::Database(_) | StoreError::Serialization(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<VerificationError> for CommerceError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::Unavailable(_) => Self::Upstream(err.to_string()),
            _ => Self::Unauthorized(err.to_string()),
        }
    }
}

impl From<GatewayError> for CommerceError {
    fn from(err: GatewayError) -> Self {
        Self::Upstream(err.to_string())
    }
}
