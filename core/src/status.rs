//! Order state machine plus the payment and refund-request status enums.
//!
//! Every status mutation in the crate goes through [`OrderStatus::transition`];
//! stores additionally guard the write with a compare-and-set on the prior
//! status, so a transition computed against stale state is never applied.
//!
//! ```text
//! pending ──► confirmed ──► processing ──► shipped ──► delivered
//!                │              │             │            │
//!                ├──────────────┴─────────────┴──► cancelled│
//!                ├──────────────┴─────────────┴────────────┴──► refunded | partially_refunded
//!                └──► failed
//! any non-terminal ──► disputed ──► refunded | confirmed
//! refunded ──► disputed
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Rejected state-machine transition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// The requested edge is not in the transition table.
    #[error("Invalid order transition: {from} -> {to}")]
    Invalid {
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },
}

/// Order lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Awaiting provider confirmation
    Pending,
    /// Accepted; initial status set by intake
    Confirmed,
    /// Being picked and packed
    Processing,
    /// Handed to the carrier
    Shipped,
    /// Received by the customer
    Delivered,
    /// Cancelled before delivery
    Cancelled,
    /// Fully refunded
    Refunded,
    /// Some amount refunded
    PartiallyRefunded,
    /// Payment denied
    Failed,
    /// Chargeback or provider dispute in progress
    Disputed,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::Pending,
        Self::Confirmed,
        Self::Processing,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
        Self::Refunded,
        Self::PartiallyRefunded,
        Self::Failed,
        Self::Disputed,
    ];

    /// Stable snake-case name used in storage and APIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Failed => "failed",
            Self::Disputed => "disputed",
        }
    }

    /// Statuses with no outgoing edges in normal operation.
    ///
    /// `refunded` still permits `disputed` when a provider reopens a settled
    /// transaction.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Refunded)
    }

    /// Statuses this one may move to.
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [Self] {
        use OrderStatus::{
            Cancelled, Confirmed, Delivered, Disputed, Failed, PartiallyRefunded, Processing,
            Refunded, Shipped,
        };
        match self {
            Self::Pending => &[Confirmed, Failed, Cancelled, Disputed],
            Self::Confirmed => &[
                Processing,
                Cancelled,
                Refunded,
                PartiallyRefunded,
                Failed,
                Disputed,
            ],
            Self::Processing => &[Shipped, Cancelled, Refunded, PartiallyRefunded, Disputed],
            Self::Shipped => &[Delivered, Cancelled, Refunded, PartiallyRefunded, Disputed],
            Self::Delivered => &[Refunded, PartiallyRefunded],
            Self::PartiallyRefunded => &[Refunded, PartiallyRefunded, Disputed],
            Self::Failed => &[Disputed],
            Self::Disputed => &[Refunded, Confirmed],
            Self::Refunded => &[Disputed],
            Self::Cancelled => &[],
        }
    }

    /// Whether `self -> to` is in the transition table.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// Validate `self -> to`, returning the new status.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Invalid`] when the edge is not in the table.
    pub fn transition(self, to: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError::Invalid { from: self, to })
        }
    }

    /// Statuses whose order no longer holds inventory; stock is never taken
    /// for an order that has reached one of these.
    #[must_use]
    pub const fn releases_stock(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Refunded)
    }

    /// Whether a refund may still be requested or settled from this status.
    #[must_use]
    pub fn admits_refund(self) -> bool {
        self.can_transition_to(Self::PartiallyRefunded)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

/// Status of the payment record attached to an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Not yet confirmed by the provider
    Pending,
    /// Captured
    Paid,
    /// Denied
    Failed,
    /// Fully reversed
    Refunded,
    /// Partially reversed
    PartiallyRefunded,
}

impl PaymentStatus {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Refund request review status: `pending -> approved|denied`, `approved -> refunded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Awaiting review
    Pending,
    /// Approved, not yet settled
    Approved,
    /// Denied (terminal)
    Denied,
    /// Settled (terminal, immutable)
    Refunded,
}

impl RefundStatus {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Refunded => "refunded",
        }
    }

    /// `denied` and `refunded` accept no further changes.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Refunded)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown refund status: {other}")),
        }
    }
}
