//! Provider-agnostic payment events and their effect on an order.

use crate::money::Money;
use crate::status::{OrderStatus, PaymentStatus, TransitionError};
use crate::types::{Order, PaymentProvider};

/// Winner of a closed dispute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisputeOutcome {
    /// Merchant kept the funds
    SellerWon,
    /// Funds returned to the buyer
    BuyerWon,
}

/// The fixed set of transitions provider events map onto.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanonicalTransition {
    /// Capture succeeded
    PaymentConfirmed,
    /// Capture denied or failed
    PaymentDenied,
    /// Provider reports a refund
    PaymentRefunded {
        /// Provider flags the whole payment as returned
        full: bool,
        /// Provider refund id, used to recognise refunds we issued ourselves
        refund_reference: Option<String>,
        /// Refund request id we attached to the provider refund, echoed back
        /// in its metadata (Stripe) or `custom_id` (PayPal)
        request_reference: Option<String>,
        /// Amount of this refund alone, when the provider reports it
        amount: Option<Money>,
        /// Cumulative refunded amount, when the provider reports it
        amount_refunded: Option<Money>,
    },
    /// Chargeback or dispute opened
    DisputeOpened,
    /// Dispute closed
    DisputeResolved(DisputeOutcome),
}

impl CanonicalTransition {
    /// Refund with only the provider refund id known.
    #[must_use]
    pub const fn refund(full: bool, refund_reference: Option<String>) -> Self {
        Self::PaymentRefunded {
            full,
            refund_reference,
            request_reference: None,
            amount: None,
            amount_refunded: None,
        }
    }

    /// Short name for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PaymentConfirmed => "payment_confirmed",
            Self::PaymentDenied => "payment_denied",
            Self::PaymentRefunded { .. } => "payment_refunded",
            Self::DisputeOpened => "dispute_opened",
            Self::DisputeResolved(_) => "dispute_resolved",
        }
    }
}

/// A parsed provider webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalEvent {
    /// Provider
    pub provider: PaymentProvider,
    /// Provider event id (dedup key)
    pub event_id: String,
    /// Provider event type, verbatim
    pub event_type: String,
    /// Payment intent id / capture id the event concerns
    pub payment_reference: Option<String>,
    /// `None` for event types outside the mapping table
    pub transition: Option<CanonicalTransition>,
}

/// What a canonical transition does to a specific order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannedEffect {
    /// Write these changes
    Apply(TransitionPlan),
    /// The order already reflects this event, or a later one superseded it
    Nothing(&'static str),
}

/// Changes computed for one order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionPlan {
    /// New status (equal to the current one for payment-only updates)
    pub new_status: OrderStatus,
    /// New payment status
    pub payment_status: Option<PaymentStatus>,
    /// Return catalog line items to stock
    pub restock: bool,
    /// New refunded total
    pub refunded_total: Option<Money>,
}

impl TransitionPlan {
    fn status(new_status: OrderStatus, payment_status: PaymentStatus) -> Self {
        Self {
            new_status,
            payment_status: Some(payment_status),
            restock: false,
            refunded_total: None,
        }
    }

    /// True when the order status does not change.
    #[must_use]
    pub fn is_payment_only(&self, order: &Order) -> bool {
        self.new_status == order.status
    }
}

/// Decide how `transition` applies to `order`.
///
/// Status changes are validated against the state machine; events that the
/// order already reflects plan [`PlannedEffect::Nothing`] so out-of-order and
/// repeated deliveries under new event ids stay harmless.
///
/// # Errors
///
/// [`TransitionError`] when the event asks for an edge the state machine
/// forbids (e.g. a capture on a cancelled order).
pub fn plan_transition(
    transition: &CanonicalTransition,
    order: &Order,
) -> Result<PlannedEffect, TransitionError> {
    use OrderStatus as S;

    let current = order.status;
    let plan = match transition {
        CanonicalTransition::PaymentConfirmed => match current {
            S::Pending => TransitionPlan::status(current.transition(S::Confirmed)?, PaymentStatus::Paid),
            S::Confirmed | S::Processing | S::Shipped | S::Delivered => {
                if order.payment_status == PaymentStatus::Paid {
                    return Ok(PlannedEffect::Nothing("payment already recorded"));
                }
                TransitionPlan::status(current, PaymentStatus::Paid)
            }
            S::Refunded | S::PartiallyRefunded | S::Disputed => {
                return Ok(PlannedEffect::Nothing("superseded by later payment event"));
            }
            S::Failed | S::Cancelled => {
                return Err(TransitionError::Invalid {
                    from: current,
                    to: S::Confirmed,
                });
            }
        },
        CanonicalTransition::PaymentDenied => {
            if current == S::Failed {
                return Ok(PlannedEffect::Nothing("already failed"));
            }
            TransitionPlan {
                restock: true,
                ..TransitionPlan::status(current.transition(S::Failed)?, PaymentStatus::Failed)
            }
        }
        CanonicalTransition::PaymentRefunded {
            full,
            amount,
            amount_refunded,
            ..
        } => {
            let total = order.totals.total;
            // Prefer the provider's running total; fall back to adding this
            // refund to what the order already records.
            let cumulative = amount_refunded
                .or_else(|| amount.map(|amount| order.refunded_total + amount))
                .map(|cumulative| cumulative.max(order.refunded_total).min(total));
            if *full || cumulative.is_some_and(|cumulative| cumulative >= total) {
                if current == S::Refunded {
                    return Ok(PlannedEffect::Nothing("already refunded"));
                }
                TransitionPlan {
                    restock: true,
                    refunded_total: Some(total),
                    ..TransitionPlan::status(current.transition(S::Refunded)?, PaymentStatus::Refunded)
                }
            } else {
                if current == S::PartiallyRefunded
                    && cumulative.is_none_or(|cumulative| cumulative == order.refunded_total)
                {
                    return Ok(PlannedEffect::Nothing("partial refund already recorded"));
                }
                TransitionPlan {
                    refunded_total: cumulative,
                    ..TransitionPlan::status(
                        current.transition(S::PartiallyRefunded)?,
                        PaymentStatus::PartiallyRefunded,
                    )
                }
            }
        }
        CanonicalTransition::DisputeOpened => {
            if current == S::Disputed {
                return Ok(PlannedEffect::Nothing("already disputed"));
            }
            TransitionPlan {
                new_status: current.transition(S::Disputed)?,
                payment_status: None,
                restock: false,
                refunded_total: None,
            }
        }
        CanonicalTransition::DisputeResolved(DisputeOutcome::SellerWon) => {
            if current == S::Confirmed {
                return Ok(PlannedEffect::Nothing("dispute already resolved"));
            }
            TransitionPlan::status(current.transition(S::Confirmed)?, PaymentStatus::Paid)
        }
        // Goods stay with the buyer, so nothing is restocked.
        CanonicalTransition::DisputeResolved(DisputeOutcome::BuyerWon) => {
            if current == S::Refunded {
                return Ok(PlannedEffect::Nothing("dispute already resolved"));
            }
            TransitionPlan {
                refunded_total: Some(order.totals.total),
                ..TransitionPlan::status(current.transition(S::Refunded)?, PaymentStatus::Refunded)
            }
        }
    };
    Ok(PlannedEffect::Apply(plan))
}
