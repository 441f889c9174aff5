//! Stripe event vocabulary.

use super::canonical::{CanonicalEvent, CanonicalTransition, DisputeOutcome};
use crate::error::CommerceError;
use crate::money::Money;
use crate::types::PaymentProvider;
use serde::Deserialize;
use std::collections::HashMap;

/// Metadata key carrying our refund request id on refunds we create.
pub const REFUND_REQUEST_METADATA_KEY: &str = "refund_request_id";

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: StripeEventData,
}

#[derive(Debug, Default, Deserialize)]
struct StripeEventData {
    #[serde(default)]
    object: StripeObject,
}

/// The fields we read from payment intents, charges and disputes.
#[derive(Debug, Default, Deserialize)]
struct StripeObject {
    id: Option<String>,
    /// Set on charges and disputes
    payment_intent: Option<String>,
    /// Charge: fully refunded
    refunded: Option<bool>,
    /// Charge: cumulative refunded amount in minor units
    amount_refunded: Option<i64>,
    /// Charge: refund list (most recent first)
    refunds: Option<StripeList<StripeRefund>>,
    /// Dispute: `won`, `lost`, ...
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    /// Minor units
    amount: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Parse a verified Stripe webhook body.
///
/// # Errors
///
/// [`CommerceError::Validation`] when the body is not a Stripe event.
pub fn parse_stripe_event(body: &[u8]) -> Result<CanonicalEvent, CommerceError> {
    let event: StripeEvent = serde_json::from_slice(body)
        .map_err(|e| CommerceError::validation(format!("invalid Stripe event: {e}")))?;
    let object = event.data.object;

    let (payment_reference, transition) = match event.event_type.as_str() {
        "payment_intent.succeeded" => (object.id, Some(CanonicalTransition::PaymentConfirmed)),
        "payment_intent.payment_failed" => (object.id, Some(CanonicalTransition::PaymentDenied)),
        "charge.refunded" => {
            let mut latest = object
                .refunds
                .and_then(|list| list.data.into_iter().next());
            (
                object.payment_intent,
                Some(CanonicalTransition::PaymentRefunded {
                    full: object.refunded.unwrap_or(false),
                    request_reference: latest
                        .as_mut()
                        .and_then(|refund| refund.metadata.remove(REFUND_REQUEST_METADATA_KEY)),
                    amount: latest
                        .as_ref()
                        .and_then(|refund| refund.amount)
                        .map(Money::from_cents),
                    refund_reference: latest.map(|refund| refund.id),
                    amount_refunded: object.amount_refunded.map(Money::from_cents),
                }),
            )
        }
        "charge.dispute.created" => (
            object.payment_intent,
            Some(CanonicalTransition::DisputeOpened),
        ),
        "charge.dispute.closed" => {
            let outcome = if object.status.as_deref() == Some("won") {
                DisputeOutcome::SellerWon
            } else {
                DisputeOutcome::BuyerWon
            };
            (
                object.payment_intent,
                Some(CanonicalTransition::DisputeResolved(outcome)),
            )
        }
        _ => (object.payment_intent.or(object.id), None),
    };

    Ok(CanonicalEvent {
        provider: PaymentProvider::Stripe,
        event_id: event.id,
        event_type: event.event_type,
        payment_reference,
        transition,
    })
}
