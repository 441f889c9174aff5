//! PayPal event vocabulary.

use super::canonical::{CanonicalEvent, CanonicalTransition, DisputeOutcome};
use crate::error::CommerceError;
use crate::money::Money;
use crate::types::PaymentProvider;
use serde::Deserialize;

const SELLER_FAVOUR: &str = "RESOLVED_SELLER_FAVOUR";

#[derive(Debug, Deserialize)]
struct PaypalEvent {
    id: String,
    event_type: String,
    #[serde(default)]
    resource: PaypalResource,
}

/// Captures, refunds and disputes share the envelope; we read what each needs.
#[derive(Debug, Default, Deserialize)]
struct PaypalResource {
    id: Option<String>,
    /// Refund: our refund request id, when we issued it
    custom_id: Option<String>,
    /// Refund: this refund's amount
    amount: Option<PaypalAmount>,
    /// Refund: running totals for the parent capture
    seller_payable_breakdown: Option<SellerPayableBreakdown>,
    #[serde(default)]
    links: Vec<PaypalLink>,
    #[serde(default)]
    disputed_transactions: Vec<DisputedTransaction>,
    dispute_outcome: Option<DisputeOutcomeBody>,
}

#[derive(Debug, Deserialize)]
struct PaypalAmount {
    value: Money,
}

#[derive(Debug, Deserialize)]
struct SellerPayableBreakdown {
    total_refunded_amount: Option<PaypalAmount>,
}

#[derive(Debug, Deserialize)]
struct PaypalLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct DisputedTransaction {
    seller_transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisputeOutcomeBody {
    outcome_code: Option<String>,
}

impl PaypalResource {
    /// Capture id a refund points back to via its `up` link.
    fn parent_capture_id(&self) -> Option<String> {
        self.links
            .iter()
            .find(|link| link.rel == "up" && link.href.contains("/captures/"))
            .and_then(|link| link.href.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string)
    }

    fn disputed_capture_id(&self) -> Option<String> {
        self.disputed_transactions
            .iter()
            .find_map(|tx| tx.seller_transaction_id.clone())
    }
}

/// Parse a verified PayPal webhook body.
///
/// # Errors
///
/// [`CommerceError::Validation`] when the body is not a PayPal event.
pub fn parse_paypal_event(body: &[u8]) -> Result<CanonicalEvent, CommerceError> {
    let event: PaypalEvent = serde_json::from_slice(body)
        .map_err(|e| CommerceError::validation(format!("invalid PayPal event: {e}")))?;
    let resource = event.resource;

    let (payment_reference, transition) = match event.event_type.as_str() {
        "PAYMENT.CAPTURE.COMPLETED" => (resource.id, Some(CanonicalTransition::PaymentConfirmed)),
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => {
            (resource.id, Some(CanonicalTransition::PaymentDenied))
        }
        // Fired for partial refunds too; the amounts decide how much was returned.
        "PAYMENT.CAPTURE.REFUNDED" => (
            resource.parent_capture_id(),
            Some(CanonicalTransition::PaymentRefunded {
                full: false,
                refund_reference: resource.id,
                request_reference: resource.custom_id,
                amount: resource.amount.map(|amount| amount.value),
                amount_refunded: resource
                    .seller_payable_breakdown
                    .and_then(|breakdown| breakdown.total_refunded_amount)
                    .map(|amount| amount.value),
            }),
        ),
        "CUSTOMER.DISPUTE.CREATED" => (
            resource.disputed_capture_id(),
            Some(CanonicalTransition::DisputeOpened),
        ),
        "CUSTOMER.DISPUTE.RESOLVED" => {
            let outcome = match resource
                .dispute_outcome
                .as_ref()
                .and_then(|o| o.outcome_code.as_deref())
            {
                Some(SELLER_FAVOUR) => DisputeOutcome::SellerWon,
                _ => DisputeOutcome::BuyerWon,
            };
            (
                resource.disputed_capture_id(),
                Some(CanonicalTransition::DisputeResolved(outcome)),
            )
        }
        _ => (resource.id, None),
    };

    Ok(CanonicalEvent {
        provider: PaymentProvider::Paypal,
        event_id: event.id,
        event_type: event.event_type,
        payment_reference,
        transition,
    })
}
