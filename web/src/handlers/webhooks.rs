//! Payment provider webhooks.
//!
//! The raw body is passed through untouched: signatures are computed over the
//! exact bytes the provider sent.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use commerce_core::reconciler::ReconcileOutcome;
use commerce_core::reconciler::verify::WebhookHeaders;
use commerce_core::types::PaymentProvider;
use serde::Serialize;

/// Webhook acknowledgement: `{"received": true}` plus how the event was
/// handled.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always true; any error is reported with a non-2xx status instead
    pub received: bool,
    /// Reconciler outcome, flattened next to `received`
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

/// Copy the request headers that are valid UTF-8.
#[must_use]
pub fn webhook_headers(headers: &HeaderMap) -> WebhookHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())))
        .collect()
}

async fn handle(
    state: &AppState,
    provider: PaymentProvider,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let outcome = state
        .reconciler
        .handle_webhook(provider, &webhook_headers(headers), body)
        .await
        .inspect_err(|e| {
            tracing::info!(%provider, error = %e, kind = e.kind().as_str(), "Webhook not acknowledged");
        })?;
    tracing::debug!(%provider, outcome = outcome.label(), "Webhook acknowledged");
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

/// Stripe webhook.
///
/// ```text
/// POST /api/webhooks/stripe
/// ```
///
/// # Errors
///
/// 401 for a bad signature; 404 or 409 ask Stripe to redeliver.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    handle(&state, PaymentProvider::Stripe, &headers, &body).await
}

/// PayPal webhook.
///
/// ```text
/// POST /api/webhooks/paypal
/// ```
///
/// # Errors
///
/// 401 for missing or rejected transmission headers, 502 when PayPal's
/// verification API is unreachable.
pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    handle(&state, PaymentProvider::Paypal, &headers, &body).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn acknowledgement_carries_the_outcome() {
        let ack = WebhookAck {
            received: true,
            outcome: ReconcileOutcome::Duplicate,
        };
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            serde_json::json!({"received": true, "outcome": "duplicate"})
        );
    }

    #[test]
    fn headers_are_copied_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_static("t=1,v1=ab"));
        let copied = webhook_headers(&headers);
        assert_eq!(copied.get("stripe-signature"), Some("t=1,v1=ab"));
        assert_eq!(copied.get("STRIPE-SIGNATURE"), Some("t=1,v1=ab"));
    }
}
