//! Stripe refund client.

use super::transport_error;
use commerce_core::environment::BoxFuture;
use commerce_core::error::GatewayError;
use commerce_core::gateway::{PaymentGateway, RefundCall, RefundReceipt};
use commerce_core::types::PaymentProvider;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Stripe's `reason` only accepts a fixed vocabulary; the free text goes to
/// metadata instead.
const REFUND_REASON: &str = "requested_by_customer";

/// Refund request id as refund metadata. The `charge.refunded` webhook
/// carries it back so the reconciler can settle the matching request.
const REFUND_REQUEST_FIELD: &str = "metadata[refund_request_id]";

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Refunds against Stripe payment intents.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    api_key: String,
    api_base: String,
    timeout: Duration,
}

impl StripeGateway {
    /// Client for `api_base` (normally `https://api.stripe.com`).
    #[must_use]
    pub fn new(client: Client, api_key: String, api_base: &str, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn issue(&self, call: RefundCall) -> Result<RefundReceipt, GatewayError> {
        let cents = call
            .amount
            .to_cents()
            .ok_or_else(|| GatewayError::Rejected {
                status: 0,
                message: format!("amount {} out of range", call.amount),
            })?;

        let mut form = vec![
            ("payment_intent", call.payment_reference.clone()),
            ("amount", cents.to_string()),
            ("reason", REFUND_REASON.to_string()),
            (REFUND_REQUEST_FIELD, call.idempotency_key.clone()),
        ];
        if let Some(reason) = &call.reason {
            form.push(("metadata[reason]", reason.clone()));
        }

        let response = self
            .client
            .post(format!("{}/v1/refunds", self.api_base))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &call.idempotency_key)
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message.or(b.error.code))
                .unwrap_or(body);
            tracing::warn!(
                payment_intent = %call.payment_reference,
                status = status.as_u16(),
                %message,
                "Stripe refund rejected"
            );
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let refund: StripeRefund = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        tracing::info!(
            payment_intent = %call.payment_reference,
            refund = %refund.id,
            status = %refund.status,
            "Stripe refund issued"
        );
        Ok(RefundReceipt {
            provider_refund_reference: refund.id,
            status: refund.status,
        })
    }
}

impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn refund(&self, call: RefundCall) -> BoxFuture<'_, Result<RefundReceipt, GatewayError>> {
        Box::pin(self.issue(call))
    }
}
