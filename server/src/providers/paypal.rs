//! PayPal REST client: OAuth token, capture refunds, webhook verification.

use super::transport_error;
use commerce_core::environment::BoxFuture;
use commerce_core::error::{GatewayError, VerificationError};
use commerce_core::gateway::{PaymentGateway, RefundCall, RefundReceipt};
use commerce_core::reconciler::verify::{PaypalTransmission, WebhookHeaders, WebhookVerifier};
use commerce_core::types::PaymentProvider;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, Serialize)]
struct RefundAmount<'a> {
    value: String,
    currency_code: &'a str,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    amount: RefundAmount<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note_to_payer: Option<&'a str>,
    /// Refund request id; PayPal echoes it on the refund webhook
    custom_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct VerifyBody<'a> {
    auth_algo: &'a str,
    cert_url: &'a str,
    transmission_id: &'a str,
    transmission_sig: &'a str,
    transmission_time: &'a str,
    webhook_id: &'a str,
    webhook_event: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

/// Authenticated PayPal REST client shared by the gateway and the verifier.
pub struct PaypalClient {
    client: Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    timeout: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalClient {
    /// Client for `api_base` (sandbox or live).
    #[must_use]
    pub fn new(
        client: Client,
        client_id: String,
        client_secret: String,
        api_base: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            api_base: api_base.trim_end_matches('/').to_string(),
            timeout,
            token: Mutex::new(None),
        }
    }

    /// A valid access token, fetched with client credentials when the cached
    /// one is missing or close to expiry.
    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "PayPal token request failed");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn refund(&self, call: RefundCall) -> Result<RefundReceipt, GatewayError> {
        let token = self.access_token().await?;
        let body = RefundBody {
            amount: RefundAmount {
                value: call.amount.to_string(),
                currency_code: &call.currency,
            },
            note_to_payer: call.reason.as_deref(),
            custom_id: &call.idempotency_key,
        };

        let response = self
            .client
            .post(format!(
                "{}/v2/payments/captures/{}/refund",
                self.api_base, call.payment_reference
            ))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", &call.idempotency_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(
                capture_id = %call.payment_reference,
                status = status.as_u16(),
                %message,
                "PayPal refund rejected"
            );
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let refund: RefundResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        tracing::info!(
            capture_id = %call.payment_reference,
            refund = %refund.id,
            status = %refund.status,
            "PayPal refund issued"
        );
        Ok(RefundReceipt {
            provider_refund_reference: refund.id,
            status: refund.status,
        })
    }

    async fn verify_signature(
        &self,
        webhook_id: &str,
        transmission: &PaypalTransmission,
        body: &[u8],
    ) -> Result<(), VerificationError> {
        let webhook_event: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| VerificationError::MalformedHeader(format!("webhook body is not JSON: {e}")))?;
        let token = self
            .access_token()
            .await
            .map_err(|e| VerificationError::Unavailable(e.to_string()))?;

        let response = self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.api_base
            ))
            .bearer_auth(&token)
            .json(&VerifyBody {
                auth_algo: &transmission.auth_algo,
                cert_url: &transmission.cert_url,
                transmission_id: &transmission.transmission_id,
                transmission_sig: &transmission.transmission_sig,
                transmission_time: &transmission.transmission_time,
                webhook_id,
                webhook_event,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| VerificationError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::Unavailable(format!(
                "verify-webhook-signature answered {status}"
            )));
        }
        let verdict: VerifyResponse = response
            .json()
            .await
            .map_err(|e| VerificationError::Unavailable(e.to_string()))?;
        if verdict.verification_status == "SUCCESS" {
            Ok(())
        } else {
            tracing::warn!(
                transmission_id = %transmission.transmission_id,
                verification_status = %verdict.verification_status,
                "PayPal webhook signature rejected"
            );
            Err(VerificationError::SignatureMismatch)
        }
    }
}

/// Refunds against PayPal captures.
#[derive(Clone)]
pub struct PaypalGateway {
    client: Arc<PaypalClient>,
}

impl PaypalGateway {
    /// Gateway over a shared client.
    #[must_use]
    pub const fn new(client: Arc<PaypalClient>) -> Self {
        Self { client }
    }
}

impl PaymentGateway for PaypalGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paypal
    }

    fn refund(&self, call: RefundCall) -> BoxFuture<'_, Result<RefundReceipt, GatewayError>> {
        Box::pin(self.client.refund(call))
    }
}

/// Verifies PayPal webhooks through PayPal's own verification API.
///
/// Missing transmission headers are refused without a network call. An
/// unreachable API is [`VerificationError::Unavailable`], so the webhook is
/// answered with a retryable status and PayPal redelivers it.
#[derive(Clone)]
pub struct PaypalWebhookVerifier {
    client: Arc<PaypalClient>,
    webhook_id: String,
}

impl PaypalWebhookVerifier {
    /// Verifier for the webhook registered as `webhook_id`.
    #[must_use]
    pub const fn new(client: Arc<PaypalClient>, webhook_id: String) -> Self {
        Self { client, webhook_id }
    }
}

impl WebhookVerifier for PaypalWebhookVerifier {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paypal
    }

    fn verify<'a>(
        &'a self,
        headers: &'a WebhookHeaders,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<(), VerificationError>> {
        Box::pin(async move {
            let transmission = PaypalTransmission::from_headers(headers)?;
            self.client
                .verify_signature(&self.webhook_id, &transmission, body)
                .await
        })
    }
}
