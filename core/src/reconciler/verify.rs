//! Webhook authenticity.
//!
//! Nothing in a webhook body is trusted until its verifier accepts it.

use crate::environment::{BoxFuture, Clock};
use crate::error::VerificationError;
use crate::types::PaymentProvider;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Stripe signature header.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// PayPal transmission headers.
pub mod paypal_headers {
    /// Transmission id
    pub const TRANSMISSION_ID: &str = "paypal-transmission-id";
    /// Transmission timestamp
    pub const TRANSMISSION_TIME: &str = "paypal-transmission-time";
    /// Signature
    pub const TRANSMISSION_SIG: &str = "paypal-transmission-sig";
    /// Signing certificate URL
    pub const CERT_URL: &str = "paypal-cert-url";
    /// Signature algorithm
    pub const AUTH_ALGO: &str = "paypal-auth-algo";
}

/// Request headers relevant to webhook verification, keyed case-insensitively.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WebhookHeaders(HashMap<String, String>);

impl WebhookHeaders {
    /// Empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a header.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn require(&self, name: &'static str) -> Result<&str, VerificationError> {
        self.get(name)
            .filter(|value| !value.is_empty())
            .ok_or(VerificationError::MissingHeader(name))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for WebhookHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// Verifies that a webhook was sent by its provider.
pub trait WebhookVerifier: Send + Sync {
    /// Provider whose webhooks this verifier accepts.
    fn provider(&self) -> PaymentProvider;

    /// Verify `body` against the signature headers.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError`] when the webhook is not authentic or
    /// cannot be verified right now.
    fn verify<'a>(
        &'a self,
        headers: &'a WebhookHeaders,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<(), VerificationError>>;
}

/// Compute Stripe's `v1` signature for a payload.
#[must_use]
pub fn stripe_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    hex::encode(stripe_mac(secret, timestamp, body))
}

fn stripe_mac(secret: &str, timestamp: i64, body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so `new_from_slice` cannot fail here.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return Vec::new();
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Parsed `Stripe-Signature` header.
#[derive(Debug, PartialEq, Eq)]
struct StripeSignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

impl StripeSignatureHeader {
    fn parse(header: &str) -> Result<Self, VerificationError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        VerificationError::MalformedHeader(format!("invalid timestamp: {value}"))
                    })?);
                }
                // Undecodable v1 entries are skipped; they can never match.
                "v1" => {
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }
        let timestamp = timestamp
            .ok_or_else(|| VerificationError::MalformedHeader("missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(VerificationError::MalformedHeader(
                "missing v1 signature".to_string(),
            ));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Stripe's `t=<unix>,v1=<hex>` HMAC-SHA256 scheme with replay tolerance.
pub struct StripeSignatureVerifier {
    secret: String,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl StripeSignatureVerifier {
    /// Default replay tolerance.
    pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

    /// Create a verifier for one endpoint secret (`whsec_...`).
    #[must_use]
    pub fn new(secret: impl Into<String>, tolerance: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
            clock,
        }
    }

    fn verify_sync(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<(), VerificationError> {
        if self.secret.is_empty() {
            return Err(VerificationError::NotConfigured("stripe"));
        }
        let header = StripeSignatureHeader::parse(headers.require(STRIPE_SIGNATURE_HEADER)?)?;

        let age = (self.clock.now().timestamp() - header.timestamp).unsigned_abs();
        if age > self.tolerance.as_secs() {
            return Err(VerificationError::TimestampOutOfTolerance);
        }

        let expected = stripe_mac(&self.secret, header.timestamp, body);
        if header
            .signatures
            .iter()
            .any(|candidate| constant_time_eq(candidate, &expected))
        {
            Ok(())
        } else {
            Err(VerificationError::SignatureMismatch)
        }
    }
}

impl WebhookVerifier for StripeSignatureVerifier {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn verify<'a>(
        &'a self,
        headers: &'a WebhookHeaders,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<(), VerificationError>> {
        Box::pin(async move { self.verify_sync(headers, body) })
    }
}

/// PayPal transmission headers, forwarded verbatim to PayPal's
/// `verify-webhook-signature` API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaypalTransmission {
    /// `PAYPAL-TRANSMISSION-ID`
    pub transmission_id: String,
    /// `PAYPAL-TRANSMISSION-TIME`
    pub transmission_time: String,
    /// `PAYPAL-TRANSMISSION-SIG`
    pub transmission_sig: String,
    /// `PAYPAL-CERT-URL`
    pub cert_url: String,
    /// `PAYPAL-AUTH-ALGO`
    pub auth_algo: String,
}

impl PaypalTransmission {
    /// Extract the transmission headers.
    ///
    /// # Errors
    ///
    /// [`VerificationError::MissingHeader`] naming the first absent header.
    pub fn from_headers(headers: &WebhookHeaders) -> Result<Self, VerificationError> {
        Ok(Self {
            transmission_id: headers.require(paypal_headers::TRANSMISSION_ID)?.to_string(),
            transmission_time: headers.require(paypal_headers::TRANSMISSION_TIME)?.to_string(),
            transmission_sig: headers.require(paypal_headers::TRANSMISSION_SIG)?.to_string(),
            cert_url: headers.require(paypal_headers::CERT_URL)?.to_string(),
            auth_algo: headers.require(paypal_headers::AUTH_ALGO)?.to_string(),
        })
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mocks::test_clock;

    const SECRET: &str = "whsec_test123secret456";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    fn verifier() -> StripeSignatureVerifier {
        StripeSignatureVerifier::new(
            SECRET,
            StripeSignatureVerifier::DEFAULT_TOLERANCE,
            Arc::new(test_clock()),
        )
    }

    fn signed(timestamp: i64, signature: &str) -> WebhookHeaders {
        WebhookHeaders::new().with(
            "Stripe-Signature",
            format!("t={timestamp},v1={signature}"),
        )
    }

    fn now() -> i64 {
        test_clock().now().timestamp()
    }

    #[tokio::test]
    async fn accepts_valid_signature() {
        let ts = now();
        let headers = signed(ts, &stripe_signature(SECRET, ts, BODY));
        verifier().verify(&headers, BODY).await.unwrap();
    }

    #[tokio::test]
    async fn accepts_when_any_v1_matches() {
        let ts = now();
        let good = stripe_signature(SECRET, ts, BODY);
        let headers = WebhookHeaders::new().with(
            STRIPE_SIGNATURE_HEADER,
            format!("t={ts},v1={},v1={good}", "ab".repeat(32)),
        );
        verifier().verify(&headers, BODY).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_tampered_body() {
        let ts = now();
        let headers = signed(ts, &stripe_signature(SECRET, ts, BODY));
        let err = verifier()
            .verify(&headers, br#"{"id":"evt_1","type":"charge.refunded"}"#)
            .await
            .unwrap_err();
        assert_eq!(err, VerificationError::SignatureMismatch);
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let ts = now();
        let headers = signed(ts, &stripe_signature("whsec_other", ts, BODY));
        assert_eq!(
            verifier().verify(&headers, BODY).await.unwrap_err(),
            VerificationError::SignatureMismatch
        );
    }

    #[tokio::test]
    async fn rejects_stale_timestamp() {
        let ts = now() - 600;
        let headers = signed(ts, &stripe_signature(SECRET, ts, BODY));
        assert_eq!(
            verifier().verify(&headers, BODY).await.unwrap_err(),
            VerificationError::TimestampOutOfTolerance
        );
    }

    #[tokio::test]
    async fn rejects_missing_or_malformed_header() {
        let v = verifier();
        assert_eq!(
            v.verify(&WebhookHeaders::new(), BODY).await.unwrap_err(),
            VerificationError::MissingHeader(STRIPE_SIGNATURE_HEADER)
        );
        let no_sig = WebhookHeaders::new().with(STRIPE_SIGNATURE_HEADER, "t=1234567890");
        assert!(matches!(
            v.verify(&no_sig, BODY).await.unwrap_err(),
            VerificationError::MalformedHeader(_)
        ));
        let no_ts = WebhookHeaders::new().with(STRIPE_SIGNATURE_HEADER, "v1=abcd");
        assert!(matches!(
            v.verify(&no_ts, BODY).await.unwrap_err(),
            VerificationError::MalformedHeader(_)
        ));
    }

    #[tokio::test]
    async fn empty_secret_is_not_configured() {
        let v = StripeSignatureVerifier::new("", Duration::from_secs(300), Arc::new(test_clock()));
        let ts = now();
        let headers = signed(ts, &stripe_signature("", ts, BODY));
        assert_eq!(
            v.verify(&headers, BODY).await.unwrap_err(),
            VerificationError::NotConfigured("stripe")
        );
    }

    #[test]
    fn paypal_headers_are_all_required() {
        let full = WebhookHeaders::new()
            .with("PAYPAL-TRANSMISSION-ID", "id")
            .with("PAYPAL-TRANSMISSION-TIME", "2025-01-01T00:00:00Z")
            .with("PAYPAL-TRANSMISSION-SIG", "sig")
            .with("PAYPAL-CERT-URL", "https://api.paypal.com/cert")
            .with("PAYPAL-AUTH-ALGO", "SHA256withRSA");
        let transmission = PaypalTransmission::from_headers(&full).unwrap();
        assert_eq!(transmission.auth_algo, "SHA256withRSA");

        let partial = WebhookHeaders::new().with("PAYPAL-TRANSMISSION-ID", "id");
        assert_eq!(
            PaypalTransmission::from_headers(&partial).unwrap_err(),
            VerificationError::MissingHeader(paypal_headers::TRANSMISSION_TIME)
        );
    }
}
