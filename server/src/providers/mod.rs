//! Provider API clients (reqwest).
//!
//! - [`stripe::StripeGateway`]: `POST /v1/refunds`
//! - [`paypal::PaypalGateway`]: `POST /v2/payments/captures/{id}/refund`
//! - [`paypal::PaypalWebhookVerifier`]: `POST /v1/notifications/verify-webhook-signature`
//!
//! No client retries on its own. Settlement bounds each refund with its own
//! timeout; the shared `reqwest::Client` carries the same bound for webhook
//! verification.

pub mod paypal;
pub mod stripe;

use commerce_core::error::GatewayError;
use std::time::Duration;

/// Map a transport failure to a gateway error.
pub(crate) fn transport_error(e: &reqwest::Error, timeout: Duration) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    } else {
        GatewayError::Transport(e.to_string())
    }
}
