//! Provider refund APIs.
//!
//! Production clients (reqwest) live in the server binary; settlement only
//! sees this trait and the per-provider registry.

use crate::environment::BoxFuture;
use crate::error::GatewayError;
use crate::money::Money;
use crate::types::PaymentProvider;
use std::fmt;
use std::sync::Arc;

/// A refund to issue against an original provider payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundCall {
    /// Payment intent id (Stripe) or capture id (PayPal)
    pub payment_reference: String,
    /// Amount to return
    pub amount: Money,
    /// ISO-4217 code
    pub currency: String,
    /// Stable key so a resubmitted refund is not issued twice by the provider
    pub idempotency_key: String,
    /// Free-text reason passed to the provider
    pub reason: Option<String>,
}

/// Provider acknowledgement of a refund.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundReceipt {
    /// Provider refund id (`re_...` / PayPal refund id)
    pub provider_refund_reference: String,
    /// Provider-reported status, verbatim
    pub status: String,
}

/// Refund API of one payment provider.
///
/// Implementations must not retry internally; settlement bounds every call
/// with a timeout and surfaces failures as upstream errors.
pub trait PaymentGateway: Send + Sync {
    /// Provider this gateway talks to.
    fn provider(&self) -> PaymentProvider;

    /// Issue a refund.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the provider rejects the refund or cannot
    /// be reached.
    fn refund(&self, call: RefundCall) -> BoxFuture<'_, Result<RefundReceipt, GatewayError>>;
}

/// Configured gateways, at most one per provider.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    stripe: Option<Arc<dyn PaymentGateway>>,
    paypal: Option<Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    /// Registry with no providers configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under the provider it reports.
    #[must_use]
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        match gateway.provider() {
            PaymentProvider::Stripe => self.stripe = Some(gateway),
            PaymentProvider::Paypal => self.paypal = Some(gateway),
        }
        self
    }

    /// Gateway for `provider`, if configured.
    #[must_use]
    pub fn get(&self, provider: PaymentProvider) -> Option<&Arc<dyn PaymentGateway>> {
        match provider {
            PaymentProvider::Stripe => self.stripe.as_ref(),
            PaymentProvider::Paypal => self.paypal.as_ref(),
        }
    }
}

impl fmt::Debug for PaymentGateways {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentGateways")
            .field("stripe", &self.stripe.is_some())
            .field("paypal", &self.paypal.is_some())
            .finish()
    }
}
