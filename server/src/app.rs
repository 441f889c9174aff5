//! Service wiring from configuration.

use crate::config::Config;
use crate::providers::paypal::{PaypalClient, PaypalGateway, PaypalWebhookVerifier};
use crate::providers::stripe::StripeGateway;
use commerce_core::environment::{Clock, CommerceEnvironment};
use commerce_core::gateway::PaymentGateways;
use commerce_core::intake::OrderIntake;
use commerce_core::notify::Notifier;
use commerce_core::rate_limit::{CounterStore, RateLimiter};
use commerce_core::reconciler::PaymentReconciler;
use commerce_core::reconciler::verify::StripeSignatureVerifier;
use commerce_core::settlement::SettlementEngine;
use commerce_core::store::{InventoryLedger, OrderStore, RefundStore, StoreCreditLedger};
use commerce_web::{AdminTokens, AppState};
use std::sync::Arc;
use std::time::Duration;

/// Build the HTTP state: environment, provider clients, verifiers, limits.
///
/// Providers without credentials are left out, which makes their refunds
/// fail as upstream errors and their webhooks unauthorized.
pub fn build_state<S>(
    config: &Config,
    store: Arc<S>,
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    http: &reqwest::Client,
) -> AppState
where
    S: InventoryLedger + OrderStore + RefundStore + StoreCreditLedger + 'static,
{
    let timeout = config.provider_timeout();
    let mut gateways = PaymentGateways::new();
    let mut verifiers: Vec<Arc<dyn commerce_core::reconciler::WebhookVerifier>> = Vec::new();

    if let Some(stripe) = &config.stripe {
        if let Some(api_key) = &stripe.api_key {
            gateways = gateways.with(Arc::new(StripeGateway::new(
                http.clone(),
                api_key.clone(),
                &stripe.api_base,
                timeout,
            )));
        }
        if let Some(secret) = &stripe.webhook_secret {
            verifiers.push(Arc::new(StripeSignatureVerifier::new(
                secret.clone(),
                Duration::from_secs(stripe.webhook_tolerance_secs),
                clock.clone(),
            )));
        }
    }

    if let Some(paypal) = &config.paypal {
        let client = Arc::new(PaypalClient::new(
            http.clone(),
            paypal.client_id.clone(),
            paypal.client_secret.clone(),
            &paypal.api_base,
            timeout,
        ));
        gateways = gateways.with(Arc::new(PaypalGateway::new(client.clone())));
        if let Some(webhook_id) = &paypal.webhook_id {
            verifiers.push(Arc::new(PaypalWebhookVerifier::new(client, webhook_id.clone())));
        }
    }

    tracing::info!(?gateways, verifiers = verifiers.len(), "Payment providers configured");

    let env = CommerceEnvironment::from_store(store, clock.clone(), gateways, notifier);

    let limiter = RateLimiter::new(
        counters,
        clock,
        config.checkout.rate_limit,
        Duration::from_secs(config.checkout.rate_window_secs),
    );
    let intake = OrderIntake::new(env.clone())
        .with_rate_limiter(limiter)
        .with_mode_override(config.order_mode);
    let reconciler = verifiers
        .into_iter()
        .fold(PaymentReconciler::new(env.clone()), PaymentReconciler::with_verifier);
    let settlement = SettlementEngine::new(env.clone()).with_provider_timeout(timeout);

    let admin_tokens = AdminTokens::parse(&config.admin_api_tokens);
    if admin_tokens.is_empty() {
        tracing::warn!("ADMIN_API_TOKENS is empty; admin routes will refuse every request");
    }

    AppState::new(env)
        .with_intake(intake)
        .with_reconciler(reconciler)
        .with_settlement(settlement)
        .with_admin_tokens(admin_tokens)
}
