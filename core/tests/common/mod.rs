//! Shared harness for the service-level tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use commerce_core::environment::CommerceEnvironment;
use commerce_core::error::CommerceError;
use commerce_core::fulfillment::Fulfillment;
use commerce_core::gateway::PaymentGateways;
use commerce_core::intake::OrderIntake;
use commerce_core::mocks::{
    FixedClock, InMemoryStore, MockPaymentGateway, RecordingNotifier, StaticVerifier, fixtures,
    test_clock,
};
use commerce_core::money::Money;
use commerce_core::query::OrderQuery;
use commerce_core::reconciler::{PaymentReconciler, ReconcileOutcome, WebhookHeaders};
use commerce_core::settlement::SettlementEngine;
use commerce_core::types::{Order, OrderId, PaymentProvider, ProductId};
use serde_json::{Value, json};
use std::sync::Arc;

pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub store: Arc<InMemoryStore>,
    pub stripe: MockPaymentGateway,
    pub paypal: MockPaymentGateway,
    pub notifier: RecordingNotifier,
    pub env: CommerceEnvironment,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(test_clock());
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let stripe = MockPaymentGateway::new(PaymentProvider::Stripe);
        let paypal = MockPaymentGateway::new(PaymentProvider::Paypal);
        let notifier = RecordingNotifier::new();
        let gateways = PaymentGateways::new()
            .with(Arc::new(stripe.clone()))
            .with(Arc::new(paypal.clone()));
        let env = CommerceEnvironment::from_store(
            store.clone(),
            clock.clone(),
            gateways,
            Arc::new(notifier.clone()),
        );
        Self {
            clock,
            store,
            stripe,
            paypal,
            notifier,
            env,
        }
    }

    pub fn intake(&self) -> OrderIntake {
        OrderIntake::new(self.env.clone())
    }

    pub fn reconciler(&self) -> PaymentReconciler {
        PaymentReconciler::new(self.env.clone())
            .with_verifier(Arc::new(StaticVerifier::accepting(PaymentProvider::Stripe)))
            .with_verifier(Arc::new(StaticVerifier::accepting(PaymentProvider::Paypal)))
    }

    pub fn settlement(&self) -> SettlementEngine {
        SettlementEngine::new(self.env.clone())
    }

    pub fn fulfillment(&self) -> Fulfillment {
        Fulfillment::new(self.env.clone())
    }

    pub fn query(&self) -> OrderQuery {
        OrderQuery::new(self.env.clone())
    }

    /// Active catalog product with `available` units.
    pub fn product(&self, available: u32) -> ProductId {
        let id = ProductId::new();
        self.store.put_product(id, "Lamp", available, true).unwrap();
        id
    }

    pub fn available(&self, product_id: ProductId) -> u32 {
        self.store.available(product_id).unwrap().unwrap()
    }

    /// Place a Stripe order for `quantity` units at `unit_price`.
    pub async fn place_order(
        &self,
        product_id: ProductId,
        quantity: u32,
        unit_price: Money,
        payment_intent: &str,
    ) -> Order {
        self.intake()
            .submit(fixtures::cart(product_id, quantity, unit_price, payment_intent))
            .await
            .unwrap()
            .order
    }

    pub async fn order(&self, id: OrderId) -> Order {
        self.env.orders.order(id).await.unwrap().unwrap()
    }

    pub async fn stripe_webhook(&self, event: &Value) -> Result<ReconcileOutcome, CommerceError> {
        self.reconciler()
            .handle_webhook(
                PaymentProvider::Stripe,
                &WebhookHeaders::new(),
                event.to_string().as_bytes(),
            )
            .await
    }
}

pub fn stripe_event(id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": id,
        "type": event_type,
        "data": {"object": object}
    })
}

pub fn dollars(amount: i64) -> Money {
    Money::from_cents(amount * 100)
}
