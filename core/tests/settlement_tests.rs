//! Refund requests, admin decisions and settlement.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{Harness, dollars, stripe_event};
use commerce_core::error::{CommerceError, ErrorKind};
use commerce_core::mocks::{GatewayBehavior, InMemoryStore, fixtures, test_clock};
use commerce_core::money::Money;
use commerce_core::notify::Notification;
use commerce_core::reconciler::ReconcileOutcome;
use commerce_core::settlement::{RefundDecision, RefundRequestInput, SettlementEngine};
use commerce_core::status::{OrderStatus, PaymentStatus, RefundStatus};
use commerce_core::store::StoreCreditLedger;
use commerce_core::types::{
    CreditEntry, CreditSource, CreditTransactionKind, Order, OrderNumber, PaymentDescriptor,
    RefundRequest, SettlementMethod, ledger_balance,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn decision(status: RefundStatus) -> RefundDecision {
    RefundDecision {
        status,
        admin_notes: None,
        denial_reason: None,
        approved_amount: None,
        refund_method: None,
    }
}

fn input(amount: Money, method: Option<SettlementMethod>) -> RefundRequestInput {
    RefundRequestInput {
        email: fixtures::EMAIL.into(),
        amount,
        reason: "Arrived damaged".into(),
        preferred_method: method,
    }
}

async fn requested(
    h: &Harness,
    order: &Order,
    amount: Money,
    method: SettlementMethod,
) -> RefundRequest {
    h.settlement()
        .request_refund(order.order_number.clone(), input(amount, Some(method)))
        .await
        .unwrap()
}

#[tokio::test]
async fn checkout_capture_and_partial_store_credit_refund() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 2, dollars(60), "pi_1").await;
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(h.available(product), 1);

    h.stripe_webhook(&stripe_event(
        "evt_1",
        "payment_intent.succeeded",
        json!({"id": "pi_1"}),
    ))
    .await
    .unwrap();
    let paid = h.order(order.id).await;
    assert_eq!(paid.status, OrderStatus::Confirmed);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);

    let request = requested(&h, &order, dollars(40), SettlementMethod::StoreCredit).await;
    assert_eq!(request.status, RefundStatus::Pending);

    let result = h
        .settlement()
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap();
    assert_eq!(result.refund.status, RefundStatus::Refunded);
    assert_eq!(result.refund.approved_amount, Some(dollars(40)));
    assert_eq!(result.refund.reviewed_by.as_deref(), Some("ops"));

    let order = result.order.unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyRefunded);
    assert_eq!(order.refunded_total, dollars(40));
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(h.available(product), 1);

    let credit = result.credit_transaction.unwrap();
    assert_eq!(credit.kind, CreditTransactionKind::Earn);
    assert_eq!(credit.source, CreditSource::OrderRefund);
    assert_eq!(credit.refund_request_id, Some(request.id));
    assert_eq!(credit.balance_after, dollars(40));

    let statement = h.query().credit_statement("JANE@example.com").await.unwrap();
    assert_eq!(statement.balance, dollars(40));
    assert_eq!(statement.account.unwrap().lifetime_earned, dollars(40));
    assert!(h.stripe.calls().is_empty());
    assert!(h.notifier.sent().iter().any(|n| matches!(
        n,
        Notification::RefundIssued { amount, method: SettlementMethod::StoreCredit, .. } if *amount == dollars(40)
    )));
}

#[tokio::test]
async fn refund_of_the_full_total_refunds_the_order() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 2, dollars(60), "pi_1").await;
    let request = requested(&h, &order, dollars(120), SettlementMethod::OriginalPayment).await;

    let result = h
        .settlement()
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap();

    let order = result.order.unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(order.refunded_total, dollars(120));
    assert_eq!(h.available(product), 3);

    let calls = h.stripe.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payment_reference, "pi_1");
    assert_eq!(calls[0].amount, dollars(120));
    assert_eq!(calls[0].idempotency_key, request.id.to_string());
    assert_eq!(
        result.refund.provider_refund_reference.as_deref(),
        Some("stripe_refund_1")
    );
}

#[tokio::test]
async fn successive_partial_refunds_reach_refunded() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 2, dollars(60), "pi_1").await;
    let settlement = h.settlement();

    let first = requested(&h, &order, dollars(20), SettlementMethod::OriginalPayment).await;
    let after_first = settlement
        .decide(first.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap()
        .order
        .unwrap();
    assert_eq!(after_first.status, OrderStatus::PartiallyRefunded);
    assert_eq!(after_first.payment_status, PaymentStatus::PartiallyRefunded);

    let second = requested(&h, &order, dollars(100), SettlementMethod::OriginalPayment).await;
    let after_second = settlement
        .decide(second.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap()
        .order
        .unwrap();
    assert_eq!(after_second.status, OrderStatus::Refunded);
    assert_eq!(after_second.refunded_total, dollars(120));
}

#[tokio::test]
async fn approval_then_settlement_in_two_steps() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 1, dollars(50), "pi_1").await;
    let request = requested(&h, &order, dollars(50), SettlementMethod::OriginalPayment).await;
    let settlement = h.settlement();

    let approved = settlement
        .decide(
            request.id,
            RefundDecision {
                approved_amount: Some(dollars(30)),
                refund_method: Some(SettlementMethod::StoreCredit),
                admin_notes: Some("partial goodwill".into()),
                ..decision(RefundStatus::Approved)
            },
            "ops",
        )
        .await
        .unwrap();
    assert_eq!(approved.refund.status, RefundStatus::Approved);
    assert_eq!(approved.refund.method, SettlementMethod::StoreCredit);
    assert!(approved.order.is_none());
    assert_eq!(h.order(order.id).await.status, OrderStatus::Confirmed);

    let settled = settlement
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap();
    assert_eq!(settled.order.unwrap().refunded_total, dollars(30));
    assert_eq!(settled.credit_transaction.unwrap().amount, dollars(30));
}

#[tokio::test]
async fn provider_failure_leaves_order_untouched() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 2, dollars(60), "pi_1").await;
    let request = requested(&h, &order, dollars(60), SettlementMethod::OriginalPayment).await;
    h.stripe
        .set_behavior(GatewayBehavior::Reject("card_declined".into()));

    let err = h
        .settlement()
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert!(err.kind().is_retryable());

    let unchanged = h.order(order.id).await;
    assert_eq!(unchanged.status, OrderStatus::Confirmed);
    assert_eq!(unchanged.refunded_total, Money::ZERO);
    let refund = h.settlement().refund_request(request.id).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Approved);
    assert!(refund.provider_refund_reference.is_none());

    // Admin resubmits once the provider recovers
    h.stripe.set_behavior(GatewayBehavior::Succeed);
    let settled = h
        .settlement()
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap();
    assert_eq!(settled.order.unwrap().status, OrderStatus::PartiallyRefunded);
    assert_eq!(h.stripe.calls().len(), 2);
    assert!(h.stripe.calls().iter().all(|c| c.idempotency_key == request.id.to_string()));
    assert_eq!(h.stripe.issued_count(), 1);
}

#[tokio::test]
async fn provider_timeout_is_an_upstream_failure() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 1, dollars(50), "pi_1").await;
    let request = requested(&h, &order, dollars(50), SettlementMethod::OriginalPayment).await;
    h.stripe
        .set_behavior(GatewayBehavior::Hang(Duration::from_secs(5)));

    let err = SettlementEngine::new(h.env.clone())
        .with_provider_timeout(Duration::from_millis(50))
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert_eq!(h.order(order.id).await.status, OrderStatus::Confirmed);
}

fn charge_refunded(event_id: &str, cents: i64, request_id: Option<String>) -> serde_json::Value {
    let metadata = request_id.map_or_else(|| json!({}), |id| json!({"refund_request_id": id}));
    stripe_event(
        event_id,
        "charge.refunded",
        json!({
            "id": "ch_1",
            "payment_intent": "pi_1",
            "refunded": false,
            "amount_refunded": cents,
            "refunds": {"data": [{"id": "stripe_refund_1", "amount": cents, "metadata": metadata}]}
        }),
    )
}

/// Approve a $40 provider refund on a $120 order whose refund call times out
/// after the provider has already issued it.
async fn timed_out_refund(h: &Harness) -> (Order, RefundRequest) {
    let product = h.product(3);
    let order = h.place_order(product, 2, dollars(60), "pi_1").await;
    let request = requested(h, &order, dollars(40), SettlementMethod::OriginalPayment).await;
    h.stripe
        .set_behavior(GatewayBehavior::Hang(Duration::from_secs(5)));

    let err = SettlementEngine::new(h.env.clone())
        .with_provider_timeout(Duration::from_millis(20))
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert_eq!(h.stripe.issued_count(), 1);
    let approved = h.settlement().refund_request(request.id).await.unwrap();
    assert_eq!(approved.status, RefundStatus::Approved);
    (order, approved)
}

#[tokio::test]
async fn provider_webhook_settles_a_timed_out_refund_exactly_once() {
    let h = Harness::new();
    let (order, request) = timed_out_refund(&h).await;

    let outcome = h
        .stripe_webhook(&charge_refunded("evt_r1", 4_000, Some(request.id.to_string())))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Settled {
            refund_id: request.id,
            order_id: order.id,
            status: OrderStatus::PartiallyRefunded,
        }
    );
    let settled = h.settlement().refund_request(request.id).await.unwrap();
    assert_eq!(settled.status, RefundStatus::Refunded);
    assert_eq!(
        settled.provider_refund_reference.as_deref(),
        Some("stripe_refund_1")
    );
    let refunded = h.order(order.id).await;
    assert_eq!(refunded.status, OrderStatus::PartiallyRefunded);
    assert_eq!(refunded.payment_status, PaymentStatus::PartiallyRefunded);
    assert_eq!(refunded.refunded_total, dollars(40));

    // Resubmitting the settled request changes nothing
    h.stripe.set_behavior(GatewayBehavior::Succeed);
    let err = h
        .settlement()
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.order(order.id).await.refunded_total, dollars(40));
    assert_eq!(h.stripe.issued_count(), 1);

    let redelivered = h
        .stripe_webhook(&charge_refunded("evt_r1", 4_000, Some(request.id.to_string())))
        .await
        .unwrap();
    assert_eq!(redelivered, ReconcileOutcome::Duplicate);
}

#[tokio::test]
async fn unlabelled_refund_webhook_waits_for_the_request_to_settle() {
    let h = Harness::new();
    let (order, request) = timed_out_refund(&h).await;

    let err = h
        .stripe_webhook(&charge_refunded("evt_r1", 4_000, None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.store.processed_event_count().unwrap(), 0);
    assert_eq!(h.order(order.id).await.refunded_total, Money::ZERO);

    h.stripe.set_behavior(GatewayBehavior::Succeed);
    let result = h
        .settlement()
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap();
    assert_eq!(
        result.refund.provider_refund_reference.as_deref(),
        Some("stripe_refund_1")
    );
    assert_eq!(h.stripe.issued_count(), 1);

    let redelivered = h
        .stripe_webhook(&charge_refunded("evt_r1", 4_000, None))
        .await
        .unwrap();
    assert_eq!(
        redelivered,
        ReconcileOutcome::Suppressed {
            refund_id: request.id
        }
    );
    let order = h.order(order.id).await;
    assert_eq!(order.status, OrderStatus::PartiallyRefunded);
    assert_eq!(order.refunded_total, dollars(40));
}

#[tokio::test]
async fn unrelated_provider_refund_applies_while_a_request_is_in_flight() {
    let h = Harness::new();
    let (order, _request) = timed_out_refund(&h).await;

    let outcome = h
        .stripe_webhook(&stripe_event(
            "evt_r2",
            "charge.refunded",
            json!({
                "id": "ch_1",
                "payment_intent": "pi_1",
                "refunded": false,
                "amount_refunded": 1_000,
                "refunds": {"data": [{"id": "re_dashboard", "amount": 1_000}]}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            order_id: order.id,
            status: OrderStatus::PartiallyRefunded,
        }
    );
    assert_eq!(h.order(order.id).await.refunded_total, dollars(10));
}

#[tokio::test]
async fn settlement_accepts_a_webhook_that_landed_during_the_provider_call() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 2, dollars(60), "pi_1").await;
    let request = requested(&h, &order, dollars(40), SettlementMethod::OriginalPayment).await;
    h.stripe
        .set_behavior(GatewayBehavior::Hang(Duration::from_millis(200)));

    let engine = h.settlement();
    let pending = tokio::spawn(async move {
        engine
            .decide(request.id, decision(RefundStatus::Refunded), "ops")
            .await
    });
    while h.stripe.issued_count() == 0 {
        tokio::task::yield_now().await;
    }
    let outcome = h
        .stripe_webhook(&charge_refunded("evt_r1", 4_000, Some(request.id.to_string())))
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Settled { .. }), "{outcome:?}");

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result.refund.status, RefundStatus::Refunded);
    assert_eq!(
        result.refund.provider_refund_reference.as_deref(),
        Some("stripe_refund_1")
    );
    let order = result.order.unwrap();
    assert_eq!(order.refunded_total, dollars(40));
    assert_eq!(order.status, OrderStatus::PartiallyRefunded);
    assert_eq!(h.stripe.issued_count(), 1);
}

#[tokio::test]
async fn disputed_orders_cannot_be_settled_locally() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 1, dollars(50), "pi_1").await;
    let request = requested(&h, &order, dollars(50), SettlementMethod::StoreCredit).await;

    h.stripe_webhook(&stripe_event(
        "evt_d",
        "charge.dispute.created",
        json!({"id": "dp_1", "payment_intent": "pi_1"}),
    ))
    .await
    .unwrap();

    let err = h
        .settlement()
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.order(order.id).await.status, OrderStatus::Disputed);
    let statement = h.query().credit_statement(fixtures::EMAIL).await.unwrap();
    assert_eq!(statement.balance, Money::ZERO);
}

#[tokio::test]
async fn denial_requires_a_reason_and_is_final() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 1, dollars(50), "pi_1").await;
    let request = requested(&h, &order, dollars(50), SettlementMethod::StoreCredit).await;
    let settlement = h.settlement();

    let err = settlement
        .decide(request.id, decision(RefundStatus::Denied), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let denied = settlement
        .decide(
            request.id,
            RefundDecision {
                denial_reason: Some("Outside the return window".into()),
                ..decision(RefundStatus::Denied)
            },
            "ops",
        )
        .await
        .unwrap();
    assert_eq!(denied.refund.status, RefundStatus::Denied);
    assert_eq!(
        denied.refund.denial_reason.as_deref(),
        Some("Outside the return window")
    );

    let err = settlement
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn settled_requests_are_immutable() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 1, dollars(50), "pi_1").await;
    let request = requested(&h, &order, dollars(10), SettlementMethod::StoreCredit).await;
    let settlement = h.settlement();
    settlement
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap();

    let err = settlement
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.order(order.id).await.refunded_total, dollars(10));
}

#[tokio::test]
async fn approved_amount_cannot_exceed_remaining() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 1, dollars(50), "pi_1").await;
    let request = requested(&h, &order, dollars(50), SettlementMethod::StoreCredit).await;

    for amount in [dollars(51), Money::ZERO, Money::from_cents(-100)] {
        let err = h
            .settlement()
            .decide(
                request.id,
                RefundDecision {
                    approved_amount: Some(amount),
                    ..decision(RefundStatus::Approved)
                },
                "ops",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{amount}");
    }
}

#[tokio::test]
async fn customer_requests_are_validated() {
    let h = Harness::new();
    let product = h.product(3);
    let order = h.place_order(product, 1, dollars(50), "pi_1").await;
    let settlement = h.settlement();

    let wrong_email = settlement
        .request_refund(
            order.order_number.clone(),
            RefundRequestInput {
                email: "someone@else.com".into(),
                ..input(dollars(10), None)
            },
        )
        .await
        .unwrap_err();
    assert_eq!(wrong_email.kind(), ErrorKind::NotFound);

    let unknown = settlement
        .request_refund(OrderNumber::new("ORD-NOPE"), input(dollars(10), None))
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    let too_much = settlement
        .request_refund(order.order_number.clone(), input(dollars(51), None))
        .await
        .unwrap_err();
    assert_eq!(too_much.kind(), ErrorKind::Validation);

    let blank = settlement
        .request_refund(
            order.order_number.clone(),
            RefundRequestInput {
                reason: "  ".into(),
                ..input(dollars(10), None)
            },
        )
        .await
        .unwrap_err();
    assert_eq!(blank.kind(), ErrorKind::Validation);

    let defaulted = settlement
        .request_refund(order.order_number.clone(), input(dollars(10), None))
        .await
        .unwrap();
    assert_eq!(defaulted.method, SettlementMethod::OriginalPayment);
}

#[tokio::test]
async fn cancelled_orders_admit_no_refund_request() {
    let h = Harness::new();
    let mut order = fixtures::order(dollars(50));
    order.status = OrderStatus::Cancelled;
    h.store.put_order(order.clone()).unwrap();

    let err = h
        .settlement()
        .request_refund(order.order_number.clone(), input(dollars(10), None))
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Validation(_)));
}

#[tokio::test]
async fn crypto_orders_settle_to_store_credit_only() {
    let h = Harness::new();
    let mut order = fixtures::order(dollars(80));
    order.payment = PaymentDescriptor::Crypto {
        network: "bitcoin".into(),
        transaction_hash: "abc".into(),
    };
    h.store.put_order(order.clone()).unwrap();

    let request = requested(&h, &order, dollars(80), SettlementMethod::OriginalPayment).await;
    assert_eq!(request.method, SettlementMethod::StoreCredit);

    let err = h
        .settlement()
        .decide(
            request.id,
            RefundDecision {
                refund_method: Some(SettlementMethod::OriginalPayment),
                ..decision(RefundStatus::Approved)
            },
            "ops",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let settled = h
        .settlement()
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap();
    assert_eq!(settled.order.unwrap().status, OrderStatus::Refunded);
    assert_eq!(settled.credit_transaction.unwrap().amount, dollars(80));
}

#[tokio::test]
async fn missing_gateway_is_an_upstream_failure() {
    let h = Harness::new();
    let mut order = fixtures::order(dollars(40));
    order.payment = PaymentDescriptor::Paypal {
        order_id: None,
        capture_id: "CAP-1".into(),
        environment: None,
    };
    h.store.put_order(order.clone()).unwrap();
    let env = commerce_core::CommerceEnvironment {
        gateways: commerce_core::gateway::PaymentGateways::new(),
        ..h.env.clone()
    };
    let request = requested(&h, &order, dollars(40), SettlementMethod::OriginalPayment).await;

    let err = SettlementEngine::new(env)
        .decide(request.id, decision(RefundStatus::Refunded), "ops")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert_eq!(h.order(order.id).await.status, OrderStatus::Confirmed);
}

#[derive(Clone, Debug)]
enum LedgerOp {
    Earn(i64),
    Spend(i64),
}

fn ledger_op() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        (1i64..50_000).prop_map(LedgerOp::Earn),
        (1i64..50_000).prop_map(LedgerOp::Spend),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balance_always_equals_signed_ledger_sum(ops in prop::collection::vec(ledger_op(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let store = Arc::new(InMemoryStore::new(Arc::new(test_clock())));
            let email = fixtures::EMAIL.to_string();
            for op in ops {
                let (kind, cents) = match op {
                    LedgerOp::Earn(c) => (CreditTransactionKind::Earn, c),
                    LedgerOp::Spend(c) => (CreditTransactionKind::Spend, c),
                };
                let result = store
                    .append_credit(CreditEntry {
                        email: email.clone(),
                        kind,
                        amount: Money::from_cents(cents),
                        source: match kind {
                            CreditTransactionKind::Earn => CreditSource::OrderRefund,
                            CreditTransactionKind::Spend => CreditSource::OrderPayment,
                        },
                        order_id: None,
                        refund_request_id: None,
                    })
                    .await;
                if let Err(e) = &result {
                    let insufficient =
                        matches!(e, commerce_core::StoreError::InsufficientCredit { .. });
                    prop_assert!(insufficient, "unexpected ledger error: {:?}", e);
                }

                let history = store.credit_transactions(email.clone()).await.unwrap();
                let balance = ledger_balance(&history);
                prop_assert!(!balance.is_negative());
                if let Some(account) = store.credit_account(email.clone()).await.unwrap() {
                    prop_assert_eq!(account.balance, balance);
                    prop_assert_eq!(account.balance, account.lifetime_earned - account.lifetime_used);
                }
                if let Some(last) = history.last() {
                    prop_assert_eq!(last.balance_after, balance);
                }
            }
            Ok(())
        })?;
    }
}
