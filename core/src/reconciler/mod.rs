//! Payment event reconciler.
//!
//! Turns provider webhooks into exactly-once order transitions:
//!
//! 1. verify authenticity (nothing in the body is trusted before this)
//! 2. parse into a [`CanonicalEvent`]
//! 3. skip events whose (provider, event id) is already recorded
//! 4. resolve the order by the provider correlation key
//! 5. plan the transition against the state machine
//! 6. commit status, payment status, restock and dedup record as one unit
//!
//! The dedup record is written inside the same unit as the effects, so a
//! concurrent duplicate delivery loses at the unique constraint and is
//! reported as [`ReconcileOutcome::Duplicate`].
//!
//! A refund event that belongs to an approved refund request settles that
//! request instead of moving the order on its own. Provider refunds carry
//! the request id; when one arrives without it while a request of the same
//! amount is still in flight, the event is answered with a conflict so the
//! provider redelivers it once the request has settled.

pub mod canonical;
pub mod paypal;
pub mod stripe;
pub mod verify;

pub use canonical::{
    CanonicalEvent, CanonicalTransition, DisputeOutcome, PlannedEffect, TransitionPlan,
    plan_transition,
};
pub use verify::{
    PaypalTransmission, StripeSignatureVerifier, WebhookHeaders, WebhookVerifier,
    stripe_signature,
};

use crate::environment::CommerceEnvironment;
use crate::error::{CommerceError, StoreError};
use crate::money::Money;
use crate::notify::{Notification, dispatch};
use crate::settlement::settlement_transition;
use crate::status::{OrderStatus, RefundStatus};
use crate::store::{
    EventKey, OrderTransition, ProcessedEvent, RefundSettlement, RefundedTotalUpdate,
};
use crate::types::{
    Order, OrderId, PaymentProvider, RefundRequest, RefundRequestId, SettlementMethod,
};
use serde::Serialize;
use std::sync::Arc;

/// How a webhook was handled. Every variant is acknowledged with 2xx.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Order status changed
    Applied {
        /// Order
        order_id: OrderId,
        /// New status
        status: OrderStatus,
    },
    /// Only the payment record changed
    PaymentRecorded {
        /// Order
        order_id: OrderId,
    },
    /// Event already processed
    Duplicate,
    /// Unknown event type, or the order already reflects it
    Ignored,
    /// Provider echo of a refund this system issued
    Suppressed {
        /// Settled refund request
        refund_id: RefundRequestId,
    },
    /// The provider confirmed an approved refund request before it was
    /// settled locally; the request is now `refunded`
    Settled {
        /// Refund request that was settled
        refund_id: RefundRequestId,
        /// Order it refunded
        order_id: OrderId,
        /// Order status after the refund
        status: OrderStatus,
    },
    /// State machine refused the transition; recorded for investigation
    Rejected {
        /// Order
        order_id: OrderId,
        /// Why
        reason: String,
    },
}

impl ReconcileOutcome {
    /// Label stored on the dedup record.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::PaymentRecorded { .. } => "payment_recorded",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::Suppressed { .. } => "suppressed",
            Self::Settled { .. } => "settled",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Webhook-driven event-to-transition processor.
#[derive(Clone)]
pub struct PaymentReconciler {
    env: CommerceEnvironment,
    stripe: Option<Arc<dyn WebhookVerifier>>,
    paypal: Option<Arc<dyn WebhookVerifier>>,
}

impl PaymentReconciler {
    /// Reconciler with no verifiers; every webhook is rejected until one is added.
    #[must_use]
    pub fn new(env: CommerceEnvironment) -> Self {
        Self {
            env,
            stripe: None,
            paypal: None,
        }
    }

    /// Register a verifier under the provider it reports.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn WebhookVerifier>) -> Self {
        match verifier.provider() {
            PaymentProvider::Stripe => self.stripe = Some(verifier),
            PaymentProvider::Paypal => self.paypal = Some(verifier),
        }
        self
    }

    /// Handle one webhook delivery.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when verification fails or no verifier is configured
    /// - `UpstreamFailure` when the provider's verification API is unreachable
    /// - `Validation` when a verified body is not a provider event
    /// - `NotFound` when no order carries the event's payment reference
    /// - `Conflict` when the order changed while the event was being applied,
    ///   or when a refund event may belong to an approved request that has not
    ///   settled yet; the provider's redelivery re-evaluates it against fresh
    ///   state
    /// - `Internal` on storage failure
    pub async fn handle_webhook(
        &self,
        provider: PaymentProvider,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<ReconcileOutcome, CommerceError> {
        let verifier = match provider {
            PaymentProvider::Stripe => self.stripe.as_ref(),
            PaymentProvider::Paypal => self.paypal.as_ref(),
        }
        .ok_or_else(|| {
            CommerceError::Unauthorized(format!("{provider} webhooks are not configured"))
        })?;

        if let Err(e) = verifier.verify(headers, body).await {
            tracing::warn!(%provider, error = %e, "Webhook verification failed");
            metrics::counter!("webhooks.unverified", "provider" => provider.as_str()).increment(1);
            return Err(e.into());
        }

        let event = match provider {
            PaymentProvider::Stripe => stripe::parse_stripe_event(body)?,
            PaymentProvider::Paypal => paypal::parse_paypal_event(body)?,
        };
        metrics::counter!("webhooks.received", "provider" => provider.as_str()).increment(1);

        self.reconcile(event).await
    }

    /// Apply an already verified and parsed event.
    ///
    /// # Errors
    ///
    /// See [`PaymentReconciler::handle_webhook`].
    #[tracing::instrument(
        skip(self, event),
        fields(provider = %event.provider, event_id = %event.event_id, event_type = %event.event_type)
    )]
    pub async fn reconcile(&self, event: CanonicalEvent) -> Result<ReconcileOutcome, CommerceError> {
        let key = EventKey {
            provider: event.provider,
            event_id: event.event_id.clone(),
        };
        if self.env.orders.is_event_processed(key).await? {
            tracing::info!("Duplicate webhook delivery acknowledged");
            metrics::counter!("webhooks.duplicate").increment(1);
            return Ok(ReconcileOutcome::Duplicate);
        }

        let Some(transition) = event.transition.clone() else {
            tracing::debug!("Unmapped event type ignored");
            metrics::counter!("webhooks.ignored").increment(1);
            return self.record(&event, None, ReconcileOutcome::Ignored).await;
        };

        if let CanonicalTransition::PaymentRefunded {
            refund_reference: Some(reference),
            ..
        } = &transition
        {
            if let Some(refund) = self
                .env
                .refunds
                .refund_by_provider_reference(reference.clone())
                .await?
            {
                tracing::info!(refund_id = %refund.id, "Refund echo of a settled request suppressed");
                return self
                    .record(
                        &event,
                        Some(refund.order_id),
                        ReconcileOutcome::Suppressed {
                            refund_id: refund.id,
                        },
                    )
                    .await;
            }
        }

        let Some(reference) = event.payment_reference.clone() else {
            tracing::warn!("Event carries no payment reference; ignored");
            metrics::counter!("webhooks.ignored").increment(1);
            return self.record(&event, None, ReconcileOutcome::Ignored).await;
        };

        let order = self
            .env
            .orders
            .order_by_payment_reference(event.provider, reference.clone())
            .await?
            .ok_or_else(|| {
                tracing::warn!(payment_reference = %reference, "No order for payment reference");
                CommerceError::not_found("order", &reference)
            })?;

        if let Some(outcome) = self.requested_refund(&event, &transition, &order).await? {
            return Ok(outcome);
        }

        let plan = match plan_transition(&transition, &order) {
            Ok(PlannedEffect::Apply(plan)) => plan,
            Ok(PlannedEffect::Nothing(why)) => {
                tracing::info!(order_id = %order.id, status = %order.status, why, "Event requires no change");
                metrics::counter!("webhooks.ignored").increment(1);
                return self
                    .record(&event, Some(order.id), ReconcileOutcome::Ignored)
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    transition = transition.name(),
                    error = %e,
                    "Provider event rejected by order state machine"
                );
                metrics::counter!("webhooks.rejected_transition").increment(1);
                let outcome = ReconcileOutcome::Rejected {
                    order_id: order.id,
                    reason: e.to_string(),
                };
                return self.record(&event, Some(order.id), outcome).await;
            }
        };

        self.commit(&event, &transition, &order, plan).await
    }

    async fn commit(
        &self,
        event: &CanonicalEvent,
        transition: &CanonicalTransition,
        order: &Order,
        plan: TransitionPlan,
    ) -> Result<ReconcileOutcome, CommerceError> {
        let outcome = if plan.is_payment_only(order) {
            ReconcileOutcome::PaymentRecorded { order_id: order.id }
        } else {
            ReconcileOutcome::Applied {
                order_id: order.id,
                status: plan.new_status,
            }
        };
        let now = self.env.clock.now();

        let order_transition = OrderTransition {
            payment_status: plan.payment_status,
            restock: plan.restock,
            refunded_total: plan.refunded_total.map(|new| RefundedTotalUpdate {
                expected: order.refunded_total,
                new,
            }),
            event: Some(self.processed(event, Some(order.id), &outcome)),
            ..OrderTransition::new(order.id, order.status, plan.new_status, now)
        };

        match self.env.orders.apply_transition(order_transition).await {
            Ok(updated) => {
                tracing::info!(
                    order_id = %updated.id,
                    order_number = %updated.order_number,
                    from = %order.status,
                    to = %updated.status,
                    payment_status = %updated.payment_status,
                    transition = transition.name(),
                    "Payment event applied"
                );
                if matches!(transition, CanonicalTransition::PaymentDenied) {
                    dispatch(
                        &self.env.notifier,
                        Notification::PaymentFailed {
                            order_id: updated.id,
                            order_number: updated.order_number.clone(),
                            email: updated.customer.email.clone(),
                        },
                    );
                }
                Ok(outcome)
            }
            Err(StoreError::DuplicateEvent { .. }) => {
                tracing::info!("Concurrent duplicate delivery lost the dedup race");
                metrics::counter!("webhooks.duplicate").increment(1);
                Ok(ReconcileOutcome::Duplicate)
            }
            Err(e @ (StoreError::StatusConflict { .. } | StoreError::RefundedTotalConflict(_))) => {
                tracing::warn!(order_id = %order.id, error = %e, "Order changed while applying event");
                Err(e.into())
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    error = %e,
                    "Failed to apply payment event"
                );
                Err(e.into())
            }
        }
    }

    /// Resolve a refund event against the order's refund requests. `None`
    /// means the event is an out-of-band refund and takes the normal plan.
    async fn requested_refund(
        &self,
        event: &CanonicalEvent,
        transition: &CanonicalTransition,
        order: &Order,
    ) -> Result<Option<ReconcileOutcome>, CommerceError> {
        let CanonicalTransition::PaymentRefunded {
            refund_reference,
            request_reference,
            amount,
            amount_refunded,
            ..
        } = transition
        else {
            return Ok(None);
        };
        let requests = self.env.refunds.refund_requests_for_order(order.id).await?;

        if let Some(request) = request_reference
            .as_deref()
            .and_then(|id| requests.iter().find(|r| r.id.to_string() == id))
        {
            match request.status {
                RefundStatus::Refunded => {
                    tracing::info!(refund_id = %request.id, "Refund echo of a settled request suppressed");
                    let outcome = ReconcileOutcome::Suppressed {
                        refund_id: request.id,
                    };
                    return self.record(event, Some(order.id), outcome).await.map(Some);
                }
                RefundStatus::Approved if request.method == SettlementMethod::OriginalPayment => {
                    return self
                        .settle_requested(event, order, request, refund_reference.clone())
                        .await;
                }
                _ => {}
            }
        }

        let in_flight: Vec<&RefundRequest> = requests
            .iter()
            .filter(|r| {
                r.status == RefundStatus::Approved && r.method == SettlementMethod::OriginalPayment
            })
            .collect();
        if in_flight.is_empty() {
            return Ok(None);
        }
        let refunded: Option<Money> =
            (*amount).or_else(|| amount_refunded.map(|total| total - order.refunded_total));
        let matches_request = |request: &&RefundRequest| {
            refunded.is_none_or(|value| request.settlement_amount() == value)
        };
        if let Some(request) = in_flight.into_iter().find(matches_request) {
            tracing::warn!(
                order_id = %order.id,
                refund_id = %request.id,
                "Refund event may belong to an unsettled request; awaiting redelivery"
            );
            metrics::counter!("webhooks.deferred").increment(1);
            return Err(CommerceError::Conflict(format!(
                "refund request {} for order {} has not settled yet",
                request.id, order.order_number
            )));
        }
        Ok(None)
    }

    /// Settle an approved request from the provider's confirmation, with the
    /// dedup record in the same unit.
    async fn settle_requested(
        &self,
        event: &CanonicalEvent,
        order: &Order,
        request: &RefundRequest,
        refund_reference: Option<String>,
    ) -> Result<Option<ReconcileOutcome>, CommerceError> {
        let mut order_transition =
            match settlement_transition(request, order, self.env.clock.now()) {
                Ok(order_transition) => order_transition,
                Err(e) => {
                    tracing::warn!(
                        refund_id = %request.id,
                        order_id = %order.id,
                        error = %e,
                        "Refund request cannot settle against the order; applying the event alone"
                    );
                    return Ok(None);
                }
            };
        let outcome = ReconcileOutcome::Settled {
            refund_id: request.id,
            order_id: order.id,
            status: order_transition.new_status,
        };
        order_transition.event = Some(self.processed(event, Some(order.id), &outcome));

        let settlement = RefundSettlement {
            refund_id: request.id,
            provider_refund_reference: refund_reference,
            order: order_transition,
            credit: None,
        };
        let settled = match self.env.refunds.settle_refund(settlement).await {
            Ok(settled) => settled,
            Err(StoreError::DuplicateEvent { .. }) => {
                metrics::counter!("webhooks.duplicate").increment(1);
                return Ok(Some(ReconcileOutcome::Duplicate));
            }
            Err(e) => {
                tracing::warn!(refund_id = %request.id, error = %e, "Refund request changed while settling from webhook");
                return Err(e.into());
            }
        };

        let amount = request.settlement_amount();
        metrics::counter!("refunds.settled", "method" => request.method.as_str()).increment(1);
        tracing::info!(
            refund_id = %settled.refund.id,
            order_id = %settled.order.id,
            order_number = %settled.order.order_number,
            %amount,
            status = %settled.order.status,
            "Refund settled from provider webhook"
        );
        dispatch(
            &self.env.notifier,
            Notification::RefundIssued {
                order_id: settled.order.id,
                order_number: settled.order.order_number.clone(),
                email: settled.order.customer.email.clone(),
                amount,
                method: request.method,
            },
        );
        Ok(Some(outcome))
    }

    /// Record an event that carries no order mutation.
    async fn record(
        &self,
        event: &CanonicalEvent,
        order_id: Option<OrderId>,
        outcome: ReconcileOutcome,
    ) -> Result<ReconcileOutcome, CommerceError> {
        let processed = self.processed(event, order_id, &outcome);
        if self.env.orders.record_event(processed).await? {
            Ok(outcome)
        } else {
            metrics::counter!("webhooks.duplicate").increment(1);
            Ok(ReconcileOutcome::Duplicate)
        }
    }

    fn processed(
        &self,
        event: &CanonicalEvent,
        order_id: Option<OrderId>,
        outcome: &ReconcileOutcome,
    ) -> ProcessedEvent {
        ProcessedEvent {
            provider: event.provider,
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            order_id,
            outcome: outcome.label().to_string(),
            processed_at: self.env.clock.now(),
        }
    }
}
