//! Refund and settlement engine.
//!
//! `pending -> approved|denied` only records a decision. `approved -> refunded`
//! is the consequential step and takes one of two settlement paths, chosen by
//! an exhaustive match on [`SettlementMethod`]:
//!
//! - `original_payment`: the order's provider refunds the approved amount;
//!   nothing local changes unless the provider confirms
//! - `store_credit`: a ledger `earn` entry is appended in the same unit as the
//!   order and request updates
//!
//! Order status is written with a compare-and-set, so a dispute arriving
//! mid-settlement makes the commit fail with a conflict instead of being
//! overwritten.

use crate::environment::CommerceEnvironment;
use crate::error::{CommerceError, GatewayError};
use crate::gateway::RefundCall;
use crate::money::Money;
use crate::notify::{Notification, dispatch};
use crate::status::{OrderStatus, PaymentStatus, RefundStatus};
use crate::store::{OrderTransition, RecordedDecision, RefundSettlement, RefundedTotalUpdate};
use crate::types::{
    CreditEntry, CreditSource, CreditTransactionKind, Order, OrderNumber, PaymentDescriptor,
    RefundRequest, RefundRequestId, SettlementMethod, StoreCreditTransaction, normalize_email,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on a provider refund call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Customer-submitted refund request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequestInput {
    /// Must match the order's email, compared after normalisation.
    pub email: String,
    /// Amount the customer asks for. It must be positive and no more than
    /// what remains unrefunded on the order.
    pub amount: Money,
    /// Free-text reason shown to the reviewer.
    pub reason: String,
    /// Preferred settlement path
    #[serde(default)]
    pub preferred_method: Option<SettlementMethod>,
}

/// Admin decision payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundDecision {
    /// Target status: `approved`, `denied` or `refunded`
    pub status: RefundStatus,
    /// Internal notes
    #[serde(default)]
    pub admin_notes: Option<String>,
    /// Customer-facing reason (required for denials)
    #[serde(default)]
    pub denial_reason: Option<String>,
    /// Amount to approve; defaults to the requested amount
    #[serde(default)]
    pub approved_amount: Option<Money>,
    /// Override the settlement path
    #[serde(default)]
    pub refund_method: Option<SettlementMethod>,
}

/// Result of an admin decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionResult {
    /// Request after the decision
    pub refund: RefundRequest,
    /// Order after settlement (only when the decision settled)
    pub order: Option<Order>,
    /// Ledger entry (store-credit settlements)
    pub credit_transaction: Option<StoreCreditTransaction>,
}

/// Refund and settlement service.
#[derive(Clone)]
pub struct SettlementEngine {
    env: CommerceEnvironment,
    provider_timeout: Duration,
}

impl SettlementEngine {
    /// Engine with the default provider timeout.
    #[must_use]
    pub const fn new(env: CommerceEnvironment) -> Self {
        Self {
            env,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Override the provider call bound.
    #[must_use]
    pub const fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Open a `pending` refund request on behalf of the customer.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the order does not exist or the email does not own it
    /// - `Validation` for an empty reason, a non-positive amount, an amount
    ///   above what remains refundable, or an order status that admits no refund
    pub async fn request_refund(
        &self,
        order_number: OrderNumber,
        input: RefundRequestInput,
    ) -> Result<RefundRequest, CommerceError> {
        let order = self
            .env
            .orders
            .order_by_number(order_number.clone())
            .await?
            .filter(|order| order.belongs_to(&input.email))
            .ok_or_else(|| CommerceError::not_found("order", &order_number))?;

        let reason = input.reason.trim();
        if reason.is_empty() {
            return Err(CommerceError::validation("reason is required"));
        }
        if !order.status.admits_refund() {
            return Err(CommerceError::validation(format!(
                "orders in status {} cannot be refunded",
                order.status
            )));
        }
        validate_amount(input.amount, &order)?;

        let method = match (&order.payment, input.preferred_method) {
            (PaymentDescriptor::Crypto { .. }, _) => SettlementMethod::StoreCredit,
            (_, Some(method)) => method,
            (_, None) => SettlementMethod::OriginalPayment,
        };

        let request = RefundRequest {
            id: RefundRequestId::new(),
            order_id: order.id,
            requested_amount: input.amount,
            approved_amount: None,
            reason: reason.to_string(),
            method,
            status: RefundStatus::Pending,
            reviewed_by: None,
            admin_notes: None,
            denial_reason: None,
            provider_refund_reference: None,
            created_at: self.env.clock.now(),
            reviewed_at: None,
            refunded_at: None,
        };
        let request = self.env.refunds.insert_refund_request(request).await?;
        tracing::info!(
            refund_id = %request.id,
            order_id = %order.id,
            order_number = %order.order_number,
            amount = %request.requested_amount,
            method = request.method.as_str(),
            "Refund requested"
        );
        Ok(request)
    }

    /// Load a refund request.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids; `Internal` on storage failure.
    pub async fn refund_request(&self, id: RefundRequestId) -> Result<RefundRequest, CommerceError> {
        self.env
            .refunds
            .refund_request(id)
            .await?
            .ok_or_else(|| CommerceError::not_found("refund_request", id))
    }

    /// Apply an admin decision.
    ///
    /// A `refunded` decision on a `pending` request approves it first, then
    /// settles.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown request or order
    /// - `Validation` for bad input (missing denial reason, amount out of
    ///   range, provider refund of a crypto order, `pending` as a target)
    /// - `Conflict` when the request is already decided or settled, the order
    ///   is disputed, or the order changed concurrently
    /// - `UpstreamFailure` when the provider refund failed or timed out; the
    ///   request stays `approved` and the order is untouched
    /// - `Internal` on storage failure
    #[tracing::instrument(skip_all, fields(refund_id = %refund_id, target = %decision.status, reviewer = %reviewer))]
    pub async fn decide(
        &self,
        refund_id: RefundRequestId,
        decision: RefundDecision,
        reviewer: &str,
    ) -> Result<DecisionResult, CommerceError> {
        let refund = self.refund_request(refund_id).await?;
        if refund.status.is_terminal() {
            return Err(CommerceError::Conflict(format!(
                "refund request {refund_id} is already {}",
                refund.status
            )));
        }
        let order = self.load_order(&refund).await?;

        match decision.status {
            RefundStatus::Pending => Err(CommerceError::validation(
                "a refund request cannot be moved back to pending",
            )),
            RefundStatus::Denied => {
                let refund = self.deny(&refund, decision, reviewer).await?;
                Ok(DecisionResult {
                    refund,
                    order: None,
                    credit_transaction: None,
                })
            }
            RefundStatus::Approved => {
                let refund = self.approve(&refund, &order, decision, reviewer).await?;
                Ok(DecisionResult {
                    refund,
                    order: None,
                    credit_transaction: None,
                })
            }
            RefundStatus::Refunded => {
                let refund = if refund.status == RefundStatus::Pending {
                    self.approve(&refund, &order, decision, reviewer).await?
                } else {
                    if decision
                        .refund_method
                        .is_some_and(|method| method != refund.method)
                    {
                        return Err(CommerceError::validation(
                            "refund method is fixed once the request is approved",
                        ));
                    }
                    refund
                };
                self.settle(refund, order).await
            }
        }
    }

    async fn load_order(&self, refund: &RefundRequest) -> Result<Order, CommerceError> {
        self.env
            .orders
            .order(refund.order_id)
            .await?
            .ok_or_else(|| CommerceError::not_found("order", refund.order_id))
    }

    async fn deny(
        &self,
        refund: &RefundRequest,
        decision: RefundDecision,
        reviewer: &str,
    ) -> Result<RefundRequest, CommerceError> {
        if refund.status != RefundStatus::Pending {
            return Err(CommerceError::Conflict(format!(
                "only pending requests can be denied (request is {})",
                refund.status
            )));
        }
        let denial_reason = decision
            .denial_reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| CommerceError::validation("denialReason is required when denying"))?;

        let denied = self
            .env
            .refunds
            .record_decision(RecordedDecision {
                refund_id: refund.id,
                status: RefundStatus::Denied,
                approved_amount: None,
                method: refund.method,
                reviewed_by: reviewer.to_string(),
                admin_notes: decision.admin_notes,
                denial_reason: Some(denial_reason),
                at: self.env.clock.now(),
            })
            .await?;
        tracing::info!(refund_id = %denied.id, reviewer, "Refund request denied");
        Ok(denied)
    }

    async fn approve(
        &self,
        refund: &RefundRequest,
        order: &Order,
        decision: RefundDecision,
        reviewer: &str,
    ) -> Result<RefundRequest, CommerceError> {
        if refund.status != RefundStatus::Pending {
            return Err(CommerceError::Conflict(format!(
                "only pending requests can be approved (request is {})",
                refund.status
            )));
        }
        let amount = decision.approved_amount.unwrap_or(refund.requested_amount);
        validate_amount(amount, order)?;
        let method = decision.refund_method.unwrap_or(refund.method);
        if method == SettlementMethod::OriginalPayment && order.provider().is_none() {
            return Err(CommerceError::validation(
                "orders without a payment provider can only be refunded to store credit",
            ));
        }

        let approved = self
            .env
            .refunds
            .record_decision(RecordedDecision {
                refund_id: refund.id,
                status: RefundStatus::Approved,
                approved_amount: Some(amount),
                method,
                reviewed_by: reviewer.to_string(),
                admin_notes: decision.admin_notes,
                denial_reason: None,
                at: self.env.clock.now(),
            })
            .await?;
        tracing::info!(
            refund_id = %approved.id,
            order_id = %order.id,
            reviewer,
            %amount,
            method = method.as_str(),
            "Refund request approved"
        );
        Ok(approved)
    }

    /// Settle an approved request.
    async fn settle(
        &self,
        refund: RefundRequest,
        order: Order,
    ) -> Result<DecisionResult, CommerceError> {
        let amount = refund.settlement_amount();
        let transition = settlement_transition(&refund, &order, self.env.clock.now())?;

        let (provider_refund_reference, credit) = match refund.method {
            SettlementMethod::OriginalPayment => {
                let reference = self.refund_original_payment(&refund, &order, amount).await?;
                (Some(reference), None)
            }
            SettlementMethod::StoreCredit => (
                None,
                Some(CreditEntry {
                    email: normalize_email(&order.customer.email),
                    kind: CreditTransactionKind::Earn,
                    amount,
                    source: CreditSource::OrderRefund,
                    order_id: Some(order.id),
                    refund_request_id: Some(refund.id),
                }),
            ),
        };

        let outcome = self
            .env
            .refunds
            .settle_refund(RefundSettlement {
                refund_id: refund.id,
                provider_refund_reference: provider_refund_reference.clone(),
                order: transition,
                credit,
            })
            .await;
        let settled = match outcome {
            Ok(settled) => settled,
            Err(e) => {
                let Some(reference) = provider_refund_reference else {
                    tracing::error!(
                        refund_id = %refund.id,
                        order_id = %order.id,
                        error = %e,
                        "Refund settlement failed"
                    );
                    return Err(e.into());
                };
                if let Some(done) = self.settled_from_webhook(refund.id, &reference).await? {
                    return Ok(done);
                }
                tracing::error!(
                    refund_id = %refund.id,
                    order_id = %order.id,
                    order_number = %order.order_number,
                    provider_refund_reference = %reference,
                    %amount,
                    error = %e,
                    "Provider refunded but local settlement failed; reconcile manually"
                );
                return Err(e.into());
            }
        };

        metrics::counter!("refunds.settled", "method" => refund.method.as_str()).increment(1);
        if settled.credit_transaction.is_some() {
            metrics::counter!("store_credit.earned").increment(1);
        }
        tracing::info!(
            refund_id = %settled.refund.id,
            order_id = %settled.order.id,
            order_number = %settled.order.order_number,
            %amount,
            status = %settled.order.status,
            method = refund.method.as_str(),
            "Refund settled"
        );
        dispatch(
            &self.env.notifier,
            Notification::RefundIssued {
                order_id: settled.order.id,
                order_number: settled.order.order_number.clone(),
                email: settled.order.customer.email.clone(),
                amount,
                method: refund.method,
            },
        );

        Ok(DecisionResult {
            refund: settled.refund,
            order: Some(settled.order),
            credit_transaction: settled.credit_transaction,
        })
    }

    /// The payment reconciler completes a provider refund from its webhook
    /// when that lands before our own commit. The request then already
    /// carries `reference`, and the settlement stands as recorded there.
    async fn settled_from_webhook(
        &self,
        refund_id: RefundRequestId,
        reference: &str,
    ) -> Result<Option<DecisionResult>, CommerceError> {
        let current = self.refund_request(refund_id).await?;
        if current.status != RefundStatus::Refunded
            || current.provider_refund_reference.as_deref() != Some(reference)
        {
            return Ok(None);
        }
        let order = self.load_order(&current).await?;
        tracing::info!(
            %refund_id,
            order_id = %order.id,
            provider_refund_reference = reference,
            "Refund already settled from the provider webhook"
        );
        Ok(Some(DecisionResult {
            refund: current,
            order: Some(order),
            credit_transaction: None,
        }))
    }

    async fn refund_original_payment(
        &self,
        refund: &RefundRequest,
        order: &Order,
        amount: Money,
    ) -> Result<String, CommerceError> {
        let (Some(provider), Some(reference)) = (order.provider(), order.payment_reference())
        else {
            return Err(CommerceError::validation(
                "orders without a payment provider can only be refunded to store credit",
            ));
        };
        let gateway = self.env.gateways.get(provider).ok_or_else(|| {
            metrics::counter!("refunds.upstream_failed").increment(1);
            CommerceError::from(GatewayError::NotConfigured(provider.to_string()))
        })?;

        let call = RefundCall {
            payment_reference: reference.to_string(),
            amount,
            currency: order.currency.clone(),
            idempotency_key: refund.id.to_string(),
            reason: Some(refund.reason.clone()),
        };
        let timeout_ms = u64::try_from(self.provider_timeout.as_millis()).unwrap_or(u64::MAX);
        let result = match tokio::time::timeout(self.provider_timeout, gateway.refund(call)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(timeout_ms)),
        };

        match result {
            Ok(receipt) => {
                tracing::info!(
                    refund_id = %refund.id,
                    %provider,
                    provider_refund_reference = %receipt.provider_refund_reference,
                    provider_status = %receipt.status,
                    "Provider refund issued"
                );
                Ok(receipt.provider_refund_reference)
            }
            Err(e) => {
                tracing::warn!(
                    refund_id = %refund.id,
                    order_id = %order.id,
                    %provider,
                    error = %e,
                    "Provider refund failed; request left approved"
                );
                metrics::counter!("refunds.upstream_failed").increment(1);
                Err(e.into())
            }
        }
    }
}

/// Order mutation that settling `refund` against `order` commits: the
/// refunded-total compare-and-set, `refunded` or `partially_refunded`, the
/// payment status for provider refunds, and a restock once fully refunded.
///
/// # Errors
///
/// - `Conflict` when the order is disputed
/// - `Validation` when the amount is not positive or exceeds what remains
/// - `Conflict` when the order status admits no refund
pub(crate) fn settlement_transition(
    refund: &RefundRequest,
    order: &Order,
    at: DateTime<Utc>,
) -> Result<OrderTransition, CommerceError> {
    if order.status == OrderStatus::Disputed {
        return Err(CommerceError::Conflict(format!(
            "order {} is under dispute; settle through the provider",
            order.order_number
        )));
    }
    let amount = refund.settlement_amount();
    validate_amount(amount, order)?;

    let refunded_total = order.refunded_total + amount;
    let full = refunded_total >= order.totals.total;
    let target = if full {
        OrderStatus::Refunded
    } else {
        OrderStatus::PartiallyRefunded
    };
    order.status.transition(target)?;

    let payment_status = match refund.method {
        SettlementMethod::OriginalPayment if full => Some(PaymentStatus::Refunded),
        SettlementMethod::OriginalPayment => Some(PaymentStatus::PartiallyRefunded),
        SettlementMethod::StoreCredit => None,
    };
    Ok(OrderTransition {
        payment_status,
        restock: full,
        refunded_total: Some(RefundedTotalUpdate {
            expected: order.refunded_total,
            new: refunded_total,
        }),
        ..OrderTransition::new(order.id, order.status, target, at)
    })
}

fn validate_amount(amount: Money, order: &Order) -> Result<(), CommerceError> {
    if !amount.is_positive() {
        return Err(CommerceError::validation("refund amount must be positive"));
    }
    let remaining = order.refundable_remaining();
    if amount > remaining {
        return Err(CommerceError::validation(format!(
            "refund amount {amount} exceeds the refundable remainder {remaining}"
        )));
    }
    Ok(())
}
