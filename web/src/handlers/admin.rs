//! Admin endpoints. Every handler requires an [`AdminIdentity`].

use crate::error::AppError;
use crate::extractors::AdminIdentity;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use commerce_core::query::CreditStatement;
use commerce_core::settlement::RefundDecision;
use commerce_core::status::OrderStatus;
use commerce_core::types::{Order, OrderId, RefundRequest, RefundRequestId, StoreCreditTransaction};
use serde::{Deserialize, Serialize};

fn refund_id(raw: &str) -> Result<RefundRequestId, AppError> {
    raw.parse()
        .map_err(|_| AppError::not_found("refund_request", raw))
}

fn order_id(raw: &str) -> Result<OrderId, AppError> {
    raw.parse().map_err(|_| AppError::not_found("order", raw))
}

/// Read one refund request.
///
/// ```text
/// GET /api/admin/refund-requests/:id
/// ```
///
/// # Errors
///
/// 401 without a valid token, 404 for an unknown id.
pub async fn get_refund_request(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Path(id): Path<String>,
) -> Result<Json<RefundRequest>, AppError> {
    let request = state.settlement.refund_request(refund_id(&id)?).await?;
    Ok(Json(request))
}

/// Result of a refund decision.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    /// Request after the decision
    pub refund: RefundRequest,
    /// Order after settlement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    /// Store-credit ledger entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_transaction: Option<StoreCreditTransaction>,
}

/// Approve, deny or settle a refund request.
///
/// ```text
/// PATCH /api/admin/refund-requests/:id
/// ```
///
/// # Errors
///
/// 409 when the request already left the expected status, 422 for an
/// invalid decision, 502 when the provider refund fails (the request stays
/// approved and can be retried).
pub async fn decide_refund(
    State(state): State<AppState>,
    admin: AdminIdentity,
    Path(id): Path<String>,
    payload: Result<Json<RefundDecision>, JsonRejection>,
) -> Result<Json<DecisionResponse>, AppError> {
    let id = refund_id(&id)?;
    let Json(decision) = payload?;
    tracing::info!(refund_id = %id, reviewer = %admin.reviewer, status = %decision.status, "Refund decision");

    let result = state.settlement.decide(id, decision, &admin.reviewer).await?;
    Ok(Json(DecisionResponse {
        refund: result.refund,
        order: result.order,
        credit_transaction: result.credit_transaction,
    }))
}

/// Body of a status change.
#[derive(Debug, Deserialize)]
pub struct StatusChange {
    /// Target status
    pub status: OrderStatus,
}

/// Move an order through fulfillment or cancel it.
///
/// ```text
/// POST /api/admin/orders/:id/status
/// ```
///
/// # Errors
///
/// 404 for an unknown order, 409 when the edge is not allowed.
pub async fn set_order_status(
    State(state): State<AppState>,
    admin: AdminIdentity,
    Path(id): Path<String>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> Result<Json<Order>, AppError> {
    let id = order_id(&id)?;
    let Json(change) = payload?;
    tracing::info!(order_id = %id, reviewer = %admin.reviewer, target = %change.status, "Admin status change");

    let order = state.fulfillment.advance_fulfillment(id, change.status).await?;
    Ok(Json(order))
}

/// Store-credit balance and history.
///
/// ```text
/// GET /api/admin/store-credit/:email
/// ```
///
/// # Errors
///
/// 401 without a valid token.
pub async fn store_credit(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Path(email): Path<String>,
) -> Result<Json<CreditStatement>, AppError> {
    let statement = state.query.credit_statement(&email).await?;
    Ok(Json(statement))
}
