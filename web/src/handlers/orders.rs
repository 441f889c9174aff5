//! Customer order tracking and refund requests.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use commerce_core::query::OrderView;
use commerce_core::settlement::RefundRequestInput;
use commerce_core::types::{OrderNumber, RefundRequest};
use serde::Deserialize;

/// Query string of the tracking endpoint.
#[derive(Debug, Deserialize)]
pub struct TrackingQuery {
    /// Email the order was placed with
    pub email: Option<String>,
}

/// Look up an order with its timeline.
///
/// ```text
/// GET /api/orders/:order_number?email=
/// ```
///
/// A wrong email answers 404, same as an unknown order number.
///
/// # Errors
///
/// 422 without an email, 404 when no order matches.
pub async fn track_order(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
    Query(query): Query<TrackingQuery>,
) -> Result<Json<OrderView>, AppError> {
    let email = query
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| AppError::validation("email is required"))?;

    let view = state
        .query
        .by_number(OrderNumber::new(order_number), &email)
        .await?;
    Ok(Json(view))
}

/// Open a refund request.
///
/// ```text
/// POST /api/orders/:order_number/refund-requests
/// ```
///
/// # Errors
///
/// 404 for an unknown order or an email that does not own it, 422 for an
/// amount or order status that admits no refund.
pub async fn request_refund(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
    payload: Result<Json<RefundRequestInput>, JsonRejection>,
) -> Result<(StatusCode, Json<RefundRequest>), AppError> {
    let Json(input) = payload?;
    let request = state
        .settlement
        .request_refund(OrderNumber::new(order_number), input)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}
