//! Checkout.

use crate::error::AppError;
use crate::extractors::CorrelationId;
use crate::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use commerce_core::intake::Cart;
use commerce_core::types::Order;
use serde::Serialize;

/// Body returned for a created order.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// The persisted order
    pub order: Order,
}

/// Create an order from a cart.
///
/// ```text
/// POST /api/checkout
/// ```
///
/// Answers 201 with the order. Stock shortfalls answer 409 with the short
/// items under `details.insufficientItems`.
///
/// # Errors
///
/// Any intake failure, mapped through [`AppError`].
pub async fn checkout(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    payload: Result<Json<Cart>, JsonRejection>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let Json(cart) = payload?;
    let receipt = state.intake.submit(cart).await?;

    if !receipt.unreconciled.is_empty() {
        tracing::error!(
            correlation_id = %correlation_id.0,
            order_id = %receipt.order.id,
            order_number = %receipt.order.order_number,
            adjustments = receipt.unreconciled.len(),
            "Order created with unreconciled inventory"
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order: receipt.order,
        }),
    ))
}
