//! HTTP request handlers, organized by audience.

pub mod admin;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod webhooks;

pub use health::health_check;

use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Assemble every route over `state`.
pub fn router(state: AppState) -> Router {
    let customer = Router::new()
        .route("/checkout", post(checkout::checkout))
        .route("/orders/:order_number", get(orders::track_order))
        .route(
            "/orders/:order_number/refund-requests",
            post(orders::request_refund),
        );

    let webhooks = Router::new()
        .route("/stripe", post(webhooks::stripe_webhook))
        .route("/paypal", post(webhooks::paypal_webhook));

    let admin = Router::new()
        .route(
            "/refund-requests/:id",
            get(admin::get_refund_request).patch(admin::decide_refund),
        )
        .route("/orders/:id/status", post(admin::set_order_status))
        .route("/store-credit/:email", get(admin::store_credit));

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            customer
                .nest("/webhooks", webhooks)
                .nest("/admin", admin),
        )
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
