//! Shared application state for handlers.

use crate::extractors::AdminTokens;
use axum::extract::FromRef;
use commerce_core::environment::CommerceEnvironment;
use commerce_core::fulfillment::Fulfillment;
use commerce_core::intake::OrderIntake;
use commerce_core::query::OrderQuery;
use commerce_core::reconciler::PaymentReconciler;
use commerce_core::settlement::SettlementEngine;

/// Services reachable from the HTTP surface.
///
/// Every service holds only `Arc`s, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Checkout
    pub intake: OrderIntake,
    /// Webhooks
    pub reconciler: PaymentReconciler,
    /// Refund requests and decisions
    pub settlement: SettlementEngine,
    /// Admin status changes
    pub fulfillment: Fulfillment,
    /// Reads
    pub query: OrderQuery,
    /// Admin bearer tokens
    pub admin_tokens: AdminTokens,
}

impl AppState {
    /// State with default-configured services over `env` and no admin tokens.
    ///
    /// The reconciler starts without verifiers; use
    /// [`AppState::with_reconciler`] to install them.
    #[must_use]
    pub fn new(env: CommerceEnvironment) -> Self {
        Self {
            intake: OrderIntake::new(env.clone()),
            reconciler: PaymentReconciler::new(env.clone()),
            settlement: SettlementEngine::new(env.clone()),
            fulfillment: Fulfillment::new(env.clone()),
            query: OrderQuery::new(env),
            admin_tokens: AdminTokens::default(),
        }
    }

    /// Replace the intake service.
    #[must_use]
    pub fn with_intake(mut self, intake: OrderIntake) -> Self {
        self.intake = intake;
        self
    }

    /// Replace the reconciler.
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: PaymentReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Replace the settlement engine.
    #[must_use]
    pub fn with_settlement(mut self, settlement: SettlementEngine) -> Self {
        self.settlement = settlement;
        self
    }

    /// Set the admin tokens.
    #[must_use]
    pub fn with_admin_tokens(mut self, tokens: AdminTokens) -> Self {
        self.admin_tokens = tokens;
        self
    }
}

impl FromRef<AppState> for AdminTokens {
    fn from_ref(state: &AppState) -> Self {
        state.admin_tokens.clone()
    }
}
