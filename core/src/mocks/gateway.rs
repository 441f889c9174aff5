use crate::environment::BoxFuture;
use crate::error::GatewayError;
use crate::gateway::{PaymentGateway, RefundCall, RefundReceipt};
use crate::types::PaymentProvider;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the next refund calls do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayBehavior {
    /// Issue the refund and return its receipt
    Succeed,
    /// Return `Rejected` with this message; nothing is issued
    Reject(String),
    /// Issue the refund, then sleep for this long before answering
    Hang(Duration),
}

/// Scripted provider refund API that records every call.
///
/// Refunds are keyed by idempotency key like the real providers: a repeated
/// key returns the receipt of the refund already issued under it.
#[derive(Clone, Debug)]
pub struct MockPaymentGateway {
    provider: PaymentProvider,
    behavior: Arc<Mutex<GatewayBehavior>>,
    calls: Arc<Mutex<Vec<RefundCall>>>,
    issued: Arc<Mutex<HashMap<String, RefundReceipt>>>,
}

impl MockPaymentGateway {
    /// Gateway that succeeds.
    #[must_use]
    pub fn new(provider: PaymentProvider) -> Self {
        Self {
            provider,
            behavior: Arc::new(Mutex::new(GatewayBehavior::Succeed)),
            calls: Arc::new(Mutex::new(Vec::new())),
            issued: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Change the behavior of subsequent calls.
    pub fn set_behavior(&self, behavior: GatewayBehavior) {
        if let Ok(mut guard) = self.behavior.lock() {
            *guard = behavior;
        }
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RefundCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Number of distinct refunds issued.
    #[must_use]
    pub fn issued_count(&self) -> usize {
        self.issued.lock().map(|issued| issued.len()).unwrap_or_default()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    fn refund(&self, call: RefundCall) -> BoxFuture<'_, Result<RefundReceipt, GatewayError>> {
        Box::pin(async move {
            let behavior = self
                .behavior
                .lock()
                .map_err(|_| GatewayError::Transport("Mutex lock failed".to_string()))?
                .clone();
            self.calls
                .lock()
                .map_err(|_| GatewayError::Transport("Mutex lock failed".to_string()))?
                .push(call.clone());

            if let GatewayBehavior::Reject(message) = behavior {
                return Err(GatewayError::Rejected {
                    status: 402,
                    message,
                });
            }

            let receipt = {
                let mut issued = self
                    .issued
                    .lock()
                    .map_err(|_| GatewayError::Transport("Mutex lock failed".to_string()))?;
                let next = issued.len() + 1;
                issued
                    .entry(call.idempotency_key)
                    .or_insert_with(|| RefundReceipt {
                        provider_refund_reference: format!("{}_refund_{next}", self.provider),
                        status: "succeeded".to_string(),
                    })
                    .clone()
            };

            if let GatewayBehavior::Hang(delay) = behavior {
                tokio::time::sleep(delay).await;
            }
            Ok(receipt)
        })
    }
}
