use crate::environment::BoxFuture;
use crate::error::VerificationError;
use crate::reconciler::{WebhookHeaders, WebhookVerifier};
use crate::types::PaymentProvider;

/// Verifier with a fixed verdict.
#[derive(Clone, Debug)]
pub struct StaticVerifier {
    provider: PaymentProvider,
    verdict: Result<(), VerificationError>,
}

impl StaticVerifier {
    /// Accepts every webhook.
    #[must_use]
    pub const fn accepting(provider: PaymentProvider) -> Self {
        Self {
            provider,
            verdict: Ok(()),
        }
    }

    /// Rejects every webhook with `error`.
    #[must_use]
    pub const fn rejecting(provider: PaymentProvider, error: VerificationError) -> Self {
        Self {
            provider,
            verdict: Err(error),
        }
    }
}

impl WebhookVerifier for StaticVerifier {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    fn verify<'a>(
        &'a self,
        _headers: &'a WebhookHeaders,
        _body: &'a [u8],
    ) -> BoxFuture<'a, Result<(), VerificationError>> {
        let verdict = self.verdict.clone();
        Box::pin(async move { verdict })
    }
}
