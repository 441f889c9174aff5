//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation id
//! - [`AdminIdentity`]: a reviewer authenticated by bearer token

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use std::sync::Arc;
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Uses the id stored by the correlation middleware, then the
/// `X-Correlation-ID` header, and generates one as a last resort.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .or_else(|| {
                parts
                    .headers
                    .get(CORRELATION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| Uuid::parse_str(s).ok())
            })
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Configured admin API tokens, each bound to a reviewer name.
#[derive(Clone, Default)]
pub struct AdminTokens {
    entries: Arc<Vec<(String, String)>>,
}

impl std::fmt::Debug for AdminTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokens")
            .field("count", &self.entries.len())
            .finish()
    }
}

impl AdminTokens {
    /// Build from `(reviewer, token)` pairs. Empty tokens are dropped.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: Arc::new(
                entries
                    .into_iter()
                    .filter(|(_, token)| !token.is_empty())
                    .collect(),
            ),
        }
    }

    /// Parse `name:token,name:token`. An entry without a name is bound to
    /// the reviewer `admin`.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        Self::new(
            spec.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| match entry.split_once(':') {
                    Some((name, token)) => (name.trim().to_string(), token.trim().to_string()),
                    None => ("admin".to_string(), entry.to_string()),
                }),
        )
    }

    /// Whether no token is configured; every admin request is then refused.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reviewer name for a presented token.
    ///
    /// Every configured token is compared so timing does not reveal which
    /// entry matched.
    #[must_use]
    pub fn reviewer_for(&self, presented: &str) -> Option<&str> {
        let mut found = None;
        for (name, token) in self.entries.iter() {
            if constant_time_eq::constant_time_eq(token.as_bytes(), presented.as_bytes()) {
                found = Some(name.as_str());
            }
        }
        found
    }
}

/// An authenticated admin reviewer.
///
/// Requires `Authorization: Bearer <token>` matching one of the configured
/// [`AdminTokens`]; the token's name is recorded as the reviewer on refund
/// decisions.
#[derive(Debug, Clone)]
pub struct AdminIdentity {
    /// Reviewer name
    pub reviewer: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminIdentity
where
    AdminTokens: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tokens = AdminTokens::from_ref(state);
        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

        match tokens.reviewer_for(presented) {
            Some(reviewer) => Ok(Self {
                reviewer: reviewer.to_string(),
            }),
            None => {
                tracing::warn!(path = %parts.uri.path(), "Rejected admin token");
                metrics::counter!("admin.auth_failures").increment(1);
                Err(AppError::unauthorized("Invalid admin token"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_bare_tokens() {
        let tokens = AdminTokens::parse("alice:s3cret, bob:hunter2 ,legacy");
        assert_eq!(tokens.reviewer_for("s3cret"), Some("alice"));
        assert_eq!(tokens.reviewer_for("hunter2"), Some("bob"));
        assert_eq!(tokens.reviewer_for("legacy"), Some("admin"));
        assert_eq!(tokens.reviewer_for("nope"), None);
    }

    #[test]
    fn empty_config_rejects_everything() {
        let tokens = AdminTokens::parse(" , ");
        assert!(tokens.is_empty());
        assert_eq!(tokens.reviewer_for(""), None);
    }

    #[test]
    fn empty_tokens_are_dropped() {
        let tokens = AdminTokens::parse("alice:");
        assert!(tokens.is_empty());
    }
}
