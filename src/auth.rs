//! Caller identity resolution at the connection boundary.
//!
//! The engine never parses tokens itself; an [`AuthGuard`] implementation
//! owns that. The static-token guard here covers tests and single-user
//! deployments.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Identity established for an authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthClaims {
    pub user_id: i64,
}

#[derive(Debug, Error, Diagnostic)]
pub enum AuthError {
    #[error("missing credentials")]
    #[diagnostic(code(flowchat::auth::missing))]
    Missing,

    #[error("could not validate credentials")]
    #[diagnostic(code(flowchat::auth::invalid))]
    Invalid,
}

/// Validates a bearer token into caller claims.
#[async_trait]
pub trait AuthGuard: Send + Sync {
    async fn authenticate(&self, token: Option<&str>) -> Result<AuthClaims, AuthError>;
}

/// Accepts exactly one pre-shared token, mapping it to a fixed user id.
///
/// With no token configured every caller is admitted as that user, which is
/// the open-access mode the standalone binary runs in.
pub struct StaticTokenAuth {
    token: Option<String>,
    user_id: i64,
}

impl StaticTokenAuth {
    #[must_use]
    pub fn open(user_id: i64) -> Self {
        Self {
            token: None,
            user_id,
        }
    }

    #[must_use]
    pub fn with_token(token: impl Into<String>, user_id: i64) -> Self {
        Self {
            token: Some(token.into()),
            user_id,
        }
    }
}

#[async_trait]
impl AuthGuard for StaticTokenAuth {
    async fn authenticate(&self, token: Option<&str>) -> Result<AuthClaims, AuthError> {
        match (&self.token, token) {
            (None, _) => Ok(AuthClaims {
                user_id: self.user_id,
            }),
            (Some(_), None) => Err(AuthError::Missing),
            (Some(expected), Some(presented)) if expected == presented => Ok(AuthClaims {
                user_id: self.user_id,
            }),
            (Some(_), Some(_)) => Err(AuthError::Invalid),
        }
    }
}
