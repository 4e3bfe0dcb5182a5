//! Handshake authentication.
//!
//! A connection is only upgraded once its token maps to a user. Rejected
//! handshakes never reach the router.

use axum::http::{header, HeaderMap};
use parley_protocol::UserId;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::UserEntry;

/// Authentication errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No token was presented.
    #[error("Authentication token required")]
    MissingToken,

    /// The token is not known.
    #[error("Invalid authentication token")]
    InvalidToken,
}

/// Resolves a bearer token to a user identity.
pub trait Authenticator: Send + Sync {
    /// Authenticate a token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the token is not recognised.
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Fixed token table loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    tokens: HashMap<String, UserId>,
}

impl StaticTokens {
    /// Build the table from configured users.
    #[must_use]
    pub fn from_users(users: &[UserEntry]) -> Self {
        Self {
            tokens: users
                .iter()
                .map(|user| (user.token.clone(), user.id.clone()))
                .collect(),
        }
    }

    /// Number of known tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if no tokens are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Extract the handshake token from the query string or the
/// `Authorization: Bearer` header. The query parameter wins.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] if neither is present.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::MissingToken)
}
