//! Identity verification seam.
//!
//! Token issuance and verification belong to the surrounding platform; the
//! core only consumes a verifier that maps an opaque token to a user
//! identity once per connection, at handshake time.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// A user identity, resolved once per connection.
pub type UserId = String;

/// Handshake verification errors. Terminal for the connection.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("Missing credentials")]
    MissingToken,

    /// The presented token did not resolve to an identity.
    #[error("Invalid credentials")]
    InvalidToken,

    /// The verifier itself could not be reached.
    #[error("Verifier unavailable: {0}")]
    Unavailable(String),
}

/// Maps a handshake token to a user identity.
///
/// The verifier may be I/O-bound (a platform auth service); it is awaited
/// exactly once per connection, before any registry or router mutation.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve a token to an identity, or fail the handshake.
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// In-memory token table, for development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    /// Create an empty verifier that rejects everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token-to-identity mapping.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<UserId>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticTokenVerifier::new().with_token("tok-1", "u1");

        assert_eq!(verifier.verify("tok-1").await.unwrap(), "u1");
        assert!(matches!(
            verifier.verify("bogus").await,
            Err(AuthError::InvalidToken)
        ));
    }
}
