//! The single auth token handed to the upstream controller.
//!
//! The Nanoleaf pairing flow normally requires a physical button press; the
//! bridge skips that and issues the same token to anyone who asks.  The token
//! still gates every protected route so that a stale link from a previous
//! process (with a different token) is rejected instead of silently driving
//! the strips.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Errors produced while accepting a configured token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthTokenError {
    #[error("auth token must not be empty")]
    Empty,
    #[error("auth token must be a single path segment, got '{0}'")]
    InvalidCharacter(String),
}

/// An opaque token, issued once per process and never rotated.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Generates a fresh random token (32 lowercase hex characters).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accepts an operator-supplied token.
    ///
    /// # Errors
    ///
    /// The token appears in URL paths, so it must be non-empty and must not
    /// contain `/`, `?`, `#` or whitespace.
    pub fn from_configured(token: &str) -> Result<Self, AuthTokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthTokenError::Empty);
        }
        if token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'))
        {
            return Err(AuthTokenError::InvalidCharacter(token.to_string()));
        }
        Ok(Self(token.to_string()))
    }

    /// Uses the configured token when present, otherwise generates one.
    ///
    /// # Errors
    ///
    /// See [`AuthToken::from_configured`].
    pub fn configured_or_generated(configured: Option<&str>) -> Result<Self, AuthTokenError> {
        configured.map_or_else(|| Ok(Self::generate()), Self::from_configured)
    }

    /// Checks a token presented by a client.
    pub fn matches(&self, presented: &str) -> bool {
        self.0 == presented
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of debug logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}
