//! Bearer-token authentication.

use std::fmt;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Result of checking a presented credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Credential matches the configured secret.
    Authorized,
    /// Credential is missing, wrong, or no secret is configured.
    Rejected,
}

impl AuthDecision {
    /// Returns `true` for [`AuthDecision::Authorized`].
    #[must_use]
    pub const fn is_authorized(self) -> bool {
        matches!(self, Self::Authorized)
    }
}

/// Validates bearer credentials against a secret resolved once at startup.
///
/// Only the SHA-256 digest of the secret is kept. Presented credentials are
/// hashed and compared in constant time, so neither content nor length leaks
/// through timing. Without a secret every request is rejected.
#[derive(Clone)]
pub struct AuthGate {
    expected: Option<[u8; 32]>,
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl AuthGate {
    /// Reads the secret from the environment variable `variable`.
    #[must_use]
    pub fn from_env(variable: &str) -> Self {
        Self::from_lookup(variable, |name| std::env::var(name).ok())
    }

    /// Resolves the secret through `lookup`, failing closed when it yields
    /// nothing or an empty string.
    #[must_use]
    pub fn from_lookup<F>(variable: &str, lookup: F) -> Self
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let gate = lookup(variable).map_or_else(Self::deny_all, Self::with_secret);
        if !gate.is_configured() {
            warn!(
                variable,
                "bearer token variable is unset or empty; every request will be rejected"
            );
        }
        gate
    }

    /// Uses `secret` directly. An empty secret denies everything.
    #[must_use]
    pub fn with_secret(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Self::deny_all();
        }
        Self {
            expected: Some(Sha256::digest(secret).into()),
        }
    }

    /// Gate that rejects every credential.
    #[must_use]
    pub const fn deny_all() -> Self {
        Self { expected: None }
    }

    /// Returns `true` when a secret is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.expected.is_some()
    }

    /// Checks a presented bearer token.
    #[must_use]
    pub fn authenticate(&self, credential: Option<&str>) -> AuthDecision {
        let (Some(expected), Some(presented)) = (self.expected.as_ref(), credential) else {
            return AuthDecision::Rejected;
        };
        let digest = Sha256::digest(presented.as_bytes());
        if bool::from(digest.as_slice().ct_eq(expected.as_slice())) {
            AuthDecision::Authorized
        } else {
            AuthDecision::Rejected
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively. Returns `None` for other schemes
/// or an empty token.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
