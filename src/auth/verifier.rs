//! Credential verification: parse, revocation gate, cryptographic gate.
//!
//! Order matters only for which error is reported. A revoked token is
//! rejected before any HMAC work; a token that passes the revocation gate
//! still has its signature and expiry checked.

use super::clock::Clock;
use super::error::AuthError;
use super::revocation::RevocationStore;
use super::token::{Claims, ParsedToken, SigningKey};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single revocation store call.
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 2_000;

/// A credential that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    claims: Claims,
    token_hash: String,
}

impl VerifiedToken {
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn expires_at(&self) -> u64 {
        self.claims.exp
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Revocation key of this token.
    pub fn token_hash(&self) -> &str {
        &self.token_hash
    }
}

/// Validates presented tokens and records logouts.
pub struct TokenVerifier {
    key: SigningKey,
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl TokenVerifier {
    pub fn new(
        key: SigningKey,
        store: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            key,
            store,
            clock,
            store_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn RevocationStore> {
        &self.store
    }

    /// Full verification pipeline. Short-circuits on the first failure.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let parsed = ParsedToken::parse(token)?;
        self.check_revocation(&parsed).await?;
        self.check_cryptographic(&parsed)?;
        Ok(VerifiedToken {
            claims: parsed.claims,
            token_hash: parsed.token_hash,
        })
    }

    /// Revocation gate. Store failures and timeouts fail closed.
    pub async fn check_revocation(&self, parsed: &ParsedToken) -> Result<(), AuthError> {
        let lookup = self.store.is_revoked(&parsed.token_hash);
        match tokio::time::timeout(self.store_timeout, lookup).await {
            Ok(Ok(false)) => Ok(()),
            Ok(Ok(true)) => Err(AuthError::Revoked),
            Ok(Err(e)) => {
                tracing::warn!(
                    token = short_hash(&parsed.token_hash),
                    "Revocation lookup failed: {e}"
                );
                Err(AuthError::Unavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    token = short_hash(&parsed.token_hash),
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Revocation lookup timed out"
                );
                Err(AuthError::Unavailable("revocation lookup timed out".into()))
            }
        }
    }

    /// Cryptographic gate: signature, then expiry.
    pub fn check_cryptographic(&self, parsed: &ParsedToken) -> Result<(), AuthError> {
        if !parsed.signature_valid(&self.key) {
            return Err(AuthError::InvalidSignature);
        }
        // Valid on [iat, exp): at `exp` the revocation entry may already be swept.
        if self.clock.now() >= parsed.claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(())
    }

    /// Revoke a verified token until its own expiry.
    pub async fn revoke(&self, token: &VerifiedToken) -> Result<(), AuthError> {
        let insert = self.store.revoke(&token.token_hash, token.claims.exp);
        match tokio::time::timeout(self.store_timeout, insert).await {
            Ok(Ok(())) => {
                tracing::info!(
                    subject = token.subject(),
                    token = short_hash(&token.token_hash),
                    "Session token revoked"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!("Revocation insert failed: {e}");
                Err(AuthError::Unavailable(e.to_string()))
            }
            Err(_) => Err(AuthError::Unavailable("revocation insert timed out".into())),
        }
    }
}

/// Leading hash characters, enough to correlate log lines.
fn short_hash(token_hash: &str) -> &str {
    &token_hash[..token_hash.len().min(12)]
}
