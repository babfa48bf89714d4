//! Credential issuance and the token wire format.
//!
//! A token is `<payload>.<signature>`: the payload is the JSON-encoded
//! [`Claims`] and the signature is HMAC-SHA256 over the payload segment,
//! both base64url without padding.

use super::clock::Clock;
use super::error::AuthError;
use super::revocation::token_hash;
use anyhow::{bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Default credential lifetime: 1 hour (seconds).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Longest accepted credential lifetime: 10 years (seconds).
/// Expiries must stay representable as SQLite INTEGER.
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// HMAC-SHA256 output length.
const SIGNATURE_BYTES: usize = 32;

/// Signed token body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal identity.
    pub sub: String,
    /// Issued-at, Unix seconds.
    pub iat: u64,
    /// Expiry, Unix seconds. Always greater than `iat`.
    pub exp: u64,
    /// Random token id.
    pub jti: String,
}

/// Process-wide signing secret, immutable after startup.
#[derive(Clone)]
pub struct SigningKey(Arc<[u8]>);

impl SigningKey {
    /// The secret is used byte for byte; only an empty or all-whitespace
    /// secret is rejected.
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError::Configuration(
                "signing secret must not be empty".into(),
            ));
        }
        Ok(Self(Arc::from(secret.as_bytes())))
    }

    /// Build from an optional config value; `None` is a configuration error.
    pub fn from_config(secret: Option<&str>) -> Result<Self, AuthError> {
        match secret {
            Some(secret) => Self::new(secret),
            None => Err(AuthError::Configuration(
                "signing secret is not set (auth.signing_secret or NOTEKEEP_SIGNING_SECRET)".into(),
            )),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.0).expect("HMAC can accept any key length")
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    /// Constant-time signature check.
    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// A freshly minted credential. `token` is what the client stores.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Mints signed, time-bounded credentials. Stateless.
pub struct TokenIssuer {
    key: SigningKey,
    ttl_secs: u64,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(key: SigningKey, ttl_secs: u64, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        if ttl_secs == 0 {
            return Err(AuthError::Configuration(
                "token TTL must be greater than zero".into(),
            ));
        }
        if ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(AuthError::Configuration(format!(
                "token TTL must not exceed {MAX_TOKEN_TTL_SECS} seconds"
            )));
        }
        Ok(Self {
            key,
            ttl_secs,
            clock,
        })
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Issue a credential for an already-authenticated principal.
    pub fn issue(&self, subject: &str) -> Result<IssuedToken> {
        if subject.is_empty() {
            bail!("Cannot issue a token for an empty subject");
        }
        let iat = self.clock.now();
        let claims = Claims {
            sub: subject.to_string(),
            iat,
            exp: iat.saturating_add(self.ttl_secs),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = encode(&claims, &self.key)?;
        tracing::debug!(subject, exp = claims.exp, "Issued session token");
        Ok(IssuedToken { token, claims })
    }
}

fn encode(claims: &Claims, key: &SigningKey) -> Result<String> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signature = URL_SAFE_NO_PAD.encode(key.sign(payload.as_bytes()));
    Ok(format!("{payload}.{signature}"))
}

/// A token split into its parts, not yet trusted.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub(crate) claims: Claims,
    pub(crate) payload: String,
    pub(crate) signature: Vec<u8>,
    pub(crate) token_hash: String,
}

impl ParsedToken {
    /// Structural parse. Every failure is `MalformedCredential`.
    pub fn parse(token: &str) -> Result<Self, AuthError> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or(AuthError::MalformedCredential)?;
        if payload.is_empty() || signature.is_empty() || signature.contains('.') {
            return Err(AuthError::MalformedCredential);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::MalformedCredential)?;
        if signature.len() != SIGNATURE_BYTES {
            return Err(AuthError::MalformedCredential);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::MalformedCredential)?;
        let claims: Claims =
            serde_json::from_slice(&raw).map_err(|_| AuthError::MalformedCredential)?;
        if claims.sub.is_empty() || claims.exp <= claims.iat {
            return Err(AuthError::MalformedCredential);
        }

        Ok(Self {
            claims,
            payload: payload.to_string(),
            signature,
            token_hash: token_hash(token),
        })
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub(crate) fn signature_valid(&self, key: &SigningKey) -> bool {
        key.verify(self.payload.as_bytes(), &self.signature)
    }
}

#[cfg(test)]
pub(crate) fn sign_claims(claims: &Claims, key: &SigningKey) -> String {
    encode(claims, key).unwrap()
}
