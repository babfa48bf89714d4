//! Session gate: the per-request enforcement point for protected routes.
//!
//! Handlers take a [`Session`] argument; axum runs the gate before the
//! handler body, so protected logic never sees an unverified request.

use super::error::AuthError;
use super::verifier::{TokenVerifier, VerifiedToken};
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

/// Identity attached to an admitted request.
#[derive(Debug, Clone)]
pub struct Session {
    token: VerifiedToken,
}

impl Session {
    pub fn user_id(&self) -> &str {
        self.token.subject()
    }

    pub fn expires_at(&self) -> u64 {
        self.token.expires_at()
    }

    pub fn token(&self) -> &VerifiedToken {
        &self.token
    }
}

/// Why the gate refused a request.
///
/// Deliberately coarse: malformed, forged, expired and revoked tokens all
/// map to `Unauthenticated` so callers cannot tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    Unauthenticated,
    /// Revocation store unreachable; the request is refused, not admitted.
    Unavailable,
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
                Json(serde_json::json!({"error": "unauthorized"})),
            )
                .into_response(),
            Self::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "authentication temporarily unavailable"})),
            )
                .into_response(),
        }
    }
}

/// Extract bearer token from the Authorization header.
/// The scheme is matched case-insensitively; an empty token is absent.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Admits or rejects requests based on their bearer credential.
pub struct SessionGate {
    verifier: Arc<TokenVerifier>,
}

impl SessionGate {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &Arc<TokenVerifier> {
        &self.verifier
    }

    /// Verify the request's credential and return the session it carries.
    pub async fn admit(&self, headers: &HeaderMap) -> Result<Session, GateRejection> {
        let Some(token) = extract_bearer_token(headers) else {
            tracing::debug!("Rejected request without bearer token");
            return Err(GateRejection::Unauthenticated);
        };

        match self.verifier.verify(token).await {
            Ok(token) => Ok(Session { token }),
            Err(e) => Err(reject(&e)),
        }
    }

    /// Revoke the token the session was admitted with.
    pub async fn logout(&self, session: &Session) -> Result<(), GateRejection> {
        self.verifier
            .revoke(&session.token)
            .await
            .map_err(|e| reject(&e))
    }
}

fn reject(err: &AuthError) -> GateRejection {
    if err.is_unauthenticated() {
        tracing::debug!(reason = err.kind(), "Rejected request credential");
        GateRejection::Unauthenticated
    } else {
        tracing::warn!(reason = err.kind(), "Session gate failing closed: {err}");
        GateRejection::Unavailable
    }
}

impl<S> FromRequestParts<S> for Session
where
    Arc<SessionGate>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gate = Arc::<SessionGate>::from_ref(state);
        gate.admit(&parts.headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::revocation::{MemoryRevocationStore, RevocationStore};
    use crate::auth::token::{SigningKey, TokenIssuer};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;

    const T0: u64 = 1_700_000_000;

    fn setup(store: Arc<dyn RevocationStore>) -> (Arc<ManualClock>, TokenIssuer, Arc<SessionGate>) {
        let key = SigningKey::new("gate-secret").unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let issuer = TokenIssuer::new(key.clone(), 3600, clock.clone()).unwrap();
        let verifier = TokenVerifier::new(key, store, clock.clone(), Duration::from_millis(50));
        (clock, issuer, Arc::new(SessionGate::new(Arc::new(verifier))))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    async fn body_of(rejection: GateRejection) -> (StatusCode, String) {
        let response = rejection.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn extract_bearer_token_variants() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn admits_valid_token() {
        let (_clock, issuer, gate) = setup(Arc::new(MemoryRevocationStore::new()));
        let issued = issuer.issue("u1").unwrap();

        let session = gate.admit(&bearer(&issued.token)).await.unwrap();
        assert_eq!(session.user_id(), "u1");
        assert_eq!(session.expires_at(), T0 + 3600);
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let (_clock, _issuer, gate) = setup(Arc::new(MemoryRevocationStore::new()));
        assert_eq!(
            gate.admit(&HeaderMap::new()).await.unwrap_err(),
            GateRejection::Unauthenticated
        );
    }

    #[tokio::test]
    async fn logout_then_retry_is_rejected() {
        let (_clock, issuer, gate) = setup(Arc::new(MemoryRevocationStore::new()));
        let issued = issuer.issue("u1").unwrap();
        let headers = bearer(&issued.token);

        let session = gate.admit(&headers).await.unwrap();
        gate.logout(&session).await.unwrap();
        // A second logout of the same token is harmless.
        gate.logout(&session).await.unwrap();

        assert_eq!(
            gate.admit(&headers).await.unwrap_err(),
            GateRejection::Unauthenticated
        );
    }

    #[tokio::test]
    async fn expired_and_forged_tokens_look_identical() {
        let (clock, issuer, gate) = setup(Arc::new(MemoryRevocationStore::new()));
        let issued = issuer.issue("u1").unwrap();

        let forged = gate.admit(&bearer("garbage.token")).await.unwrap_err();
        clock.advance(7200);
        let expired = gate.admit(&bearer(&issued.token)).await.unwrap_err();

        let forged = body_of(forged).await;
        let expired = body_of(expired).await;
        assert_eq!(forged, expired);
        assert_eq!(forged.0, StatusCode::UNAUTHORIZED);
    }

    struct DownStore;

    #[async_trait]
    impl RevocationStore for DownStore {
        async fn revoke(&self, _token_hash: &str, _expires_at: u64) -> Result<()> {
            bail!("store offline")
        }
        async fn is_revoked(&self, _token_hash: &str) -> Result<bool> {
            bail!("store offline")
        }
        async fn sweep_expired(&self, _now: u64) -> Result<u64> {
            bail!("store offline")
        }
        async fn count(&self) -> Result<u64> {
            bail!("store offline")
        }
    }

    #[tokio::test]
    async fn unreachable_store_rejects_with_unavailable() {
        let (_clock, issuer, gate) = setup(Arc::new(DownStore));
        let issued = issuer.issue("u1").unwrap();

        let rejection = gate.admit(&bearer(&issued.token)).await.unwrap_err();
        assert_eq!(rejection, GateRejection::Unavailable);
        assert_eq!(body_of(rejection).await.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn extractor_uses_gate_from_state() {
        let (_clock, issuer, gate) = setup(Arc::new(MemoryRevocationStore::new()));
        let issued = issuer.issue("u1").unwrap();

        let request = Request::builder()
            .uri("/api/notes")
            .header(header::AUTHORIZATION, format!("Bearer {}", issued.token))
            .body(Body::empty())
            .unwrap();
        let (mut parts, _body) = request.into_parts();

        let session = Session::from_request_parts(&mut parts, &gate).await.unwrap();
        assert_eq!(session.user_id(), "u1");
    }
}
