//! Session authentication for the notekeep gateway.
//!
//! Provides:
//! - Signed bearer tokens (HMAC-SHA256 over JSON claims, base64url encoded)
//! - A two-stage verifier: revocation gate, then cryptographic gate
//! - Revocation stores (in-memory and SQLite) with expiry sweeping
//! - The per-request session gate used by every protected route
//!
//! ## Design Decisions
//! - Tokens are self-contained; no server-side session row is written at
//!   login. Logout inserts the token's SHA-256 hash into the revocation
//!   store with the token's own expiry, so entries never outlive the
//!   credential and never expire before it.
//! - Expiry is authoritative. Sweeping is cleanup only: an entry swept at
//!   `exp` guards a token that the expiry check already rejects.
//! - Revocation lookups fail closed. A store error or timeout is
//!   `Unavailable`, never "not revoked".

pub mod clock;
pub mod error;
pub mod gate;
pub mod revocation;
pub mod store;
pub mod token;
pub mod verifier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AuthError;
pub use gate::{extract_bearer_token, GateRejection, Session, SessionGate};
pub use revocation::{spawn_sweeper, token_hash, MemoryRevocationStore, RevocationStore};
pub use store::SqliteRevocationStore;
pub use token::{Claims, IssuedToken, SigningKey, TokenIssuer};
pub use verifier::{TokenVerifier, VerifiedToken};
