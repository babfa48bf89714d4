//! Revocation list: tokens logged out before their natural expiry.
//!
//! Entries are keyed by the SHA-256 hash of the token string and carry the
//! token's own expiry. An entry may be swept once `expires_at <= now`; at
//! that point the expiry check rejects the token anyway.

use super::clock::Clock;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Storage backend for revoked tokens.
///
/// Implementations must give read-your-write consistency per key and must
/// treat a repeated `revoke` of the same hash as a no-op.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record `token_hash` as revoked until `expires_at` (Unix seconds).
    async fn revoke(&self, token_hash: &str, expires_at: u64) -> Result<()>;

    /// Whether `token_hash` has a revocation entry.
    async fn is_revoked(&self, token_hash: &str) -> Result<bool>;

    /// Remove entries with `expires_at <= now`. Returns how many were removed.
    async fn sweep_expired(&self, now: u64) -> Result<u64>;

    /// Number of live entries (diagnostics).
    async fn count(&self) -> Result<u64>;
}

/// Hash a token for use as a revocation key (SHA-256, hex).
/// Tokens are high-entropy, so a single unsalted pass is enough.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// In-process revocation store.
#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    /// token_hash -> expires_at
    entries: Mutex<HashMap<String, u64>>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, token_hash: &str, expires_at: u64) -> Result<()> {
        self.entries
            .lock()
            .entry(token_hash.to_owned())
            .or_insert(expires_at);
        Ok(())
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool> {
        Ok(self.entries.lock().contains_key(token_hash))
    }

    async fn sweep_expired(&self, now: u64) -> Result<u64> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.lock().len() as u64)
    }
}

/// Spawn a background task that sweeps `store` every `interval`.
pub fn spawn_sweeper(
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.sweep_expired(clock.now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Swept expired revocation entries"),
                Err(e) => tracing::warn!("Revocation sweep failed: {e}"),
            }
        }
    })
}
