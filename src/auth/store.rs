//! SQLite-backed revocation store.
//!
//! Tables:
//! - `revoked_tokens`: token_hash (primary key), expires_at, revoked_at
//!
//! Lookups run on an r2d2 pool so WAL-mode reads from concurrent requests
//! do not queue behind one connection. Every call is moved onto the
//! blocking thread pool.

use super::revocation::RevocationStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Pooled connections. Writes are still serialised by SQLite's page lock.
const POOL_SIZE: u32 = 8;

/// How long a caller waits for a free pooled connection.
const POOL_CHECKOUT_TIMEOUT_SECS: u64 = 5;

/// Durable revocation list.
#[derive(Clone)]
pub struct SqliteRevocationStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteRevocationStore {
    /// Open (or create) the revocation database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA busy_timeout = 5000;
                 PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )
        });
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .connection_timeout(Duration::from_secs(POOL_CHECKOUT_TIMEOUT_SECS))
            .build(manager)
            .with_context(|| {
                format!("Failed to open revocation store at {}", db_path.display())
            })?;

        pool.get()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS revoked_tokens (
                token_hash TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL,
                revoked_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_revoked_tokens_expires ON revoked_tokens(expires_at);",
        )?;

        Ok(Self { pool })
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let conn = pool.get().context("Revocation store connection unavailable")?;
            Ok(op(&conn)?)
        })
        .await?
    }
}

#[async_trait]
impl RevocationStore for SqliteRevocationStore {
    async fn revoke(&self, token_hash: &str, expires_at: u64) -> Result<()> {
        let expires_at = to_sql_secs(expires_at)?;
        let token_hash = token_hash.to_owned();
        let revoked_at = epoch_secs();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO revoked_tokens (token_hash, expires_at, revoked_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![token_hash, expires_at, revoked_at],
            )
        })
        .await?;
        Ok(())
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool> {
        let token_hash = token_hash.to_owned();
        self.run(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE token_hash = ?1)",
                rusqlite::params![token_hash],
                |row| row.get::<_, bool>(0),
            )
        })
        .await
    }

    async fn sweep_expired(&self, now: u64) -> Result<u64> {
        let now = to_sql_secs(now)?;
        let deleted = self
            .run(move |conn| {
                conn.execute(
                    "DELETE FROM revoked_tokens WHERE expires_at <= ?1",
                    rusqlite::params![now],
                )
            })
            .await?;
        Ok(deleted as u64)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = self
            .run(|conn| conn.query_row("SELECT COUNT(*) FROM revoked_tokens", [], |row| row.get(0)))
            .await?;
        Ok(count as u64)
    }
}

/// Unix seconds as a SQLite INTEGER. Refuses values that would wrap.
fn to_sql_secs(secs: u64) -> Result<i64> {
    i64::try_from(secs).with_context(|| format!("Timestamp {secs} is out of range"))
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ── Tests ───────────────────────────────────────────────────────────
