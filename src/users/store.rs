//! SQLite-backed principal store.
//!
//! Tables:
//! - `users`: id, username, display_name, password_hash, salt, created_at

use anyhow::{bail, Result};
use parking_lot::Mutex;
use sha2::Sha256;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default PBKDF2-HMAC-SHA256 rounds for password stretching.
pub const DEFAULT_HASH_ITERATIONS: u32 = 100_000;

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Derived key length.
const HASH_BYTES: usize = 32;

/// Maximum username length.
const MAX_USERNAME_LEN: usize = 64;

/// Minimum password length.
const MIN_PASSWORD_LEN: usize = 8;

/// A registered user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: i64,
}

/// SQLite-backed user store.
pub struct UserStore {
    conn: Mutex<rusqlite::Connection>,
    hash_iterations: u32,
    /// Maximum registered users (0 = unlimited).
    max_users: u64,
}

impl UserStore {
    /// Open (or create) the user database at the given path.
    pub fn new(db_path: &Path, hash_iterations: Option<u32>) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        Self::init(conn, hash_iterations)
    }

    /// In-memory database, used by tests and throwaway instances.
    pub fn in_memory(hash_iterations: Option<u32>) -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?, hash_iterations)
    }

    fn init(conn: rusqlite::Connection, hash_iterations: Option<u32>) -> Result<Self> {
        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                display_name TEXT,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            hash_iterations: hash_iterations.unwrap_or(DEFAULT_HASH_ITERATIONS).max(1),
            max_users: 0,
        })
    }

    /// Cap the number of accounts `register` will create (0 = unlimited).
    pub fn with_user_limit(mut self, max_users: u64) -> Self {
        self.max_users = max_users;
        self
    }

    /// Register a new user. Returns the user ID.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<String> {
        let trimmed = username.trim();
        if trimmed.is_empty() {
            bail!("Username cannot be empty");
        }
        if trimmed.chars().count() > MAX_USERNAME_LEN {
            bail!("Username too long (max {MAX_USERNAME_LEN} characters)");
        }
        if password.len() < MIN_PASSWORD_LEN {
            bail!("Password must be at least {MIN_PASSWORD_LEN} characters");
        }
        let display_name = display_name.map(str::trim).filter(|d| !d.is_empty());

        let user_id = uuid::Uuid::new_v4().to_string();
        let salt = generate_salt();
        let password_hash = hash_password(password, &salt, self.hash_iterations);
        let now = epoch_secs();

        let conn = self.conn.lock();
        // Counted under the same lock as the insert so concurrent
        // registrations cannot overshoot the cap.
        if self.max_users > 0 {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            if count as u64 >= self.max_users {
                bail!("Maximum user limit reached");
            }
        }
        let result = conn.execute(
            "INSERT INTO users (id, username, display_name, password_hash, salt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![user_id, trimmed, display_name, password_hash, salt, now],
        );

        match result {
            Ok(_) => {
                tracing::info!(user_id = %user_id, "User registered");
                Ok(user_id)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("Username '{}' is already taken", trimmed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticate a user by username + password.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let conn = self.conn.lock();
        let row: Result<(String, String, Option<String>, String, String, i64), _> = conn
            .query_row(
                "SELECT id, username, display_name, password_hash, salt, created_at
                 FROM users WHERE username = ?1 COLLATE NOCASE",
                rusqlite::params![username.trim()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            );
        drop(conn);

        match row {
            Ok((id, username, display_name, stored_hash, salt, created_at)) => {
                let attempt_hash = hash_password(password, &salt, self.hash_iterations);
                if !constant_time_eq(stored_hash.as_bytes(), attempt_hash.as_bytes()) {
                    bail!("Invalid username or password");
                }
                Ok(User {
                    id,
                    username,
                    display_name,
                    created_at,
                })
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                // Dummy hash keeps unknown-user timing close to wrong-password timing
                let _ = hash_password(
                    password,
                    "00000000000000000000000000000000",
                    self.hash_iterations,
                );
                bail!("Invalid username or password");
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a user by ID.
    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT id, username, display_name, created_at FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    display_name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        );

        match row {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Count registered users.
    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ── Password Helpers ────────────────────────────────────────────────

/// Generate a random salt (hex-encoded).
fn generate_salt() -> String {
    let bytes: [u8; SALT_BYTES] = rand::random();
    hex::encode(bytes)
}

/// Hash a password with PBKDF2-HMAC-SHA256.
fn hash_password(password: &str, salt: &str, iterations: u32) -> String {
    let mut out = [0u8; HASH_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut out);
    hex::encode(out)
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, UserStore) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("users.db");
        let store = UserStore::new(&db_path, Some(1_000)).unwrap();
        (tmp, store)
    }

    #[test]
    fn register_and_authenticate() {
        let (_tmp, store) = test_store();

        let user_id = store
            .register("test_user", "securepassword123", Some("Test User"))
            .unwrap();
        assert!(!user_id.is_empty());

        let user = store.authenticate("test_user", "securepassword123").unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.username, "test_user");
        assert_eq!(user.display_name.as_deref(), Some("Test User"));
    }

    #[test]
    fn authenticate_is_case_insensitive_on_username() {
        let (_tmp, store) = test_store();

        let user_id = store.register("TestUser", "securepassword123", None).unwrap();
        let user = store.authenticate("testuser", "securepassword123").unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.username, "TestUser");
    }

    #[test]
    fn register_duplicate_username_fails() {
        let (_tmp, store) = test_store();

        store.register("test_user", "password123!", None).unwrap();
        let result = store.register("TEST_USER", "otherpassword1", None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already taken"));
    }

    #[test]
    fn authenticate_wrong_password_fails() {
        let (_tmp, store) = test_store();

        store.register("test_user", "correct_password", None).unwrap();
        let result = store.authenticate("test_user", "wrong_password");
        assert!(result.unwrap_err().to_string().contains("Invalid"));
    }

    #[test]
    fn authenticate_nonexistent_user_fails() {
        let (_tmp, store) = test_store();

        let result = store.authenticate("ghost_user", "anypassword1");
        assert!(result.unwrap_err().to_string().contains("Invalid"));
    }

    #[test]
    fn register_validates_input() {
        let (_tmp, store) = test_store();

        let empty = store.register("   ", "password123!", None);
        assert!(empty.unwrap_err().to_string().contains("empty"));

        let short = store.register("test_user", "short", None);
        assert!(short.unwrap_err().to_string().contains("8 characters"));

        let long = store.register(&"x".repeat(65), "password123!", None);
        assert!(long.unwrap_err().to_string().contains("too long"));
    }

    #[test]
    fn blank_display_name_is_stored_as_none() {
        let (_tmp, store) = test_store();

        let user_id = store.register("test_user", "password123!", Some("  ")).unwrap();
        let user = store.get_user(&user_id).unwrap().unwrap();
        assert!(user.display_name.is_none());
    }

    #[test]
    fn user_count_tracks_registrations() {
        let store = UserStore::in_memory(Some(1_000)).unwrap();

        assert_eq!(store.user_count().unwrap(), 0);
        store.register("user_a", "password123!", None).unwrap();
        assert_eq!(store.user_count().unwrap(), 1);
        store.register("user_b", "password456!", None).unwrap();
        assert_eq!(store.user_count().unwrap(), 2);
    }

    #[test]
    fn user_limit_is_enforced_on_register() {
        let store = UserStore::in_memory(Some(1_000))
            .unwrap()
            .with_user_limit(1);

        store.register("user_a", "password123!", None).unwrap();
        let err = store.register("user_b", "password456!", None).unwrap_err();
        assert!(err.to_string().contains("user limit"));
        assert_eq!(store.user_count().unwrap(), 1);
    }

    #[test]
    fn concurrent_registrations_respect_user_limit() {
        let tmp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(
            UserStore::new(&tmp.path().join("users.db"), Some(1_000))
                .unwrap()
                .with_user_limit(2),
        );

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    store.register(&format!("user_{i}"), "password123!", None)
                })
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();

        assert_eq!(created, 2);
        assert_eq!(store.user_count().unwrap(), 2);
    }

    #[test]
    fn get_user_by_id() {
        let (_tmp, store) = test_store();

        let user_id = store.register("test_user", "securepassword123", None).unwrap();
        let user = store.get_user(&user_id).unwrap();
        assert_eq!(user.unwrap().username, "test_user");

        assert!(store.get_user("nonexistent_id").unwrap().is_none());
    }

    #[test]
    fn password_hash_depends_on_salt_and_rounds() {
        let h1 = hash_password("test_password", "salt_a", 10);
        assert_eq!(h1, hash_password("test_password", "salt_a", 10));
        assert_ne!(h1, hash_password("test_password", "salt_b", 10));
        assert_ne!(h1, hash_password("test_password", "salt_a", 11));
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
