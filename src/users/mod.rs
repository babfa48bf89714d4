//! Registered principals: username/password accounts.
//!
//! Password hashing uses PBKDF2-HMAC-SHA256 with a per-user random salt.
//! The session core only ever reads a user's `id`.

pub mod store;

pub use store::{User, UserStore};
