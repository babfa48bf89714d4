//! notekeep: a minimal note-taking backend.
//!
//! Users register and log in to receive a signed bearer token; every
//! protected request passes through the session gate, which verifies the
//! token and consults the revocation store so that logout takes effect
//! before the token's natural expiry.

pub mod auth;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod notes;
pub mod users;

pub use config::Config;
