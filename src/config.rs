//! Configuration: TOML file plus environment overrides.
//!
//! Lookup order for the file: `--config` path if given, otherwise
//! `<config dir>/notekeep/config.toml` when it exists, otherwise defaults.
//! Environment variables take priority over file values.

use crate::auth::token::{DEFAULT_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS};
use crate::auth::verifier::DEFAULT_LOOKUP_TIMEOUT_MS;
use crate::auth::{AuthError, SigningKey};
use crate::users::store::DEFAULT_HASH_ITERATIONS;
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const ENV_SIGNING_SECRET: &str = "NOTEKEEP_SIGNING_SECRET";
pub const ENV_DATA_DIR: &str = "NOTEKEEP_DATA_DIR";
pub const ENV_HOST: &str = "NOTEKEEP_HOST";
pub const ENV_PORT: &str = "NOTEKEEP_PORT";

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Where revoked tokens are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RevocationBackend {
    /// `revocations.db` under the data dir; survives restarts.
    #[default]
    Sqlite,
    /// Process memory; logouts are forgotten on restart.
    Memory,
}

#[derive(Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing secret for session tokens. Required.
    pub signing_secret: Option<String>,
    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Upper bound on a revocation store call before the request fails closed.
    pub revocation_timeout_ms: u64,
    /// Interval of the background revocation sweep (0 = disabled).
    pub sweep_interval_secs: u64,
    pub revocation_backend: RevocationBackend,
    /// Whether new user registration is allowed.
    pub allow_registration: bool,
    /// Maximum registered users (0 = unlimited).
    pub max_users: u64,
    /// PBKDF2 rounds for password hashing.
    pub password_hash_iterations: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            revocation_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
            sweep_interval_secs: 300,
            revocation_backend: RevocationBackend::default(),
            allow_registration: true,
            max_users: 0,
            password_hash_iterations: DEFAULT_HASH_ITERATIONS,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("revocation_timeout_ms", &self.revocation_timeout_ms)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("revocation_backend", &self.revocation_backend)
            .field("allow_registration", &self.allow_registration)
            .field("max_users", &self.max_users)
            .field("password_hash_iterations", &self.password_hash_iterations)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `users.db`, `notes.db` and `revocations.db`.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("", "", "notekeep")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"));
        Self { data_dir }
    }
}

impl Config {
    /// Load from `path` (must exist) or the default location, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` in
    /// production; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        // Secrets are taken verbatim; only blank values are skipped.
        if let Some(secret) = lookup(ENV_SIGNING_SECRET).filter(|v| !v.trim().is_empty()) {
            self.auth.signing_secret = Some(secret);
        }
        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(host) = non_empty(ENV_HOST) {
            self.gateway.host = host;
        }
        if let Some(port) = non_empty(ENV_PORT) {
            self.gateway.port = port
                .parse()
                .with_context(|| format!("{ENV_PORT} is not a valid port: {port}"))?;
        }
        Ok(())
    }

    /// Reject configurations the server must not start with.
    pub fn validate(&self) -> Result<()> {
        self.signing_key()?;
        if self.auth.token_ttl_secs == 0 {
            bail!("auth.token_ttl_secs must be greater than zero");
        }
        if self.auth.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            bail!("auth.token_ttl_secs must not exceed {MAX_TOKEN_TTL_SECS}");
        }
        if self.auth.revocation_timeout_ms == 0 {
            bail!("auth.revocation_timeout_ms must be greater than zero");
        }
        if self.auth.password_hash_iterations == 0 {
            bail!("auth.password_hash_iterations must be greater than zero");
        }
        Ok(())
    }

    pub fn signing_key(&self) -> Result<SigningKey, AuthError> {
        SigningKey::from_config(self.auth.signing_secret.as_deref())
    }

    /// JSON Schema of the config file.
    pub fn json_schema() -> Result<String> {
        Ok(serde_json::to_string_pretty(&schemars::schema_for!(Config))?)
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "notekeep").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.auth.token_ttl_secs, 3600);
        assert_eq!(config.auth.revocation_backend, RevocationBackend::Sqlite);
        assert!(config.auth.allow_registration);
    }

    #[test]
    fn missing_secret_fails_validation() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing secret"));
    }

    #[test]
    fn empty_secret_fails_validation() {
        let mut config = Config::default();
        config.auth.signing_secret = Some("   ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ttl_fails_validation() {
        let mut config = Config::default();
        config.auth.signing_secret = Some("secret".into());
        config.auth.token_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unbounded_ttl_fails_validation() {
        let mut config = Config::default();
        config.auth.signing_secret = Some("secret".into());

        config.auth.token_ttl_secs = MAX_TOKEN_TTL_SECS;
        assert!(config.validate().is_ok());

        config.auth.token_ttl_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("token_ttl_secs"));
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [auth]
            signing_secret = "from-file"
            token_ttl_secs = 900
            revocation_backend = "memory"

            [gateway]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.signing_secret.as_deref(), Some("from-file"));
        assert_eq!(config.auth.token_ttl_secs, 900);
        assert_eq!(config.auth.revocation_backend, RevocationBackend::Memory);
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_take_priority() {
        let mut config = Config::default();
        config.auth.signing_secret = Some("from-file".into());

        config
            .apply_env_overrides(env(&[
                (ENV_SIGNING_SECRET, "from-env"),
                (ENV_PORT, "9090"),
                (ENV_DATA_DIR, "/tmp/notekeep"),
                (ENV_HOST, "  "),
            ]))
            .unwrap();

        assert_eq!(config.auth.signing_secret.as_deref(), Some("from-env"));
        assert_eq!(config.gateway.port, 9090);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/notekeep"));
        // Blank values are ignored.
        assert_eq!(config.gateway.host, "127.0.0.1");
    }

    #[test]
    fn env_secret_is_not_trimmed() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[(ENV_SIGNING_SECRET, " padded ")]))
            .unwrap();
        assert_eq!(config.auth.signing_secret.as_deref(), Some(" padded "));
    }

    #[test]
    fn invalid_env_port_is_an_error() {
        let mut config = Config::default();
        assert!(config
            .apply_env_overrides(env(&[(ENV_PORT, "not-a-port")]))
            .is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[auth]\nsigning_secret = \"s3cret\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.auth.signing_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let mut config = Config::default();
        config.auth.signing_secret = Some("hunter2".into());
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn schema_mentions_auth_section() {
        let schema = Config::json_schema().unwrap();
        assert!(schema.contains("signing_secret"));
    }
}
