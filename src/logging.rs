use anyhow::{Context, Result};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "notekeep=info";

/// Initialize the global tracing subscriber.
///
/// The level is controlled with `RUST_LOG`, e.g. `RUST_LOG=notekeep=debug`
/// to see why individual requests were rejected by the session gate.
pub fn init() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(ChronoUtc::rfc_3339())
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to initialize tracing subscriber")
}
