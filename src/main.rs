use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notekeep::auth::{Clock, RevocationStore, SqliteRevocationStore, SystemClock};
use notekeep::{gateway, logging, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "notekeep",
    about = "Minimal note-taking backend with revocable bearer sessions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Path to a config file (defaults to the platform config dir)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },

    /// Remove expired entries from the persistent revocation store and exit
    Sweep {
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Print the JSON Schema of the config file
    ConfigSchema,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, host, port } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            gateway::run_gateway(config).await
        }
        Command::Sweep { config } => {
            let config = Config::load(config.as_deref())?;
            let path = config.storage.data_dir.join("revocations.db");
            if !path.exists() {
                println!("No revocation store at {}", path.display());
                return Ok(());
            }
            let store = SqliteRevocationStore::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let removed = store.sweep_expired(SystemClock.now()).await?;
            let remaining = store.count().await?;
            println!("Removed {removed} expired revocation entries ({remaining} remaining)");
            Ok(())
        }
        Command::ConfigSchema => {
            println!("{}", Config::json_schema()?);
            Ok(())
        }
    }
}
