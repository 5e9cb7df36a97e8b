use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use depot::auth::{CredentialStore, PermissionResolver};
use depot::config::ServerConfig;
use depot::index::PackageIndex;
use depot::proxy::ProxyFederator;
use depot::server::{AppState, create_router};
use depot::store::{SqliteStore, Store};

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "A self-hostable Python package registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Path to the TOML configuration file
        #[arg(long, short, default_value = "depot.toml")]
        config: PathBuf,

        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured bind port
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("depot=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config = if config.exists() {
                ServerConfig::load(&config)
                    .with_context(|| format!("failed to load {}", config.display()))?
            } else {
                info!(
                    "No configuration file at {}, using defaults",
                    config.display()
                );
                ServerConfig::default()
            };
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }

            fs::create_dir_all(&config.data_dir)?;
            let store = Arc::new(SqliteStore::new(config.db_path())?);
            store.initialize()?;

            if config.auth.enabled && !config.admin.enabled && store.list_users()?.is_empty() {
                tracing::warn!(
                    "No users exist and the admin account is disabled; enable [admin] in the configuration to manage accounts"
                );
            }

            let state = Arc::new(AppState {
                credentials: CredentialStore::new(store.clone(), config.admin.clone()),
                resolver: PermissionResolver::new(store.clone()),
                index: PackageIndex::new(&config.data_dir),
                federator: ProxyFederator::new(config.sorted_mirrors())?,
                store,
                config,
            });

            let app = create_router(state.clone());
            let addr = state.config.socket_addr()?;

            info!("Starting server on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
