//! frontgridd — the FrontGrid daemon.
//!
//! Single binary that assembles the FrontGrid control plane:
//! - State store (redb) with its change feed
//! - View synchronizer consuming the change feed
//! - Rollout orchestrator + local step executor
//! - Admin and consumer REST API
//!
//! # Usage
//!
//! ```text
//! frontgridd serve --config /etc/frontgrid/frontgrid.toml --port 8443
//! frontgridd config
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use frontgrid_api::{ApiState, build_router};
use frontgrid_core::FrontgridConfig;
use frontgrid_rollout::{DeploymentOrchestrator, LocalRolloutExecutor};
use frontgrid_state::{StateStore, change_feed};
use frontgrid_sync::ViewSynchronizer;

#[derive(Parser)]
#[command(name = "frontgridd", about = "FrontGrid micro-frontend delivery daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane (store, synchronizer, executor, API).
    Serve {
        /// Path to frontgrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,frontgridd=debug,frontgrid=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.store.data_dir = data_dir;
            }
            run_serve(config).await
        }
        Command::Config { config } => {
            print!("{}", load_config(config.as_deref())?.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<FrontgridConfig> {
    match path {
        Some(path) => FrontgridConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(FrontgridConfig::default()),
    }
}

async fn run_serve(config: FrontgridConfig) -> anyhow::Result<()> {
    info!("FrontGrid daemon starting");

    std::fs::create_dir_all(&config.store.data_dir)
        .with_context(|| format!("failed to create {}", config.store.data_dir.display()))?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let (change_tx, change_rx) = change_feed();
    let store = StateStore::open(&db_path)?.with_change_feed(change_tx);
    info!(path = ?db_path, "state store opened");

    // Changes queued at the last exit were lost with the process.
    let synchronizer = ViewSynchronizer::new(store.clone());
    synchronizer
        .reconcile()
        .context("failed to reconcile consumer views")?;

    let executor = Arc::new(LocalRolloutExecutor::new(store.clone()));
    let orchestrator = DeploymentOrchestrator::new(store.clone(), executor.clone());
    match orchestrator.resume_in_flight().await {
        Ok(resumed) => info!(resumed, "in-flight deployments resumed"),
        Err(e) => warn!(error = %e, "failed to resume in-flight deployments"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sync_handle = tokio::spawn(synchronizer.run(change_rx, shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState::new(store, orchestrator, &config));
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    });

    server.await?;

    // Writers stop first so the synchronizer drains every queued change.
    executor.stop_all().await;
    let _ = shutdown_tx.send(true);
    let _ = sync_handle.await;

    info!("FrontGrid daemon stopped");
    Ok(())
}
