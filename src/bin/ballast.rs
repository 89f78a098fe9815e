//! Operator utility: tail cluster state snapshots from the configured store.

use ballast::store::HealthEvent;
use ballast::{BackendRegistry, Config, StateStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ballast")]
#[command(about = "ballast cluster state utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail service, destination, and check snapshots from the store
    Watch {
        /// Store address, e.g. consul://127.0.0.1:8500 or etcd://127.0.0.1:2379
        #[arg(long)]
        store: Option<String>,

        /// Key namespace
        #[arg(long)]
        prefix: Option<String>,

        /// Config file path (defaults to ./ballast.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            store,
            prefix,
            config,
        } => {
            // File/env config first; CLI flags take priority.
            let mut config = Config::load(config.as_deref())?;
            if let Some(store) = store {
                config.store_address = store;
            }
            if let Some(prefix) = prefix {
                config.store_prefix = prefix;
            }
            watch(config).await
        }
    }
}

async fn watch(config: Config) -> anyhow::Result<()> {
    let registry = BackendRegistry::defaults();
    let state = StateStore::connect(&registry, &config).await?;

    let (svc_tx, mut svc_rx) = mpsc::channel(config.watch.subscriber_queue);
    let (dst_tx, mut dst_rx) = mpsc::channel(config.watch.subscriber_queue);
    let (chk_tx, mut chk_rx) = mpsc::channel(config.watch.subscriber_queue);
    state.subscribe_services(svc_tx).await;
    state.subscribe_destinations(dst_tx).await;
    state.subscribe_checks(chk_tx).await;

    let mut health = state.health_events();
    let handles = state.spawn_watchers();

    tracing::info!(
        "watching {} under {}/",
        config.store_address,
        config.store_prefix
    );

    loop {
        tokio::select! {
            Some(services) = svc_rx.recv() => {
                tracing::info!("services: {}", serde_json::to_string(&services)?);
            }
            Some(destinations) = dst_rx.recv() => {
                tracing::info!("destinations: {}", serde_json::to_string(&destinations)?);
            }
            Some(checks) = chk_rx.recv() => {
                tracing::info!("checks: {}", serde_json::to_string(&checks)?);
            }
            event = health.recv() => {
                if let Ok(HealthEvent { kind, state }) = event {
                    tracing::info!("{} watch: {:?}", kind, state);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("shutting down");
    state.shutdown();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
