use std::path::PathBuf;
use std::sync::Arc;

use amsd::api;
use amsd::engine::Engine;
use amsd::entries::EntryStore;
use amsd::entries::ENTRIES_FILE;
use amsd::integrations::ams::FlowManager;
use amsd::integrations::ams::HttpBackend;
use amsd::integrations::ams::PrinterBackend;
use amsd::integrations::ams::DOMAIN;
use amsd::Config;
use anyhow::Context;
use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Bambu AMS printer monitoring daemon
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "amsd.toml")]
    config: PathBuf,

    /// Directory for durable state, overrides `system.state_dir`
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(state_dir) = args.state_dir {
        config.system.state_dir = state_dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.logging.filter_directives()))
        .init();

    tracing::info!("amsd starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let entries_path = config.system.state_dir.join(ENTRIES_FILE);
    let store = EntryStore::open(DOMAIN, &entries_path)
        .with_context(|| format!("Failed to open {}", entries_path.display()))?;
    tracing::info!(
        "Loaded {} config entries from {}",
        store.entries().len(),
        entries_path.display()
    );

    let engine = Arc::new(Engine::new());
    engine.register_integrations_from_config(&config, store.entries());

    let timeout = config
        .integrations
        .ams_monitoring
        .clone()
        .unwrap_or_default()
        .request_timeout();
    let backend: Arc<dyn PrinterBackend> =
        Arc::new(HttpBackend::new(timeout).context("Failed to create backend client")?);
    let flows = Arc::new(FlowManager::new(backend, Arc::new(Mutex::new(store))));

    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                tracing::error!("Engine stopped: {}", e);
            }
        })
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let state = Arc::new(api::AppState::new(engine.clone(), flows));
    let listen = config.api.listen.clone();
    let port = config.api.port;
    let api_task = tokio::spawn(async move { api::serve(&listen, port, state, shutdown_rx).await });

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            tracing::info!("Received ctrl-c, shutting down");
        }
        res = api_task => {
            // The API only returns on its own when it fails to start.
            res.context("API task panicked")??;
        }
    }

    let _ = shutdown_tx.send(());
    engine.shutdown().await;
    engine_task.abort();

    tracing::info!("amsd stopped");
    Ok(())
}
