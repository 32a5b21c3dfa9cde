//! Zapline — scheduled and bulk WhatsApp message dispatch service.
//!
//! Wires the pieces together: config, schedule store, WhatsApp transport,
//! background dispatcher, and the HTTP gateway.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zapline_core::config::ZaplineConfig;
use zapline_core::transport::Transport;
use zapline_engine::{DispatchEngine, run_dispatcher};
use zapline_gateway::AppState;
use zapline_store::ScheduleStore;
use zapline_transport::WhatsAppTransport;

#[derive(Parser, Debug)]
#[command(name = "zapline", version, about = "WhatsApp message scheduler")]
struct Cli {
    /// Config file path (default: ~/.zapline/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Schedule database path (default: ~/.zapline/schedules.db)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ZaplineConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ZaplineConfig::load().context("loading config")?,
    };

    let db_path = cli.db.unwrap_or_else(ZaplineConfig::default_db_path);
    let store = Arc::new(
        ScheduleStore::open(&db_path)
            .with_context(|| format!("opening schedule store at {}", db_path.display()))?,
    );

    let transport: Arc<dyn Transport> =
        Arc::new(WhatsAppTransport::new(config.whatsapp.clone()));
    if let Err(e) = transport.verify().await {
        // The admin API stays useful without working credentials; dispatch
        // attempts will fail and be retried/terminalized per policy.
        tracing::warn!(error = %e, "transport verification failed");
    }

    let engine = Arc::new(DispatchEngine::new(
        store.clone(),
        transport.clone(),
        config.engine.clone(),
    ));
    tokio::spawn(run_dispatcher(engine));

    let state = Arc::new(AppState::new(store, transport, config));
    zapline_gateway::run(state).await.context("gateway server")?;
    Ok(())
}
