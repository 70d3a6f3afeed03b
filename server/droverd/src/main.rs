//! Drover orchestrator daemon.
//!
//! Startup order matters: broker first (fatal on failure), then the engine
//! wired as the broker's response handler, then the HTTP listener (fatal on
//! bind failure).

use anyhow::{Context, Result};
use clap::Parser;
use drover_broker::BrokerClient;
use drover_config::BrokerConfig;
use drover_ocr::{ExtractorManager, PaddleExtractor, TesseractExtractor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use droverd::catalog::ScriptCatalog;
use droverd::engine::ScriptEngine;
use droverd::http::{router, AppState};
use droverd::persistence::ExecutionStore;

#[derive(Parser, Debug)]
#[command(name = "droverd", version, about = "Drover fleet automation orchestrator")]
struct Args {
    /// HTTP bind address.
    #[arg(long, default_value = "0.0.0.0:8080", env = "DROVER_HTTP_ADDR")]
    http_addr: String,

    /// Directory for persisted execution records.
    #[arg(long, default_value = "./data/executions", env = "DROVER_DATA_DIR")]
    data_dir: PathBuf,

    /// Dotfile consulted for MQTT settings after the environment.
    #[arg(long, default_value = ".env", env = "DROVER_ENV_FILE")]
    env_file: PathBuf,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting droverd");

    let broker_config = BrokerConfig::load_from(&args.env_file);
    let broker = Arc::new(
        BrokerClient::connect(&broker_config)
            .await
            .context("Failed to connect to MQTT broker")?,
    );

    let catalog = Arc::new(ScriptCatalog::with_builtin_scripts());
    info!(scripts = catalog.len(), "Script catalog ready");

    let ocr = Arc::new(ExtractorManager::new());
    ocr.register(Arc::new(TesseractExtractor::new()));
    ocr.register(Arc::new(PaddleExtractor::new()));
    info!(engines = ?ocr.engines(), default = ?ocr.default_engine(), "Text extractors ready");

    let store = ExecutionStore::new(&args.data_dir);
    let engine = Arc::new(ScriptEngine::new(
        broker.clone(),
        catalog,
        Arc::clone(&ocr),
        store,
    ));
    let restored = engine.load_history().await;
    info!(restored, "Execution history restored");
    engine.start_retention_sweep();

    broker.set_response_handler(engine.clone());

    let state = Arc::new(AppState {
        engine,
        ocr,
    });
    let listener = tokio::net::TcpListener::bind(&args.http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", args.http_addr))?;
    info!(addr = %args.http_addr, "HTTP listener ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    broker.disconnect().await;
    Ok(())
}
