//! Sentinel Agent binary
//!
//! Loads the agent config (writing the defaults on first run), then streams
//! metrics to HQ until Ctrl-C.

use anyhow::{Context, Result};
use sentinel_agent::{AgentConfig, BatchAssembler, GrpcTransport, Sender, SenderSettings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentinel_agent=info")),
        )
        .init();

    info!("Sentinel Agent starting...");

    let config = AgentConfig::load().await.context("Failed to load agent config")?;
    if AgentConfig::is_first_time_setup() {
        let path = AgentConfig::config_file_path()?;
        match config.save_to(&path).await {
            Ok(()) => info!("Wrote default config to {}", path.display()),
            Err(e) => warn!("Could not write default config to {}: {}", path.display(), e),
        }
    }

    let assembler = BatchAssembler::from_config(&config);
    info!(
        "Reporting as '{}' to {} every {:?}",
        assembler.source_id(),
        config.hq_endpoint(),
        config.collection_interval()
    );

    let transport = GrpcTransport::new(config.hq_endpoint(), config.connect_timeout());
    let sender = Sender::new(transport, assembler, SenderSettings::from_config(&config));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Shutdown requested");
        on_signal.cancel();
    });

    let stats = sender.run(cancel).await;
    info!(
        "Sentinel Agent stopped ({} connect attempt(s), {} batch(es) sent)",
        stats.connect_attempts, stats.batches_sent
    );
    Ok(())
}
