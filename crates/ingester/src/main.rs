use tickvault_ingester::{Ingester, load_config, load_default_config};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => load_default_config()?,
    };
    config.validate()?;

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("tickvault=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    tracing::info!("Starting tickvault ingester...");

    let ingester = Ingester::from_config(&config)?;
    ingester.start()?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutdown requested");
        }
        _ = ingester.wait() => {}
    }
    ingester.stop().await;

    let stats = ingester.stats();
    tracing::info!(
        delivered = stats.pipeline.delivered,
        backfilled = stats.pipeline.backfilled,
        gaps_detected = stats.pipeline.gaps_detected,
        unrecoverable_gaps = stats.pipeline.unrecoverable_gaps,
        reconnects = stats.connection.reconnects,
        "Ingester stopped"
    );
    for (key, metrics) in &stats.per_key {
        tracing::info!(
            key = %key,
            delivered = metrics.delivered,
            last_sequence = metrics.last_sequence,
            "Final position"
        );
    }

    Ok(())
}
