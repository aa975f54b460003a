//! MarketScan Screener - market-wide A-share screening service.
//!
//! Serves buy/watch short-lists built from a multi-source market snapshot.

use anyhow::Result;
use marketscan_common::config_loader::check_modular_files;
use marketscan_common::logging::init_logging;
use marketscan_common::validation::load_and_validate;
use marketscan_screener::ScreenerService;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    // Invalid configuration is fatal: the error propagates and the exit code is non-zero
    let config = load_and_validate()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("MarketScan Screener v{}", env!("CARGO_PKG_VERSION"));
    for (file, present) in check_modular_files(None) {
        tracing::debug!(file = %file, present, "Config file");
    }

    let service = ScreenerService::new(config)?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
