use std::path::Path;

use rust_alert_trader::{config::AppConfig, runtime};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    // Load Configuration
    let path = std::env::var("ALERT_TRADER_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = if Path::new(&path).exists() {
        AppConfig::load(&path)?
    } else {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        config
    };

    // Setup Logging (RUST_LOG wins over the config file)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Alert Trader...");
    if Path::new(&path).exists() {
        info!("Loaded configuration from {}", path);
    } else {
        info!("ℹ️ {} not found - using defaults plus environment overrides", path);
    }
    info!(
        "Broker: {} | parsers: {:?} | channels: {:?}",
        config.broker.broker_type, config.parser.formats, config.listener.channel_ids
    );

    runtime::run(config).await?;

    Ok(())
}
