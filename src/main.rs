use heart_failure_models::{Config, Pipeline};
use tracing::{debug, info};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    info!("Loading config from {}", config_path);
    let config = Config::load(&config_path)?;
    debug!(?config, "Config loaded");

    let report = Pipeline::new(config).run()?;
    println!("{}", report);
    Ok(())
}
