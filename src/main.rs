mod app;
mod bot;
mod cache;
mod config;
mod db;
mod delivery;
mod models;
mod schedule;
mod telemetry;
mod util;

use anyhow::Result;
use tracing::info;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
  telemetry::init()?;
  let config_path = AppConfig::path_from_env();
  let config = AppConfig::load(&config_path)?;
  info!(
    environment = %config.telegram.environment,
    config = %config_path.display(),
    "starting shelter trip bot"
  );

  let app = app::App::new(config, config_path).await?;
  app.run().await
}
