use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::info;

use hls_relay::{AppConfig, Logger, RelayApplicationServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards are kept alive to flush logs and keep the sentry client around
    let _guards = Logger::init(&config);

    info!(
        "logger and env prepped, starting relay on {}...",
        config.listen_address()
    );

    RelayApplicationServer::serve(config)
        .await
        .context("relay server failed to start")?;

    Ok(())
}
