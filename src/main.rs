//! # Chat Gateway
//!
//! Real-time event gateway for a Discord-compatible chat server.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - WebSocket gateway, heartbeat monitor and internal HTTP API

use anyhow::Result;
use tracing::info;

use chat_gateway::config::Settings;
use chat_gateway::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    chat_gateway::telemetry::init_tracing();

    info!("Starting Chat Gateway...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        heartbeat_interval_ms = settings.gateway.heartbeat_interval_ms,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Gateway ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
