//! Voice Bridge - Real-time Telephony Voice Agent
//!
//! Binds an HTTP/WebSocket server exposing `/voice`, `/call_mom`, and
//! `/stream` for a telephony carrier's media-streaming integration.

use std::sync::Arc;
use voice_bridge::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let config = Arc::new(Config::from_env());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(5000);

    voice_bridge::server::start(&host, port, config).await
}
