//! Voice Bridge - Real-time Telephony Voice Agent
//!
//! Bridges a carrier's bidirectional media-streaming websocket to a
//! VAD -> ASR -> LLM -> TTS pipeline, with barge-in and a silence watchdog.
//!
//! # Example
//!
//! ```ignore
//! use voice_bridge::config::Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::from_env());
//!     voice_bridge::server::start("0.0.0.0", 5000, config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod twilio;
pub mod voice;

pub use config::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
