//! HTTP/WebSocket bootstrap: the carrier's `/voice` webhook, the `/call_mom`
//! outbound trigger, and the `/stream` media websocket.

use crate::config::Config;
use crate::twilio;
use crate::voice::session;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
struct CallMomQuery {
    token: Option<String>,
}

/// Build the router: `POST /voice` (TwiML callback), `POST /call_mom`
/// (outbound trigger), `GET /stream` (carrier media websocket upgrade).
pub fn router(config: Arc<Config>) -> Router {
    let state = AppState { config };
    Router::new()
        .route("/voice", post(voice_handler))
        .route("/call_mom", post(call_mom_handler))
        .route("/stream", get(stream_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn voice_handler(State(state): State<AppState>) -> Response {
    let xml = twilio::voice_twiml(&state.config.public_base_url);
    ([("content-type", "text/xml")], xml).into_response()
}

async fn call_mom_handler(State(state): State<AppState>, Query(q): Query<CallMomQuery>) -> Response {
    let expected = state.config.call_trigger_token.trim();
    if !expected.is_empty() && q.token.as_deref() != Some(expected) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }

    match twilio::create_outbound_call(&state.config).await {
        Ok((sid, status)) => {
            tracing::info!(sid = %sid, status = %status, "outbound call placed");
            (StatusCode::OK, format!("call placed: {sid} ({status})")).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to place outbound call");
            (StatusCode::BAD_GATEWAY, format!("call failed: {e}")).into_response()
        }
    }
}

async fn stream_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let config = state.config.clone();
    ws.on_upgrade(move |socket| session::run(socket, config))
}

/// Bind and serve. Plain HTTP: TLS termination is expected to happen at a
/// reverse proxy in front of this process.
pub async fn start(host: &str, port: u16, config: Arc<Config>) -> Result<()> {
    let app = router(config);
    let addr: SocketAddr = format!("{host}:{port}").parse().context("invalid bind address")?;
    tracing::info!(%addr, "voice bridge listening");
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind")?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_without_panicking() {
        let cfg = Arc::new(Config::from_env());
        let _ = router(cfg);
    }
}
