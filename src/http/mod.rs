//! HTTP API layer: a thin axum router exposing the eight loopback
//! endpoints. No business logic lives here — handlers translate requests
//! into `SessionCoordinator` calls and coordinator results into JSON.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::coordinator::SessionCoordinator;

pub fn create_router(coordinator: Arc<SessionCoordinator>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/listen", get(listen))
        .route("/queue-listen", post(queue_listen))
        .route("/speak", post(speak))
        .route("/mute", post(mute))
        .route("/unmute", post(unmute))
        .route("/voice", post(set_voice))
        .route("/stop", post(stop))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

/// Bind the router to loopback on `config.audio_server_port` and serve
/// until the process exits. Every route is reachable only from localhost.
pub async fn serve(config: &Config, coordinator: Arc<SessionCoordinator>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.audio_server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "audio server listening");
    axum::serve(listener, create_router(coordinator)).await
}

#[derive(Serialize)]
struct StatusResponse {
    state: String,
    muted: bool,
    input_device: Option<String>,
}

async fn status(State(coord): State<Arc<SessionCoordinator>>) -> impl IntoResponse {
    Json(StatusResponse {
        state: coord.status().to_string(),
        muted: coord.server_state().muted(),
        input_device: coord.input_device(),
    })
}

#[derive(Serialize)]
struct TextResponse {
    text: String,
}

async fn listen(State(coord): State<Arc<SessionCoordinator>>) -> impl IntoResponse {
    let text = coord.listen().await;
    Json(TextResponse { text })
}

#[derive(Serialize)]
struct StatusOnly {
    status: String,
}

async fn queue_listen(State(coord): State<Arc<SessionCoordinator>>) -> impl IntoResponse {
    coord.queue_listen().await;
    Json(StatusOnly {
        status: "ok".to_string(),
    })
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
}

async fn speak(
    State(coord): State<Arc<SessionCoordinator>>,
    Json(req): Json<SpeakRequest>,
) -> impl IntoResponse {
    let text = coord.speak(&req.text).await;
    Json(TextResponse { text })
}

async fn mute(State(coord): State<Arc<SessionCoordinator>>) -> impl IntoResponse {
    coord.mute();
    Json(StatusOnly {
        status: "muted".to_string(),
    })
}

async fn unmute(State(coord): State<Arc<SessionCoordinator>>) -> impl IntoResponse {
    coord.unmute();
    Json(StatusOnly {
        status: "unmuted".to_string(),
    })
}

#[derive(Deserialize)]
struct VoiceRequest {
    voice: String,
}

#[derive(Serialize)]
struct VoiceResponse {
    voice: String,
}

async fn set_voice(
    State(coord): State<Arc<SessionCoordinator>>,
    Json(req): Json<VoiceRequest>,
) -> impl IntoResponse {
    coord.set_voice(req.voice.clone());
    Json(VoiceResponse { voice: req.voice })
}

async fn stop(State(_coord): State<Arc<SessionCoordinator>>) -> impl IntoResponse {
    info!("stop requested, exiting in 1s");
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        std::process::exit(0);
    });
    Json(StatusOnly {
        status: "shutting down".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ServerState;

    #[test]
    fn router_builds() {
        let config = Arc::new(Config::from_env());
        let state = Arc::new(ServerState::new());
        let dir = std::env::temp_dir().join("voice-duplex-http-test");
        let coordinator = Arc::new(SessionCoordinator::new(config, state, &dir));
        let _ = create_router(coordinator);
    }
}
