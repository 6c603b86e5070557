//! Voice-duplex — conversational voice-I/O server.
//!
//! Mediates between a local TTS engine, a local microphone, and an external
//! streaming speech-recognition service over a loopback-only HTTP API.

mod aec;
mod audio;
mod bargein;
mod capture_session;
mod config;
mod coordinator;
mod echo_filter;
mod error;
mod http;
mod recognizer;
mod state_file;
mod tts;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use audio::ServerState;
use config::paths::get_data_dir;
use config::Config;
use coordinator::SessionCoordinator;

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let data_dir = get_data_dir();
    let use_file = std::fs::create_dir_all(&data_dir).is_ok();

    let _guard: Option<tracing_appender::non_blocking::WorkerGuard>;
    if use_file {
        let file_appender = tracing_appender::rolling::never(&data_dir, "voice-duplex.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _guard = Some(guard);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();
    } else {
        _guard = None;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("voice-duplex starting");

    let config = Arc::new(Config::from_env());
    let state = Arc::new(ServerState::new());
    let coordinator = Arc::new(SessionCoordinator::new(config.clone(), state, &data_dir));

    if let Err(e) = http::serve(&config, coordinator).await {
        tracing::error!(error = %e, "audio server exited with error");
        std::process::exit(1);
    }
}
