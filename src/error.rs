//! Crate-wide error types.
//!
//! Every session-facing error resolves to a sentinel string at the API
//! boundary — the API always returns a 2xx with a `text` field — but this
//! enum exists so internal code can still distinguish failure kinds for
//! logging before that collapse happens.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("failed to open audio device: {0}")]
    DeviceOpenFailed(String),

    #[error("recognizer unreachable at {0}")]
    RecognizerUnreachable(String),

    #[error("recognizer connection lost")]
    RecognizerConnectionLost,

    #[error("failed to spawn TTS process: {0}")]
    TtsSpawnFailed(String),

    #[error("session is muted")]
    Muted,
}

impl VoiceError {
    /// The sentinel string returned to callers in place of a real
    /// transcription, distinguishable from real speech.
    pub fn sentinel(&self) -> &'static str {
        match self {
            VoiceError::DeviceOpenFailed(_) => "",
            VoiceError::RecognizerUnreachable(_) => "(wlk_error)",
            VoiceError::RecognizerConnectionLost => "",
            VoiceError::TtsSpawnFailed(_) => "(silence)",
            VoiceError::Muted => "(muted)",
        }
    }
}
