//! Session coordinator: serializes capture requests, owns the pre-queue
//! buffer, the mute flag, and state-file persistence.

use std::sync::{Arc, Mutex as SyncMutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::audio::{ServerState, Status};
use crate::capture_session::CaptureSession;
use crate::config::Config;
use crate::state_file::StateFileWriter;
use crate::tts::TtsProcess;

/// Fixed TTS invocation (`-v <voice> <text>`), matching the macOS `say`
/// command.
const TTS_BINARY: &str = "say";

const SILENCE_SENTINEL: &str = "(silence)";
const MUTED_SENTINEL: &str = "(muted)";

pub struct SessionCoordinator {
    config: Arc<Config>,
    state: Arc<ServerState>,
    state_file: Arc<StateFileWriter>,
    /// Serializes capture sessions so only one runs at a time.
    session_lock: Arc<AsyncMutex<()>>,
    /// Single-slot result from a pre-queued background capture.
    buffered: Arc<AsyncMutex<Option<String>>>,
    /// The in-flight pre-queued capture, if any, so `speak`/`listen` can
    /// cancel it.
    pending: Arc<AsyncMutex<Option<JoinHandle<()>>>>,
    /// ID of the most recently started session, for state-file `SESSION=`.
    /// `"-"` before any session has run.
    current_session: Arc<SyncMutex<String>>,
    /// Current TTS voice. Mutable at runtime via `/voice`, so it lives
    /// outside the otherwise-immutable `Config`.
    voice: SyncMutex<String>,
}

impl SessionCoordinator {
    pub fn new(config: Arc<Config>, state: Arc<ServerState>, data_dir: &std::path::Path) -> Self {
        let voice = SyncMutex::new(config.voice.clone());
        Self {
            config,
            state,
            state_file: Arc::new(StateFileWriter::new(data_dir)),
            session_lock: Arc::new(AsyncMutex::new(())),
            buffered: Arc::new(AsyncMutex::new(None)),
            pending: Arc::new(AsyncMutex::new(None)),
            current_session: Arc::new(SyncMutex::new("-".to_string())),
            voice,
        }
    }

    pub fn voice(&self) -> String {
        self.voice.lock().unwrap().clone()
    }

    pub fn set_voice(&self, voice: String) {
        *self.voice.lock().unwrap() = voice;
    }

    pub fn server_state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// The configured input device name, or `None` for the OS default.
    pub fn input_device(&self) -> Option<String> {
        self.config.audio_device.clone()
    }

    fn begin_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        *self.current_session.lock().unwrap() = id.clone();
        id
    }

    fn persist(&self) {
        let session_id = self.current_session.lock().unwrap().clone();
        self.state_file
            .write(&session_id, self.state.status(), self.state.muted());
    }

    /// Abort and await any in-flight pre-queued capture before proceeding.
    async fn cancel_pending(&self) {
        let handle = self.pending.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// `speak(text)`: consume a non-trivial buffered pre-queue result if one
    /// exists, otherwise run TTS tied to a fresh capture session.
    pub async fn speak(&self, text: &str) -> String {
        if let Some(buffered) = self.take_buffered_if_useful().await {
            self.cancel_pending().await;
            self.begin_session();
            let _guard = self.session_lock.lock().await;
            self.state.begin_speaking();
            self.persist();
            let voice = self.voice();
            let mut tts = match TtsProcess::spawn(TTS_BINARY, &voice, text) {
                Ok(tts) => tts,
                Err(e) => {
                    tracing::warn!(error = %e, "TTS spawn failed while replaying buffered result");
                    self.state.end_speaking();
                    self.persist();
                    return buffered;
                }
            };
            tts.wait_until_exit().await;
            self.state.end_speaking();
            self.persist();
            return buffered;
        }

        self.cancel_pending().await;

        self.begin_session();
        let _guard = self.session_lock.lock().await;
        self.state.begin_speaking();
        self.state.begin_listening();
        self.persist();

        let voice = self.voice();
        let tts = match TtsProcess::spawn(TTS_BINARY, &voice, text) {
            Ok(tts) => tts,
            Err(e) => {
                tracing::warn!(error = %e, "TTS spawn failed, capturing without playback");
                TtsProcess::none()
            }
        };

        let session = CaptureSession::new(self.config.clone(), tts, Some(text.to_string()));
        let result = session.run().await;

        self.state.end_listening();
        self.state.end_speaking();
        self.persist();
        result
    }

    /// `listen()`: run a capture session with no TTS. Mute is a pre-check
    /// only.
    pub async fn listen(&self) -> String {
        if self.state.muted() {
            return MUTED_SENTINEL.to_string();
        }

        self.cancel_pending().await;

        self.begin_session();
        let _guard = self.session_lock.lock().await;
        self.state.begin_listening();
        self.persist();

        let session = CaptureSession::new(self.config.clone(), TtsProcess::none(), None);
        let result = session.run().await;

        self.state.end_listening();
        self.persist();
        result
    }

    /// `queue_listen()`: cancel any in-flight pre-queue, start a background
    /// capture session whose result is stashed into the buffer.
    pub async fn queue_listen(&self) {
        self.cancel_pending().await;
        self.begin_session();

        let config = self.config.clone();
        let state = self.state.clone();
        let state_file = self.state_file.clone();
        let current_session = self.current_session.clone();
        let session_lock = self.session_lock.clone();
        let buffered = self.buffered.clone();

        let handle = tokio::spawn(async move {
            let _guard = session_lock.lock().await;
            state.begin_listening();
            state_file.write(&current_session.lock().unwrap(), state.status(), state.muted());
            let session = CaptureSession::new(config, TtsProcess::none(), None);
            let result = session.run().await;
            state.end_listening();
            state_file.write(&current_session.lock().unwrap(), state.status(), state.muted());
            *buffered.lock().await = Some(result);
        });

        *self.pending.lock().await = Some(handle);
        info!("pre-queued background capture started");
    }

    /// A buffered result counts as usable when it holds real speech rather
    /// than silence or the empty sentinel.
    async fn take_buffered_if_useful(&self) -> Option<String> {
        let mut slot = self.buffered.lock().await;
        match slot.as_deref() {
            Some(text) if !text.is_empty() && text != SILENCE_SENTINEL => slot.take(),
            _ => None,
        }
    }

    pub fn mute(&self) {
        self.state.set_muted(true);
        self.persist();
    }

    pub fn unmute(&self) {
        self.state.set_muted(false);
        self.persist();
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn useful_buffer_excludes_silence_and_empty() {
        assert_eq!(classify_buffer(None), None);
        assert_eq!(classify_buffer(Some("".to_string())), None);
        assert_eq!(classify_buffer(Some(SILENCE_SENTINEL.to_string())), None);
        assert_eq!(
            classify_buffer(Some("ready".to_string())),
            Some("ready".to_string())
        );
    }

    fn classify_buffer(slot: Option<String>) -> Option<String> {
        match slot.as_deref() {
            Some(text) if !text.is_empty() && text != SILENCE_SENTINEL => slot,
            _ => None,
        }
    }
}
