//! The capture session state machine: one user-turn capture.
//!
//! `INIT -> WAIT_TTS -> STREAMING -> FINALIZING -> DONE`, with an
//! alternate `WAIT_TTS -> STREAMING` edge taken on barge-in. Five
//! concurrent activities cooperate via a `tokio_util::sync::CancellationToken`:
//! a TTS monitor, a combined barge-in/audio-sender mic pump (the two share
//! the mic ring's single consumer, so they run as one task with two
//! phases), a transcript receiver, and an end-of-utterance monitor.
//! `cpal::Stream` itself is not guaranteed `Send`, so device streams are
//! owned by a dedicated thread behind a `CaptureHandle`; only the
//! `Send`-safe ring-buffer consumers cross into spawned tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aec::AecState;
use crate::audio::frame::{Frame, SAMPLE_RATE};
use crate::audio::{
    frame_ring, start_mic_capture, start_reference_capture, CaptureHandle, FrameConsumer,
};
use crate::bargein::BargeInDetector;
use crate::config::Config;
use crate::echo_filter::filter_echo;
use crate::error::VoiceError;
use crate::recognizer::{RecognizerClient, RecognizerSender};
use crate::tts::TtsProcess;

const TTS_MONITOR_INTERVAL: Duration = Duration::from_millis(50);
const EOU_POLL_INTERVAL: Duration = Duration::from_millis(300);
const MAX_DURATION: Duration = Duration::from_secs(60);
const FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(500);
const FLUSH_DELAY_WITH_AEC: Duration = Duration::from_millis(500);
const FLUSH_DELAY_WITHOUT_AEC: Duration = Duration::from_millis(1500);

/// Shared mutable turn state, guarded by one lock.
struct TurnState {
    tts_done: bool,
    got_text: bool,
    barge_in_triggered: bool,
    recognizer_lost: bool,
    last_change_at: Instant,
    text_result: String,
    /// Set the moment STREAMING begins (TTS finished or was never started),
    /// so `MAX_DURATION` is measured from capture start, not session start.
    streaming_started_at: Option<Instant>,
}

impl TurnState {
    fn new(tts_already_done: bool) -> Self {
        Self {
            tts_done: tts_already_done,
            got_text: false,
            barge_in_triggered: false,
            recognizer_lost: false,
            last_change_at: Instant::now(),
            text_result: String::new(),
            streaming_started_at: tts_already_done.then(Instant::now),
        }
    }

    fn mark_tts_done(&mut self) {
        self.tts_done = true;
        self.streaming_started_at.get_or_insert_with(Instant::now);
    }
}

/// One user-turn capture. Owns the TTS process handle and spoken text (for
/// the echo filter) for the duration of the turn.
pub struct CaptureSession {
    config: Arc<Config>,
    tts: Arc<Mutex<TtsProcess>>,
    tts_text: Option<String>,
}

impl CaptureSession {
    pub fn new(config: Arc<Config>, tts: TtsProcess, tts_text: Option<String>) -> Self {
        Self {
            config,
            tts: Arc::new(Mutex::new(tts)),
            tts_text,
        }
    }

    /// Run the full state machine to completion and return the finalized
    /// transcription, or a sentinel string on failure.
    pub async fn run(self) -> String {
        match self.run_inner().await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "capture session ended in error");
                e.sentinel().to_string()
            }
        }
    }

    async fn run_inner(self) -> Result<String, VoiceError> {
        // -- INIT: open device streams --
        let (mic_prod, mic_cons) = frame_ring(None);
        let _mic_capture: CaptureHandle = start_mic_capture(
            mic_prod,
            self.config.audio_device.as_deref(),
            self.config.mic_gain,
        )
        .map_err(VoiceError::DeviceOpenFailed)?;

        let barge_in_enabled = self.config.barge_in;
        let mut ref_cons: Option<FrameConsumer> = None;
        let _ref_capture: Option<CaptureHandle> = if barge_in_enabled {
            let (ref_prod, cons) = frame_ring(None);
            match start_reference_capture(ref_prod, self.config.blackhole_device.as_deref()) {
                Ok(handle) => {
                    ref_cons = Some(cons);
                    Some(handle)
                }
                Err(e) => {
                    debug!(error = %e, "reference device unavailable, barge-in disabled for this turn");
                    None
                }
            }
        } else {
            None
        };
        let aec_enabled = ref_cons.is_some();

        let tts_pid_present = { self.tts.lock().await.pid().is_some() };
        let turn = Arc::new(Mutex::new(TurnState::new(!tts_pid_present)));

        let recognizer = RecognizerClient::connect(&self.config.wlk_url).await?;
        let (recognizer_tx, mut recognizer_rx) = recognizer.split();

        let cancel = CancellationToken::new();

        // -- TTS monitor activity --
        let tts_monitor = {
            let tts = self.tts.clone();
            let turn = turn.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    {
                        let mut t = turn.lock().await;
                        if t.tts_done {
                            return;
                        }
                        let mut proc = tts.lock().await;
                        if proc.has_exited() {
                            t.mark_tts_done();
                            return;
                        }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = sleep(TTS_MONITOR_INTERVAL) => {}
                    }
                }
            })
        };

        // -- barge-in / audio-sender mic pump --
        let mic_pump = {
            let turn = turn.clone();
            let tts = self.tts.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_mic_pump(
                mic_cons,
                ref_cons,
                turn,
                tts,
                cancel,
                aec_enabled,
                recognizer_tx,
            ))
        };

        // -- transcript receiver activity --
        let transcript_receiver = {
            let turn = turn.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        r = recognizer_rx.next_transcript() => r,
                    };
                    match next {
                        Ok(Some(text)) => {
                            let mut t = turn.lock().await;
                            if text != t.text_result {
                                t.text_result = text;
                                t.last_change_at = Instant::now();
                                t.got_text = true;
                            }
                        }
                        Ok(None) => {
                            debug!("recognizer idle timeout");
                            turn.lock().await.recognizer_lost = true;
                            return;
                        }
                        Err(_) => {
                            debug!("recognizer connection lost");
                            turn.lock().await.recognizer_lost = true;
                            return;
                        }
                    }
                }
            })
        };

        // -- end-of-utterance monitor activity --
        let eou_cancel = cancel.clone();
        let eou_turn = turn.clone();
        let silence_timeout = self.config.silence_timeout();
        let eou_monitor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = eou_cancel.cancelled() => return,
                    _ = sleep(EOU_POLL_INTERVAL) => {}
                }

                let t = eou_turn.lock().await;
                let max_duration_hit = t
                    .streaming_started_at
                    .is_some_and(|s| s.elapsed() >= MAX_DURATION);
                let done = is_end_of_utterance(
                    t.got_text,
                    t.barge_in_triggered,
                    &t.text_result,
                    t.last_change_at.elapsed(),
                    silence_timeout,
                );
                drop(t);
                if max_duration_hit {
                    info!("capture hit max duration, forcing finalization");
                    eou_cancel.cancel();
                    return;
                }
                if done {
                    eou_cancel.cancel();
                    return;
                }
            }
        });

        // -- FINALIZING: wait for any activity to trigger cancellation --
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = eou_monitor => {}
        }
        cancel.cancel();

        let _ = tts_monitor.await;
        let _ = mic_pump.await;
        let _ = transcript_receiver.await;

        let (final_text, recognizer_lost) = {
            let t = turn.lock().await;
            (t.text_result.clone(), t.recognizer_lost)
        };

        if final_text.is_empty() {
            // Recognizer dropped before producing anything, distinct from
            // ordinary silence, which still reports "(silence)".
            return Ok(if recognizer_lost {
                String::new()
            } else {
                "(silence)".to_string()
            });
        }

        let result = match &self.tts_text {
            Some(tts_text) => filter_echo(&final_text, tts_text),
            None => final_text,
        };

        Ok(result)
    }
}

async fn run_mic_pump(
    mut mic_cons: FrameConsumer,
    mut ref_cons: Option<FrameConsumer>,
    turn: Arc<Mutex<TurnState>>,
    tts: Arc<Mutex<TtsProcess>>,
    cancel: CancellationToken,
    aec_enabled: bool,
    mut recognizer_tx: RecognizerSender,
) {
    let mut aec = aec_enabled.then(|| AecState::new(SAMPLE_RATE));
    let mut detector = BargeInDetector::new(aec_enabled);
    let mut flushed = false;
    let mut replay_queue: Vec<Frame> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mic_frame = match wait_for_frame(&mut mic_cons, &cancel).await {
            Some(f) => f,
            None => continue,
        };

        let ref_frame = ref_cons.as_mut().and_then(|c| c.try_pop());

        let clean_frame = match (&mut aec, &ref_frame) {
            (Some(aec), Some(rf)) => aec.process(&mic_frame, rf),
            _ => mic_frame.clone(),
        };

        let tts_done = { turn.lock().await.tts_done };

        if !tts_done {
            // WAIT_TTS phase: run barge-in detection on the raw mic frame.
            if ref_cons.is_some() && detector.step(&mic_frame) {
                info!("barge-in detected, terminating TTS");
                tts.lock().await.kill().await;
                let mut t = turn.lock().await;
                t.mark_tts_done();
                t.barge_in_triggered = true;
                drop(t);
                replay_queue = detector.take_replay_frames();
            }
            continue;
        }

        // STREAMING phase.
        if !flushed {
            flushed = true;
            let barge_in = { turn.lock().await.barge_in_triggered };
            if !barge_in {
                let flush_delay = if aec_enabled {
                    FLUSH_DELAY_WITH_AEC
                } else {
                    FLUSH_DELAY_WITHOUT_AEC
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(flush_delay) => {}
                }
                mic_cons.drain_all();
                if let Some(rc) = ref_cons.as_mut() {
                    rc.drain_all();
                }
                continue;
            } else {
                let mut send_failed = false;
                for frame in replay_queue.drain(..) {
                    if recognizer_tx.send_frame(&frame).await.is_err() {
                        send_failed = true;
                        break;
                    }
                }
                if send_failed {
                    break;
                }
            }
        }

        if recognizer_tx.send_frame(&clean_frame).await.is_err() {
            break;
        }
    }

    recognizer_tx.close().await;
}

async fn wait_for_frame(cons: &mut FrameConsumer, cancel: &CancellationToken) -> Option<Frame> {
    let deadline = Instant::now() + FRAME_WAIT_TIMEOUT;
    loop {
        if let Some(frame) = cons.try_pop() {
            return Some(frame);
        }
        if cancel.is_cancelled() || Instant::now() >= deadline {
            return None;
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = sleep(Duration::from_millis(10)) => {}
        }
    }
}

/// Pure end-of-utterance decision: doubled timeout after a barge-in, and a
/// minimum two-character result to rule out empty/single-character noise.
fn is_end_of_utterance(
    got_text: bool,
    barge_in_triggered: bool,
    text_result: &str,
    since_last_change: Duration,
    silence_timeout: Duration,
) -> bool {
    if !got_text {
        return false;
    }
    let effective_timeout = if barge_in_triggered {
        silence_timeout * 2
    } else {
        silence_timeout
    };
    since_last_change >= effective_timeout && text_result.chars().count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_state_skips_wait_tts_when_no_process() {
        let t = TurnState::new(true);
        assert!(t.tts_done);
        assert!(!t.got_text);
        assert!(!t.barge_in_triggered);
    }

    #[test]
    fn turn_state_starts_in_wait_tts_when_process_present() {
        let t = TurnState::new(false);
        assert!(!t.tts_done);
        assert!(t.streaming_started_at.is_none());
    }

    #[test]
    fn streaming_clock_starts_immediately_with_no_tts() {
        let t = TurnState::new(true);
        assert!(t.streaming_started_at.is_some());
    }

    #[test]
    fn marking_tts_done_starts_the_streaming_clock_once() {
        let mut t = TurnState::new(false);
        t.mark_tts_done();
        let first = t.streaming_started_at;
        assert!(first.is_some());
        t.mark_tts_done();
        assert_eq!(t.streaming_started_at, first);
    }

    #[test]
    fn no_end_of_utterance_before_any_text() {
        assert!(!is_end_of_utterance(
            false,
            false,
            "",
            Duration::from_secs(10),
            Duration::from_millis(500)
        ));
    }

    #[test]
    fn single_character_text_never_ends_utterance() {
        assert!(!is_end_of_utterance(
            true,
            false,
            "a",
            Duration::from_secs(10),
            Duration::from_millis(500)
        ));
    }

    #[test]
    fn single_word_reply_ends_utterance_once_long_enough() {
        assert!(is_end_of_utterance(
            true,
            false,
            "yes",
            Duration::from_millis(600),
            Duration::from_millis(500)
        ));
    }

    #[test]
    fn ends_once_silence_timeout_elapsed_with_enough_chars() {
        assert!(is_end_of_utterance(
            true,
            false,
            "hello there",
            Duration::from_millis(600),
            Duration::from_millis(500)
        ));
    }

    #[test]
    fn barge_in_doubles_the_silence_timeout() {
        let elapsed = Duration::from_millis(600);
        let timeout = Duration::from_millis(500);
        assert!(!is_end_of_utterance(true, true, "hello there", elapsed, timeout));
        assert!(is_end_of_utterance(
            true,
            true,
            "hello there",
            Duration::from_millis(1100),
            timeout
        ));
    }
}
