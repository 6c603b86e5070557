//! WebSocket client for the external streaming recognizer.
//!
//! Sends raw PCM frames as binary WebSocket messages, parses the JSON
//! transcript stream, and applies the committed-lines + unstable-buffer
//! accumulation rule plus hallucination stripping.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::audio::frame::Frame;
use crate::error::VoiceError;

const CONNECT_RETRIES: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RecognizerMessage {
    #[serde(default)]
    lines: Vec<RecognizerLine>,
    #[serde(default)]
    buffer_transcription: String,
}

#[derive(Debug, Deserialize)]
struct RecognizerLine {
    text: String,
}

/// Case-insensitive hallucination markers stripped from every transcript
/// update.
const HALLUCINATION_MARKERS: &[&str] = &["[music]", "[inaudible]", "[blank_audio]"];

fn strip_hallucinations(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let lower = out.to_lowercase();
        let mut found = None;
        for marker in HALLUCINATION_MARKERS {
            if let Some(idx) = lower.find(marker) {
                found = Some((idx, marker.len()));
                break;
            }
        }
        if found.is_none() {
            // Any other bracketed "BLANK..." variant.
            if let Some(start) = lower.find("[blank") {
                if let Some(end_rel) = lower[start..].find(']') {
                    found = Some((start, end_rel + 1));
                }
            }
        }
        match found {
            Some((idx, len)) => {
                out.replace_range(idx..idx + len, "");
            }
            None => break,
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render the live transcript from committed lines + unstable buffer, with
/// hallucinations stripped.
fn render_transcript(msg: &RecognizerMessage) -> String {
    let committed: String = msg
        .lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let combined = if msg.buffer_transcription.is_empty() {
        committed
    } else if committed.is_empty() {
        msg.buffer_transcription.clone()
    } else {
        format!("{committed} {}", msg.buffer_transcription)
    };
    strip_hallucinations(&combined)
}

pub struct RecognizerClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RecognizerClient {
    /// Connect with up to `CONNECT_RETRIES` attempts, `CONNECT_RETRY_DELAY`
    /// apart.
    pub async fn connect(url: &str) -> Result<Self, VoiceError> {
        let mut last_err = None;
        for attempt in 0..CONNECT_RETRIES {
            match tokio_tungstenite::connect_async(url).await {
                Ok((socket, _response)) => return Ok(Self { socket }),
                Err(e) => {
                    debug!(attempt, error = %e, "recognizer connect attempt failed");
                    last_err = Some(e.to_string());
                    sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
        Err(VoiceError::RecognizerUnreachable(
            last_err.unwrap_or_else(|| url.to_string()),
        ))
    }

    /// Split into an independent sender and receiver so the audio-sender
    /// and transcript-receiver activities can each own one half without
    /// contending for a lock.
    pub fn split(self) -> (RecognizerSender, RecognizerReceiver) {
        let (sink, stream) = self.socket.split();
        (RecognizerSender { sink }, RecognizerReceiver { stream })
    }
}

pub struct RecognizerSender {
    sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
}

impl RecognizerSender {
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), VoiceError> {
        self.sink
            .send(Message::Binary(frame.to_le_bytes()))
            .await
            .map_err(|_| VoiceError::RecognizerConnectionLost)
    }

    /// Send a WebSocket close frame so the recognizer sees a clean
    /// disconnect rather than a dropped socket.
    pub async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

pub struct RecognizerReceiver {
    stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl RecognizerReceiver {
    pub async fn next_transcript(&mut self) -> Result<Option<String>, VoiceError> {
        loop {
            let next = tokio::time::timeout(IDLE_TIMEOUT, self.stream.next()).await;
            let msg = match next {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(_))) | Ok(None) => return Err(VoiceError::RecognizerConnectionLost),
                Err(_) => return Ok(None),
            };

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err(VoiceError::RecognizerConnectionLost),
                _ => continue,
            };

            match serde_json::from_str::<RecognizerMessage>(&text) {
                Ok(parsed) => return Ok(Some(render_transcript(&parsed))),
                Err(e) => {
                    warn!(error = %e, "skipping unparseable transcript message");
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_hallucination_markers() {
        assert_eq!(strip_hallucinations("hello [Music] world"), "hello world");
        assert_eq!(strip_hallucinations("[INAUDIBLE] there"), "there");
        assert_eq!(strip_hallucinations("ok [BLANK_AUDIO]"), "ok");
        assert_eq!(strip_hallucinations("ok [blank_gap] done"), "ok done");
    }

    #[test]
    fn render_combines_committed_and_buffer() {
        let msg = RecognizerMessage {
            lines: vec![RecognizerLine {
                text: "hello".to_string(),
            }],
            buffer_transcription: "world".to_string(),
        };
        assert_eq!(render_transcript(&msg), "hello world");
    }

    #[test]
    fn render_handles_empty_buffer() {
        let msg = RecognizerMessage {
            lines: vec![RecognizerLine {
                text: "hello there".to_string(),
            }],
            buffer_transcription: String::new(),
        };
        assert_eq!(render_transcript(&msg), "hello there");
    }
}
