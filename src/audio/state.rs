//! Process-wide server state: `{status, muted}`.
//!
//! Thread-safe via `AtomicU8`/`AtomicBool`, shared between the coordinator,
//! the HTTP status handler, and the state-file writer.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// `idle | listening | speaking | speaking+listening`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Idle = 0,
    Listening = 1,
    Speaking = 2,
    SpeakingAndListening = 3,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Listening,
            2 => Self::Speaking,
            3 => Self::SpeakingAndListening,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Speaking => write!(f, "speaking"),
            Self::SpeakingAndListening => write!(f, "speaking+listening"),
        }
    }
}

/// Process-wide state: status + mute flag. Mutated by the session
/// coordinator on every transition, read by the `/status` handler and the
/// state-file writer. Consistency between `status` and `muted` reads is not
/// required.
#[derive(Debug)]
pub struct ServerState {
    status: AtomicU8,
    muted: AtomicBool,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(Status::Idle as u8),
            muted: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    /// Add `Status::Listening` to the current status (listening can overlap
    /// with speaking).
    pub fn begin_listening(&self) {
        let next = match self.status() {
            Status::Idle | Status::Listening => Status::Listening,
            Status::Speaking | Status::SpeakingAndListening => Status::SpeakingAndListening,
        };
        self.set_status(next);
    }

    pub fn end_listening(&self) {
        let next = match self.status() {
            Status::Listening | Status::Idle => Status::Idle,
            Status::Speaking | Status::SpeakingAndListening => Status::Speaking,
        };
        self.set_status(next);
    }

    pub fn begin_speaking(&self) {
        let next = match self.status() {
            Status::Idle | Status::Speaking => Status::Speaking,
            Status::Listening | Status::SpeakingAndListening => Status::SpeakingAndListening,
        };
        self.set_status(next);
    }

    pub fn end_speaking(&self) {
        let next = match self.status() {
            Status::Speaking | Status::Idle => Status::Idle,
            Status::Listening | Status::SpeakingAndListening => Status::Listening,
        };
        self.set_status(next);
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_and_speaking_compose() {
        let st = ServerState::new();
        st.begin_speaking();
        assert_eq!(st.status(), Status::Speaking);
        st.begin_listening();
        assert_eq!(st.status(), Status::SpeakingAndListening);
        st.end_speaking();
        assert_eq!(st.status(), Status::Listening);
        st.end_listening();
        assert_eq!(st.status(), Status::Idle);
    }

    #[test]
    fn mute_is_independent_of_status() {
        let st = ServerState::new();
        st.set_muted(true);
        st.begin_listening();
        assert!(st.muted());
        assert_eq!(st.status(), Status::Listening);
    }
}
