//! Atomic `KEY=VALUE` persistence of `ServerState`.
//!
//! Writes to a temp file in the same directory, then renames into place, so
//! a reader never observes a half-written file.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::audio::Status;

pub struct StateFileWriter {
    path: PathBuf,
}

impl StateFileWriter {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("state"),
        }
    }

    /// Write `SESSION`, `STATUS`, `MUTED` as `KEY=VALUE` lines. Failures are
    /// logged and swallowed — the state file is an observability aid, not a
    /// dependency of any session operation.
    pub fn write(&self, session_id: &str, status: Status, muted: bool) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create state file directory");
                return;
            }
        }

        let contents = format!(
            "SESSION={session_id}\nSTATUS={status}\nMUTED={muted}\n",
        );

        let tmp = self.path.with_extension(format!("tmp.{}", std::process::id()));
        if let Err(e) = std::fs::write(&tmp, &contents) {
            warn!(error = %e, "failed to write state file temp");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!(error = %e, "failed to rename state file into place");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_expected_keys_atomically() {
        let dir = std::env::temp_dir().join(format!("voice-duplex-test-{}", std::process::id()));
        let writer = StateFileWriter::new(&dir);
        writer.write("abc-123", Status::Listening, false);

        let contents = std::fs::read_to_string(dir.join("state")).unwrap();
        assert!(contents.contains("SESSION=abc-123"));
        assert!(contents.contains("STATUS=listening"));
        assert!(contents.contains("MUTED=false"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
