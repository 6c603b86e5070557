//! Environment-variable configuration.
//!
//! Configuration-file parsing is explicitly out of scope; the only
//! supported ambient config surface is the environment, read once at
//! startup and never reloaded.

pub mod paths;

use std::time::Duration;

/// Resolved process-wide configuration. Immutable for the life of the
/// process; share via `Arc<Config>`.
#[derive(Debug, Clone)]
pub struct Config {
    pub audio_device: Option<String>,
    pub mic_gain: f32,
    pub silence_secs: f64,
    pub barge_in: bool,
    pub blackhole_device: Option<String>,
    pub barge_in_ratio: f32,
    pub voice: String,
    pub wlk_url: String,
    pub wlk_port: u16,
    pub audio_server_port: u16,
}

impl Config {
    /// Read configuration from the environment, falling back to the
    /// documented defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            audio_device: non_auto(env_string("AUDIO_DEVICE", "auto")),
            mic_gain: env_parse("MIC_GAIN", 8.0),
            silence_secs: env_parse("SILENCE_SECS", 2.0),
            barge_in: env_bool("BARGE_IN", true),
            blackhole_device: non_auto(env_string("BLACKHOLE_DEVICE", "auto")),
            barge_in_ratio: env_parse("BARGE_IN_RATIO", 0.4),
            voice: env_string("VOICE", "Daniel"),
            wlk_url: env_string("WLK_URL", "ws://localhost:8090/asr"),
            wlk_port: env_parse("WLK_PORT", 8090),
            audio_server_port: env_parse("AUDIO_SERVER_PORT", 8150),
        }
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.silence_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `"auto"` (case-insensitive) maps to `None` — "let the OS pick the
/// default device" — everything else is a device name to match against.
fn non_auto(v: String) -> Option<String> {
    if v.eq_ignore_ascii_case("auto") {
        None
    } else {
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        std::env::remove_var("MIC_GAIN");
        std::env::remove_var("VOICE");
        std::env::remove_var("WLK_URL");
        let cfg = Config::from_env();
        assert_eq!(cfg.mic_gain, 8.0);
        assert_eq!(cfg.voice, "Daniel");
        assert_eq!(cfg.wlk_url, "ws://localhost:8090/asr");
        assert_eq!(cfg.audio_server_port, 8150);
    }

    #[test]
    fn auto_device_is_none() {
        assert_eq!(non_auto("auto".to_string()), None);
        assert_eq!(non_auto("AUTO".to_string()), None);
        assert_eq!(non_auto("hw:1,0".to_string()), Some("hw:1,0".to_string()));
    }

    #[test]
    fn bool_env_parsing() {
        std::env::set_var("BARGE_IN_TEST_TRUE", "true");
        assert!(env_bool("BARGE_IN_TEST_TRUE", false));
        std::env::set_var("BARGE_IN_TEST_FALSE", "false");
        assert!(!env_bool("BARGE_IN_TEST_FALSE", true));
        std::env::remove_var("BARGE_IN_TEST_UNSET");
        assert!(env_bool("BARGE_IN_TEST_UNSET", true));
    }
}
