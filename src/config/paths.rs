//! Platform-specific data directory paths.
//!
//! Resolution order per platform:
//!   Windows: %APPDATA%/voice-duplex
//!   macOS:   ~/Library/Application Support/voice-duplex
//!   Linux:   $XDG_CONFIG_HOME/voice-duplex (default ~/.config)

use std::path::PathBuf;

/// Get the voice-duplex data directory (cross-platform). Holds the log
/// file and the state file.
pub fn get_data_dir() -> PathBuf {
    get_config_base().join("voice-duplex")
}

/// Get the platform-appropriate base config directory.
fn get_config_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% (typically C:\Users\<user>\AppData\Roaming)
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::config_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("AppData")
                .join("Roaming")
        })
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // Linux and other Unix: respect XDG_CONFIG_HOME, default ~/.config
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    }
}
