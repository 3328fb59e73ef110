//! Bootstrap configuration - seeds runtime state, then runtime owns it.
//!
//! The operator can change the filename pattern or the delete policy while
//! the host is running; these values only provide the starting point.

use serde::{Deserialize, Serialize};

/// Session naming defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Filename template. The run of `X` characters becomes a zero-padded
    /// sequence number, e.g. `captureXXXXXX` -> `capture000042.jpg`.
    #[serde(default = "SessionConfig::default_filename_pattern")]
    pub filename_pattern: String,
}

impl SessionConfig {
    fn default_filename_pattern() -> String {
        "captureXXXXXX".to_string()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filename_pattern: Self::default_filename_pattern(),
        }
    }
}

/// Capture workflow defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Remove each file from the camera once it has been downloaded.
    #[serde(default = "CaptureConfig::default_delete_after_download")]
    pub delete_after_download: bool,

    /// Extra pause between live view frames, in milliseconds.
    #[serde(default)]
    pub preview_interval_ms: u64,

    /// Upper bound on one device event poll, in milliseconds.
    #[serde(default = "CaptureConfig::default_event_wait_ms")]
    pub event_wait_ms: u64,
}

impl CaptureConfig {
    fn default_delete_after_download() -> bool {
        true
    }

    fn default_event_wait_ms() -> u64 {
        500
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            delete_after_download: Self::default_delete_after_download(),
            preview_interval_ms: 0,
            event_wait_ms: Self::default_event_wait_ms(),
        }
    }
}

/// All bootstrap configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub capture: CaptureConfig,
}
