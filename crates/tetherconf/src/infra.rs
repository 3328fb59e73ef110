//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for captured images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory new sessions are created in.
    /// Default: $XDG_PICTURES_DIR/Capture, falling back to ~/Pictures/Capture
    #[serde(default = "PathsConfig::default_picture_dir")]
    pub picture_dir: PathBuf,
}

impl PathsConfig {
    fn default_picture_dir() -> PathBuf {
        if let Some(pictures) = directories::UserDirs::new()
            .and_then(|dirs| dirs.picture_dir().map(|p| p.to_path_buf()))
        {
            return pictures.join("Capture");
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join("Pictures/Capture"))
            .unwrap_or_else(|| PathBuf::from("Pictures/Capture"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            picture_dir: Self::default_picture_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// All infrastructure configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
