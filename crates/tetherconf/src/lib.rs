//! Layered configuration for tethered capture.
//!
//! Kept free of the camera stack so any tether crate can depend on it.
//!
//! Settings come in two groups. [`InfraConfig`] covers the picture directory
//! and log level, fixed for the life of the process. [`BootstrapConfig`]
//! holds starting values the operator may change during a session: the
//! filename pattern and the delete-after-download policy.
//!
//! Sources are merged lowest precedence first: compiled defaults,
//! `/etc/tether/config.toml`, `<config dir>/tether/config.toml`, then
//! `./tether.toml` or the file given with `--config`, and finally the
//! `TETHER_*` and `RUST_LOG` environment variables.
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! picture_dir = "~/Pictures/studio"
//!
//! [telemetry]
//! log_level = "debug"
//!
//! [bootstrap.session]
//! filename_pattern = "shootXXXX"
//!
//! [bootstrap.capture]
//! delete_after_download = false
//! preview_interval_ms = 40
//! event_wait_ms = 500
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, CaptureConfig, SessionConfig};
pub use infra::{InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TetherConfig {
    /// `[paths]` and `[telemetry]` live at the top level of the file.
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl TetherConfig {
    /// Load configuration, letting `config_path` replace `./tether.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// As [`TetherConfig::load_from`], also reporting which files and
    /// variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = TetherConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the effective configuration as a config file.
    pub fn to_toml(&self) -> String {
        let paths = &self.infra.paths;
        let telemetry = &self.infra.telemetry;
        let session = &self.bootstrap.session;
        let capture = &self.bootstrap.capture;

        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "[paths]");
        let _ = writeln!(out, "picture_dir = \"{}\"", paths.picture_dir.display());
        let _ = writeln!(out, "\n[telemetry]");
        let _ = writeln!(out, "log_level = \"{}\"", telemetry.log_level);
        let _ = writeln!(out, "\n[bootstrap.session]");
        let _ = writeln!(out, "filename_pattern = \"{}\"", session.filename_pattern);
        let _ = writeln!(out, "\n[bootstrap.capture]");
        let _ = writeln!(out, "delete_after_download = {}", capture.delete_after_download);
        let _ = writeln!(out, "preview_interval_ms = {}", capture.preview_interval_ms);
        let _ = writeln!(out, "event_wait_ms = {}", capture.event_wait_ms);
        out
    }
}
