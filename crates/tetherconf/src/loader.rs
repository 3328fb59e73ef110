//! Finding config files, merging them, and applying `TETHER_*` variables.

use crate::bootstrap::{CaptureConfig, SessionConfig};
use crate::infra::{PathsConfig, TelemetryConfig};
use crate::{BootstrapConfig, ConfigError, InfraConfig, TetherConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Provenance of an effective configuration, for `tetherctl config`.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files merged, lowest precedence first.
    pub files: Vec<PathBuf>,
    /// Variables that replaced a file or default value.
    pub env_overrides: Vec<String>,
}

const SYSTEM_CONFIG: &str = "/etc/tether/config.toml";
const LOCAL_CONFIG: &str = "tether.toml";

/// Existing config files in merge order: system, user, then either the
/// `--config` path or `./tether.toml`.
///
/// A `--config` path that does not exist falls back to `./tether.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new().map(|d| d.config_dir().join("tether").join("config.toml"));
    let local = cli_path
        .filter(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG));

    [Some(PathBuf::from(SYSTEM_CONFIG)), user, Some(local)]
        .into_iter()
        .flatten()
        .filter(|p| p.exists())
        .collect()
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<TetherConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from a TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<TetherConfig, ConfigError> {
    let mut config: TetherConfig =
        toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let raw = config.infra.paths.picture_dir.to_string_lossy().into_owned();
    config.infra.paths.picture_dir = expand_path(&raw);

    Ok(config)
}

/// Merge two configs, with `overlay` taking precedence.
///
/// A field in `overlay` only wins when it differs from the compiled
/// default, so a file that omits a key does not reset earlier files.
pub fn merge_configs(base: TetherConfig, overlay: TetherConfig) -> TetherConfig {
    let paths = PathsConfig::default();
    let telemetry = TelemetryConfig::default();
    let session = SessionConfig::default();
    let capture = CaptureConfig::default();

    TetherConfig {
        infra: InfraConfig {
            paths: PathsConfig {
                picture_dir: pick(
                    base.infra.paths.picture_dir,
                    overlay.infra.paths.picture_dir,
                    &paths.picture_dir,
                ),
            },
            telemetry: TelemetryConfig {
                log_level: pick(
                    base.infra.telemetry.log_level,
                    overlay.infra.telemetry.log_level,
                    &telemetry.log_level,
                ),
            },
        },
        bootstrap: BootstrapConfig {
            session: SessionConfig {
                filename_pattern: pick(
                    base.bootstrap.session.filename_pattern,
                    overlay.bootstrap.session.filename_pattern,
                    &session.filename_pattern,
                ),
            },
            capture: CaptureConfig {
                delete_after_download: pick(
                    base.bootstrap.capture.delete_after_download,
                    overlay.bootstrap.capture.delete_after_download,
                    &capture.delete_after_download,
                ),
                preview_interval_ms: pick(
                    base.bootstrap.capture.preview_interval_ms,
                    overlay.bootstrap.capture.preview_interval_ms,
                    &capture.preview_interval_ms,
                ),
                event_wait_ms: pick(
                    base.bootstrap.capture.event_wait_ms,
                    overlay.bootstrap.capture.event_wait_ms,
                    &capture.event_wait_ms,
                ),
            },
        },
    }
}

fn pick<T: PartialEq>(base: T, overlay: T, default: &T) -> T {
    if overlay != *default {
        overlay
    } else {
        base
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut TetherConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides using an arbitrary variable lookup.
pub fn apply_overrides_from<F>(config: &mut TetherConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("TETHER_PICTURE_DIR") {
        config.infra.paths.picture_dir = expand_path(&v);
        sources.env_overrides.push("TETHER_PICTURE_DIR".to_string());
    }

    if let Some(v) = lookup("TETHER_FILENAME_PATTERN") {
        config.bootstrap.session.filename_pattern = v;
        sources.env_overrides.push("TETHER_FILENAME_PATTERN".to_string());
    }

    if let Some(v) = lookup("TETHER_DELETE_AFTER_DOWNLOAD") {
        if let Some(flag) = parse_bool(&v) {
            config.bootstrap.capture.delete_after_download = flag;
            sources
                .env_overrides
                .push("TETHER_DELETE_AFTER_DOWNLOAD".to_string());
        }
    }

    if let Some(v) = lookup("TETHER_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("TETHER_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over our own variable, as tracing users expect
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~/` or `$VAR` in a configured path.
///
/// Unknown variables and a missing home directory leave the path as written.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        return match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => PathBuf::from(path),
        };
    }

    if let Some(var_path) = path.strip_prefix('$') {
        let (var, rest) = var_path.split_once('/').unwrap_or((var_path, ""));
        if let Ok(value) = env::var(var) {
            let base = PathBuf::from(value);
            return if rest.is_empty() { base } else { base.join(rest) };
        }
    }

    PathBuf::from(path)
}
