//! TOML-based configuration for the stage host.
//!
//! Reads `StageConfig` from the platform-appropriate config file, or from an
//! explicit path given on the command line:
//! - Windows:  `%APPDATA%\LiveStage\stage.toml`
//! - Linux:    `~/.config/livestage/stage.toml`
//! - macOS:    `~/Library/Application Support/LiveStage/stage.toml`
//!
//! # Example
//!
//! ```toml
//! [stage]
//! name = "Main Stage"
//! log_level = "debug"
//!
//! [pairing]
//! confirm_delay_ms = 1500
//! incoming_request_interval_ms = 0   # 0 disables the simulated initiator
//!
//! [media]
//! mode = "simulated"
//! frame_interval_ms = 100
//!
//! [[discovery.devices]]
//! id = "6f1c1c84-2f0a-4d35-9a3e-3b8ad6f1f0aa"
//! name = "Stage Left"
//! kind = "phone"
//! transports = ["wifi"]
//! capabilities = ["camera", "microphone"]
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a missing file, a
//! missing section, or a missing key all fall back to the same defaults the
//! host uses on first run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stage_core::DeviceDescriptor;
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageConfig {
    #[serde(default)]
    pub stage: StageSection,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

/// General host settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSection {
    /// Name of this stage, shown in logs.
    #[serde(default = "default_stage_name")]
    pub name: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// How often the discovery feed is polled.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Devices the static discovery feed reports.
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

/// Simulated remote-peer timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairingConfig {
    /// Delay before the simulated peer confirms an outgoing request.
    #[serde(default = "default_confirm_delay_ms")]
    pub confirm_delay_ms: u64,
    /// Interval at which a random discoverable device asks to pair.
    /// `0` disables the simulated initiator.
    #[serde(default = "default_incoming_request_interval_ms")]
    pub incoming_request_interval_ms: u64,
}

/// Which media transport backs camera sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    /// Placeholder frames from the simulated stream driver.
    #[default]
    Simulated,
    /// Frames are pushed in by an external transport.
    External,
}

impl std::str::FromStr for MediaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" => Ok(MediaMode::Simulated),
            "external" => Ok(MediaMode::External),
            other => Err(format!("unknown media mode {other:?} (expected simulated or external)")),
        }
    }
}

/// Media session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default)]
    pub mode: MediaMode,
    /// Tick of the simulated stream driver.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    /// Simulated handshake time of `start_publishing`.
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl PairingConfig {
    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    /// `None` when the simulated initiator is disabled.
    pub fn incoming_request_interval(&self) -> Option<Duration> {
        (self.incoming_request_interval_ms > 0)
            .then(|| Duration::from_millis(self.incoming_request_interval_ms))
    }
}

impl MediaConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_stage_name() -> String {
    "Live Stage".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_confirm_delay_ms() -> u64 {
    1_500
}
fn default_incoming_request_interval_ms() -> u64 {
    12_000
}
fn default_frame_interval_ms() -> u64 {
    100
}
fn default_frame_width() -> u32 {
    320
}
fn default_frame_height() -> u32 {
    180
}
fn default_start_delay_ms() -> u64 {
    300
}

impl Default for StageSection {
    fn default() -> Self {
        Self {
            name: default_stage_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            devices: Vec::new(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            confirm_delay_ms: default_confirm_delay_ms(),
            incoming_request_interval_ms: default_incoming_request_interval_ms(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            mode: MediaMode::default(),
            frame_interval_ms: default_frame_interval_ms(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            start_delay_ms: default_start_delay_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("stage.toml"))
}

/// Loads the config from `path`, or from the platform default location when
/// `path` is `None`.  A missing file yields `StageConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<StageConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StageConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &StageConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LiveStage"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("livestage"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LiveStage")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::{Capability, DeviceKind, Transport};
    use uuid::Uuid;

    #[test]
    fn test_stage_config_default_values() {
        // Arrange / Act
        let cfg = StageConfig::default();

        // Assert
        assert_eq!(cfg.stage.log_level, "info");
        assert_eq!(cfg.media.mode, MediaMode::Simulated);
        assert_eq!(cfg.pairing.confirm_delay(), Duration::from_millis(1_500));
        assert!(cfg.discovery.devices.is_empty());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: StageConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, StageConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[media]
mode = "external"
"#;

        // Act
        let cfg: StageConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.media.mode, MediaMode::External);
        assert_eq!(cfg.media.frame_interval_ms, 100);
    }

    #[test]
    fn test_zero_interval_disables_incoming_requests() {
        let cfg: StageConfig =
            toml::from_str("[pairing]\nincoming_request_interval_ms = 0").expect("deserialize");
        assert_eq!(cfg.pairing.incoming_request_interval(), None);
    }

    #[test]
    fn test_seeded_devices_parse_from_toml() {
        // Arrange
        let toml_str = r#"
[[discovery.devices]]
id = "6f1c1c84-2f0a-4d35-9a3e-3b8ad6f1f0aa"
name = "Stage Left"
kind = "phone"
transports = ["wifi", "bluetooth"]
capabilities = ["camera", "microphone"]
"#;

        // Act
        let cfg: StageConfig = toml::from_str(toml_str).expect("deserialize devices");

        // Assert
        let device = &cfg.discovery.devices[0];
        assert_eq!(device.kind, DeviceKind::Phone);
        assert!(device.transports.contains(&Transport::Bluetooth));
        assert!(device.has_capability(Capability::Camera));
    }

    #[test]
    fn test_media_mode_from_str_is_case_insensitive() {
        assert_eq!("External".parse::<MediaMode>(), Ok(MediaMode::External));
        assert!("rtp".parse::<MediaMode>().is_err());
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<StageConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/stage.toml");

        let cfg = load_config(Some(&path)).expect("missing file is not an error");

        assert_eq!(cfg, StageConfig::default());
    }

    #[test]
    fn test_save_and_load_config_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("stage_test_{}", Uuid::new_v4()));
        let path = dir.join("stage.toml");
        let mut cfg = StageConfig::default();
        cfg.stage.name = "Rehearsal".to_string();
        cfg.media.mode = MediaMode::External;

        // Act
        save_config(&cfg, &path).expect("save");
        let loaded = load_config(Some(&path)).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_stage_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("stage.toml"), "got {path:?}");
        }
    }
}
