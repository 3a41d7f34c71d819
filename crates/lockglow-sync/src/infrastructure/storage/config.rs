//! TOML-based configuration for the synchroniser.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Lockglow\config.toml`
//! - Linux:    `~/.config/lockglow/config.toml`
//! - macOS:    `~/Library/Application Support/Lockglow/config.toml`
//!
//! Example:
//!
//! ```toml
//! [general]
//! log_level = "info"
//! attach_timeout_ms = 5000
//!
//! [device]
//! id = "\\\\?\\HID#VID_3434&PID_0361#..."
//!
//! [lighting]
//! standard_color = "#203040"
//! brightness = 80
//!
//! [[keys]]
//! key = "CapsLock"
//! on_color = "#FF0000"
//! off_color = "#203040"
//! off_linked = true
//! ```
//!
//! Every field has a default (`#[serde(default = ...)]`), so an empty or
//! missing file yields a working configuration.  When `[[keys]]` is absent all
//! three toggle keys are monitored: white when on, standard color when off.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lockglow_core::{Brightness, LightingProfile, MonitoredKeyConfig, Rgb, ToggleKey};
use serde::{Deserialize, Serialize};
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
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub lighting: LightingConfig,
    /// Monitored keys; `None` means "all three with default colors".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<MonitoredKeyConfig>>,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upper bound on one device attach attempt.
    #[serde(default = "default_attach_timeout_ms")]
    pub attach_timeout_ms: u64,
}

/// Which lighting device to drive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Device id to re-attach to.  When absent the first lighting device
    /// discovered is adopted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Device-wide color settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LightingConfig {
    /// Color of every lamp not under a monitored key.
    #[serde(default = "default_standard_color")]
    pub standard_color: Rgb,
    /// Global brightness percentage (clamped to 0–100).
    #[serde(default)]
    pub brightness: Brightness,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_attach_timeout_ms() -> u64 {
    5000
}
fn default_standard_color() -> Rgb {
    Rgb::WHITE
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            attach_timeout_ms: default_attach_timeout_ms(),
        }
    }
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            standard_color: default_standard_color(),
            brightness: Brightness::default(),
        }
    }
}

impl AppConfig {
    /// Builds the lighting profile handed to the synchroniser.
    pub fn to_profile(&self) -> LightingProfile {
        let standard = self.lighting.standard_color;
        let keys = match &self.keys {
            Some(keys) => keys.clone(),
            None => ToggleKey::ALL
                .iter()
                .map(|&k| MonitoredKeyConfig::with_defaults(k, standard))
                .collect(),
        };
        LightingProfile::new(keys, standard, self.lighting.brightness)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.general.attach_timeout_ms)
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

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Resolves the platform config base directory including the `Lockglow` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Lockglow"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lockglow"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Lockglow")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
