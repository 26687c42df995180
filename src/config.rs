// src/config.rs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which worker strategy runs downloads. Exactly one is active per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// `<interpreter> <script> <url> <output dir>`
    Script {
        #[serde(default = "default_interpreter")]
        interpreter: PathBuf,
        script: PathBuf,
    },
    /// Prebuilt downloader binary, located in `dist/` during development or
    /// in the packaged `resources/` directory.
    Executable {
        /// Skips resolution when set.
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default = "default_executable_name")]
        name: String,
        #[serde(default = "default_dev_dir")]
        dev_dir: PathBuf,
        #[serde(default = "default_resources_dir")]
        resources_dir: PathBuf,
        /// Directory holding ffmpeg, prepended to the child's PATH.
        #[serde(default = "default_codec_dir")]
        codec_dir: PathBuf,
    },
    /// Local HTTP service exposing `POST /download`.
    Service {
        #[serde(default = "default_service_url")]
        base_url: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Service {
            base_url: default_service_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_progress_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl ProgressConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            endpoint: default_progress_endpoint(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Used when no folder has been chosen. Relative paths resolve against
    /// the working directory.
    #[serde(default = "default_library_dir")]
    pub default_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// `false` lists files by name only and never starts ffprobe.
    #[serde(default = "default_probe_metadata")]
    pub probe_metadata: bool,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default = "default_drag_icon")]
    pub drag_icon: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            default_dir: default_library_dir(),
            extension: default_extension(),
            probe_metadata: default_probe_metadata(),
            ffprobe: default_ffprobe(),
            drag_icon: default_drag_icon(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_status_ms")]
    pub status_ms: u64,
    #[serde(default = "default_error_ms")]
    pub error_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            status_ms: default_status_ms(),
            error_ms: default_error_ms(),
        }
    }
}

/// Top level configuration, read from `tubetape.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_prefs_path")]
    pub prefs_path: PathBuf,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prefs_path: default_prefs_path(),
            backend: BackendConfig::default(),
            progress: ProgressConfig::default(),
            library: LibraryConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_prefs_path() -> PathBuf {
    PathBuf::from("tubetape.db")
}

fn default_interpreter() -> PathBuf {
    PathBuf::from(if cfg!(windows) { "python" } else { "python3" })
}

fn default_executable_name() -> String {
    "Youtube-Downloader".to_string()
}

fn default_dev_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("resources")
}

fn default_codec_dir() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_service_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_progress_endpoint() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    1_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_library_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_extension() -> String {
    "mp3".to_string()
}

fn default_probe_metadata() -> bool {
    true
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_drag_icon() -> PathBuf {
    PathBuf::from("assets").join("drag-icon.png")
}

fn default_status_ms() -> u64 {
    2_000
}

fn default_error_ms() -> u64 {
    5_000
}
