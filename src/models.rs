// src/models.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("url is empty")]
    EmptyUrl,
    #[error("not a valid url: {0}")]
    InvalidUrl(String),
    #[error("output directory must be absolute: {0}")]
    RelativeDirectory(PathBuf),
}

/// A single "download this url into that folder" request.
/// Only constructible through [`DownloadRequest::new`], so a request that
/// exists has already passed input validation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    output_directory: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: &str, output_directory: impl Into<PathBuf>) -> Result<Self, RequestError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RequestError::EmptyUrl);
        }
        let parsed = Url::parse(url).map_err(|_| RequestError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(RequestError::InvalidUrl(url.to_string()));
        }

        let output_directory = output_directory.into();
        if !output_directory.is_absolute() {
            return Err(RequestError::RelativeDirectory(output_directory));
        }

        Ok(Self {
            url: url.to_string(),
            output_directory,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }
}

/// Lifecycle of the tracker's single job slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running(DownloadRequest),
    Succeeded(PathBuf),
    Failed(String),
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running(_))
    }
}

/// Terminal result of one submitted job, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Started,
    Converting,
    Finished,
    Error,
    Connected,
    Disconnected,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Started => "started",
            ProgressStatus::Converting => "converting",
            ProgressStatus::Finished => "finished",
            ProgressStatus::Error => "error",
            ProgressStatus::Connected => "connected",
            ProgressStatus::Disconnected => "disconnected",
        }
    }
}

/// One interim status update pushed by the worker service.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
}

impl ProgressEvent {
    pub fn new(status: ProgressStatus) -> Self {
        Self { status, payload: None }
    }

    /// Event emitted in place of a frame that could not be decoded.
    pub fn decode_error(message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("kind".into(), Value::String("decode".into()));
        payload.insert("message".into(), Value::String(message.into()));
        Self {
            status: ProgressStatus::Error,
            payload: Some(payload),
        }
    }

    pub fn is_decode_error(&self) -> bool {
        self.status == ProgressStatus::Error
            && self
                .payload
                .as_ref()
                .and_then(|p| p.get("kind"))
                .and_then(Value::as_str)
                == Some("decode")
    }

    /// The `message` field of the payload, if the worker sent one.
    pub fn message(&self) -> Option<&str> {
        self.payload.as_ref()?.get("message")?.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub duration_seconds: Option<f64>,
    pub key: Option<String>,
    pub bpm: Option<f64>,
}

/// A file in the output directory, as last seen by a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub display_name: String,
    pub metadata: Option<MediaMetadata>,
}

impl MediaFile {
    pub fn new(path: PathBuf, metadata: Option<MediaMetadata>) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let display_name = metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(stem);
        Self {
            path,
            display_name,
            metadata,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
