// src/probe.rs

use crate::models::MediaMetadata;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("metadata probing is disabled")]
    Disabled,
    #[error("external tool is missing: {0}")]
    ToolMissing(String),
    #[error("{tool} failed (code={code:?}): {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads tags and duration from an audio file.
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaMetadata, ProbeError>;
}

/// Used when probing is turned off. Every file gets the filename fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProbe;

#[async_trait]
impl MetadataProbe for NoProbe {
    async fn probe(&self, _path: &Path) -> Result<MediaMetadata, ProbeError> {
        Err(ProbeError::Disabled)
    }
}

#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: PathBuf,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[async_trait]
impl MetadataProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaMetadata, ProbeError> {
        let output = tokio::process::Command::new(&self.program)
            .args(["-v", "error", "-print_format", "json", "-show_format"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProbeError::ToolMissing(self.program.display().to_string())
                }
                _ => ProbeError::Io(e),
            })?;

        if !output.status.success() {
            return Err(ProbeError::ToolFailed {
                tool: self.program.display().to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_ffprobe_json(&output.stdout)
    }
}

pub(crate) fn parse_ffprobe_json(bytes: &[u8]) -> Result<MediaMetadata, ProbeError> {
    let parsed: FfprobeOutput = serde_json::from_slice(bytes)?;
    let Some(format) = parsed.format else {
        return Ok(MediaMetadata::default());
    };

    // Tag names vary in case between containers (ID3 "TBPM", Vorbis "bpm").
    let tags: HashMap<String, String> = format
        .tags
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();
    let tag = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| tags.get(*n))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(MediaMetadata {
        artist: tag(&["artist", "album_artist"]),
        title: tag(&["title"]),
        duration_seconds: format
            .duration
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0),
        key: tag(&["tkey", "key", "initialkey"]),
        bpm: tag(&["tbpm", "bpm"]).and_then(|b| b.parse::<f64>().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_tags_case_insensitively() {
        let json = br#"{
            "format": {
                "filename": "a.mp3",
                "duration": "215.327347",
                "tags": { "ARTIST": "Someone", "title": "A Song", "TBPM": "124", "TKEY": "Am" }
            }
        }"#;
        let meta = parse_ffprobe_json(json).unwrap();
        assert_eq!(meta.artist.as_deref(), Some("Someone"));
        assert_eq!(meta.title.as_deref(), Some("A Song"));
        assert_eq!(meta.key.as_deref(), Some("Am"));
        assert_eq!(meta.bpm, Some(124.0));
        assert!((meta.duration_seconds.unwrap() - 215.327347).abs() < 1e-6);
    }

    #[test]
    fn missing_sections_give_empty_metadata() {
        assert_eq!(parse_ffprobe_json(b"{}").unwrap(), MediaMetadata::default());
        let meta = parse_ffprobe_json(br#"{"format": {"duration": "N/A"}}"#).unwrap();
        assert_eq!(meta.duration_seconds, None);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(parse_ffprobe_json(b"not json"), Err(ProbeError::Json(_))));
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let probe = FfprobeProbe::new("/nonexistent/ffprobe");
        let err = probe.probe(Path::new("/tmp/a.mp3")).await.unwrap_err();
        assert!(matches!(err, ProbeError::ToolMissing(_)));
    }

    #[tokio::test]
    async fn no_probe_always_declines() {
        assert!(matches!(
            NoProbe.probe(Path::new("/tmp/a.mp3")).await,
            Err(ProbeError::Disabled)
        ));
    }
}
