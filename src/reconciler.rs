// src/reconciler.rs

use crate::models::MediaFile;
use crate::playback::Playback;
use crate::probe::MetadataProbe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not an audio file in the download folder")]
    NotInLibrary(PathBuf),
}

/// The folder being shown and what was last found in it.
#[derive(Debug, Default)]
struct Library {
    active: Option<PathBuf>,
    files: Vec<MediaFile>,
}

/// Derives the visible file list from the output directory. The cached list
/// is only ever replaced wholesale by a scan of the active folder or shrunk
/// by a successful delete.
pub struct Reconciler {
    extension: String,
    probe: Arc<dyn MetadataProbe>,
    playback: Arc<dyn Playback>,
    library: Mutex<Library>,
}

impl Reconciler {
    pub fn new(extension: &str, probe: Arc<dyn MetadataProbe>, playback: Arc<dyn Playback>) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            probe,
            playback,
            library: Mutex::new(Library::default()),
        }
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    /// Makes `dir` the active folder and lists its matching files, sorted by
    /// file name. A missing directory is created and yields an empty list.
    pub async fn scan(&self, dir: &Path) -> Result<Vec<MediaFile>, ReconcileError> {
        self.library.lock().await.active = Some(dir.to_path_buf());
        let files = self.list(dir).await?;
        self.store(dir, &files).await;
        Ok(files)
    }

    /// Rescan after a job wrote into `dir`. The cache is only replaced when
    /// `dir` is still the active folder (or none was chosen yet); returns
    /// whether it was.
    pub async fn rescan_job_folder(&self, dir: &Path) -> Result<bool, ReconcileError> {
        let files = self.list(dir).await?;
        Ok(self.store(dir, &files).await)
    }

    pub async fn active_dir(&self) -> Option<PathBuf> {
        self.library.lock().await.active.clone()
    }

    /// Snapshot of the last scan.
    pub async fn files(&self) -> Vec<MediaFile> {
        self.library.lock().await.files.clone()
    }

    /// Removes `path` from disk, stopping playback first if it is the
    /// loaded track. Only regular audio files directly inside the active
    /// folder can be deleted. On failure the cached list is left untouched.
    pub async fn delete(&self, path: &Path) -> Result<(), ReconcileError> {
        let in_active = {
            let library = self.library.lock().await;
            library.active.as_deref().is_some() && path.parent() == library.active.as_deref()
        };
        if !in_active || !self.matches_extension(path) {
            tracing::warn!(path = %path.display(), "refusing to delete file outside the library");
            return Err(ReconcileError::NotInLibrary(path.to_path_buf()));
        }
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|source| ReconcileError::Delete {
                path: path.to_path_buf(),
                source,
            })?;
        if !meta.is_file() {
            return Err(ReconcileError::NotInLibrary(path.to_path_buf()));
        }

        if self.playback.loaded().as_deref() == Some(path) {
            self.playback.stop();
        }

        tokio::fs::remove_file(path)
            .await
            .map_err(|source| ReconcileError::Delete {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::info!(path = %path.display(), "deleted");
        self.library.lock().await.files.retain(|f| f.path != path);
        Ok(())
    }

    async fn list(&self, dir: &Path) -> Result<Vec<MediaFile>, ReconcileError> {
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tracing::info!(dir = %dir.display(), "output directory missing, creating it");
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| ReconcileError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            return Ok(Vec::new());
        }

        let read_err = |source| ReconcileError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            if !self.matches_extension(&path) {
                continue;
            }
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => candidates.push(path),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                }
            }
        }
        candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut files = Vec::with_capacity(candidates.len());
        for path in candidates {
            let metadata = match self.probe.probe(&path).await {
                Ok(meta) => Some(meta),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "no metadata, using file name");
                    None
                }
            };
            files.push(MediaFile::new(path, metadata));
        }

        tracing::debug!(dir = %dir.display(), count = files.len(), "scan complete");
        Ok(files)
    }

    async fn store(&self, dir: &Path, files: &[MediaFile]) -> bool {
        let mut library = self.library.lock().await;
        match library.active.as_deref() {
            Some(active) if active != dir => {
                tracing::debug!(
                    scanned = %dir.display(),
                    active = %active.display(),
                    "folder changed during scan, keeping the active listing"
                );
                false
            }
            _ => {
                library.active = Some(dir.to_path_buf());
                library.files = files.to_vec();
                true
            }
        }
    }
}
