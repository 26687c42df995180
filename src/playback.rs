// src/playback.rs

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The one track a player may hold open. The reconciler consults it so a
/// file is never unlinked while still loaded.
pub trait Playback: Send + Sync {
    fn loaded(&self) -> Option<PathBuf>;
    fn stop(&self);
}

/// Tracks which file is loaded; the actual audio output lives in the
/// presentation layer.
#[derive(Debug, Default)]
pub struct PlaybackSlot {
    current: Mutex<Option<PathBuf>>,
}

impl PlaybackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `path`, replacing whatever was loaded.
    pub fn load(&self, path: &Path) {
        tracing::debug!(path = %path.display(), "playback loaded");
        *self.lock() = Some(path.to_path_buf());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PathBuf>> {
        // A panic while holding this lock cannot leave the Option half-written.
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Playback for PlaybackSlot {
    fn loaded(&self) -> Option<PathBuf> {
        self.lock().clone()
    }

    fn stop(&self) {
        if let Some(path) = self.lock().take() {
            tracing::debug!(path = %path.display(), "playback stopped");
        }
    }
}
