// src/app.rs

//! The operations a presentation layer drives: start a download, pick or
//! reset the output folder, list, play, delete and drag files.

use crate::bridge::{DisplayPolicy, Notification, NotificationBridge, NotificationKind};
use crate::config::{AppConfig, LibraryConfig};
use crate::models::{ConnectionState, DownloadRequest, JobOutcome, JobState, MediaFile, RequestError};
use crate::playback::{Playback, PlaybackSlot};
use crate::prefs::{PreferenceStore, PrefsError, DOWNLOAD_FOLDER_KEY};
use crate::probe::{FfprobeProbe, MetadataProbe, NoProbe};
use crate::progress::{Connector, ProgressChannel, WsConnector};
use crate::reconciler::{ReconcileError, Reconciler};
use crate::tracker::{JobTracker, TrackerError};
use crate::worker::{self, WorkerBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Busy(#[from] TrackerError),
    #[error(transparent)]
    Preferences(#[from] PrefsError),
    #[error(transparent)]
    Files(#[from] ReconcileError),
    #[error("cannot resolve working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
}

/// Native folder dialog, or anything standing in for one.
pub trait FolderPicker {
    fn pick_folder(&self, current: &Path) -> Option<PathBuf>;
}

/// What the OS drag-and-drop layer needs to start dragging a file out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragRequest {
    pub file: PathBuf,
    pub icon: PathBuf,
}

pub struct App {
    config: AppConfig,
    prefs: PreferenceStore,
    reconciler: Arc<Reconciler>,
    tracker: Arc<JobTracker>,
    bridge: NotificationBridge,
    playback: Arc<PlaybackSlot>,
    progress: Arc<ProgressChannel>,
}

impl App {
    /// Wires the components together. The receiver is the ordered
    /// notification feed for the presentation layer.
    pub fn new(
        config: AppConfig,
        prefs: PreferenceStore,
        worker: Arc<dyn WorkerBackend>,
        probe: Arc<dyn MetadataProbe>,
        connector: Arc<dyn Connector>,
    ) -> (Self, UnboundedReceiver<Notification>) {
        let (bridge, notifications) =
            NotificationBridge::new(DisplayPolicy::from_config(&config.notifications));
        let playback = Arc::new(PlaybackSlot::new());
        let reconciler = Arc::new(Reconciler::new(
            &config.library.extension,
            probe,
            playback.clone(),
        ));
        let tracker = Arc::new(JobTracker::new(worker, reconciler.clone(), bridge.clone()));
        let progress = Arc::new(ProgressChannel::new(
            connector,
            config.progress.reconnect_delay(),
        ));

        let app = Self {
            config,
            prefs,
            reconciler,
            tracker,
            bridge,
            playback,
            progress,
        };
        (app, notifications)
    }

    /// Builds every collaborator from `config`: the preference database,
    /// the configured worker strategy, ffprobe (unless disabled) and the
    /// websocket progress feed.
    pub async fn from_config(
        config: AppConfig,
    ) -> Result<(Self, UnboundedReceiver<Notification>), AppError> {
        let prefs = PreferenceStore::open(&config.prefs_path).await?;
        let worker = worker::from_config(&config.backend);
        let probe = metadata_probe(&config.library);
        let connector = Arc::new(WsConnector::new(
            config.progress.endpoint.clone(),
            config.progress.handshake_timeout(),
        ));
        tracing::info!(backend = worker.name(), endpoint = %config.progress.endpoint, "app ready");
        Ok(Self::new(config, prefs, worker, probe, connector))
    }

    /// Runs the progress subscription and relays its events to the
    /// notification feed until `shutdown` fires.
    pub fn start_progress(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = self.progress.subscribe();
        let bridge = self.bridge.clone();
        let channel = Arc::clone(&self.progress);
        tokio::spawn(async move {
            let relay = async {
                while let Some(event) = events.recv().await {
                    bridge.relay_progress(&event);
                }
            };
            tokio::select! {
                _ = channel.run(shutdown) => {}
                _ = relay => {}
            }
        })
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.progress.connection_state()
    }

    pub async fn job_state(&self) -> JobState {
        self.tracker.state().await
    }

    /// Submits `url` for download into the current folder. Input and
    /// admission errors are also pushed to the notification feed.
    pub async fn download_audio(&self, url: &str) -> Result<oneshot::Receiver<JobOutcome>, AppError> {
        let dir = self.current_folder().await?;
        let request = match DownloadRequest::new(url, dir) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "download request rejected");
                self.bridge.notify(NotificationKind::Error, user_message(&e));
                return Err(e.into());
            }
        };

        match self.tracker.submit(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.bridge.notify(NotificationKind::Error, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Preferred folder if one was chosen, else the configured default.
    pub async fn current_folder(&self) -> Result<PathBuf, AppError> {
        if let Some(dir) = self.prefs.get::<PathBuf>(DOWNLOAD_FOLDER_KEY).await? {
            return Ok(dir);
        }
        absolute(&self.config.library.default_dir)
    }

    /// Asks `picker` for a folder. A choice is persisted and scanned; a
    /// cancelled dialog changes nothing.
    pub async fn select_folder(&self, picker: &dyn FolderPicker) -> Result<Option<PathBuf>, AppError> {
        let current = self.current_folder().await?;
        let Some(chosen) = picker.pick_folder(&current) else {
            tracing::debug!("folder selection cancelled");
            return Ok(None);
        };
        let chosen = absolute(&chosen)?;

        self.prefs.set(DOWNLOAD_FOLDER_KEY, &chosen).await?;
        tracing::info!(dir = %chosen.display(), "download folder selected");
        self.reconciler.scan(&chosen).await?;
        Ok(Some(chosen))
    }

    /// Forgets the chosen folder and goes back to the default one.
    pub async fn reset_folder(&self) -> Result<PathBuf, AppError> {
        if self.prefs.remove(DOWNLOAD_FOLDER_KEY).await? {
            tracing::info!("download folder reset to default");
        }
        let dir = self.current_folder().await?;
        self.reconciler.scan(&dir).await?;
        Ok(dir)
    }

    pub async fn refresh(&self) -> Result<Vec<MediaFile>, AppError> {
        let dir = self.current_folder().await?;
        Ok(self.reconciler.scan(&dir).await?)
    }

    pub async fn files(&self) -> Vec<MediaFile> {
        self.reconciler.files().await
    }

    /// Deletes an audio file from the current folder. Anything else is
    /// refused.
    pub async fn delete_file(&self, path: &Path) -> Result<(), AppError> {
        let path = absolute(path)?;
        let dir = self.current_folder().await?;
        if self.reconciler.active_dir().await.as_deref() != Some(dir.as_path()) {
            self.reconciler.scan(&dir).await?;
        }
        Ok(self.reconciler.delete(&path).await?)
    }

    pub fn play(&self, path: &Path) -> Result<(), AppError> {
        if !path.is_file() {
            return Err(AppError::FileNotFound(path.to_path_buf()));
        }
        self.playback.load(path);
        Ok(())
    }

    pub fn stop(&self) {
        self.playback.stop();
    }

    pub fn drag_file(&self, path: &Path) -> Result<DragRequest, AppError> {
        if !path.is_file() {
            return Err(AppError::FileNotFound(path.to_path_buf()));
        }
        Ok(DragRequest {
            file: path.to_path_buf(),
            icon: self.config.library.drag_icon.clone(),
        })
    }
}

fn metadata_probe(library: &LibraryConfig) -> Arc<dyn MetadataProbe> {
    if library.probe_metadata {
        Arc::new(FfprobeProbe::new(library.ffprobe.clone()))
    } else {
        tracing::info!("metadata probing disabled, listing by file name");
        Arc::new(NoProbe)
    }
}

fn user_message(err: &RequestError) -> String {
    match err {
        RequestError::EmptyUrl => "Please enter a URL".to_string(),
        RequestError::InvalidUrl(url) => format!("Not a valid link: {url}"),
        RequestError::RelativeDirectory(dir) => {
            format!("Download folder must be an absolute path: {}", dir.display())
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, AppError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(AppError::WorkingDirectory)?;
    Ok(cwd.join(path))
}

/// `M:SS`, or an empty string when the duration is unknown.
pub fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s.is_finite() && s > 0.0 => {
            let total = s.floor() as u64;
            format!("{}:{:02}", total / 60, total % 60)
        }
        _ => String::new(),
    }
}

const FOLDER_DISPLAY_CHARS: usize = 50;

/// Shortens long folder paths to their tail.
pub fn display_folder(path: &Path) -> String {
    let full = path.display().to_string();
    let count = full.chars().count();
    if count <= FOLDER_DISPLAY_CHARS {
        return full;
    }
    let tail: String = full.chars().skip(count - FOLDER_DISPLAY_CHARS).collect();
    format!("...{tail}")
}
