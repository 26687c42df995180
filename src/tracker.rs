// src/tracker.rs

use crate::bridge::{NotificationBridge, NotificationKind};
use crate::models::{DownloadRequest, JobOutcome, JobState};
use crate::reconciler::Reconciler;
use crate::worker::{WorkerBackend, WorkerError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("a download is already running for {0}")]
    Busy(String),
}

/// Owns the single job slot. Only this type changes [`JobState`]; a second
/// submission while a job is running is rejected without touching the worker.
pub struct JobTracker {
    worker: Arc<dyn WorkerBackend>,
    reconciler: Arc<Reconciler>,
    bridge: NotificationBridge,
    state: Mutex<JobState>,
}

impl JobTracker {
    pub fn new(
        worker: Arc<dyn WorkerBackend>,
        reconciler: Arc<Reconciler>,
        bridge: NotificationBridge,
    ) -> Self {
        Self {
            worker,
            reconciler,
            bridge,
            state: Mutex::new(JobState::Idle),
        }
    }

    pub async fn state(&self) -> JobState {
        self.state.lock().await.clone()
    }

    /// Admits `request` if the slot is free and starts it in the background.
    /// The receiver resolves exactly once with the terminal outcome.
    pub async fn submit(
        self: &Arc<Self>,
        request: DownloadRequest,
    ) -> Result<oneshot::Receiver<JobOutcome>, TrackerError> {
        {
            let mut state = self.state.lock().await;
            if let JobState::Running(current) = &*state {
                tracing::warn!(
                    running = current.url(),
                    rejected = request.url(),
                    "download rejected, another job is running"
                );
                return Err(TrackerError::Busy(current.url().to_string()));
            }
            *state = JobState::Running(request.clone());
        }

        tracing::info!(
            url = request.url(),
            dir = %request.output_directory().display(),
            backend = self.worker.name(),
            "job started"
        );
        self.bridge.notify(NotificationKind::Started, "Download started...");

        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.run(request).await;
            if tx.send(outcome).is_err() {
                tracing::debug!("job outcome dropped, nobody was waiting");
            }
        });
        Ok(rx)
    }

    async fn run(&self, request: DownloadRequest) -> JobOutcome {
        // Run the backend on its own task so a panic inside it still ends
        // in a terminal notification instead of a stuck Running slot.
        let worker = Arc::clone(&self.worker);
        let job = request.clone();
        let result = match tokio::spawn(async move { worker.invoke(&job).await }).await {
            Ok(result) => result,
            Err(join_err) => {
                tracing::error!(error = %join_err, "worker task aborted");
                Err(WorkerError::Failed("download worker crashed".to_string()))
            }
        };

        let outcome = match result {
            Ok(output) => {
                self.set_state(JobState::Succeeded(output.path.clone())).await;
                let name = output
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| output.path.display().to_string());
                tracing::info!(
                    path = %output.path.display(),
                    output_lines = output.lines.len(),
                    "job succeeded"
                );
                self.bridge
                    .notify(NotificationKind::Finished, format!("Download complete: {name}"));

                match self.reconciler.rescan_job_folder(request.output_directory()).await {
                    Ok(true) => {}
                    Ok(false) => tracing::info!(
                        dir = %request.output_directory().display(),
                        "download folder changed while the job ran, listing left as is"
                    ),
                    Err(e) => tracing::warn!(error = %e, "rescan after download failed"),
                }
                JobOutcome::Succeeded(output.path)
            }
            Err(e) => {
                let message = e.to_string();
                if e.is_launch_error() {
                    tracing::error!(error = ?e, url = request.url(), "downloader could not be launched");
                } else {
                    tracing::error!(error = ?e, url = request.url(), "job failed");
                }
                self.set_state(JobState::Failed(message.clone())).await;
                self.bridge.notify(NotificationKind::Error, message.clone());
                JobOutcome::Failed(message)
            }
        };

        self.set_state(JobState::Idle).await;
        outcome
    }

    async fn set_state(&self, next: JobState) {
        let mut state = self.state.lock().await;
        tracing::debug!(from = ?*state, to = ?next, "job state");
        *state = next;
    }
}
