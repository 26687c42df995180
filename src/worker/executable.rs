// src/worker/executable.rs

use super::{command, ensure_output_dir, interpret, run_collecting, JobOutput, WorkerBackend, WorkerError};
use crate::models::DownloadRequest;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Where to look for the prebuilt downloader.
#[derive(Debug, Clone)]
pub struct ExecutableLocation {
    pub explicit: Option<PathBuf>,
    /// Base name without platform suffix.
    pub name: String,
    pub dev_dir: PathBuf,
    /// Relative to the directory of the running binary.
    pub resources_dir: PathBuf,
    pub codec_dir: PathBuf,
}

/// Resolved `(binary, codec dir)` for this run.
///
/// An explicit path wins. Otherwise a packaged build is detected by the
/// binary sitting in `resources_dir` next to `current_exe`; failing that the
/// development `dev_dir` is used. The codec dir follows the same base.
pub fn resolve_executable(location: &ExecutableLocation, current_exe: Option<&Path>) -> (PathBuf, PathBuf) {
    let file_name = format!("{}{}", location.name, std::env::consts::EXE_SUFFIX);

    if let Some(explicit) = &location.explicit {
        return (explicit.clone(), location.codec_dir.clone());
    }

    if let Some(exe_dir) = current_exe.and_then(Path::parent) {
        let resources = exe_dir.join(&location.resources_dir);
        let packaged = resources.join(&file_name);
        if packaged.is_file() {
            let codec_dir = if location.codec_dir.is_absolute() {
                location.codec_dir.clone()
            } else {
                resources.join(&location.codec_dir)
            };
            return (packaged, codec_dir);
        }
    }

    (location.dev_dir.join(file_name), location.codec_dir.clone())
}

/// Runs a prebuilt, platform-specific downloader binary with the codec tool
/// directory prepended to its PATH.
#[derive(Debug, Clone)]
pub struct ExecutableWorker {
    executable: PathBuf,
    codec_dir: PathBuf,
}

impl ExecutableWorker {
    pub fn new(executable: PathBuf, codec_dir: PathBuf) -> Self {
        Self {
            executable,
            codec_dir,
        }
    }

    pub fn from_location(location: &ExecutableLocation, current_exe: Option<&Path>) -> Self {
        let (executable, codec_dir) = resolve_executable(location, current_exe);
        tracing::debug!(
            executable = %executable.display(),
            codec_dir = %codec_dir.display(),
            "resolved downloader executable"
        );
        Self::new(executable, codec_dir)
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn child_path(&self) -> Option<OsString> {
        let current = std::env::var_os("PATH").unwrap_or_default();
        let entries = std::iter::once(self.codec_dir.clone()).chain(std::env::split_paths(&current));
        match std::env::join_paths(entries) {
            Ok(joined) => Some(joined),
            Err(e) => {
                tracing::warn!(codec_dir = %self.codec_dir.display(), error = %e, "cannot add codec dir to PATH");
                None
            }
        }
    }
}

#[async_trait]
impl WorkerBackend for ExecutableWorker {
    fn name(&self) -> &'static str {
        "executable"
    }

    async fn invoke(&self, request: &DownloadRequest) -> Result<JobOutput, WorkerError> {
        if !tokio::fs::try_exists(&self.executable).await.unwrap_or(false) {
            tracing::error!(path = %self.executable.display(), "downloader executable is missing");
            return Err(WorkerError::MissingExecutable(self.executable.clone()));
        }
        ensure_output_dir(request.output_directory()).await?;

        tracing::info!(
            executable = %self.executable.display(),
            url = request.url(),
            "starting downloader"
        );

        let mut cmd = command(&self.executable);
        cmd.arg(request.url()).arg(request.output_directory());
        if let Some(path) = self.child_path() {
            cmd.env("PATH", path);
        }

        let program = self
            .executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.display().to_string());
        let output = run_collecting(cmd, &program).await?;
        let result = interpret(output, request);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "downloader failed");
        }
        result
    }
}
