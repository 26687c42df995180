// src/worker/mod.rs

//! Runs one download job on the external downloader and reports where the
//! resulting file landed. Three interchangeable strategies share the
//! [`WorkerBackend`] contract; which one is used is fixed by configuration.

mod executable;
mod script;
mod service;

pub use executable::{resolve_executable, ExecutableLocation, ExecutableWorker};
pub use script::ScriptWorker;
pub use service::ServiceWorker;

use crate::config::BackendConfig;
use crate::models::DownloadRequest;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("executable not found at {0}")]
    MissingExecutable(PathBuf),
    #[error("script not found at {0}")]
    MissingScript(PathBuf),
    #[error("cannot create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error while reading worker output: {0}")]
    Io(#[from] std::io::Error),
    /// The worker ran and reported failure; the text is what it said.
    #[error("{0}")]
    Failed(String),
    #[error("service request failed: {0}")]
    Service(#[from] reqwest::Error),
    #[error("malformed service response: {0}")]
    MalformedResponse(String),
}

impl WorkerError {
    /// True when the job never reached the worker.
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            WorkerError::MissingExecutable(_)
                | WorkerError::MissingScript(_)
                | WorkerError::OutputDirectory { .. }
                | WorkerError::Spawn { .. }
        )
    }
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub path: PathBuf,
    /// Raw stdout lines; empty for the service strategy.
    pub lines: Vec<String>,
}

#[async_trait]
pub trait WorkerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the job to completion. Resolves exactly once; never retries.
    async fn invoke(&self, request: &DownloadRequest) -> Result<JobOutput, WorkerError>;
}

/// Builds the single backend selected in configuration.
pub fn from_config(config: &BackendConfig) -> Arc<dyn WorkerBackend> {
    match config {
        BackendConfig::Script {
            interpreter,
            script,
        } => Arc::new(ScriptWorker::new(interpreter.clone(), script.clone())),
        BackendConfig::Executable {
            path,
            name,
            dev_dir,
            resources_dir,
            codec_dir,
        } => {
            let location = ExecutableLocation {
                explicit: path.clone(),
                name: name.clone(),
                dev_dir: dev_dir.clone(),
                resources_dir: resources_dir.clone(),
                codec_dir: codec_dir.clone(),
            };
            let current_exe = std::env::current_exe().ok();
            Arc::new(ExecutableWorker::from_location(&location, current_exe.as_deref()))
        }
        BackendConfig::Service { base_url } => Arc::new(ServiceWorker::new(base_url.clone())),
    }
}

async fn ensure_output_dir(dir: &Path) -> Result<(), WorkerError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| WorkerError::OutputDirectory {
            path: dir.to_path_buf(),
            source,
        })
}

fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    // Keep the downloader from flashing a console window.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

struct ChildOutput {
    status: ExitStatus,
    lines: Vec<String>,
    stderr: String,
}

/// Spawns `cmd` with piped stdio and collects stdout line by line while
/// draining stderr, so neither pipe can fill up and stall the child.
async fn run_collecting(mut cmd: Command, program: &str) -> Result<ChildOutput, WorkerError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| WorkerError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let read_stdout = async {
        let mut lines = Vec::new();
        if let Some(out) = stdout {
            let mut reader = BufReader::new(out).lines();
            while let Some(line) = reader.next_line().await? {
                tracing::debug!(target: "tubetape::worker", "{program}> {line}");
                lines.push(line);
            }
        }
        Ok::<_, std::io::Error>(lines)
    };
    let read_stderr = async {
        let mut text = String::new();
        if let Some(mut err) = stderr {
            err.read_to_string(&mut text).await?;
        }
        Ok::<_, std::io::Error>(text)
    };

    let (lines, stderr) = tokio::try_join!(read_stdout, read_stderr)?;
    let status = child.wait().await?;
    if !stderr.trim().is_empty() {
        tracing::debug!(target: "tubetape::worker", %program, stderr = %stderr.trim(), "worker stderr");
    }

    Ok(ChildOutput {
        status,
        lines,
        stderr,
    })
}

/// Maps a finished child to the job contract: exit 0 is success with the
/// last non-empty stdout line as result path, anything else is failure with
/// stderr or a synthesized message.
fn interpret(output: ChildOutput, request: &DownloadRequest) -> Result<JobOutput, WorkerError> {
    if !output.status.success() {
        let stderr = output.stderr.trim();
        let message = if !stderr.is_empty() {
            stderr.to_string()
        } else if let Some(code) = output.status.code() {
            format!("exited with code {code}")
        } else {
            "terminated by signal".to_string()
        };
        return Err(WorkerError::Failed(message));
    }

    let path = match output.lines.iter().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => PathBuf::from(last.trim()),
        None => {
            tracing::warn!("worker succeeded without printing a result path");
            request.output_directory().to_path_buf()
        }
    };

    Ok(JobOutput {
        path,
        lines: output.lines,
    })
}
