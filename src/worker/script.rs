// src/worker/script.rs

use super::{command, ensure_output_dir, interpret, run_collecting, JobOutput, WorkerBackend, WorkerError};
use crate::models::DownloadRequest;
use async_trait::async_trait;
use std::path::PathBuf;

/// Runs the downloader as an interpreted script:
/// `<interpreter> <script> <url> <output dir>`.
#[derive(Debug, Clone)]
pub struct ScriptWorker {
    interpreter: PathBuf,
    script: PathBuf,
}

impl ScriptWorker {
    pub fn new(interpreter: PathBuf, script: PathBuf) -> Self {
        Self {
            interpreter,
            script,
        }
    }
}

#[async_trait]
impl WorkerBackend for ScriptWorker {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn invoke(&self, request: &DownloadRequest) -> Result<JobOutput, WorkerError> {
        if !tokio::fs::try_exists(&self.script).await.unwrap_or(false) {
            return Err(WorkerError::MissingScript(self.script.clone()));
        }
        ensure_output_dir(request.output_directory()).await?;

        tracing::info!(
            interpreter = %self.interpreter.display(),
            script = %self.script.display(),
            url = request.url(),
            "running download script"
        );

        let mut cmd = command(&self.interpreter);
        cmd.arg(&self.script)
            .arg(request.url())
            .arg(request.output_directory());

        let program = self.interpreter.display().to_string();
        let output = run_collecting(cmd, &program).await?;
        interpret(output, request)
    }
}
