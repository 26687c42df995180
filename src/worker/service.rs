// src/worker/service.rs

use super::{JobOutput, WorkerBackend, WorkerError};
use crate::models::DownloadRequest;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct ServiceRequest<'a> {
    url: &'a str,
    #[serde(rename = "downloadDir")]
    download_dir: String,
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    status: Option<String>,
    file_path: Option<String>,
    message: Option<String>,
    /// FastAPI puts the error text here on HTTP errors.
    detail: Option<Value>,
}

/// Talks to a locally running download service over HTTP.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    client: Client,
    base_url: String,
}

impl ServiceWorker {
    pub fn new(base_url: impl Into<String>) -> Self {
        // The service is local; never route it through a system proxy.
        let client = Client::builder().no_proxy().build().unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn download_url(&self) -> String {
        format!("{}/download", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl WorkerBackend for ServiceWorker {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn invoke(&self, request: &DownloadRequest) -> Result<JobOutput, WorkerError> {
        let endpoint = self.download_url();
        tracing::info!(%endpoint, url = request.url(), "posting download request");

        let body = ServiceRequest {
            url: request.url(),
            download_dir: request.output_directory().to_string_lossy().into_owned(),
        };
        let resp = self.client.post(&endpoint).json(&body).send().await?;
        let http_status = resp.status();
        let text = resp.text().await?;

        let parsed: ServiceResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) if http_status.is_success() => {
                return Err(WorkerError::MalformedResponse(e.to_string()));
            }
            Err(_) => {
                tracing::debug!(%http_status, body = %text, "unparseable error body");
                return Err(WorkerError::Failed(format!(
                    "service responded with HTTP {}",
                    http_status.as_u16()
                )));
            }
        };

        if parsed.status.as_deref() == Some("success") {
            return match parsed.file_path {
                Some(path) => Ok(JobOutput {
                    path: PathBuf::from(path),
                    lines: Vec::new(),
                }),
                None => Err(WorkerError::MalformedResponse(
                    "success response without file_path".to_string(),
                )),
            };
        }

        let message = parsed
            .message
            .or_else(|| match parsed.detail {
                Some(Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
                None => None,
            })
            .unwrap_or_else(|| format!("service responded with HTTP {}", http_status.as_u16()));
        tracing::warn!(%http_status, %message, "service reported failure");
        Err(WorkerError::Failed(message))
    }
}
