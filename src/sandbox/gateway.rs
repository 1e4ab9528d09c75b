//! RPC client for the external sandbox: an isolated code runner reached over
//! HTTP. The gateway's own deadline always exceeds the requested timeout so
//! a slow network never masquerades as a sandbox timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network slack added on top of the caller's requested timeout when
/// computing the gateway's own deadline.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct SandboxRequest {
    pub language: String,
    pub code: String,
    pub trusted_mode: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxResponse {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox request timed out after {0:?}")]
    Timeout(Duration),
    #[error("sandbox transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Client for the sandbox's single RPC endpoint.
pub struct SandboxGateway {
    http: reqwest::Client,
    base_url: String,
}

impl SandboxGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Run `code` in the sandbox. The engine always passes `trusted_mode:
    /// true`: this is the only route skill code has to the internal service
    /// network. One transport-level retry is attempted on connect failure,
    /// within the overall deadline; functional failures are never retried.
    pub async fn execute(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        let deadline = Duration::from_millis(request.timeout_ms) + DEADLINE_SLACK;
        match self.post(&request, deadline).await {
            Ok(response) => Ok(response),
            Err(SandboxError::Transport(e)) if e.is_connect() => {
                self.post(&request, deadline).await
            }
            Err(other) => Err(other),
        }
    }

    async fn post(
        &self,
        request: &SandboxRequest,
        deadline: Duration,
    ) -> Result<SandboxResponse, SandboxError> {
        let send = self
            .http
            .post(format!("{}/execute", self.base_url))
            .json(request)
            .send();

        match tokio::time::timeout(deadline, send).await {
            Ok(Ok(response)) => Ok(response.error_for_status()?.json().await?),
            Ok(Err(e)) => Err(SandboxError::Transport(e)),
            Err(_) => Err(SandboxError::Timeout(deadline)),
        }
    }
}
