//! Analysis capability client: the external reasoning service each stage calls
//!
//! Defines the client trait, the response type and the error classification
//! the orchestrator's retry policy depends on. Two implementations:
//! - `SubprocessClient`: spawns the configured program (`llm-orc invoke <target>`),
//!   writes the stage input to stdin and reads the response from stdout (production)
//! - `MockClient`: returns preconfigured responses (testing)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Result of one capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    /// `completed`, `failed` or `rate_limited`
    pub status: String,
    /// Response text or JSON
    #[serde(default)]
    pub response: Option<String>,
    /// Error message when the invocation failed
    #[serde(default)]
    pub error: Option<String>,
    /// Execution metadata (timing, usage)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CapabilityResponse {
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            status: "completed".to_string(),
            response: Some(text.into()),
            error: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == "rate_limited"
    }

    /// Turn a non-completed status into the matching error.
    pub fn into_result(self) -> Result<Self, CapabilityError> {
        if self.is_completed() {
            return Ok(self);
        }
        let message = self.error.clone().unwrap_or_else(|| self.status.clone());
        if self.is_rate_limited() {
            Err(CapabilityError::RateLimited(message))
        } else {
            Err(CapabilityError::InvocationFailed(message))
        }
    }
}

/// Errors from capability invocations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapabilityError {
    #[error("timed out after {0} seconds")]
    Timeout(u64),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("capability not available: {0}")]
    Unavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
    #[error("response parse error: {0}")]
    ParseError(String),
}

impl CapabilityError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_))
    }
}

/// Client trait for the analysis capability.
///
/// Abstracts over transport (subprocess, mock) so the orchestrator does not
/// depend on how the capability is reached.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    /// Check if the capability is reachable.
    async fn is_available(&self) -> bool;

    /// Invoke the stage's `target` with serialized input.
    async fn invoke(&self, target: &str, input: &str) -> Result<CapabilityResponse, CapabilityError>;
}

/// Runs the capability as a child process per invocation.
///
/// The child is killed if the call is dropped (timeout or run abort).
#[derive(Debug, Clone)]
pub struct SubprocessClient {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl Default for SubprocessClient {
    fn default() -> Self {
        Self::new("llm-orc", vec!["invoke".to_string()])
    }
}

impl SubprocessClient {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Interpret captured stdout: a JSON response envelope, or bare text.
fn parse_stdout(stdout: &str) -> Result<CapabilityResponse, CapabilityError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(CapabilityError::ParseError("empty response".to_string()));
    }
    match serde_json::from_str::<CapabilityResponse>(trimmed) {
        Ok(response) => response.into_result(),
        Err(_) => Ok(CapabilityResponse::completed(trimmed)),
    }
}

fn classify_exit(stderr: &str) -> CapabilityError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("rate limit") || lowered.contains("429") {
        CapabilityError::RateLimited(stderr.trim().to_string())
    } else {
        CapabilityError::InvocationFailed(stderr.trim().to_string())
    }
}

#[async_trait]
impl CapabilityClient for SubprocessClient {
    async fn is_available(&self) -> bool {
        let mut cmd = self.command();
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        matches!(cmd.status().await, Ok(status) if status.success())
    }

    async fn invoke(&self, target: &str, input: &str) -> Result<CapabilityResponse, CapabilityError> {
        let mut cmd = self.command();
        cmd.args(&self.args)
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CapabilityError::Unavailable(format!("'{}' not found", self.program))
            }
            _ => CapabilityError::Unavailable(e.to_string()),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| CapabilityError::InvocationFailed(format!("writing input: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CapabilityError::InvocationFailed(e.to_string()))?;
        debug!(target, status = ?output.status.code(), "capability process exited");

        if !output.status.success() {
            return Err(classify_exit(&String::from_utf8_lossy(&output.stderr)));
        }
        parse_stdout(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Mock client for testing; returns preconfigured responses.
pub struct MockClient {
    available: bool,
    responses: HashMap<String, Result<CapabilityResponse, CapabilityError>>,
    calls: AtomicUsize,
}

impl MockClient {
    /// Create a mock client that reports as available.
    pub fn available() -> Self {
        Self {
            available: true,
            responses: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a mock client that reports as unavailable.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    /// Register a completed text response for a target.
    pub fn with_text(self, target: impl Into<String>, text: impl Into<String>) -> Self {
        self.with_response(target, CapabilityResponse::completed(text))
    }

    /// Register a response for a target.
    pub fn with_response(mut self, target: impl Into<String>, response: CapabilityResponse) -> Self {
        self.responses.insert(target.into(), Ok(response));
        self
    }

    /// Register a failure for a target.
    pub fn with_failure(mut self, target: impl Into<String>, error: CapabilityError) -> Self {
        self.responses.insert(target.into(), Err(error));
        self
    }

    /// Number of `invoke` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityClient for MockClient {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn invoke(&self, target: &str, _input: &str) -> Result<CapabilityResponse, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(CapabilityError::Unavailable(
                "mock client configured as unavailable".to_string(),
            ));
        }
        match self.responses.get(target) {
            Some(result) => result.clone(),
            None => Err(CapabilityError::InvalidInput(format!(
                "no mock response for target '{}'",
                target
            ))),
        }
    }
}
