//! Embedding backend boundary
//!
//! Two operations only: `health` and `embed`. The production implementation
//! runs the configured command once per call, writes one JSON request to its
//! stdin and reads one JSON response from its stdout:
//!
//! ```json
//! {"op": "embed", "model": "nomic-embed-text", "compute_mode": "cpu", "texts": ["..."]}
//! {"ok": true, "vectors": [[0.1, 0.2, ...]]}
//! {"ok": false, "error": {"type": "model_missing", "message": "..."}}
//! ```
//!
//! Every call is bounded by its own timeout. On expiry the child (and its
//! process group on Unix) is killed.

use crate::config::{ComputeMode, EmbeddingConfig};
use crate::evidence::EvidenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Bytes of child stderr kept in error messages
const STDERR_EXCERPT_BYTES: usize = 512;

/// Which model to address, where to run it, and how long one call may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub model: String,
    pub compute_mode: ComputeMode,
    pub timeout: Duration,
}

impl BackendTarget {
    /// Target described by the embedding config, if a model is configured
    pub fn from_config(config: &EmbeddingConfig) -> Option<Self> {
        config.model_ref().map(|model| Self {
            model: model.to_string(),
            compute_mode: config.compute_mode,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }
}

/// External embedding process
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Check that the backend can serve `target.model`
    async fn health(&self, target: &BackendTarget) -> Result<(), EvidenceError>;

    /// One vector per input text, in input order
    async fn embed(
        &self,
        target: &BackendTarget,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EvidenceError>;
}

#[derive(Debug, Serialize)]
struct BackendRequest<'a> {
    op: &'static str,
    model: &'a str,
    compute_mode: ComputeMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    texts: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct BackendResponse {
    ok: bool,
    #[serde(default)]
    vectors: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    error: Option<BackendErrorBody>,
}

#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

/// Runs the configured command once per call
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    command: Vec<String>,
}

impl SubprocessBackend {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.command.clone())
    }

    /// Spawn, feed the request, wait for the response under the timeout.
    async fn invoke(
        &self,
        request: &BackendRequest<'_>,
        timeout: Duration,
    ) -> Result<BackendResponse, EvidenceError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(EvidenceError::NotConfigured)?;
        let payload = serde_json::to_vec(request)
            .map_err(|e| EvidenceError::malformed(format!("cannot encode request: {e}")))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a timed-out backend's descendants die with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let run = async {
            let mut child = cmd.spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(EvidenceError::backend(format!(
                    "failed to execute {program}: {e}"
                )))
            }
            Err(_) => {
                return Err(EvidenceError::Timeout {
                    operation: request.op.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };

        if !output.status.success() {
            return Err(EvidenceError::backend(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr_excerpt(&output.stderr)
            )));
        }

        let response: BackendResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| EvidenceError::malformed(format!("{} response: {e}", request.op)))?;

        if !response.ok {
            let (kind, message) = response
                .error
                .map(|b| (b.kind.unwrap_or_else(|| "error".to_string()), b.message))
                .unwrap_or_else(|| ("error".to_string(), "no error detail".to_string()));
            return Err(EvidenceError::backend(format!("{kind}: {message}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl EmbeddingBackend for SubprocessBackend {
    async fn health(&self, target: &BackendTarget) -> Result<(), EvidenceError> {
        let request = BackendRequest {
            op: "health",
            model: &target.model,
            compute_mode: target.compute_mode,
            texts: None,
        };
        self.invoke(&request, target.timeout).await.map(|_| ())
    }

    async fn embed(
        &self,
        target: &BackendTarget,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EvidenceError> {
        let request = BackendRequest {
            op: "embed",
            model: &target.model,
            compute_mode: target.compute_mode,
            texts: Some(texts),
        };
        self.invoke(&request, target.timeout)
            .await?
            .vectors
            .ok_or_else(|| EvidenceError::malformed("embed response has no vectors"))
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let end = stderr.len().min(STDERR_EXCERPT_BYTES);
    String::from_utf8_lossy(&stderr[..end]).trim().to_string()
}
