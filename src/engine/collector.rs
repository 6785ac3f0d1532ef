//! Bridge to the external collector binary.
//!
//! Each invocation spawns a fresh process, writes one request line to its
//! stdin and reads result lines from its stdout until EOF or the deadline.
//! The process never outlives the call.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::engine::protocol::{CollectorRequest, CollectorResult};

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Collector binary not found at {0}")]
    BinaryNotFound(PathBuf),
    #[error("Failed to encode collector request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to spawn collector: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to write request to collector: {0}")]
    Write(#[source] std::io::Error),
    #[error("Failed to read collector output: {0}")]
    Read(#[source] std::io::Error),
    #[error("Collector stdio pipe was not captured")]
    PipeUnavailable,
    #[error("Collector pool is closed")]
    PoolClosed,
}

/// Anything able to answer a collector request.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn invoke(
        &self,
        request: &CollectorRequest,
    ) -> Result<Vec<CollectorResult>, CollectorError>;
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub binary_path: PathBuf,
    pub args: Vec<String>,
    /// Wall-clock bound covering the write, the read and the exit wait.
    pub timeout: Duration,
    pub max_concurrent: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("go/nms-plugin"),
            args: Vec::new(),
            timeout: Duration::from_secs(30),
            max_concurrent: 2,
        }
    }
}

/// Runs the collector as a child process.
pub struct ProcessCollector {
    config: CollectorConfig,
    permits: Arc<Semaphore>,
}

impl ProcessCollector {
    pub fn new(config: CollectorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, permits }
    }

    async fn exchange(
        &self,
        child: &mut Child,
        line: &str,
    ) -> Result<Vec<CollectorResult>, CollectorError> {
        let deadline = Instant::now() + self.config.timeout;
        let mut stdin = child.stdin.take().ok_or(CollectorError::PipeUnavailable)?;
        let stdout = child.stdout.take().ok_or(CollectorError::PipeUnavailable)?;

        match timeout_at(deadline, write_request(&mut stdin, line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CollectorError::Write(e)),
            Err(_) => {
                warn!("Collector timed out before accepting the request.");
                return Ok(Vec::new());
            }
        }
        // EOF on stdin tells the collector the request is complete.
        drop(stdin);

        let mut results = Vec::new();
        let read_outcome = timeout_at(deadline, read_results(stdout, &mut results)).await;
        match read_outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CollectorError::Read(e)),
            Err(_) => {
                warn!(
                    parsed = results.len(),
                    "Collector timed out, returning the results read so far."
                );
                return Ok(results);
            }
        }

        match timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(?status, "Collector exited cleanly.");
            }
            Ok(Ok(status)) => {
                error!(exit_code = ?status.code(), parsed = results.len(), "Collector process failed.");
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to wait for collector process.");
            }
            Err(_) => {
                warn!(parsed = results.len(), "Collector closed stdout but did not exit in time.");
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl Collector for ProcessCollector {
    async fn invoke(
        &self,
        request: &CollectorRequest,
    ) -> Result<Vec<CollectorResult>, CollectorError> {
        let binary = &self.config.binary_path;
        if !tokio::fs::try_exists(binary).await.unwrap_or(false) {
            error!(path = ?binary, "Collector binary not found.");
            return Err(CollectorError::BinaryNotFound(binary.clone()));
        }

        let line = serde_json::to_string(request)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CollectorError::PoolClosed)?;

        let mut command = Command::new(binary);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(CollectorError::Spawn)?;
        info!(
            pid = ?child.id(),
            request_type = ?request.request_type,
            contexts = request.contexts.len(),
            "Spawned collector process."
        );

        let outcome = self.exchange(&mut child, &line).await;

        // Reap or kill on every path so no collector is left behind.
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill collector process.");
                } else {
                    debug!("Collector process killed.");
                }
            }
        }

        outcome
    }
}

async fn write_request(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Reads output until EOF. Every non-blank line is parsed on its own; a bad
/// line is logged and skipped.
async fn read_results(
    stream: impl AsyncRead + Unpin,
    results: &mut Vec<CollectorResult>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buffer);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match CollectorResult::parse_line(line) {
            Ok(result) => results.push(result),
            Err(e) => warn!(line = %line, error = %e, "Skipping malformed collector output line."),
        }
    }
}
