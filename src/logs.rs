//! Container log retrieval with tail/follow/since filtering.
//!
//! Absence of the container is an expected outcome and produces a
//! `found = false` result, not an error. The query keeps stdout and
//! stderr in separate buffers, drained concurrently with the wait
//! under the same deadlock-avoidance rule as the process runner.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::docker::{container_name, ContainerControl};
use crate::error::{Result, SandboxError};

/// Sentinel `since` value meaning "no time filter".
pub const SINCE_ALL: &str = "all";

/// Filters for one log query.
#[derive(Debug, Clone)]
pub struct LogQuery {
    /// Tail this many lines; `0` means unlimited.
    pub lines: u32,
    /// Keep streaming, still bounded by the logs timeout ceiling.
    pub follow: bool,
    /// Time filter (docker `--since` syntax), or [`SINCE_ALL`].
    pub since: String,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            lines: 50,
            follow: false,
            since: SINCE_ALL.to_string(),
        }
    }
}

/// Outcome of a log query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResult {
    pub found: bool,
    pub container_name: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub has_logs: bool,
    pub line_count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LogsResult {
    fn not_found(container_name: String) -> Self {
        Self {
            found: false,
            container_name,
            stdout: String::new(),
            stderr: "Container not found".to_string(),
            exit_code: -1,
            has_logs: false,
            line_count: 0,
            timestamp: Utc::now(),
            message: Some("Container not found".to_string()),
        }
    }
}

/// Queries the external tool for a container's output.
#[derive(Debug, Clone)]
pub struct LogRetriever {
    control: ContainerControl,
    timeout: Duration,
    drain_grace: Duration,
}

impl LogRetriever {
    pub fn new(config: &Config) -> Self {
        Self {
            control: ContainerControl::new(config),
            timeout: config.timeouts.logs(),
            drain_grace: config.timeouts.drain_grace(),
        }
    }

    /// Retrieves logs for `sandbox-<id>`, probing existence first.
    pub async fn logs(&self, id: &str, query: &LogQuery) -> Result<LogsResult> {
        let name = container_name(id);

        if !self.control.exists(&name).await? {
            debug!("Log query for absent container: {}", name);
            return Ok(LogsResult::not_found(name));
        }

        let args = log_args(&name, query);
        debug!("Executing command: {} {:?}", self.control.docker_bin(), args);

        let mut child = Command::new(self.control.docker_bin())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::io("spawning log query", &e))?;

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let buf = Arc::clone(&stdout_buf);
            drains.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = buf.lock().await;
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            drains.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = buf.lock().await;
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }));
        }

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(SandboxError::io("waiting for log query", &e)),
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                let partial = stdout_buf.lock().await.clone();
                return Err(SandboxError::timeout(self.timeout, partial));
            }
        };

        let _ = tokio::time::timeout(self.drain_grace, async {
            for handle in drains {
                let _ = handle.await;
            }
        })
        .await;

        let stdout = stdout_buf.lock().await.clone();
        let stderr = stderr_buf.lock().await.clone();
        let has_logs = !stdout.trim().is_empty();
        let line_count = stdout.lines().count();

        Ok(LogsResult {
            found: true,
            container_name: name,
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
            has_logs,
            line_count,
            timestamp: Utc::now(),
            message: None,
        })
    }
}

/// Builds the `docker logs` argument vector from the query filters.
fn log_args(name: &str, query: &LogQuery) -> Vec<String> {
    let mut args = vec!["logs".to_string()];
    if query.lines > 0 {
        args.push("--tail".to_string());
        args.push(query.lines.to_string());
    }
    if query.follow {
        args.push("--follow".to_string());
    }
    if query.since != SINCE_ALL {
        args.push("--since".to_string());
        args.push(query.since.clone());
    }
    args.push("--timestamps".to_string());
    args.push(name.to_string());
    args
}
