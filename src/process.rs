//! Synchronous driving of one external command to completion.
//!
//! The child's stdout and stderr are drained line-by-line into one
//! combined buffer while the wait is in flight. The drain must run
//! concurrently with the wait: a full, unread OS pipe buffer would
//! otherwise stall the child and deadlock the wait.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, SandboxError};

/// Exit code and combined output of a finished external command.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub output: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs `program` with `args`, draining combined output concurrently
/// with a `timeout`-bounded wait.
///
/// On expiry the process is forcibly killed and the error carries the
/// output captured so far. After a normal exit the drain tasks get a
/// bounded `grace` period; a drain that overruns it is abandoned and
/// its partial output used.
pub async fn run(
    program: impl AsRef<OsStr>,
    args: &[String],
    work_dir: Option<&Path>,
    label: &str,
    timeout: Duration,
    grace: Duration,
) -> Result<RunOutput> {
    let program = program.as_ref();
    debug!("Executing command: {:?} {:?}", program, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = work_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| SandboxError::io(format!("spawning {}", program.to_string_lossy()), &e))?;

    let buffer = Arc::new(Mutex::new(String::new()));
    let mut drains: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        drains.push(spawn_drain(stdout, Arc::clone(&buffer), label.to_string()));
    }
    if let Some(stderr) = child.stderr.take() {
        drains.push(spawn_drain(stderr, Arc::clone(&buffer), label.to_string()));
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            // Bounded grace for the drains to flush; an overrunning
            // drain is abandoned and its partial output used.
            let joined = tokio::time::timeout(grace, async {
                for handle in drains {
                    let _ = handle.await;
                }
            })
            .await;
            if joined.is_err() {
                debug!("Output drain did not finish within grace period");
            }

            let output = buffer.lock().await.clone();
            let exit_code = status.code().unwrap_or(-1);
            debug!("Command finished with exit code {}", exit_code);
            Ok(RunOutput { exit_code, output })
        }
        Ok(Err(e)) => Err(SandboxError::io("waiting for child process", &e)),
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let output = buffer.lock().await.clone();
            debug!("Command killed after {:?} timeout", timeout);
            Err(SandboxError::timeout(timeout, output))
        }
    }
}

/// Like [`run`], but a nonzero exit code is an `ExternalTool` error
/// carrying the combined output.
pub async fn run_checked(
    program: impl AsRef<OsStr>,
    args: &[String],
    work_dir: Option<&Path>,
    label: &str,
    timeout: Duration,
    grace: Duration,
) -> Result<RunOutput> {
    let result = run(program, args, work_dir, label, timeout, grace).await?;
    if !result.success() {
        return Err(SandboxError::external_tool(result.exit_code, result.output));
    }
    Ok(result)
}

fn spawn_drain<R>(reader: R, buffer: Arc<Mutex<String>>, label: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("[{}] {}", label, line);
            let mut buf = buffer.lock().await;
            buf.push_str(&line);
            buf.push('\n');
        }
    })
}
