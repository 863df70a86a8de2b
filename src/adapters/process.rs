//! Subprocess runner.
//!
//! Spawns the tool with stdin closed, drains stdout and stderr while waiting,
//! and only returns once the child has exited. On timeout the child is killed
//! and reaped before the error is returned.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ToolInvocation, ToolRunner};
use crate::error::InvocationError;

/// Runs tools as child processes of this one
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

async fn drain<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn invoke(
        &self,
        binary: &Path,
        arguments: &[OsString],
        step_timeout: Duration,
    ) -> Result<ToolInvocation, InvocationError> {
        let started = Instant::now();

        let mut command = Command::new(binary);
        command
            .args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A dropped (cancelled) invocation must not leave the child running
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| InvocationError::Spawn {
            binary: binary.to_path_buf(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = {
            let wait = async {
                let (status, out, err) =
                    tokio::join!(child.wait(), drain(stdout), drain(stderr));
                Ok::<_, std::io::Error>((status?, out?, err?))
            };
            timeout(step_timeout, wait).await
        };

        match outcome {
            Ok(Ok((status, out, err))) => {
                let invocation = ToolInvocation {
                    binary: binary.to_path_buf(),
                    arguments: arguments.to_vec(),
                    stdout: String::from_utf8_lossy(&out).into_owned(),
                    stderr: String::from_utf8_lossy(&err).into_owned(),
                    exit_code: status.code().unwrap_or(-1),
                    elapsed: started.elapsed(),
                };
                debug!(
                    binary = %binary.display(),
                    exit_code = invocation.exit_code,
                    elapsed_ms = invocation.elapsed.as_millis() as u64,
                    "Tool exited"
                );
                Ok(invocation)
            }
            Ok(Err(source)) => Err(InvocationError::Wait {
                binary: binary.to_path_buf(),
                source,
            }),
            Err(_) => {
                warn!(
                    binary = %binary.display(),
                    timeout_ms = step_timeout.as_millis() as u64,
                    "Tool timed out, killing child"
                );
                // kill() also waits, so no zombie is left behind
                if let Err(e) = child.kill().await {
                    warn!(binary = %binary.display(), error = %e, "Failed to kill timed-out child");
                }
                Err(InvocationError::TimedOut {
                    binary: binary.to_path_buf(),
                    timeout: step_timeout,
                })
            }
        }
    }
}
