//! Adapter interfaces for external tools.
//!
//! Adapters provide a unified interface for running the command-line tools
//! the pipeline depends on (the Typst compiler and ImageMagick).

pub mod magick;
pub mod process;
pub mod typst;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{InvocationError, StartupError};

// Re-export the process runner
pub use process::ProcessRunner;

/// One completed run of an external command.
///
/// Only constructed after the child has terminated, so `exit_code` is
/// final. A child terminated by a signal reports `-1`.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Binary that was run
    pub binary: PathBuf,

    /// Arguments, in order
    pub arguments: Vec<OsString>,

    /// Captured standard output (lossy UTF-8)
    pub stdout: String,

    /// Captured standard error (lossy UTF-8)
    pub stderr: String,

    /// Process exit code
    pub exit_code: i32,

    /// Time from spawn to exit
    pub elapsed: Duration,
}

impl ToolInvocation {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Human-readable command line for logs
    pub fn command_line(&self) -> String {
        command_line(&self.binary, &self.arguments)
    }

    /// Best diagnostic text: stderr, falling back to stdout
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

pub(crate) fn command_line(binary: &Path, arguments: &[OsString]) -> String {
    let mut line = binary.display().to_string();
    for arg in arguments {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Trait for running external commands
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `binary` with `arguments` and wait for it to exit.
    ///
    /// A non-zero exit is reported through [`ToolInvocation::exit_code`];
    /// only a failure to run the process at all is an error.
    async fn invoke(
        &self,
        binary: &Path,
        arguments: &[OsString],
        timeout: Duration,
    ) -> Result<ToolInvocation, InvocationError>;
}

/// A configured external tool: a binary path plus its timeout
#[derive(Debug, Clone)]
pub struct ExternalTool {
    /// Human-readable tool name
    pub name: &'static str,

    /// Path to the binary (bare names are looked up on PATH)
    pub binary: PathBuf,

    /// Per-invocation timeout
    pub timeout: Duration,
}

impl ExternalTool {
    pub fn new(name: &'static str, binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            name,
            binary: binary.into(),
            timeout,
        }
    }

    /// Run the tool with the given arguments
    pub async fn run(
        &self,
        runner: &dyn ToolRunner,
        arguments: Vec<OsString>,
    ) -> Result<ToolInvocation, InvocationError> {
        debug!(tool = self.name, command = %command_line(&self.binary, &arguments), "Invoking tool");
        runner.invoke(&self.binary, &arguments, self.timeout).await
    }

    /// Run `<tool> --version` and return the first line of its output
    pub async fn probe_version(&self, runner: &dyn ToolRunner) -> Result<String, StartupError> {
        let invocation = self
            .run(runner, vec![OsString::from("--version")])
            .await
            .map_err(|source| StartupError::ProbeInvocation {
                tool: self.name.to_string(),
                source,
            })?;

        if !invocation.success() {
            return Err(StartupError::ProbeFailed {
                tool: self.name.to_string(),
                exit_code: invocation.exit_code,
                stderr: invocation.stderr.trim().to_string(),
            });
        }

        Ok(invocation
            .stdout
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}
