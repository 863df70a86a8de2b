//! Error types for the generation pipeline.
//!
//! Three layers of failure:
//!
//! * [`InvocationError`]: an external tool could not be run at all (missing
//!   binary, wait failure, timeout). A tool that runs and exits non-zero is
//!   *not* an invocation error; its exit code comes back as data.
//! * [`PipelineError`]: a single request failed. Returned from
//!   [`crate::core::Orchestrator::submit`] after the request's artifacts have
//!   been cleaned up.
//! * [`StartupError`]: the service cannot start (tool probe or template
//!   problem). Fatal.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to run an external binary.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The process could not be spawned (missing executable, permission denied).
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child or reading its output streams failed.
    #[error("failed to wait for '{binary}': {source}")]
    Wait {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child ran past its timeout and was killed.
    #[error("'{binary}' timed out after {timeout:?}")]
    TimedOut { binary: PathBuf, timeout: Duration },
}

/// Template loading or parsing failure. Always a configuration problem.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid template: {0}")]
    Parse(#[source] Box<handlebars::TemplateError>),

    #[error("template has no '{{{{ text }}}}' slot")]
    MissingSlot,

    #[error("failed to render template: {0}")]
    Render(#[source] Box<handlebars::RenderError>),
}

/// Per-request pipeline failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Empty or whitespace-only input text.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// The compiler exited non-zero.
    #[error("compilation failed with exit code {exit_code}: {diagnostics}")]
    Compile { exit_code: i32, diagnostics: String },

    /// The rasterizer exited non-zero.
    #[error("rasterization failed with exit code {exit_code}")]
    Raster { exit_code: i32 },

    /// An external tool could not be run.
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// Reading, writing or removing one of the request's own files failed.
    #[error("artifact I/O failed for '{path}': {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The raster image could not be decoded.
    #[error("failed to load preview image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The caller cancelled the request.
    #[error("request was cancelled")]
    Cancelled,

    /// The concurrency gate was closed while the request waited for a permit.
    #[error("service is shutting down")]
    GateClosed,

    /// The template could not be rendered for this request.
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Message safe to show to the person who submitted the text.
    ///
    /// Raw process and file-system details stay in the diagnostic log. The
    /// compiler's diagnostics are the exception: they describe the user's
    /// own document.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Validation { .. } => "Please paste your text.".to_string(),
            PipelineError::Compile { diagnostics, .. } if diagnostics.trim().is_empty() => {
                "Typst compilation failed.".to_string()
            }
            PipelineError::Compile { diagnostics, .. } => {
                format!("Typst compilation failed.\n{}", diagnostics.trim())
            }
            PipelineError::Raster { .. } => {
                "Failed to extract the first page of the PDF file.".to_string()
            }
            PipelineError::Invocation(InvocationError::TimedOut { .. }) => {
                "Document generation took too long and was stopped.".to_string()
            }
            PipelineError::Cancelled => "The request was cancelled.".to_string(),
            PipelineError::GateClosed => "The service is shutting down.".to_string(),
            PipelineError::Invocation(_)
            | PipelineError::Artifact { .. }
            | PipelineError::Image { .. }
            | PipelineError::Template(_)
            | PipelineError::Internal(_) => {
                "Document generation failed because of a server problem.".to_string()
            }
        }
    }

    /// True when resubmitting different input could succeed.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation { .. } | PipelineError::Compile { .. }
        )
    }

    pub(crate) fn artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Artifact {
            path: path.into(),
            source,
        }
    }
}

/// Fatal errors raised before any request is accepted.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A tool's `--version` probe exited non-zero.
    #[error("{tool} version probe failed (exit code {exit_code}): {stderr}")]
    ProbeFailed {
        tool: String,
        exit_code: i32,
        stderr: String,
    },

    /// A tool's `--version` probe could not be run.
    #[error("{tool} is unreachable: {source}")]
    ProbeInvocation {
        tool: String,
        #[source]
        source: InvocationError,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to prepare work directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
