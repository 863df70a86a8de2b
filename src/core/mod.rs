//! Core pipeline logic.
//!
//! This module contains:
//! - Template: Typst template rendering
//! - Artifacts: per-request temporary file lifecycle
//! - Gate: bounded admission of concurrent requests
//! - Progress: stage notifications for callers
//! - Orchestrator: main execution engine

pub mod artifacts;
pub mod gate;
pub mod orchestrator;
pub mod progress;
pub mod template;

// Re-export commonly used types
pub use artifacts::{discard_path, ArtifactScope, ArtifactStore};
pub use gate::{ConcurrencyGate, Permit, DEFAULT_CONCURRENCY_LIMIT};
pub use orchestrator::{Orchestrator, ToolVersions};
pub use progress::{NoopProgress, ProgressSink};
pub use template::{escape_markup, Template};
