//! Domain types for the generation pipeline.
//!
//! This module contains the core data structures:
//! - Request: one submission of raw text and its rendered document
//! - Artifact: temporary and retained files produced by pipeline stages
//! - Stage: the per-request state machine
//! - Result: what a successful request hands back

pub mod artifact;
pub mod request;
pub mod result;
pub mod stage;

// Re-export commonly used types
pub use artifact::{ArtifactKind, OutputDocument, TemporaryArtifact};
pub use request::{ConversionRequest, RenderedDocument};
pub use result::PipelineResult;
pub use stage::{PipelineStage, StageMachine};
