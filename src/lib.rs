//! pagesmith - Typst document generation pipeline
//!
//! Turns plain text into a compiled PDF and a first-page preview image by
//! orchestrating two external tools: the Typst compiler and ImageMagick.
//!
//! # Architecture
//!
//! Each request flows through a fixed pipeline:
//! - Admission through a bounded, FIFO concurrency gate
//! - Template rendering (user text placed into a Typst document)
//! - `typst compile` on the rendered source
//! - ImageMagick extraction of page 0 onto a white background
//! - Preview decoding, then cleanup of everything except the PDF
//!
//! Every request works in its own directory, so concurrent requests never
//! share a file, and every exit path removes the request's temporary files.
//!
//! # Modules
//!
//! - `adapters`: External tool invocation (process runner, typst, magick)
//! - `core`: Orchestration logic (Orchestrator, Gate, Artifacts, Template)
//! - `domain`: Data structures (Request, Artifact, Stage, Result)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Generate a PDF and a preview
//! echo "Hello" | pagesmith generate --output hello.pdf --preview hello.png
//!
//! # Check that both tools are reachable
//! pagesmith probe
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use core::{ConcurrencyGate, NoopProgress, Orchestrator, ProgressSink, Template, ToolVersions};
pub use domain::{
    ArtifactKind, ConversionRequest, OutputDocument, PipelineResult, PipelineStage,
    RenderedDocument, TemporaryArtifact,
};
pub use error::{InvocationError, PipelineError, StartupError, TemplateError};
