//! Conversion requests and rendered documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// A single submission of raw text.
///
/// Owned by exactly one pipeline execution. The id names the request's
/// private artifact directory, so two requests never share a file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Unique identifier for this request
    pub id: Uuid,

    /// Text exactly as the user submitted it
    pub raw_text: String,

    /// When the request was created
    pub received_at: DateTime<Utc>,
}

impl ConversionRequest {
    /// Create a new request with a fresh id
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_text: raw_text.into(),
            received_at: Utc::now(),
        }
    }

    /// Reject empty and whitespace-only text
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.raw_text.trim().is_empty() {
            return Err(PipelineError::Validation {
                reason: if self.raw_text.is_empty() {
                    "input text is empty".to_string()
                } else {
                    "input text contains only whitespace".to_string()
                },
            });
        }
        Ok(())
    }
}

/// Typst source produced by the template renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    source_text: String,
}

impl RenderedDocument {
    pub(crate) fn new(source_text: String) -> Self {
        Self { source_text }
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn len(&self) -> usize {
        self.source_text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_text.is_empty()
    }
}
