//! Result of a successful pipeline execution.

use std::path::Path;
use std::time::Duration;

use image::DynamicImage;
use uuid::Uuid;

use super::artifact::OutputDocument;

/// Preview image plus the downloadable PDF
#[derive(Debug)]
pub struct PipelineResult {
    /// Request that produced this result
    pub request_id: Uuid,

    /// Decoded first-page preview
    pub image: DynamicImage,

    /// Retained compiled PDF
    pub output: OutputDocument,

    /// Wall-clock time from admission to completion. Queue wait before
    /// admission is not included; see [`crate::core::Permit::waited`].
    pub elapsed: Duration,
}

impl PipelineResult {
    pub fn output_document_path(&self) -> &Path {
        self.output.path()
    }

    /// Preview dimensions as (width, height)
    pub fn image_dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}
