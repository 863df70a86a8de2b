//! Files produced by pipeline stages.
//!
//! Temporary artifacts live only as long as their request. The compiled PDF of
//! a successful request is handed to the caller as an [`OutputDocument`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::artifacts::{discard_dir, discard_path};

/// A file created by one stage and consumed by a later one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryArtifact {
    /// Absolute path inside the request directory
    pub path: PathBuf,

    /// Which stage the file belongs to
    pub kind: ArtifactKind,

    /// When the artifact was registered
    pub created_at: DateTime<Utc>,
}

impl TemporaryArtifact {
    pub fn new(kind: ArtifactKind, path: PathBuf) -> Self {
        Self {
            path,
            kind,
            created_at: Utc::now(),
        }
    }
}

/// Types of artifacts the pipeline produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered Typst source
    SourceDoc,

    /// PDF written by the compiler
    CompiledPdf,

    /// First-page preview written by the rasterizer
    RasterImage,
}

impl ArtifactKind {
    /// Fixed file name of this kind inside a request directory
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::SourceDoc => "document.typ",
            ArtifactKind::CompiledPdf => "document.pdf",
            ArtifactKind::RasterImage => "first_page.png",
        }
    }
}

/// The compiled PDF retained after a successful request.
///
/// The file stays on disk until [`OutputDocument::discard`] or
/// [`OutputDocument::persist_to`] is called, or a stale sweep removes the
/// request directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDocument {
    path: PathBuf,
    request_dir: PathBuf,
}

impl OutputDocument {
    pub(crate) fn new(path: PathBuf, request_dir: PathBuf) -> Self {
        Self { path, request_dir }
    }

    /// Path of the downloadable PDF
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Suggested download name
    pub fn file_name(&self) -> &str {
        ArtifactKind::CompiledPdf.file_name()
    }

    /// Delete the PDF and its request directory. Idempotent.
    pub async fn discard(self) -> std::io::Result<()> {
        discard_path(&self.path).await?;
        discard_dir(&self.request_dir).await
    }

    /// Copy the PDF to `dest`, then discard the retained copy
    pub async fn persist_to(self, dest: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        let dest = dest.as_ref().to_path_buf();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&self.path, &dest).await?;
        self.discard().await?;
        Ok(dest)
    }
}
