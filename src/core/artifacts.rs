//! Temporary-artifact lifecycle.
//!
//! Every request works inside its own directory, `<work_dir>/<request-id>/`,
//! using fixed file names per [`ArtifactKind`]. Concurrent requests therefore
//! never touch each other's files.
//!
//! An [`ArtifactScope`] registers every file a request creates and deletes
//! them on [`ArtifactScope::release`]. Only an artifact passed to
//! [`ArtifactScope::retain`] survives. If a scope is dropped without being
//! released (panic, dropped future) its `Drop` impl removes the directory
//! synchronously.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ArtifactKind, OutputDocument, TemporaryArtifact};
use crate::error::PipelineError;

/// Remove a file, treating "already gone" as success
pub async fn discard_path(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed artifact");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree, treating "already gone" as success
pub async fn discard_dir(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Root of all request directories
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a request with `request_id` works in
    pub fn request_dir(&self, request_id: Uuid) -> PathBuf {
        self.root.join(request_id.to_string())
    }

    /// Create the work directory if needed
    pub async fn prepare(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Create the request's directory and start tracking its artifacts
    pub async fn open_scope(&self, request_id: Uuid) -> Result<ArtifactScope, PipelineError> {
        let dir = self.request_dir(request_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::artifact(&dir, e))?;
        debug!(%request_id, dir = %dir.display(), "Opened artifact scope");

        Ok(ArtifactScope {
            request_id,
            dir,
            artifacts: Vec::new(),
            retained: false,
            released: false,
        })
    }

    /// Remove request directories not modified for at least `max_age`.
    ///
    /// `Duration::ZERO` removes every request directory. Entries whose names
    /// are not request ids are left alone. Returns the number removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> std::io::Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let is_request_dir = name
                .to_str()
                .map(|n| Uuid::parse_str(n).is_ok())
                .unwrap_or(false);
            if !is_request_dir || !entry.file_type().await?.is_dir() {
                continue;
            }

            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }

            match discard_dir(&entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(dir = %entry.path().display(), error = %e, "Failed to sweep request directory"),
            }
        }

        if removed > 0 {
            info!(removed, root = %self.root.display(), "Swept stale request directories");
        }
        Ok(removed)
    }
}

/// Artifacts owned by one request
#[derive(Debug)]
pub struct ArtifactScope {
    request_id: Uuid,
    dir: PathBuf,
    artifacts: Vec<TemporaryArtifact>,
    retained: bool,
    released: bool,
}

impl ArtifactScope {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifacts currently registered for release
    pub fn artifacts(&self) -> &[TemporaryArtifact] {
        &self.artifacts
    }

    /// Reserve the fixed path for `kind`, clearing any leftover file there
    pub async fn create(&mut self, kind: ArtifactKind) -> Result<TemporaryArtifact, PipelineError> {
        let path = self.dir.join(kind.file_name());
        discard_path(&path)
            .await
            .map_err(|e| PipelineError::artifact(&path, e))?;
        Ok(self.register(kind, path))
    }

    /// Track a file some other party (an external tool) will produce
    pub fn register(&mut self, kind: ArtifactKind, path: PathBuf) -> TemporaryArtifact {
        let artifact = TemporaryArtifact::new(kind, path);
        debug!(request_id = %self.request_id, kind = ?kind, path = %artifact.path.display(), "Registered artifact");
        self.artifacts.push(artifact.clone());
        artifact
    }

    /// Delete one artifact now. Idempotent.
    pub async fn discard(&mut self, artifact: &TemporaryArtifact) -> Result<(), PipelineError> {
        discard_path(&artifact.path)
            .await
            .map_err(|e| PipelineError::artifact(&artifact.path, e))?;
        self.artifacts.retain(|a| a.path != artifact.path);
        Ok(())
    }

    /// Exclude `artifact` from release and hand it to the caller
    pub fn retain(&mut self, artifact: TemporaryArtifact) -> OutputDocument {
        self.artifacts.retain(|a| a.path != artifact.path);
        self.retained = true;
        OutputDocument::new(artifact.path, self.dir.clone())
    }

    /// Delete every registered artifact.
    ///
    /// With nothing retained the request directory goes too. Failures are
    /// logged rather than returned: release runs on error paths and must not
    /// mask the original error.
    pub async fn release(mut self) {
        self.released = true;

        for artifact in std::mem::take(&mut self.artifacts) {
            if let Err(e) = discard_path(&artifact.path).await {
                warn!(path = %artifact.path.display(), error = %e, "Failed to remove artifact");
            }
        }

        if !self.retained {
            if let Err(e) = discard_dir(&self.dir).await {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove request directory");
            }
        }
        debug!(request_id = %self.request_id, "Released artifact scope");
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for artifact in &self.artifacts {
            let _ = std::fs::remove_file(&artifact.path);
        }
        if !self.retained {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}
