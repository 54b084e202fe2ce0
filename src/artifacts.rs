//! Ephemeral file tracking for one invocation
//!
//! Every file created while composing configs or preparing env files is
//! recorded here. [`TempArtifacts::cleanup`] removes them all and empties the
//! list; a tracker dropped without cleanup removes them as well.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::WorkerError;

/// Append-only list of ephemeral paths
#[derive(Debug, Default)]
pub struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path. Recording the same path twice is harmless.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            debug!(path = %path.display(), "tracking temp artifact");
            self.paths.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Delete every tracked path and clear the list.
    ///
    /// Already-missing files are fine. Other failures come back as warnings;
    /// they never abort the remaining deletions.
    pub fn cleanup(&mut self) -> Vec<WorkerError> {
        let mut warnings = Vec::new();
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed temp artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove temp artifact");
                    warnings.push(WorkerError::file_operation(format!(
                        "Failed to delete temporary file {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
        warnings
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        if !self.paths.is_empty() {
            let _ = self.cleanup();
        }
    }
}
