//! The process-wide handle to the deployed working copy.

use std::path::{Path, PathBuf};

use super::{
    DriftState, GitResult, GitSettings, GuardError, Integration, Snapshot, detect_drift,
    integrate, neutralize,
};
use crate::sync::WorkingCopy;

/// A git working copy on disk plus the settings used to operate on it.
///
/// One of these is created at startup and shared by every delivery through the
/// [`Synchronizer`](crate::sync::Synchronizer), which serializes all mutation.
#[derive(Debug, Clone)]
pub struct GitRepository {
    path: PathBuf,
    settings: GitSettings,
}

impl GitRepository {
    pub fn new(path: impl Into<PathBuf>, settings: GitSettings) -> Self {
        GitRepository {
            path: path.into(),
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &GitSettings {
        &self.settings
    }
}

impl WorkingCopy for GitRepository {
    async fn detect_drift(&self) -> GitResult<DriftState> {
        detect_drift(&self.path, &self.settings).await
    }

    async fn neutralize(&self, label: &str) -> Result<Option<Snapshot>, GuardError> {
        neutralize(&self.path, &self.settings, label).await
    }

    async fn integrate(&self) -> GitResult<Integration> {
        integrate(&self.path, &self.settings).await
    }
}
