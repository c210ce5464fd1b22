//! Append-only audit log file.
//!
//! Every delivery attempt and its outcome is appended here, independently of
//! the `tracing` pipeline, so deliveries remain diagnosable even when process
//! logging is misconfigured or redirected.
//!
//! # Durability
//!
//! Each record is written with a single `write_all` on a file opened with
//! `O_APPEND`, then fsynced. The file is reopened per record, which keeps
//! concurrent writers from interleaving partial lines and lets an operator
//! rotate the file without restarting the process.
//!
//! # Failure policy
//!
//! [`AuditLog::record`] never fails. A broken audit log must not change the
//! outcome of a delivery; write errors are reported at `debug` level only.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::record::{AuditEvent, AuditRecord};
use crate::types::DeliveryId;

/// Errors from a single audit write.
#[derive(Debug, Error)]
pub enum AuditError {
    /// IO error opening, writing or syncing the file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handle to the audit log file. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Arc<PathBuf>,
}

impl AuditLog {
    /// Creates a handle for the audit log at `path`.
    ///
    /// Nothing is opened until the first record is written.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditLog {
            path: Arc::new(path.into()),
        }
    }

    /// Returns the audit log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an event, swallowing any failure.
    pub fn record(&self, event: AuditEvent, delivery: &DeliveryId, detail: impl AsRef<str>) {
        let record = AuditRecord::now(event, delivery, detail);
        if let Err(e) = self.try_append(&record) {
            debug!(
                path = %self.path.display(),
                event = %event,
                error = %e,
                "audit write failed"
            );
        }
    }

    /// Appends a record, reporting failures to the caller.
    pub fn try_append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let line = record.to_line()?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_ref())?;
        file.write_all(line.as_bytes())?;
        fsync_file(&file)?;
        Ok(())
    }
}

/// Syncs a file's contents and metadata to disk.
fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}
