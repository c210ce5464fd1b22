//! The synchronizer: serialized drift-guard plus integration.
//!
//! A [`Synchronizer`] owns the process-wide working copy and guarantees that at
//! most one synchronization runs against it at a time. A second caller never
//! waits for the first: it gets [`SyncOutcome::AlreadyInProgress`] immediately.
//!
//! # Flow
//!
//! 1. Take the lock (or return `AlreadyInProgress`).
//! 2. Detect drift. If the tree is dirty, snapshot it. A failed snapshot is
//!    recorded in the audit log and the synchronization continues.
//! 3. Integrate the remote branch under an overall timeout.
//! 4. Map the path taken to a [`SyncOutcome`].
//!
//! The lock is an RAII guard, so it is released on every exit path, including
//! errors, timeouts and a panic unwinding through the task.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditLog, sanitize_detail};
use crate::git::{DriftState, GitError, GitResult, GuardError, Integration, Snapshot};
use crate::types::DeliveryId;

/// The repository operations a synchronization needs.
///
/// Implemented by [`GitRepository`](crate::git::GitRepository) for real
/// checkouts and by a fake in tests.
pub trait WorkingCopy: Send + Sync + 'static {
    /// Inspects the working tree without modifying it.
    fn detect_drift(&self) -> impl Future<Output = GitResult<DriftState>> + Send;

    /// Snapshots local drift under `label` and resets the tree to HEAD.
    ///
    /// `Ok(None)` means there was nothing to save.
    fn neutralize(
        &self,
        label: &str,
    ) -> impl Future<Output = Result<Option<Snapshot>, GuardError>> + Send;

    /// Fetches the remote branch and fast-forwards to it.
    fn integrate(&self) -> impl Future<Output = GitResult<Integration>> + Send;
}

/// How a synchronization ended, when it ended in an anticipated way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another synchronization holds the lock.
    AlreadyInProgress,

    /// The tree was clean and the branch was integrated.
    CleanPullOk { integration: Integration },

    /// Drift was snapshotted and the branch was integrated.
    StashedPullOk {
        snapshot: Snapshot,
        integration: Integration,
    },

    /// The snapshot failed, but integration still succeeded.
    StashFailed {
        reason: String,
        /// The stash was created even though it could not be confirmed, so the
        /// drift is no longer in the working tree.
        drift_saved: bool,
        integration: Integration,
    },

    /// Integration failed or timed out.
    PullFailed {
        reason: String,
        /// Drift saved before the failed integration, if any.
        snapshot: Option<Snapshot>,
    },
}

impl SyncOutcome {
    /// The audit event this outcome is recorded as.
    pub fn audit_event(&self) -> AuditEvent {
        match self {
            SyncOutcome::AlreadyInProgress => AuditEvent::AlreadyInProgress,
            SyncOutcome::CleanPullOk { .. } => AuditEvent::CleanPullOk,
            SyncOutcome::StashedPullOk { .. } => AuditEvent::StashedPullOk,
            SyncOutcome::StashFailed { .. } => AuditEvent::StashFailed,
            SyncOutcome::PullFailed { .. } => AuditEvent::PullFailed,
        }
    }

    /// Returns true if the working copy now matches the remote branch.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SyncOutcome::CleanPullOk { .. }
                | SyncOutcome::StashedPullOk { .. }
                | SyncOutcome::StashFailed { .. }
        )
    }

    /// Detail string for the audit record.
    pub fn detail(&self) -> String {
        match self {
            SyncOutcome::AlreadyInProgress => "another synchronization is running".to_string(),
            SyncOutcome::CleanPullOk { integration } => integration.summary(),
            SyncOutcome::StashedPullOk {
                snapshot,
                integration,
            } => format!(
                "{}; drift saved as {} ({})",
                integration.summary(),
                snapshot.commit,
                snapshot.label
            ),
            SyncOutcome::StashFailed {
                reason,
                drift_saved: false,
                integration,
            } => format!("{}; drift left in place: {}", integration.summary(), reason),
            SyncOutcome::StashFailed {
                reason,
                drift_saved: true,
                integration,
            } => format!(
                "{}; drift stashed, commit unknown: {}",
                integration.summary(),
                reason
            ),
            SyncOutcome::PullFailed {
                reason,
                snapshot: Some(snapshot),
            } => format!("{}; drift saved as {}", reason, snapshot.commit),
            SyncOutcome::PullFailed {
                reason,
                snapshot: None,
            } => reason.clone(),
        }
    }
}

/// An unanticipated failure while synchronizing.
#[derive(Debug, Error)]
pub enum SyncFault {
    /// The working tree could not be inspected at all.
    #[error("could not inspect working tree: {0}")]
    Inspect(#[source] GitError),

    /// Integration failed in a way that points at a broken environment.
    #[error("integration fault: {0}")]
    Integrate(#[source] GitError),
}

/// Serializes synchronizations against a single working copy.
pub struct Synchronizer<R> {
    repo: R,
    lock: Mutex<()>,
    audit: AuditLog,
    integrate_timeout: Duration,
}

impl<R: WorkingCopy> Synchronizer<R> {
    /// Creates a synchronizer for `repo`.
    ///
    /// `integrate_timeout` bounds the whole integration step, on top of any
    /// per-command timeout the working copy applies.
    pub fn new(repo: R, audit: AuditLog, integrate_timeout: Duration) -> Self {
        Synchronizer {
            repo,
            lock: Mutex::new(()),
            audit,
            integrate_timeout,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Returns true while a synchronization holds the lock.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Runs one synchronization on behalf of `delivery`.
    pub async fn synchronize(&self, delivery: &DeliveryId) -> Result<SyncOutcome, SyncFault> {
        let Ok(_guard) = self.lock.try_lock() else {
            debug!(delivery_id = %delivery, "Synchronization already in progress");
            return Ok(SyncOutcome::AlreadyInProgress);
        };

        let drift = self
            .repo
            .detect_drift()
            .await
            .map_err(SyncFault::Inspect)?;

        let mut snapshot = None;
        let mut guard_failure: Option<(String, bool)> = None;

        if let DriftState::Dirty { paths } = &drift {
            let label = snapshot_label(delivery, Utc::now());
            info!(
                delivery_id = %delivery,
                paths = paths.len(),
                label = %label,
                "Working tree has local drift, snapshotting"
            );

            match self.repo.neutralize(&label).await {
                Ok(Some(saved)) => snapshot = Some(saved),
                Ok(None) => {
                    debug!(delivery_id = %delivery, "Drift vanished before snapshot");
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(
                        delivery_id = %delivery,
                        error = %sanitize_detail(&reason),
                        drift_saved = e.drift_saved(),
                        "Snapshot failed, integrating anyway"
                    );
                    self.audit
                        .record(AuditEvent::GuardFailure, delivery, reason.as_str());
                    guard_failure = Some((reason, e.drift_saved()));
                }
            }
        }

        let integration =
            match tokio::time::timeout(self.integrate_timeout, self.repo.integrate()).await {
                Ok(Ok(integration)) => integration,
                Ok(Err(e)) if e.is_integration_failure() => {
                    return Ok(SyncOutcome::PullFailed {
                        reason: e.to_string(),
                        snapshot,
                    });
                }
                Ok(Err(e)) => return Err(SyncFault::Integrate(e)),
                Err(_) => {
                    return Ok(SyncOutcome::PullFailed {
                        reason: format!(
                            "integration timed out after {:?}",
                            self.integrate_timeout
                        ),
                        snapshot,
                    });
                }
            };

        Ok(match (snapshot, guard_failure) {
            (Some(snapshot), _) => SyncOutcome::StashedPullOk {
                snapshot,
                integration,
            },
            (None, Some((reason, drift_saved))) => SyncOutcome::StashFailed {
                reason,
                drift_saved,
                integration,
            },
            (None, None) => SyncOutcome::CleanPullOk { integration },
        })
    }
}

/// Builds the stash message for a snapshot taken on behalf of `delivery`.
pub fn snapshot_label(delivery: &DeliveryId, at: DateTime<Utc>) -> String {
    format!(
        "deploy-hook {} {}",
        delivery,
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
