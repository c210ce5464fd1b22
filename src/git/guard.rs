//! Working-tree guard: detect and neutralize local drift.
//!
//! A deployed checkout should never carry uncommitted changes, but in practice
//! it does (stray temp files, hot fixes edited in place). Such drift can block a
//! fast-forward with "would be overwritten" errors.
//!
//! The guard never discards drift silently. [`neutralize`] stashes tracked and
//! untracked changes under a label, which also resets the working tree to HEAD,
//! and reports the stash commit so an operator can restore it with
//! `git stash apply <sha>`.

use std::path::Path;

use thiserror::Error;

use super::{GitError, GitResult, GitSettings, execute, git_commit_command, run_git, try_rev_parse};
use crate::types::Sha;

/// State of the working tree relative to HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftState {
    /// No tracked modifications and no untracked files.
    Clean,
    /// Local modifications exist.
    Dirty {
        /// Paths reported by `git status --porcelain`.
        paths: Vec<String>,
    },
}

impl DriftState {
    pub fn is_dirty(&self) -> bool {
        matches!(self, DriftState::Dirty { .. })
    }
}

/// A recoverable snapshot of local drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The stash message.
    pub label: String,
    /// The stash commit.
    pub commit: Sha,
}

/// Errors from snapshotting drift.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Creating the stash failed (e.g., permissions, unmerged index).
    #[error("snapshot failed: {0}")]
    SnapshotFailed(#[source] GitError),

    /// Reading the stash ref before the snapshot failed. Nothing was changed.
    #[error("could not read stash ref: {0}")]
    StashRef(#[source] GitError),

    /// The stash was created but its commit could not be read back. The drift
    /// is saved and the tree was reset, only the commit is unknown.
    #[error("drift stashed as \"{label}\" but the stash commit could not be read: {source}")]
    SnapshotUnconfirmed {
        label: String,
        #[source]
        source: GitError,
    },
}

impl GuardError {
    /// Returns true if the drift ended up in a stash despite the error.
    pub fn drift_saved(&self) -> bool {
        matches!(self, GuardError::SnapshotUnconfirmed { .. })
    }
}

/// Inspects tracked and untracked file state without mutating anything.
///
/// Uses `--no-optional-locks` so the index is not refreshed on disk.
pub async fn detect_drift(repo: &Path, settings: &GitSettings) -> GitResult<DriftState> {
    let output = run_git(
        repo,
        settings,
        &[
            "--no-optional-locks",
            "status",
            "--porcelain=v1",
            "--untracked-files=all",
        ],
    )
    .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let paths = parse_porcelain_paths(&stdout);

    if paths.is_empty() {
        Ok(DriftState::Clean)
    } else {
        Ok(DriftState::Dirty { paths })
    }
}

/// Snapshots local drift as a labeled stash and restores the tree to HEAD.
///
/// Returns `Ok(None)` if git found nothing to save, which happens when the
/// drift disappeared between detection and snapshot.
pub async fn neutralize(
    repo: &Path,
    settings: &GitSettings,
    label: &str,
) -> Result<Option<Snapshot>, GuardError> {
    let before = try_rev_parse(repo, settings, "refs/stash")
        .await
        .map_err(GuardError::StashRef)?;

    execute(
        git_commit_command(repo, settings),
        &["stash", "push", "--include-untracked", "-m", label],
        settings.command_timeout,
    )
    .await
    .map_err(GuardError::SnapshotFailed)?;

    let after = try_rev_parse(repo, settings, "refs/stash")
        .await
        .map_err(|source| GuardError::SnapshotUnconfirmed {
            label: label.to_string(),
            source,
        })?;

    match after {
        Some(commit) if before.as_ref() != Some(&commit) => Ok(Some(Snapshot {
            label: label.to_string(),
            commit,
        })),
        _ => Ok(None),
    }
}

/// Extracts paths from `git status --porcelain=v1` output.
///
/// Each line is `XY <path>` (or `XY <orig> -> <path>` for renames).
fn parse_porcelain_paths(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.get(3..))
        .filter(|path| !path.is_empty())
        .map(|path| path.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestRemote, git_sync, test_settings};

    #[test]
    fn parse_porcelain_paths_handles_status_codes() {
        let stdout = " M src/app.py\n?? tmp/scratch.txt\nR  old.txt -> new.txt\nUU conflicted.txt\n";
        assert_eq!(
            parse_porcelain_paths(stdout),
            vec![
                "src/app.py".to_string(),
                "tmp/scratch.txt".to_string(),
                "old.txt -> new.txt".to_string(),
                "conflicted.txt".to_string(),
            ]
        );
    }

    #[test]
    fn parse_porcelain_paths_empty() {
        assert!(parse_porcelain_paths("").is_empty());
        assert!(parse_porcelain_paths("\n").is_empty());
    }

    #[tokio::test]
    async fn fresh_checkout_is_clean() {
        let fixture = TestRemote::new();
        let drift = detect_drift(fixture.checkout(), &test_settings()).await.unwrap();
        assert_eq!(drift, DriftState::Clean);
    }

    #[tokio::test]
    async fn modified_tracked_file_is_dirty() {
        let fixture = TestRemote::new();
        std::fs::write(fixture.checkout().join("README.md"), "edited in place").unwrap();

        let drift = detect_drift(fixture.checkout(), &test_settings()).await.unwrap();

        assert_eq!(
            drift,
            DriftState::Dirty {
                paths: vec!["README.md".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn untracked_file_is_dirty() {
        let fixture = TestRemote::new();
        std::fs::create_dir_all(fixture.checkout().join("tmp")).unwrap();
        std::fs::write(fixture.checkout().join("tmp/stray.log"), "x").unwrap();

        let drift = detect_drift(fixture.checkout(), &test_settings()).await.unwrap();

        assert_eq!(
            drift,
            DriftState::Dirty {
                paths: vec!["tmp/stray.log".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn detect_drift_does_not_mutate() {
        let fixture = TestRemote::new();
        std::fs::write(fixture.checkout().join("README.md"), "edited").unwrap();
        std::fs::write(fixture.checkout().join("new.txt"), "new").unwrap();

        detect_drift(fixture.checkout(), &test_settings()).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(fixture.checkout().join("README.md")).unwrap(),
            "edited"
        );
        assert!(fixture.checkout().join("new.txt").exists());
    }

    #[tokio::test]
    async fn detect_drift_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = detect_drift(dir.path(), &test_settings()).await;
        assert!(matches!(result, Err(GitError::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn neutralize_snapshots_and_cleans() {
        let fixture = TestRemote::new();
        let settings = test_settings();
        let checkout = fixture.checkout();
        std::fs::write(checkout.join("README.md"), "local edit").unwrap();
        std::fs::write(checkout.join("untracked.txt"), "stray").unwrap();

        let snapshot = neutralize(checkout, &settings, "deploy-hook test-label")
            .await
            .unwrap()
            .expect("drift should be snapshotted");

        // Tree is back to HEAD
        assert_eq!(
            detect_drift(checkout, &settings).await.unwrap(),
            DriftState::Clean
        );
        assert!(!checkout.join("untracked.txt").exists());

        // Snapshot is labeled and recoverable
        assert_eq!(snapshot.label, "deploy-hook test-label");
        let stash_list = git_sync(checkout, &["stash", "list"]);
        assert!(stash_list.contains("deploy-hook test-label"));
        let tracked = git_sync(
            checkout,
            &["show", &format!("{}:README.md", snapshot.commit)],
        );
        assert_eq!(tracked, "local edit");
        let untracked = git_sync(
            checkout,
            &["show", &format!("{}^3:untracked.txt", snapshot.commit)],
        );
        assert_eq!(untracked, "stray");
    }

    #[tokio::test]
    async fn neutralize_clean_tree_returns_none() {
        let fixture = TestRemote::new();
        let result = neutralize(fixture.checkout(), &test_settings(), "nothing to save")
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn neutralize_twice_reports_newest_snapshot() {
        let fixture = TestRemote::new();
        let settings = test_settings();
        let checkout = fixture.checkout();

        std::fs::write(checkout.join("a.txt"), "first").unwrap();
        let first = neutralize(checkout, &settings, "first").await.unwrap().unwrap();

        std::fs::write(checkout.join("b.txt"), "second").unwrap();
        let second = neutralize(checkout, &settings, "second").await.unwrap().unwrap();

        assert_ne!(first.commit, second.commit);
        let list = git_sync(checkout, &["stash", "list"]);
        assert_eq!(list.lines().count(), 2);
    }

    #[tokio::test]
    async fn neutralize_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = neutralize(dir.path(), &test_settings(), "label").await;
        assert!(result.is_err());
    }
}
