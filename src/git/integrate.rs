//! Fetch-and-fast-forward of the configured remote branch.
//!
//! Integration is strictly linear: the remote branch is fetched into its
//! remote-tracking ref and the current branch is advanced with
//! `git merge --ff-only`. Diverged history is reported as
//! [`GitError::NotFastForward`] and leaves the working tree untouched; there is
//! no automatic conflict resolution and never a partial merge.

use std::path::Path;

use super::{GitError, GitResult, GitSettings, rev_parse, run_git, run_git_stdout};
use crate::types::Sha;

/// Result of a successful integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integration {
    /// The branch that was integrated.
    pub branch: String,
    /// HEAD before integration.
    pub before: Sha,
    /// HEAD after integration. This is the remote branch tip, unless the local
    /// branch already contained it and is ahead.
    pub after: Sha,
}

impl Integration {
    /// Returns true if HEAD moved.
    pub fn updated(&self) -> bool {
        self.before != self.after
    }

    /// Short human-readable description for the audit log.
    pub fn summary(&self) -> String {
        if self.updated() {
            format!("{}: {}..{}", self.branch, self.before.short(), self.after.short())
        } else {
            format!("{}: already up to date at {}", self.branch, self.after.short())
        }
    }
}

/// Fetches the remote branch and fast-forwards the current branch to it.
pub async fn integrate(repo: &Path, settings: &GitSettings) -> GitResult<Integration> {
    let branch = match &settings.branch {
        Some(branch) => branch.clone(),
        None => current_branch(repo, settings).await?,
    };

    let tracking_ref = format!("refs/remotes/{}/{}", settings.remote, branch);

    // "+" forces the tracking ref update if the remote branch was force-pushed;
    // the fast-forward check below still refuses to apply such history.
    let refspec = format!("+refs/heads/{}:{}", branch, tracking_ref);
    run_git(
        repo,
        settings,
        &["fetch", "--no-tags", &settings.remote, &refspec],
    )
    .await
    .map_err(|e| match e {
        GitError::CommandFailed { stderr, .. } => GitError::FetchFailed {
            refspec: refspec.clone(),
            details: stderr,
        },
        other => other,
    })?;

    let before = rev_parse(repo, settings, "HEAD").await?;

    run_git(repo, settings, &["merge", "--ff-only", &tracking_ref])
        .await
        .map_err(|e| match e {
            GitError::CommandFailed { stderr, .. }
                if stderr.contains("Not possible to fast-forward")
                    || stderr.contains("not possible to fast-forward") =>
            {
                GitError::NotFastForward { details: stderr }
            }
            other => other,
        })?;

    let after = rev_parse(repo, settings, "HEAD").await?;

    Ok(Integration {
        branch,
        before,
        after,
    })
}

/// Returns the name of the checked-out branch, or `DetachedHead`.
async fn current_branch(repo: &Path, settings: &GitSettings) -> GitResult<String> {
    match run_git_stdout(repo, settings, &["symbolic-ref", "--short", "-q", "HEAD"]).await {
        Ok(branch) if !branch.is_empty() => Ok(branch),
        Ok(_) => Err(GitError::DetachedHead),
        // symbolic-ref -q exits 1 without output when HEAD is detached
        Err(GitError::CommandFailed { stderr, .. }) if stderr.is_empty() => {
            Err(GitError::DetachedHead)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestRemote, git_sync, git_sync_commit, test_settings};

    #[test]
    fn summary_formats() {
        let a = Sha::new("a".repeat(40));
        let b = Sha::new("b".repeat(40));

        let moved = Integration {
            branch: "main".to_string(),
            before: a.clone(),
            after: b,
        };
        assert!(moved.updated());
        assert_eq!(moved.summary(), "main: aaaaaaa..bbbbbbb");

        let same = Integration {
            branch: "main".to_string(),
            before: a.clone(),
            after: a,
        };
        assert!(!same.updated());
        assert_eq!(same.summary(), "main: already up to date at aaaaaaa");
    }

    #[tokio::test]
    async fn fast_forwards_to_remote_tip() {
        let fixture = TestRemote::new();
        let old_tip = fixture.remote_tip();
        let new_tip = fixture.push_commit("feature.txt", "new feature");

        let integration = integrate(fixture.checkout(), &test_settings()).await.unwrap();

        assert_eq!(integration.branch, "main");
        assert_eq!(integration.before, old_tip);
        assert_eq!(integration.after, new_tip);
        assert_eq!(
            std::fs::read_to_string(fixture.checkout().join("feature.txt")).unwrap(),
            "new feature"
        );
    }

    #[tokio::test]
    async fn already_up_to_date() {
        let fixture = TestRemote::new();

        let integration = integrate(fixture.checkout(), &test_settings()).await.unwrap();

        assert!(!integration.updated());
        assert_eq!(integration.after, fixture.remote_tip());
    }

    #[tokio::test]
    async fn local_branch_ahead_of_remote_is_left_alone() {
        let fixture = TestRemote::new();
        let checkout = fixture.checkout();

        std::fs::write(checkout.join("local.txt"), "unpushed").unwrap();
        git_sync(checkout, &["add", "local.txt"]);
        git_sync_commit(checkout, "not pushed yet");
        let local_head = Sha::new(git_sync(checkout, &["rev-parse", "HEAD"]));

        let integration = integrate(checkout, &test_settings()).await.unwrap();

        assert!(!integration.updated());
        assert_eq!(integration.after, local_head);
        assert_ne!(integration.after, fixture.remote_tip());
    }

    #[tokio::test]
    async fn diverged_history_is_not_fast_forward() {
        let fixture = TestRemote::new();
        let checkout = fixture.checkout();

        std::fs::write(checkout.join("local.txt"), "local commit").unwrap();
        git_sync(checkout, &["add", "local.txt"]);
        git_sync_commit(checkout, "local only");
        let local_head = git_sync(checkout, &["rev-parse", "HEAD"]);

        fixture.push_commit("remote.txt", "remote commit");

        let result = integrate(checkout, &test_settings()).await;

        assert!(
            matches!(result, Err(GitError::NotFastForward { .. })),
            "got {:?}",
            result
        );
        // Nothing was merged
        assert_eq!(git_sync(checkout, &["rev-parse", "HEAD"]), local_head);
        assert!(!checkout.join("remote.txt").exists());
        assert!(!checkout.join(".git/MERGE_HEAD").exists());
    }

    #[tokio::test]
    async fn unreachable_remote_is_fetch_failure() {
        let fixture = TestRemote::new();
        git_sync(
            fixture.checkout(),
            &["remote", "set-url", "origin", "/nonexistent/remote/path.git"],
        );

        let result = integrate(fixture.checkout(), &test_settings()).await;

        match result {
            Err(e @ GitError::FetchFailed { .. }) => assert!(e.is_integration_failure()),
            other => panic!("expected FetchFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_remote_branch_is_fetch_failure() {
        let fixture = TestRemote::new();
        let settings = GitSettings {
            branch: Some("does-not-exist".to_string()),
            ..test_settings()
        };

        let result = integrate(fixture.checkout(), &settings).await;

        assert!(matches!(result, Err(GitError::FetchFailed { .. })));
    }

    #[tokio::test]
    async fn detached_head_without_branch_config() {
        let fixture = TestRemote::new();
        git_sync(fixture.checkout(), &["checkout", "--detach", "HEAD"]);

        let result = integrate(fixture.checkout(), &test_settings()).await;

        assert!(matches!(result, Err(GitError::DetachedHead)), "got {:?}", result);
    }

    #[tokio::test]
    async fn detached_head_with_explicit_branch() {
        let fixture = TestRemote::new();
        git_sync(fixture.checkout(), &["checkout", "--detach", "HEAD"]);
        let new_tip = fixture.push_commit("feature.txt", "x");
        let settings = GitSettings {
            branch: Some("main".to_string()),
            ..test_settings()
        };

        let integration = integrate(fixture.checkout(), &settings).await.unwrap();

        assert_eq!(integration.after, new_tip);
    }

    #[tokio::test]
    async fn blocked_by_local_drift_fails_without_partial_update() {
        let fixture = TestRemote::new();
        let checkout = fixture.checkout();
        let old_tip = fixture.remote_tip();
        fixture.push_commit("README.md", "remote edit");
        std::fs::write(checkout.join("README.md"), "local edit").unwrap();

        let result = integrate(checkout, &test_settings()).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().is_integration_failure());
        assert_eq!(Sha::new(git_sync(checkout, &["rev-parse", "HEAD"])), old_tip);
        assert_eq!(
            std::fs::read_to_string(checkout.join("README.md")).unwrap(),
            "local edit"
        );
    }
}
