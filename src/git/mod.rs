//! Local git operations for keeping a deployed checkout up to date.
//!
//! This module implements the git plumbing behind a synchronization:
//! - Drift detection and snapshotting of local modifications ([`guard`])
//! - Fetch and fast-forward of the configured remote branch ([`integrate`])
//! - The process-wide repository handle ([`repository`])
//!
//! Every git invocation runs as a subprocess with terminal prompts disabled,
//! `kill_on_drop` set and a timeout, so a hung remote can never hold a
//! synchronization open indefinitely.

pub mod guard;
pub mod integrate;
pub mod repository;

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::types::Sha;

pub use guard::{DriftState, GuardError, Snapshot, detect_drift, neutralize};
pub use integrate::{Integration, integrate};
pub use repository::GitRepository;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command exited unsuccessfully.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The remote branch cannot be applied as a fast-forward.
    #[error("not a fast-forward: {details}")]
    NotFastForward { details: String },

    /// Fetching the remote branch failed (network, auth, missing ref).
    #[error("failed to fetch {refspec}: {details}")]
    FetchFailed { refspec: String, details: String },

    /// HEAD is detached and no branch was configured.
    #[error("HEAD is detached and no branch is configured")]
    DetachedHead,

    /// Git command did not finish in time and was killed.
    #[error("git command timed out after {}s: {command}", .after.as_secs())]
    TimedOut { command: String, after: Duration },

    /// Invalid SHA format.
    #[error("invalid SHA: {0}")]
    InvalidSha(String),

    /// IO error (git missing, repository path missing, ...).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Returns true for failures an operator is expected to see from time to
    /// time while integrating: network trouble, timeouts, diverged history.
    ///
    /// Everything else points at a broken environment and is treated as an
    /// unexpected fault by the caller.
    pub fn is_integration_failure(&self) -> bool {
        matches!(
            self,
            GitError::CommandFailed { .. }
                | GitError::NotFastForward { .. }
                | GitError::FetchFailed { .. }
                | GitError::DetachedHead
                | GitError::TimedOut { .. }
        )
    }
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Identity used for snapshot commits.
///
/// Passed via `-c` flags so snapshots work even when the deploy user has no
/// `user.name`/`user.email` configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    /// The committer/author name (git `user.name`).
    pub name: String,

    /// The committer/author email (git `user.email`).
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        CommitIdentity {
            name: "deploy-hook".to_string(),
            email: "deploy-hook@localhost".to_string(),
        }
    }
}

/// Settings shared by every git invocation against the working copy.
#[derive(Debug, Clone)]
pub struct GitSettings {
    /// Remote to fetch from (e.g., "origin").
    pub remote: String,

    /// Remote branch to integrate. `None` means the currently checked-out branch.
    pub branch: Option<String>,

    /// Upper bound for each git subprocess.
    pub command_timeout: Duration,

    /// Ignore system and global git config.
    ///
    /// Off in production, where the deploy user's credential helpers live in
    /// global config; on in tests for reproducibility.
    pub isolate_config: bool,

    /// Identity for snapshot commits.
    pub identity: CommitIdentity,
}

impl Default for GitSettings {
    fn default() -> Self {
        GitSettings {
            remote: "origin".to_string(),
            branch: None,
            command_timeout: Duration::from_secs(120),
            isolate_config: false,
            identity: CommitIdentity::default(),
        }
    }
}

/// Create a non-interactive git Command for the given working directory.
pub(crate) fn git_command(workdir: &Path, settings: &GitSettings) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    if settings.isolate_config {
        cmd.env("GIT_CONFIG_NOSYSTEM", "1");
        cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    }

    // Disable terminal prompts (credentials, host keys)
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    // Stderr is matched against English messages.
    cmd.env("LC_ALL", "C");
    cmd.stdin(Stdio::null());

    // Dropping the output future on timeout must also kill the child.
    cmd.kill_on_drop(true);

    cmd
}

/// Create a git Command configured for operations that write commits.
///
/// Extends [`git_command`] with `-c user.name=<name> -c user.email=<email>`.
pub(crate) fn git_commit_command(workdir: &Path, settings: &GitSettings) -> Command {
    let mut cmd = git_command(workdir, settings);
    cmd.arg("-c");
    cmd.arg(format!("user.name={}", settings.identity.name));
    cmd.arg("-c");
    cmd.arg(format!("user.email={}", settings.identity.email));
    cmd
}

/// Runs a prepared command with `args` appended, bounded by `timeout`.
///
/// Returns the output on success, or a [`GitError`] describing the failure.
pub(crate) async fn execute(
    mut cmd: Command,
    args: &[&str],
    timeout: Duration,
) -> GitResult<Output> {
    cmd.args(args);
    let command = format!("git {}", args.join(" "));

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(GitError::TimedOut {
                command,
                after: timeout,
            });
        }
    };

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command in the given working directory.
pub async fn run_git(workdir: &Path, settings: &GitSettings, args: &[&str]) -> GitResult<Output> {
    execute(git_command(workdir, settings), args, settings.command_timeout).await
}

/// Run a git command and return stdout as a trimmed string.
pub async fn run_git_stdout(
    workdir: &Path,
    settings: &GitSettings,
    args: &[&str],
) -> GitResult<String> {
    let output = run_git(workdir, settings, args).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Get the SHA of a revision.
pub async fn rev_parse(workdir: &Path, settings: &GitSettings, rev: &str) -> GitResult<Sha> {
    let sha_str = run_git_stdout(workdir, settings, &["rev-parse", "--verify", rev]).await?;
    Sha::parse(&sha_str).map_err(|_| GitError::InvalidSha(sha_str))
}

/// Get the SHA of a revision if it exists.
///
/// Uses `rev-parse -q --verify`: exit 0 = exists, exit 1 = missing,
/// anything else = error.
pub async fn try_rev_parse(
    workdir: &Path,
    settings: &GitSettings,
    rev: &str,
) -> GitResult<Option<Sha>> {
    let args = ["rev-parse", "-q", "--verify", rev];
    let mut cmd = git_command(workdir, settings);
    cmd.args(args);

    let output = match tokio::time::timeout(settings.command_timeout, cmd.output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(GitError::TimedOut {
                command: format!("git {}", args.join(" ")),
                after: settings.command_timeout,
            });
        }
    };

    match output.status.code() {
        Some(0) => {
            let sha_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Sha::parse(&sha_str)
                .map(Some)
                .map_err(|_| GitError::InvalidSha(sha_str))
        }
        Some(1) => Ok(None),
        _ => Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
    }
}
