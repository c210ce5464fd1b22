//! Process configuration, loaded once from the environment at startup.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::git::{CommitIdentity, GitSettings};

pub const ENV_SECRET: &str = "DEPLOY_HOOK_SECRET";
pub const ENV_REPO_PATH: &str = "DEPLOY_HOOK_REPO_PATH";
pub const ENV_AUDIT_LOG: &str = "DEPLOY_HOOK_AUDIT_LOG";
pub const ENV_LISTEN: &str = "DEPLOY_HOOK_LISTEN";
pub const ENV_ROUTE: &str = "DEPLOY_HOOK_ROUTE";
pub const ENV_REMOTE: &str = "DEPLOY_HOOK_REMOTE";
pub const ENV_BRANCH: &str = "DEPLOY_HOOK_BRANCH";
pub const ENV_TIMEOUT_SECS: &str = "DEPLOY_HOOK_TIMEOUT_SECS";
pub const ENV_ISOLATE_GIT_CONFIG: &str = "DEPLOY_HOOK_ISOLATE_GIT_CONFIG";
pub const ENV_GIT_NAME: &str = "DEPLOY_HOOK_GIT_NAME";
pub const ENV_GIT_EMAIL: &str = "DEPLOY_HOOK_GIT_EMAIL";

const DEFAULT_REPO_PATH: &str = "~/mysite";
const DEFAULT_AUDIT_LOG: &str = "~/deploy-hook-audit.jsonl";
const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
const DEFAULT_ROUTE: &str = "/update_server";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Errors from reading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid socket address {value:?}")]
    InvalidListen { var: &'static str, value: String },

    #[error("{var}: expected a positive number of seconds, got {value:?}")]
    InvalidTimeout { var: &'static str, value: String },

    #[error("{var}: route must start with '/', got {value:?}")]
    InvalidRoute { var: &'static str, value: String },

    #[error("{var}: expected a boolean, got {value:?}")]
    InvalidBool { var: &'static str, value: String },

    #[error("{var}: must not be empty")]
    Empty { var: &'static str },
}

/// The shared webhook secret.
///
/// `Debug` is redacted so the secret cannot leak through a log line.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        WebhookSecret(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// An empty secret rejects every delivery.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("WebhookSecret(<empty>)")
        } else {
            f.write_str("WebhookSecret(<redacted>)")
        }
    }
}

/// Complete process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub secret: WebhookSecret,
    pub repo_path: PathBuf,
    pub audit_log: PathBuf,
    pub listen: SocketAddr,
    pub route: String,
    pub git: GitSettings,
    /// Bound on the whole integration step.
    pub integrate_timeout: Duration,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a
    /// variable or `None` if it is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let secret = WebhookSecret::new(lookup(ENV_SECRET).unwrap_or_default());

        let repo_path =
            expand_path(&get(ENV_REPO_PATH).unwrap_or_else(|| DEFAULT_REPO_PATH.into()));
        let audit_log =
            expand_path(&get(ENV_AUDIT_LOG).unwrap_or_else(|| DEFAULT_AUDIT_LOG.into()));

        let listen_raw = get(ENV_LISTEN).unwrap_or_else(|| DEFAULT_LISTEN.into());
        let listen: SocketAddr = listen_raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidListen {
                var: ENV_LISTEN,
                value: listen_raw.clone(),
            })?;

        let route = get(ENV_ROUTE).unwrap_or_else(|| DEFAULT_ROUTE.into());
        if !route.starts_with('/') {
            return Err(ConfigError::InvalidRoute {
                var: ENV_ROUTE,
                value: route,
            });
        }

        let timeout = match get(ENV_TIMEOUT_SECS) {
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidTimeout {
                        var: ENV_TIMEOUT_SECS,
                        value,
                    });
                }
            },
        };

        let isolate_config = match get(ENV_ISOLATE_GIT_CONFIG) {
            None => false,
            Some(value) => parse_bool(ENV_ISOLATE_GIT_CONFIG, &value)?,
        };

        let remote = match lookup(ENV_REMOTE) {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::Empty { var: ENV_REMOTE });
            }
            Some(value) => value.trim().to_string(),
            None => GitSettings::default().remote,
        };

        let defaults = CommitIdentity::default();
        let identity = CommitIdentity {
            name: get(ENV_GIT_NAME).unwrap_or(defaults.name),
            email: get(ENV_GIT_EMAIL).unwrap_or(defaults.email),
        };

        Ok(Config {
            secret,
            repo_path,
            audit_log,
            listen,
            route,
            git: GitSettings {
                remote,
                branch: get(ENV_BRANCH).map(|b| b.trim().to_string()),
                command_timeout: timeout,
                isolate_config,
                identity,
            },
            integrate_timeout: timeout,
        })
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw.trim()).into_owned())
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}
