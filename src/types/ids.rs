//! Newtype wrappers for domain identifiers.
//!
//! These types keep delivery IDs and commit SHAs from being mixed up with
//! arbitrary strings and make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest delivery ID we keep. Provider IDs are UUIDs (36 chars).
const MAX_DELIVERY_ID_LEN: usize = 64;

/// Placeholder used when the provider did not send a delivery ID.
const UNKNOWN_DELIVERY_ID: &str = "-";

/// Error returned when a string is not a valid hex commit SHA.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SHA: {0:?}")]
pub struct InvalidSha(pub String);

/// A git commit SHA (40 hex characters for SHA-1 repos, 64 for SHA-256 repos).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string.
    ///
    /// Note: This does not validate the format. Use [`Sha::parse`] for input
    /// that came from outside (e.g. git stdout).
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    /// Parses and validates a SHA, normalizing it to lowercase.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, InvalidSha> {
        let s = s.as_ref().trim();
        let valid_len = s.len() == 40 || s.len() == 64;
        if valid_len && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Sha(s.to_ascii_lowercase()))
        } else {
            Err(InvalidSha(s.to_string()))
        }
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A webhook delivery ID, used to correlate log lines and audit records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    pub fn new(s: impl Into<String>) -> Self {
        DeliveryId(s.into())
    }

    /// Builds a delivery ID from an untrusted header value.
    ///
    /// Control characters and whitespace are dropped and the result is capped
    /// at 64 characters, so the ID is always safe to embed in a single log
    /// line or snapshot label. Missing or empty input yields `-`.
    pub fn from_header(value: Option<&str>) -> Self {
        let cleaned: String = value
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_control() && !c.is_whitespace())
            .take(MAX_DELIVERY_ID_LEN)
            .collect();

        if cleaned.is_empty() {
            DeliveryId::unknown()
        } else {
            DeliveryId(cleaned)
        }
    }

    /// The placeholder ID for deliveries without one.
    pub fn unknown() -> Self {
        DeliveryId(UNKNOWN_DELIVERY_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
