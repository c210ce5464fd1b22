//! A single inbound delivery and the phases it moves through.
//!
//! ```text
//! Received -> Verifying -> Rejected
//!                       -> Authenticated -> Syncing -> Completed
//!                                                   -> Faulted
//! ```
//!
//! `Rejected`, `Completed` and `Faulted` are terminal. Every terminal phase maps
//! to exactly one [`Terminal`] response.

use std::fmt;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::WebhookSecret;
use crate::sync::SyncOutcome;
use crate::types::DeliveryId;
use crate::webhooks::{
    HEADER_DELIVERY, SignatureAlgorithm, parse_signature_header, select_signature_header,
    verify_signature,
};

/// Body of a successful response.
pub const BODY_SUCCESS: &str = "Updated successfully";
/// Body of a rejected response.
pub const BODY_UNAUTHORIZED: &str = "Unauthorized";
/// Body of every failed response, whatever the cause.
pub const BODY_FAILURE: &str = "Update failed";

/// One inbound webhook request.
///
/// The body is kept as the exact bytes received; the signature is computed
/// over them before anything else looks at the payload.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: DeliveryId,
    /// The claimed signature header value, if one was sent.
    pub signature: Option<String>,
    pub body: Bytes,
    pub received_at: DateTime<Utc>,
}

impl Delivery {
    /// Captures a delivery from request headers and the raw body.
    pub fn from_request(headers: &HeaderMap, body: Bytes) -> Self {
        let id = DeliveryId::from_header(
            headers
                .get(HEADER_DELIVERY)
                .and_then(|value| value.to_str().ok()),
        );

        Delivery {
            id,
            signature: select_signature_header(headers).map(str::to_string),
            body,
            received_at: Utc::now(),
        }
    }

    /// The algorithm named by the signature header, if it is a supported one.
    pub fn algorithm(&self) -> Option<SignatureAlgorithm> {
        self.signature
            .as_deref()
            .and_then(parse_signature_header)
            .map(|header| header.algorithm)
    }

    /// Checks the claimed signature against the raw body.
    pub fn is_authentic(&self, secret: &WebhookSecret) -> bool {
        verify_signature(self.signature.as_deref(), &self.body, secret.as_bytes())
    }

    /// Why verification failed, for the audit log. Never includes the secret.
    pub fn rejection_reason(&self, secret: &WebhookSecret) -> &'static str {
        if secret.is_empty() {
            "no webhook secret configured"
        } else if self.signature.is_none() {
            "missing signature header"
        } else if self.algorithm().is_none() {
            "malformed signature header or unsupported algorithm"
        } else {
            "signature mismatch"
        }
    }
}

/// Lifecycle phase of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPhase {
    Received,
    Verifying,
    Rejected,
    Authenticated,
    Syncing,
    Completed,
    Faulted,
}

impl DeliveryPhase {
    pub fn name(self) -> &'static str {
        match self {
            DeliveryPhase::Received => "received",
            DeliveryPhase::Verifying => "verifying",
            DeliveryPhase::Rejected => "rejected",
            DeliveryPhase::Authenticated => "authenticated",
            DeliveryPhase::Syncing => "syncing",
            DeliveryPhase::Completed => "completed",
            DeliveryPhase::Faulted => "faulted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryPhase::Rejected | DeliveryPhase::Completed | DeliveryPhase::Faulted
        )
    }

    /// Checks if a transition from this phase to `target` is valid.
    pub fn can_transition_to(self, target: DeliveryPhase) -> bool {
        matches!(
            (self, target),
            (DeliveryPhase::Received, DeliveryPhase::Verifying)
                | (DeliveryPhase::Verifying, DeliveryPhase::Rejected)
                | (DeliveryPhase::Verifying, DeliveryPhase::Authenticated)
                | (DeliveryPhase::Authenticated, DeliveryPhase::Syncing)
                | (DeliveryPhase::Syncing, DeliveryPhase::Completed)
                | (DeliveryPhase::Syncing, DeliveryPhase::Faulted)
        )
    }
}

impl fmt::Display for DeliveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validates that a phase transition is valid.
pub fn validate_transition(from: DeliveryPhase, to: DeliveryPhase) -> Result<(), String> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(format!("Invalid delivery transition: {} -> {}", from, to))
    }
}

/// Tracks the current phase of one delivery and logs each transition.
#[derive(Debug)]
pub struct PhaseTracker {
    delivery: DeliveryId,
    phase: DeliveryPhase,
}

impl PhaseTracker {
    pub fn new(delivery: DeliveryId) -> Self {
        debug!(delivery_id = %delivery, phase = %DeliveryPhase::Received, "Delivery phase");
        PhaseTracker {
            delivery,
            phase: DeliveryPhase::Received,
        }
    }

    pub fn phase(&self) -> DeliveryPhase {
        self.phase
    }

    /// Moves to `next`. An invalid transition is a programming error; it is
    /// logged and the phase is updated anyway so the delivery still terminates.
    pub fn advance(&mut self, next: DeliveryPhase) {
        if let Err(e) = validate_transition(self.phase, next) {
            warn!(delivery_id = %self.delivery, error = %e, "Unexpected delivery transition");
        }
        debug!(
            delivery_id = %self.delivery,
            from = %self.phase,
            to = %next,
            "Delivery phase"
        );
        self.phase = next;
    }
}

/// The externally observable result of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// Signature verification failed.
    Rejected,
    /// The synchronization ran to an anticipated outcome.
    Completed(SyncOutcome),
    /// Something unanticipated happened; details went to the audit log only.
    Faulted,
}

impl Terminal {
    pub fn phase(&self) -> DeliveryPhase {
        match self {
            Terminal::Rejected => DeliveryPhase::Rejected,
            Terminal::Completed(_) => DeliveryPhase::Completed,
            Terminal::Faulted => DeliveryPhase::Faulted,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Terminal::Rejected => StatusCode::UNAUTHORIZED,
            Terminal::Completed(outcome) if outcome.is_success() => StatusCode::OK,
            Terminal::Completed(_) | Terminal::Faulted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> &'static str {
        match self.status() {
            StatusCode::OK => BODY_SUCCESS,
            StatusCode::UNAUTHORIZED => BODY_UNAUTHORIZED,
            _ => BODY_FAILURE,
        }
    }
}

impl IntoResponse for Terminal {
    fn into_response(self) -> Response {
        (self.status(), self.body()).into_response()
    }
}
