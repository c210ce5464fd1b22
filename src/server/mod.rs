//! HTTP server for the deploy hook.
//!
//! # Endpoints
//!
//! - `POST <route>` (default `/update_server`) - Accepts push deliveries and
//!   synchronizes the checkout (see [`webhook_handler`])
//! - `GET /health` - Returns 200 if the server is running

use std::sync::Arc;

use axum::http::StatusCode;

pub mod delivery;
pub mod webhook;

pub use delivery::{Delivery, DeliveryPhase, PhaseTracker, Terminal};
pub use webhook::{process_delivery, webhook_handler};

use crate::audit::AuditLog;
use crate::config::{Config, WebhookSecret};
use crate::sync::{Synchronizer, WorkingCopy};

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor. Everything in
/// it is fixed at startup; the only mutable resource, the working copy, is
/// owned by the synchronizer.
pub struct AppState<R> {
    inner: Arc<AppStateInner<R>>,
}

struct AppStateInner<R> {
    /// Secret for verifying webhook signatures.
    secret: WebhookSecret,

    /// Audit log shared with the synchronizer.
    audit: AuditLog,

    synchronizer: Arc<Synchronizer<R>>,

    /// Path of the webhook endpoint.
    route: String,
}

// Manual impl: a derive would require `R: Clone`.
impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: WorkingCopy> AppState<R> {
    /// Creates a new `AppState`.
    ///
    /// `audit` should be the same log the synchronizer writes to, so that all
    /// records for a delivery end up in one file.
    pub fn new(
        secret: WebhookSecret,
        audit: AuditLog,
        synchronizer: Synchronizer<R>,
        route: impl Into<String>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                secret,
                audit,
                synchronizer: Arc::new(synchronizer),
                route: route.into(),
            }),
        }
    }

    /// Builds the state for `repo` from the process configuration.
    pub fn from_config(config: &Config, repo: R) -> Self {
        let audit = AuditLog::new(&config.audit_log);
        let synchronizer = Synchronizer::new(repo, audit.clone(), config.integrate_timeout);
        AppState::new(config.secret.clone(), audit, synchronizer, config.route.clone())
    }

    pub fn secret(&self) -> &WebhookSecret {
        &self.inner.secret
    }

    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    /// Returns a handle to the synchronizer that can be moved into a task.
    pub fn synchronizer(&self) -> Arc<Synchronizer<R>> {
        Arc::clone(&self.inner.synchronizer)
    }

    pub fn route(&self) -> &str {
        &self.inner.route
    }
}

/// Liveness check. Does not touch the working copy.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Builds the axum Router with all endpoints.
pub fn build_router<R: WorkingCopy>(app_state: AppState<R>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route(app_state.route(), post(webhook_handler::<R>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
