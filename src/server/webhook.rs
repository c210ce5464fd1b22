//! Webhook endpoint handler.
//!
//! Verifies the delivery, runs one synchronization and maps the result to a
//! response. The handler never lets a failure escape to the HTTP layer: every
//! delivery ends in exactly one [`Terminal`], and internal detail only ever
//! reaches the audit log.

use std::any::Any;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use super::AppState;
use super::delivery::{Delivery, DeliveryPhase, PhaseTracker, Terminal};
use crate::audit::{AuditEvent, AuditLog, sanitize_detail};
use crate::sync::{Synchronizer, WorkingCopy};
use crate::types::DeliveryId;

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Headers:
///   - `X-Hub-Signature-256` or `X-Hub-Signature`: HMAC of the raw body
///   - `X-GitHub-Delivery` (optional): delivery ID for correlation
/// - Body: anything; it is authenticated but not parsed
///
/// # Response
///
/// - 200 `Updated successfully`: the checkout now matches the remote branch
/// - 401 `Unauthorized`: signature missing, malformed or wrong, or no secret
///   configured
/// - 500 `Update failed`: synchronization already running, integration failed,
///   or an unexpected fault
pub async fn webhook_handler<R: WorkingCopy>(
    State(app_state): State<AppState<R>>,
    headers: HeaderMap,
    body: Bytes,
) -> Terminal {
    let delivery = Delivery::from_request(&headers, body);
    process_delivery(&app_state, delivery).await
}

/// Drives one delivery from `Received` to a terminal phase.
pub async fn process_delivery<R: WorkingCopy>(
    app_state: &AppState<R>,
    delivery: Delivery,
) -> Terminal {
    let audit = app_state.audit();
    let mut phase = PhaseTracker::new(delivery.id.clone());

    phase.advance(DeliveryPhase::Verifying);
    if !delivery.is_authentic(app_state.secret()) {
        let reason = delivery.rejection_reason(app_state.secret());
        phase.advance(DeliveryPhase::Rejected);
        warn!(delivery_id = %delivery.id, reason, "Rejected webhook delivery");
        audit.record(AuditEvent::Unauthorized, &delivery.id, reason);
        return Terminal::Rejected;
    }

    phase.advance(DeliveryPhase::Authenticated);
    let algorithm = delivery.algorithm().map_or("unknown", |alg| alg.name());
    audit.record(
        AuditEvent::Accepted,
        &delivery.id,
        format!("{}, {} bytes", algorithm, delivery.body.len()),
    );

    phase.advance(DeliveryPhase::Syncing);

    // Detached from the request: dropping the handler future (client
    // disconnect) leaves both the synchronization and its audit record intact.
    let task = tokio::spawn(synchronize_and_record(
        app_state.synchronizer(),
        audit.clone(),
        delivery.id.clone(),
    ));

    let terminal = match task.await {
        Ok(terminal) => terminal,
        Err(join_error) => {
            let detail = describe_join_error(join_error);
            error!(
                delivery_id = %delivery.id,
                error = %sanitize_detail(&detail),
                "Outcome recording task failed"
            );
            audit.record(AuditEvent::Faulted, &delivery.id, detail);
            Terminal::Faulted
        }
    };

    phase.advance(terminal.phase());
    terminal
}

/// Runs one synchronization and writes its outcome to the audit log.
///
/// The synchronization itself runs on a further task, so a panic in it
/// surfaces here as a [`JoinError`] and is still recorded.
async fn synchronize_and_record<R: WorkingCopy>(
    synchronizer: Arc<Synchronizer<R>>,
    audit: AuditLog,
    delivery: DeliveryId,
) -> Terminal {
    let id = delivery.clone();
    let result = tokio::spawn(async move { synchronizer.synchronize(&id).await }).await;

    match result {
        Ok(Ok(outcome)) => {
            let detail = outcome.detail();
            if outcome.is_success() {
                info!(
                    delivery_id = %delivery,
                    outcome = %outcome.audit_event(),
                    detail = %sanitize_detail(&detail),
                    "Synchronized checkout"
                );
            } else {
                warn!(
                    delivery_id = %delivery,
                    outcome = %outcome.audit_event(),
                    detail = %sanitize_detail(&detail),
                    "Synchronization did not complete"
                );
            }
            audit.record(outcome.audit_event(), &delivery, detail);
            Terminal::Completed(outcome)
        }
        Ok(Err(fault)) => {
            let detail = fault.to_string();
            error!(
                delivery_id = %delivery,
                error = %sanitize_detail(&detail),
                "Synchronization fault"
            );
            audit.record(AuditEvent::Faulted, &delivery, detail);
            Terminal::Faulted
        }
        Err(join_error) => {
            let detail = describe_join_error(join_error);
            error!(
                delivery_id = %delivery,
                error = %sanitize_detail(&detail),
                "Synchronization task failed"
            );
            audit.record(AuditEvent::Faulted, &delivery, detail);
            Terminal::Faulted
        }
    }
}

fn describe_join_error(join_error: JoinError) -> String {
    if join_error.is_panic() {
        format!(
            "synchronization panicked: {}",
            panic_message(join_error.into_panic().as_ref())
        )
    } else {
        format!("synchronization task did not complete: {}", join_error)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
