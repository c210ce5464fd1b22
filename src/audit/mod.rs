//! Durable, append-only record of webhook deliveries.
//!
//! The audit log is a side channel: writing to it is best-effort and never
//! influences how a delivery is answered.

pub mod log;
pub mod record;

pub use log::{AuditError, AuditLog};
pub use record::{AuditEvent, AuditRecord, sanitize_detail, scrub_url_credentials};
