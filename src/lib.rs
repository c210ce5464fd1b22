//! Deploy hook - keeps a deployed git checkout in sync with its remote branch.
//!
//! An authenticated push notification triggers a synchronization: local drift
//! in the checkout is snapshotted, then the remote branch is fast-forwarded
//! into it. Every delivery and its outcome is appended to an audit log.

pub mod audit;
pub mod config;
pub mod git;
pub mod server;
pub mod sync;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
