//! Core domain types.

pub mod ids;

pub use ids::{DeliveryId, InvalidSha, Sha};
