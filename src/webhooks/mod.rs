//! Webhook authentication for push notifications.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA1/256/512)
//! - Selection of the signature header the provider sent

pub mod signature;

use axum::http::HeaderMap;

pub use signature::{
    SignatureAlgorithm, SignatureHeader, compute_signature, format_signature_header,
    parse_signature_header, verify_signature,
};

/// Header carrying the HMAC-SHA256 signature.
pub const HEADER_SIGNATURE_256: &str = "x-hub-signature-256";
/// Legacy header carrying the HMAC-SHA1 signature.
pub const HEADER_SIGNATURE: &str = "x-hub-signature";
/// Header carrying the provider's unique delivery ID.
pub const HEADER_DELIVERY: &str = "x-github-delivery";

/// Picks the signature header to verify, preferring the SHA-256 variant.
///
/// An empty or non-UTF-8 value is treated as absent, so a provider that sends
/// both headers with one of them blank still gets verified against the other.
pub fn select_signature_header(headers: &HeaderMap) -> Option<&str> {
    [HEADER_SIGNATURE_256, HEADER_SIGNATURE]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .find(|value| !value.is_empty())
}
