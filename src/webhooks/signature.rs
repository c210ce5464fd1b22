//! Webhook signature verification using HMAC.
//!
//! Source-control providers sign webhook payloads with a shared secret and send
//! the tag in a header of the form `<algorithm>=<hex digest>`, for example
//! `sha256=5f3c...`. GitHub sends `X-Hub-Signature-256` (SHA-256) and the legacy
//! `X-Hub-Signature` (SHA-1).
//!
//! Verification fails closed: a missing header, a malformed header, an
//! unsupported algorithm or an empty secret all yield `false`.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Hash functions accepted in a signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl SignatureAlgorithm {
    /// All supported algorithms, strongest first.
    pub const ALL: [SignatureAlgorithm; 3] = [
        SignatureAlgorithm::Sha512,
        SignatureAlgorithm::Sha256,
        SignatureAlgorithm::Sha1,
    ];

    /// Looks up an algorithm by its header name (`sha1`, `sha256`, `sha512`).
    ///
    /// Names are matched exactly; providers always send lowercase.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(SignatureAlgorithm::Sha1),
            "sha256" => Some(SignatureAlgorithm::Sha256),
            "sha512" => Some(SignatureAlgorithm::Sha512),
            _ => None,
        }
    }

    /// The name used in the header prefix.
    pub fn name(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1",
            SignatureAlgorithm::Sha256 => "sha256",
            SignatureAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the MAC output in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            SignatureAlgorithm::Sha1 => 20,
            SignatureAlgorithm::Sha256 => 32,
            SignatureAlgorithm::Sha512 => 64,
        }
    }
}

/// A parsed `<algorithm>=<hex>` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub algorithm: SignatureAlgorithm,
    pub digest: Vec<u8>,
}

/// Parses a signature header (e.g., "sha256=abc123...").
///
/// Returns `None` for malformed headers (no `=`, unknown algorithm, invalid
/// hex). Never panics.
///
/// # Examples
///
/// ```
/// use deploy_hook::webhooks::{SignatureAlgorithm, parse_signature_header};
///
/// let parsed = parse_signature_header("sha256=abcd1234").unwrap();
/// assert_eq!(parsed.algorithm, SignatureAlgorithm::Sha256);
/// assert_eq!(parsed.digest, vec![0xab, 0xcd, 0x12, 0x34]);
///
/// // Missing algorithm prefix
/// assert!(parse_signature_header("abcd1234").is_none());
///
/// // Unsupported algorithm
/// assert!(parse_signature_header("md5=abcd1234").is_none());
///
/// // Bad hex
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<SignatureHeader> {
    let (name, hex_sig) = header.split_once('=')?;
    let algorithm = SignatureAlgorithm::from_name(name)?;
    let digest = hex::decode(hex_sig).ok()?;
    Some(SignatureHeader { algorithm, digest })
}

/// Computes the HMAC of a payload using the given secret and algorithm.
///
/// Used by tests and tooling to produce valid deliveries.
pub fn compute_signature(algorithm: SignatureAlgorithm, payload: &[u8], secret: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so key setup cannot fail.
    match algorithm {
        SignatureAlgorithm::Sha1 => HmacSha1::new_from_slice(secret)
            .map(|mut mac| {
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            })
            .unwrap_or_default(),
        SignatureAlgorithm::Sha256 => HmacSha256::new_from_slice(secret)
            .map(|mut mac| {
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            })
            .unwrap_or_default(),
        SignatureAlgorithm::Sha512 => HmacSha512::new_from_slice(secret)
            .map(|mut mac| {
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            })
            .unwrap_or_default(),
    }
}

/// Formats a signature as a header value, e.g. "sha256=<hex>".
pub fn format_signature_header(algorithm: SignatureAlgorithm, signature: &[u8]) -> String {
    format!("{}={}", algorithm.name(), hex::encode(signature))
}

/// Verifies a webhook signature header against the raw payload and secret.
///
/// Returns `true` only if the header is present and well formed, names a
/// supported algorithm, the secret is non-empty, and the MAC matches.
/// The digest comparison is constant-time (delegated to `Mac::verify_slice`).
///
/// # Examples
///
/// ```
/// use deploy_hook::webhooks::{
///     SignatureAlgorithm, compute_signature, format_signature_header, verify_signature,
/// };
///
/// let payload = b"Hello, World!";
/// let secret = b"my-secret-key";
///
/// let sig = compute_signature(SignatureAlgorithm::Sha256, payload, secret);
/// let header = format_signature_header(SignatureAlgorithm::Sha256, &sig);
///
/// assert!(verify_signature(Some(&header), payload, secret));
/// assert!(!verify_signature(Some(&header), payload, b"wrong-secret"));
/// assert!(!verify_signature(None, payload, secret));
/// ```
pub fn verify_signature(signature_header: Option<&str>, payload: &[u8], secret: &[u8]) -> bool {
    if secret.is_empty() {
        return false;
    }

    let Some(header) = signature_header else {
        return false;
    };

    let Some(claimed) = parse_signature_header(header) else {
        return false;
    };

    match claimed.algorithm {
        SignatureAlgorithm::Sha1 => match HmacSha1::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(payload);
                mac.verify_slice(&claimed.digest).is_ok()
            }
            Err(_) => false,
        },
        SignatureAlgorithm::Sha256 => match HmacSha256::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(payload);
                mac.verify_slice(&claimed.digest).is_ok()
            }
            Err(_) => false,
        },
        SignatureAlgorithm::Sha512 => match HmacSha512::new_from_slice(secret) {
            Ok(mut mac) => {
                mac.update(payload);
                mac.verify_slice(&claimed.digest).is_ok()
            }
            Err(_) => false,
        },
    }
}
