//! Cache key generation using SHA-256 hashes

use sha2::{Digest, Sha256};

/// Normalized request identity: uppercased method plus URL, hashed.
///
/// The hash gives stable, fixed-length keys regardless of URL length.
/// Query strings are part of the identity; fragments are not (they never
/// reach the network).
pub fn request_key(method: &str, request_url: &str) -> String {
    let mut hasher = Sha256::new();

    hasher.update(method.to_uppercase().as_bytes());
    hasher.update(b"|");

    let without_fragment = request_url.split('#').next().unwrap_or(request_url);
    hasher.update(without_fragment.as_bytes());

    format!("{:x}", hasher.finalize())
}
