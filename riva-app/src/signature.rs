//! Webhook signature verification.
//!
//! Meta platforms sign each delivery with `X-Hub-Signature-256: sha256=<hex>`,
//! an HMAC-SHA256 of the raw request body under the app secret. The check runs
//! before any parsing so forged floods are rejected at the door.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Fail-closed check of a signature header against the raw body.
///
/// Missing secret, missing header, wrong prefix, bad hex, or digest mismatch
/// all return false. `Mac::verify_slice` compares in constant time. The only
/// bypass lives in the HTTP layer behind `webhook.allow_unsigned`; this
/// function has no skip path.
pub fn verify_signature(app_secret: Option<&str>, raw_body: &[u8], header: Option<&str>) -> bool {
    let Some(secret) = app_secret.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    let Some(provided) = header.map(str::trim) else {
        return false;
    };
    let Some(hex_digest) = provided.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(digest) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&digest).is_ok()
}

/// The header value a well-behaved origin would send for this body.
pub fn expected_signature(app_secret: &str, raw_body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(app_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(raw_body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
