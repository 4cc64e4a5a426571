//! Idempotency keys for pending actions.
//!
//! The key is a hex SHA-256 of `userID:tool:canonicalJSON(params):bucket`
//! where the bucket is `floor(unixTime / bucket_seconds)`. Two identical
//! requests inside one bucket collapse into one pending action; after the
//! bucket rolls over a genuine re-request mints a fresh key.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub const DEFAULT_BUCKET_SECONDS: i64 = 600;

/// Canonicalize raw parameter text: parse and re-serialize, or fall back
/// to the raw input when it is not valid JSON.
pub fn canonicalize(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => value.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Compute the idempotency key for one invocation.
///
/// `serde_json` maps are BTreeMap-backed (the `preserve_order` feature is
/// off), so `Value::to_string` yields sorted keys with no whitespace and
/// is canonical for structurally equal inputs.
pub fn key(
    user_id: &str,
    tool: &str,
    params: &serde_json::Value,
    now: DateTime<Utc>,
    bucket_seconds: i64,
) -> String {
    let canonical = params.to_string();
    let bucket = now.timestamp().div_euclid(bucket_seconds);
    let digest = Sha256::digest(format!("{user_id}:{tool}:{canonical}:{bucket}").as_bytes());
    hex::encode(digest)
}
