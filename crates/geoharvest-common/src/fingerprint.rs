//! Stable content fingerprints
//!
//! Upstream features do not always carry an identifier. Document ids must be
//! stable across runs, so a missing id is replaced by a SHA-256 digest of the
//! feature's attribute mapping serialized with sorted keys.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest
pub const FINGERPRINT_LEN: usize = 16;

/// Compute the full SHA-256 hex digest of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint an attribute mapping
///
/// Keys are ordered before hashing so that two mappings with the same
/// content always produce the same fingerprint, whatever order the upstream
/// service emitted them in.
pub fn fingerprint_properties(properties: &Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(properties.clone()));
    let digest = sha256_hex(canonical.to_string().as_bytes());
    digest[..FINGERPRINT_LEN].to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(sorted)
        },
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
