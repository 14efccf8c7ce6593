//! Hashing System - SHA-256 for Artifacts and Manifests
//!
//! Rendering is deterministic, so equal requests give equal hashes and a
//! manifest can be checked against the files it lists.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Hash of a manifest's canonical JSON
pub fn compute_manifest_hash<T: Serialize>(manifest: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(manifest)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// request_hash = sha256(template_sha256 + canonical_params + engine_version)
pub fn compute_request_hash(
    template_sha256: &str,
    params: &impl Serialize,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let canonical_params = canonical_json(params)?;
    let combined = format!("{}:{}:{}", template_sha256, canonical_params, engine_version);
    Ok(sha256_hex(combined.as_bytes()))
}
