//! Input fingerprints for idempotent step caching
//!
//! A fingerprint is a BLAKE3 hash over (step name, step version, canonicalized
//! inputs). Together with the artifacts table's UNIQUE constraint it makes the
//! whole pipeline idempotent under reprocessing: bumping a step's version or
//! changing its input invalidates only that step and everything downstream.

use serde_json::Value;

/// Compute the fingerprint for one step invocation.
///
/// Inputs are canonicalized through serde_json's object ordering (BTreeMap
/// backed), so logically equal inputs always hash identically.
pub fn fingerprint(step_name: &str, step_version: u32, inputs: &Value) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(step_name.as_bytes());
    hasher.update(&step_version.to_le_bytes());
    hasher.update(canonical_json(inputs).as_bytes());
    format!("{:.32}", hasher.finalize().to_hex())
}

/// Serialize JSON with object keys sorted, independent of insertion order
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        other => other.to_string(),
    }
}
