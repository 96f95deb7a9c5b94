//! Deterministic request fingerprints used as cache and dedup keys.
//!
//! Query parameters are sorted and JSON object keys are ordered recursively
//! before hashing, so semantically equal requests collapse to one key no
//! matter how their parameters were assembled.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::transport::Method;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn new(
        method: Method,
        resource: &str,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> Self {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        update_field(&mut hasher, method.as_str().as_bytes());
        update_field(&mut hasher, resource.as_bytes());
        hasher.update((sorted.len() as u64).to_le_bytes());
        for (name, value) in sorted {
            update_field(&mut hasher, name.as_bytes());
            update_field(&mut hasher, value.as_bytes());
        }
        match body {
            Some(body) => {
                let mut canonical = String::new();
                write_canonical(body, &mut canonical);
                hasher.update([1]);
                update_field(&mut hasher, canonical.as_bytes());
            }
            None => hasher.update([0]),
        }

        Self(format!("{method}:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-prefixed so no field can spill into its neighbour.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Serialize `value` with object keys in sorted order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
