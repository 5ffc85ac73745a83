//! Canonical JSON encoding and digesting for rule bundles.
//!
//! Canonical form: object keys sorted ascending, minimal separators, no
//! trailing whitespace. The SHA-256 of this encoding identifies a bundle
//! everywhere (compile cache, appointment stamps, snapshot rows) and must
//! be stable across processes.

use sha2::{Digest, Sha256};

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// SHA-256 hex digest of the canonical encoding.
pub fn bundle_digest(value: &serde_json::Value) -> String {
    let canonical = canonical_json(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_value(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        serde_json::Value::String(s) => write_string(out, s),
        other => {
            // Numbers, booleans, null: serde_json's rendering is already
            // minimal and deterministic.
            out.push_str(&other.to_string());
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push_str(&serde_json::Value::String(s.to_owned()).to_string());
}
