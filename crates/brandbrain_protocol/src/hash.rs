//! Canonical JSON encoding and the compile input hash.
//!
//! The short-circuit decision compares hashes across processes and across
//! time, so the encoding must be stable: object keys sorted recursively,
//! no insignificant whitespace, parts joined with an explicit separator
//! byte so adjacent parts cannot collide.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{Capability, Platform};

const SEP: u8 = 0x1f;

/// Serialize a JSON value with all object keys sorted, compact.
///
/// Map iteration order must never leak into the hash.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Object keys are strings; serde_json escaping is canonical.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
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
        other => out.push_str(&other.to_string()),
    }
}

/// SHA-256 over separator-joined parts, hex-encoded (64 chars).
pub fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([SEP]);
    }
    format!("{:x}", hasher.finalize())
}

/// An enabled source connection projected to the fields that affect
/// ingestion. Cosmetic settings must not reach the hash.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProjection {
    pub platform: Platform,
    pub capability: Capability,
    pub identifier: String,
    /// Behavioral subset of the settings map (e.g. `extra_start_urls`).
    pub settings_subset: Value,
}

impl SourceProjection {
    fn to_value(&self) -> Value {
        serde_json::json!({
            "platform": self.platform.as_str(),
            "capability": self.capability.as_str(),
            "identifier": self.identifier,
            "settings_subset": self.settings_subset,
        })
    }
}

/// Compute the compile input hash over:
/// 1. onboarding answers,
/// 2. overrides document + sorted pinned-paths list,
/// 3. enabled source projections sorted by (platform, capability, identifier),
/// 4. `{prompt_version, model}`.
///
/// Missing onboarding or overrides hash as the empty document.
pub fn compute_input_hash(
    onboarding_answers: &Value,
    overrides: &Value,
    pinned_paths: &[String],
    sources: &[SourceProjection],
    prompt_version: &str,
    model: &str,
) -> String {
    let mut pinned: Vec<&String> = pinned_paths.iter().collect();
    pinned.sort();
    let overrides_part = serde_json::json!({
        "overrides": overrides,
        "pinned_paths": pinned,
    });

    let mut sorted = sources.to_vec();
    sorted.sort_by(|a, b| {
        (a.platform, a.capability, &a.identifier).cmp(&(b.platform, b.capability, &b.identifier))
    });
    let sources_part = Value::Array(sorted.iter().map(SourceProjection::to_value).collect());

    let versions_part = serde_json::json!({
        "prompt_version": prompt_version,
        "model": model,
    });

    hash_parts(&[
        &canonical_json(onboarding_answers),
        &canonical_json(&overrides_part),
        &canonical_json(&sources_part),
        &canonical_json(&versions_part),
    ])
}
