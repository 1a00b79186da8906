//! The draft step and snapshot assembly helpers.
//!
//! The real LLM compile is out of scope; the contract is only "producer of
//! a JSON document". `StubDraftProducer` derives a deterministic draft and
//! QA report from the onboarding answers and the bundle summary, which is
//! enough for the pipeline, the read path, and every test to be real.

use serde_json::{json, Map, Value};

use brandbrain_protocol::BundleSummary;

/// Produces the draft document and its QA report.
pub trait DraftProducer: Send + Sync {
    fn produce(&self, onboarding: &Value, summary: &BundleSummary, evidence_count: usize)
        -> (Value, Value);
}

/// Deterministic stand-in for the LLM step.
pub struct StubDraftProducer;

impl DraftProducer for StubDraftProducer {
    fn produce(
        &self,
        onboarding: &Value,
        summary: &BundleSummary,
        evidence_count: usize,
    ) -> (Value, Value) {
        let name = onboarding
            .get("brand_name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let draft = json!({
            "identity": {
                "name": name,
                "value_prop": onboarding.get("value_prop").cloned().unwrap_or(Value::Null),
                "target_audience": onboarding.get("target_audience").cloned().unwrap_or(Value::Null),
            },
            "voice": {
                "tone": onboarding.get("tone").cloned().unwrap_or(Value::Null),
            },
            "evidence": {
                "item_count": evidence_count,
                "transcript_coverage": summary.transcript_coverage.coverage_ratio,
            },
        });
        let qa_report = json!({
            "checks": [
                {"name": "has_evidence", "passed": evidence_count > 0},
                {"name": "has_brand_name", "passed": name != "unknown"},
            ],
            "web_only_exception": summary.web_only_exception,
        });
        (draft, qa_report)
    }
}

/// Overlay a dotted-path overrides map onto a document. A `null` value
/// removes the path; pinned paths are applied last so they always win.
pub fn apply_overrides(doc: &mut Value, overrides: &Value, pinned_paths: &[String]) {
    let Some(map) = overrides.as_object() else {
        return;
    };
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by_key(|(path, _)| {
        let pinned = pinned_paths.contains(path);
        (pinned, path.to_string())
    });
    for (path, value) in entries {
        if value.is_null() {
            remove_path(doc, path);
        } else {
            set_path(doc, path, value.clone());
        }
    }
}

/// Set a dotted path, creating intermediate objects as needed.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let Value::Object(map) = doc else {
        return;
    };
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let next = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_path(next, rest, value);
        }
    }
}

fn remove_path(doc: &mut Value, path: &str) {
    let Some(map) = doc.as_object_mut() else {
        return;
    };
    match path.split_once('.') {
        None => {
            map.remove(path);
        }
        Some((head, rest)) => {
            if let Some(next) = map.get_mut(head) {
                remove_path(next, rest);
            }
        }
    }
}

/// Shallow top-level diff between two snapshot documents.
pub fn snapshot_diff(previous: &Value, next: &Value) -> Value {
    let empty = Map::new();
    let prev = previous.as_object().unwrap_or(&empty);
    let curr = next.as_object().unwrap_or(&empty);

    let mut added: Vec<&String> = curr.keys().filter(|k| !prev.contains_key(*k)).collect();
    let mut removed: Vec<&String> = prev.keys().filter(|k| !curr.contains_key(*k)).collect();
    let mut changed: Vec<&String> = curr
        .keys()
        .filter(|k| match (prev.get(*k), curr.get(*k)) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        })
        .collect();
    added.sort();
    removed.sort();
    changed.sort();

    json!({
        "added": added,
        "removed": removed,
        "changed": changed,
    })
}
