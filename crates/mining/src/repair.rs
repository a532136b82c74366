//! Deterministic repair of malformed miner payloads
//!
//! JSON mode returns well-formed JSON that frequently misses the exact
//! schema: legacy field names, flat evidence, missing arrays, invented
//! enum values. The repair pass reconciles those shapes. Validation stays
//! non-blocking: a payload that is still invalid after repair is logged
//! and accepted, since downstream conversion is tolerant.

use serde_json::{json, Map, Value};
use tracing::debug;

use quarry_core::ContextType;

/// What the repair pass changed, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepairLog {
    pub renamed_definitions: usize,
    pub migrated_flat_evidence: usize,
    pub inserted_arrays: usize,
    pub coerced_context_types: usize,
}

impl RepairLog {
    pub fn changed(&self) -> bool {
        self.renamed_definitions
            + self.migrated_flat_evidence
            + self.inserted_arrays
            + self.coerced_context_types
            > 0
    }
}

const TOP_LEVEL_ARRAYS: [&str; 4] = ["claims", "jargon", "people", "mental_models"];

/// Repair a raw payload in place.
pub fn repair_payload(value: &mut Value) -> RepairLog {
    let mut log = RepairLog::default();

    let Some(root) = value.as_object_mut() else {
        return log;
    };

    // Missing required arrays become empty
    for key in TOP_LEVEL_ARRAYS {
        if !root.contains_key(key) {
            root.insert(key.to_string(), json!([]));
            log.inserted_arrays += 1;
        }
    }

    for key in TOP_LEVEL_ARRAYS {
        let Some(items) = root.get_mut(key).and_then(Value::as_array_mut) else {
            continue;
        };
        let spans_key = if key == "people" { "mentions" } else { "evidence_spans" };
        for item in items.iter_mut() {
            let Some(obj) = item.as_object_mut() else { continue };

            // Legacy field name on mental models (and harmless elsewhere)
            if key == "mental_models" {
                if let Some(description) = obj.remove("description") {
                    obj.entry("definition").or_insert(description);
                    log.renamed_definitions += 1;
                }
            }

            migrate_flat_evidence(obj, spans_key, &mut log);

            if !obj.contains_key(spans_key) {
                obj.insert(spans_key.to_string(), json!([]));
                log.inserted_arrays += 1;
            }

            if let Some(spans) = obj.get_mut(spans_key).and_then(Value::as_array_mut) {
                for span in spans.iter_mut() {
                    coerce_context_type(span, &mut log);
                }
            }
        }
    }

    if log.changed() {
        debug!(?log, "miner payload repaired");
    }
    log
}

/// Migrate the legacy flat `evidence_quote` + `timestamp` pair into
/// `evidence_spans[0]`.
fn migrate_flat_evidence(obj: &mut Map<String, Value>, spans_key: &str, log: &mut RepairLog) {
    let quote = obj.remove("evidence_quote");
    let timestamp = obj.remove("timestamp");
    let Some(quote) = quote else {
        if let Some(ts) = timestamp {
            obj.insert("timestamp".to_string(), ts);
        }
        return;
    };

    let has_spans = obj
        .get(spans_key)
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    if has_spans {
        return;
    }

    let ts = timestamp.unwrap_or_else(|| json!("00:00"));
    let span = json!({
        "t0": ts,
        "t1": ts,
        "quote": quote,
        "context_type": "exact"
    });
    obj.insert(spans_key.to_string(), json!([span]));
    log.migrated_flat_evidence += 1;
}

/// Normalize out-of-enum `context_type` values to the nearest valid value.
/// `domain` is free-form and passes through untouched.
fn coerce_context_type(span: &mut Value, log: &mut RepairLog) {
    let Some(obj) = span.as_object_mut() else { return };
    match obj.get("context_type").and_then(Value::as_str) {
        None => {
            obj.insert("context_type".to_string(), json!("exact"));
            log.coerced_context_types += 1;
        }
        Some(raw) if ContextType::parse(raw).is_none() => {
            let coerced = ContextType::coerce(raw).as_str();
            obj.insert("context_type".to_string(), json!(coerced));
            log.coerced_context_types += 1;
        }
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validate_miner_payload;

    #[test]
    fn flat_evidence_migrates_to_span() {
        let mut value = json!({
            "claims": [{"canonical": "x", "type": "factual", "evidence_quote": "said it", "timestamp": "00:12"}]
        });
        let log = repair_payload(&mut value);

        assert_eq!(log.migrated_flat_evidence, 1);
        assert!(log.inserted_arrays >= 3); // jargon, people, mental_models
        let span = &value["claims"][0]["evidence_spans"][0];
        assert_eq!(span["t0"], "00:12");
        assert_eq!(span["t1"], "00:12");
        assert_eq!(span["quote"], "said it");
        assert_eq!(span["context_type"], "exact");
        assert!(validate_miner_payload(&value).is_empty());
    }

    #[test]
    fn description_renames_to_definition_on_models() {
        let mut value = json!({
            "claims": [], "jargon": [], "people": [],
            "mental_models": [{"name": "Inversion", "description": "think backwards"}]
        });
        let log = repair_payload(&mut value);
        assert_eq!(log.renamed_definitions, 1);
        assert_eq!(value["mental_models"][0]["definition"], "think backwards");
        assert!(value["mental_models"][0].get("description").is_none());
    }

    #[test]
    fn invented_context_types_coerce() {
        let mut value = json!({
            "claims": [{"canonical": "x", "evidence_spans": [
                {"t0": "01:00", "t1": "01:05", "quote": "q", "context_type": "extended_context"},
                {"t0": "01:00", "t1": "01:05", "quote": "q", "context_type": "whole-segment"},
                {"t0": "01:00", "t1": "01:05", "quote": "q", "context_type": "banana"}
            ]}],
            "jargon": [], "people": [], "mental_models": []
        });
        let log = repair_payload(&mut value);
        assert_eq!(log.coerced_context_types, 3);
        let spans = value["claims"][0]["evidence_spans"].as_array().unwrap();
        assert_eq!(spans[0]["context_type"], "extended");
        assert_eq!(spans[1]["context_type"], "segment");
        assert_eq!(spans[2]["context_type"], "exact");
        assert!(validate_miner_payload(&value).is_empty());
    }

    #[test]
    fn free_form_domain_passes_through() {
        let mut value = json!({
            "claims": [], "people": [], "mental_models": [],
            "jargon": [{"name": "qualified immunity", "domain": "constitutional law"}]
        });
        repair_payload(&mut value);
        assert_eq!(value["jargon"][0]["domain"], "constitutional law");
    }

    #[test]
    fn people_flat_evidence_goes_to_mentions() {
        let mut value = json!({
            "claims": [], "jargon": [], "mental_models": [],
            "people": [{"name": "Ada Lovelace", "evidence_quote": "Ada wrote", "timestamp": "02:00"}]
        });
        let log = repair_payload(&mut value);
        assert_eq!(log.migrated_flat_evidence, 1);
        assert_eq!(value["people"][0]["mentions"][0]["quote"], "Ada wrote");
    }

    #[test]
    fn valid_payload_is_untouched() {
        let mut value = json!({
            "claims": [{"canonical": "x", "type": "factual",
                "evidence_spans": [{"t0": "00:01", "t1": "00:02", "quote": "q", "context_type": "exact"}]}],
            "jargon": [], "people": [], "mental_models": []
        });
        let before = value.clone();
        let log = repair_payload(&mut value);
        assert!(!log.changed());
        assert_eq!(value, before);
    }

    #[test]
    fn repair_closes_the_legacy_corpus() {
        // A grab bag of legacy shapes; repair must make all of them valid
        let legacy_payloads = vec![
            json!({"claims": [{"canonical": "a", "evidence_quote": "q", "timestamp": "00:05"}]}),
            json!({"claims": [], "jargon": [{"name": "j"}], "people": [], "mental_models": [
                {"name": "m", "description": "d"}]}),
            json!({"claims": [{"canonical": "b", "evidence_spans": [
                {"t0": 1, "t1": 2, "quote": "q", "context_type": "verbatim"}]}]}),
        ];
        for mut payload in legacy_payloads {
            repair_payload(&mut payload);
            let violations = validate_miner_payload(&payload);
            assert!(violations.is_empty(), "still invalid: {violations:?}");
        }
    }
}
