//! Append-only, tamper-evident execution log (C6).
//!
//! Ported from `execution_log.py`. Every event is a single JSON line; no
//! buffering, no rewriting. Two different canonical hashes are involved and
//! they exclude different fields:
//!
//! - [`payload_hash`], stamped onto each event, excludes only `ts_utc`
//!   (computed before the `payload_hash` key itself exists, so it implicitly
//!   covers `event_id`).
//! - [`compute_execution_log_hash`], over the whole log, excludes both
//!   `ts_utc` and `event_id` — the same plan run twice produces the same
//!   hash regardless of wall-clock time or random event identifiers.

use crate::error::HarnessResult;
use crate::util::hex_encode;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::io::Write as _;
use std::path::Path;

/// Per-event fields beyond the always-present `event_id`/`run_id`/`stage`/
/// `ts_utc`/`decision_type`. Mirrors the keyword arguments of `append_event`.
#[derive(Debug, Clone, Default)]
pub struct EventFields {
    pub action_id: Option<String>,
    pub decision_type: Option<String>,
    pub adapter_status: Option<String>,
    pub risk_label: Option<String>,
    pub risk_score: Option<String>,
    pub policy_reason: Option<String>,
    pub payload: Option<Map<String, Value>>,
}

/// SHA-256 of the canonical JSON object with `ts_utc` removed. Canonical
/// means "serialized by `serde_json` with its default, `BTreeMap`-backed
/// `Map`" — sorted keys, no extra whitespace, no `preserve_order` feature
/// enabled anywhere in this workspace.
fn payload_hash(event: &Map<String, Value>) -> String {
    let mut without_ts = event.clone();
    without_ts.remove("ts_utc");
    let canonical = serde_json::to_string(&without_ts).expect("Map<String, Value> always serializes");
    hex_encode(Sha256::digest(canonical.as_bytes()))
}

/// Append one execution event to `log_path`, creating parent directories if
/// needed, fsyncing after every write. Returns the event as written.
pub fn append_event(
    log_path: &Path,
    run_id: &str,
    stage: &str,
    fields: EventFields,
) -> HarnessResult<Value> {
    let event_id = uuid::Uuid::new_v4().to_string();
    let ts_utc = chrono::Utc::now().to_rfc3339();

    let mut event = Map::new();
    event.insert("event_id".to_string(), Value::String(event_id));
    event.insert("run_id".to_string(), Value::String(run_id.to_string()));
    event.insert("stage".to_string(), Value::String(stage.to_string()));
    event.insert("ts_utc".to_string(), Value::String(ts_utc));
    event.insert(
        "decision_type".to_string(),
        Value::String(fields.decision_type.unwrap_or_else(|| "allow".to_string())),
    );
    if let Some(v) = fields.action_id {
        event.insert("action_id".to_string(), Value::String(v));
    }
    if let Some(v) = fields.adapter_status {
        event.insert("adapter_status".to_string(), Value::String(v));
    }
    if let Some(v) = fields.risk_label {
        event.insert("risk_label".to_string(), Value::String(v));
    }
    if let Some(v) = fields.risk_score {
        event.insert("risk_score".to_string(), Value::String(v));
    }
    if let Some(v) = fields.policy_reason {
        event.insert("policy_reason".to_string(), Value::String(v));
    }
    if let Some(payload) = fields.payload {
        for (k, v) in payload {
            event.insert(k, v);
        }
    }

    let hash = payload_hash(&event);
    event.insert("payload_hash".to_string(), Value::String(hash));

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let line = serde_json::to_string(&event)?;
    writeln!(file, "{line}")?;
    file.flush()?;
    file.sync_all()?;

    Ok(Value::Object(event))
}

/// SHA-256 over the whole log with `ts_utc` and `event_id` stripped from
/// every event. Two runs of the same plan through the same pipeline produce
/// the same hash. Returns `sha256("[]")` if the log doesn't exist.
pub fn compute_execution_log_hash(log_path: &Path) -> HarnessResult<String> {
    if !log_path.exists() {
        return Ok(hex_encode(Sha256::digest(b"[]")));
    }

    let raw = std::fs::read_to_string(log_path)?;
    let mut events = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut event: Map<String, Value> = serde_json::from_str(line)?;
        event.remove("ts_utc");
        event.remove("event_id");
        events.push(Value::Object(event));
    }

    let canonical = serde_json::to_string(&events)?;
    Ok(hex_encode(Sha256::digest(canonical.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appended_event_carries_payload_hash_and_optional_fields() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("run.jsonl");
        let event = append_event(
            &log_path,
            "run-1",
            "risk_evaluation",
            EventFields {
                action_id: Some("1".to_string()),
                risk_label: Some("benign".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(event["run_id"], "run-1");
        assert_eq!(event["stage"], "risk_evaluation");
        assert_eq!(event["action_id"], "1");
        assert!(event.get("payload_hash").is_some());
        assert_eq!(std::fs::read_to_string(&log_path).unwrap().lines().count(), 1);
    }

    #[test]
    fn log_hash_is_stable_across_volatile_fields() {
        let dir1 = tempdir().unwrap();
        let dir2 = tempdir().unwrap();
        let log1 = dir1.path().join("run.jsonl");
        let log2 = dir2.path().join("run.jsonl");

        for log_path in [&log1, &log2] {
            append_event(
                log_path,
                "run-x",
                "sandbox_execution",
                EventFields {
                    action_id: Some("1".to_string()),
                    adapter_status: Some("success".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        assert_eq!(
            compute_execution_log_hash(&log1).unwrap(),
            compute_execution_log_hash(&log2).unwrap()
        );
    }

    #[test]
    fn missing_log_hashes_as_empty_array() {
        let missing = Path::new("/nonexistent/run.jsonl");
        assert_eq!(
            compute_execution_log_hash(missing).unwrap(),
            hex_encode(Sha256::digest(b"[]"))
        );
    }
}
