//! Post-run invariant checker (C10).
//!
//! Ported from `autonomous_verifier.py::verify_run`. Read-only: never writes
//! to the envelope, log, or sandbox it inspects.

use crate::envelope::RunEnvelope;
use crate::execution_log::compute_execution_log_hash;
use serde::Serialize;
use std::path::Path;

const VALID_SCHEMA_VERSIONS: [&str; 3] = ["1.2", "1.3", "1.4"];
const SCHEMA_1_4_COMPACTION_KEYS: [&str; 4] = [
    "compaction_applied_count",
    "compaction_rate",
    "dropped_action_count",
    "compaction_token_savings_est",
];

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub found: Vec<String>,
}

impl CheckResult {
    fn just(pass: bool) -> Self {
        Self { pass, expected: None, actual: None, found: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub schema_version_valid: CheckResult,
    pub compaction_metrics_consistent: CheckResult,
    pub total_cases_completed: CheckResult,
    pub execution_log_hash: CheckResult,
    pub sandbox_hashes_recorded: CheckResult,
    pub no_tmp_remains: CheckResult,
    pub overall: CheckResult,
}

/// Verify one run's envelope against its log and sandbox. `expected_cases`
/// comes from the suite manifest, independent of whatever the envelope
/// claims.
pub fn verify_run(
    envelope: &RunEnvelope,
    log_path: &Path,
    expected_cases: usize,
    runtime_root: &Path,
) -> VerificationReport {
    let schema_version_valid = CheckResult {
        pass: VALID_SCHEMA_VERSIONS.contains(&envelope.schema_version.as_str()),
        expected: None,
        actual: Some(envelope.schema_version.clone()),
        found: Vec::new(),
    };

    let compaction_metrics_consistent = if envelope.schema_version == "1.4" {
        let metrics = envelope.metrics.as_object();
        let ok = metrics
            .map(|m| SCHEMA_1_4_COMPACTION_KEYS.iter().all(|k| m.contains_key(*k)))
            .unwrap_or(false);
        CheckResult::just(ok)
    } else {
        CheckResult::just(true)
    };

    let total_cases_completed = CheckResult {
        pass: envelope.total_cases_completed == expected_cases,
        expected: Some(expected_cases.to_string()),
        actual: Some(envelope.total_cases_completed.to_string()),
        found: Vec::new(),
    };

    let execution_log_hash = if log_path.exists() {
        match compute_execution_log_hash(log_path) {
            Ok(computed) => CheckResult {
                pass: envelope.execution_log_hash == computed,
                expected: Some(computed),
                actual: Some(envelope.execution_log_hash.clone()),
                found: Vec::new(),
            },
            Err(_) => CheckResult::just(false),
        }
    } else {
        CheckResult::just(false)
    };

    let sandbox_hashes_recorded = CheckResult::just(
        !envelope.sandbox_state_hash_before.is_empty() || !envelope.sandbox_state_hash_after.is_empty(),
    );

    let tmp_files = find_tmp_files(runtime_root);
    let no_tmp_remains = CheckResult {
        pass: tmp_files.is_empty(),
        expected: None,
        actual: None,
        found: tmp_files,
    };

    let overall_pass = schema_version_valid.pass
        && compaction_metrics_consistent.pass
        && total_cases_completed.pass
        && execution_log_hash.pass
        && sandbox_hashes_recorded.pass
        && no_tmp_remains.pass;

    VerificationReport {
        schema_version_valid,
        compaction_metrics_consistent,
        total_cases_completed,
        execution_log_hash,
        sandbox_hashes_recorded,
        no_tmp_remains,
        overall: CheckResult::just(overall_pass),
    }
}

fn find_tmp_files(root: &Path) -> Vec<String> {
    let mut found = Vec::new();
    walk(root, &mut found);
    found
}

fn walk(dir: &Path, found: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, found);
        } else if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
            found.push(path.to_string_lossy().into_owned());
        }
    }
}
