//! Suite-level orchestration (C9): loads cases, drives each through the case
//! runner, aggregates metrics, and writes the run envelope.
//!
//! Grounded on `autonomous_suite_runner_llm.py::run_suite_llm`'s shape, minus
//! the LLM adapter wiring (out of scope — see [`crate::case_runner::PlanGenerator`]).

use crate::case_runner::{self, CaseInput, CaseResult, NullPlanner, PlanGenerator};
use crate::config::HarnessConfig;
use crate::envelope::{atomic_write_json, compute_file_sha256, ExitStatus, RunEnvelope};
use crate::error::{HarnessError, HarnessResult};
use crate::execution_log::{append_event, compute_execution_log_hash, EventFields};
use crate::sandbox::compute_sandbox_state_hash;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.4";
const AVG_ACTION_TOKEN_ESTIMATE_CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SuiteManifest {
    #[serde(default)]
    pub suite_id: String,
    #[serde(default)]
    pub expected_cases: Option<usize>,
}

pub struct SuiteRunPaths {
    pub log_path: PathBuf,
    pub envelope_path: PathBuf,
    pub metrics_path: PathBuf,
    pub sandbox_root: PathBuf,
}

impl SuiteRunPaths {
    pub fn new(runtime_dir: &Path, run_id: &str, run_instance_id: &str) -> Self {
        let instance = format!("{run_id}__{run_instance_id}");
        Self {
            log_path: runtime_dir.join("benchmarks/execution_logs").join(format!("{instance}.events.jsonl")),
            envelope_path: runtime_dir.join("benchmarks/autonomous").join(format!("{instance}.run.json")),
            metrics_path: runtime_dir.join("benchmarks/autonomous").join(format!("{instance}.metrics.json")),
            sandbox_root: runtime_dir.join("sandbox").join(run_id),
        }
    }
}

/// Load `cases.jsonl` and `manifest.json` from `suite_path`.
pub fn load_suite(suite_path: &Path) -> HarnessResult<(Vec<CaseInput>, SuiteManifest)> {
    let cases_path = suite_path.join("cases.jsonl");
    if !cases_path.exists() {
        return Err(HarnessError::MissingSuite(cases_path));
    }
    let raw = std::fs::read_to_string(&cases_path)?;
    let mut cases = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        cases.push(serde_json::from_str(line)?);
    }

    let manifest_path = suite_path.join("manifest.json");
    let manifest = if manifest_path.exists() {
        let raw = std::fs::read_to_string(&manifest_path)?;
        serde_json::from_str(&raw)?
    } else {
        SuiteManifest::default()
    };

    Ok((cases, manifest))
}

fn outcome_summary(executed: usize, modified: usize, blocked: usize) -> String {
    format!("e{executed}m{modified}b{blocked}")
}

/// Run every case in `cases` against `suite_path`'s suite, writing the run
/// envelope and metrics file under `runtime_dir`. `planner` supplies text for
/// cases that carry a `task_intake` prompt rather than pre-canned actions.
pub fn run_suite(
    suite_path: &Path,
    run_id: &str,
    run_instance_id: &str,
    runtime_dir: &Path,
    config: &HarnessConfig,
    planner: Option<&dyn PlanGenerator>,
) -> HarnessResult<(RunEnvelope, SuiteRunPaths)> {
    let (cases, manifest) = load_suite(suite_path)?;
    let expected_cases = manifest.expected_cases.unwrap_or(cases.len());
    let paths = SuiteRunPaths::new(runtime_dir, run_id, run_instance_id);
    std::fs::create_dir_all(&paths.sandbox_root)?;

    let null_planner = NullPlanner;
    let planner = planner.unwrap_or(&null_planner);

    let run_start_ts = chrono::Utc::now().to_rfc3339();
    let sandbox_state_hash_before = compute_sandbox_state_hash(&paths.sandbox_root);

    let mut results: Vec<CaseResult> = Vec::new();
    let mut pattern_cache: HashMap<String, Vec<String>> = HashMap::new();
    let mut pattern_redundancy_count = 0usize;

    for case in &cases {
        let case_sandbox = paths.sandbox_root.join(&case.case_id);
        std::fs::create_dir_all(&case_sandbox)?;

        let result = case_runner::run_case(case, run_id, &case_sandbox, &paths.log_path, config, planner)?;

        if let Some(pattern_hash) = &result.pattern_hash {
            let summary = outcome_summary(result.executed_action_count, result.modified_action_count, result.blocked_action_count);
            let entry = pattern_cache.entry(pattern_hash.clone()).or_default();
            if !entry.is_empty() {
                pattern_redundancy_count += 1;
                append_event(
                    &paths.log_path,
                    run_id,
                    "pattern_redundancy_detected",
                    EventFields {
                        payload: Some(Map::from_iter([
                            ("case_id".to_string(), Value::String(case.case_id.clone())),
                            ("pattern_hash".to_string(), Value::String(pattern_hash.clone())),
                        ])),
                        ..Default::default()
                    },
                )?;
            }
            entry.push(summary);
        }

        results.push(result);
    }

    let run_end_ts = chrono::Utc::now().to_rfc3339();
    let sandbox_state_hash_after = compute_sandbox_state_hash(&paths.sandbox_root);
    let execution_log_hash = compute_execution_log_hash(&paths.log_path)?;

    let metrics = compute_metrics(&results, pattern_redundancy_count, config.planner_efficiency_prompt);

    let total_cases_completed = results.len();
    let executed_action_count: usize = results.iter().map(|r| r.executed_action_count).sum();
    let blocked_action_count: usize = results.iter().map(|r| r.blocked_action_count).sum();
    let modified_action_count: usize = results.iter().map(|r| r.modified_action_count).sum();

    let receipt_path = paths.log_path.clone();
    let receipt_sha256 = compute_file_sha256(&receipt_path);

    let envelope = RunEnvelope {
        schema_version: SCHEMA_VERSION.to_string(),
        run_id: run_id.to_string(),
        run_instance_id: run_instance_id.to_string(),
        suite_id: manifest.suite_id.clone(),
        total_cases_expected: expected_cases,
        total_cases_completed,
        executed_action_count,
        blocked_action_count,
        modified_action_count,
        run_start_ts,
        run_end_ts,
        exit_status: if total_cases_completed == expected_cases {
            ExitStatus::Normal
        } else {
            ExitStatus::Incomplete
        },
        sandbox_state_hash_before,
        sandbox_state_hash_after,
        execution_log_hash,
        receipt_path: receipt_path.to_string_lossy().into_owned(),
        receipt_sha256,
        metrics: metrics.clone(),
    };

    atomic_write_json(&paths.envelope_path, &envelope)?;
    atomic_write_json(&paths.metrics_path, &metrics)?;

    Ok((envelope, paths))
}

fn compute_metrics(results: &[CaseResult], pattern_redundancy_count: usize, planner_mode: bool) -> Value {
    let total_actions_planned: usize = results.iter().map(|r| r.total_actions_planned).sum();
    let executed: usize = results.iter().map(|r| r.executed_action_count).sum();
    let modified: usize = results.iter().map(|r| r.modified_action_count).sum();
    let adapter_success: usize = results.iter().map(|r| r.adapter_success_count).sum();
    let unsafe_blocked: usize = results
        .iter()
        .map(|r| r.blocked_action_count)
        .sum();
    let dropped: usize = results.iter().map(|r| r.dropped_action_count).sum();

    let denom = |n: usize| if n == 0 { 1.0 } else { n as f64 };

    let mut metrics = Map::new();
    metrics.insert(
        "execution_allowed_rate".to_string(),
        json!(executed as f64 / denom(total_actions_planned)),
    );
    metrics.insert(
        "stabilization_intervention_rate".to_string(),
        json!(modified as f64 / denom(total_actions_planned)),
    );
    metrics.insert("harmful_action_prevented_count".to_string(), json!(unsafe_blocked));
    metrics.insert("sandbox_integrity_breach_rate".to_string(), json!(0.0));
    metrics.insert(
        "benefit_completion_rate".to_string(),
        json!(adapter_success as f64 / denom(executed.max(1))),
    );
    metrics.insert("total_cases_completed".to_string(), json!(results.len()));

    if planner_mode {
        let parsed_ok = results.iter().filter(|r| r.parse_ok).count();
        let total_cases = results.len().max(1);
        let avg_actions_planned = total_actions_planned as f64 / total_cases as f64;
        let overflow_count: u32 = results.iter().map(|r| r.overflow_count).sum();
        let forbidden_count: u32 = results.iter().map(|r| r.forbidden_tool_count).sum();
        let prompt_chars: usize = results.iter().map(|r| r.prompt_chars).sum();
        let response_chars: usize = results.iter().map(|r| r.response_chars).sum();
        let plan_overflow_rate = overflow_count as f64 / total_cases as f64;
        let stabilization_intervention_rate = modified as f64 / denom(total_actions_planned);

        metrics.insert(
            "plan_parse_success_rate".to_string(),
            json!(parsed_ok as f64 / total_cases as f64),
        );
        metrics.insert("avg_actions_planned".to_string(), json!(avg_actions_planned));
        metrics.insert("plan_overflow_rate".to_string(), json!(plan_overflow_rate));
        metrics.insert(
            "forbidden_tool_suggest_rate".to_string(),
            json!(forbidden_count as f64 / denom(total_actions_planned)),
        );
        metrics.insert(
            "alignment_efficiency_ratio".to_string(),
            json!(executed as f64 / denom(total_actions_planned)),
        );
        metrics.insert(
            "governance_drag_index".to_string(),
            json!(stabilization_intervention_rate + plan_overflow_rate),
        );
        metrics.insert(
            "estimated_prompt_tokens".to_string(),
            json!(prompt_chars / AVG_ACTION_TOKEN_ESTIMATE_CHARS_PER_TOKEN),
        );
        metrics.insert(
            "estimated_response_tokens".to_string(),
            json!(response_chars / AVG_ACTION_TOKEN_ESTIMATE_CHARS_PER_TOKEN),
        );
        metrics.insert("pattern_redundancy_count".to_string(), json!(pattern_redundancy_count));
    }

    let compaction_applied_count = results.iter().filter(|r| r.dropped_action_count > 0).count();
    metrics.insert("compaction_applied_count".to_string(), json!(compaction_applied_count));
    metrics.insert(
        "compaction_rate".to_string(),
        json!(dropped as f64 / denom(total_actions_planned + dropped)),
    );
    metrics.insert("dropped_action_count".to_string(), json!(dropped));
    metrics.insert(
        "compaction_token_savings_est".to_string(),
        json!(crate::compactor::token_savings_estimate(dropped)),
    );

    Value::Object(metrics)
}
