//! Per-case pipeline (C8): parse → compact → evaluate → stabilize → execute → log.
//!
//! Grounded on `autonomous_run.py`'s `run_single_case` shape (summarized via
//! its callers in `autonomous_suite_runner_llm.py`) and on spec §4.7's state
//! machine. A case either carries a pre-canned `actions` list (planner-less)
//! or a `task_intake` prompt that a [`PlanGenerator`] turns into raw text.

use crate::action::{Action, Plan};
use crate::compactor::{compact_plan, CompactionInfo};
use crate::config::HarnessConfig;
use crate::error::HarnessResult;
use crate::execution_log::{append_event, EventFields};
use crate::plan_parser::{parse_plan_from_json, ParseOutcome};
use crate::policy::{self, DecisionType, PolicyVerdict};
use crate::sandbox::ExecutionAdapter;
use crate::stabilizer::{self, Mechanism};
use crate::util::hex_encode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;

/// One line of `cases.jsonl`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseInput {
    pub case_id: String,
    #[serde(default)]
    pub task_intake: Option<String>,
    #[serde(default)]
    pub actions: Option<Vec<RawAction>>,
}

/// A pre-canned action as it appears in a suite case, before `action_id`/
/// `order` are assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// What a planner returns for one prompt. The planner itself — an LLM or any
/// other text generator — is an external collaborator; this harness only
/// consumes its output.
#[derive(Debug, Clone, Default)]
pub struct PlannerReply {
    pub raw_text: String,
    pub parse_errors: Vec<String>,
}

pub trait PlanGenerator {
    fn generate(&self, prompt: &str, seed: Option<u64>) -> PlannerReply;
}

/// A case with no `actions` and no configured planner produces an empty plan
/// via a parse failure, same as a planner that times out or errors.
pub struct NullPlanner;

impl PlanGenerator for NullPlanner {
    fn generate(&self, _prompt: &str, _seed: Option<u64>) -> PlannerReply {
        PlannerReply::default()
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CaseResult {
    pub case_id: String,
    pub total_actions_planned: usize,
    pub executed_action_count: usize,
    pub blocked_action_count: usize,
    pub modified_action_count: usize,
    pub adapter_success_count: usize,
    pub integrity_ok: bool,
    pub parse_ok: bool,
    pub forbidden_tool_count: u32,
    pub overflow_count: u32,
    pub dropped_action_count: usize,
    pub prompt_chars: usize,
    pub response_chars: usize,
    pub pattern_hash: Option<String>,
}

fn canonical_snapshot_hash(actions: &[Action]) -> (Value, String) {
    let snapshot: Vec<Value> = actions
        .iter()
        .map(|a| json!({"tool_name": a.tool_name, "arguments": a.arguments}))
        .collect();
    let canonical = serde_json::to_string(&snapshot).expect("plan snapshot always serializes");
    let hash = hex_encode(Sha256::digest(canonical.as_bytes()));
    (Value::Array(snapshot), hash)
}

/// Tool-sequence-only hash of a plan, used solely for the cosmetic
/// `pattern_redundancy_count` metric — it never affects execution.
pub fn plan_pattern_hash(actions: &[Action]) -> String {
    let seq: Vec<&str> = actions.iter().map(|a| a.tool_name.as_str()).collect();
    let canonical = serde_json::to_string(&seq).expect("Vec<&str> always serializes");
    hex_encode(Sha256::digest(canonical.as_bytes()))
}

/// Run one case through the full pipeline. Returns the case summary; all
/// detail is in the appended log events.
pub fn run_case(
    case: &CaseInput,
    run_id: &str,
    sandbox_root: &Path,
    log_path: &Path,
    config: &HarnessConfig,
    planner: &dyn PlanGenerator,
) -> HarnessResult<CaseResult> {
    let mut result = CaseResult {
        case_id: case.case_id.clone(),
        ..Default::default()
    };

    append_event(
        log_path,
        run_id,
        "task_intake",
        EventFields {
            payload: Some(Map::from_iter([(
                "case_id".to_string(),
                Value::String(case.case_id.clone()),
            )])),
            ..Default::default()
        },
    )?;

    let (mut plan, parse_outcome) = resolve_plan(case, run_id, log_path, config, planner, &mut result)?;
    result.parse_ok = parse_outcome.errors.is_empty();
    result.forbidden_tool_count = parse_outcome.forbidden_tool_count;
    result.overflow_count = parse_outcome.overflow_count;
    plan.renumber();

    append_event(
        log_path,
        run_id,
        "plan_generation",
        EventFields {
            payload: Some(Map::from_iter([(
                "action_count".to_string(),
                Value::Number(plan.actions.len().into()),
            )])),
            ..Default::default()
        },
    )?;

    let (snapshot, snapshot_hash) = canonical_snapshot_hash(&plan.actions);
    append_event(
        log_path,
        run_id,
        "plan_committed",
        EventFields {
            payload: Some(Map::from_iter([
                ("plan_id".to_string(), Value::String(plan.plan_id.clone())),
                ("plan_actions_snapshot".to_string(), snapshot),
                ("plan_actions_snapshot_sha256".to_string(), Value::String(snapshot_hash)),
            ])),
            ..Default::default()
        },
    )?;

    let (compacted_plan, compaction_info) = compact_plan(&plan);
    log_compaction(log_path, run_id, &compaction_info)?;
    result.dropped_action_count = compaction_info.dropped_action_count;
    result.pattern_hash = Some(plan_pattern_hash(&compacted_plan.actions));

    result.total_actions_planned = compacted_plan.actions.len();

    let adapter = ExecutionAdapter::new(sandbox_root)?;
    let mut scheduled: Vec<(Action, bool)> = Vec::new(); // (action, was_modified)

    for action in &compacted_plan.actions {
        let verdict = policy::evaluate(action, config.write_content_max_bytes);
        log_risk_evaluation(log_path, run_id, &verdict)?;

        match verdict.decision_type {
            DecisionType::Allow => scheduled.push((action.clone(), false)),
            DecisionType::AllowModified | DecisionType::Block => {
                let stabilized = stabilizer::stabilize_action(action, &verdict, config.write_content_max_bytes);
                log_stabilization(log_path, run_id, action, &stabilized)?;
                match stabilized.decision_type {
                    DecisionType::AllowModified => {
                        if let Some(modified) = stabilized.modified_action {
                            result.modified_action_count += 1;
                            scheduled.push((modified, true));
                        }
                    }
                    DecisionType::Block => {
                        result.blocked_action_count += 1;
                    }
                    DecisionType::Allow => unreachable!("stabilizer never returns allow"),
                }
            }
        }
    }

    for (action, was_modified) in &scheduled {
        let outcome = adapter.execute(action);
        if outcome.adapter_status == crate::sandbox::adapter::AdapterStatus::Success {
            result.adapter_success_count += 1;
        }
        result.executed_action_count += 1;
        append_event(
            log_path,
            run_id,
            "adapter_invocation",
            EventFields {
                action_id: Some(action.action_id.clone()),
                adapter_status: Some(
                    match outcome.adapter_status {
                        crate::sandbox::adapter::AdapterStatus::Success => "success",
                        crate::sandbox::adapter::AdapterStatus::Error => "error",
                    }
                    .to_string(),
                ),
                payload: Some(Map::from_iter([
                    (
                        "output_hash".to_string(),
                        outcome.output_hash.clone().map(Value::String).unwrap_or(Value::Null),
                    ),
                    ("was_modified".to_string(), Value::Bool(*was_modified)),
                    (
                        "error".to_string(),
                        outcome.error.clone().map(Value::String).unwrap_or(Value::Null),
                    ),
                ])),
                ..Default::default()
            },
        )?;
    }

    result.integrity_ok = result.adapter_success_count == result.executed_action_count;

    append_event(
        log_path,
        run_id,
        "state_validation",
        EventFields {
            payload: Some(Map::from_iter([
                ("integrity_ok".to_string(), Value::Bool(result.integrity_ok)),
                (
                    "executed_action_count".to_string(),
                    Value::Number(result.executed_action_count.into()),
                ),
                (
                    "blocked_action_count".to_string(),
                    Value::Number(result.blocked_action_count.into()),
                ),
                (
                    "modified_action_count".to_string(),
                    Value::Number(result.modified_action_count.into()),
                ),
            ])),
            ..Default::default()
        },
    )?;

    append_event(
        log_path,
        run_id,
        "receipt_logging",
        EventFields {
            payload: Some(Map::from_iter([
                (
                    "executed_action_count".to_string(),
                    Value::Number(result.executed_action_count.into()),
                ),
                (
                    "modified_action_count".to_string(),
                    Value::Number(result.modified_action_count.into()),
                ),
            ])),
            ..Default::default()
        },
    )?;

    Ok(result)
}

fn resolve_plan(
    case: &CaseInput,
    run_id: &str,
    log_path: &Path,
    config: &HarnessConfig,
    planner: &dyn PlanGenerator,
    result: &mut CaseResult,
) -> HarnessResult<(Plan, ParseOutcome)> {
    if let Some(raw_actions) = &case.actions {
        let actions: Vec<Action> = raw_actions
            .iter()
            .map(|r| {
                let mut a = Action::new(String::new(), r.tool_name.clone(), 0);
                a.arguments = r.arguments.clone().into_iter().collect();
                a
            })
            .collect();
        let plan = Plan::new(case.case_id.clone(), actions);
        return Ok((plan, ParseOutcome::default()));
    }

    let prompt = case.task_intake.clone().unwrap_or_default();
    result.prompt_chars = prompt.chars().count();
    append_event(
        log_path,
        run_id,
        "llm_plan_request",
        EventFields {
            payload: Some(Map::from_iter([(
                "case_id".to_string(),
                Value::String(case.case_id.clone()),
            )])),
            ..Default::default()
        },
    )?;

    let reply = planner.generate(&prompt, None);
    result.response_chars = reply.raw_text.chars().count();
    append_event(
        log_path,
        run_id,
        "llm_plan_response",
        EventFields {
            payload: Some(Map::from_iter([(
                "response_chars".to_string(),
                Value::Number(result.response_chars.into()),
            )])),
            ..Default::default()
        },
    )?;

    let outcome = parse_plan_from_json(&reply.raw_text, config.max_actions, config.governance_efficiency_mode);
    if outcome.plan.is_none() || !outcome.errors.is_empty() {
        append_event(
            log_path,
            run_id,
            "plan_parse_failure",
            EventFields {
                payload: Some(Map::from_iter([(
                    "errors".to_string(),
                    Value::Array(outcome.errors.iter().cloned().map(Value::String).collect()),
                )])),
                ..Default::default()
            },
        )?;
    }

    let plan = outcome.plan.clone().unwrap_or_else(|| Plan::new(case.case_id.clone(), Vec::new()));
    Ok((plan, outcome))
}

fn log_compaction(log_path: &Path, run_id: &str, info: &CompactionInfo) -> HarnessResult<()> {
    append_event(
        log_path,
        run_id,
        "plan_compaction",
        EventFields {
            payload: Some(
                serde_json::to_value(info)
                    .expect("CompactionInfo always serializes")
                    .as_object()
                    .expect("CompactionInfo serializes to an object")
                    .clone(),
            ),
            ..Default::default()
        },
    )?;
    Ok(())
}

fn log_risk_evaluation(log_path: &Path, run_id: &str, verdict: &PolicyVerdict) -> HarnessResult<()> {
    append_event(
        log_path,
        run_id,
        "risk_evaluation",
        EventFields {
            action_id: Some(verdict.action_id.clone()),
            decision_type: Some(decision_type_str(verdict.decision_type).to_string()),
            risk_label: Some(format!("{:?}", verdict.risk_label).to_lowercase()),
            risk_score: Some(verdict.risk_score.clone()),
            policy_reason: Some(verdict.policy_reason.clone()),
            ..Default::default()
        },
    )?;
    Ok(())
}

fn log_stabilization(
    log_path: &Path,
    run_id: &str,
    original: &Action,
    result: &stabilizer::StabilizationResult,
) -> HarnessResult<()> {
    append_event(
        log_path,
        run_id,
        "stabilization",
        EventFields {
            action_id: Some(original.action_id.clone()),
            decision_type: Some(decision_type_str(result.decision_type).to_string()),
            payload: Some(Map::from_iter([
                (
                    "mechanism".to_string(),
                    Value::String(mechanism_str(result.mechanism).to_string()),
                ),
                ("reason".to_string(), Value::String(result.reason.clone())),
                (
                    "original_action".to_string(),
                    serde_json::to_value(original).expect("Action always serializes"),
                ),
                (
                    "modified_action".to_string(),
                    result
                        .modified_action
                        .as_ref()
                        .map(|a| serde_json::to_value(a).expect("Action always serializes"))
                        .unwrap_or(Value::Null),
                ),
            ])),
            ..Default::default()
        },
    )?;
    Ok(())
}

fn decision_type_str(d: DecisionType) -> &'static str {
    match d {
        DecisionType::Allow => "allow",
        DecisionType::AllowModified => "allow_modified",
        DecisionType::Block => "block",
    }
}

fn mechanism_str(m: Mechanism) -> &'static str {
    match m {
        Mechanism::ScopeReduction => "scope_reduction",
        Mechanism::ArgumentSanitization => "argument_sanitization",
        Mechanism::FullBlock => "full_block",
        Mechanism::MechanismError => "mechanism_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> HarnessConfig {
        HarnessConfig::default()
    }

    #[test]
    fn benign_three_step_case() {
        let dir = tempdir().unwrap();
        let sandbox_root = dir.path().join("sandbox");
        let log_path = dir.path().join("run.jsonl");
        let case = CaseInput {
            case_id: "case-1".to_string(),
            task_intake: None,
            actions: Some(vec![
                RawAction {
                    tool_name: "write_file".to_string(),
                    arguments: Map::from_iter([
                        ("path".to_string(), Value::String("a.txt".to_string())),
                        ("content".to_string(), Value::String("hello".to_string())),
                    ]),
                },
                RawAction {
                    tool_name: "read_file".to_string(),
                    arguments: Map::from_iter([("path".to_string(), Value::String("a.txt".to_string()))]),
                },
                RawAction {
                    tool_name: "list_dir".to_string(),
                    arguments: Map::from_iter([("path".to_string(), Value::String("/".to_string()))]),
                },
            ]),
        };
        let result = run_case(&case, "run-1", &sandbox_root, &log_path, &config(), &NullPlanner).unwrap();
        assert_eq!(result.modified_action_count, 0);
        assert_eq!(result.blocked_action_count, 0);
        assert!(result.integrity_ok);
        assert_eq!(
            std::fs::read_to_string(sandbox_root.join("a.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn path_traversal_is_blocked_and_not_executed() {
        let dir = tempdir().unwrap();
        let sandbox_root = dir.path().join("sandbox");
        let log_path = dir.path().join("run.jsonl");
        let case = CaseInput {
            case_id: "case-2".to_string(),
            task_intake: None,
            actions: Some(vec![RawAction {
                tool_name: "write_file".to_string(),
                arguments: Map::from_iter([
                    ("path".to_string(), Value::String("../evil.txt".to_string())),
                    ("content".to_string(), Value::String("bad".to_string())),
                ]),
            }]),
        };
        let result = run_case(&case, "run-2", &sandbox_root, &log_path, &config(), &NullPlanner).unwrap();
        assert_eq!(result.blocked_action_count, 1);
        assert_eq!(result.executed_action_count, 0);
        assert!(!sandbox_root.join("../evil.txt").exists());
    }

    #[test]
    fn wildcard_delete_is_stabilized_and_executed() {
        let dir = tempdir().unwrap();
        let sandbox_root = dir.path().join("sandbox");
        let log_path = dir.path().join("run.jsonl");
        let case = CaseInput {
            case_id: "case-3".to_string(),
            task_intake: None,
            actions: Some(vec![RawAction {
                tool_name: "delete_file".to_string(),
                arguments: Map::from_iter([("path".to_string(), Value::String("*".to_string()))]),
            }]),
        };
        let result = run_case(&case, "run-3", &sandbox_root, &log_path, &config(), &NullPlanner).unwrap();
        assert_eq!(result.modified_action_count, 1);
        assert_eq!(result.executed_action_count, 1);
        assert!(sandbox_root.join("trash/1.noop").exists());
    }
}
