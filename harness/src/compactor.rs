//! Plan compaction engine (C5).
//!
//! Ported from `plan_compaction.py`. Drops actions whose removal a dry-run
//! simulation proves does not change the final sandbox state. Never
//! broadens scope, never introduces actions, never reorders survivors.

use crate::action::{Action, Plan};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

const AVG_ACTION_TOKEN_ESTIMATE: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionRule {
    TrailingNonMutatingDrop,
    LastWriteWins,
    RedundantReadAfterWrite,
    DuplicateSequentialReads,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionInfo {
    pub compaction_applied: bool,
    pub original_action_count: usize,
    pub compacted_action_count: usize,
    pub rules_applied: Vec<CompactionRule>,
    pub dropped_action_ids: Vec<String>,
    pub compaction_aborted: bool,
    pub compaction_aborted_reason: Option<String>,
    pub sandbox_state_hash_simulated_before: Option<String>,
    pub sandbox_state_hash_simulated_after: Option<String>,
    pub dropped_action_count: usize,
}

impl CompactionInfo {
    fn unchanged(action_count: usize) -> Self {
        Self {
            compaction_applied: false,
            original_action_count: action_count,
            compacted_action_count: action_count,
            rules_applied: Vec::new(),
            dropped_action_ids: Vec::new(),
            compaction_aborted: false,
            compaction_aborted_reason: None,
            sandbox_state_hash_simulated_before: None,
            sandbox_state_hash_simulated_after: None,
            dropped_action_count: 0,
        }
    }
}

fn get_path(action: &Action) -> Option<String> {
    action.path().map(|p| p.trim().to_string())
}

/// Dry-run: apply actions to an in-memory `path -> content` map. No I/O.
/// Mirrors `plan_compaction.py::_simulate_actions`.
fn simulate_actions(actions: &[Action]) -> HashMap<String, String> {
    let mut state = HashMap::new();
    for a in actions {
        let Some(path) = get_path(a) else { continue };
        match a.tool_name.as_str() {
            "write_file" => {
                state.insert(path, a.content().unwrap_or("").to_string());
            }
            "delete_file" => {
                state.remove(&path);
            }
            _ => {}
        }
    }
    state
}

/// Deterministic hash of simulated sandbox state: canonical JSON over the
/// sorted `(path, content)` pairs, SHA-256 hex. `serde_json`'s default map
/// (a `BTreeMap`-backed `Map`, since this crate never enables the
/// `preserve_order` feature) already sorts keys, so plain `to_string`
/// already yields the canonical form the source computes by hand.
fn state_hash(state: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&String, &String)> = state.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let canonical = serde_json::to_string(&pairs).expect("pairs of strings always serialize");
    let digest = Sha256::digest(canonical.as_bytes());
    crate::util::hex_encode(digest)
}

/// Apply Rules A-D in the order the source applies them (C, B, D, A).
/// Returns (compacted actions, rules applied, dropped action ids).
fn apply_compaction_rules(actions: &[Action]) -> (Vec<Action>, Vec<CompactionRule>, Vec<String>) {
    if actions.is_empty() {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    let n = actions.len();
    let mut rules_applied = Vec::new();
    let mut drop: BTreeSet<usize> = BTreeSet::new();

    // Rule C: last-write-wins per path.
    let mut last_write_index: HashMap<String, usize> = HashMap::new();
    let mut rule_c_dropped = false;
    for (i, a) in actions.iter().enumerate() {
        if a.tool_name == "write_file" {
            if let Some(path) = get_path(a) {
                if let Some(&prev) = last_write_index.get(&path) {
                    drop.insert(prev);
                    rule_c_dropped = true;
                }
                last_write_index.insert(path, i);
            }
        }
    }
    if rule_c_dropped {
        rules_applied.push(CompactionRule::LastWriteWins);
    }

    // Rule B: redundant read-after-write/delete with no intervening mutation.
    let mut last_mut_to_path: HashMap<String, usize> = HashMap::new();
    for (i, a) in actions.iter().enumerate() {
        let Some(path) = get_path(a) else { continue };
        if a.tool_name.is_empty() {
            continue;
        }
        if a.tool() == Some(crate::action::ToolName::WriteFile)
            || a.tool() == Some(crate::action::ToolName::DeleteFile)
        {
            last_mut_to_path.insert(path, i);
        } else if a.tool_name == "read_file" {
            if let Some(&j) = last_mut_to_path.get(&path) {
                let between_has_mut = actions[j + 1..i].iter().any(|ac| {
                    ac.tool_name.is_mutating_name() && get_path(ac).as_deref() == Some(path.as_str())
                });
                if !between_has_mut {
                    drop.insert(i);
                    if !rules_applied.contains(&CompactionRule::RedundantReadAfterWrite) {
                        rules_applied.push(CompactionRule::RedundantReadAfterWrite);
                    }
                }
            }
        }
    }

    // Rule D: duplicate sequential reads of the same path.
    let mut prev_read_path: Option<String> = None;
    for (i, a) in actions.iter().enumerate() {
        if a.tool_name == "read_file" {
            if let Some(path) = get_path(a) {
                if Some(&path) == prev_read_path.as_ref() {
                    drop.insert(i);
                    if !rules_applied.contains(&CompactionRule::DuplicateSequentialReads) {
                        rules_applied.push(CompactionRule::DuplicateSequentialReads);
                    }
                }
                prev_read_path = Some(path);
            } else {
                prev_read_path = None;
            }
        } else {
            prev_read_path = None;
        }
    }

    // Rule A: trailing non-mutating drop.
    let mut i = n as isize - 1;
    while i >= 0 && is_non_mutating_name(&actions[i as usize].tool_name) {
        drop.insert(i as usize);
        i -= 1;
    }
    if i < n as isize - 1 {
        rules_applied.push(CompactionRule::TrailingNonMutatingDrop);
    }

    let kept: Vec<Action> = actions
        .iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, a)| a.clone())
        .collect();
    let dropped_ids: Vec<String> = drop.iter().map(|&i| actions[i].action_id.clone()).collect();

    (kept, rules_applied, dropped_ids)
}

fn is_non_mutating_name(tool_name: &str) -> bool {
    matches!(tool_name, "read_file" | "list_dir")
}

trait MutatingName {
    fn is_mutating_name(&self) -> bool;
}
impl MutatingName for str {
    fn is_mutating_name(&self) -> bool {
        matches!(self, "write_file" | "delete_file")
    }
}

/// Compact `plan`, returning the (possibly unchanged) plan and compaction
/// info. If applying the rules would change the simulated final state, the
/// compaction aborts and the original plan is returned untouched.
pub fn compact_plan(plan: &Plan) -> (Plan, CompactionInfo) {
    let actions = &plan.actions;
    let mut info = CompactionInfo::unchanged(actions.len());

    if actions.is_empty() {
        return (plan.clone(), info);
    }

    let (compacted, rules_applied, dropped_ids) = apply_compaction_rules(actions);
    let dropped_count = dropped_ids.len();

    if dropped_count == 0 {
        return (plan.clone(), info);
    }

    let state_before = simulate_actions(actions);
    let state_after = simulate_actions(&compacted);
    let hash_before = state_hash(&state_before);
    let hash_after = state_hash(&state_after);
    info.sandbox_state_hash_simulated_before = Some(hash_before.clone());
    info.sandbox_state_hash_simulated_after = Some(hash_after.clone());

    if hash_before != hash_after {
        info.compaction_aborted = true;
        info.compaction_aborted_reason = Some("simulated_state_mismatch".to_string());
        return (plan.clone(), info);
    }

    info.compaction_applied = true;
    info.compacted_action_count = compacted.len();
    info.rules_applied = rules_applied;
    info.dropped_action_ids = dropped_ids;
    info.dropped_action_count = dropped_count;

    let mut compacted_plan = Plan::new(plan.plan_id.clone(), compacted);
    compacted_plan.renumber();
    (compacted_plan, info)
}

/// `dropped_action_count * AVG_ACTION_TOKEN_ESTIMATE`, per
/// `autonomous_metrics.py::compute_metrics_llm`'s Phase 4B addition.
pub fn token_savings_estimate(dropped_action_count: usize) -> u64 {
    dropped_action_count as u64 * AVG_ACTION_TOKEN_ESTIMATE
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(id: &str, order: u32, path: &str, content: &str) -> Action {
        Action::new(id, "write_file", order)
            .with_argument("path", path)
            .with_argument("content", content)
    }
    fn read(id: &str, order: u32, path: &str) -> Action {
        Action::new(id, "read_file", order).with_argument("path", path)
    }
    fn list(id: &str, order: u32, path: &str) -> Action {
        Action::new(id, "list_dir", order).with_argument("path", path)
    }

    #[test]
    fn safe_drop_scenario() {
        // write a v1, write a v2, read a, list /
        let plan = Plan::new(
            "p1",
            vec![
                write("1", 1, "a", "v1"),
                write("2", 2, "a", "v2"),
                read("3", 3, "a"),
                list("4", 4, "/"),
            ],
        );
        let (compacted, info) = compact_plan(&plan);
        assert!(info.compaction_applied);
        assert!(!info.compaction_aborted);
        assert_eq!(info.dropped_action_count, 3);
        assert_eq!(
            info.sandbox_state_hash_simulated_before,
            info.sandbox_state_hash_simulated_after
        );
        assert_eq!(compacted.actions.len(), 1);
        assert_eq!(compacted.actions[0].tool_name, "write_file");
        assert_eq!(compacted.actions[0].content().unwrap(), "v2");
    }

    #[test]
    fn no_redundancy_means_no_compaction() {
        let plan = Plan::new("p1", vec![write("1", 1, "a", "v1")]);
        let (compacted, info) = compact_plan(&plan);
        assert!(!info.compaction_applied);
        assert_eq!(compacted, plan);
    }

    #[test]
    fn duplicate_sequential_reads_are_dropped() {
        let plan = Plan::new("p1", vec![read("1", 1, "a"), read("2", 2, "a")]);
        let (compacted, info) = compact_plan(&plan);
        assert!(info.compaction_applied);
        assert_eq!(info.rules_applied, vec![CompactionRule::DuplicateSequentialReads]);
        assert_eq!(compacted.actions.len(), 1);
    }

    #[test]
    fn idempotent_under_second_pass() {
        let plan = Plan::new(
            "p1",
            vec![write("1", 1, "a", "v1"), write("2", 2, "a", "v2"), read("3", 3, "a")],
        );
        let (once, _) = compact_plan(&plan);
        let (twice, info2) = compact_plan(&once);
        assert_eq!(once, twice);
        assert!(!info2.compaction_applied);
    }
}
