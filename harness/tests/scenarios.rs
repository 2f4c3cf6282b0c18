//! End-to-end exercises of the six concrete pipeline scenarios.

use harness::case_runner::{run_case, CaseInput, NullPlanner, RawAction};
use harness::config::HarnessConfig;
use harness::sandbox::compute_sandbox_state_hash;
use serde_json::{Map, Value};
use tempfile::tempdir;

fn action(tool_name: &str, pairs: &[(&str, &str)]) -> RawAction {
    let mut arguments = Map::new();
    for (k, v) in pairs {
        arguments.insert(k.to_string(), Value::String(v.to_string()));
    }
    RawAction { tool_name: tool_name.to_string(), arguments }
}

fn run(
    case_id: &str,
    actions: Vec<RawAction>,
) -> (harness::case_runner::CaseResult, std::path::PathBuf, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let sandbox_root = dir.path().join("sandbox");
    let log_path = dir.path().join("run.jsonl");
    let case = CaseInput {
        case_id: case_id.to_string(),
        task_intake: None,
        actions: Some(actions),
    };
    let result = run_case(&case, "run", &sandbox_root, &log_path, &HarnessConfig::default(), &NullPlanner).unwrap();
    (result, sandbox_root, dir)
}

#[test]
fn scenario_1_benign_three_step() {
    let (result, sandbox_root, _dir) = run(
        "s1",
        vec![
            action("write_file", &[("path", "a.txt"), ("content", "hello")]),
            action("read_file", &[("path", "a.txt")]),
            action("list_dir", &[("path", "/")]),
        ],
    );
    assert_eq!(result.executed_action_count, 3);
    assert_eq!(result.modified_action_count, 0);
    assert_eq!(result.blocked_action_count, 0);
    assert_eq!(std::fs::read_to_string(sandbox_root.join("a.txt")).unwrap(), "hello");
}

#[test]
fn scenario_2_path_traversal_is_blocked() {
    let (result, sandbox_root, _dir) = run(
        "s2",
        vec![action("write_file", &[("path", "../evil.txt"), ("content", "bad")])],
    );
    assert_eq!(result.blocked_action_count, 1);
    assert_eq!(result.executed_action_count, 0);
    let hash = compute_sandbox_state_hash(&sandbox_root);
    assert_eq!(hash, compute_sandbox_state_hash(&sandbox_root));
}

#[test]
fn scenario_3_wildcard_delete_stabilized() {
    let (result, sandbox_root, _dir) = run("s3", vec![action("delete_file", &[("path", "*")])]);
    assert_eq!(result.modified_action_count, 1);
    assert_eq!(result.executed_action_count, 1);
    assert!(sandbox_root.join("trash/1.noop").exists());
}

#[test]
fn scenario_4_oversized_write_truncated() {
    let big = "x".repeat(2 * 1024 * 1024);
    let mut args = Map::new();
    args.insert("path".to_string(), Value::String("big.txt".to_string()));
    args.insert("content".to_string(), Value::String(big));
    let (result, sandbox_root, _dir) = run(
        "s4",
        vec![RawAction { tool_name: "write_file".to_string(), arguments: args }],
    );
    assert_eq!(result.modified_action_count, 1);
    let written = std::fs::read_to_string(sandbox_root.join("big.txt")).unwrap();
    assert!(written.ends_with("[TRUNCATED]"));
    assert_eq!(written.len(), 1024 * 1024 + "[TRUNCATED]".len());
}

#[test]
fn scenario_5_compaction_safe_drop() {
    let (result, sandbox_root, _dir) = run(
        "s5",
        vec![
            action("write_file", &[("path", "a"), ("content", "v1")]),
            action("write_file", &[("path", "a"), ("content", "v2")]),
            action("read_file", &[("path", "a")]),
            action("list_dir", &[("path", "/")]),
        ],
    );
    assert_eq!(result.dropped_action_count, 3);
    assert_eq!(result.executed_action_count, 1);
    assert_eq!(std::fs::read_to_string(sandbox_root.join("a")).unwrap(), "v2");
}

#[test]
fn scenario_6_unsafe_actions_never_reach_the_adapter() {
    let (result, sandbox_root, _dir) = run(
        "s6",
        vec![
            action("write_file", &[("path", "a.txt; rm -rf /"), ("content", "x")]),
            action("exec_shell", &[]),
        ],
    );
    assert_eq!(result.executed_action_count, 0);
    assert_eq!(result.blocked_action_count, 2);
    assert!(!sandbox_root.exists() || std::fs::read_dir(&sandbox_root).unwrap().next().is_none());
}
