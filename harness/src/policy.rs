//! Deterministic policy evaluator (C3).
//!
//! Ported rule-for-rule from `policy_eval.py::evaluate`. A pure function of
//! `(action, sandbox_root, write_content_max_bytes)` — no filesystem access,
//! no hidden state. Verdicts are modeled as a sealed sum over
//! `{Allow, AllowModified, Block}`, the same shape the host crate's
//! `governance_kernel::RuleAction` uses for its own allow/deny/escalate
//! decisions, instead of the source's dict-with-a-string-tag.

use crate::action::Action;
use serde::{Deserialize, Serialize};

pub const ALLOWED_TOOLS: [&str; 4] = ["write_file", "read_file", "list_dir", "delete_file"];
const SHELL_MARKERS: [&str; 5] = [";", "&&", "|", "`", "$("];
const BROAD_PATH_PATTERNS: [&str; 7] = ["*", "?", "**", "./", ".\\", "/*", "\\*"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLabel {
    Benign,
    Risky,
    Unsafe,
}

impl RiskLabel {
    fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Benign => "benign",
            RiskLabel::Risky => "risky",
            RiskLabel::Unsafe => "unsafe",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Allow,
    AllowModified,
    Block,
}

/// The outcome of evaluating one action. `risk_score` mirrors `risk_label`
/// as a string (Phase 2A parity with the source; no numeric scoring yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub action_id: String,
    pub risk_label: RiskLabel,
    pub risk_score: String,
    pub policy_reason: String,
    pub decision_type: DecisionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stabilization_mechanism: Option<String>,
}

impl PolicyVerdict {
    fn verdict(
        action_id: &str,
        risk_label: RiskLabel,
        policy_reason: impl Into<String>,
        decision_type: DecisionType,
    ) -> Self {
        Self {
            action_id: action_id.to_string(),
            risk_label,
            risk_score: risk_label.as_str().to_string(),
            policy_reason: policy_reason.into(),
            decision_type,
            stabilization_mechanism: None,
        }
    }

    fn unsafe_block(action_id: &str, reason: impl Into<String>) -> Self {
        Self::verdict(action_id, RiskLabel::Unsafe, reason, DecisionType::Block)
    }

    fn risky_modified(action_id: &str, reason: impl Into<String>) -> Self {
        let mut v = Self::verdict(action_id, RiskLabel::Risky, reason, DecisionType::AllowModified);
        v.stabilization_mechanism = Some("not_implemented_phase2a".to_string());
        v
    }

    fn benign_allow(action_id: &str) -> Self {
        Self::verdict(action_id, RiskLabel::Benign, "within_policy", DecisionType::Allow)
    }
}

/// Lexically resolve `path_str` against `sandbox_root`, rejecting any `..`
/// segment or a resolution that escapes the root. Mirrors
/// `policy_eval.py::_path_resolves_inside_sandbox` — this is a pure,
/// non-existence-checking resolution (it never touches the filesystem),
/// distinct from the sandbox adapter's own resolution in [`crate::sandbox`].
fn path_resolves_inside_sandbox(path_str: &str) -> bool {
    let trimmed = path_str.trim();
    if trimmed.is_empty() || trimmed == "/" || trimmed == "." {
        return true;
    }
    let normalized = trimmed.trim_start_matches('/').replace('\\', "/");
    for part in normalized.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return false;
        }
    }
    true
}

fn contains_shell_markers(s: &str) -> bool {
    SHELL_MARKERS.iter().any(|m| s.contains(m))
}

fn path_is_overly_broad(path_str: &str) -> bool {
    let trimmed = path_str.trim();
    if matches!(trimmed, "" | "." | "/" | "..") {
        return true;
    }
    if BROAD_PATH_PATTERNS.iter().any(|p| trimmed.contains(p)) {
        return true;
    }
    trimmed.ends_with('/') || trimmed.ends_with('\\')
}

/// Evaluate one action. Total and side-effect-free; any unexpected internal
/// condition degrades to `unsafe:block` rather than panicking, per the
/// source's catch-all `except Exception`.
pub fn evaluate(action: &Action, write_content_max_bytes: u64) -> PolicyVerdict {
    let id = action.action_id.as_str();

    if !ALLOWED_TOOLS.contains(&action.tool_name.as_str()) {
        return PolicyVerdict::unsafe_block(id, format!("tool_not_allowed:{}", action.tool_name));
    }

    let path_args = action.path_args();

    for p in &path_args {
        if !path_resolves_inside_sandbox(p) {
            return PolicyVerdict::unsafe_block(id, "path_traversal_or_outside_sandbox");
        }
    }

    for p in &path_args {
        if contains_shell_markers(p) {
            return PolicyVerdict::unsafe_block(id, "shell_execution_markers_in_path");
        }
    }

    if action.tool_name == "delete_file" {
        let path = action.path().unwrap_or("");
        if path_is_overly_broad(path) {
            return PolicyVerdict::risky_modified(id, "delete_file_overly_broad_path");
        }
    }

    if action.tool_name == "write_file" {
        let size = action.content().unwrap_or("").as_bytes().len() as u64;
        if size > write_content_max_bytes {
            return PolicyVerdict::risky_modified(
                id,
                format!(
                    "write_file_content_exceeds_threshold:{}>{}",
                    size, write_content_max_bytes
                ),
            );
        }
    }

    PolicyVerdict::benign_allow(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_WRITE_CONTENT_MAX_BYTES;

    fn eval(action: Action) -> PolicyVerdict {
        evaluate(&action, DEFAULT_WRITE_CONTENT_MAX_BYTES)
    }

    #[test]
    fn benign_write() {
        let a = Action::new("1", "write_file", 1)
            .with_argument("path", "a.txt")
            .with_argument("content", "hello");
        let v = eval(a);
        assert_eq!(v.decision_type, DecisionType::Allow);
        assert_eq!(v.risk_label, RiskLabel::Benign);
    }

    #[test]
    fn unknown_tool_is_unsafe_block() {
        let a = Action::new("1", "exec_shell", 1);
        let v = eval(a);
        assert_eq!(v.decision_type, DecisionType::Block);
        assert_eq!(v.policy_reason, "tool_not_allowed:exec_shell");
    }

    #[test]
    fn path_traversal_is_unsafe() {
        let a = Action::new("1", "write_file", 1)
            .with_argument("path", "../evil.txt")
            .with_argument("content", "bad");
        let v = eval(a);
        assert_eq!(v.decision_type, DecisionType::Block);
        assert_eq!(v.policy_reason, "path_traversal_or_outside_sandbox");
    }

    #[test]
    fn shell_markers_in_path_are_unsafe() {
        let a = Action::new("1", "read_file", 1).with_argument("path", "a.txt; rm -rf /");
        let v = eval(a);
        assert_eq!(v.policy_reason, "shell_execution_markers_in_path");
    }

    #[test]
    fn wildcard_delete_is_risky() {
        for path in ["*", "/", "", "./", ".."] {
            let a = Action::new("1", "delete_file", 1).with_argument("path", path);
            let v = eval(a);
            assert_eq!(v.decision_type, DecisionType::AllowModified, "path={path}");
        }
        let a = Action::new("1", "delete_file", 1).with_argument("path", "a.txt");
        assert_eq!(eval(a).decision_type, DecisionType::Allow);
    }

    #[test]
    fn oversized_write_boundary() {
        let at_max = "x".repeat(DEFAULT_WRITE_CONTENT_MAX_BYTES as usize);
        let a = Action::new("1", "write_file", 1)
            .with_argument("path", "big.txt")
            .with_argument("content", at_max);
        assert_eq!(eval(a).decision_type, DecisionType::Allow);

        let over_max = "x".repeat(DEFAULT_WRITE_CONTENT_MAX_BYTES as usize + 1);
        let a = Action::new("1", "write_file", 1)
            .with_argument("path", "big.txt")
            .with_argument("content", over_max);
        assert_eq!(eval(a).decision_type, DecisionType::AllowModified);
    }

    #[test]
    fn evaluation_is_pure() {
        let a = Action::new("1", "write_file", 1)
            .with_argument("path", "a.txt")
            .with_argument("content", "hi");
        assert_eq!(eval(a.clone()), eval(a));
    }
}
