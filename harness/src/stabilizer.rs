//! Stabilization engine (C4).
//!
//! Ported from `stabilize.py::stabilize_action`. Invoked only for verdicts
//! with `decision_type ∈ {allow_modified, block}`; deterministic and
//! filesystem-free. Named rules are checked before the path-normalization
//! fallback so the fallback only ever catches what no named rule claimed —
//! see the Open Questions resolution in `DESIGN.md`.

use crate::action::Action;
use crate::policy::{DecisionType, PolicyVerdict};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    ScopeReduction,
    ArgumentSanitization,
    FullBlock,
    MechanismError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizationResult {
    pub decision_type: DecisionType,
    pub modified_action: Option<Action>,
    pub mechanism: Mechanism,
    pub reason: String,
}

impl StabilizationResult {
    fn block(mechanism: Mechanism, reason: impl Into<String>) -> Self {
        Self {
            decision_type: DecisionType::Block,
            modified_action: None,
            mechanism,
            reason: reason.into(),
        }
    }

    fn allow_modified(action: Action, mechanism: Mechanism, reason: impl Into<String>) -> Self {
        Self {
            decision_type: DecisionType::AllowModified,
            modified_action: Some(action),
            mechanism,
            reason: reason.into(),
        }
    }
}

/// Normalize to sandbox-relative form: forward slashes, no leading slash, no
/// duplicate slashes. Mirrors `stabilize.py::_normalize_path_to_sandbox_rel`.
fn normalize_path_to_sandbox_rel(path_str: &str) -> String {
    if path_str.trim().is_empty() {
        return String::new();
    }
    let mut p = path_str.trim().replace('\\', "/");
    while p.starts_with('/') {
        p.remove(0);
    }
    while p.contains("//") {
        p = p.replace("//", "/");
    }
    if p.is_empty() {
        ".".to_string()
    } else {
        p
    }
}

/// Stabilize an action that received a non-`allow` verdict.
pub fn stabilize_action(
    action: &Action,
    verdict: &PolicyVerdict,
    write_content_max_bytes: u64,
) -> StabilizationResult {
    if verdict.decision_type == DecisionType::Block {
        return StabilizationResult::block(Mechanism::FullBlock, verdict.policy_reason.clone());
    }

    let reason = verdict.policy_reason.as_str();

    if reason.contains("delete_file_overly_broad_path") {
        let original_path = action.path().unwrap_or("");
        let modified = Action::new(action.action_id.clone(), "write_file", action.order)
            .with_argument("path", format!("trash/{}.noop", action.action_id))
            .with_argument(
                "content",
                format!(
                    "stabilization: delete_file_overly_broad_path; original path={}; scope_reduction to no-op marker",
                    original_path
                ),
            );
        return StabilizationResult::allow_modified(
            modified,
            Mechanism::ScopeReduction,
            "delete_file_overly_broad_path: replaced with no-op marker write",
        );
    }

    if reason.contains("write_file_content_exceeds_threshold")
        || reason.contains("write_file_content_too_large")
    {
        let content = action.content().unwrap_or("");
        let content_bytes = content.as_bytes();
        if content_bytes.len() as u64 > write_content_max_bytes {
            let cut = utf8_safe_truncation_boundary(content_bytes, write_content_max_bytes as usize);
            let mut truncated = String::from_utf8_lossy(&content_bytes[..cut]).into_owned();
            truncated.push_str("[TRUNCATED]");
            let modified = Action::new(action.action_id.clone(), "write_file", action.order)
                .with_argument("path", action.path().unwrap_or("").to_string())
                .with_argument("content", truncated);
            return StabilizationResult::allow_modified(
                modified,
                Mechanism::ScopeReduction,
                format!("write_file content truncated to {} bytes", write_content_max_bytes),
            );
        }
        return StabilizationResult::block(
            Mechanism::MechanismError,
            "write_file stabilization failed: invalid content",
        );
    }

    if let Some(path) = action.path() {
        if !path.is_empty() {
            let normalized = normalize_path_to_sandbox_rel(path);
            let bare = path.trim().replace('\\', "/");
            let bare = bare.trim_start_matches('/');
            if normalized != bare {
                let mut modified = action.clone();
                modified.arguments.insert("path".to_string(), normalized.into());
                return StabilizationResult::allow_modified(
                    modified,
                    Mechanism::ArgumentSanitization,
                    "path normalized to sandbox-relative form",
                );
            }
        }
    }

    StabilizationResult::block(
        Mechanism::MechanismError,
        format!("no stabilization for policy_reason={}", reason),
    )
}

/// Largest `n <= max_len` such that `bytes[..n]` is not a truncated UTF-8
/// sequence. `content_bytes[..max_len]` may land inside a multi-byte
/// codepoint; back off to the nearest char boundary.
fn utf8_safe_truncation_boundary(bytes: &[u8], max_len: usize) -> usize {
    let mut n = max_len.min(bytes.len());
    while n > 0 && (bytes[n] & 0b1100_0000) == 0b1000_0000 {
        n -= 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy;

    #[test]
    fn wildcard_delete_becomes_trash_noop() {
        let action = Action::new("3", "delete_file", 3).with_argument("path", "*");
        let verdict = policy::evaluate(&action, 1024 * 1024);
        let result = stabilize_action(&action, &verdict, 1024 * 1024);
        assert_eq!(result.decision_type, DecisionType::AllowModified);
        assert_eq!(result.mechanism, Mechanism::ScopeReduction);
        let modified = result.modified_action.unwrap();
        assert_eq!(modified.tool_name, "write_file");
        assert_eq!(modified.path().unwrap(), "trash/3.noop");
        assert_eq!(modified.action_id, "3");
        assert_eq!(modified.order, 3);
    }

    #[test]
    fn oversized_write_is_truncated_with_marker() {
        let big = "x".repeat(1024 * 1024 + 10);
        let action = Action::new("1", "write_file", 1)
            .with_argument("path", "big.txt")
            .with_argument("content", big);
        let verdict = policy::evaluate(&action, 1024 * 1024);
        let result = stabilize_action(&action, &verdict, 1024 * 1024);
        let modified = result.modified_action.unwrap();
        let content = modified.content().unwrap();
        assert!(content.ends_with("[TRUNCATED]"));
        assert_eq!(
            content.len() - "[TRUNCATED]".len(),
            1024 * 1024
        );
    }

    #[test]
    fn block_verdict_passes_through_as_full_block() {
        let action = Action::new("1", "write_file", 1).with_argument("path", "../evil.txt");
        let verdict = policy::evaluate(&action, 1024 * 1024);
        let result = stabilize_action(&action, &verdict, 1024 * 1024);
        assert_eq!(result.decision_type, DecisionType::Block);
        assert_eq!(result.mechanism, Mechanism::FullBlock);
        assert!(result.modified_action.is_none());
    }
}
