//! Canonical representation of a single tool invocation (C1).
//!
//! Mirrors `action_schema.py`'s `canonical_action`/`normalize_action`: every
//! action that enters the pipeline — whether supplied pre-canned by a suite
//! case or parsed from a planner's reply — is coerced into this shape before
//! anything downstream looks at it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The four tools the sandbox understands. Anything else is rejected by the
/// policy evaluator, not by the parser — see [`crate::plan_parser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    WriteFile,
    ReadFile,
    ListDir,
    DeleteFile,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::WriteFile => "write_file",
            ToolName::ReadFile => "read_file",
            ToolName::ListDir => "list_dir",
            ToolName::DeleteFile => "delete_file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "write_file" => Some(ToolName::WriteFile),
            "read_file" => Some(ToolName::ReadFile),
            "list_dir" => Some(ToolName::ListDir),
            "delete_file" => Some(ToolName::DeleteFile),
            _ => None,
        }
    }

    /// `{write_file, delete_file}` per `plan_compaction.py::MUTATING_TOOLS`.
    pub fn is_mutating(&self) -> bool {
        matches!(self, ToolName::WriteFile | ToolName::DeleteFile)
    }

    /// `{read_file, list_dir}` per `plan_compaction.py::NON_MUTATING_TOOLS`.
    pub fn is_non_mutating(&self) -> bool {
        !self.is_mutating()
    }
}

/// A single tool invocation inside a [`Plan`]. `tool_name` is kept as a raw
/// string (not `ToolName`) because the pipeline must accept and carry
/// forward tool names outside the allowed set — the policy evaluator is the
/// one place that turns an unknown tool into a block, per the spec's
/// instruction not to drop forbidden tools during parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
    pub order: u32,
}

impl Action {
    pub fn new(action_id: impl Into<String>, tool_name: impl Into<String>, order: u32) -> Self {
        Self {
            action_id: action_id.into(),
            tool_name: tool_name.into(),
            arguments: BTreeMap::new(),
            order,
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn tool(&self) -> Option<ToolName> {
        ToolName::parse(&self.tool_name)
    }

    /// The sandbox-relative path argument, if present and a string.
    pub fn path(&self) -> Option<&str> {
        self.arguments.get("path").and_then(Value::as_str)
    }

    /// The write content argument, if present and a string.
    pub fn content(&self) -> Option<&str> {
        self.arguments.get("content").and_then(Value::as_str)
    }

    /// Path-like argument values checked for traversal and shell markers by
    /// the policy evaluator. Mirrors `policy_eval.py::_get_path_args`.
    pub fn path_args(&self) -> Vec<&str> {
        ["path", "file", "target"]
            .iter()
            .filter_map(|k| self.arguments.get(*k).and_then(Value::as_str))
            .collect()
    }
}

/// An ordered sequence of actions, bounded in length by the parser/compactor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn new(plan_id: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            plan_id: plan_id.into(),
            actions,
        }
    }

    /// Reassign dense 1-based `action_id`/`order` to match position. Used
    /// after parsing, trimming, and compaction.
    pub fn renumber(&mut self) {
        for (idx, action) in self.actions.iter_mut().enumerate() {
            let n = (idx + 1) as u32;
            action.action_id = n.to_string();
            action.order = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_name_round_trips() {
        for s in ["write_file", "read_file", "list_dir", "delete_file"] {
            assert_eq!(ToolName::parse(s).unwrap().as_str(), s);
        }
        assert!(ToolName::parse("exec_shell").is_none());
    }

    #[test]
    fn renumber_is_dense_and_one_based() {
        let mut plan = Plan::new(
            "p1",
            vec![
                Action::new("9", "write_file", 9),
                Action::new("2", "read_file", 2),
            ],
        );
        plan.renumber();
        assert_eq!(plan.actions[0].action_id, "1");
        assert_eq!(plan.actions[0].order, 1);
        assert_eq!(plan.actions[1].action_id, "2");
        assert_eq!(plan.actions[1].order, 2);
    }

    #[test]
    fn path_args_collects_path_file_target() {
        let action = Action::new("1", "write_file", 1)
            .with_argument("path", "a.txt")
            .with_argument("target", "b.txt")
            .with_argument("content", "hi");
        let mut paths = action.path_args();
        paths.sort();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }
}
