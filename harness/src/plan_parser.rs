//! Extracts a [`Plan`] from a planner's raw text reply (C7).
//!
//! Ported from `autonomous_suite_runner_llm.py`'s `_extract_json_object` and
//! `parse_plan_from_json`. Forbidden tools are counted, never dropped — the
//! policy evaluator is the sole place a forbidden tool gets blocked, per the
//! Open Questions resolution in `SPEC_FULL.md`.

use crate::action::{Action, Plan};
use crate::config::GovernanceEfficiencyMode;
use crate::policy::ALLOWED_TOOLS;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrimInfo {
    pub preemptive_trim_applied: bool,
    pub trimmed_action_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub plan: Option<Plan>,
    pub errors: Vec<String>,
    pub forbidden_tool_count: u32,
    pub overflow_count: u32,
    pub trim_info: TrimInfo,
}

/// Pull a fenced code block's contents out of `raw`, preferring a
/// ` ```json ` tag but accepting a bare fence. Returns `None` if no fence
/// wraps a non-empty body.
fn extract_fenced_json(raw: &str) -> Option<String> {
    let mut search_from = 0usize;
    while let Some(rel) = raw[search_from..].find("```") {
        let fence_pos = search_from + rel;
        let after_fence = fence_pos + 3;
        if after_fence > raw.len() {
            break;
        }
        let remainder = &raw[after_fence..];
        let body = remainder.strip_prefix("json").unwrap_or(remainder);
        if let Some(close_rel) = body.find("```") {
            let inner = body[..close_rel].trim();
            if !inner.is_empty() {
                return Some(inner.to_string());
            }
            search_from = after_fence + close_rel + 3;
        } else {
            break;
        }
    }
    None
}

/// Brace-depth scan for the first balanced `{...}` object starting at the
/// first `{`. Falls back to "first `{` through last `}`" if braces never
/// balance, matching the source's best-effort recovery.
fn extract_brace_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let mut depth = 0i32;
    for (i, c) in raw.char_indices() {
        if i < start {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    let last_close = raw.rfind('}')?;
    if last_close > start {
        Some(raw[start..=last_close].to_string())
    } else {
        None
    }
}

/// Best-effort extraction of a JSON object substring from `raw`: fenced code
/// block first, then a brace-depth scan. Returns `""` if nothing is found.
pub fn extract_json_object(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Some(fenced) = extract_fenced_json(raw) {
        return fenced;
    }
    extract_brace_object(raw).unwrap_or_default()
}

/// Drop a trailing comma immediately before a closing `}`/`]`, whitespace
/// permitted in between. Planners reliably produce this one malformation.
fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i = j;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Parse `{ plan_id, actions }` out of a planner's raw text reply.
pub fn parse_plan_from_json(
    raw_text: &str,
    max_actions: u32,
    governance_efficiency_mode: GovernanceEfficiencyMode,
) -> ParseOutcome {
    let raw = raw_text.trim();
    if raw.is_empty() {
        return ParseOutcome {
            errors: vec!["empty_response".to_string()],
            ..Default::default()
        };
    }

    let extracted = extract_json_object(raw);
    let to_parse = strip_trailing_commas(&extracted);

    let obj: Value = match serde_json::from_str(&to_parse) {
        Ok(v) => v,
        Err(e) => {
            return ParseOutcome {
                errors: vec![e.to_string()],
                ..Default::default()
            }
        }
    };

    let Value::Object(obj) = obj else {
        return ParseOutcome {
            errors: vec!["root must be object".to_string()],
            ..Default::default()
        };
    };

    let Some(actions_value) = obj.get("actions") else {
        return ParseOutcome {
            errors: vec!["actions field required".to_string()],
            ..Default::default()
        };
    };
    let Value::Array(actions_value) = actions_value else {
        return ParseOutcome {
            errors: vec!["actions must be list".to_string()],
            ..Default::default()
        };
    };

    let mut errors = Vec::new();
    let mut forbidden = 0u32;
    let mut parsed_actions: Vec<Action> = Vec::new();

    for (i, item) in actions_value.iter().enumerate() {
        let Value::Object(item) = item else {
            errors.push(format!("actions[{i}] must be object"));
            continue;
        };
        let tool_name = match item.get("tool_name").and_then(Value::as_str) {
            Some(tn) if !tn.trim().is_empty() => tn.trim().to_string(),
            _ => {
                errors.push(format!("actions[{i}] tool_name required"));
                continue;
            }
        };
        if !ALLOWED_TOOLS.contains(&tool_name.as_str()) {
            forbidden += 1;
        }
        let mut action = Action::new(String::new(), tool_name, 0);
        if let Some(Value::Object(args)) = item.get("arguments") {
            action.arguments = args.clone().into_iter().collect();
        }
        parsed_actions.push(action);
    }

    let original_count = parsed_actions.len();
    let overflow = if original_count > max_actions as usize { 1 } else { 0 };
    let mut trim_info = TrimInfo::default();

    if original_count > max_actions as usize {
        match governance_efficiency_mode {
            GovernanceEfficiencyMode::SoftTrim => {
                parsed_actions.truncate(max_actions as usize);
                while matches!(
                    parsed_actions.last().and_then(|a| a.tool()),
                    Some(t) if t.is_non_mutating()
                ) {
                    parsed_actions.pop();
                }
                trim_info.preemptive_trim_applied = true;
                trim_info.trimmed_action_count = original_count - parsed_actions.len();
            }
            GovernanceEfficiencyMode::Off => {
                parsed_actions.truncate(max_actions as usize);
            }
        }
    }

    let plan_id = obj
        .get("plan_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut plan = Plan::new(plan_id, parsed_actions);
    plan.renumber();

    ParseOutcome {
        plan: Some(plan),
        errors,
        forbidden_tool_count: forbidden,
        overflow_count: overflow,
        trim_info,
    }
}
