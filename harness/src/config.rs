//! Layered configuration: an on-disk `harness.toml`, overridden field-by-field
//! by CLI flags. This is the explicit `PolicyConfig`-style value the pipeline
//! threads through instead of module-level globals.

use crate::error::HarnessResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the plan parser handles plans longer than `max_actions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceEfficiencyMode {
    /// Keep the first `max_actions`, then drop trailing non-mutating actions.
    SoftTrim,
    /// Hard-truncate to the first `max_actions`.
    Off,
}

impl Default for GovernanceEfficiencyMode {
    fn default() -> Self {
        GovernanceEfficiencyMode::SoftTrim
    }
}

/// Default `write_content_max_bytes`: 1 MiB, per `policy_eval.py::DEFAULT_WRITE_CONTENT_MAX`.
pub const DEFAULT_WRITE_CONTENT_MAX_BYTES: u64 = 1024 * 1024;

/// Default bound on plan length, per `autonomous_suite_runner_llm.py::MAX_ACTIONS_DEFAULT`.
pub const DEFAULT_MAX_ACTIONS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
    #[serde(default = "default_max_actions")]
    pub max_actions: u32,
    #[serde(default)]
    pub governance_efficiency_mode: GovernanceEfficiencyMode,
    #[serde(default = "default_write_content_max_bytes")]
    pub write_content_max_bytes: u64,
    #[serde(default = "default_true")]
    pub planner_efficiency_prompt: bool,
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("runtime")
}
fn default_max_actions() -> u32 {
    DEFAULT_MAX_ACTIONS
}
fn default_write_content_max_bytes() -> u64 {
    DEFAULT_WRITE_CONTENT_MAX_BYTES
}
fn default_true() -> bool {
    true
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
            max_actions: default_max_actions(),
            governance_efficiency_mode: GovernanceEfficiencyMode::default(),
            write_content_max_bytes: default_write_content_max_bytes(),
            planner_efficiency_prompt: true,
        }
    }
}

impl HarnessConfig {
    /// Load `harness.toml` from `path` if it exists, else fall back to
    /// defaults. Mirrors the host crate's layered `AgentConfig::load` + CLI
    /// override pattern.
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&raw)?)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// CLI-sourced overrides. Every field is `Option`; `None` means "inherit from
/// the loaded config". Built directly from parsed `clap` arguments in
/// [`crate::cli`].
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub runtime_dir: Option<PathBuf>,
    pub max_actions: Option<u32>,
    pub governance_efficiency_mode: Option<GovernanceEfficiencyMode>,
    pub planner_efficiency_prompt: Option<bool>,
}

impl ConfigOverrides {
    pub fn apply(self, mut base: HarnessConfig) -> HarnessConfig {
        if let Some(v) = self.runtime_dir {
            base.runtime_dir = v;
        }
        if let Some(v) = self.max_actions {
            base.max_actions = v;
        }
        if let Some(v) = self.governance_efficiency_mode {
            base.governance_efficiency_mode = v;
        }
        if let Some(v) = self.planner_efficiency_prompt {
            base.planner_efficiency_prompt = v;
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.max_actions, 6);
        assert_eq!(cfg.write_content_max_bytes, 1024 * 1024);
        assert_eq!(cfg.governance_efficiency_mode, GovernanceEfficiencyMode::SoftTrim);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = HarnessConfig::load(Some(Path::new("/nonexistent/harness.toml"))).unwrap();
        assert_eq!(cfg, HarnessConfig::default());
    }

    #[test]
    fn overrides_only_touch_set_fields() {
        let base = HarnessConfig::default();
        let overrides = ConfigOverrides {
            max_actions: Some(10),
            ..Default::default()
        };
        let merged = overrides.apply(base.clone());
        assert_eq!(merged.max_actions, 10);
        assert_eq!(merged.runtime_dir, base.runtime_dir);
    }
}
