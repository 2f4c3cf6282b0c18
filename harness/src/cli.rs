//! Command-line surface: `harness run` and `harness verify`.
//!
//! Mirrors the spec's CLI flags one-to-one onto `clap` derive structs, the
//! same layered-override pattern `config` uses for the on-disk file.

use crate::config::{ConfigOverrides, GovernanceEfficiencyMode, HarnessConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "harness", version, about = "Autonomous execution governance harness")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a suite of cases through the governance pipeline.
    Run(RunArgs),
    /// Verify a previously written run envelope against its log and sandbox.
    Verify(VerifyArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum GovernanceEfficiencyModeArg {
    SoftTrim,
    Off,
}

impl From<GovernanceEfficiencyModeArg> for GovernanceEfficiencyMode {
    fn from(v: GovernanceEfficiencyModeArg) -> Self {
        match v {
            GovernanceEfficiencyModeArg::SoftTrim => GovernanceEfficiencyMode::SoftTrim,
            GovernanceEfficiencyModeArg::Off => GovernanceEfficiencyMode::Off,
        }
    }
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Root directory for all artifacts (sandbox, logs, envelope, metrics).
    #[arg(long)]
    pub runtime_dir: PathBuf,
    /// Identifier for this run; scopes the sandbox sub-tree and log file.
    #[arg(long)]
    pub run_id: String,
    /// Optional instance id; a UTC timestamp is generated if absent.
    #[arg(long)]
    pub run_instance_id: Option<String>,
    /// Directory holding `cases.jsonl` and `manifest.json`.
    #[arg(long)]
    pub suite_path: PathBuf,
    /// Path to an optional `harness.toml` to load before applying overrides.
    #[arg(long)]
    pub config_path: Option<PathBuf>,
    #[arg(long)]
    pub max_actions: Option<u32>,
    #[arg(long, value_enum)]
    pub governance_efficiency_mode: Option<GovernanceEfficiencyModeArg>,
    #[arg(long)]
    pub no_planner_efficiency_prompt: bool,
}

impl RunArgs {
    pub fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            runtime_dir: Some(self.runtime_dir.clone()),
            max_actions: self.max_actions,
            governance_efficiency_mode: self.governance_efficiency_mode.map(Into::into),
            planner_efficiency_prompt: if self.no_planner_efficiency_prompt {
                Some(false)
            } else {
                None
            },
        }
    }

    pub fn resolve_config(&self) -> crate::error::HarnessResult<HarnessConfig> {
        let base = HarnessConfig::load(self.config_path.as_deref())?;
        Ok(self.config_overrides().apply(base))
    }
}

#[derive(Debug, Parser)]
pub struct VerifyArgs {
    #[arg(long)]
    pub runtime_dir: PathBuf,
    #[arg(long)]
    pub run_id: String,
    #[arg(long)]
    pub run_instance_id: String,
    /// Expected case count; normally read from the suite manifest instead.
    #[arg(long)]
    pub expected_cases: usize,
}
