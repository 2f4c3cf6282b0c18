//! Operational error type for the harness.
//!
//! Domain outcomes (a bad plan, a blocked action, an adapter failure) are
//! represented as data and flow through the pipeline as ordinary return
//! values — see [`plan_parser::ParseOutcome`](crate::plan_parser::ParseOutcome),
//! [`policy::PolicyVerdict`](crate::policy::PolicyVerdict), and
//! [`sandbox::AdapterOutcome`](crate::sandbox::AdapterOutcome). `HarnessError`
//! is reserved for failures the pipeline cannot route around: a missing
//! suite file, a malformed manifest, or an I/O failure while sealing the
//! execution log or run envelope.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("suite file not found: {0}")]
    MissingSuite(PathBuf),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("failed to finalize run envelope: {0}")]
    EnvelopeFinalize(String),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
