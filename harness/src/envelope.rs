//! Run envelope: the end-of-run summary record, written atomically.
//!
//! Ported from `run_envelope.py`. Every JSON artifact this crate finalizes
//! (envelope, metrics) goes through the same `<path>.tmp` → fsync → rename
//! sequence, generalized here into [`atomic_write_json`] instead of being
//! duplicated per caller.

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Normal,
    Incomplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEnvelope {
    pub schema_version: String,
    pub run_id: String,
    pub run_instance_id: String,
    pub suite_id: String,
    pub total_cases_expected: usize,
    pub total_cases_completed: usize,
    pub executed_action_count: usize,
    pub blocked_action_count: usize,
    pub modified_action_count: usize,
    pub run_start_ts: String,
    pub run_end_ts: String,
    pub exit_status: ExitStatus,
    pub sandbox_state_hash_before: String,
    pub sandbox_state_hash_after: String,
    pub execution_log_hash: String,
    pub receipt_path: String,
    pub receipt_sha256: String,
    pub metrics: Value,
}

/// SHA-256 hex digest of `bytes`.
pub fn compute_sha256(bytes: &[u8]) -> String {
    crate::util::hex_encode(Sha256::digest(bytes))
}

/// SHA-256 hex digest of a file's contents, or `""` if it can't be read.
pub fn compute_file_sha256(path: &Path) -> String {
    std::fs::read(path).map(|b| compute_sha256(&b)).unwrap_or_default()
}

/// Serialize `value` as pretty JSON, write it to `<path>.tmp`, fsync, then
/// rename over `path`. Used for every envelope and metrics file this crate
/// produces; the verifier's `no_tmp_remains` check depends on this sequence
/// never leaving a `.tmp` sibling behind on success.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> HarnessResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    let body = serde_json::to_string_pretty(value)?;
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        write!(file, "{body}\n")?;
        file.flush()?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| {
        HarnessError::EnvelopeFinalize(format!("rename {:?} -> {:?} failed: {e}", tmp_path, path))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_leaves_no_tmp_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        atomic_write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        assert!(path.exists());
        let tmp = dir.path().join("run.json.tmp");
        assert!(!tmp.exists());
    }

    #[test]
    fn file_sha256_matches_direct_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(compute_file_sha256(&path), compute_sha256(b"hello"));
    }

    #[test]
    fn missing_file_hashes_as_empty_string() {
        let missing = Path::new("/nonexistent/f.txt");
        assert_eq!(compute_file_sha256(missing), "");
    }
}
