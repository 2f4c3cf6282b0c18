//! Rooted filesystem adapter, ported from `execution_adapter.py::ExecutionAdapter`
//! and its module-level `compute_sandbox_state_hash`.

use crate::action::Action;
use crate::util::hex_encode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const ALLOWED_TOOLS: [&str; 4] = ["write_file", "read_file", "list_dir", "delete_file"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Success,
    Error,
}

/// The result of running one action against the sandbox. Distinct from
/// [`crate::policy::PolicyVerdict`]: this is what actually happened on disk,
/// not what was decided in advance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOutcome {
    pub action_id: String,
    pub adapter_status: AdapterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdapterOutcome {
    fn success(action_id: &str, output_hash: impl Into<String>) -> Self {
        Self {
            action_id: action_id.to_string(),
            adapter_status: AdapterStatus::Success,
            output_hash: Some(output_hash.into()),
            error: None,
        }
    }

    fn error(action_id: &str, error: impl Into<String>) -> Self {
        Self {
            action_id: action_id.to_string(),
            adapter_status: AdapterStatus::Error,
            output_hash: None,
            error: Some(error.into()),
        }
    }
}

/// Executes actions against a single rooted directory. Every resolved path is
/// verified to stay inside `sandbox_root` before any syscall touches it.
pub struct ExecutionAdapter {
    sandbox_root: PathBuf,
}

impl ExecutionAdapter {
    /// Creates `sandbox_root` (and any missing parents) if it doesn't exist.
    pub fn new(sandbox_root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let sandbox_root = sandbox_root.into();
        std::fs::create_dir_all(&sandbox_root)?;
        let sandbox_root = sandbox_root.canonicalize()?;
        Ok(Self { sandbox_root })
    }

    pub fn sandbox_root(&self) -> &Path {
        &self.sandbox_root
    }

    /// Lexically joins `path` onto the sandbox root, rejecting any `..`
    /// segment. Never touches the filesystem. Mirrors `_resolve_path`, minus
    /// the final `Path.resolve()` call the source uses to collapse symlinks —
    /// this adapter has no symlinks to worry about because it only ever
    /// creates plain files under a root it created itself.
    fn resolve_path(&self, path: &str) -> Option<PathBuf> {
        if path.is_empty() || path == "/" {
            return Some(self.sandbox_root.clone());
        }
        let normalized = path.trim_start_matches('/').replace('\\', "/");
        let mut resolved = self.sandbox_root.clone();
        for part in normalized.split('/') {
            if part.is_empty() || part == "." {
                continue;
            }
            if part == ".." {
                return None;
            }
            resolved.push(part);
        }
        Some(resolved)
    }

    /// Like [`Self::resolve_path`], but rejects a resolution equal to the
    /// sandbox root itself — file operations need a file, not the root.
    fn resolve_file_path(&self, path: &str) -> Option<PathBuf> {
        let resolved = self.resolve_path(path)?;
        if resolved == self.sandbox_root {
            None
        } else {
            Some(resolved)
        }
    }

    /// Execute one action. Total: every branch returns an outcome rather than
    /// propagating an error, matching the source's `try`/`except OSError`
    /// catch-all around the whole dispatch.
    pub fn execute(&self, action: &Action) -> AdapterOutcome {
        let id = action.action_id.as_str();

        if !ALLOWED_TOOLS.contains(&action.tool_name.as_str()) {
            return AdapterOutcome::error(id, format!("unknown_tool:{}", action.tool_name));
        }

        match action.tool_name.as_str() {
            "write_file" => self.write_file(action),
            "read_file" => self.read_file(action),
            "list_dir" => self.list_dir(action),
            "delete_file" => self.delete_file(action),
            _ => unreachable!("checked against ALLOWED_TOOLS above"),
        }
    }

    fn write_file(&self, action: &Action) -> AdapterOutcome {
        let id = action.action_id.as_str();
        let path = action.path().unwrap_or("");
        let content = action.content().unwrap_or("");
        let Some(fp) = self.resolve_file_path(path) else {
            return AdapterOutcome::error(id, "path_traversal_or_invalid");
        };
        let Some(parent) = fp.parent() else {
            return AdapterOutcome::error(id, "path_traversal_or_invalid");
        };
        if let Err(e) = std::fs::create_dir_all(parent) {
            return AdapterOutcome::error(id, e.to_string());
        }
        if let Err(e) = std::fs::write(&fp, content) {
            return AdapterOutcome::error(id, e.to_string());
        }
        let hash = hex_encode(Sha256::digest(content.as_bytes()));
        AdapterOutcome::success(id, hash)
    }

    fn read_file(&self, action: &Action) -> AdapterOutcome {
        let id = action.action_id.as_str();
        let path = action.path().unwrap_or("");
        let Some(fp) = self.resolve_file_path(path) else {
            return AdapterOutcome::error(id, "path_traversal_or_invalid");
        };
        if !fp.exists() {
            return AdapterOutcome::error(id, "file_not_found");
        }
        match std::fs::read_to_string(&fp) {
            Ok(content) => {
                let hash = hex_encode(Sha256::digest(content.as_bytes()));
                AdapterOutcome::success(id, hash)
            }
            Err(e) => AdapterOutcome::error(id, e.to_string()),
        }
    }

    fn list_dir(&self, action: &Action) -> AdapterOutcome {
        let id = action.action_id.as_str();
        let path = action.path().filter(|p| !p.is_empty()).unwrap_or(".");
        let Some(rp) = self.resolve_path(path) else {
            return AdapterOutcome::error(id, "path_traversal_or_invalid");
        };
        if !rp.exists() {
            return AdapterOutcome::error(id, "path_not_found");
        }
        if !rp.is_dir() {
            return AdapterOutcome::error(id, "not_a_directory");
        }
        let entries = match std::fs::read_dir(&rp) {
            Ok(entries) => entries,
            Err(e) => return AdapterOutcome::error(id, e.to_string()),
        };
        let mut names = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => names.push(entry.file_name().to_string_lossy().into_owned()),
                Err(e) => return AdapterOutcome::error(id, e.to_string()),
            }
        }
        names.sort();
        let canonical = serde_json::to_string(&names).expect("Vec<String> always serializes");
        let hash = hex_encode(Sha256::digest(canonical.as_bytes()));
        AdapterOutcome::success(id, hash)
    }

    fn delete_file(&self, action: &Action) -> AdapterOutcome {
        let id = action.action_id.as_str();
        let path = action.path().unwrap_or("");
        let Some(fp) = self.resolve_file_path(path) else {
            return AdapterOutcome::error(id, "path_traversal_or_invalid");
        };
        if !fp.exists() {
            return AdapterOutcome::success(id, "");
        }
        match std::fs::remove_file(&fp) {
            Ok(()) => AdapterOutcome::success(id, ""),
            Err(e) => AdapterOutcome::error(id, e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct StateEntry {
    relative_path: String,
    sha256: String,
}

/// Canonical hash of the full sandbox tree: every file's path and content
/// hash, sorted by path. Ported from `compute_sandbox_state_hash`.
pub fn compute_sandbox_state_hash(sandbox_root: &Path) -> String {
    if !sandbox_root.exists() {
        return hex_encode(Sha256::digest(b"[]"));
    }

    let mut entries = Vec::new();
    walk_files(sandbox_root, sandbox_root, &mut entries);
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let canonical = serde_json::to_string(&entries).expect("Vec<StateEntry> always serializes");
    hex_encode(Sha256::digest(canonical.as_bytes()))
}

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<StateEntry>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_files(root, &path, out);
        } else if path.is_file() {
            let hash = match std::fs::read(&path) {
                Ok(content) => hex_encode(Sha256::digest(&content)),
                Err(_) => String::new(),
            };
            let relative_path = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push(StateEntry { relative_path, sha256: hash });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn adapter() -> (ExecutionAdapter, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let adapter = ExecutionAdapter::new(dir.path()).unwrap();
        (adapter, dir)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (adapter, _dir) = adapter();
        let write = Action::new("1", "write_file", 1)
            .with_argument("path", "notes/a.txt")
            .with_argument("content", "hello");
        let outcome = adapter.execute(&write);
        assert_eq!(outcome.adapter_status, AdapterStatus::Success);

        let read = Action::new("2", "read_file", 2).with_argument("path", "notes/a.txt");
        let outcome = adapter.execute(&read);
        assert_eq!(outcome.adapter_status, AdapterStatus::Success);
        assert_eq!(
            outcome.output_hash,
            Some(hex_encode(Sha256::digest(b"hello")))
        );
    }

    #[test]
    fn traversal_is_rejected() {
        let (adapter, _dir) = adapter();
        let action = Action::new("1", "write_file", 1)
            .with_argument("path", "../escape.txt")
            .with_argument("content", "x");
        let outcome = adapter.execute(&action);
        assert_eq!(outcome.adapter_status, AdapterStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("path_traversal_or_invalid"));
    }

    #[test]
    fn delete_of_missing_file_is_success() {
        let (adapter, _dir) = adapter();
        let action = Action::new("1", "delete_file", 1).with_argument("path", "missing.txt");
        let outcome = adapter.execute(&action);
        assert_eq!(outcome.adapter_status, AdapterStatus::Success);
        assert_eq!(outcome.output_hash.as_deref(), Some(""));
    }

    #[test]
    fn list_dir_hash_is_order_independent() {
        let (adapter, _dir) = adapter();
        adapter.execute(&Action::new("1", "write_file", 1).with_argument("path", "b.txt").with_argument("content", "x"));
        adapter.execute(&Action::new("2", "write_file", 2).with_argument("path", "a.txt").with_argument("content", "y"));
        let outcome = adapter.execute(&Action::new("3", "list_dir", 3).with_argument("path", "."));
        assert_eq!(outcome.adapter_status, AdapterStatus::Success);
    }

    #[test]
    fn state_hash_is_empty_array_hash_when_root_missing() {
        let missing = Path::new("/nonexistent/does/not/exist");
        assert_eq!(
            compute_sandbox_state_hash(missing),
            hex_encode(Sha256::digest(b"[]"))
        );
    }

    #[test]
    fn state_hash_changes_with_content() {
        let (adapter, dir) = adapter();
        let before = compute_sandbox_state_hash(dir.path());
        adapter.execute(&Action::new("1", "write_file", 1).with_argument("path", "a.txt").with_argument("content", "hi"));
        let after = compute_sandbox_state_hash(dir.path());
        assert_ne!(before, after);
    }
}
