//! Sandboxed execution adapter (C2).
//!
//! Ported from `execution_adapter.py`. All paths are resolved relative to a
//! single rooted directory; any resolution that would escape that root is
//! rejected before any filesystem call is made. No network, no subprocess.

pub mod adapter;

pub use adapter::{compute_sandbox_state_hash, AdapterOutcome, ExecutionAdapter};
