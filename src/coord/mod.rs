//! Coordination tree client (coord)
//!
//! Responsibilities:
//! - Define the `CoordinationTree` trait the rest of the crate is generic
//!   over: a ZooKeeper/Xline-style hierarchical namespace with versioned
//!   values, ephemeral and sequential nodes, and one-shot watches.
//! - Provide `MemoryTree`, an in-process implementation with full ephemeral
//!   and watch semantics, for tests, demos and single-process deployments.
//!
//! Submodules:
//! - `tree`: trait, error type, create-mode flags, path helpers
//! - `memory`: in-memory tree with per-session ephemeral ownership
pub mod memory;
pub mod tree;

pub use memory::{MemorySession, MemoryTree};
pub use tree::{ANY_VERSION, CoordinationTree, CreateMode, TreeError, TreeEvent, Watch};
