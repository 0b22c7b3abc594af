//! # elspeth-dag
//!
//! The pipeline's DAG model and its two-pass validator: a structural pass
//! (no cycles, source/sink degree constraints per node type, every sink's
//! `consumes()` matched against an upstream `produces()`) followed by a
//! cross-edge schema contract pass — does every consumer's required
//! fields appear in what its producer effectively guarantees, accounting
//! for GATE passthrough and COALESCE intersection across branches.

pub mod error;
pub mod graph;

pub use error::{Error, Result};
pub use graph::{guaranteed_fields_for, required_fields_for, DagNode, ExecutionGraph};
