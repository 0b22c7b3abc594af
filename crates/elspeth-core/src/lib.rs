//! # elspeth-core
//!
//! The data model, schema contract system, three-tier trust boundary, and
//! plugin traits shared by every other crate in the workspace. Nothing in
//! here talks to a database or the network; `elspeth-landscape` and
//! `elspeth-net` build on top of the traits defined here.

pub mod config;
pub mod contract;
pub mod error;
pub mod ids;
pub mod model;
pub mod plugin;
pub mod results;
pub mod routing;
pub mod row;
pub mod sinks;
pub mod sources;
pub mod telemetry;

pub use error::{Error, Result};
