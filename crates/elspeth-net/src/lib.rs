//! # elspeth-net
//!
//! The audited HTTP client every network-calling plugin is built on (spec
//! §4.5): an SSRF boundary that DNS-resolves and re-checks every redirect
//! hop, per-request audit recording through [`elspeth_core::plugin::PluginContext`],
//! and a shared rate-limit registry keyed by service name.
//!
//! Per-state client caching (so retries of the same external attempt
//! under a fresh `state_id` get a fresh `call_index` sequence) is the
//! engine's concern, not this crate's — the client itself is stateless
//! with respect to which call index it's on.

pub mod client;
pub mod error;
pub mod rate_limit;
pub mod ssrf;

pub use client::{AuditedHttpClient, AuditedResponse};
pub use error::{is_capacity_status, NetError, Result};
pub use rate_limit::{RateLimitQuota, RateLimiterRegistry};
