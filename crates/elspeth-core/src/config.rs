//! Strongly-typed configuration surface (spec §6.2, expansion §6.7).
//!
//! These types are consumed, not parsed, here: a future CLI crate feeds
//! them from YAML/TOML via `serde::Deserialize`. No file I/O or YAML
//! parsing happens in this crate.

use serde::{Deserialize, Serialize};

/// Top-level configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Tag identifying the canonical engine version this run expects.
    pub canonical_version: String,
    /// Nodes making up the DAG.
    pub nodes: Vec<NodeConfig>,
    /// Pool/concurrency configuration.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Secret-resolution configuration.
    #[serde(default)]
    pub secrets: SecretsConfig,
}

/// Configuration for one plugin instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// The registered plugin name to instantiate.
    pub plugin_name: String,
    /// A stable id for this node, reused across runs.
    pub node_id: String,
    /// Plugin-specific configuration, opaque to the engine.
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_pool_size() -> u32 {
    8
}

fn default_max_capacity_retry_seconds() -> u64 {
    60
}

/// Concurrency and retry configuration for the pooled capacity-retry
/// executor (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum in-flight concurrency under normal conditions.
    pub pool_size: u32,
    /// Total wall-clock retry budget per row-batch, in seconds.
    pub max_capacity_retry_seconds: u64,
    /// Multiplicative-decrease factor applied on a capacity signal.
    pub aimd_decrease_factor: f64,
    /// Additive-increase step applied per successful batch.
    pub aimd_increase_step: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_capacity_retry_seconds: default_max_capacity_retry_seconds(),
            aimd_decrease_factor: 0.5,
            aimd_increase_step: 1,
        }
    }
}

/// Where secrets used by this run's plugins should be resolved from
/// (spec §6.2): `{source, vault_url?, mapping: {ENV_VAR: secret_name}}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecretsConfig {
    /// Which backend to resolve secrets from.
    pub source: crate::model::SecretSource,
    /// The vault's base URL. Required when `source` is `keyvault`.
    pub vault_url: Option<String>,
    /// Maps the environment variable to set to the backend-specific
    /// secret name to fetch.
    pub mapping: std::collections::BTreeMap<String, String>,
}
