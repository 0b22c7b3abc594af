//! Value types for the identity & lineage model (spec §3.1).
//!
//! These are plain data, not persistence code — `elspeth-landscape` is the
//! only crate that writes them to a database, and it does so through the
//! recorder API rather than touching these fields directly.

use crate::ids::{
    BatchId, CallId, ExpandGroupId, ForkGroupId, JoinGroupId, NodeId, OperationId, OutcomeId,
    RowId, RunId, StateId, TokenId, TransformErrorId, ValidationErrorId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Currently executing.
    Running,
    /// Finished without a fatal error.
    Completed,
    /// Finished with a fatal error or was cancelled.
    Failed,
}

/// A single invocation of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Identity.
    pub run_id: RunId,
    /// Sanitized configuration snapshot, serialized for audit.
    pub config_snapshot: Value,
    /// Tag identifying the canonical-version of the engine that ran this.
    pub canonical_version: String,
    /// Hash of the run-level schema contract, once known.
    pub schema_contract_hash: Option<String>,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Terminal timestamp, set only once the run reaches a terminal
    /// status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Optional pipeline-level audit payload.
    pub audit_payload: Option<Value>,
}

/// The kind of plugin a node wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Ingests Tier 3 data and coerces it to Tier 2.
    Source,
    /// Transforms Tier 2 rows.
    Transform,
    /// Routes tokens without transforming row content.
    Gate,
    /// Groups rows into batches.
    Aggregation,
    /// Merges multiple inbound branches into one token.
    Coalesce,
    /// Terminal node: writes output.
    Sink,
}

/// One plugin instance in the DAG. Identity is the composite
/// `(node_id, run_id)`: the same `node_id` is reused across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node identity within this run.
    pub node_id: NodeId,
    /// The run this node instance belongs to.
    pub run_id: RunId,
    /// The plugin's registered name.
    pub plugin_name: String,
    /// The plugin's category.
    pub node_type: NodeType,
    /// The plugin implementation's version string.
    pub plugin_version: String,
    /// Sanitized configuration snapshot.
    pub config_snapshot: Value,
    /// The schema configuration this node was constructed with.
    pub schema_config: Option<Value>,
    /// Locked input contract hash, once known.
    pub input_contract_hash: Option<String>,
    /// Locked output contract hash, once known.
    pub output_contract_hash: Option<String>,
    /// Position of this node within the DAG's declared order.
    pub sequence: u32,
}

/// An initial ingress record, owned by exactly one source node.
/// Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    /// Identity.
    pub row_id: RowId,
    /// The run this row belongs to.
    pub run_id: RunId,
    /// The source node that created this row.
    pub source_node_id: NodeId,
    /// The row's position within its source's iteration order.
    pub row_index: u64,
    /// Canonical hash of the original, uncoerced row payload.
    pub source_data_hash: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A traceable "this copy of this row is currently in flight at some
/// node". A row has one or more tokens; tokens fork/expand/coalesce
/// during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Identity.
    pub token_id: TokenId,
    /// The row this token traces.
    pub row_id: RowId,
    /// The named branch this token is travelling on, if any.
    pub branch_name: Option<String>,
    /// The fork event that produced this token, if any.
    pub fork_group_id: Option<ForkGroupId>,
    /// The coalesce event this token was merged into, if any.
    pub join_group_id: Option<JoinGroupId>,
    /// The expand event that produced this token, if any.
    pub expand_group_id: Option<ExpandGroupId>,
    /// The pipeline step this token is currently at.
    pub step_in_pipeline: u32,
}

/// Status of a node state execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStateStatus {
    /// Still executing.
    Running,
    /// Completed without error.
    Success,
    /// Completed with an error.
    Error,
}

/// A single execution of a node for a specific token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    /// Identity.
    pub state_id: StateId,
    /// The token this execution processed.
    pub token_id: TokenId,
    /// The node that ran.
    pub node_id: NodeId,
    /// The run this execution belongs to.
    pub run_id: RunId,
    /// Position within the overall pipeline.
    pub step_index: u32,
    /// Hash (or, for small payloads, a full snapshot) of the input data.
    pub input_data_hash: String,
    /// Output fields produced, once execution completes.
    pub output_fields: Option<Value>,
    /// Status of this execution.
    pub status: NodeStateStatus,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When execution ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Which kind of external interaction a call represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    /// A request to an LLM provider.
    Llm,
    /// A generic HTTP request.
    Http,
    /// A SQL query.
    Sql,
    /// A filesystem read or write.
    Filesystem,
}

/// Outcome of a single external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// The call completed successfully.
    Success,
    /// The call failed.
    Error,
}

/// One network/SQL/FS request performed inside a node state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCall {
    /// Identity.
    pub call_id: CallId,
    /// The node state this call was made inside.
    pub state_id: StateId,
    /// Monotonic per-state index, partial-unique with `state_id`.
    pub call_index: u32,
    /// What kind of call this was.
    pub call_type: CallType,
    /// Whether it succeeded.
    pub status: CallStatus,
    /// Canonical hash of the request payload.
    pub request_hash: String,
    /// Canonical hash of the response payload, if one was received.
    pub response_hash: Option<String>,
    /// Structured error detail, if the call failed.
    pub error: Option<Value>,
    /// Observed latency, in milliseconds.
    pub latency_ms: Option<u64>,
    /// Payload-store reference for the request body, if persisted.
    pub request_ref: Option<String>,
    /// Payload-store reference for the response body, if persisted.
    pub response_ref: Option<String>,
}

/// A call performed outside any row's state, e.g. during plugin setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationCall {
    /// Identity.
    pub operation_id: OperationId,
    /// The run this operation belongs to.
    pub run_id: RunId,
    /// The node performing the operation, if any.
    pub node_id: Option<NodeId>,
    /// What kind of call this was.
    pub call_type: CallType,
    /// Whether it succeeded.
    pub status: CallStatus,
    /// Canonical hash of the request payload.
    pub request_hash: String,
    /// Canonical hash of the response payload, if one was received.
    pub response_hash: Option<String>,
}

/// The row's fate at a particular join point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// The token reached the end of the pipeline successfully.
    Completed,
    /// The token was explicitly routed to a named destination.
    Routed,
    /// The token was merged into another via coalesce.
    Coalesced,
    /// The token failed irrecoverably.
    Failed,
    /// The token was rejected and quarantined.
    Quarantined,
    /// The token was split into multiple branch tokens.
    Forked,
    /// The token was expanded into multiple copies.
    Expanded,
    /// The token was consumed as part of a completed batch.
    ConsumedInBatch,
    /// The token is sitting in a batch buffer awaiting more members.
    Buffered,
}

impl OutcomeKind {
    /// Whether this outcome is terminal: a token with a terminal outcome
    /// cannot later be given a different terminal outcome.
    pub fn is_terminal(self) -> bool {
        !matches!(self, OutcomeKind::Buffered)
    }
}

/// A grouping record for aggregation/batched sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Identity.
    pub batch_id: BatchId,
    /// The node that owns this batch.
    pub node_id: NodeId,
    /// The run this batch belongs to.
    pub run_id: RunId,
    /// Number of tokens currently attributed to this batch.
    pub member_count: u32,
}

/// A row rejected at a source boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    /// Identity.
    pub error_id: ValidationErrorId,
    /// The run this error belongs to.
    pub run_id: RunId,
    /// The source node that rejected the row.
    pub node_id: NodeId,
    /// The rejected row's data, serialized (with a repr fallback when not
    /// canonical-JSON-encodable).
    pub row_data: Value,
    /// Human-readable description of the violation.
    pub error: String,
    /// Which schema mode was in effect: `"parse"` for source-level parse
    /// failures, or the contract's mode name.
    pub schema_mode: String,
    /// Where the row was routed: `"discard"` or a quarantine sink's name.
    pub destination: String,
    /// Structured detail for a contract violation (type mismatch / missing
    /// field), if this wasn't a bare parse failure.
    pub contract_violation: Option<Value>,
}

/// A token rejected at a transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformError {
    /// Identity.
    pub error_id: TransformErrorId,
    /// The run this error belongs to.
    pub run_id: RunId,
    /// The token that was rejected.
    pub token_id: TokenId,
    /// The transform that rejected it.
    pub transform_id: NodeId,
    /// The row data at the point of rejection.
    pub row_data: Value,
    /// Structured error detail.
    pub error_details: Value,
    /// Where the token was routed: `"discard"` or a sink name.
    pub destination: String,
}

/// The engine's terminal verdict for a run, which a wrapping CLI maps to
/// a process exit code (spec §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every row reached a terminal, non-failing outcome.
    Success,
    /// The run completed but one or more rows were quarantined or failed.
    CompletedWithErrors,
    /// The run was aborted (cancellation, or a Tier 1 invariant panic
    /// upstream of this return).
    Aborted,
}

/// Where a secret came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    /// A remote key-vault service.
    Keyvault,
    /// A process environment variable.
    #[default]
    Env,
}

/// One record per secret loaded from a secret backend. Never contains the
/// plaintext secret value, only a fingerprint of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretResolution {
    /// The run this resolution belongs to.
    pub run_id: RunId,
    /// The environment variable the secret was bound to.
    pub env_var_name: String,
    /// Where the secret came from.
    pub source: SecretSource,
    /// The vault URL, if the source was a key vault.
    pub vault_url: Option<String>,
    /// The secret's name within its backend.
    pub secret_name: String,
    /// How long the fetch took, in milliseconds.
    pub latency_ms: u64,
    /// When the resolution happened.
    pub timestamp: DateTime<Utc>,
    /// HMAC-SHA256 fingerprint of the secret value, never the plaintext.
    pub fingerprint: String,
}
