//! Plugin context, the span factory contract, and the plugin traits
//! (source/transform/gate/aggregation/sink) every DAG node implements.

use crate::contract::SchemaContract;
use crate::error::Result;
use crate::ids::{NodeId, OperationId, RunId, StateId, TokenId};
use crate::model::{CallStatus, CallType};
use crate::results::{TokenOutcome, TransformResult};
use crate::row::{PipelineRow, Tier3Row};
use crate::telemetry::TelemetryEvent;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::Span;

/// The subset of the recorder's API a plugin context needs. Implemented by
/// `elspeth-landscape`'s concrete recorder; kept as a trait here so
/// `elspeth-core` never depends on the storage crate.
#[async_trait]
pub trait LandscapeHandle: Send + Sync {
    /// Allocate the next call index for `state_id` and persist the call.
    async fn record_call(
        &self,
        state_id: &StateId,
        call_type: CallType,
        status: CallStatus,
        request_data: &Value,
        response_data: Option<&Value>,
        error: Option<&Value>,
        latency_ms: Option<u64>,
    ) -> Result<()>;

    /// Record a source-boundary validation error.
    async fn record_validation_error(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        row_data: &Value,
        error: &str,
        schema_mode: &str,
        destination: &str,
    ) -> Result<()>;

    /// Record a transform-boundary error.
    async fn record_transform_error(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        transform_id: &NodeId,
        row_data: &Value,
        error_details: &Value,
        destination: &str,
    ) -> Result<()>;

    /// Record a token's outcome.
    async fn record_token_outcome(&self, run_id: &RunId, token_id: &TokenId, outcome: TokenOutcome) -> Result<()>;

    /// Read a batch-transform plugin's persisted checkpoint, if any.
    async fn get_checkpoint(&self, node_id: &NodeId) -> Result<Option<Value>>;

    /// Merge new fields into a plugin's persisted checkpoint.
    async fn update_checkpoint(&self, node_id: &NodeId, merge: Value) -> Result<()>;

    /// Clear a plugin's persisted checkpoint entirely.
    async fn clear_checkpoint(&self, node_id: &NodeId) -> Result<()>;

    /// Record one resolved secret's audit trail entry.
    async fn record_secret_resolution(&self, resolution: &crate::model::SecretResolution) -> Result<()>;
}

/// Content-addressed payload store (spec §4.3). Implemented concretely by
/// `elspeth-landscape`; the trait lives here so plugin code can depend on
/// it without depending on the storage crate.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Store `value`, returning its content-addressed reference.
    async fn put(&self, value: &Value) -> Result<String>;

    /// Fetch a previously stored value by reference.
    async fn get(&self, reference: &str) -> Result<Option<Value>>;

    /// Whether a reference is already present.
    async fn exists(&self, reference: &str) -> Result<bool>;
}

/// Information about the token currently in flight for a `PluginContext`.
/// Mutated in place across rows when the engine reuses one context for a
/// batch, so a worker holding a snapshot must copy it at submit time
/// rather than hold a live reference (spec §4.8's stale-token concern).
#[derive(Debug, Clone)]
pub struct TokenInfo {
    /// The token's identity.
    pub token_id: TokenId,
    /// The row it traces.
    pub row_id: crate::ids::RowId,
    /// The row data carried alongside the token.
    pub row_data: PipelineRow,
}

/// Per-invocation bag passed to every plugin call (spec §4.4).
///
/// Cheap to clone: every field is an id, a small enum, or an `Arc`. The
/// batch transform mixin relies on this to snapshot a context at submit
/// time so a worker never observes a `token` the engine has since moved
/// on from (spec §4.8's stale-token concern).
#[derive(Clone)]
pub struct PluginContext {
    /// The run this invocation belongs to.
    pub run_id: RunId,
    /// Sanitized configuration subset visible to the plugin.
    pub config: Value,
    /// The node being invoked, if this call is node-scoped.
    pub node_id: Option<NodeId>,
    /// The node-state this call belongs to, if row-scoped.
    pub state_id: Option<StateId>,
    /// The operation id, if this call happens outside any row's state.
    pub operation_id: Option<OperationId>,
    /// The current token, mutable in place across rows sharing this
    /// context during batching.
    pub token: Option<TokenInfo>,
    /// Token ids for the current batch, set by the aggregation executor.
    /// `Some(vec![])` means an explicitly empty batch; `None` means no
    /// batch tracking is in effect at all.
    pub batch_token_ids: Option<Vec<TokenId>>,
    /// The recorder, if auditing is enabled for this run.
    pub landscape: Option<Arc<dyn LandscapeHandle>>,
    /// The payload store, if configured.
    pub payload_store: Option<Arc<dyn PayloadStore>>,
    telemetry_sink: Option<Arc<dyn Fn(TelemetryEvent) + Send + Sync>>,
}

impl PluginContext {
    /// Build a context with no recorder, payload store, or telemetry sink
    /// wired up (useful for plugin unit tests).
    pub fn bare(run_id: RunId, config: Value) -> Self {
        Self {
            run_id,
            config,
            node_id: None,
            state_id: None,
            operation_id: None,
            token: None,
            batch_token_ids: None,
            landscape: None,
            payload_store: None,
            telemetry_sink: None,
        }
    }

    /// Install a telemetry sink. No-op by default, per spec §4.4.
    pub fn with_telemetry(mut self, sink: Arc<dyn Fn(TelemetryEvent) + Send + Sync>) -> Self {
        self.telemetry_sink = Some(sink);
        self
    }

    /// Emit a telemetry event. A no-op unless a sink was installed.
    pub fn telemetry_emit(&self, event: TelemetryEvent) {
        if let Some(sink) = &self.telemetry_sink {
            sink(event);
        }
    }

    /// Record an external call through the recorder, if one is attached.
    pub async fn record_call(
        &self,
        call_type: CallType,
        status: CallStatus,
        request_data: &Value,
        response_data: Option<&Value>,
        error: Option<&Value>,
        latency_ms: Option<u64>,
    ) -> Result<()> {
        let Some(landscape) = &self.landscape else {
            return Ok(());
        };
        let Some(state_id) = &self.state_id else {
            return Ok(());
        };
        landscape
            .record_call(state_id, call_type, status, request_data, response_data, error, latency_ms)
            .await
    }
}

/// Span kinds in the factory contract (spec §4.4). Whether or not
/// OpenTelemetry is layered on top of `tracing`, these are the spans every
/// engine phase opens.
#[derive(Debug, Clone, Copy)]
pub enum SpanKind {
    /// The whole run.
    Run,
    /// Processing of a single row.
    Row,
    /// A source's `load` call.
    Source,
    /// A transform invocation.
    Transform,
    /// A gate invocation.
    Gate,
    /// An aggregation invocation.
    Aggregation,
    /// A sink `write` call.
    Sink,
}

/// Open a span of `kind` for `plugin_name` at `node_id`, recording
/// `token_id`/`batch_id`/`input_hash` attributes only when present. An
/// explicitly empty batch (`token_ids = Some(vec![])`) is distinguished
/// from "no tracking" (`None`) per spec §4.4.
pub fn open_span(
    kind: SpanKind,
    plugin_name: &str,
    node_id: Option<&NodeId>,
    token_id: Option<&TokenId>,
    token_ids: Option<&[TokenId]>,
    batch_id: Option<&crate::ids::BatchId>,
    input_hash: Option<&str>,
) -> Span {
    let name = match kind {
        SpanKind::Run => "run",
        SpanKind::Row => "row",
        SpanKind::Source => "source",
        SpanKind::Transform => "transform",
        SpanKind::Gate => "gate",
        SpanKind::Aggregation => "aggregation",
        SpanKind::Sink => "sink",
    };
    tracing::info_span!(
        "plugin_span",
        span.kind = name,
        plugin.name = plugin_name,
        node.id = node_id.map(NodeId::as_str).unwrap_or_default(),
        token.id = token_id.map(TokenId::as_str).unwrap_or_default(),
        token.ids = token_ids.map(|ids| ids.len() as i64),
        batch.id = batch_id.map(|id| id.as_str().to_string()).unwrap_or_default(),
        input.hash = input_hash.unwrap_or_default(),
    )
}

/// A plugin that ingests Tier 3 data and coerces it to Tier 2 rows.
#[async_trait]
pub trait Source: Send + Sync {
    /// Produce the next raw row, or `None` once the source is exhausted.
    /// Sources are finite and not restartable within a run.
    async fn next_raw(&mut self) -> Option<Tier3Row>;

    /// The locked output contract, available only after the first valid
    /// row has been observed.
    fn schema_contract(&self) -> Option<Arc<SchemaContract>>;
}

/// A plugin that transforms Tier 2 rows one at a time.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Process one row, returning its outcome.
    async fn process(&self, row: PipelineRow, ctx: &mut PluginContext) -> TransformResult;
}

/// A plugin that routes tokens without altering row content.
pub trait Gate: Send + Sync {
    /// Decide where `row` should go next.
    fn route(&self, row: &PipelineRow) -> crate::routing::RoutingAction;
}

/// A plugin that writes finished rows to a durable destination.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Called once before the first write; receives a field-resolution
    /// mapping when `headers: "original"` was requested.
    async fn on_start(&mut self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Write one emitted batch of results.
    async fn write(&mut self, rows: &[PipelineRow], ctx: &PluginContext) -> Result<()>;

    /// Artifacts this sink declares it may produce, for DAG validation.
    /// Descriptors returned here are declarations of capability, not
    /// proof of delivery — `content_hash`/`size_bytes` are placeholders
    /// until [`Sink::collect_artifacts`] reports what was actually written.
    fn produces(&self) -> Vec<crate::sinks::ArtifactDescriptor> {
        Vec::new()
    }

    /// Names of upstream artifacts this sink expects to have available,
    /// matched during DAG validation against some ancestor's `produces()`.
    fn consumes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Artifacts this sink has actually produced so far, keyed by name.
    /// Called after the run to populate the audit trail; empty until at
    /// least one write has happened.
    async fn collect_artifacts(&self) -> std::collections::HashMap<String, crate::sinks::ArtifactDescriptor> {
        std::collections::HashMap::new()
    }

    /// Pre-run check that the sink's configured output target is usable.
    fn validate_output_target(&self) -> crate::sinks::OutputTargetValidation {
        crate::sinks::OutputTargetValidation::ok()
    }
}
