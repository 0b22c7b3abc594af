//! The run loop: wires a validated DAG of source → transforms/gates →
//! named sinks together and drives one row at a time through it,
//! recording token outcomes through the landscape recorder.
//!
//! This is a linear-chain executor with single-hop gate routing to a
//! named sink — the full N-ary branch/coalesce DAG described in spec
//! §4.12 is validated structurally by [`elspeth_dag::ExecutionGraph`] but
//! multi-hop branch execution beyond "gate routes directly to a sink" is
//! not built here; see `DESIGN.md`.

use crate::error::{EngineError, Result};
use elspeth_core::config::SecretsConfig;
use elspeth_core::ids::{NodeId, RowId, RunId, TokenId};
use elspeth_core::model::OutcomeKind;
use elspeth_core::plugin::{LandscapeHandle, PluginContext, Sink, Source, TokenInfo};
use elspeth_core::results::{OutcomeContext, TokenOutcome, TransformOutcome, TransformResult, TransformRows};
use elspeth_core::row::{coerce_row, PipelineRow, Tier3Row};
use elspeth_dag::ExecutionGraph;
use elspeth_secrets::client::KeyVaultClient;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A non-gate pipeline step between the source and the sinks.
pub enum Stage {
    /// A row-at-a-time transform.
    Transform(NodeId, Box<dyn elspeth_core::plugin::Transform>),
    /// A routing decision with no row mutation.
    Gate(NodeId, Box<dyn elspeth_core::plugin::Gate>),
}

/// Tallies produced by one run, enough to derive spec §6.5's
/// `RunOutcome`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    /// Rows that reached the end of the chain and were written to the
    /// default sink.
    pub rows_completed: u64,
    /// Rows a gate explicitly routed to a named sink.
    pub rows_routed: u64,
    /// Rows rejected at the source boundary.
    pub rows_quarantined: u64,
    /// Rows a transform rejected.
    pub rows_failed: u64,
}

impl RunStats {
    /// This run's terminal verdict (spec §6.5).
    pub fn outcome(&self) -> elspeth_core::model::RunOutcome {
        if self.rows_quarantined == 0 && self.rows_failed == 0 {
            elspeth_core::model::RunOutcome::Success
        } else {
            elspeth_core::model::RunOutcome::CompletedWithErrors
        }
    }
}

/// Drives one source through a linear stage chain to one or more named
/// sinks.
pub struct Runner {
    run_id: RunId,
    config: Value,
    graph: ExecutionGraph,
    source: Box<dyn Source + Send>,
    source_node_id: NodeId,
    stages: Vec<Stage>,
    sinks: HashMap<String, Box<dyn Sink + Send>>,
    default_sink: String,
    landscape: Option<Arc<dyn LandscapeHandle>>,
    secrets: Option<(SecretsConfig, Arc<dyn KeyVaultClient>)>,
}

impl Runner {
    /// Build a runner. `sinks` must contain `default_sink`; every gate's
    /// route destination must also be a key in `sinks` or routing to it
    /// fails at run time.
    pub fn new(
        run_id: RunId,
        config: Value,
        graph: ExecutionGraph,
        source: Box<dyn Source + Send>,
        source_node_id: NodeId,
        stages: Vec<Stage>,
        sinks: HashMap<String, Box<dyn Sink + Send>>,
        default_sink: impl Into<String>,
        landscape: Option<Arc<dyn LandscapeHandle>>,
    ) -> Self {
        Self {
            run_id,
            config,
            graph,
            source,
            source_node_id,
            stages,
            sinks,
            default_sink: default_sink.into(),
            landscape,
            secrets: None,
        }
    }

    /// Resolve `config` through `client` at the start of [`Self::run`],
    /// recording one `secret_resolutions` row per secret through the
    /// landscape handle.
    pub fn with_secrets(mut self, config: SecretsConfig, client: Arc<dyn KeyVaultClient>) -> Self {
        self.secrets = Some((config, client));
        self
    }

    fn bare_ctx(&self, node_id: Option<NodeId>) -> PluginContext {
        let mut ctx = PluginContext::bare(self.run_id.clone(), self.config.clone());
        ctx.node_id = node_id;
        ctx.landscape = self.landscape.clone();
        ctx
    }

    /// Validate the DAG, resolve configured secrets, then run every row
    /// from the source to completion, returning accumulated stats.
    pub async fn run(&mut self) -> Result<RunStats> {
        self.graph.validate()?;
        self.resolve_secrets().await?;

        let start_ctx = self.bare_ctx(None);
        for sink in self.sinks.values_mut() {
            sink.on_start(&start_ctx).await?;
        }

        let mut stats = RunStats::default();

        while let Some(raw) = self.source.next_raw().await {
            self.process_one_source_row(raw, &mut stats).await?;
        }

        Ok(stats)
    }

    /// Resolve every configured secret and record one audit row per
    /// resolution, if a secrets backend was configured via
    /// [`Self::with_secrets`].
    async fn resolve_secrets(&self) -> Result<()> {
        let Some((config, client)) = &self.secrets else {
            return Ok(());
        };
        let resolutions =
            elspeth_secrets::load_secrets_from_config(self.run_id.clone(), config, client.as_ref()).await?;
        if let Some(landscape) = &self.landscape {
            for resolution in &resolutions {
                landscape.record_secret_resolution(resolution).await?;
            }
        }
        Ok(())
    }

    async fn process_one_source_row(&mut self, raw: Tier3Row, stats: &mut RunStats) -> Result<()> {
        let Some(contract) = self.source.schema_contract() else {
            // An OBSERVED source that quarantined every line so far never
            // locks a contract; nothing to coerce this row against.
            stats.rows_quarantined += 1;
            return Ok(());
        };

        let row = match coerce_row(&raw, &contract) {
            Ok(row) => row,
            Err(err) => {
                stats.rows_quarantined += 1;
                if let Some(landscape) = &self.landscape {
                    landscape
                        .record_validation_error(
                            &self.run_id,
                            &self.source_node_id,
                            &Value::Object(raw.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
                            &err.to_string(),
                            "coercion",
                            "discard",
                        )
                        .await?;
                }
                return Ok(());
            }
        };

        let row_id = RowId::generate();
        let token = TokenInfo {
            token_id: TokenId::generate(),
            row_id,
            row_data: row.clone(),
        };

        let mut queue = VecDeque::new();
        queue.push_back((0usize, row, token));

        while let Some((stage_idx, row, token)) = queue.pop_front() {
            self.process_one_token(stage_idx, row, token, &mut queue, stats).await?;
        }

        Ok(())
    }

    async fn process_one_token(
        &mut self,
        stage_idx: usize,
        row: PipelineRow,
        token: TokenInfo,
        queue: &mut VecDeque<(usize, PipelineRow, TokenInfo)>,
        stats: &mut RunStats,
    ) -> Result<()> {
        let Some(stage) = self.stages.get_mut(stage_idx) else {
            let default_sink = self.default_sink.clone();
            self.write_to_sink(&default_sink, &row, &token).await?;
            self.record_outcome(&token, OutcomeKind::Completed, Some(&default_sink), None).await?;
            stats.rows_completed += 1;
            return Ok(());
        };

        match stage {
            Stage::Transform(node_id, transform) => {
                let mut ctx = PluginContext::bare(self.run_id.clone(), self.config.clone());
                ctx.node_id = Some(node_id.clone());
                ctx.landscape = self.landscape.clone();
                ctx.token = Some(token.clone());

                let result: TransformResult = transform.process(row, &mut ctx).await;
                match result.outcome {
                    TransformOutcome::Success { rows, .. } => {
                        let next_rows = match rows {
                            TransformRows::Single(row) => vec![row],
                            TransformRows::Multi(rows) => rows,
                        };
                        if next_rows.len() > 1 {
                            let expand_group_id = elspeth_core::ids::ExpandGroupId::generate();
                            self.record_outcome(&token, OutcomeKind::Expanded, None, Some(expand_group_id))
                                .await?;
                            for row in next_rows {
                                let forked_token = TokenInfo {
                                    token_id: TokenId::generate(),
                                    row_id: token.row_id.clone(),
                                    row_data: row.clone(),
                                };
                                queue.push_back((stage_idx + 1, row, forked_token));
                            }
                        } else {
                            let row = next_rows.into_iter().next().expect("non-empty by TransformRows invariant");
                            queue.push_back((stage_idx + 1, row, token));
                        }
                    }
                    TransformOutcome::Error { reason, .. } => {
                        stats.rows_failed += 1;
                        if let Some(landscape) = &self.landscape {
                            landscape
                                .record_transform_error(
                                    &self.run_id,
                                    &token.token_id,
                                    node_id,
                                    &Value::Object(token.row_data.to_dict().into_iter().collect()),
                                    &reason,
                                    "discard",
                                )
                                .await?;
                        }
                        let error_hash = elspeth_hash::stable_hash(&reason).map_err(elspeth_core::error::Error::from)?;
                        self.record_failed_outcome(&token, error_hash).await?;
                    }
                }
            }
            Stage::Gate(_node_id, gate) => match gate.route(&row) {
                elspeth_core::routing::RoutingAction::Continue => {
                    queue.push_back((stage_idx + 1, row, token));
                }
                elspeth_core::routing::RoutingAction::Route { destinations } => {
                    for destination in destinations {
                        self.write_to_sink(&destination, &row, &token).await?;
                        self.record_outcome(&token, OutcomeKind::Routed, Some(&destination), None).await?;
                        stats.rows_routed += 1;
                    }
                }
            },
        }

        Ok(())
    }

    async fn write_to_sink(&mut self, name: &str, row: &PipelineRow, _token: &TokenInfo) -> Result<()> {
        let ctx = self.bare_ctx(None);
        let sink = self
            .sinks
            .get_mut(name)
            .ok_or_else(|| EngineError::InvalidOutputTarget {
                sink: name.to_string(),
                detail: "no sink registered under this name".to_string(),
            })?;
        sink.write(std::slice::from_ref(row), &ctx).await?;
        Ok(())
    }

    async fn record_outcome(
        &self,
        token: &TokenInfo,
        kind: OutcomeKind,
        sink_name: Option<&str>,
        expand_group_id: Option<elspeth_core::ids::ExpandGroupId>,
    ) -> Result<()> {
        let Some(landscape) = &self.landscape else { return Ok(()) };
        let context = OutcomeContext {
            sink_name: sink_name.map(str::to_string),
            expand_group_id,
            ..Default::default()
        };
        let outcome = TokenOutcome::new(kind, context)?;
        landscape.record_token_outcome(&self.run_id, &token.token_id, outcome).await?;
        Ok(())
    }

    async fn record_failed_outcome(&self, token: &TokenInfo, error_hash: String) -> Result<()> {
        let Some(landscape) = &self.landscape else { return Ok(()) };
        let context = OutcomeContext {
            error_hash: Some(error_hash),
            ..Default::default()
        };
        let outcome = TokenOutcome::new(OutcomeKind::Failed, context)?;
        landscape.record_token_outcome(&self.run_id, &token.token_id, outcome).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elspeth_core::contract::{FieldContract, FieldSource, FieldType, SchemaContract, SchemaMode};
    use elspeth_core::model::NodeType;
    use elspeth_dag::DagNode;
    use std::collections::BTreeMap;

    struct VecSource {
        rows: std::collections::VecDeque<BTreeMap<String, Value>>,
        contract: Arc<SchemaContract>,
    }

    #[async_trait::async_trait]
    impl Source for VecSource {
        async fn next_raw(&mut self) -> Option<Tier3Row> {
            self.rows.pop_front().map(Tier3Row::new)
        }

        fn schema_contract(&self) -> Option<Arc<SchemaContract>> {
            Some(self.contract.clone())
        }
    }

    struct DoubleTransform;

    #[async_trait::async_trait]
    impl elspeth_core::plugin::Transform for DoubleTransform {
        async fn process(&self, row: PipelineRow, _ctx: &mut PluginContext) -> TransformResult {
            let value = row.get("value").and_then(|v| v.as_i64()).unwrap_or(0);
            let mut fields = row.to_dict();
            fields.insert("value".to_string(), serde_json::json!(value * 2));
            let raw = Tier3Row::new(fields);
            let doubled = coerce_row(&raw, row.contract()).unwrap();
            TransformResult::success(doubled, serde_json::json!({"action": "doubled"}))
        }
    }

    struct CollectingSink {
        collected: std::sync::Arc<parking_lot::Mutex<Vec<Value>>>,
    }

    #[async_trait::async_trait]
    impl Sink for CollectingSink {
        async fn write(&mut self, rows: &[PipelineRow], _ctx: &PluginContext) -> elspeth_core::error::Result<()> {
            let mut collected = self.collected.lock();
            for row in rows {
                collected.push(Value::Object(row.to_dict().into_iter().collect()));
            }
            Ok(())
        }
    }

    fn int_contract() -> Arc<SchemaContract> {
        Arc::new(SchemaContract::new(
            SchemaMode::Flexible,
            vec![FieldContract {
                normalized_name: "value".to_string(),
                original_name: "value".to_string(),
                field_type: FieldType::Int,
                required: true,
                source: FieldSource::Declared,
            }],
        ))
    }

    #[tokio::test]
    async fn runs_rows_through_a_transform_into_the_default_sink() {
        let contract = int_contract();
        let source = Box::new(VecSource {
            rows: std::collections::VecDeque::from([
                BTreeMap::from([("value".to_string(), serde_json::json!(1))]),
                BTreeMap::from([("value".to_string(), serde_json::json!(2))]),
            ]),
            contract: contract.clone(),
        });

        let mut graph = ExecutionGraph::new();
        let source_id = NodeId::from_known("source_1");
        let transform_id = NodeId::from_known("transform_1");
        let sink_id = NodeId::from_known("sink_1");
        graph.add_node(DagNode {
            node_id: source_id.clone(),
            node_type: NodeType::Source,
            plugin_name: "vec_source".to_string(),
            guaranteed_fields: std::collections::BTreeSet::from(["value".to_string()]),
            required_fields: std::collections::BTreeSet::new(),
            produced_artifacts: std::collections::BTreeSet::new(),
            consumed_artifacts: std::collections::BTreeSet::new(),
        });
        graph.add_node(DagNode {
            node_id: transform_id.clone(),
            node_type: NodeType::Transform,
            plugin_name: "doubler".to_string(),
            guaranteed_fields: std::collections::BTreeSet::from(["value".to_string()]),
            required_fields: std::collections::BTreeSet::from(["value".to_string()]),
            produced_artifacts: std::collections::BTreeSet::new(),
            consumed_artifacts: std::collections::BTreeSet::new(),
        });
        graph.add_node(DagNode {
            node_id: sink_id.clone(),
            node_type: NodeType::Sink,
            plugin_name: "collecting_sink".to_string(),
            guaranteed_fields: std::collections::BTreeSet::new(),
            required_fields: std::collections::BTreeSet::new(),
            produced_artifacts: std::collections::BTreeSet::new(),
            consumed_artifacts: std::collections::BTreeSet::new(),
        });
        graph.add_edge(&source_id, &transform_id).unwrap();
        graph.add_edge(&transform_id, &sink_id).unwrap();

        let collected = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut sinks: HashMap<String, Box<dyn Sink + Send>> = HashMap::new();
        sinks.insert(
            "default".to_string(),
            Box::new(CollectingSink {
                collected: collected.clone(),
            }),
        );

        let mut runner = Runner::new(
            RunId::generate(),
            serde_json::json!({}),
            graph,
            source,
            source_id,
            vec![Stage::Transform(transform_id, Box::new(DoubleTransform))],
            sinks,
            "default",
            None,
        );

        let stats = runner.run().await.unwrap();
        assert_eq!(stats.rows_completed, 2);
        assert_eq!(stats.rows_quarantined, 0);
        let values: Vec<i64> = collected.lock().iter().map(|v| v["value"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![2, 4]);
    }

    struct EmptySource;

    #[async_trait::async_trait]
    impl Source for EmptySource {
        async fn next_raw(&mut self) -> Option<Tier3Row> {
            None
        }

        fn schema_contract(&self) -> Option<Arc<SchemaContract>> {
            None
        }
    }

    struct FakeKeyVaultClient;

    #[async_trait::async_trait]
    impl KeyVaultClient for FakeKeyVaultClient {
        async fn get_secret(
            &self,
            _vault_url: &str,
            secret_name: &str,
            _env_var_name: &str,
        ) -> elspeth_secrets::error::Result<String> {
            Ok(format!("value-for-{secret_name}"))
        }
    }

    #[derive(Default)]
    struct RecordingLandscape {
        resolutions: parking_lot::Mutex<Vec<elspeth_core::model::SecretResolution>>,
    }

    #[async_trait::async_trait]
    impl LandscapeHandle for RecordingLandscape {
        async fn record_call(
            &self,
            _state_id: &elspeth_core::ids::StateId,
            _call_type: elspeth_core::model::CallType,
            _status: elspeth_core::model::CallStatus,
            _request_data: &Value,
            _response_data: Option<&Value>,
            _error: Option<&Value>,
            _latency_ms: Option<u64>,
        ) -> elspeth_core::error::Result<()> {
            Ok(())
        }

        async fn record_validation_error(
            &self,
            _run_id: &RunId,
            _node_id: &NodeId,
            _row_data: &Value,
            _error: &str,
            _schema_mode: &str,
            _destination: &str,
        ) -> elspeth_core::error::Result<()> {
            Ok(())
        }

        async fn record_transform_error(
            &self,
            _run_id: &RunId,
            _token_id: &TokenId,
            _transform_id: &NodeId,
            _row_data: &Value,
            _error_details: &Value,
            _destination: &str,
        ) -> elspeth_core::error::Result<()> {
            Ok(())
        }

        async fn record_token_outcome(
            &self,
            _run_id: &RunId,
            _token_id: &TokenId,
            _outcome: elspeth_core::results::TokenOutcome,
        ) -> elspeth_core::error::Result<()> {
            Ok(())
        }

        async fn get_checkpoint(&self, _node_id: &NodeId) -> elspeth_core::error::Result<Option<Value>> {
            Ok(None)
        }

        async fn update_checkpoint(&self, _node_id: &NodeId, _merge: Value) -> elspeth_core::error::Result<()> {
            Ok(())
        }

        async fn clear_checkpoint(&self, _node_id: &NodeId) -> elspeth_core::error::Result<()> {
            Ok(())
        }

        async fn record_secret_resolution(
            &self,
            resolution: &elspeth_core::model::SecretResolution,
        ) -> elspeth_core::error::Result<()> {
            self.resolutions.lock().push(resolution.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_resolves_configured_secrets_and_records_them() {
        std::env::set_var(elspeth_hash::FINGERPRINT_KEY_ENV, "test-fingerprint-key");

        let mut graph = ExecutionGraph::new();
        let source_id = NodeId::from_known("source_1");
        let sink_id = NodeId::from_known("sink_1");
        graph.add_node(DagNode {
            node_id: source_id.clone(),
            node_type: NodeType::Source,
            plugin_name: "empty_source".to_string(),
            guaranteed_fields: std::collections::BTreeSet::new(),
            required_fields: std::collections::BTreeSet::new(),
            produced_artifacts: std::collections::BTreeSet::new(),
            consumed_artifacts: std::collections::BTreeSet::new(),
        });
        graph.add_node(DagNode {
            node_id: sink_id.clone(),
            node_type: NodeType::Sink,
            plugin_name: "collecting_sink".to_string(),
            guaranteed_fields: std::collections::BTreeSet::new(),
            required_fields: std::collections::BTreeSet::new(),
            produced_artifacts: std::collections::BTreeSet::new(),
            consumed_artifacts: std::collections::BTreeSet::new(),
        });
        graph.add_edge(&source_id, &sink_id).unwrap();

        let mut sinks: HashMap<String, Box<dyn Sink + Send>> = HashMap::new();
        sinks.insert(
            "default".to_string(),
            Box::new(CollectingSink { collected: std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())) }),
        );

        let landscape = Arc::new(RecordingLandscape::default());
        let mapping = BTreeMap::from([("MY_SECRET".to_string(), "my-secret-name".to_string())]);
        let secrets_config = SecretsConfig {
            source: elspeth_core::model::SecretSource::Keyvault,
            vault_url: Some("https://vault.example.com".to_string()),
            mapping,
        };

        let mut runner = Runner::new(
            RunId::generate(),
            serde_json::json!({}),
            graph,
            Box::new(EmptySource),
            source_id,
            Vec::new(),
            sinks,
            "default",
            Some(landscape.clone() as Arc<dyn LandscapeHandle>),
        )
        .with_secrets(secrets_config, Arc::new(FakeKeyVaultClient));

        runner.run().await.unwrap();

        assert_eq!(std::env::var("MY_SECRET").unwrap(), "value-for-my-secret-name");
        let recorded = landscape.resolutions.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].env_var_name, "MY_SECRET");

        std::env::remove_var("MY_SECRET");
        std::env::remove_var(elspeth_hash::FINGERPRINT_KEY_ENV);
    }
}
