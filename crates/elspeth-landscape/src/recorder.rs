//! The append-only audit recorder.
//!
//! Every write here is one of the operations spec'd in the identity &
//! lineage model: a run starts, a node registers, a row is ingested, a
//! token moves through the DAG and eventually reaches a terminal outcome.
//! Nothing here mutates a row already written except the two contract
//! columns (`runs.schema_contract_json`/`hash` and the matching node
//! columns), which transition exactly once from NULL to a locked value.
//!
//! Queries are built with runtime `sqlx::query`/`query_as` rather than the
//! compile-time `sqlx::query!` macro: the macro checks each query against a
//! live database (or an offline `.sqlx` cache) at `cargo build` time, which
//! this workspace cannot produce without running the toolchain.

use crate::error::{Error, Result};
use chrono::Utc;
use elspeth_core::contract::SchemaContract;
use elspeth_core::ids::{
    BatchId, CallId, ExpandGroupId, ForkGroupId, JoinGroupId, NodeId, OperationId, OutcomeId,
    RowId, RunId, StateId, TokenId, TransformErrorId, ValidationErrorId,
};
use elspeth_core::model::{
    Batch, CallStatus, CallType, ExternalCall, Node, NodeState, NodeStateStatus, NodeType,
    OperationCall, Row as ModelRow, Run, RunStatus, SecretResolution, SecretSource, Token,
    TransformError, ValidationError,
};
use elspeth_core::results::TokenOutcome;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row as _;

/// Handle onto the audit database. Cheap to clone (wraps a connection
/// pool); share one instance across a run.
#[derive(Debug, Clone)]
pub struct Landscape {
    pool: SqlitePool,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

impl Landscape {
    /// Connect to `database_url` (e.g. `sqlite://elspeth.db`), enable WAL
    /// mode, and run any pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an already-open pool, for callers that build their own
    /// (tests, or a binary sharing a pool across subsystems).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- runs -----------------------------------------------------

    /// Start a new run.
    pub async fn begin_run(&self, config_snapshot: Value, canonical_version: String) -> Result<Run> {
        let run_id = RunId::generate();
        let created_at = Utc::now();
        let config_json = serde_json::to_string(&config_snapshot)?;

        sqlx::query(
            "INSERT INTO runs (run_id, canonical_version, config_json, status, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run_id.as_str())
        .bind(&canonical_version)
        .bind(&config_json)
        .bind("running")
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Run {
            run_id,
            config_snapshot,
            canonical_version,
            schema_contract_hash: None,
            status: RunStatus::Running,
            created_at,
            finished_at: None,
            audit_payload: None,
        })
    }

    /// Mark a run terminal.
    pub async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        audit_payload: Option<Value>,
    ) -> Result<()> {
        let status_str = match status {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        let audit_json = audit_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "UPDATE runs SET status = ?, finished_at = ?, audit_payload_json = ? WHERE run_id = ?",
        )
        .bind(status_str)
        .bind(now_rfc3339())
        .bind(audit_json)
        .bind(run_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set the run-level schema contract. Errors if one is already locked
    /// and stored.
    pub async fn update_run_contract(&self, run_id: &RunId, contract: &SchemaContract) -> Result<()> {
        let existing: Option<String> =
            sqlx::query("SELECT schema_contract_hash FROM runs WHERE run_id = ?")
                .bind(run_id.as_str())
                .fetch_optional(&self.pool)
                .await?
                .and_then(|row| row.try_get(0).ok());

        if existing.is_some() {
            return Err(Error::ContractAlreadyLocked {
                scope: format!("run {run_id}"),
            });
        }

        let hash = contract.version_hash()?;
        let body = serde_json::to_string(contract)?;
        sqlx::query(
            "UPDATE runs SET schema_contract_json = ?, schema_contract_hash = ? WHERE run_id = ?",
        )
        .bind(&body)
        .bind(&hash)
        .bind(run_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the run-level schema contract, if one has been set, verifying
    /// its stored hash still matches its body.
    pub async fn get_run_contract(&self, run_id: &RunId) -> Result<Option<SchemaContract>> {
        let row = sqlx::query(
            "SELECT schema_contract_json, schema_contract_hash FROM runs WHERE run_id = ?",
        )
        .bind(run_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(Error::NotFound {
                kind: "run",
                id: run_id.to_string(),
            });
        };

        let body: Option<String> = row.try_get(0)?;
        let stored_hash: Option<String> = row.try_get(1)?;
        let (Some(body), Some(stored_hash)) = (body, stored_hash) else {
            return Ok(None);
        };

        let contract: SchemaContract = serde_json::from_str(&body)?;
        let recomputed = contract.version_hash()?;
        if recomputed != stored_hash {
            return Err(Error::ContractHashMismatch {
                scope: format!("run {run_id}"),
                stored: stored_hash,
                recomputed,
            });
        }
        Ok(Some(contract))
    }

    // ---- nodes ------------------------------------------------------

    /// Register a node instance for this run.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_node(
        &self,
        run_id: &RunId,
        plugin_name: String,
        node_type: NodeType,
        plugin_version: String,
        config_snapshot: Value,
        schema_config: Option<Value>,
        sequence: u32,
    ) -> Result<Node> {
        let node_id = NodeId::generate();
        let node_type_str = node_type_to_str(node_type);
        let config_json = serde_json::to_string(&config_snapshot)?;
        let schema_config_json = schema_config.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO nodes
                (node_id, run_id, plugin_name, node_type, plugin_version, config_json,
                 schema_config_json, sequence_ordinal)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(node_id.as_str())
        .bind(run_id.as_str())
        .bind(&plugin_name)
        .bind(node_type_str)
        .bind(&plugin_version)
        .bind(&config_json)
        .bind(&schema_config_json)
        .bind(sequence)
        .execute(&self.pool)
        .await?;

        Ok(Node {
            node_id,
            run_id: run_id.clone(),
            plugin_name,
            node_type,
            plugin_version,
            config_snapshot,
            schema_config,
            input_contract_hash: None,
            output_contract_hash: None,
            sequence,
        })
    }

    /// Lock and store a node's input contract.
    pub async fn update_node_input_contract(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        contract: &SchemaContract,
    ) -> Result<()> {
        self.update_node_contract(run_id, node_id, contract, true).await
    }

    /// Lock and store a node's output contract.
    pub async fn update_node_output_contract(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        contract: &SchemaContract,
    ) -> Result<()> {
        self.update_node_contract(run_id, node_id, contract, false).await
    }

    async fn update_node_contract(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        contract: &SchemaContract,
        is_input: bool,
    ) -> Result<()> {
        let (json_col, hash_col) = if is_input {
            ("input_contract_json", "input_contract_hash")
        } else {
            ("output_contract_json", "output_contract_hash")
        };

        let existing: Option<String> = sqlx::query(&format!(
            "SELECT {hash_col} FROM nodes WHERE node_id = ? AND run_id = ?"
        ))
        .bind(node_id.as_str())
        .bind(run_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .and_then(|row| row.try_get(0).ok());

        if existing.is_some() {
            return Err(Error::ContractAlreadyLocked {
                scope: format!("node {node_id} ({})", if is_input { "input" } else { "output" }),
            });
        }

        let hash = contract.version_hash()?;
        let body = serde_json::to_string(contract)?;
        sqlx::query(&format!(
            "UPDATE nodes SET {json_col} = ?, {hash_col} = ? WHERE node_id = ? AND run_id = ?"
        ))
        .bind(&body)
        .bind(&hash)
        .bind(node_id.as_str())
        .bind(run_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a node's (input, output) contracts, each verified against its
    /// stored hash.
    pub async fn get_node_contracts(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
    ) -> Result<(Option<SchemaContract>, Option<SchemaContract>)> {
        let row = sqlx::query(
            "SELECT input_contract_json, input_contract_hash,
                    output_contract_json, output_contract_hash
             FROM nodes WHERE node_id = ? AND run_id = ?",
        )
        .bind(node_id.as_str())
        .bind(run_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(Error::NotFound {
                kind: "node",
                id: node_id.to_string(),
            });
        };

        let input = decode_contract(
            row.try_get(0)?,
            row.try_get(1)?,
            || format!("node {node_id} (input)"),
        )?;
        let output = decode_contract(
            row.try_get(2)?,
            row.try_get(3)?,
            || format!("node {node_id} (output)"),
        )?;
        Ok((input, output))
    }

    // ---- rows & tokens ------------------------------------------------

    /// Record a newly ingested row.
    pub async fn create_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        source_data: &Value,
    ) -> Result<ModelRow> {
        let row_id = RowId::generate();
        let created_at = Utc::now();
        let source_data_hash = elspeth_hash::stable_hash(source_data)?;

        sqlx::query(
            "INSERT INTO rows (row_id, run_id, source_node_id, row_index, source_data_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row_id.as_str())
        .bind(run_id.as_str())
        .bind(source_node_id.as_str())
        .bind(row_index as i64)
        .bind(&source_data_hash)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(ModelRow {
            row_id,
            run_id: run_id.clone(),
            source_node_id: source_node_id.clone(),
            row_index,
            source_data_hash,
            created_at,
        })
    }

    /// Create the first token for a row.
    pub async fn create_token(&self, row_id: &RowId, branch_name: Option<String>) -> Result<Token> {
        self.insert_token(row_id, branch_name, None, None, None, 0).await
    }

    async fn insert_token(
        &self,
        row_id: &RowId,
        branch_name: Option<String>,
        fork_group_id: Option<ForkGroupId>,
        join_group_id: Option<JoinGroupId>,
        expand_group_id: Option<ExpandGroupId>,
        step_in_pipeline: u32,
    ) -> Result<Token> {
        let token_id = TokenId::generate();
        sqlx::query(
            "INSERT INTO tokens
                (token_id, row_id, branch_name, fork_group_id, join_group_id, expand_group_id, step_in_pipeline)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(token_id.as_str())
        .bind(row_id.as_str())
        .bind(&branch_name)
        .bind(fork_group_id.as_ref().map(ForkGroupId::as_str))
        .bind(join_group_id.as_ref().map(JoinGroupId::as_str))
        .bind(expand_group_id.as_ref().map(ExpandGroupId::as_str))
        .bind(step_in_pipeline)
        .execute(&self.pool)
        .await?;

        Ok(Token {
            token_id,
            row_id: row_id.clone(),
            branch_name,
            fork_group_id,
            join_group_id,
            expand_group_id,
            step_in_pipeline,
        })
    }

    /// Split a token into one child token per branch, atomically recording
    /// the parent's `FORKED` outcome in the same transaction (the Open
    /// Question decision: fork is one unit, never half-written).
    pub async fn fork_token(
        &self,
        run_id: &RunId,
        parent_token_id: &TokenId,
        row_id: &RowId,
        branch_names: Vec<String>,
        step_in_pipeline: u32,
    ) -> Result<(Vec<Token>, ForkGroupId)> {
        let fork_group_id = ForkGroupId::generate();
        let mut tx = self.pool.begin().await?;
        let mut children = Vec::with_capacity(branch_names.len());

        for branch_name in branch_names {
            let token_id = TokenId::generate();
            sqlx::query(
                "INSERT INTO tokens
                    (token_id, row_id, branch_name, fork_group_id, step_in_pipeline)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(token_id.as_str())
            .bind(row_id.as_str())
            .bind(&branch_name)
            .bind(fork_group_id.as_str())
            .bind(step_in_pipeline)
            .execute(&mut *tx)
            .await?;

            children.push(Token {
                token_id,
                row_id: row_id.clone(),
                branch_name: Some(branch_name),
                fork_group_id: Some(fork_group_id.clone()),
                join_group_id: None,
                expand_group_id: None,
                step_in_pipeline,
            });
        }

        let outcome = TokenOutcome::new(
            elspeth_core::model::OutcomeKind::Forked,
            elspeth_core::results::OutcomeContext {
                fork_group_id: Some(fork_group_id.clone()),
                ..Default::default()
            },
        )?;
        insert_outcome(&mut tx, run_id, parent_token_id, &outcome).await?;

        tx.commit().await?;
        Ok((children, fork_group_id))
    }

    /// Expand a token into `count` copies, atomically recording the
    /// parent's `EXPANDED` outcome.
    pub async fn expand_token(
        &self,
        run_id: &RunId,
        parent_token_id: &TokenId,
        row_id: &RowId,
        count: u32,
        step_in_pipeline: u32,
    ) -> Result<(Vec<Token>, ExpandGroupId)> {
        let expand_group_id = ExpandGroupId::generate();
        let mut tx = self.pool.begin().await?;
        let mut children = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let token_id = TokenId::generate();
            sqlx::query(
                "INSERT INTO tokens (token_id, row_id, expand_group_id, step_in_pipeline)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(token_id.as_str())
            .bind(row_id.as_str())
            .bind(expand_group_id.as_str())
            .bind(step_in_pipeline)
            .execute(&mut *tx)
            .await?;

            children.push(Token {
                token_id,
                row_id: row_id.clone(),
                branch_name: None,
                fork_group_id: None,
                join_group_id: None,
                expand_group_id: Some(expand_group_id.clone()),
                step_in_pipeline,
            });
        }

        let outcome = TokenOutcome::new(
            elspeth_core::model::OutcomeKind::Expanded,
            elspeth_core::results::OutcomeContext {
                expand_group_id: Some(expand_group_id.clone()),
                ..Default::default()
            },
        )?;
        insert_outcome(&mut tx, run_id, parent_token_id, &outcome).await?;

        tx.commit().await?;
        Ok((children, expand_group_id))
    }

    /// Merge several parent tokens into one, atomically recording each
    /// parent's `COALESCED` outcome.
    pub async fn coalesce_tokens(
        &self,
        run_id: &RunId,
        parent_token_ids: &[TokenId],
        row_id: &RowId,
        sink_name: String,
        step_in_pipeline: u32,
    ) -> Result<(Token, JoinGroupId)> {
        let join_group_id = JoinGroupId::generate();
        let mut tx = self.pool.begin().await?;

        let merged_id = TokenId::generate();
        sqlx::query(
            "INSERT INTO tokens (token_id, row_id, join_group_id, step_in_pipeline)
             VALUES (?, ?, ?, ?)",
        )
        .bind(merged_id.as_str())
        .bind(row_id.as_str())
        .bind(join_group_id.as_str())
        .bind(step_in_pipeline)
        .execute(&mut *tx)
        .await?;

        for parent_token_id in parent_token_ids {
            let outcome = TokenOutcome::new(
                elspeth_core::model::OutcomeKind::Coalesced,
                elspeth_core::results::OutcomeContext {
                    sink_name: Some(sink_name.clone()),
                    join_group_id: Some(join_group_id.clone()),
                    ..Default::default()
                },
            )?;
            insert_outcome(&mut tx, run_id, parent_token_id, &outcome).await?;
        }

        tx.commit().await?;

        Ok((
            Token {
                token_id: merged_id,
                row_id: row_id.clone(),
                branch_name: None,
                fork_group_id: None,
                join_group_id: Some(join_group_id.clone()),
                expand_group_id: None,
                step_in_pipeline,
            },
            join_group_id,
        ))
    }

    // ---- node states & calls ------------------------------------------

    /// Begin one node's execution for a given token.
    pub async fn begin_node_state(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        step_index: u32,
        input_data: &Value,
    ) -> Result<NodeState> {
        let state_id = StateId::generate();
        let started_at = Utc::now();
        let input_data_hash = elspeth_hash::stable_hash(input_data)?;

        sqlx::query(
            "INSERT INTO node_states
                (state_id, token_id, node_id, run_id, step_index, input_data_hash, status, started_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(state_id.as_str())
        .bind(token_id.as_str())
        .bind(node_id.as_str())
        .bind(run_id.as_str())
        .bind(step_index)
        .bind(&input_data_hash)
        .bind("running")
        .bind(started_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(NodeState {
            state_id,
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            run_id: run_id.clone(),
            step_index,
            input_data_hash,
            output_fields: None,
            status: NodeStateStatus::Running,
            started_at,
            ended_at: None,
        })
    }

    /// Mark a node state terminal, with its output fields.
    pub async fn finish_node_state(
        &self,
        state_id: &StateId,
        status: NodeStateStatus,
        output_fields: Option<Value>,
    ) -> Result<()> {
        let status_str = match status {
            NodeStateStatus::Running => "running",
            NodeStateStatus::Success => "success",
            NodeStateStatus::Error => "error",
        };
        let output_json = output_fields.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "UPDATE node_states SET status = ?, ended_at = ?, output_fields_json = ? WHERE state_id = ?",
        )
        .bind(status_str)
        .bind(now_rfc3339())
        .bind(output_json)
        .bind(state_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically allocate the next `call_index` for a node state. Backed
    /// by a dedicated counter table so concurrent callers racing on the
    /// same `state_id` never collide.
    pub async fn allocate_call_index(&self, state_id: &StateId) -> Result<u32> {
        let row = sqlx::query(
            "INSERT INTO call_index_counters (state_id, next_index) VALUES (?, 1)
             ON CONFLICT(state_id) DO UPDATE SET next_index = next_index + 1
             RETURNING next_index - 1",
        )
        .bind(state_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        let index: i64 = row.try_get(0)?;
        Ok(index as u32)
    }

    /// Record one external call made inside a node state.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_call(
        &self,
        state_id: &StateId,
        call_index: u32,
        call_type: CallType,
        status: CallStatus,
        request: &Value,
        response: Option<&Value>,
        error: Option<&Value>,
        latency_ms: Option<u64>,
        request_ref: Option<String>,
        response_ref: Option<String>,
        run_id: &RunId,
    ) -> Result<ExternalCall> {
        let call_id = CallId::generate();
        let request_hash = elspeth_hash::stable_hash(request)?;
        let response_hash = response.map(elspeth_hash::stable_hash).transpose()?;
        let error_json = error.map(serde_json::to_string).transpose()?;

        let insert = sqlx::query(
            "INSERT INTO calls
                (call_id, state_id, call_index, call_type, status, request_hash,
                 response_hash, error_json, latency_ms, request_ref, response_ref, run_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(call_id.as_str())
        .bind(state_id.as_str())
        .bind(call_index)
        .bind(call_type_to_str(call_type))
        .bind(call_status_to_str(status))
        .bind(&request_hash)
        .bind(&response_hash)
        .bind(&error_json)
        .bind(latency_ms.map(|v| v as i64))
        .bind(&request_ref)
        .bind(&response_ref)
        .bind(run_id.as_str())
        .execute(&self.pool)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &insert {
            if db_err.is_unique_violation() {
                return Err(Error::DuplicateCallIndex {
                    state_id: state_id.to_string(),
                    call_index: call_index as i64,
                });
            }
        }
        insert?;

        Ok(ExternalCall {
            call_id,
            state_id: state_id.clone(),
            call_index,
            call_type,
            status,
            request_hash,
            response_hash,
            error: error.cloned(),
            latency_ms,
            request_ref,
            response_ref,
        })
    }

    /// Record one call made outside a row's state (e.g. plugin setup).
    pub async fn record_operation_call(
        &self,
        run_id: &RunId,
        node_id: Option<&NodeId>,
        call_type: CallType,
        status: CallStatus,
        request: &Value,
        response: Option<&Value>,
    ) -> Result<OperationCall> {
        let operation_id = OperationId::generate();
        let request_hash = elspeth_hash::stable_hash(request)?;
        let response_hash = response.map(elspeth_hash::stable_hash).transpose()?;

        sqlx::query(
            "INSERT INTO calls
                (call_id, operation_id, call_index, call_type, status, request_hash, response_hash, run_id)
             VALUES (?, ?, 0, ?, ?, ?, ?, ?)",
        )
        .bind(operation_id.as_str())
        .bind(operation_id.as_str())
        .bind(call_type_to_str(call_type))
        .bind(call_status_to_str(status))
        .bind(&request_hash)
        .bind(&response_hash)
        .bind(run_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(OperationCall {
            operation_id,
            run_id: run_id.clone(),
            node_id: node_id.cloned(),
            call_type,
            status,
            request_hash,
            response_hash,
        })
    }

    /// Fetch every call recorded for a node state, in `call_index` order.
    pub async fn get_calls(&self, state_id: &StateId) -> Result<Vec<ExternalCall>> {
        let rows = sqlx::query(
            "SELECT call_id, call_index, call_type, status, request_hash, response_hash,
                    error_json, latency_ms, request_ref, response_ref
             FROM calls WHERE state_id = ? ORDER BY call_index ASC",
        )
        .bind(state_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ExternalCall> {
                let error_json: Option<String> = row.try_get(6)?;
                Ok(ExternalCall {
                    call_id: CallId::from_known(row.try_get::<String, _>(0)?),
                    state_id: state_id.clone(),
                    call_index: row.try_get::<i64, _>(1)? as u32,
                    call_type: str_to_call_type(&row.try_get::<String, _>(2)?)?,
                    status: str_to_call_status(&row.try_get::<String, _>(3)?)?,
                    request_hash: row.try_get(4)?,
                    response_hash: row.try_get(5)?,
                    error: error_json.map(|s| serde_json::from_str(&s)).transpose()?,
                    latency_ms: row.try_get::<Option<i64>, _>(7)?.map(|v| v as u64),
                    request_ref: row.try_get(8)?,
                    response_ref: row.try_get(9)?,
                })
            })
            .collect()
    }

    /// Find a prior call by its exact request hash, scoped to a run (node
    /// ids are reused across runs, so the hash alone is not unique).
    pub async fn find_call_by_request_hash(
        &self,
        run_id: &RunId,
        call_type: CallType,
        request_hash: &str,
    ) -> Result<Option<ExternalCall>> {
        let row = sqlx::query(
            "SELECT call_id, state_id, call_index, status, response_hash,
                    error_json, latency_ms, request_ref, response_ref
             FROM calls
             WHERE run_id = ? AND call_type = ? AND request_hash = ? AND state_id IS NOT NULL
             LIMIT 1",
        )
        .bind(run_id.as_str())
        .bind(call_type_to_str(call_type))
        .bind(request_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let error_json: Option<String> = row.try_get(5)?;
        Ok(Some(ExternalCall {
            call_id: CallId::from_known(row.try_get::<String, _>(0)?),
            state_id: StateId::from_known(row.try_get::<String, _>(1)?),
            call_index: row.try_get::<i64, _>(2)? as u32,
            call_type,
            status: str_to_call_status(&row.try_get::<String, _>(3)?)?,
            request_hash: request_hash.to_string(),
            response_hash: row.try_get(4)?,
            error: error_json.map(|s| serde_json::from_str(&s)).transpose()?,
            latency_ms: row.try_get::<Option<i64>, _>(6)?.map(|v| v as u64),
            request_ref: row.try_get(7)?,
            response_ref: row.try_get(8)?,
        }))
    }

    // ---- outcomes -------------------------------------------------------

    /// Record a token's outcome at a join point. Rejects recording a
    /// second, different terminal outcome for a token that already has one.
    pub async fn record_token_outcome(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        outcome: &TokenOutcome,
    ) -> Result<OutcomeId> {
        if outcome.is_terminal() {
            if let Some(existing) = self.get_token_outcome(token_id).await? {
                if existing.is_terminal() && existing.kind != outcome.kind {
                    return Err(Error::TerminalOutcomeImmutable {
                        token_id: token_id.to_string(),
                        existing: existing.kind,
                        attempted: outcome.kind,
                    });
                }
            }
        }
        let mut tx = self.pool.begin().await?;
        let outcome_id = insert_outcome(&mut tx, run_id, token_id, outcome).await?;
        tx.commit().await?;
        Ok(outcome_id)
    }

    /// Fetch a token's outcome, preferring a terminal one if both a
    /// terminal and non-terminal (e.g. `BUFFERED`) row exist.
    pub async fn get_token_outcome(&self, token_id: &TokenId) -> Result<Option<TokenOutcome>> {
        let rows = sqlx::query(
            "SELECT outcome_kind, is_terminal, sink_name, fork_group_id, join_group_id,
                    expand_group_id, error_hash, batch_id
             FROM token_outcomes WHERE token_id = ? ORDER BY is_terminal DESC, recorded_at DESC",
        )
        .bind(token_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let kind = str_to_outcome_kind(&row.try_get::<String, _>(0)?)?;
        let context = elspeth_core::results::OutcomeContext {
            sink_name: row.try_get(2)?,
            fork_group_id: row
                .try_get::<Option<String>, _>(3)?
                .map(ForkGroupId::from_known),
            join_group_id: row
                .try_get::<Option<String>, _>(4)?
                .map(JoinGroupId::from_known),
            expand_group_id: row
                .try_get::<Option<String>, _>(5)?
                .map(ExpandGroupId::from_known),
            error_hash: row.try_get(6)?,
            batch_id: row.try_get::<Option<String>, _>(7)?.map(BatchId::from_known),
        };
        Ok(Some(TokenOutcome::new(kind, context)?))
    }

    // ---- errors ----------------------------------------------------------

    /// Record a row rejected at a source boundary.
    pub async fn record_validation_error(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        row_data: &Value,
        error: String,
        schema_mode: &str,
        destination: String,
        contract_violation: Option<Value>,
    ) -> Result<ValidationError> {
        let error_id = ValidationErrorId::generate();
        let row_data_json = serde_json::to_string(row_data)?;
        let violation_json = contract_violation.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO validation_errors
                (error_id, run_id, node_id, row_data_json, error, schema_mode, destination,
                 contract_violation_json, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(error_id.as_str())
        .bind(run_id.as_str())
        .bind(node_id.as_str())
        .bind(&row_data_json)
        .bind(&error)
        .bind(schema_mode)
        .bind(&destination)
        .bind(&violation_json)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(ValidationError {
            error_id,
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            row_data: row_data.clone(),
            error,
            schema_mode: schema_mode.to_string(),
            destination,
            contract_violation,
        })
    }

    /// Record a token rejected at a transform.
    pub async fn record_transform_error(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        transform_id: &NodeId,
        row_data: &Value,
        error_details: Value,
        destination: String,
    ) -> Result<TransformError> {
        let error_id = TransformErrorId::generate();
        let row_data_json = serde_json::to_string(row_data)?;
        let details_json = serde_json::to_string(&error_details)?;

        sqlx::query(
            "INSERT INTO transform_errors
                (error_id, run_id, token_id, transform_id, row_data_json, error_details_json,
                 destination, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(error_id.as_str())
        .bind(run_id.as_str())
        .bind(token_id.as_str())
        .bind(transform_id.as_str())
        .bind(&row_data_json)
        .bind(&details_json)
        .bind(&destination)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(TransformError {
            error_id,
            run_id: run_id.clone(),
            token_id: token_id.clone(),
            transform_id: transform_id.clone(),
            row_data: row_data.clone(),
            error_details,
            destination,
        })
    }

    /// Fetch every validation error recorded for a run.
    pub async fn get_validation_errors_for_run(&self, run_id: &RunId) -> Result<Vec<ValidationError>> {
        let rows = sqlx::query(
            "SELECT error_id, node_id, row_data_json, error, schema_mode, destination, contract_violation_json
             FROM validation_errors WHERE run_id = ? ORDER BY recorded_at ASC",
        )
        .bind(run_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| decode_validation_error(row, run_id))
            .collect()
    }

    /// Fetch the transform errors recorded for one token.
    pub async fn get_transform_errors_for_token(&self, token_id: &TokenId) -> Result<Vec<TransformError>> {
        let rows = sqlx::query(
            "SELECT error_id, run_id, transform_id, row_data_json, error_details_json, destination
             FROM transform_errors WHERE token_id = ? ORDER BY recorded_at ASC",
        )
        .bind(token_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| decode_transform_error(row, token_id))
            .collect()
    }

    /// Fetch every transform error recorded for a run.
    pub async fn get_transform_errors_for_run(&self, run_id: &RunId) -> Result<Vec<TransformError>> {
        let rows = sqlx::query(
            "SELECT error_id, token_id, transform_id, row_data_json, error_details_json, destination
             FROM transform_errors WHERE run_id = ? ORDER BY recorded_at ASC",
        )
        .bind(run_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| -> Result<TransformError> {
                let token_id = TokenId::from_known(row.try_get::<String, _>(1)?);
                decode_transform_error(row, &token_id)
            })
            .collect()
    }

    // ---- batches -------------------------------------------------------

    /// Create a new batch under a node.
    pub async fn create_batch(&self, run_id: &RunId, node_id: &NodeId) -> Result<Batch> {
        let batch_id = BatchId::generate();
        sqlx::query("INSERT INTO batches (batch_id, node_id, run_id, member_count) VALUES (?, ?, ?, 0)")
            .bind(batch_id.as_str())
            .bind(node_id.as_str())
            .bind(run_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(Batch {
            batch_id,
            node_id: node_id.clone(),
            run_id: run_id.clone(),
            member_count: 0,
        })
    }

    /// Look up the run a node state belongs to (a `LandscapeHandle` call is
    /// keyed only by `state_id`; the recorder resolves `run_id` itself).
    pub async fn run_id_for_state(&self, state_id: &StateId) -> Result<RunId> {
        let row = sqlx::query("SELECT run_id FROM node_states WHERE state_id = ?")
            .bind(state_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(Error::NotFound {
                kind: "node_state",
                id: state_id.to_string(),
            });
        };
        Ok(RunId::from_known(row.try_get::<String, _>(0)?))
    }

    /// Fetch a plugin's persisted checkpoint, if any.
    pub async fn get_checkpoint(&self, node_id: &NodeId) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT data_json FROM node_checkpoints WHERE node_id = ?")
            .bind(node_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Value> { Ok(serde_json::from_str(&row.try_get::<String, _>(0)?)?) })
            .transpose()
    }

    /// Shallow-merge `merge`'s object keys into a plugin's persisted
    /// checkpoint, creating it if absent.
    pub async fn update_checkpoint(&self, node_id: &NodeId, merge: Value) -> Result<()> {
        let mut current = self.get_checkpoint(node_id).await?.unwrap_or_else(|| Value::Object(Default::default()));
        if let (Value::Object(current_map), Value::Object(merge_map)) = (&mut current, merge) {
            for (key, value) in merge_map {
                current_map.insert(key, value);
            }
        }
        let data_json = serde_json::to_string(&current)?;
        sqlx::query(
            "INSERT INTO node_checkpoints (node_id, data_json) VALUES (?, ?)
             ON CONFLICT(node_id) DO UPDATE SET data_json = excluded.data_json",
        )
        .bind(node_id.as_str())
        .bind(&data_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a plugin's persisted checkpoint entirely.
    pub async fn clear_checkpoint(&self, node_id: &NodeId) -> Result<()> {
        sqlx::query("DELETE FROM node_checkpoints WHERE node_id = ?")
            .bind(node_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record one resolved secret's audit entry: never the plaintext
    /// value, only its fingerprint.
    pub async fn record_secret_resolution(&self, resolution: &SecretResolution) -> Result<()> {
        sqlx::query(
            "INSERT INTO secret_resolutions
                (run_id, env_var_name, source, vault_url, secret_name, latency_ms, timestamp, fingerprint)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(resolution.run_id.as_str())
        .bind(&resolution.env_var_name)
        .bind(secret_source_to_str(resolution.source))
        .bind(&resolution.vault_url)
        .bind(&resolution.secret_name)
        .bind(resolution.latency_ms as i64)
        .bind(resolution.timestamp.to_rfc3339())
        .bind(&resolution.fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Increment a batch's member count.
    pub async fn increment_batch_members(&self, batch_id: &BatchId) -> Result<u32> {
        let row = sqlx::query(
            "UPDATE batches SET member_count = member_count + 1 WHERE batch_id = ? RETURNING member_count",
        )
        .bind(batch_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)? as u32)
    }
}

async fn insert_outcome(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    run_id: &RunId,
    token_id: &TokenId,
    outcome: &TokenOutcome,
) -> Result<OutcomeId> {
    let outcome_id = OutcomeId::generate();
    let ctx = &outcome.context;
    sqlx::query(
        "INSERT INTO token_outcomes
            (outcome_id, token_id, run_id, outcome_kind, is_terminal, sink_name,
             fork_group_id, join_group_id, expand_group_id, error_hash, batch_id, recorded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(outcome_id.as_str())
    .bind(token_id.as_str())
    .bind(run_id.as_str())
    .bind(outcome_kind_to_str(outcome.kind))
    .bind(outcome.is_terminal())
    .bind(&ctx.sink_name)
    .bind(ctx.fork_group_id.as_ref().map(ForkGroupId::as_str))
    .bind(ctx.join_group_id.as_ref().map(JoinGroupId::as_str))
    .bind(ctx.expand_group_id.as_ref().map(ExpandGroupId::as_str))
    .bind(&ctx.error_hash)
    .bind(ctx.batch_id.as_ref().map(BatchId::as_str))
    .bind(now_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(outcome_id)
}

fn decode_contract(
    body: Option<String>,
    stored_hash: Option<String>,
    scope: impl Fn() -> String,
) -> Result<Option<SchemaContract>> {
    let (Some(body), Some(stored_hash)) = (body, stored_hash) else {
        return Ok(None);
    };
    let contract: SchemaContract = serde_json::from_str(&body)?;
    let recomputed = contract.version_hash()?;
    if recomputed != stored_hash {
        return Err(Error::ContractHashMismatch {
            scope: scope(),
            stored: stored_hash,
            recomputed,
        });
    }
    Ok(Some(contract))
}

fn decode_validation_error(row: sqlx::sqlite::SqliteRow, run_id: &RunId) -> Result<ValidationError> {
    let row_data: String = row.try_get(2)?;
    let violation_json: Option<String> = row.try_get(6)?;
    Ok(ValidationError {
        error_id: ValidationErrorId::from_known(row.try_get::<String, _>(0)?),
        run_id: run_id.clone(),
        node_id: NodeId::from_known(row.try_get::<String, _>(1)?),
        row_data: serde_json::from_str(&row_data)?,
        error: row.try_get(3)?,
        schema_mode: row.try_get(4)?,
        destination: row.try_get(5)?,
        contract_violation: violation_json.map(|s| serde_json::from_str(&s)).transpose()?,
    })
}

fn decode_transform_error(row: sqlx::sqlite::SqliteRow, token_id: &TokenId) -> Result<TransformError> {
    let row_data: String = row.try_get(3)?;
    let details: String = row.try_get(4)?;
    Ok(TransformError {
        error_id: TransformErrorId::from_known(row.try_get::<String, _>(0)?),
        run_id: RunId::from_known(row.try_get::<String, _>(1)?),
        token_id: token_id.clone(),
        transform_id: NodeId::from_known(row.try_get::<String, _>(2)?),
        row_data: serde_json::from_str(&row_data)?,
        error_details: serde_json::from_str(&details)?,
        destination: row.try_get(5)?,
    })
}

fn node_type_to_str(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Source => "SOURCE",
        NodeType::Transform => "TRANSFORM",
        NodeType::Gate => "GATE",
        NodeType::Aggregation => "AGGREGATION",
        NodeType::Coalesce => "COALESCE",
        NodeType::Sink => "SINK",
    }
}

fn secret_source_to_str(source: SecretSource) -> &'static str {
    match source {
        SecretSource::Keyvault => "KEYVAULT",
        SecretSource::Env => "ENV",
    }
}

fn call_type_to_str(call_type: CallType) -> &'static str {
    match call_type {
        CallType::Llm => "LLM",
        CallType::Http => "HTTP",
        CallType::Sql => "SQL",
        CallType::Filesystem => "FILESYSTEM",
    }
}

fn str_to_call_type(raw: &str) -> Result<CallType> {
    match raw {
        "LLM" => Ok(CallType::Llm),
        "HTTP" => Ok(CallType::Http),
        "SQL" => Ok(CallType::Sql),
        "FILESYSTEM" => Ok(CallType::Filesystem),
        other => Err(Error::Database(sqlx::Error::Decode(
            format!("unknown call_type {other}").into(),
        ))),
    }
}

fn call_status_to_str(status: CallStatus) -> &'static str {
    match status {
        CallStatus::Success => "SUCCESS",
        CallStatus::Error => "ERROR",
    }
}

fn str_to_call_status(raw: &str) -> Result<CallStatus> {
    match raw {
        "SUCCESS" => Ok(CallStatus::Success),
        "ERROR" => Ok(CallStatus::Error),
        other => Err(Error::Database(sqlx::Error::Decode(
            format!("unknown call status {other}").into(),
        ))),
    }
}

fn outcome_kind_to_str(kind: elspeth_core::model::OutcomeKind) -> &'static str {
    use elspeth_core::model::OutcomeKind::*;
    match kind {
        Completed => "COMPLETED",
        Routed => "ROUTED",
        Coalesced => "COALESCED",
        Failed => "FAILED",
        Quarantined => "QUARANTINED",
        Forked => "FORKED",
        Expanded => "EXPANDED",
        ConsumedInBatch => "CONSUMED_IN_BATCH",
        Buffered => "BUFFERED",
    }
}

fn str_to_outcome_kind(raw: &str) -> Result<elspeth_core::model::OutcomeKind> {
    use elspeth_core::model::OutcomeKind::*;
    Ok(match raw {
        "COMPLETED" => Completed,
        "ROUTED" => Routed,
        "COALESCED" => Coalesced,
        "FAILED" => Failed,
        "QUARANTINED" => Quarantined,
        "FORKED" => Forked,
        "EXPANDED" => Expanded,
        "CONSUMED_IN_BATCH" => ConsumedInBatch,
        "BUFFERED" => Buffered,
        other => {
            return Err(Error::Database(sqlx::Error::Decode(
                format!("unknown outcome_kind {other}").into(),
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use elspeth_core::contract::{FieldContract, FieldSource, FieldType, SchemaMode};
    use serde_json::json;

    async fn memory_landscape() -> Landscape {
        Landscape::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn begin_run_round_trips() {
        let landscape = memory_landscape().await;
        let run = landscape
            .begin_run(json!({"pipeline": "demo"}), "v1".to_string())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.run_id.as_str().starts_with("run_"));
    }

    #[tokio::test]
    async fn run_contract_locks_after_first_set() {
        let landscape = memory_landscape().await;
        let run = landscape.begin_run(json!({}), "v1".to_string()).await.unwrap();
        let contract = SchemaContract::new(
            SchemaMode::Observed,
            vec![FieldContract {
                normalized_name: "id".to_string(),
                original_name: "id".to_string(),
                field_type: FieldType::Int,
                required: false,
                source: FieldSource::Inferred,
            }],
        );
        landscape.update_run_contract(&run.run_id, &contract).await.unwrap();
        let err = landscape
            .update_run_contract(&run.run_id, &contract)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContractAlreadyLocked { .. }));

        let fetched = landscape.get_run_contract(&run.run_id).await.unwrap().unwrap();
        assert_eq!(fetched.fields().len(), 1);
    }

    #[tokio::test]
    async fn call_index_allocation_is_monotonic_per_state() {
        let landscape = memory_landscape().await;
        let run = landscape.begin_run(json!({}), "v1".to_string()).await.unwrap();
        let node = landscape
            .register_node(
                &run.run_id,
                "http_source".to_string(),
                NodeType::Source,
                "1.0.0".to_string(),
                json!({}),
                None,
                0,
            )
            .await
            .unwrap();
        let row = landscape
            .create_row(&run.run_id, &node.node_id, 0, &json!({"id": 1}))
            .await
            .unwrap();
        let token = landscape.create_token(&row.row_id, None).await.unwrap();
        let state = landscape
            .begin_node_state(&run.run_id, &token.token_id, &node.node_id, 0, &json!({"id": 1}))
            .await
            .unwrap();

        let first = landscape.allocate_call_index(&state.state_id).await.unwrap();
        let second = landscape.allocate_call_index(&state.state_id).await.unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn duplicate_call_index_is_rejected() {
        let landscape = memory_landscape().await;
        let run = landscape.begin_run(json!({}), "v1".to_string()).await.unwrap();
        let node = landscape
            .register_node(
                &run.run_id,
                "http_source".to_string(),
                NodeType::Source,
                "1.0.0".to_string(),
                json!({}),
                None,
                0,
            )
            .await
            .unwrap();
        let row = landscape
            .create_row(&run.run_id, &node.node_id, 0, &json!({"id": 1}))
            .await
            .unwrap();
        let token = landscape.create_token(&row.row_id, None).await.unwrap();
        let state = landscape
            .begin_node_state(&run.run_id, &token.token_id, &node.node_id, 0, &json!({"id": 1}))
            .await
            .unwrap();

        landscape
            .record_call(
                &state.state_id,
                0,
                CallType::Http,
                CallStatus::Success,
                &json!({"url": "https://example.com"}),
                Some(&json!({"status": 200})),
                None,
                Some(12),
                None,
                None,
                &run.run_id,
            )
            .await
            .unwrap();

        let err = landscape
            .record_call(
                &state.state_id,
                0,
                CallType::Http,
                CallStatus::Success,
                &json!({"url": "https://example.com/again"}),
                None,
                None,
                None,
                None,
                None,
                &run.run_id,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateCallIndex { .. }));
    }

    #[tokio::test]
    async fn fork_token_atomically_creates_children_and_parent_outcome() {
        let landscape = memory_landscape().await;
        let run = landscape.begin_run(json!({}), "v1".to_string()).await.unwrap();
        let node = landscape
            .register_node(
                &run.run_id,
                "splitter".to_string(),
                NodeType::Gate,
                "1.0.0".to_string(),
                json!({}),
                None,
                0,
            )
            .await
            .unwrap();
        let row = landscape
            .create_row(&run.run_id, &node.node_id, 0, &json!({"id": 1}))
            .await
            .unwrap();
        let parent = landscape.create_token(&row.row_id, None).await.unwrap();

        let (children, fork_group_id) = landscape
            .fork_token(
                &run.run_id,
                &parent.token_id,
                &row.row_id,
                vec!["a".to_string(), "b".to_string()],
                1,
            )
            .await
            .unwrap();
        assert_eq!(children.len(), 2);

        let outcome = landscape.get_token_outcome(&parent.token_id).await.unwrap().unwrap();
        assert_eq!(outcome.kind, elspeth_core::model::OutcomeKind::Forked);
        assert_eq!(
            outcome.context.fork_group_id.unwrap().as_str(),
            fork_group_id.as_str()
        );
    }

    #[tokio::test]
    async fn terminal_outcome_cannot_be_overwritten_by_a_different_kind() {
        let landscape = memory_landscape().await;
        let run = landscape.begin_run(json!({}), "v1".to_string()).await.unwrap();
        let node = landscape
            .register_node(
                &run.run_id,
                "sink".to_string(),
                NodeType::Sink,
                "1.0.0".to_string(),
                json!({}),
                None,
                0,
            )
            .await
            .unwrap();
        let row = landscape
            .create_row(&run.run_id, &node.node_id, 0, &json!({"id": 1}))
            .await
            .unwrap();
        let token = landscape.create_token(&row.row_id, None).await.unwrap();

        let completed = TokenOutcome::new(
            elspeth_core::model::OutcomeKind::Completed,
            elspeth_core::results::OutcomeContext {
                sink_name: Some("output".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        landscape
            .record_token_outcome(&run.run_id, &token.token_id, &completed)
            .await
            .unwrap();

        let failed = TokenOutcome::new(
            elspeth_core::model::OutcomeKind::Failed,
            elspeth_core::results::OutcomeContext {
                error_hash: Some("deadbeef".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let err = landscape
            .record_token_outcome(&run.run_id, &token.token_id, &failed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TerminalOutcomeImmutable { .. }));
    }

    #[tokio::test]
    async fn validation_errors_round_trip() {
        let landscape = memory_landscape().await;
        let run = landscape.begin_run(json!({}), "v1".to_string()).await.unwrap();
        let node = landscape
            .register_node(
                &run.run_id,
                "jsonl_source".to_string(),
                NodeType::Source,
                "1.0.0".to_string(),
                json!({}),
                None,
                0,
            )
            .await
            .unwrap();
        landscape
            .record_validation_error(
                &run.run_id,
                &node.node_id,
                &json!({"raw": "not json"}),
                "invalid JSON".to_string(),
                "parse",
                "discard".to_string(),
                None,
            )
            .await
            .unwrap();

        let errors = landscape.get_validation_errors_for_run(&run.run_id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].schema_mode, "parse");
    }
}
