//! `BatchTransformMixin`: row-level pipelining for a transform that
//! accepts one row at a time but processes it on a worker pool (spec
//! §4.8). Composed into a host transform by value — Rust has no mixins,
//! so the host holds one of these and drives `accept_row` from its own
//! `process` implementation the way `mockforge-chaos`'s transforms hold a
//! `FaultInjector` by value rather than subclassing one.

use crate::error::{EngineError, Result};
use elspeth_core::ids::{StateId, TokenId};
use elspeth_core::plugin::{PluginContext, TokenInfo};
use elspeth_core::results::TransformResult;
use elspeth_core::row::PipelineRow;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// A row processing closure run on the worker pool. Takes an owned,
/// submit-time snapshot of the row and context so a worker never
/// observes a context the engine has since mutated.
pub type ProcessFn = Arc<dyn Fn(PipelineRow, PluginContext) -> BoxFuture<'static, TransformResult> + Send + Sync>;

/// One released result: the token (same identity the caller submitted),
/// its outcome, and the state it was produced under.
pub struct BatchOutput {
    /// The token, identity-preserved from the submitting call.
    pub token: TokenInfo,
    /// The transform's outcome for this row.
    pub result: TransformResult,
    /// The node-state the row was produced under.
    pub state_id: StateId,
}

enum Entry {
    Pending,
    Ready(BatchOutput, OwnedSemaphorePermit),
    Evicted,
}

/// Shared state reachable from both the mixin handle and its spawned
/// worker tasks, so workers never need a borrow of the mixin itself.
struct Shared {
    next_release: Mutex<u64>,
    slots: Mutex<BTreeMap<u64, Entry>>,
    keys: Mutex<HashMap<(TokenId, StateId), u64>>,
    output_tx: mpsc::UnboundedSender<BatchOutput>,
}

impl Shared {
    fn drain(&self) {
        let mut next_release = self.next_release.lock();
        let mut slots = self.slots.lock();
        loop {
            match slots.get(&*next_release) {
                Some(Entry::Ready(..)) => {
                    if let Some(Entry::Ready(output, permit)) = slots.remove(&*next_release) {
                        drop(permit);
                        let _ = self.output_tx.send(output);
                    }
                    *next_release += 1;
                }
                Some(Entry::Evicted) => {
                    slots.remove(&*next_release);
                    *next_release += 1;
                }
                _ => break,
            }
        }
    }
}

/// Row-level pipelining infrastructure: backpressure, a bounded worker
/// pool, and a FIFO reorder buffer keyed by `(token_id, state_id)`.
pub struct BatchTransformMixin {
    name: String,
    backpressure: Arc<Semaphore>,
    worker_slots: Arc<Semaphore>,
    next_seq: AtomicU64,
    shared: Arc<Shared>,
    output_rx: Mutex<Option<mpsc::UnboundedReceiver<BatchOutput>>>,
    tasks: Mutex<JoinSet<()>>,
}

impl BatchTransformMixin {
    /// `init_batch_processing`: build a mixin bound to `name` (used to
    /// disambiguate telemetry across multiple instances of the same
    /// plugin), with `max_pending` outstanding submissions before
    /// `accept_row` blocks, and up to `max_workers` rows processed
    /// concurrently.
    pub fn new(name: impl Into<String>, max_pending: usize, max_workers: usize) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            backpressure: Arc::new(Semaphore::new(max_pending)),
            worker_slots: Arc::new(Semaphore::new(max_workers)),
            next_seq: AtomicU64::new(0),
            shared: Arc::new(Shared {
                next_release: Mutex::new(0),
                slots: Mutex::new(BTreeMap::new()),
                keys: Mutex::new(HashMap::new()),
                output_tx,
            }),
            output_rx: Mutex::new(Some(output_rx)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// This mixin's plugin name, for telemetry disambiguation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `accept_row`: the engine's entry point. Requires `ctx.token` (and
    /// `ctx.state_id`, which the reorder buffer keys on) to already be
    /// set; blocks until a backpressure permit is free.
    pub async fn accept_row(&self, row: PipelineRow, ctx: &PluginContext, process_fn: ProcessFn) -> Result<()> {
        let token = ctx.token.clone().ok_or(EngineError::MissingToken)?;
        let state_id = ctx.state_id.clone().ok_or(EngineError::MissingToken)?;

        let permit = self
            .backpressure
            .clone()
            .acquire_owned()
            .await
            .expect("backpressure semaphore is never closed while the mixin is alive");

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.shared.slots.lock().insert(seq, Entry::Pending);
        self.shared.keys.lock().insert((token.token_id.clone(), state_id.clone()), seq);

        let worker_slots = self.worker_slots.clone();
        let shared = self.shared.clone();
        let ctx_snapshot = ctx.clone();
        let task_token = token;
        let task_state_id = state_id;

        self.tasks.lock().spawn(async move {
            let worker_permit = worker_slots
                .acquire_owned()
                .await
                .expect("worker-slot semaphore is never closed while the mixin is alive");
            let result = process_fn(row, ctx_snapshot).await;
            drop(worker_permit);

            let output = BatchOutput {
                token: task_token,
                result,
                state_id: task_state_id,
            };
            shared.slots.lock().insert(seq, Entry::Ready(output, permit));
            shared.drain();
        });

        Ok(())
    }

    /// `evict_submission`: remove a buffered slot that a waiter has given
    /// up on (e.g. a timed-out attempt about to retry under a fresh
    /// `state_id`), so the reorder buffer doesn't block forever on a
    /// submission nobody is going to collect. Returns whether a slot was
    /// found and evicted.
    pub fn evict_submission(&self, token_id: &TokenId, state_id: &StateId) -> bool {
        let Some(seq) = self.shared.keys.lock().remove(&(token_id.clone(), state_id.clone())) else {
            return false;
        };
        {
            let mut slots = self.shared.slots.lock();
            let Some(entry) = slots.get_mut(&seq) else {
                return false;
            };
            *entry = Entry::Evicted;
        }
        self.shared.drain();
        true
    }

    /// Drain released results until either `timeout` elapses or every
    /// submission so far has been released.
    pub async fn flush_batch_processing(&self, timeout: std::time::Duration) -> Vec<BatchOutput> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut collected = Vec::new();
        let mut rx_guard = self.output_rx.lock();
        let rx = rx_guard.as_mut().expect("flush called after shutdown");
        loop {
            if self.shared.slots.lock().is_empty() {
                while let Ok(output) = rx.try_recv() {
                    collected.push(output);
                }
                break;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(output)) => collected.push(output),
                Ok(None) | Err(_) => break,
            }
        }
        collected
    }

    /// `shutdown_batch_processing`: stop all workers and release pool
    /// resources. Buffered-but-unreleased results are dropped.
    pub async fn shutdown_batch_processing(&self) {
        self.tasks.lock().abort_all();
        while self.tasks.lock().join_next().await.is_some() {}
        self.shared.slots.lock().clear();
        self.shared.keys.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elspeth_core::contract::{FieldContract, FieldSource, FieldType, SchemaContract, SchemaMode};
    use elspeth_core::ids::{RowId, RunId, StateId as StateIdType, TokenId as TokenIdType};
    use elspeth_core::results::TransformResult;
    use elspeth_core::row::{coerce_row, Tier3Row};
    use std::sync::Arc as StdArc;

    fn observed_contract() -> StdArc<SchemaContract> {
        StdArc::new(SchemaContract::new(
            SchemaMode::Observed,
            vec![FieldContract {
                normalized_name: "value".to_string(),
                original_name: "value".to_string(),
                field_type: FieldType::Int,
                required: false,
                source: FieldSource::Inferred,
            }],
        ))
    }

    fn make_row(contract: &StdArc<SchemaContract>, value: i64) -> PipelineRow {
        let raw = Tier3Row::new(std::collections::BTreeMap::from([("value".to_string(), serde_json::json!(value))]));
        coerce_row(&raw, contract).unwrap()
    }

    fn bare_ctx(token: TokenInfo, state_id: StateIdType) -> PluginContext {
        let mut ctx = PluginContext::bare(RunId::generate(), serde_json::json!({}));
        ctx.state_id = Some(state_id);
        ctx.token = Some(token);
        ctx
    }

    fn make_token(row_id: RowId, row_data: PipelineRow) -> TokenInfo {
        TokenInfo {
            token_id: TokenIdType::generate(),
            row_id,
            row_data,
        }
    }

    #[tokio::test]
    async fn accept_row_rejects_missing_token() {
        let mixin = BatchTransformMixin::new("test", 4, 4);
        let ctx = PluginContext::bare(RunId::generate(), serde_json::json!({}));
        let contract = observed_contract();
        let row = make_row(&contract, 1);
        let process: ProcessFn = Arc::new(|row, _ctx| Box::pin(async move { TransformResult::success(row, serde_json::json!({})) }));

        let err = mixin.accept_row(row, &ctx, process).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingToken));
    }

    #[tokio::test]
    async fn fifo_output_regardless_of_completion_order() {
        let mixin = BatchTransformMixin::new("test", 8, 8);
        let contract = observed_contract();

        let mut submitted_order = Vec::new();
        for i in 0..3u32 {
            let row = make_row(&contract, i as i64);
            let token = make_token(RowId::generate(), make_row(&contract, i as i64));
            submitted_order.push(token.token_id.clone());
            let state_id = StateIdType::generate();
            let ctx = bare_ctx(token, state_id);
            // Later submissions finish first, to prove release order is by
            // submission sequence, not completion order.
            let delay_ms = (3 - i) as u64 * 20;
            let process: ProcessFn = Arc::new(move |row, _ctx| {
                Box::pin(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    TransformResult::success(row, serde_json::json!({}))
                })
            });
            mixin.accept_row(row, &ctx, process).await.unwrap();
        }

        let outputs = mixin.flush_batch_processing(std::time::Duration::from_secs(2)).await;
        assert_eq!(outputs.len(), 3);
        let output_order: Vec<_> = outputs.iter().map(|o| o.token.token_id.clone()).collect();
        assert_eq!(output_order, submitted_order);
    }
}
