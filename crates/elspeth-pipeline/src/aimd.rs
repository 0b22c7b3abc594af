//! Pooled capacity-retry executor (spec §4.9): runs a multi-query
//! transform's per-row work concurrently, applying Additive-Increase /
//! Multiplicative-Decrease when the process function reports a capacity
//! signal (HTTP 429/503/529 or a plugin's semantic equivalent).

use elspeth_core::ids::StateId;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// One row's worth of work to submit to the executor.
pub struct RowContext<R> {
    /// The row itself.
    pub row: R,
    /// The node-state this row's external calls are recorded under.
    pub state_id: StateId,
    /// The row's position in the original batch, used to restore
    /// submission order once every outcome is in.
    pub row_index: usize,
}

/// One row's final outcome, tagged with its original position.
pub struct RowOutcome<O, E> {
    /// The row's position in the original batch.
    pub row_index: usize,
    /// The row's result, after any capacity retries.
    pub outcome: std::result::Result<O, E>,
}

/// Implemented by a `process_fn`'s error type so the executor can tell a
/// capacity signal (retry with backoff) from an ordinary failure
/// (terminal for that row).
pub trait CapacitySignal {
    /// Whether this error means "the backend is over capacity, retry."
    fn is_capacity(&self) -> bool;
}

impl CapacitySignal for elspeth_net::NetError {
    fn is_capacity(&self) -> bool {
        elspeth_net::NetError::is_capacity(self)
    }
}

/// Runs rows through `process_fn` on a pool whose effective concurrency
/// grows and shrinks with observed capacity signals.
pub struct AimdExecutor {
    pool_size: usize,
    max_capacity_retry: Duration,
}

impl AimdExecutor {
    /// Build an executor with a ceiling of `pool_size` concurrent rows
    /// and a `max_capacity_retry_seconds` wall-clock budget for capacity
    /// retries (once the deadline passes, a capacity error becomes
    /// terminal for that row like any other failure).
    pub fn new(pool_size: usize, max_capacity_retry_seconds: u64) -> Self {
        Self {
            pool_size: pool_size.max(1),
            max_capacity_retry: Duration::from_secs(max_capacity_retry_seconds),
        }
    }

    /// Run every row in `rows` through `process_fn`, returning one
    /// outcome per row, restored to submission order.
    pub async fn run<R, O, E, F, Fut>(&self, rows: Vec<RowContext<R>>, process_fn: F) -> Vec<RowOutcome<O, E>>
    where
        R: Clone + Send + 'static,
        O: Send + 'static,
        E: CapacitySignal + Send + 'static,
        F: Fn(R, StateId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
    {
        let process_fn = Arc::new(process_fn);
        let deadline = tokio::time::Instant::now() + self.max_capacity_retry;
        let mut queue: VecDeque<RowContext<R>> = rows.into_iter().collect();
        let mut results = Vec::new();
        let mut join_set: JoinSet<(RowContext<R>, std::result::Result<O, E>)> = JoinSet::new();

        // Multiplicative-decrease 0.5, additive-increase +1, floor 1,
        // capped at `pool_size`.
        let mut capacity = self.pool_size;
        let mut in_flight = 0usize;

        loop {
            while in_flight < capacity {
                let Some(ctx) = queue.pop_front() else { break };
                let f = process_fn.clone();
                let row = ctx.row.clone();
                let state_id = ctx.state_id.clone();
                join_set.spawn(async move {
                    let outcome = f(row, state_id).await;
                    (ctx, outcome)
                });
                in_flight += 1;
            }

            if join_set.is_empty() {
                break;
            }

            let joined = join_set.join_next().await.expect("join_set is non-empty");
            let (ctx, outcome) = joined.expect("AIMD worker task panicked");
            in_flight -= 1;

            match outcome {
                Ok(value) => {
                    capacity = (capacity + 1).min(self.pool_size);
                    results.push(RowOutcome {
                        row_index: ctx.row_index,
                        outcome: Ok(value),
                    });
                }
                Err(err) if err.is_capacity() && tokio::time::Instant::now() < deadline => {
                    capacity = (capacity / 2).max(1);
                    tracing::debug!(target: "elspeth_pipeline", capacity, row_index = ctx.row_index, "capacity signal, backing off and retrying row");
                    queue.push_back(ctx);
                }
                Err(err) => {
                    results.push(RowOutcome {
                        row_index: ctx.row_index,
                        outcome: Err(err),
                    });
                }
            }
        }

        results.sort_by_key(|r| r.row_index);
        results
    }
}

/// Collapse a multi-query row's per-query outcomes into one row-level
/// output, enforcing all-or-nothing atomicity: if every query in
/// `per_query` succeeded, every named field is present; if any failed,
/// none of the successful fields survive and `_error` carries the first
/// failure instead (spec §4.9's row-level atomicity contract).
pub fn collapse_multi_query(
    per_query: Vec<(String, std::result::Result<serde_json::Value, serde_json::Value>)>,
) -> std::collections::BTreeMap<String, serde_json::Value> {
    let mut fields = std::collections::BTreeMap::new();
    let mut first_error = None;

    for (name, outcome) in per_query {
        match outcome {
            Ok(value) if first_error.is_none() => {
                fields.insert(name, value);
            }
            Ok(_) => {}
            Err(error) => first_error.get_or_insert(error),
        };
    }

    if let Some(error) = first_error {
        let mut out = std::collections::BTreeMap::new();
        out.insert("_error".to_string(), error);
        out
    } else {
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elspeth_core::ids::StateId as StateIdType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CapacityError;
    impl CapacitySignal for CapacityError {
        fn is_capacity(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn all_rows_complete_without_capacity_pressure() {
        let executor = AimdExecutor::new(4, 5);
        let rows: Vec<RowContext<u32>> = (0..10)
            .map(|i| RowContext {
                row: i,
                state_id: StateIdType::generate(),
                row_index: i as usize,
            })
            .collect();

        let outcomes = executor
            .run(rows, |row, _state_id| async move { Ok::<u32, CapacityError>(row * 2) })
            .await;

        assert_eq!(outcomes.len(), 10);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.row_index, i);
            assert_eq!(*outcome.outcome.as_ref().unwrap(), i as u32 * 2);
        }
    }

    #[tokio::test]
    async fn capacity_errors_retry_until_success_within_budget() {
        let executor = AimdExecutor::new(4, 5);
        let attempts = Arc::new(AtomicUsize::new(0));
        let rows = vec![RowContext {
            row: 1u32,
            state_id: StateIdType::generate(),
            row_index: 0,
        }];

        let attempts_clone = attempts.clone();
        let outcomes = executor
            .run(rows, move |row, _state_id| {
                let attempts = attempts_clone.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CapacityError)
                    } else {
                        Ok(row)
                    }
                }
            })
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].outcome.is_ok());
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn multi_query_row_is_all_or_nothing() {
        let success = collapse_multi_query(vec![
            ("a".to_string(), Ok(serde_json::json!(1))),
            ("b".to_string(), Ok(serde_json::json!(2))),
        ]);
        assert_eq!(success.len(), 2);
        assert!(!success.contains_key("_error"));

        let failure = collapse_multi_query(vec![
            ("a".to_string(), Ok(serde_json::json!(1))),
            ("b".to_string(), Err(serde_json::json!("boom"))),
        ]);
        assert_eq!(failure.len(), 1);
        assert!(failure.contains_key("_error"));
    }
}
