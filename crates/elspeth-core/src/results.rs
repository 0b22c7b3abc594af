//! Typed result and outcome value objects.
//!
//! Rust has no runtime-checked dataclass invariants, so the validation that
//! the original implementation performs in a `__post_init__` happens here in
//! ordinary constructors that return `Result` — a plugin author simply
//! cannot build an invalid `TokenOutcome` or a `success_multi` with mixed
//! contracts; the type never exists.

use crate::error::{Error, Result};
use crate::ids::{BatchId, ExpandGroupId, ForkGroupId, JoinGroupId};
use crate::model::OutcomeKind;
use crate::row::PipelineRow;
use serde_json::Value;
use std::sync::Arc;

/// The row payload(s) a successful transform invocation produced.
#[derive(Debug, Clone)]
pub enum TransformRows {
    /// A single output row.
    Single(PipelineRow),
    /// Multiple output rows from one invocation (fork/expand), all sharing
    /// one contract instance.
    Multi(Vec<PipelineRow>),
}

/// What a transform invocation decided to do with its input row.
#[derive(Debug, Clone)]
pub enum TransformOutcome {
    /// The row was processed successfully.
    Success {
        /// The row(s) produced.
        rows: TransformRows,
        /// Structured reason recorded for audit (e.g. `{"action": "enriched"}`).
        success_reason: Value,
    },
    /// The row was rejected.
    Error {
        /// Structured error detail.
        reason: Value,
        /// Whether the caller should retry this row.
        retryable: bool,
    },
}

/// The outcome of one transform invocation, plus audit metadata the
/// executor attaches after the fact.
#[derive(Debug, Clone)]
pub struct TransformResult {
    /// What happened.
    pub outcome: TransformOutcome,
    /// Pool/ordering metadata flowing through to the audit trail.
    pub context_after: Option<Value>,
    /// Canonical hash of the input row, set by the executor.
    pub input_hash: Option<String>,
    /// Canonical hash of the output row(s), set by the executor.
    pub output_hash: Option<String>,
    /// Wall-clock duration of the invocation, in milliseconds.
    pub duration_ms: Option<f64>,
}

impl TransformResult {
    /// A successful single-row result.
    pub fn success(row: PipelineRow, success_reason: Value) -> Self {
        Self {
            outcome: TransformOutcome::Success {
                rows: TransformRows::Single(row),
                success_reason,
            },
            context_after: None,
            input_hash: None,
            output_hash: None,
            duration_ms: None,
        }
    }

    /// A successful multi-row result. Rejects an empty row list and rows
    /// that do not all share one contract instance (spec §3.3: "All
    /// multi-row outputs from a single transform invocation must share the
    /// same contract instance").
    pub fn success_multi(rows: Vec<PipelineRow>, success_reason: Value) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(Error::InvalidResult(
                "success_multi requires at least one row".to_string(),
            ));
        };
        let shared = Arc::clone(first.contract());
        if rows.iter().any(|row| !Arc::ptr_eq(row.contract(), &shared)) {
            return Err(Error::InvalidResult(
                "success_multi rows have inconsistent contracts".to_string(),
            ));
        }
        Ok(Self {
            outcome: TransformOutcome::Success {
                rows: TransformRows::Multi(rows),
                success_reason,
            },
            context_after: None,
            input_hash: None,
            output_hash: None,
            duration_ms: None,
        })
    }

    /// An error result.
    pub fn error(reason: Value) -> Self {
        Self {
            outcome: TransformOutcome::Error {
                reason,
                retryable: false,
            },
            context_after: None,
            input_hash: None,
            output_hash: None,
            duration_ms: None,
        }
    }

    /// An error result the caller may legitimately retry.
    pub fn error_retryable(reason: Value) -> Self {
        Self {
            outcome: TransformOutcome::Error {
                reason,
                retryable: true,
            },
            context_after: None,
            input_hash: None,
            output_hash: None,
            duration_ms: None,
        }
    }

    /// Attach pool/ordering metadata for the audit trail.
    pub fn with_context_after(mut self, context: Value) -> Self {
        self.context_after = Some(context);
        self
    }

    /// Whether this result carries more than one output row.
    pub fn is_multi_row(&self) -> bool {
        matches!(
            &self.outcome,
            TransformOutcome::Success {
                rows: TransformRows::Multi(_),
                ..
            }
        )
    }

    /// Whether this result carries any output row at all.
    pub fn has_output_data(&self) -> bool {
        matches!(self.outcome, TransformOutcome::Success { .. })
    }
}

/// Structured failure detail, distinct from an ad-hoc error string so the
/// audit trail always has a named exception type and message.
#[derive(Debug, Clone)]
pub struct FailureInfo {
    /// The kind of failure, e.g. `"MaxRetriesExceeded"`.
    pub exception_type: String,
    /// Human-readable description.
    pub message: String,
    /// Number of attempts made before giving up, if applicable.
    pub attempts: Option<u32>,
    /// The last underlying error observed, if applicable.
    pub last_error: Option<String>,
}

impl FailureInfo {
    /// Construct minimal failure detail from just a type and message.
    pub fn new<T: Into<String>, M: Into<String>>(exception_type: T, message: M) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
            attempts: None,
            last_error: None,
        }
    }
}

/// The context fields a [`TokenOutcome`] may carry, keyed by what its kind
/// requires (spec §3.4 invariant 4).
#[derive(Debug, Clone, Default)]
pub struct OutcomeContext {
    /// Required by `COMPLETED`, `ROUTED`, `COALESCED`.
    pub sink_name: Option<String>,
    /// Required by `FORKED`.
    pub fork_group_id: Option<ForkGroupId>,
    /// Required by `EXPANDED`.
    pub expand_group_id: Option<ExpandGroupId>,
    /// Required by `COALESCED`.
    pub join_group_id: Option<JoinGroupId>,
    /// Required by `FAILED`, `QUARANTINED`.
    pub error_hash: Option<String>,
    /// Required by `BUFFERED`, `CONSUMED_IN_BATCH`.
    pub batch_id: Option<BatchId>,
}

/// A token's fate at a join point, with its outcome-kind-specific context
/// validated at construction time rather than left to the recorder to
/// discover at write time.
#[derive(Debug, Clone)]
pub struct TokenOutcome {
    /// Which outcome this is.
    pub kind: OutcomeKind,
    /// The validated context for this outcome.
    pub context: OutcomeContext,
}

impl TokenOutcome {
    /// Construct a validated outcome. Fails if `context` is missing a field
    /// `kind` requires.
    pub fn new(kind: OutcomeKind, context: OutcomeContext) -> Result<Self> {
        let require = |present: bool, field: &str| -> Result<()> {
            if present {
                Ok(())
            } else {
                Err(Error::MissingOutcomeContext {
                    outcome: format!("{kind:?}"),
                    field: field.to_string(),
                })
            }
        };

        match kind {
            OutcomeKind::Completed | OutcomeKind::Routed => {
                require(context.sink_name.is_some(), "sink_name")?;
            }
            OutcomeKind::Coalesced => {
                require(context.sink_name.is_some(), "sink_name")?;
                require(context.join_group_id.is_some(), "join_group_id")?;
            }
            OutcomeKind::Forked => {
                require(context.fork_group_id.is_some(), "fork_group_id")?;
            }
            OutcomeKind::Expanded => {
                require(context.expand_group_id.is_some(), "expand_group_id")?;
            }
            OutcomeKind::Failed | OutcomeKind::Quarantined => {
                require(context.error_hash.is_some(), "error_hash")?;
            }
            OutcomeKind::Buffered | OutcomeKind::ConsumedInBatch => {
                require(context.batch_id.is_some(), "batch_id")?;
            }
        }

        Ok(Self { kind, context })
    }

    /// Whether this outcome is terminal (cannot later be superseded by a
    /// different terminal outcome for the same token).
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{FieldContract, FieldSource, FieldType, SchemaContract, SchemaMode};
    use crate::row::Tier3Row;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn contract() -> Arc<SchemaContract> {
        Arc::new(SchemaContract::new(
            SchemaMode::Observed,
            vec![FieldContract {
                normalized_name: "id".to_string(),
                original_name: "id".to_string(),
                field_type: FieldType::Int,
                required: false,
                source: FieldSource::Inferred,
            }],
        ))
    }

    fn row(contract: &Arc<SchemaContract>, id: i64) -> PipelineRow {
        let raw = Tier3Row::new(BTreeMap::from([("id".to_string(), json!(id))]));
        crate::row::coerce_row(&raw, contract).unwrap()
    }

    #[test]
    fn success_multi_rejects_empty() {
        let err = TransformResult::success_multi(vec![], json!({})).unwrap_err();
        assert!(matches!(err, Error::InvalidResult(_)));
    }

    #[test]
    fn success_multi_rejects_inconsistent_contracts() {
        let a = contract();
        let b = contract();
        let rows = vec![row(&a, 1), row(&b, 2)];
        let err = TransformResult::success_multi(rows, json!({})).unwrap_err();
        assert!(matches!(err, Error::InvalidResult(_)));
    }

    #[test]
    fn success_multi_accepts_shared_contract() {
        let shared = contract();
        let rows = vec![row(&shared, 1), row(&shared, 2)];
        let result = TransformResult::success_multi(rows, json!({"action": "expand"})).unwrap();
        assert!(result.is_multi_row());
        assert!(result.has_output_data());
    }

    #[test]
    fn error_has_no_output_data() {
        let result = TransformResult::error(json!({"reason": "bad"}));
        assert!(!result.has_output_data());
        assert!(!result.is_multi_row());
    }

    #[test]
    fn completed_without_sink_name_is_rejected() {
        let err = TokenOutcome::new(OutcomeKind::Completed, OutcomeContext::default()).unwrap_err();
        assert!(matches!(err, Error::MissingOutcomeContext { .. }));
    }

    #[test]
    fn completed_with_sink_name_succeeds() {
        let ctx = OutcomeContext {
            sink_name: Some("output".to_string()),
            ..Default::default()
        };
        assert!(TokenOutcome::new(OutcomeKind::Completed, ctx).is_ok());
    }

    #[test]
    fn coalesced_requires_both_sink_name_and_join_group() {
        let ctx = OutcomeContext {
            sink_name: Some("output".to_string()),
            ..Default::default()
        };
        assert!(TokenOutcome::new(OutcomeKind::Coalesced, ctx).is_err());

        let ctx = OutcomeContext {
            sink_name: Some("output".to_string()),
            join_group_id: Some(JoinGroupId::generate()),
            ..Default::default()
        };
        assert!(TokenOutcome::new(OutcomeKind::Coalesced, ctx).is_ok());
    }

    #[test]
    fn forked_requires_fork_group_id() {
        assert!(TokenOutcome::new(OutcomeKind::Forked, OutcomeContext::default()).is_err());
        let ctx = OutcomeContext {
            fork_group_id: Some(ForkGroupId::generate()),
            ..Default::default()
        };
        assert!(TokenOutcome::new(OutcomeKind::Forked, ctx).is_ok());
    }

    #[test]
    fn failed_requires_error_hash() {
        assert!(TokenOutcome::new(OutcomeKind::Failed, OutcomeContext::default()).is_err());
        let ctx = OutcomeContext {
            error_hash: Some("deadbeef".to_string()),
            ..Default::default()
        };
        assert!(TokenOutcome::new(OutcomeKind::Failed, ctx).is_ok());
    }

    #[test]
    fn buffered_requires_batch_id() {
        assert!(TokenOutcome::new(OutcomeKind::Buffered, OutcomeContext::default()).is_err());
        let ctx = OutcomeContext {
            batch_id: Some(BatchId::generate()),
            ..Default::default()
        };
        assert!(TokenOutcome::new(OutcomeKind::Buffered, ctx).is_ok());
    }

    #[test]
    fn buffered_is_not_terminal() {
        let ctx = OutcomeContext {
            batch_id: Some(BatchId::generate()),
            ..Default::default()
        };
        let outcome = TokenOutcome::new(OutcomeKind::Buffered, ctx).unwrap();
        assert!(!outcome.is_terminal());
    }
}
