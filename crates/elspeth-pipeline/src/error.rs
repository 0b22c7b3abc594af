//! Error taxonomy for the batch mixin, AIMD executor, sources/sinks, and
//! engine wiring.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while running a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A batch transform's `accept_row` was called without `ctx.token`
    /// set. A contract violation by the engine, not the plugin.
    #[error("BatchTransformMixin requires ctx.token to be set")]
    MissingToken,

    /// `accept_row` was called before `init_batch_processing`.
    #[error("BatchTransformMixin::accept_row called before init_batch_processing")]
    NotInitialized,

    /// A worker in the batch pool panicked or was dropped.
    #[error("batch worker for token {token_id} did not return a result")]
    WorkerLost {
        /// The token whose worker was lost.
        token_id: String,
    },

    /// The reorder buffer timed out waiting for a submission.
    #[error("timed out waiting for batch results after {timeout_secs}s")]
    FlushTimeout {
        /// The timeout that elapsed.
        timeout_secs: u64,
    },

    /// A source's parse-level failure, already recorded as a quarantine.
    #[error("source parse error: {0}")]
    SourceParse(String),

    /// A sink's output target failed pre-run validation.
    #[error("sink `{sink}` output target invalid: {detail}")]
    InvalidOutputTarget {
        /// The sink that failed validation.
        sink: String,
        /// Why it failed.
        detail: String,
    },

    /// Propagated from the core data-model/contract layer.
    #[error(transparent)]
    Core(#[from] elspeth_core::error::Error),

    /// Propagated from the DAG/contract validator.
    #[error(transparent)]
    Dag(#[from] elspeth_dag::Error),

    /// Propagated from the audited HTTP client.
    #[error(transparent)]
    Net(#[from] elspeth_net::NetError),

    /// A CSV source's underlying parser failed.
    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// A JSON source's underlying parser failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Filesystem failure reading a source file or writing a sink target.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Propagated from secret-backend resolution at run start.
    #[error(transparent)]
    Secrets(#[from] elspeth_secrets::error::Error),
}
