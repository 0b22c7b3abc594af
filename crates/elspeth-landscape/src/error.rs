//! Error taxonomy for the landscape recorder.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the recorder and payload store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A row, node, token, or run referenced by an operation does not
    /// exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// The entity kind that was missing, e.g. `"run"`.
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A `call_index` was reused for a `state_id` that already has one,
    /// violating the partial-unique `(state_id, call_index)` index.
    #[error("duplicate call_index {call_index} for state {state_id}")]
    DuplicateCallIndex {
        /// The state whose call_index collided.
        state_id: String,
        /// The colliding index.
        call_index: i64,
    },

    /// An operation tried to mutate a schema contract that has already
    /// locked.
    #[error("contract for {scope} is already locked")]
    ContractAlreadyLocked {
        /// What the contract belongs to, e.g. `"run run_1"`.
        scope: String,
    },

    /// A token already carries a terminal outcome and the caller tried to
    /// record a different terminal outcome for it.
    #[error("token {token_id} already has terminal outcome {existing:?}, cannot also record {attempted:?}")]
    TerminalOutcomeImmutable {
        /// The token whose terminal outcome would be overwritten.
        token_id: String,
        /// The outcome already on record.
        existing: elspeth_core::model::OutcomeKind,
        /// The outcome the caller attempted to record.
        attempted: elspeth_core::model::OutcomeKind,
    },

    /// A stored contract's `version_hash()` did not match what was
    /// recomputed on read, indicating tampering or corruption.
    #[error("contract hash mismatch for {scope}: stored {stored}, recomputed {recomputed}")]
    ContractHashMismatch {
        /// What the contract belongs to.
        scope: String,
        /// The hash stored alongside the contract.
        stored: String,
        /// The hash recomputed from the stored contract body.
        recomputed: String,
    },

    /// An outcome failed the context validation `elspeth-core` enforces at
    /// construction time.
    #[error("core error: {0}")]
    Core(#[from] elspeth_core::Error),

    /// A canonical-hashing failure.
    #[error("hashing error: {0}")]
    Hash(#[from] elspeth_hash::CanonicalError),

    /// A database-level failure not covered by a more specific variant
    /// above.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A filesystem failure from the payload store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
