//! Error taxonomy for `elspeth-core`.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the data model, schema contracts, and trust boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value could not be coerced from Tier 3 to Tier 2 at a source.
    #[error("cannot coerce {value:?} to {target_type}")]
    CoercionFailed {
        /// The offending raw value, rendered for the audit trail.
        value: String,
        /// The type the source contract demanded.
        target_type: String,
    },

    /// A structural validation failure at a consumer boundary (transform or
    /// sink): a declared type didn't match, or FIXED mode saw an extra
    /// field.
    #[error("type mismatch on field `{field}`: expected {expected}, found {found}")]
    TypeMismatchViolation {
        /// The field that failed validation.
        field: String,
        /// The contract's declared type.
        expected: String,
        /// The type actually observed.
        found: String,
    },

    /// A required field was absent from a row at a consumer boundary.
    #[error("missing required field `{field}`")]
    MissingFieldViolation {
        /// The missing field's normalized name.
        field: String,
    },

    /// A FIXED-mode contract saw a field it does not declare.
    #[error("unexpected field `{field}` not permitted by FIXED schema contract")]
    UnexpectedField {
        /// The undeclared field.
        field: String,
    },

    /// Attempted to mutate or re-lock an already-locked schema contract.
    #[error("schema contract is already locked and cannot be modified")]
    ContractAlreadyLocked,

    /// A `TokenOutcome` was constructed without the context fields its kind
    /// requires (spec §3.4 invariant 4).
    #[error("outcome {outcome} requires context field `{field}`")]
    MissingOutcomeContext {
        /// The outcome kind being constructed.
        outcome: String,
        /// The context field it requires but did not receive.
        field: String,
    },

    /// Construction of a multi-row `TransformResult::success_multi` with an
    /// empty row list, or with rows that do not share one contract
    /// instance.
    #[error("{0}")]
    InvalidResult(String),

    /// A canonical-hashing failure bubbled up from `elspeth-hash`.
    #[error("hashing error: {0}")]
    Hash(#[from] elspeth_hash::CanonicalError),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error raised by a concrete `LandscapeHandle`/`PayloadStore`
    /// implementation (e.g. `elspeth-landscape`), flattened to a message
    /// so those crates don't need a dependency cycle back into this one.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// A value could not be coerced at a source boundary.
    pub fn coercion_failed<V: Into<String>, T: Into<String>>(value: V, target_type: T) -> Self {
        Self::CoercionFailed {
            value: value.into(),
            target_type: target_type.into(),
        }
    }

    /// A required field was missing from a row.
    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        Self::MissingFieldViolation {
            field: field.into(),
        }
    }

    /// A type mismatch at a consumer boundary.
    pub fn type_mismatch<F: Into<String>, E: Into<String>, G: Into<String>>(
        field: F,
        expected: E,
        found: G,
    ) -> Self {
        Self::TypeMismatchViolation {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}
