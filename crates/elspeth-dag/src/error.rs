//! Error taxonomy for DAG construction and validation.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or validating an [`crate::graph::ExecutionGraph`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An edge references a node that was never added to the graph.
    #[error("edge references unknown node `{0}`")]
    UnknownNode(String),

    /// A back-edge was found during structural validation: the graph is
    /// not a DAG.
    #[error("cycle detected in execution graph at node `{0}`")]
    CycleDetected(String),

    /// A node's in-degree or out-degree violates the constraint its node
    /// type imposes (e.g. a sink with an outgoing edge).
    #[error("node `{node}` violates degree constraint: {detail}")]
    DegreeViolation {
        /// The offending node.
        node: String,
        /// Description of the constraint that was violated.
        detail: String,
    },

    /// A sink declared it consumes a named artifact that no ancestor
    /// node's `produces()` declares.
    #[error("node `{node}` consumes artifact(s) {missing:?} with no matching upstream producer")]
    UnmatchedArtifact {
        /// The consuming node.
        node: String,
        /// The artifact names with no matching upstream producer.
        missing: Vec<String>,
    },

    /// A consumer's required fields are not all guaranteed by its
    /// producer, discovered during [`crate::graph::ExecutionGraph::validate_edge_compatibility`].
    #[error(
        "Schema contract violation on edge `{producer}` -> `{consumer}`: consumer requires {required:?} but producer guarantees {guaranteed_desc}. Missing fields: {missing:?}"
    )]
    SchemaContractViolation {
        /// The producing node.
        producer: String,
        /// The consuming node.
        consumer: String,
        /// The consumer's full required-field set.
        required: Vec<String>,
        /// Human-readable rendering of what the producer guarantees (or
        /// `"none - dynamic schema"` if it guarantees nothing).
        guaranteed_desc: String,
        /// The required fields the producer does not guarantee.
        missing: Vec<String>,
    },
}
