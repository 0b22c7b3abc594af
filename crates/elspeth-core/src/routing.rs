//! Gate routing decisions.

use serde_json::Value;

/// Where a gate sends a token next. Mirrors the DAG edge labels from spec
/// §4.12: `continue`, a named branch, or a direct sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingAction {
    /// Proceed along the default (unlabeled) edge.
    Continue,
    /// Fan out to one or more named branches.
    Route {
        /// Branch names this token is routed to.
        destinations: Vec<String>,
    },
}

impl RoutingAction {
    /// Continue along the default edge.
    pub fn continue_() -> Self {
        Self::Continue
    }

    /// Route to a single named branch, with a structured reason recorded
    /// for audit.
    pub fn route(destination: impl Into<String>, _reason: Value) -> Self {
        Self::Route {
            destinations: vec![destination.into()],
        }
    }

    /// The branch names this decision routes to, empty for `Continue`.
    pub fn destinations(&self) -> &[String] {
        match self {
            RoutingAction::Continue => &[],
            RoutingAction::Route { destinations } => destinations,
        }
    }
}
