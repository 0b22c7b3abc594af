//! The DAG model and its schema contract validator.
//!
//! A node's *guaranteed* fields are what it promises a downstream consumer
//! will always be present; a node's *required* fields are what it demands
//! be present on its input. Validation walks every edge and checks the
//! producer's effective guarantees against the consumer's required set.
//! GATE nodes pass guarantees through from their single upstream producer;
//! COALESCE nodes guarantee only the intersection across every branch
//! feeding them, since any branch could be the one that actually arrives.

use crate::error::{Error, Result};
use elspeth_core::contract::{SchemaConfig, SchemaMode};
use elspeth_core::ids::NodeId;
use elspeth_core::model::NodeType;
use std::collections::{BTreeSet, HashMap};

/// Derive a node's guaranteed fields from its schema configuration:
/// an explicit `guaranteed_fields` list wins; otherwise a FIXED/FLEXIBLE
/// schema's declared fields are guaranteed; a pure OBSERVED schema with no
/// explicit promise guarantees nothing.
pub fn guaranteed_fields_for(schema: &SchemaConfig) -> BTreeSet<String> {
    if !schema.guaranteed_fields.is_empty() {
        return schema.guaranteed_fields.iter().cloned().collect();
    }
    match schema.mode {
        SchemaMode::Fixed | SchemaMode::Flexible => schema
            .fields
            .as_ref()
            .map(|fields| fields.iter().map(|f| f.normalized_name.clone()).collect())
            .unwrap_or_default(),
        SchemaMode::Observed => BTreeSet::new(),
    }
}

/// Derive a node's required input fields: an explicit `required_input_fields`
/// override (if the caller supplies one) wins over the schema's own
/// `required_fields`; a schema's implicitly-required declared fields (FIXED
/// mode) are never counted here, only explicit declarations are.
pub fn required_fields_for(
    schema: &SchemaConfig,
    required_input_fields: Option<&[String]>,
) -> BTreeSet<String> {
    if let Some(explicit) = required_input_fields {
        return explicit.iter().cloned().collect();
    }
    schema.required_fields.iter().cloned().collect()
}

/// One node in the DAG, with its guarantees and requirements already
/// resolved from configuration.
#[derive(Debug, Clone)]
pub struct DagNode {
    /// Identity.
    pub node_id: NodeId,
    /// The node's category, which governs how its effective guarantees
    /// are computed.
    pub node_type: NodeType,
    /// The registered plugin name, for diagnostics.
    pub plugin_name: String,
    /// Fields this node promises are present on every row it emits.
    pub guaranteed_fields: BTreeSet<String>,
    /// Fields this node demands be present on its input.
    pub required_fields: BTreeSet<String>,
    /// Names of artifacts this node's `produces()` declares, if it is a
    /// sink.
    pub produced_artifacts: BTreeSet<String>,
    /// Names of artifacts this node's `consumes()` declares, if it is a
    /// sink.
    pub consumed_artifacts: BTreeSet<String>,
}

/// The pipeline's DAG: nodes plus directed producer-to-consumer edges.
#[derive(Debug, Default)]
pub struct ExecutionGraph {
    nodes: HashMap<NodeId, DagNode>,
    outgoing: HashMap<NodeId, Vec<NodeId>>,
    incoming: HashMap<NodeId, Vec<NodeId>>,
}

impl ExecutionGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    pub fn add_node(&mut self, node: DagNode) {
        self.nodes.insert(node.node_id.clone(), node);
    }

    /// Add a directed edge from `from` to `to`. Both nodes must already
    /// have been added.
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId) -> Result<()> {
        if !self.nodes.contains_key(from) {
            return Err(Error::UnknownNode(from.to_string()));
        }
        if !self.nodes.contains_key(to) {
            return Err(Error::UnknownNode(to.to_string()));
        }
        self.outgoing.entry(from.clone()).or_default().push(to.clone());
        self.incoming.entry(to.clone()).or_default().push(from.clone());
        Ok(())
    }

    /// A node's own declared guaranteed fields (spec §5 contract
    /// validation helper), ignoring pass-through/intersection rules.
    pub fn guaranteed_fields(&self, node_id: &NodeId) -> Result<&BTreeSet<String>> {
        self.nodes
            .get(node_id)
            .map(|n| &n.guaranteed_fields)
            .ok_or_else(|| Error::UnknownNode(node_id.to_string()))
    }

    /// A node's own declared required fields.
    pub fn required_fields(&self, node_id: &NodeId) -> Result<&BTreeSet<String>> {
        self.nodes
            .get(node_id)
            .map(|n| &n.required_fields)
            .ok_or_else(|| Error::UnknownNode(node_id.to_string()))
    }

    /// The fields a node *effectively* guarantees downstream, accounting
    /// for GATE passthrough and COALESCE intersection.
    pub fn effective_guaranteed_fields(&self, node_id: &NodeId) -> Result<BTreeSet<String>> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| Error::UnknownNode(node_id.to_string()))?;

        match node.node_type {
            NodeType::Gate => {
                let upstream = self.incoming.get(node_id).cloned().unwrap_or_default();
                match upstream.first() {
                    Some(producer) => self.effective_guaranteed_fields(producer),
                    None => Ok(BTreeSet::new()),
                }
            }
            NodeType::Coalesce => {
                let branches = self.incoming.get(node_id).cloned().unwrap_or_default();
                let mut branch_sets = branches
                    .iter()
                    .map(|branch| self.effective_guaranteed_fields(branch));
                let Some(first) = branch_sets.next() else {
                    return Ok(BTreeSet::new());
                };
                let mut intersection = first?;
                for set in branch_sets {
                    let set = set?;
                    intersection = intersection.intersection(&set).cloned().collect();
                }
                Ok(intersection)
            }
            _ => Ok(node.guaranteed_fields.clone()),
        }
    }

    /// Run the full validation suite: structural checks (no cycles, sink
    /// degree constraints, sink `consumes()` matched by an upstream
    /// `produces()`), then the field-level contract pass. Structural
    /// checks run first since a malformed graph makes the contract pass
    /// meaningless.
    pub fn validate(&self) -> Result<()> {
        self.detect_cycles()?;
        self.validate_degrees()?;
        self.validate_artifact_flow()?;
        self.validate_edge_compatibility()
    }

    /// Depth-first search with a three-color mark, raising
    /// [`Error::CycleDetected`] at the first back-edge found. Every edge's
    /// endpoints are already guaranteed to exist by [`Self::add_edge`], so
    /// this pass never needs to re-check that separately.
    fn detect_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(node_id: &NodeId, graph: &ExecutionGraph, marks: &mut HashMap<NodeId, Mark>) -> Result<()> {
            match marks.get(node_id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => return Err(Error::CycleDetected(node_id.to_string())),
                _ => {}
            }
            marks.insert(node_id.clone(), Mark::InProgress);
            if let Some(children) = graph.outgoing.get(node_id) {
                for child in children {
                    visit(child, graph, marks)?;
                }
            }
            marks.insert(node_id.clone(), Mark::Done);
            Ok(())
        }

        let mut marks: HashMap<NodeId, Mark> =
            self.nodes.keys().map(|id| (id.clone(), Mark::Unvisited)).collect();
        for node_id in self.nodes.keys() {
            visit(node_id, self, &mut marks)?;
        }
        Ok(())
    }

    /// Enforce per-[`NodeType`] in-degree/out-degree shape: a source has
    /// no upstream and at least one downstream, a sink has at least one
    /// upstream (its outgoing edges, if any, chain into another sink that
    /// consumes its artifact), a gate passes through a single upstream, a
    /// coalesce merges at least two branches, and every other node sits
    /// between at least one upstream and one downstream.
    fn validate_degrees(&self) -> Result<()> {
        for (node_id, node) in &self.nodes {
            let in_degree = self.incoming.get(node_id).map(Vec::len).unwrap_or(0);
            let out_degree = self.outgoing.get(node_id).map(Vec::len).unwrap_or(0);
            let violation = |detail: String| {
                Err(Error::DegreeViolation { node: node_id.to_string(), detail })
            };
            match node.node_type {
                NodeType::Source => {
                    if in_degree != 0 {
                        return violation("a source node must have no incoming edges".to_string());
                    }
                    if out_degree == 0 {
                        return violation("a source node must have at least one outgoing edge".to_string());
                    }
                }
                NodeType::Sink => {
                    if in_degree == 0 {
                        return violation("a sink node must have at least one incoming edge".to_string());
                    }
                }
                NodeType::Gate => {
                    if in_degree != 1 {
                        return violation(format!(
                            "a gate node must have exactly one incoming edge, found {in_degree}"
                        ));
                    }
                    if out_degree == 0 {
                        return violation("a gate node must have at least one outgoing edge".to_string());
                    }
                }
                NodeType::Coalesce => {
                    if in_degree < 2 {
                        return violation(format!(
                            "a coalesce node must merge at least two inbound branches, found {in_degree}"
                        ));
                    }
                    if out_degree == 0 {
                        return violation("a coalesce node must have at least one outgoing edge".to_string());
                    }
                }
                NodeType::Transform | NodeType::Aggregation => {
                    if in_degree == 0 {
                        return violation("a transform/aggregation node must have at least one incoming edge".to_string());
                    }
                    if out_degree == 0 {
                        return violation("a transform/aggregation node must have at least one outgoing edge".to_string());
                    }
                }
            }
        }
        Ok(())
    }

    /// For every node declaring `consumed_artifacts`, check each name is
    /// produced by some ancestor in the graph.
    fn validate_artifact_flow(&self) -> Result<()> {
        for (node_id, node) in &self.nodes {
            if node.consumed_artifacts.is_empty() {
                continue;
            }
            let available = self.ancestor_produced_artifacts(node_id);
            let missing: Vec<String> =
                node.consumed_artifacts.difference(&available).cloned().collect();
            if !missing.is_empty() {
                return Err(Error::UnmatchedArtifact { node: node_id.to_string(), missing });
            }
        }
        Ok(())
    }

    fn ancestor_produced_artifacts(&self, node_id: &NodeId) -> BTreeSet<String> {
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut produced = BTreeSet::new();
        let mut stack: Vec<NodeId> = self.incoming.get(node_id).cloned().unwrap_or_default();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(ancestor) = self.nodes.get(&current) {
                produced.extend(ancestor.produced_artifacts.iter().cloned());
            }
            if let Some(parents) = self.incoming.get(&current) {
                stack.extend(parents.iter().cloned());
            }
        }
        produced
    }

    /// Validate every edge: each consumer's required fields must be a
    /// subset of its producer's effective guarantees.
    pub fn validate_edge_compatibility(&self) -> Result<()> {
        for (producer_id, consumers) in &self.outgoing {
            for consumer_id in consumers {
                self.validate_single_edge(producer_id, consumer_id)?;
            }
        }
        Ok(())
    }

    fn validate_single_edge(&self, producer_id: &NodeId, consumer_id: &NodeId) -> Result<()> {
        let consumer = self
            .nodes
            .get(consumer_id)
            .ok_or_else(|| Error::UnknownNode(consumer_id.to_string()))?;
        if consumer.required_fields.is_empty() {
            return Ok(());
        }

        let guaranteed = self.effective_guaranteed_fields(producer_id)?;
        let missing: BTreeSet<String> = consumer
            .required_fields
            .difference(&guaranteed)
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let guaranteed_desc = if guaranteed.is_empty() {
            "none - dynamic schema".to_string()
        } else {
            format!("{:?}", guaranteed.iter().collect::<Vec<_>>())
        };

        Err(Error::SchemaContractViolation {
            producer: producer_id.to_string(),
            consumer: consumer_id.to_string(),
            required: consumer.required_fields.iter().cloned().collect(),
            guaranteed_desc,
            missing: missing.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elspeth_core::contract::{FieldContract, FieldSource, FieldType};

    fn node(id: &str, node_type: NodeType, guaranteed: &[&str], required: &[&str]) -> DagNode {
        DagNode {
            node_id: NodeId::from_known(id.to_string()),
            node_type,
            plugin_name: id.to_string(),
            guaranteed_fields: guaranteed.iter().map(|s| s.to_string()).collect(),
            required_fields: required.iter().map(|s| s.to_string()).collect(),
            produced_artifacts: BTreeSet::new(),
            consumed_artifacts: BTreeSet::new(),
        }
    }

    fn producing_sink(id: &str, produced: &[&str]) -> DagNode {
        DagNode { produced_artifacts: produced.iter().map(|s| s.to_string()).collect(), ..node(id, NodeType::Sink, &[], &[]) }
    }

    fn consuming_sink(id: &str, consumed: &[&str]) -> DagNode {
        DagNode { consumed_artifacts: consumed.iter().map(|s| s.to_string()).collect(), ..node(id, NodeType::Sink, &[], &[]) }
    }

    #[test]
    fn guaranteed_fields_from_declared_fixed_schema() {
        let schema = SchemaConfig {
            mode: SchemaMode::Fixed,
            fields: Some(vec![FieldContract {
                normalized_name: "id".to_string(),
                original_name: "id".to_string(),
                field_type: FieldType::Int,
                required: true,
                source: FieldSource::Declared,
            }]),
            guaranteed_fields: vec![],
            audit_fields: vec![],
            required_fields: vec![],
        };
        assert_eq!(guaranteed_fields_for(&schema), BTreeSet::from(["id".to_string()]));
    }

    #[test]
    fn guaranteed_fields_empty_for_pure_observed() {
        let schema = SchemaConfig {
            mode: SchemaMode::Observed,
            fields: None,
            guaranteed_fields: vec![],
            audit_fields: vec![],
            required_fields: vec![],
        };
        assert!(guaranteed_fields_for(&schema).is_empty());
    }

    #[test]
    fn required_input_fields_override_wins_over_schema() {
        let schema = SchemaConfig {
            mode: SchemaMode::Observed,
            fields: None,
            guaranteed_fields: vec![],
            audit_fields: vec![],
            required_fields: vec!["schema_req".to_string()],
        };
        let result = required_fields_for(&schema, Some(&["config_req".to_string()]));
        assert_eq!(result, BTreeSet::from(["config_req".to_string()]));
    }

    #[test]
    fn producer_satisfying_consumer_passes() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &["a", "b"], &[]));
        graph.add_node(node("transform_1", NodeType::Transform, &["a", "b"], &["a"]));
        graph.add_node(node("sink_1", NodeType::Sink, &[], &[]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("transform_1")).unwrap();
        graph.add_edge(&NodeId::from_known("transform_1"), &NodeId::from_known("sink_1")).unwrap();

        assert!(graph.validate_edge_compatibility().is_ok());
    }

    #[test]
    fn missing_guarantee_is_rejected_with_field_names() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &["a"], &[]));
        graph.add_node(node("transform_1", NodeType::Transform, &[], &["a", "b"]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("transform_1")).unwrap();

        let err = graph.validate_edge_compatibility().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Schema contract violation"));
        assert!(message.contains("Missing fields"));
        assert!(message.contains("b"));
    }

    #[test]
    fn dynamic_producer_reports_no_guarantees() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &[], &[]));
        graph.add_node(node("transform_1", NodeType::Transform, &[], &["required_field"]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("transform_1")).unwrap();

        let err = graph.validate_edge_compatibility().unwrap_err();
        assert!(err.to_string().contains("none - dynamic schema"));
    }

    #[test]
    fn gate_inherits_guarantees_from_upstream() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &["x", "y"], &[]));
        graph.add_node(node("gate_1", NodeType::Gate, &[], &[]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("gate_1")).unwrap();

        let effective = graph.effective_guaranteed_fields(&NodeId::from_known("gate_1")).unwrap();
        assert_eq!(effective, BTreeSet::from(["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn coalesce_guarantees_only_the_intersection_of_its_branches() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("branch_a", NodeType::Transform, &["common", "a_only"], &[]));
        graph.add_node(node("branch_b", NodeType::Transform, &["common", "b_only"], &[]));
        graph.add_node(node("coalesce_1", NodeType::Coalesce, &[], &[]));
        graph.add_edge(&NodeId::from_known("branch_a"), &NodeId::from_known("coalesce_1")).unwrap();
        graph.add_edge(&NodeId::from_known("branch_b"), &NodeId::from_known("coalesce_1")).unwrap();

        let effective = graph.effective_guaranteed_fields(&NodeId::from_known("coalesce_1")).unwrap();
        assert_eq!(effective, BTreeSet::from(["common".to_string()]));
    }

    #[test]
    fn three_node_chain_catches_a_field_dropped_in_the_middle() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &["a", "b"], &[]));
        graph.add_node(node("transform_1", NodeType::Transform, &["a", "c"], &["a"]));
        graph.add_node(node("sink_1", NodeType::Sink, &[], &["a", "b"]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("transform_1")).unwrap();
        graph.add_edge(&NodeId::from_known("transform_1"), &NodeId::from_known("sink_1")).unwrap();

        let err = graph.validate_edge_compatibility().unwrap_err();
        assert!(err.to_string().contains("\"b\""));
    }

    #[test]
    fn consumer_without_requirements_always_passes() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &[], &[]));
        graph.add_node(node("transform_1", NodeType::Transform, &[], &[]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("transform_1")).unwrap();

        assert!(graph.validate_edge_compatibility().is_ok());
    }

    fn well_formed_chain() -> ExecutionGraph {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &["a"], &[]));
        graph.add_node(node("transform_1", NodeType::Transform, &["a"], &["a"]));
        graph.add_node(node("sink_1", NodeType::Sink, &[], &[]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("transform_1")).unwrap();
        graph.add_edge(&NodeId::from_known("transform_1"), &NodeId::from_known("sink_1")).unwrap();
        graph
    }

    #[test]
    fn well_formed_chain_validates() {
        assert!(well_formed_chain().validate().is_ok());
    }

    #[test]
    fn direct_cycle_between_two_nodes_is_rejected() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("a", NodeType::Transform, &[], &[]));
        graph.add_node(node("b", NodeType::Transform, &[], &[]));
        graph.add_edge(&NodeId::from_known("a"), &NodeId::from_known("b")).unwrap();
        graph.add_edge(&NodeId::from_known("b"), &NodeId::from_known("a")).unwrap();

        let err = graph.validate().unwrap_err();
        assert!(matches!(err, Error::CycleDetected(_)));
    }

    #[test]
    fn self_loop_is_rejected_as_a_cycle() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("a", NodeType::Transform, &[], &[]));
        graph.add_edge(&NodeId::from_known("a"), &NodeId::from_known("a")).unwrap();

        let err = graph.validate().unwrap_err();
        assert!(matches!(err, Error::CycleDetected(_)));
    }

    #[test]
    fn source_with_an_incoming_edge_violates_degree_constraint() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &[], &[]));
        graph.add_node(node("sink_1", NodeType::Sink, &[], &[]));
        graph.add_edge(&NodeId::from_known("sink_1"), &NodeId::from_known("source_1")).unwrap();

        let err = graph.validate().unwrap_err();
        assert!(matches!(err, Error::DegreeViolation { .. }));
    }

    #[test]
    fn coalesce_with_a_single_branch_violates_degree_constraint() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("branch_a", NodeType::Transform, &[], &[]));
        graph.add_node(node("coalesce_1", NodeType::Coalesce, &[], &[]));
        graph.add_node(node("sink_1", NodeType::Sink, &[], &[]));
        graph.add_edge(&NodeId::from_known("branch_a"), &NodeId::from_known("coalesce_1")).unwrap();
        graph.add_edge(&NodeId::from_known("coalesce_1"), &NodeId::from_known("sink_1")).unwrap();

        let err = graph.validate().unwrap_err();
        assert!(matches!(err, Error::DegreeViolation { .. }));
    }

    #[test]
    fn sink_with_no_incoming_edges_violates_degree_constraint() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("sink_1", NodeType::Sink, &[], &[]));

        let err = graph.validate().unwrap_err();
        assert!(matches!(err, Error::DegreeViolation { .. }));
    }

    #[test]
    fn sink_consuming_an_upstream_sinks_artifact_validates() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &[], &[]));
        graph.add_node(producing_sink("file_sink", &["export"]));
        graph.add_node(consuming_sink("webhook_sink", &["export"]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("file_sink")).unwrap();
        graph.add_edge(&NodeId::from_known("file_sink"), &NodeId::from_known("webhook_sink")).unwrap();

        assert!(graph.validate().is_ok());
    }

    #[test]
    fn sink_consuming_an_artifact_with_no_upstream_producer_is_rejected() {
        let mut graph = ExecutionGraph::new();
        graph.add_node(node("source_1", NodeType::Source, &[], &[]));
        graph.add_node(consuming_sink("webhook_sink", &["export"]));
        graph.add_edge(&NodeId::from_known("source_1"), &NodeId::from_known("webhook_sink")).unwrap();

        let err = graph.validate().unwrap_err();
        match err {
            Error::UnmatchedArtifact { missing, .. } => assert_eq!(missing, vec!["export".to_string()]),
            other => panic!("expected UnmatchedArtifact, got {other:?}"),
        }
    }
}
