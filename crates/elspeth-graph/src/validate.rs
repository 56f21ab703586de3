// crates/elspeth-graph/src/validate.rs
// ============================================================================
// Module: Graph Validation
// Description: Structural and schema checks run once, at graph construction.
// Purpose: Implement `spec.md` §4.5's validation list: no cycles, every node
// reachable from the source, every terminal node a sink, every edge's
// destination declared, coalesce branch sets matching incoming edges, and
// upstream output schemas covering downstream input schemas.
// Dependencies: elspeth-core, crate::node
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use elspeth_core::NodeType;

use crate::Graph;
use crate::GraphError;

impl Graph {
    /// Runs every structural and schema check `spec.md` §4.5 requires.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] found; checks run in the order
    /// cycle detection, reachability, terminal-node kind, coalesce branch
    /// matching, then schema coverage.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.check_no_cycles()?;
        self.check_reachability()?;
        self.check_terminal_nodes_are_sinks()?;
        self.check_coalesce_branches()?;
        self.check_schema_coverage()?;
        Ok(())
    }

    fn adjacency(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for node in &self.nodes {
            adjacency.entry(node.id.as_str()).or_default();
        }
        for edge in &self.edges {
            adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        }
        adjacency
    }

    fn check_no_cycles(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        let adjacency = self.adjacency();
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
            marks: &mut BTreeMap<&'a str, Mark>,
        ) -> Result<(), GraphError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(GraphError::Cycle(node.to_string())),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            if let Some(successors) = adjacency.get(node) {
                for successor in successors {
                    visit(successor, adjacency, marks)?;
                }
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        for node in adjacency.keys() {
            visit(node, &adjacency, &mut marks)?;
        }
        Ok(())
    }

    fn check_reachability(&self) -> Result<(), GraphError> {
        let Some(source) = self.nodes.iter().find(|node| node.node_type == NodeType::Source) else {
            return Err(GraphError::MissingSource);
        };
        let adjacency = self.adjacency();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut stack = vec![source.id.as_str()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(successors) = adjacency.get(current) {
                stack.extend(successors.iter().copied());
            }
        }
        for node in &self.nodes {
            if !visited.contains(node.id.as_str()) {
                return Err(GraphError::UnreachableNode(node.id.clone()));
            }
        }
        Ok(())
    }

    fn check_terminal_nodes_are_sinks(&self) -> Result<(), GraphError> {
        let has_outgoing: BTreeSet<&str> = self.edges.iter().map(|edge| edge.from.as_str()).collect();
        for node in &self.nodes {
            if !has_outgoing.contains(node.id.as_str()) && node.node_type != NodeType::Sink {
                return Err(GraphError::TerminalNodeNotSink(node.id.clone()));
            }
        }
        Ok(())
    }

    fn check_coalesce_branches(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            if node.node_type != NodeType::Coalesce {
                continue;
            }
            let incoming: BTreeSet<&str> = self
                .edges
                .iter()
                .filter(|edge| edge.to == node.id)
                .map(|edge| edge.label.as_str())
                .collect();
            if incoming.is_empty() {
                return Err(GraphError::CoalesceHasNoIncomingEdges(node.id.clone()));
            }
            if let Some(declared) = self.coalesce_branches.get(&node.id) {
                let declared: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
                if declared != incoming {
                    return Err(GraphError::CoalesceHasNoIncomingEdges(node.id.clone()));
                }
            }
        }
        Ok(())
    }

    fn check_schema_coverage(&self) -> Result<(), GraphError> {
        for edge in &self.edges {
            let Some(from_node) = self.nodes.iter().find(|node| node.id == edge.from) else {
                continue;
            };
            let Some(to_node) = self.nodes.iter().find(|node| node.id == edge.to) else {
                continue;
            };
            if !from_node.output_schema.covers(&to_node.input_schema) {
                return Err(GraphError::SchemaMismatch {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
        }
        Ok(())
    }
}
