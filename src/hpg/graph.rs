use crate::anchor::AnchorOccurrence;
use crate::error::{Error, Result};
use crate::parser::NodeId;
use crate::slicer::SliceBoundary;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Node type of the heterogeneous program graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HpgNodeType {
    /// Statement or statement container
    Statement,
    /// Function, modifier, or the unresolved-call sentinel
    Function,
    /// Contract, interface or library
    Contract,
}

/// Edge type of the heterogeneous program graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HpgEdgeType {
    /// Child -> syntactic parent
    AstChildOf,
    /// Control transfer within one function
    CfgNext,
    /// Definition reaches use
    DfgReaches,
    /// Call site or caller -> callee
    Calls,
    /// Derived contract -> base contract
    InheritsFrom,
}

impl fmt::Display for HpgEdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HpgEdgeType::AstChildOf => "ast_child_of",
            HpgEdgeType::CfgNext => "cfg_next",
            HpgEdgeType::DfgReaches => "dfg_reaches",
            HpgEdgeType::Calls => "calls",
            HpgEdgeType::InheritsFrom => "inherits_from",
        };
        write!(f, "{}", name)
    }
}

impl HpgEdgeType {
    /// Whether an edge of this type may connect `source` to `target`
    pub fn accepts(self, source: HpgNodeType, target: HpgNodeType) -> bool {
        use HpgNodeType::*;
        match self {
            // State variable declarations hang directly off their contract
            HpgEdgeType::AstChildOf => matches!(
                (source, target),
                (Statement, Statement) | (Statement, Function) | (Statement, Contract) | (Function, Contract)
            ),
            HpgEdgeType::CfgNext | HpgEdgeType::DfgReaches => {
                source == Statement && target == Statement
            }
            HpgEdgeType::Calls => matches!(source, Statement | Function) && target == Function,
            HpgEdgeType::InheritsFrom => source == Contract && target == Contract,
        }
    }
}

/// Minimal feature payload of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFeatures {
    /// Syntactic kind label
    pub kind: String,
    /// Declared name of functions and contracts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Source file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line (1-indexed, 0 when unknown)
    pub line: usize,
    /// Column (1-indexed, 0 when unknown)
    pub column: usize,
    /// Anchor categories anchored on this node
    #[serde(default)]
    pub anchors: Vec<String>,
    /// Whether the node belongs to a slice rather than being syntactic context
    #[serde(default)]
    pub in_slice: bool,
    /// Set on the unresolved-call sentinel
    #[serde(default)]
    pub unresolved: bool,
}

/// A typed node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpgNode {
    /// Stable id shared with the syntax tree
    pub id: NodeId,
    /// Node type
    #[serde(rename = "type")]
    pub node_type: HpgNodeType,
    /// Owning function of a statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<NodeId>,
    /// Feature payload
    pub features: NodeFeatures,
}

/// A typed edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HpgEdge {
    /// Edge type
    #[serde(rename = "type")]
    pub edge_type: HpgEdgeType,
    /// Source node id
    pub source: NodeId,
    /// Target node id
    pub target: NodeId,
}

/// Heterogeneous program graph over the union of slices
///
/// Cycles along `cfg_next`, `dfg_reaches` and `calls` are ordinary structure;
/// `ast_child_of` must stay a forest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hpg {
    nodes: BTreeMap<NodeId, HpgNode>,
    edges: BTreeSet<HpgEdge>,
    parents: BTreeMap<NodeId, NodeId>,
    /// Anchors the graph was built from
    pub anchors: Vec<AnchorOccurrence>,
    /// Slice boundaries of those anchors
    pub boundaries: Vec<SliceBoundary>,
}

impl Hpg {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, or merge it into the node with the same id
    pub fn add_node(&mut self, node: HpgNode) -> Result<()> {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                if existing.node_type != node.node_type {
                    return Err(Error::invariant(format!(
                        "node {} inserted as {:?} and {:?}",
                        node.id, existing.node_type, node.node_type
                    )));
                }
                existing.features.in_slice |= node.features.in_slice;
                for category in node.features.anchors {
                    if !existing.features.anchors.contains(&category) {
                        existing.features.anchors.push(category);
                    }
                }
                existing.features.anchors.sort();
                if existing.function.is_none() {
                    existing.function = node.function;
                }
            }
            None => {
                self.nodes.insert(node.id, node);
            }
        }
        Ok(())
    }

    /// Insert an edge after checking type compatibility
    pub fn add_edge(&mut self, edge_type: HpgEdgeType, source: NodeId, target: NodeId) -> Result<()> {
        let edge = HpgEdge {
            edge_type,
            source,
            target,
        };
        if self.edges.contains(&edge) {
            return Ok(());
        }
        self.check_edge(&edge)?;
        if edge_type == HpgEdgeType::AstChildOf {
            self.parents.insert(source, target);
        }
        self.edges.insert(edge);
        Ok(())
    }

    fn check_edge(&self, edge: &HpgEdge) -> Result<()> {
        let (Some(source), Some(target)) = (self.nodes.get(&edge.source), self.nodes.get(&edge.target))
        else {
            return Err(Error::invariant(format!(
                "{} edge {} -> {} references a missing node",
                edge.edge_type, edge.source, edge.target
            )));
        };
        if !edge.edge_type.accepts(source.node_type, target.node_type) {
            return Err(Error::invariant(format!(
                "{} cannot connect {:?} {} to {:?} {}",
                edge.edge_type, source.node_type, edge.source, target.node_type, edge.target
            )));
        }
        match edge.edge_type {
            HpgEdgeType::CfgNext if source.function != target.function || source.function.is_none() => {
                Err(Error::invariant(format!(
                    "cfg_next {} -> {} crosses function boundaries",
                    edge.source, edge.target
                )))
            }
            HpgEdgeType::AstChildOf => {
                if let Some(&parent) = self.parents.get(&edge.source) {
                    if parent != edge.target {
                        return Err(Error::invariant(format!(
                            "node {} already has syntactic parent {}",
                            edge.source, parent
                        )));
                    }
                }
                let mut current = Some(edge.target);
                while let Some(node) = current {
                    if node == edge.source {
                        return Err(Error::invariant(format!(
                            "ast_child_of {} -> {} closes a cycle",
                            edge.source, edge.target
                        )));
                    }
                    current = self.parents.get(&node).copied();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Re-check every structural invariant
    pub fn validate(&self) -> Result<()> {
        let mut rebuilt = Hpg {
            nodes: self.nodes.clone(),
            ..Default::default()
        };
        for edge in &self.edges {
            rebuilt.add_edge(edge.edge_type, edge.source, edge.target)?;
        }
        for node in self.nodes.values() {
            if node.node_type == HpgNodeType::Statement && !rebuilt.parents.contains_key(&node.id) {
                return Err(Error::invariant(format!(
                    "statement {} has no ast_child_of edge",
                    node.id
                )));
            }
        }
        Ok(())
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> Option<&HpgNode> {
        self.nodes.get(&id)
    }

    /// Nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &HpgNode> {
        self.nodes.values()
    }

    /// Edges in sorted order
    pub fn edges(&self) -> impl Iterator<Item = &HpgEdge> {
        self.edges.iter()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether an edge of `edge_type` connects `source` to `target`
    pub fn has_edge(&self, edge_type: HpgEdgeType, source: NodeId, target: NodeId) -> bool {
        self.edges.contains(&HpgEdge {
            edge_type,
            source,
            target,
        })
    }

    /// Syntactic parent of a node
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(&id).copied()
    }

    /// Node count per type
    pub fn node_type_counts(&self) -> BTreeMap<HpgNodeType, usize> {
        let mut counts = BTreeMap::new();
        for node in self.nodes.values() {
            *counts.entry(node.node_type).or_insert(0) += 1;
        }
        counts
    }

    /// Edge count per type
    pub fn edge_type_counts(&self) -> BTreeMap<HpgEdgeType, usize> {
        let mut counts = BTreeMap::new();
        for edge in &self.edges {
            *counts.entry(edge.edge_type).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, node_type: HpgNodeType, function: Option<u32>) -> HpgNode {
        HpgNode {
            id: NodeId(id),
            node_type,
            function: function.map(NodeId),
            features: NodeFeatures::default(),
        }
    }

    fn sample() -> Hpg {
        let mut g = Hpg::new();
        g.add_node(node(0, HpgNodeType::Contract, None)).unwrap();
        g.add_node(node(1, HpgNodeType::Function, None)).unwrap();
        g.add_node(node(2, HpgNodeType::Statement, Some(1))).unwrap();
        g.add_node(node(3, HpgNodeType::Statement, Some(1))).unwrap();
        g.add_edge(HpgEdgeType::AstChildOf, NodeId(1), NodeId(0)).unwrap();
        g.add_edge(HpgEdgeType::AstChildOf, NodeId(2), NodeId(1)).unwrap();
        g.add_edge(HpgEdgeType::AstChildOf, NodeId(3), NodeId(1)).unwrap();
        g
    }

    #[test]
    fn test_cfg_cycles_are_allowed() {
        let mut g = sample();
        g.add_edge(HpgEdgeType::CfgNext, NodeId(2), NodeId(3)).unwrap();
        g.add_edge(HpgEdgeType::CfgNext, NodeId(3), NodeId(2)).unwrap();
        g.validate().unwrap();
    }

    #[test]
    fn test_incompatible_edges_are_rejected() {
        let mut g = sample();
        assert!(g.add_edge(HpgEdgeType::CfgNext, NodeId(1), NodeId(2)).is_err());
        assert!(g.add_edge(HpgEdgeType::InheritsFrom, NodeId(0), NodeId(1)).is_err());
        assert!(g.add_edge(HpgEdgeType::Calls, NodeId(2), NodeId(3)).is_err());
    }

    #[test]
    fn test_cfg_next_must_stay_in_function() {
        let mut g = sample();
        g.add_node(node(4, HpgNodeType::Function, None)).unwrap();
        g.add_node(node(5, HpgNodeType::Statement, Some(4))).unwrap();
        assert!(g.add_edge(HpgEdgeType::CfgNext, NodeId(2), NodeId(5)).is_err());
    }

    #[test]
    fn test_ast_cycle_is_rejected() {
        let mut g = sample();
        g.add_node(node(6, HpgNodeType::Statement, Some(1))).unwrap();
        g.add_edge(HpgEdgeType::AstChildOf, NodeId(6), NodeId(2)).unwrap();
        assert!(g.add_edge(HpgEdgeType::AstChildOf, NodeId(2), NodeId(6)).is_err());
    }

    #[test]
    fn test_orphan_statement_fails_validation() {
        let mut g = sample();
        g.add_node(node(7, HpgNodeType::Statement, Some(1))).unwrap();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_merge_keeps_type_and_unions_anchors() {
        let mut g = sample();
        let mut again = node(2, HpgNodeType::Statement, Some(1));
        again.features.anchors = vec!["unchecked-call".into()];
        again.features.in_slice = true;
        g.add_node(again).unwrap();
        let merged = g.node(NodeId(2)).unwrap();
        assert!(merged.features.in_slice);
        assert_eq!(merged.features.anchors, vec!["unchecked-call".to_string()]);
        assert!(g.add_node(node(2, HpgNodeType::Function, None)).is_err());
    }
}
