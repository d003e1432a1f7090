//! Anchor-aware semantic slicing
//!
//! From an anchored statement the slicer expands breadth-first in both directions:
//! backward along control predecessors and reaching definitions, forward along
//! control successors, data uses and into resolved callees. Every edge left
//! unexplored because a bound was hit is recorded as a [`SliceBoundary`].

use crate::analysis::DependencyGraph;
use crate::anchor::AnchorOccurrence;
use crate::error::{Error, Result};
use crate::parallel::{parallel_map, ParallelConfig};
use crate::parser::{NodeId, Program};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Slicing bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    /// Maximum number of dependency hops from the anchor (default: 8)
    pub max_depth: usize,
    /// Maximum number of nodes in one slice (default: 256)
    pub max_nodes: usize,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_nodes: 256,
        }
    }
}

/// Dependency relation followed by the slicer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Control predecessor or successor
    Control,
    /// Reaching definition or use
    Data,
    /// Call into a resolved function
    Call,
}

/// Which bound stopped the expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryReason {
    /// Depth bound
    MaxDepth,
    /// Node-count bound
    MaxNodes,
}

/// A dependency edge that was not followed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceBoundary {
    /// Node inside the slice
    pub from: NodeId,
    /// Node left outside
    pub to: NodeId,
    /// Relation of the skipped edge
    pub relation: Relation,
    /// Bound that was hit
    pub reason: BoundaryReason,
}

/// Marker reported when a slice was cut short by a bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceBoundaryReached {
    /// Anchored node
    pub anchor: NodeId,
    /// Number of edges left unexplored
    pub skipped_edges: usize,
}

/// Dependency closure of one anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    /// Anchor the slice was grown from
    pub anchor: AnchorOccurrence,
    /// Statements in the slice
    pub nodes: BTreeSet<NodeId>,
    /// Functions touched
    pub functions: BTreeSet<NodeId>,
    /// Contracts touched
    pub contracts: BTreeSet<NodeId>,
    /// Edges not followed because of a bound
    pub boundaries: Vec<SliceBoundary>,
}

impl Slice {
    /// Whether a bound cut the slice short
    pub fn truncated(&self) -> bool {
        !self.boundaries.is_empty()
    }

    /// Boundary marker, if the slice was truncated
    pub fn boundary_reached(&self) -> Option<SliceBoundaryReached> {
        self.truncated().then(|| SliceBoundaryReached {
            anchor: self.anchor.node,
            skipped_edges: self.boundaries.len(),
        })
    }

    /// Whether `node` is in the slice
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }
}

/// Slices anchors over a shared, read-only dependency graph
pub struct Slicer<'a> {
    program: &'a Program,
    deps: &'a DependencyGraph,
    config: SliceConfig,
}

impl<'a> Slicer<'a> {
    /// Create a slicer
    pub fn new(program: &'a Program, deps: &'a DependencyGraph, config: SliceConfig) -> Self {
        Slicer {
            program,
            deps,
            config,
        }
    }

    /// Dependency neighbours of a statement, sorted
    fn neighbors(&self, node: NodeId) -> Vec<(NodeId, Relation)> {
        let mut out = BTreeSet::new();
        for n in self.deps.cfg_predecessors(node) {
            out.insert((n, Relation::Control));
        }
        for n in self.deps.cfg_successors(node) {
            out.insert((n, Relation::Control));
        }
        for n in self.deps.dfg_definitions(node) {
            out.insert((n, Relation::Data));
        }
        for n in self.deps.dfg_uses(node) {
            out.insert((n, Relation::Data));
        }
        for callee in self.deps.callees(node) {
            if callee.is_unresolved() {
                continue;
            }
            for n in self.deps.entry_statements(callee) {
                out.insert((n, Relation::Call));
            }
        }
        out.into_iter().collect()
    }

    /// Slice one anchor
    pub fn slice(&self, anchor: &AnchorOccurrence) -> Result<Slice> {
        let start = anchor.node;
        if self.program.ast.get(start).is_none() {
            return Err(Error::SliceError {
                node: start,
                reason: "anchored node does not exist".to_string(),
            });
        }
        if self.config.max_nodes == 0 {
            return Err(Error::SliceError {
                node: start,
                reason: "max_nodes must be at least 1".to_string(),
            });
        }

        let mut visited: BTreeSet<NodeId> = BTreeSet::from([start]);
        let mut boundaries: BTreeSet<SliceBoundary> = BTreeSet::new();
        let mut frontier: BTreeSet<NodeId> = visited.clone();
        let mut depth = 0usize;

        // Anchors outside any function body have no dependencies and stay single-node
        while !frontier.is_empty() && self.deps.contains(start) {
            let mut next = BTreeSet::new();
            for &node in &frontier {
                for (neighbor, relation) in self.neighbors(node) {
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    let reason = if depth + 1 > self.config.max_depth {
                        Some(BoundaryReason::MaxDepth)
                    } else if visited.len() >= self.config.max_nodes {
                        Some(BoundaryReason::MaxNodes)
                    } else {
                        None
                    };
                    match reason {
                        Some(reason) => {
                            boundaries.insert(SliceBoundary {
                                from: node,
                                to: neighbor,
                                relation,
                                reason,
                            });
                        }
                        None => {
                            visited.insert(neighbor);
                            next.insert(neighbor);
                        }
                    }
                }
            }
            frontier = next;
            depth += 1;
        }

        let ast = &self.program.ast;
        let mut functions: BTreeSet<NodeId> = visited
            .iter()
            .filter_map(|&n| self.deps.function_of(n).or_else(|| ast.enclosing_function(n)))
            .collect();
        functions.extend(anchor.function);
        let mut contracts: BTreeSet<NodeId> = functions
            .iter()
            .chain(visited.iter())
            .filter_map(|&n| ast.enclosing_contract(n))
            .collect();
        contracts.extend(anchor.contract);

        let slice = Slice {
            anchor: anchor.clone(),
            nodes: visited,
            functions,
            contracts,
            boundaries: boundaries.into_iter().collect(),
        };
        debug!(
            anchor = %anchor.node,
            pattern = %anchor.pattern_id,
            nodes = slice.nodes.len(),
            truncated = slice.truncated(),
            "sliced anchor"
        );
        Ok(slice)
    }

    /// Slice every anchor on a worker pool; each anchor keeps its own outcome
    pub fn slice_all(
        &self,
        anchors: &[AnchorOccurrence],
        config: &ParallelConfig,
    ) -> Result<Vec<Result<Slice>>> {
        parallel_map(anchors, |anchor| self.slice(anchor), config)
    }
}
