use super::graph::{Hpg, HpgEdgeType, HpgNode, HpgNodeType, NodeFeatures};
use crate::analysis::DependencyGraph;
use crate::error::Result;
use crate::parser::{NodeId, NodeKind, Program};
use crate::slicer::Slice;
use std::collections::BTreeSet;
use tracing::debug;

/// Merges the slices of one analysis run into a single [`Hpg`]
pub struct HpgAssembler<'a> {
    program: &'a Program,
    deps: &'a DependencyGraph,
}

impl<'a> HpgAssembler<'a> {
    pub fn new(program: &'a Program, deps: &'a DependencyGraph) -> Self {
        HpgAssembler { program, deps }
    }

    fn node_type(&self, id: NodeId) -> HpgNodeType {
        match self.program.ast.kind(id) {
            Some(kind) if kind.is_function() => HpgNodeType::Function,
            Some(kind) if kind.is_contract() => HpgNodeType::Contract,
            _ => HpgNodeType::Statement,
        }
    }

    fn make_node(&self, id: NodeId, in_slice: bool) -> HpgNode {
        if id.is_unresolved() {
            return HpgNode {
                id,
                node_type: HpgNodeType::Function,
                function: None,
                features: NodeFeatures {
                    kind: "unresolved".to_string(),
                    unresolved: true,
                    ..Default::default()
                },
            };
        }
        let node_type = self.node_type(id);
        let ast = &self.program.ast;
        let (kind, line, column) = match ast.get(id) {
            Some(node) => (node.kind.label().to_string(), node.span.line, node.span.column),
            None => ("unknown".to_string(), 0, 0),
        };
        let name = match node_type {
            HpgNodeType::Statement => None,
            _ => self.program.name_of(id).map(str::to_string),
        };
        HpgNode {
            id,
            node_type,
            function: match node_type {
                HpgNodeType::Statement => self
                    .deps
                    .function_of(id)
                    .or_else(|| ast.enclosing_function(id)),
                _ => None,
            },
            features: NodeFeatures {
                kind,
                name,
                file: self.program.file_of(id).map(str::to_string),
                line,
                column,
                anchors: Vec::new(),
                in_slice,
                unresolved: false,
            },
        }
    }

    /// Insert `id` and its syntactic ancestors up to the contract, linked by `ast_child_of`
    fn add_with_context(&self, hpg: &mut Hpg, id: NodeId, in_slice: bool) -> Result<()> {
        hpg.add_node(self.make_node(id, in_slice))?;
        if id.is_unresolved() {
            return Ok(());
        }
        let mut child = id;
        for ancestor in self.program.ast.ancestors(id) {
            if matches!(self.program.ast.kind(ancestor), Some(NodeKind::SourceUnit)) {
                break;
            }
            let known = hpg.node(ancestor).is_some();
            if !known {
                hpg.add_node(self.make_node(ancestor, false))?;
            }
            hpg.add_edge(HpgEdgeType::AstChildOf, child, ancestor)?;
            // The rest of the chain is already in place
            if known {
                break;
            }
            child = ancestor;
        }
        Ok(())
    }

    /// Build the graph for `slices`
    pub fn assemble(&self, slices: &[Slice]) -> Result<Hpg> {
        let mut hpg = Hpg::new();

        for slice in slices {
            for &node in &slice.nodes {
                self.add_with_context(&mut hpg, node, true)?;
            }
            for &function in &slice.functions {
                self.add_with_context(&mut hpg, function, false)?;
            }
            for &contract in &slice.contracts {
                self.add_with_context(&mut hpg, contract, false)?;
            }
            let mut anchored = self.make_node(slice.anchor.node, true);
            anchored.features.anchors.push(slice.anchor.category.clone());
            hpg.add_node(anchored)?;
        }

        let in_slice: BTreeSet<NodeId> = slices.iter().flat_map(|s| s.nodes.iter().copied()).collect();
        for &node in &in_slice {
            for next in self.deps.cfg_successors(node) {
                if in_slice.contains(&next) {
                    hpg.add_edge(HpgEdgeType::CfgNext, node, next)?;
                }
            }
            for usage in self.deps.dfg_uses(node) {
                if in_slice.contains(&usage) {
                    hpg.add_edge(HpgEdgeType::DfgReaches, node, usage)?;
                }
            }
        }

        let functions: BTreeSet<NodeId> = hpg
            .nodes()
            .filter(|n| n.node_type == HpgNodeType::Function)
            .map(|n| n.id)
            .collect();
        let ast = &self.program.ast;
        for edge in &self.deps.calls.edges {
            let from_site = in_slice.contains(&edge.site) || functions.contains(&edge.site);
            let crosses_contract = edge.callee.is_unresolved()
                || ast.enclosing_contract(edge.callee) != ast.enclosing_contract(edge.caller);
            let from_caller = functions.contains(&edge.caller) && crosses_contract;
            if !from_site && !from_caller {
                continue;
            }
            self.add_with_context(&mut hpg, edge.callee, false)?;
            if from_site {
                hpg.add_edge(HpgEdgeType::Calls, edge.site, edge.callee)?;
            }
            if from_caller {
                hpg.add_edge(HpgEdgeType::Calls, edge.caller, edge.callee)?;
            }
        }

        let contracts: BTreeSet<NodeId> = hpg
            .nodes()
            .filter(|n| n.node_type == HpgNodeType::Contract)
            .map(|n| n.id)
            .collect();
        for &(derived, base) in &self.deps.calls.inherits {
            if contracts.contains(&derived) {
                self.add_with_context(&mut hpg, base, false)?;
                hpg.add_edge(HpgEdgeType::InheritsFrom, derived, base)?;
            }
        }

        hpg.anchors = slices.iter().map(|s| s.anchor.clone()).collect();
        let boundaries: BTreeSet<_> = slices.iter().flat_map(|s| s.boundaries.iter().copied()).collect();
        hpg.boundaries = boundaries.into_iter().collect();

        hpg.validate()?;
        debug!(
            slices = slices.len(),
            nodes = hpg.node_count(),
            edges = hpg.edge_count(),
            "assembled program graph"
        );
        Ok(hpg)
    }
}
