//! Dependency analysis
//!
//! Computes, per function, a statement-level control-flow graph and reaching
//! definitions, and across the program the call and inheritance relations. The
//! result is a read-only [`DependencyGraph`] that the slicer walks in both
//! directions.

mod calls;
mod cfg;
mod dfg;
mod scope;

pub use calls::{CallEdge, CallGraph, UnresolvedReferenceWarning};
pub use cfg::{BasicBlock, CfgEdge, CfgEdgeKind, CfgNode, FunctionCfg};
pub use dfg::{reaching_definitions, Def, DefUse, DfgEdge, Resolver, VarKey};
pub use scope::{FunctionLocals, Scope};

use crate::error::Result;
use crate::parallel::{parallel_map, ParallelConfig};
use crate::parser::{NodeId, Program};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Control, data and call dependencies of a whole program
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Control-flow graph per function
    pub cfgs: BTreeMap<NodeId, FunctionCfg>,
    /// Def -> use edges, sorted
    pub dfg: Vec<DfgEdge>,
    /// Calls and inheritance
    pub calls: CallGraph,
    statement_function: BTreeMap<NodeId, NodeId>,
    dfg_out: BTreeMap<NodeId, BTreeSet<NodeId>>,
    dfg_in: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl DependencyGraph {
    /// Analyze every function of `program`
    ///
    /// Functions are independent, so they are analyzed on a worker pool.
    pub fn build(program: &Program, config: &ParallelConfig) -> Result<Self> {
        let scope = Scope::build(program);
        let functions = program.functions();

        let per_function = parallel_map(
            &functions,
            |&function| {
                let cfg = FunctionCfg::build(&program.ast, function);
                let edges = reaching_definitions(program, &scope, &cfg);
                Ok((cfg, edges))
            },
            config,
        )?;

        let mut graph = DependencyGraph {
            calls: CallGraph::build(program, &scope),
            ..Default::default()
        };
        for (function, result) in functions.iter().zip(per_function) {
            match result {
                Ok((cfg, edges)) => {
                    for statement in cfg.statements() {
                        graph.statement_function.insert(statement, *function);
                    }
                    graph.dfg.extend(edges);
                    graph.cfgs.insert(*function, cfg);
                }
                Err(e) => warn!(function = %function, error = %e, "dependency analysis failed"),
            }
        }

        graph.dfg.sort();
        for edge in &graph.dfg {
            graph.dfg_out.entry(edge.from).or_default().insert(edge.to);
            graph.dfg_in.entry(edge.to).or_default().insert(edge.from);
        }
        debug!(
            functions = graph.cfgs.len(),
            dfg_edges = graph.dfg.len(),
            call_edges = graph.calls.edges.len(),
            "dependency analysis complete"
        );
        Ok(graph)
    }

    /// Function owning a statement
    pub fn function_of(&self, statement: NodeId) -> Option<NodeId> {
        self.statement_function.get(&statement).copied()
    }

    /// CFG of the function owning a statement
    pub fn cfg_of(&self, statement: NodeId) -> Option<&FunctionCfg> {
        self.function_of(statement).and_then(|f| self.cfgs.get(&f))
    }

    /// Statements that may execute right after `statement`
    pub fn cfg_successors(&self, statement: NodeId) -> Vec<NodeId> {
        self.cfg_neighbors(statement, true)
    }

    /// Statements that may execute right before `statement`
    pub fn cfg_predecessors(&self, statement: NodeId) -> Vec<NodeId> {
        self.cfg_neighbors(statement, false)
    }

    fn cfg_neighbors(&self, statement: NodeId, forward: bool) -> Vec<NodeId> {
        let Some(cfg) = self.cfg_of(statement) else {
            return Vec::new();
        };
        let edges = if forward {
            cfg.successors(CfgNode::Stmt(statement))
        } else {
            cfg.predecessors(CfgNode::Stmt(statement))
        };
        let set: BTreeSet<NodeId> = edges.into_iter().filter_map(|(n, _)| n.statement()).collect();
        set.into_iter().collect()
    }

    /// Statements whose definitions reach `statement`
    pub fn dfg_definitions(&self, statement: NodeId) -> Vec<NodeId> {
        self.dfg_in
            .get(&statement)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Statements using definitions made by `statement`
    pub fn dfg_uses(&self, statement: NodeId) -> Vec<NodeId> {
        self.dfg_out
            .get(&statement)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Functions called from a statement (may include the unresolved sentinel)
    pub fn callees(&self, statement: NodeId) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self.calls.callees_of(statement).collect();
        set.into_iter().collect()
    }

    /// First statements of a function body
    pub fn entry_statements(&self, function: NodeId) -> Vec<NodeId> {
        self.cfgs
            .get(&function)
            .map(FunctionCfg::entry_statements)
            .unwrap_or_default()
    }

    /// Whether `statement` belongs to an analyzed function
    pub fn contains(&self, statement: NodeId) -> bool {
        self.statement_function.contains_key(&statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdraw_pattern_dependencies() {
        let program = Program::from_source(
            "Vault.sol",
            r#"contract Vault { mapping(address => uint) balances;
               function withdraw() public {
                   uint amount = balances[msg.sender];
                   (bool ok, ) = msg.sender.call{value: amount}("");
                   require(ok);
                   balances[msg.sender] = 0;
               } }"#,
        )
        .unwrap();
        let graph = DependencyGraph::build(&program, &ParallelConfig::default()).unwrap();
        let withdraw = program.functions()[0];
        let stmts: Vec<NodeId> = graph.cfgs[&withdraw].statements().collect();
        assert_eq!(stmts.len(), 4);
        let (amount, call, require, write) = (stmts[0], stmts[1], stmts[2], stmts[3]);

        assert_eq!(graph.cfg_successors(amount), vec![call]);
        assert_eq!(graph.cfg_successors(call), vec![require]);
        assert_eq!(graph.cfg_predecessors(write), vec![require]);
        assert_eq!(graph.dfg_uses(amount), vec![call]);
        assert_eq!(graph.dfg_uses(call), vec![require]);
        assert_eq!(graph.callees(call), vec![NodeId::UNRESOLVED]);
        assert_eq!(graph.entry_statements(withdraw), vec![amount]);
        assert_eq!(graph.function_of(write), Some(withdraw));
    }
}
