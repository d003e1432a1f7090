//! # Control Flow Graph Construction
//!
//! Builds a statement-level control-flow graph per function and groups it into
//! basic blocks.

use crate::parser::{Ast, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A vertex of a function's control-flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CfgNode {
    /// Synthetic function entry
    Entry,
    /// A statement
    Stmt(NodeId),
    /// Synthetic function exit; returns and reverts end here
    Exit,
}

impl CfgNode {
    /// Statement id, if this is a statement vertex
    pub fn statement(self) -> Option<NodeId> {
        match self {
            CfgNode::Stmt(id) => Some(id),
            _ => None,
        }
    }
}

/// Kind of control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CfgEdgeKind {
    /// Fall-through to the next statement
    Sequential,
    /// Condition held
    TrueBranch,
    /// Condition failed
    FalseBranch,
    /// Back edge to a loop header
    LoopBack,
    /// Leaving a loop because its condition failed
    LoopExit,
    /// `return` to the function exit
    Return,
    /// `revert`, `throw` or a failing `require`/`assert`
    Revert,
    /// `break` out of a loop
    Break,
    /// `continue` to the next iteration
    Continue,
}

/// A directed control-transfer edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CfgEdge {
    /// Source vertex
    pub from: CfgNode,
    /// Target vertex
    pub to: CfgNode,
    /// Transfer kind
    pub kind: CfgEdgeKind,
}

/// A basic block in the control flow graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Unique block ID
    pub id: usize,
    /// Vertices in execution order
    pub nodes: Vec<CfgNode>,
    /// Successor block IDs
    pub successors: Vec<usize>,
    /// Predecessor block IDs
    pub predecessors: Vec<usize>,
}

impl BasicBlock {
    fn new(id: usize, leader: CfgNode) -> Self {
        Self {
            id,
            nodes: vec![leader],
            successors: Vec::new(),
            predecessors: Vec::new(),
        }
    }
}

/// Control flow graph of one function
#[derive(Debug, Clone)]
pub struct FunctionCfg {
    /// Owning function
    pub function: NodeId,
    /// All vertices
    pub nodes: BTreeSet<CfgNode>,
    /// All edges, sorted and deduplicated
    pub edges: Vec<CfgEdge>,
    /// Basic blocks; block 0 starts at `Entry`
    pub blocks: Vec<BasicBlock>,
    successors: BTreeMap<CfgNode, Vec<(CfgNode, CfgEdgeKind)>>,
    predecessors: BTreeMap<CfgNode, Vec<(CfgNode, CfgEdgeKind)>>,
    node_to_block: BTreeMap<CfgNode, usize>,
}

/// Pending edge waiting for its target
type Pending = (CfgNode, CfgEdgeKind);

struct LoopFrame {
    continue_target: CfgNode,
    breaks: Vec<Pending>,
}

struct Builder<'a> {
    ast: &'a Ast,
    nodes: BTreeSet<CfgNode>,
    edges: BTreeSet<CfgEdge>,
    loops: Vec<LoopFrame>,
}

impl<'a> Builder<'a> {
    fn add_edge(&mut self, from: CfgNode, to: CfgNode, kind: CfgEdgeKind) {
        self.edges.insert(CfgEdge { from, to, kind });
    }

    fn connect(&mut self, pending: &[Pending], to: CfgNode) {
        for &(from, kind) in pending {
            self.add_edge(from, to, kind);
        }
    }

    fn connect_as(&mut self, pending: &[Pending], to: CfgNode, kind: CfgEdgeKind) {
        for &(from, _) in pending {
            self.add_edge(from, to, kind);
        }
    }

    fn enter(&mut self, stmt: NodeId, incoming: &[Pending]) -> CfgNode {
        let node = CfgNode::Stmt(stmt);
        self.nodes.insert(node);
        self.connect(incoming, node);
        node
    }

    /// First vertex executed when running `stmt`
    fn first_node(&self, stmt: NodeId) -> Option<CfgNode> {
        let kind = self.ast.kind(stmt)?;
        if kind.is_container() {
            return self
                .ast
                .children(stmt)
                .iter()
                .find_map(|&c| self.first_node(c));
        }
        match kind {
            NodeKind::DoWhile => self
                .ast
                .children(stmt)
                .first()
                .and_then(|&body| self.first_node(body))
                .or(Some(CfgNode::Stmt(stmt))),
            NodeKind::For { .. } => self
                .ast
                .for_parts(stmt)
                .and_then(|p| p.init)
                .map(CfgNode::Stmt)
                .or(Some(CfgNode::Stmt(stmt))),
            _ if kind.is_cfg_statement() => Some(CfgNode::Stmt(stmt)),
            _ => None,
        }
    }

    /// Visit `stmt` reached by `incoming`; returns edges that fall out of it
    fn visit(&mut self, stmt: NodeId, incoming: Vec<Pending>) -> Vec<Pending> {
        let ast = self.ast;
        let Some(kind) = ast.kind(stmt) else {
            return incoming;
        };

        if kind.is_container() {
            let mut current = incoming;
            for &child in ast.children(stmt) {
                current = self.visit(child, current);
            }
            return current;
        }

        match kind {
            NodeKind::If { .. } => {
                let node = self.enter(stmt, &incoming);
                let Some((_, then_branch, else_branch)) = ast.if_parts(stmt) else {
                    return vec![(node, CfgEdgeKind::Sequential)];
                };
                let mut out = self.visit(then_branch, vec![(node, CfgEdgeKind::TrueBranch)]);
                match else_branch {
                    Some(else_branch) => {
                        out.extend(self.visit(else_branch, vec![(node, CfgEdgeKind::FalseBranch)]))
                    }
                    None => out.push((node, CfgEdgeKind::FalseBranch)),
                }
                out
            }
            NodeKind::While => {
                let header = self.enter(stmt, &incoming);
                self.loops.push(LoopFrame {
                    continue_target: header,
                    breaks: Vec::new(),
                });
                let body_out = match ast.children(stmt).get(1) {
                    Some(&body) => self.visit(body, vec![(header, CfgEdgeKind::TrueBranch)]),
                    None => vec![(header, CfgEdgeKind::TrueBranch)],
                };
                self.connect_as(&body_out, header, CfgEdgeKind::LoopBack);
                let frame = self.pop_loop();
                let mut out = vec![(header, CfgEdgeKind::LoopExit)];
                out.extend(frame.breaks);
                out
            }
            NodeKind::DoWhile => {
                let test = CfgNode::Stmt(stmt);
                self.nodes.insert(test);
                let body = ast.children(stmt).first().copied();
                let body_start = body.and_then(|b| self.first_node(b)).unwrap_or(test);
                self.loops.push(LoopFrame {
                    continue_target: test,
                    breaks: Vec::new(),
                });
                let body_out = match body {
                    Some(body) => self.visit(body, incoming),
                    None => incoming,
                };
                self.connect(&body_out, test);
                self.add_edge(test, body_start, CfgEdgeKind::LoopBack);
                let frame = self.pop_loop();
                let mut out = vec![(test, CfgEdgeKind::LoopExit)];
                out.extend(frame.breaks);
                out
            }
            NodeKind::For { .. } => {
                let Some(parts) = ast.for_parts(stmt) else {
                    return incoming;
                };
                let before = match parts.init {
                    Some(init) => self.visit(init, incoming),
                    None => incoming,
                };
                let header = self.enter(stmt, &before);
                let update = parts.update.map(|u| {
                    let node = CfgNode::Stmt(u);
                    self.nodes.insert(node);
                    node
                });
                self.loops.push(LoopFrame {
                    continue_target: update.unwrap_or(header),
                    breaks: Vec::new(),
                });
                let body_out = self.visit(parts.body, vec![(header, CfgEdgeKind::TrueBranch)]);
                match update {
                    Some(update) => {
                        self.connect(&body_out, update);
                        self.add_edge(update, header, CfgEdgeKind::LoopBack);
                    }
                    None => self.connect_as(&body_out, header, CfgEdgeKind::LoopBack),
                }
                let frame = self.pop_loop();
                let mut out = Vec::new();
                if parts.condition.is_some() {
                    out.push((header, CfgEdgeKind::LoopExit));
                }
                out.extend(frame.breaks);
                out
            }
            NodeKind::Try { .. } => {
                let node = self.enter(stmt, &incoming);
                let mut out = Vec::new();
                let children = ast.children(stmt).to_vec();
                if let Some(&body) = children.get(1) {
                    out.extend(self.visit(body, vec![(node, CfgEdgeKind::TrueBranch)]));
                }
                for &clause in children.iter().skip(2) {
                    out.extend(self.visit(clause, vec![(node, CfgEdgeKind::FalseBranch)]));
                }
                out
            }
            NodeKind::Return => {
                let node = self.enter(stmt, &incoming);
                self.add_edge(node, CfgNode::Exit, CfgEdgeKind::Return);
                Vec::new()
            }
            NodeKind::Revert => {
                let node = self.enter(stmt, &incoming);
                self.add_edge(node, CfgNode::Exit, CfgEdgeKind::Revert);
                Vec::new()
            }
            NodeKind::Break => {
                let node = self.enter(stmt, &incoming);
                match self.loops.last_mut() {
                    Some(frame) => {
                        frame.breaks.push((node, CfgEdgeKind::Break));
                        Vec::new()
                    }
                    None => vec![(node, CfgEdgeKind::Sequential)],
                }
            }
            NodeKind::Continue => {
                let node = self.enter(stmt, &incoming);
                match self.loops.last().map(|f| f.continue_target) {
                    Some(target) => {
                        self.add_edge(node, target, CfgEdgeKind::Continue);
                        Vec::new()
                    }
                    None => vec![(node, CfgEdgeKind::Sequential)],
                }
            }
            NodeKind::ExprStmt => {
                let node = self.enter(stmt, &incoming);
                match guard_call(ast, stmt) {
                    Some(Guard::Revert) => {
                        self.add_edge(node, CfgNode::Exit, CfgEdgeKind::Revert);
                        Vec::new()
                    }
                    Some(Guard::Require) => {
                        self.add_edge(node, CfgNode::Exit, CfgEdgeKind::Revert);
                        vec![(node, CfgEdgeKind::Sequential)]
                    }
                    None => vec![(node, CfgEdgeKind::Sequential)],
                }
            }
            _ if kind.is_cfg_statement() => {
                let node = self.enter(stmt, &incoming);
                vec![(node, CfgEdgeKind::Sequential)]
            }
            _ => incoming,
        }
    }

    fn pop_loop(&mut self) -> LoopFrame {
        self.loops.pop().unwrap_or(LoopFrame {
            continue_target: CfgNode::Exit,
            breaks: Vec::new(),
        })
    }
}

enum Guard {
    Revert,
    Require,
}

/// Classify `revert(...)`, `require(...)` and `assert(...)` expression statements
fn guard_call(ast: &Ast, stmt: NodeId) -> Option<Guard> {
    let call = *ast.children(stmt).first()?;
    if !matches!(ast.kind(call), Some(NodeKind::Call { .. })) {
        return None;
    }
    let callee = *ast.children(call).first()?;
    match ast.kind(callee) {
        Some(NodeKind::Identifier(name)) => match name.as_str() {
            "revert" => Some(Guard::Revert),
            "require" | "assert" => Some(Guard::Require),
            _ => None,
        },
        _ => None,
    }
}

impl FunctionCfg {
    /// Build the CFG of `function`
    pub fn build(ast: &Ast, function: NodeId) -> Self {
        let mut builder = Builder {
            ast,
            nodes: BTreeSet::from([CfgNode::Entry, CfgNode::Exit]),
            edges: BTreeSet::new(),
            loops: Vec::new(),
        };

        let out = match ast.function_body(function) {
            Some(body) => builder.visit(body, vec![(CfgNode::Entry, CfgEdgeKind::Sequential)]),
            None => vec![(CfgNode::Entry, CfgEdgeKind::Sequential)],
        };
        builder.connect(&out, CfgNode::Exit);

        let mut cfg = FunctionCfg {
            function,
            nodes: builder.nodes,
            edges: builder.edges.into_iter().collect(),
            blocks: Vec::new(),
            successors: BTreeMap::new(),
            predecessors: BTreeMap::new(),
            node_to_block: BTreeMap::new(),
        };
        for edge in &cfg.edges {
            cfg.successors
                .entry(edge.from)
                .or_default()
                .push((edge.to, edge.kind));
            cfg.predecessors
                .entry(edge.to)
                .or_default()
                .push((edge.from, edge.kind));
        }
        cfg.build_blocks();
        cfg
    }

    /// Group vertices into basic blocks using leaders
    fn build_blocks(&mut self) {
        // Step 1: find leaders
        let mut leaders: BTreeSet<CfgNode> = BTreeSet::new();
        leaders.insert(CfgNode::Entry);
        leaders.insert(CfgNode::Exit);
        for &node in &self.nodes {
            let preds = self.predecessors(node);
            let single_fallthrough = match preds.as_slice() {
                [(pred, CfgEdgeKind::Sequential)] => self.successors(*pred).len() == 1,
                _ => false,
            };
            if !single_fallthrough {
                leaders.insert(node);
            }
        }

        // Step 2: grow a block from every leader along unique fall-through edges
        for (block_id, &leader) in leaders.iter().enumerate() {
            let mut block = BasicBlock::new(block_id, leader);
            self.node_to_block.insert(leader, block_id);
            let mut current = leader;
            loop {
                let next = match self.successors(current).as_slice() {
                    [(next, CfgEdgeKind::Sequential)] if !leaders.contains(next) => *next,
                    _ => break,
                };
                block.nodes.push(next);
                self.node_to_block.insert(next, block_id);
                current = next;
            }
            self.blocks.push(block);
        }

        // Step 3: block edges
        for edge in self.edges.clone() {
            let (Some(&from), Some(&to)) = (
                self.node_to_block.get(&edge.from),
                self.node_to_block.get(&edge.to),
            ) else {
                continue;
            };
            let is_internal = from == to
                && self.blocks[from]
                    .nodes
                    .windows(2)
                    .any(|w| w[0] == edge.from && w[1] == edge.to);
            if !is_internal {
                self.add_block_edge(from, to);
            }
        }
    }

    fn add_block_edge(&mut self, from: usize, to: usize) {
        if let Some(block) = self.blocks.get_mut(from) {
            if !block.successors.contains(&to) {
                block.successors.push(to);
            }
        }
        if let Some(block) = self.blocks.get_mut(to) {
            if !block.predecessors.contains(&from) {
                block.predecessors.push(from);
            }
        }
    }

    /// Outgoing edges of a vertex
    pub fn successors(&self, node: CfgNode) -> Vec<(CfgNode, CfgEdgeKind)> {
        self.successors.get(&node).cloned().unwrap_or_default()
    }

    /// Incoming edges of a vertex
    pub fn predecessors(&self, node: CfgNode) -> Vec<(CfgNode, CfgEdgeKind)> {
        self.predecessors.get(&node).cloned().unwrap_or_default()
    }

    /// Statements that execute first when the function is entered
    pub fn entry_statements(&self) -> Vec<NodeId> {
        self.successors(CfgNode::Entry)
            .into_iter()
            .filter_map(|(n, _)| n.statement())
            .collect()
    }

    /// Statements of this function in id order
    pub fn statements(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().filter_map(|n| n.statement())
    }

    /// Block containing a vertex
    pub fn block_of(&self, node: CfgNode) -> Option<&BasicBlock> {
        self.node_to_block
            .get(&node)
            .and_then(|&id| self.blocks.get(id))
    }

    /// Iterate blocks in topological order
    pub fn blocks_topo_order(&self) -> Vec<usize> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut order: Vec<usize> = Vec::new();

        fn dfs(
            cfg: &FunctionCfg,
            block_id: usize,
            visited: &mut HashSet<usize>,
            order: &mut Vec<usize>,
        ) {
            if !visited.insert(block_id) {
                return;
            }
            if let Some(block) = cfg.blocks.get(block_id) {
                for &succ in &block.successors {
                    dfs(cfg, succ, visited, order);
                }
            }
            order.push(block_id);
        }

        if !self.blocks.is_empty() {
            dfs(self, 0, &mut visited, &mut order);
        }
        order.reverse();
        order
    }

    /// Whether a block is entered by a loop back edge
    pub fn is_loop_header(&self, block_id: usize) -> bool {
        self.blocks
            .get(block_id)
            .and_then(|b| b.nodes.first())
            .map(|&leader| {
                self.predecessors(leader)
                    .iter()
                    .any(|(_, kind)| *kind == CfgEdgeKind::LoopBack)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Program;

    fn cfg_of(source: &str) -> (Program, FunctionCfg) {
        let program = Program::from_source("t.sol", source).unwrap();
        let function = program.functions()[0];
        let cfg = FunctionCfg::build(&program.ast, function);
        (program, cfg)
    }

    fn stmt_of(program: &Program, pred: impl Fn(&NodeKind) -> bool) -> CfgNode {
        let id = program.ast.iter().find(|n| pred(&n.kind)).unwrap().id;
        CfgNode::Stmt(id)
    }

    #[test]
    fn test_empty_function() {
        let (_, cfg) = cfg_of("contract C { function f() public {} }");
        assert_eq!(
            cfg.successors(CfgNode::Entry),
            vec![(CfgNode::Exit, CfgEdgeKind::Sequential)]
        );
        assert_eq!(cfg.blocks.len(), 2);
    }

    #[test]
    fn test_linear_function_is_one_block() {
        let (_, cfg) = cfg_of("contract C { uint x; function f() public { x = 1; x = 2; x = 3; } }");
        assert_eq!(cfg.statements().count(), 3);
        let block = cfg.block_of(CfgNode::Entry).unwrap();
        assert_eq!(block.nodes.len(), 4);
    }

    #[test]
    fn test_if_without_else_has_false_fallthrough() {
        let (program, cfg) =
            cfg_of("contract C { uint x; function f(uint a) public { if (a > 1) { x = a; } x = 0; } }");
        let branch = stmt_of(&program, |k| matches!(k, NodeKind::If { .. }));
        let kinds: Vec<CfgEdgeKind> = cfg.successors(branch).into_iter().map(|(_, k)| k).collect();
        assert!(kinds.contains(&CfgEdgeKind::TrueBranch));
        assert!(kinds.contains(&CfgEdgeKind::FalseBranch));
    }

    #[test]
    fn test_loops_have_back_edges_and_headers() {
        let (program, cfg) = cfg_of(
            r#"contract C { function f(uint n) public returns (uint s) {
                for (uint i = 0; i < n; i++) { if (i == 2) break; s += i; }
                return s;
            } }"#,
        );
        let header = stmt_of(&program, |k| matches!(k, NodeKind::For { .. }));
        let preds = cfg.predecessors(header);
        assert!(preds.iter().any(|(_, k)| *k == CfgEdgeKind::LoopBack));
        let header_block = cfg.block_of(header).unwrap().id;
        assert!(cfg.is_loop_header(header_block));
        let brk = stmt_of(&program, |k| matches!(k, NodeKind::Break));
        let ret = stmt_of(&program, |k| matches!(k, NodeKind::Return));
        assert!(cfg.successors(brk).contains(&(ret, CfgEdgeKind::Break)));
        assert!(cfg.successors(ret).contains(&(CfgNode::Exit, CfgEdgeKind::Return)));
    }

    #[test]
    fn test_require_adds_revert_exit() {
        let (_, cfg) =
            cfg_of("contract C { function f(bool ok) public { require(ok); revert(\"no\"); } }");
        let stmts: Vec<CfgNode> = cfg.statements().map(CfgNode::Stmt).collect();
        let require = stmts[0];
        assert!(cfg.successors(require).contains(&(CfgNode::Exit, CfgEdgeKind::Revert)));
        assert!(cfg.successors(require).contains(&(stmts[1], CfgEdgeKind::Sequential)));
        assert_eq!(
            cfg.successors(stmts[1]),
            vec![(CfgNode::Exit, CfgEdgeKind::Revert)]
        );
    }

    #[test]
    fn test_topo_order_starts_at_entry() {
        let (_, cfg) = cfg_of("contract C { function f(uint a) public { if (a == 0) return; a = 1; } }");
        let order = cfg.blocks_topo_order();
        assert_eq!(order.first(), Some(&0));
        assert_eq!(order.len(), cfg.blocks.len());
    }
}
