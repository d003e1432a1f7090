//! Reaching-definitions data flow
//!
//! Definitions and uses are keyed by [`VarKey`], so storage is tracked by slot
//! rather than by the name used to reach it. Local `storage` pointers are aliases of
//! the slot their initializer refers to.

use super::cfg::{CfgNode, FunctionCfg};
use super::scope::{FunctionLocals, Scope};
use crate::parser::{Ast, NodeId, NodeKind, Program};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Identity of a variable or storage location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKey {
    /// Parameter, return value or local of a function
    Local {
        /// Owning function
        function: NodeId,
        /// Variable name
        name: String,
    },
    /// State variable by storage slot
    State {
        /// Contract whose layout the slot belongs to
        contract: NodeId,
        /// Slot index in declaration order over the inheritance chain
        slot: u32,
    },
    /// Struct member of another location
    Member {
        /// Containing location
        base: Box<VarKey>,
        /// Field name
        field: String,
    },
}

impl VarKey {
    /// Whether `self` is `other` or contains it as a member
    pub fn covers(&self, other: &VarKey) -> bool {
        if self == other {
            return true;
        }
        match other {
            VarKey::Member { base, .. } => self.covers(base),
            _ => false,
        }
    }

    /// Whether a definition of one may affect a use of the other
    pub fn related(&self, other: &VarKey) -> bool {
        self.covers(other) || other.covers(self)
    }
}

/// A def -> use edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DfgEdge {
    /// Defining statement
    pub from: NodeId,
    /// Using statement
    pub to: NodeId,
    /// Location carried along the edge
    pub key: VarKey,
}

/// A definition made by a statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Def {
    /// Defined location
    pub key: VarKey,
    /// Strong definitions kill earlier definitions of the location
    pub strong: bool,
}

/// Definitions and uses of one statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefUse {
    /// Locations written
    pub defs: Vec<Def>,
    /// Locations read
    pub uses: Vec<VarKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct DefSite {
    node: NodeId,
    key: VarKey,
}

/// Resolves expressions of one function to locations
pub struct Resolver<'a> {
    ast: &'a Ast,
    scope: &'a Scope,
    function: NodeId,
    contract: Option<NodeId>,
    locals: FunctionLocals,
    aliases: HashMap<String, (VarKey, bool)>,
}

impl<'a> Resolver<'a> {
    /// Resolver for `function`
    pub fn new(program: &'a Program, scope: &'a Scope, function: NodeId) -> Self {
        let mut resolver = Resolver {
            ast: &program.ast,
            scope,
            function,
            contract: program.ast.enclosing_contract(function),
            locals: FunctionLocals::collect(program, function),
            aliases: HashMap::new(),
        };
        resolver.collect_aliases();
        resolver
    }

    fn collect_aliases(&mut self) {
        for id in self.ast.descendants(self.function) {
            let Some(NodeKind::VarDecl { vars }) = self.ast.kind(id) else {
                continue;
            };
            let [Some(var)] = vars.as_slice() else {
                continue;
            };
            if var.location.as_deref() != Some("storage") {
                continue;
            }
            let Some(&init) = self.ast.children(id).first() else {
                continue;
            };
            if let Some(target) = self.access(init) {
                self.aliases.insert(var.name.clone(), target);
            }
        }
    }

    /// Locals visible in this function
    pub fn locals(&self) -> &FunctionLocals {
        &self.locals
    }

    /// Location named by `name`, plus whether it is addressed precisely
    fn resolve_name(&self, name: &str) -> Option<(VarKey, bool)> {
        if let Some(alias) = self.aliases.get(name) {
            return Some(alias.clone());
        }
        if self.locals.contains(name) {
            return Some((
                VarKey::Local {
                    function: self.function,
                    name: name.to_string(),
                },
                true,
            ));
        }
        let contract = self.contract?;
        let slot = self.scope.slot(contract, name)?;
        Some((VarKey::State { contract, slot }, true))
    }

    /// Location of an access path; `false` means an element of it (weak)
    pub fn access(&self, expr: NodeId) -> Option<(VarKey, bool)> {
        match self.ast.kind(expr)? {
            NodeKind::Identifier(name) => self.resolve_name(name),
            NodeKind::Member { member } => {
                let base = *self.ast.children(expr).first()?;
                let (key, precise) = self.access(base)?;
                Some((
                    VarKey::Member {
                        base: Box::new(key),
                        field: member.clone(),
                    },
                    precise,
                ))
            }
            NodeKind::Index | NodeKind::IndexRange => {
                let base = *self.ast.children(expr).first()?;
                let (key, _) = self.access(base)?;
                Some((key, false))
            }
            _ => None,
        }
    }

    /// Expressions evaluated directly by a statement (not by nested statements)
    pub fn own_expressions(&self, stmt: NodeId) -> Vec<NodeId> {
        let children = self.ast.children(stmt);
        match self.ast.kind(stmt) {
            Some(NodeKind::If { .. }) | Some(NodeKind::While) | Some(NodeKind::Try { .. }) => {
                children.first().copied().into_iter().collect()
            }
            Some(NodeKind::DoWhile) => children.get(1).copied().into_iter().collect(),
            Some(NodeKind::For { .. }) => self
                .ast
                .for_parts(stmt)
                .and_then(|p| p.condition)
                .into_iter()
                .collect(),
            Some(NodeKind::VarDecl { .. })
            | Some(NodeKind::ExprStmt)
            | Some(NodeKind::Return)
            | Some(NodeKind::Emit)
            | Some(NodeKind::Revert) => children.to_vec(),
            _ => Vec::new(),
        }
    }

    /// Definitions and uses of `stmt`
    pub fn def_use(&self, stmt: NodeId) -> DefUse {
        let mut out = DefUse::default();
        for expr in self.own_expressions(stmt) {
            self.walk(expr, &mut out);
        }
        match self.ast.kind(stmt) {
            Some(NodeKind::VarDecl { vars }) => {
                for var in vars.iter().flatten() {
                    out.defs.push(Def {
                        key: VarKey::Local {
                            function: self.function,
                            name: var.name.clone(),
                        },
                        strong: true,
                    });
                }
            }
            Some(NodeKind::Try { returns }) => {
                for name in returns.iter().filter_map(|p| p.name.as_ref()) {
                    out.defs.push(Def {
                        key: VarKey::Local {
                            function: self.function,
                            name: name.clone(),
                        },
                        strong: true,
                    });
                }
            }
            _ => {}
        }
        out.defs.sort();
        out.defs.dedup();
        out.uses.sort();
        out.uses.dedup();
        out
    }

    fn define(&self, target: NodeId, out: &mut DefUse) {
        if let Some(NodeKind::Tuple { .. }) = self.ast.kind(target) {
            for &component in self.ast.children(target) {
                self.define(component, out);
            }
            return;
        }
        if let Some((key, precise)) = self.access(target) {
            out.defs.push(Def {
                key,
                strong: precise,
            });
        }
        self.walk_indices(target, out);
    }

    /// Reads performed while addressing `expr` (index expressions, call bases)
    fn walk_indices(&self, expr: NodeId, out: &mut DefUse) {
        let children = self.ast.children(expr);
        match self.ast.kind(expr) {
            Some(NodeKind::Member { .. }) => {
                if let Some(&base) = children.first() {
                    self.walk_indices(base, out);
                }
            }
            Some(NodeKind::Index) | Some(NodeKind::IndexRange) => {
                if let Some(&base) = children.first() {
                    self.walk_indices(base, out);
                }
                for &index in children.iter().skip(1) {
                    self.walk(index, out);
                }
            }
            Some(NodeKind::Identifier(_)) | None => {}
            _ => self.walk(expr, out),
        }
    }

    fn walk(&self, expr: NodeId, out: &mut DefUse) {
        let children = self.ast.children(expr);
        match self.ast.kind(expr) {
            Some(NodeKind::Assign { op }) => {
                if let (Some(&target), Some(&value)) = (children.first(), children.get(1)) {
                    self.walk(value, out);
                    if op != "=" {
                        self.walk(target, out);
                    }
                    self.define(target, out);
                }
            }
            Some(NodeKind::Unary { op, .. }) if op == "++" || op == "--" || op == "delete" => {
                if let Some(&operand) = children.first() {
                    if op != "delete" {
                        self.walk(operand, out);
                    }
                    self.define(operand, out);
                }
            }
            Some(NodeKind::Identifier(_))
            | Some(NodeKind::Member { .. })
            | Some(NodeKind::Index)
            | Some(NodeKind::IndexRange) => {
                if let Some((key, _)) = self.access(expr) {
                    out.uses.push(key);
                    self.walk_indices(expr, out);
                } else {
                    for &child in children {
                        self.walk(child, out);
                    }
                }
            }
            _ => {
                for &child in children {
                    self.walk(child, out);
                }
            }
        }
    }
}

/// Def-use edges of one function
pub fn reaching_definitions(
    program: &Program,
    scope: &Scope,
    cfg: &FunctionCfg,
) -> Vec<DfgEdge> {
    let resolver = Resolver::new(program, scope, cfg.function);
    let facts: BTreeMap<NodeId, DefUse> = cfg
        .statements()
        .map(|s| (s, resolver.def_use(s)))
        .collect();

    // Parameters and state read before any write are defined at Entry; those
    // definitions produce no edges, so they are simply absent from the sets.
    let mut reach_in: BTreeMap<CfgNode, BTreeSet<DefSite>> = BTreeMap::new();
    let mut reach_out: BTreeMap<CfgNode, BTreeSet<DefSite>> = BTreeMap::new();
    let mut worklist: BTreeSet<CfgNode> = cfg.nodes.iter().copied().collect();

    while let Some(node) = worklist.pop_first() {
        let mut incoming = BTreeSet::new();
        for (pred, _) in cfg.predecessors(node) {
            if let Some(out) = reach_out.get(&pred) {
                incoming.extend(out.iter().cloned());
            }
        }

        let mut outgoing = incoming.clone();
        if let Some(stmt) = node.statement() {
            if let Some(du) = facts.get(&stmt) {
                for def in du.defs.iter().filter(|d| d.strong) {
                    outgoing.retain(|site| !def.key.covers(&site.key));
                }
                for def in &du.defs {
                    outgoing.insert(DefSite {
                        node: stmt,
                        key: def.key.clone(),
                    });
                }
            }
        }
        reach_in.insert(node, incoming);

        if reach_out.get(&node) != Some(&outgoing) {
            reach_out.insert(node, outgoing);
            for (succ, _) in cfg.successors(node) {
                worklist.insert(succ);
            }
        }
    }

    let mut edges = BTreeSet::new();
    for (&stmt, du) in &facts {
        let Some(incoming) = reach_in.get(&CfgNode::Stmt(stmt)) else {
            continue;
        };
        for key in &du.uses {
            for site in incoming.iter().filter(|s| s.key.related(key)) {
                edges.insert(DfgEdge {
                    from: site.node,
                    to: stmt,
                    key: site.key.clone(),
                });
            }
        }
    }
    edges.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> (Program, Vec<DfgEdge>) {
        let program = Program::from_source("t.sol", source).unwrap();
        let scope = Scope::build(&program);
        let function = *program
            .functions()
            .last()
            .unwrap();
        let cfg = FunctionCfg::build(&program.ast, function);
        let edges = reaching_definitions(&program, &scope, &cfg);
        (program, edges)
    }

    fn statements(program: &Program) -> Vec<NodeId> {
        program
            .ast
            .iter()
            .filter(|n| n.kind.is_cfg_statement())
            .map(|n| n.id)
            .collect()
    }

    fn has_edge(edges: &[DfgEdge], from: NodeId, to: NodeId) -> bool {
        edges.iter().any(|e| e.from == from && e.to == to)
    }

    #[test]
    fn test_strong_redefinition_breaks_chain() {
        let (program, edges) = analyze(
            "contract C { function f() public returns (uint) { uint a = 1; a = 2; return a; } }",
        );
        let s = statements(&program);
        assert!(!has_edge(&edges, s[0], s[2]));
        assert!(has_edge(&edges, s[1], s[2]));
    }

    #[test]
    fn test_mapping_element_writes_are_weak() {
        let (program, edges) = analyze(
            r#"contract C { mapping(address => uint) m;
               function f(address a, address b) public returns (uint) {
                   m[a] = 1; m[b] = 2; return m[a];
               } }"#,
        );
        let s = statements(&program);
        assert!(has_edge(&edges, s[0], s[2]));
        assert!(has_edge(&edges, s[1], s[2]));
    }

    #[test]
    fn test_storage_pointer_aliases_slot() {
        let (program, edges) = analyze(
            r#"contract C { struct Info { uint amount; } mapping(address => Info) infos;
               function f() public returns (uint) {
                   Info storage i = infos[msg.sender];
                   i.amount = 0;
                   return infos[msg.sender].amount;
               } }"#,
        );
        let s = statements(&program);
        assert!(has_edge(&edges, s[1], s[2]));
    }

    #[test]
    fn test_branch_merge_keeps_both_definitions() {
        let (program, edges) = analyze(
            r#"contract C { uint x;
               function f(bool c) public returns (uint) {
                   if (c) { x = 1; } else { x = 2; }
                   return x;
               } }"#,
        );
        let s = statements(&program);
        let ret = *s.last().unwrap();
        assert!(has_edge(&edges, s[1], ret));
        assert!(has_edge(&edges, s[2], ret));
    }

    #[test]
    fn test_loop_carried_definition() {
        let (program, edges) = analyze(
            r#"contract C { function f(uint n) public returns (uint s) {
                   for (uint i = 0; i < n; i++) { s += i; }
               } }"#,
        );
        let update = program
            .ast
            .for_parts(
                program
                    .ast
                    .iter()
                    .find(|n| matches!(n.kind, NodeKind::For { .. }))
                    .unwrap()
                    .id,
            )
            .unwrap()
            .update
            .unwrap();
        // i++ reaches itself through the back edge
        assert!(has_edge(&edges, update, update));
    }

    #[test]
    fn test_member_key_relations() {
        let base = VarKey::State {
            contract: NodeId(1),
            slot: 0,
        };
        let field = VarKey::Member {
            base: Box::new(base.clone()),
            field: "amount".into(),
        };
        assert!(base.covers(&field));
        assert!(!field.covers(&base));
        assert!(field.related(&base));
    }
}
