//! Inter-function and inter-contract call resolution
//!
//! Calls whose target cannot be determined statically point at
//! [`NodeId::UNRESOLVED`] and leave an [`UnresolvedReferenceWarning`] behind.

use super::scope::{FunctionLocals, Scope};
use crate::parser::{FunctionKind, NodeId, NodeKind, Program};
use serde::{Deserialize, Serialize};
use tracing::debug;

const BUILTIN_FUNCTIONS: &[&str] = &[
    "require",
    "assert",
    "revert",
    "keccak256",
    "sha256",
    "sha3",
    "ripemd160",
    "ecrecover",
    "addmod",
    "mulmod",
    "blockhash",
    "blobhash",
    "gasleft",
    "selfdestruct",
    "suicide",
    "payable",
];

const BUILTIN_MEMBERS: &[&str] = &[
    "push",
    "pop",
    "concat",
    "encode",
    "encodePacked",
    "encodeWithSelector",
    "encodeWithSignature",
    "encodeCall",
    "decode",
    "wrap",
    "unwrap",
];

const LOW_LEVEL_MEMBERS: &[&str] = &["call", "delegatecall", "staticcall", "send", "transfer"];

/// A resolved (or sentinel) call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallEdge {
    /// Statement performing the call, or the calling function for modifier invocations
    pub site: NodeId,
    /// The call expression or modifier invocation
    pub expression: NodeId,
    /// Calling function
    pub caller: NodeId,
    /// Called function, or [`NodeId::UNRESOLVED`]
    pub callee: NodeId,
}

/// A call target that could not be resolved statically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReferenceWarning {
    /// Call expression
    pub expression: NodeId,
    /// Calling function
    pub caller: NodeId,
    /// Callee as written (`msg.sender.call`)
    pub target: String,
    /// Source file
    pub file: String,
    /// Line of the call
    pub line: usize,
    /// Column of the call
    pub column: usize,
}

/// Calls and inheritance relations of a program
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// Call edges sorted by site
    pub edges: Vec<CallEdge>,
    /// `(derived, base)` contract pairs
    pub inherits: Vec<(NodeId, NodeId)>,
    /// Unresolved call targets
    pub warnings: Vec<UnresolvedReferenceWarning>,
}

enum Target {
    Function(NodeId),
    Unresolved,
    Builtin,
}

struct CallResolver<'a> {
    program: &'a Program,
    scope: &'a Scope,
    caller: NodeId,
    contract: Option<NodeId>,
    locals: FunctionLocals,
}

impl<'a> CallResolver<'a> {
    fn type_of(&self, name: &str) -> Option<String> {
        if let Some(t) = self.locals.types.get(name) {
            return Some(t.clone());
        }
        self.contract
            .and_then(|c| self.scope.state_type(c, name))
            .map(str::to_string)
    }

    fn in_contract(&self, contract: NodeId, name: &str, arity: usize) -> Target {
        match self.scope.lookup_function(
            self.program,
            contract,
            name,
            FunctionKind::Function,
            Some(arity),
        ) {
            Some(f) => Target::Function(f),
            None => Target::Unresolved,
        }
    }

    fn resolve(&self, call: NodeId) -> Target {
        let ast = &self.program.ast;
        let children = ast.children(call);
        let arity = children.len().saturating_sub(1);
        let Some(mut callee) = children.first().copied() else {
            return Target::Builtin;
        };
        if let Some(NodeKind::CallOptions { .. }) = ast.kind(callee) {
            match ast.children(callee).first() {
                Some(&inner) => callee = inner,
                None => return Target::Builtin,
            }
        }

        match ast.kind(callee) {
            Some(NodeKind::Identifier(name)) => {
                if BUILTIN_FUNCTIONS.contains(&name.as_str()) || self.scope.is_type_name(name) {
                    return Target::Builtin;
                }
                if let Some(contract) = self.contract {
                    if let Target::Function(f) = self.in_contract(contract, name, arity) {
                        return Target::Function(f);
                    }
                }
                match self.scope.free_function(self.program, name, Some(arity)) {
                    Some(f) => Target::Function(f),
                    None => Target::Unresolved,
                }
            }
            Some(NodeKind::Member { member }) => {
                let Some(&base) = ast.children(callee).first() else {
                    return Target::Unresolved;
                };
                self.resolve_member(base, member, arity)
            }
            // Conversions, `new`, and calls of call results
            _ => Target::Builtin,
        }
    }

    fn resolve_member(&self, base: NodeId, member: &str, arity: usize) -> Target {
        let ast = &self.program.ast;
        if BUILTIN_MEMBERS.contains(&member) {
            return Target::Builtin;
        }
        if LOW_LEVEL_MEMBERS.contains(&member) {
            return Target::Unresolved;
        }
        // `addr.call.value(v)(...)`
        if (member == "value" || member == "gas")
            && matches!(ast.kind(base), Some(NodeKind::Member { member: m }) if LOW_LEVEL_MEMBERS.contains(&m.as_str()))
        {
            return Target::Unresolved;
        }

        match ast.kind(base) {
            Some(NodeKind::Identifier(name)) if name == "super" => {
                let Some(contract) = self.contract else {
                    return Target::Unresolved;
                };
                match self
                    .scope
                    .lookup_in_bases(self.program, contract, member, Some(arity))
                {
                    Some(f) => Target::Function(f),
                    None => Target::Unresolved,
                }
            }
            Some(NodeKind::Identifier(name)) if name == "this" => match self.contract {
                Some(contract) => self.in_contract(contract, member, arity),
                None => Target::Unresolved,
            },
            Some(NodeKind::Identifier(name)) if name == "abi" || name == "msg" => Target::Builtin,
            Some(NodeKind::Identifier(name)) => {
                if let Some(contract) = self.scope.contract(name) {
                    return self.in_contract(contract, member, arity);
                }
                match self.type_of(name) {
                    Some(type_name) => self.resolve_on_type(&type_name, member, arity),
                    None => Target::Unresolved,
                }
            }
            Some(NodeKind::ElementaryType(_)) => Target::Builtin,
            Some(NodeKind::TypeExpression(_)) => Target::Builtin,
            // `X(addr).f()`
            Some(NodeKind::Call { .. }) => {
                let converted = ast
                    .children(base)
                    .first()
                    .and_then(|&c| match ast.kind(c) {
                        Some(NodeKind::Identifier(name)) => self.scope.contract(name),
                        _ => None,
                    });
                match converted {
                    Some(contract) => self.in_contract(contract, member, arity),
                    None => Target::Unresolved,
                }
            }
            _ => Target::Unresolved,
        }
    }

    /// Member call on a value of declared type `type_name`
    fn resolve_on_type(&self, type_name: &str, member: &str, arity: usize) -> Target {
        if let Some(contract) = self.scope.contract(type_name) {
            return self.in_contract(contract, member, arity);
        }
        // `using L for T`: the receiver becomes the first argument
        if let Some(contract) = self.contract {
            for library in self.scope.libraries(contract) {
                if let Target::Function(f) = self.in_contract(library, member, arity + 1) {
                    return Target::Function(f);
                }
            }
        }
        Target::Unresolved
    }
}

impl CallGraph {
    /// Resolve every call and modifier invocation in `program`
    pub fn build(program: &Program, scope: &Scope) -> Self {
        let ast = &program.ast;
        let mut graph = CallGraph::default();

        for contract in program.contracts() {
            if let Some(NodeKind::Contract { bases, .. }) = ast.kind(contract) {
                for base in bases {
                    if let Some(base_id) = scope.contract(base) {
                        graph.inherits.push((contract, base_id));
                    }
                }
            }
        }

        for function in program.functions() {
            let contract = ast.enclosing_contract(function);
            let resolver = CallResolver {
                program,
                scope,
                caller: function,
                contract,
                locals: FunctionLocals::collect(program, function),
            };

            for invocation in ast.function_modifiers(function) {
                let Some(NodeKind::ModifierInvocation { name }) = ast.kind(invocation) else {
                    continue;
                };
                // Base constructor arguments on constructors
                if scope.contract(name).is_some() {
                    continue;
                }
                let target = contract.and_then(|c| {
                    scope.lookup_function(program, c, name, FunctionKind::Modifier, None)
                });
                let callee = match target {
                    Some(m) => m,
                    None => {
                        graph.warn(program, invocation, function, name.clone());
                        NodeId::UNRESOLVED
                    }
                };
                graph.edges.push(CallEdge {
                    site: function,
                    expression: invocation,
                    caller: function,
                    callee,
                });
            }

            let Some(body) = ast.function_body(function) else {
                continue;
            };
            for id in ast.descendants(body) {
                if !matches!(ast.kind(id), Some(NodeKind::Call { .. })) {
                    continue;
                }
                // Event and custom-error constructors
                if matches!(
                    ast.parent(id).and_then(|p| ast.kind(p)),
                    Some(NodeKind::Emit) | Some(NodeKind::Revert)
                ) {
                    continue;
                }
                let Some(site) = ast.enclosing_statement(id) else {
                    continue;
                };
                let callee = match resolver.resolve(id) {
                    Target::Builtin => continue,
                    Target::Function(f) => f,
                    Target::Unresolved => {
                        let target = ast
                            .children(id)
                            .first()
                            .map(|&c| ast.access_path(c).join("."))
                            .unwrap_or_default();
                        graph.warn(program, id, function, target);
                        NodeId::UNRESOLVED
                    }
                };
                graph.edges.push(CallEdge {
                    site,
                    expression: id,
                    caller: resolver.caller,
                    callee,
                });
            }
        }

        graph.edges.sort();
        graph.edges.dedup();
        debug!(
            calls = graph.edges.len(),
            unresolved = graph.warnings.len(),
            "call resolution complete"
        );
        graph
    }

    fn warn(&mut self, program: &Program, expression: NodeId, caller: NodeId, target: String) {
        let span = program.ast.get(expression).map(|n| n.span).unwrap_or_default();
        self.warnings.push(UnresolvedReferenceWarning {
            expression,
            caller,
            target,
            file: program.file_of(expression).unwrap_or_default().to_string(),
            line: span.line,
            column: span.column,
        });
    }

    /// Resolved and unresolved callees of a statement
    pub fn callees_of(&self, site: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.site == site)
            .map(|e| e.callee)
    }
}
