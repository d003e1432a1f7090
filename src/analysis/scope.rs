//! Name resolution shared by the data-flow and call analyses

use crate::parser::{FunctionKind, NodeId, NodeKind, Program};
use std::collections::{BTreeMap, HashMap};

/// Contract hierarchy and declarations of one program
#[derive(Debug, Clone, Default)]
pub struct Scope {
    contracts_by_name: HashMap<String, NodeId>,
    /// Most-derived first
    chains: HashMap<NodeId, Vec<NodeId>>,
    /// (contract, variable name) -> storage slot in that contract's layout
    slots: HashMap<(NodeId, String), u32>,
    /// (contract, variable name) -> declared type
    state_types: HashMap<(NodeId, String), String>,
    type_names: HashMap<String, NodeId>,
    free_functions: BTreeMap<String, Vec<NodeId>>,
    usings: HashMap<NodeId, Vec<String>>,
}

impl Scope {
    /// Index every contract, state variable and free function of `program`
    pub fn build(program: &Program) -> Self {
        let ast = &program.ast;
        let mut scope = Scope::default();

        for node in ast.iter() {
            match &node.kind {
                NodeKind::Contract { name, .. } => {
                    scope.contracts_by_name.entry(name.clone()).or_insert(node.id);
                }
                NodeKind::Struct { name, .. } | NodeKind::TypeDeclaration { name, .. } => {
                    scope.type_names.entry(name.clone()).or_insert(node.id);
                }
                NodeKind::Function { name, .. } => {
                    if ast.enclosing_contract(node.id).is_none() {
                        scope
                            .free_functions
                            .entry(name.clone())
                            .or_default()
                            .push(node.id);
                    }
                }
                NodeKind::Using { library } => {
                    if let Some(contract) = ast.enclosing_contract(node.id) {
                        scope.usings.entry(contract).or_default().push(library.clone());
                    }
                }
                _ => {}
            }
        }

        let mut linearized = HashMap::new();
        for contract in program.contracts() {
            let mut chain = scope.linearize(program, contract, &mut linearized, &mut Vec::new());
            // Storage slots are laid out most-base first
            chain.reverse();
            let mut slot = 0u32;
            for &member_of in &chain {
                for &member in ast.children(member_of) {
                    if let Some(NodeKind::StateVariable {
                        name,
                        type_name,
                        constant,
                    }) = ast.kind(member)
                    {
                        scope
                            .state_types
                            .insert((contract, name.clone()), type_name.clone());
                        if *constant {
                            continue;
                        }
                        // Shadowed names keep the most-derived slot
                        scope.slots.insert((contract, name.clone()), slot);
                        slot += 1;
                    }
                }
            }
            chain.reverse();
            scope.chains.insert(contract, chain);
        }
        scope
    }

    /// C3 linearization of `contract`, most-derived first
    ///
    /// Bases are declared most-base-like first, so they are merged right to
    /// left. An inconsistent hierarchy falls back to depth-first order.
    fn linearize(
        &self,
        program: &Program,
        contract: NodeId,
        memo: &mut HashMap<NodeId, Vec<NodeId>>,
        visiting: &mut Vec<NodeId>,
    ) -> Vec<NodeId> {
        if let Some(done) = memo.get(&contract) {
            return done.clone();
        }
        if visiting.contains(&contract) {
            return Vec::new();
        }
        visiting.push(contract);
        let bases: Vec<NodeId> = match program.ast.kind(contract) {
            Some(NodeKind::Contract { bases, .. }) => bases
                .iter()
                .rev()
                .filter_map(|b| self.contracts_by_name.get(b).copied())
                .filter(|&b| b != contract)
                .collect(),
            _ => Vec::new(),
        };
        let mut sequences: Vec<Vec<NodeId>> = bases
            .iter()
            .map(|&base| self.linearize(program, base, memo, visiting))
            .collect();
        sequences.push(bases);
        visiting.pop();

        let merged = c3_merge(sequences.clone()).unwrap_or_else(|| {
            let mut flat = Vec::new();
            for node in sequences.into_iter().flatten() {
                if !flat.contains(&node) {
                    flat.push(node);
                }
            }
            flat
        });
        let mut chain = vec![contract];
        chain.extend(merged.into_iter().filter(|&node| node != contract));
        memo.insert(contract, chain.clone());
        chain
    }

    /// Contract declared under `name`
    pub fn contract(&self, name: &str) -> Option<NodeId> {
        self.contracts_by_name.get(name).copied()
    }

    /// Whether `name` denotes a contract, struct, enum or other user type
    pub fn is_type_name(&self, name: &str) -> bool {
        self.contracts_by_name.contains_key(name) || self.type_names.contains_key(name)
    }

    /// Linearized inheritance chain, most-derived first
    pub fn chain(&self, contract: NodeId) -> &[NodeId] {
        self.chains.get(&contract).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Storage slot of state variable `name` as seen from `contract`
    pub fn slot(&self, contract: NodeId, name: &str) -> Option<u32> {
        self.slots.get(&(contract, name.to_string())).copied()
    }

    /// Declared type of state variable `name` as seen from `contract`
    pub fn state_type(&self, contract: NodeId, name: &str) -> Option<&str> {
        self.state_types
            .get(&(contract, name.to_string()))
            .map(String::as_str)
    }

    /// Libraries attached with `using ... for` in the chain of `contract`
    pub fn libraries(&self, contract: NodeId) -> Vec<NodeId> {
        self.chain(contract)
            .iter()
            .flat_map(|c| self.usings.get(c).into_iter().flatten())
            .filter_map(|name| self.contract(name))
            .collect()
    }

    /// Function or modifier named `name` declared in `contract` or its bases
    ///
    /// Overloads are disambiguated by argument count when possible.
    pub fn lookup_function(
        &self,
        program: &Program,
        contract: NodeId,
        name: &str,
        kind: FunctionKind,
        arity: Option<usize>,
    ) -> Option<NodeId> {
        let candidates: Vec<NodeId> = self
            .chain(contract)
            .iter()
            .flat_map(|&c| program.ast.children(c).iter().copied())
            .filter(|&m| {
                matches!(
                    program.ast.kind(m),
                    Some(NodeKind::Function { name: n, kind: k, .. }) if n == name && *k == kind
                )
            })
            .collect();
        pick_overload(program, &candidates, arity)
    }

    /// Lookup in the bases of `contract` only (for `super.f()`)
    pub fn lookup_in_bases(
        &self,
        program: &Program,
        contract: NodeId,
        name: &str,
        arity: Option<usize>,
    ) -> Option<NodeId> {
        self.chain(contract)
            .iter()
            .skip(1)
            .find_map(|&base| {
                let found = program.ast.children(base).iter().copied().filter(|&m| {
                    matches!(
                        program.ast.kind(m),
                        Some(NodeKind::Function { name: n, kind: FunctionKind::Function, .. }) if n == name
                    )
                });
                pick_overload(program, &found.collect::<Vec<_>>(), arity)
            })
    }

    /// Free function declared at file level
    pub fn free_function(&self, program: &Program, name: &str, arity: Option<usize>) -> Option<NodeId> {
        let candidates = self.free_functions.get(name)?;
        pick_overload(program, candidates, arity)
    }
}

fn pick_overload(program: &Program, candidates: &[NodeId], arity: Option<usize>) -> Option<NodeId> {
    if candidates.len() > 1 {
        if let Some(arity) = arity {
            let exact = candidates.iter().copied().find(|&f| {
                matches!(program.ast.kind(f), Some(NodeKind::Function { params, .. }) if params.len() == arity)
            });
            if exact.is_some() {
                return exact;
            }
        }
    }
    candidates.first().copied()
}

/// Variables visible inside one function: parameters, returns and locals
#[derive(Debug, Clone, Default)]
pub struct FunctionLocals {
    /// Local name -> declared type
    pub types: HashMap<String, String>,
    /// Local name -> declared data location
    pub locations: HashMap<String, String>,
}

impl FunctionLocals {
    /// Collect the locals of `function`
    pub fn collect(program: &Program, function: NodeId) -> Self {
        let ast = &program.ast;
        let mut locals = FunctionLocals::default();
        if let Some(NodeKind::Function {
            params, returns, ..
        }) = ast.kind(function)
        {
            for param in params.iter().chain(returns) {
                if let Some(name) = &param.name {
                    locals.types.insert(name.clone(), param.type_name.clone());
                    if let Some(location) = &param.location {
                        locals.locations.insert(name.clone(), location.clone());
                    }
                }
            }
        }
        for id in ast.descendants(function) {
            match ast.kind(id) {
                Some(NodeKind::VarDecl { vars }) => {
                    for var in vars.iter().flatten() {
                        locals.types.insert(var.name.clone(), var.type_name.clone());
                        if let Some(location) = &var.location {
                            locals.locations.insert(var.name.clone(), location.clone());
                        }
                    }
                }
                Some(NodeKind::Try { returns }) | Some(NodeKind::CatchClause { params: returns }) => {
                    for param in returns {
                        if let Some(name) = &param.name {
                            locals.types.insert(name.clone(), param.type_name.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        locals
    }

    /// Whether `name` is a local of this function
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }
}

/// Merge step of C3; `None` when no consistent order exists
fn c3_merge(mut sequences: Vec<Vec<NodeId>>) -> Option<Vec<NodeId>> {
    let mut merged = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Some(merged);
        }
        let head = sequences
            .iter()
            .map(|s| s[0])
            .find(|&candidate| sequences.iter().all(|s| !s[1..].contains(&candidate)))?;
        merged.push(head);
        for sequence in &mut sequences {
            if sequence[0] == head {
                sequence.remove(0);
            }
        }
    }
}
