use super::vocabulary::{AnchorPattern, AnchorPredicate, AnchorVocabulary, PatternKind, Role};
use crate::parser::{Ast, NodeId, NodeKind, Program};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A pattern match located in the program
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorOccurrence {
    /// Matched pattern id
    pub pattern_id: String,
    /// Category tag of the pattern
    pub category: String,
    /// Anchored node: the innermost enclosing statement, or the declaration for
    /// matches outside function bodies
    pub node: NodeId,
    /// The expression that matched
    pub matched: NodeId,
    /// Enclosing function or modifier
    pub function: Option<NodeId>,
    /// Enclosing contract
    pub contract: Option<NodeId>,
}

/// Scans a program against a shared vocabulary
#[derive(Debug, Clone)]
pub struct AnchorMatcher {
    vocabulary: Arc<AnchorVocabulary>,
}

impl AnchorMatcher {
    /// Create a matcher over `vocabulary`
    pub fn new(vocabulary: Arc<AnchorVocabulary>) -> Self {
        AnchorMatcher { vocabulary }
    }

    /// The vocabulary in use
    pub fn vocabulary(&self) -> &Arc<AnchorVocabulary> {
        &self.vocabulary
    }

    /// All anchor occurrences, ordered by anchored node then pattern order
    ///
    /// A pattern anchors a statement at most once, at its first matching expression.
    pub fn find_anchors(&self, program: &Program) -> Vec<AnchorOccurrence> {
        let ast = &program.ast;
        let mut seen: HashSet<(usize, NodeId)> = HashSet::new();
        let mut occurrences = Vec::new();

        for node in ast.iter() {
            for (index, pattern) in self.vocabulary.patterns.iter().enumerate() {
                if !pattern_matches(pattern, ast, node.id) {
                    continue;
                }
                let Some(anchor) = anchor_site(ast, node.id) else {
                    continue;
                };
                if !seen.insert((index, anchor)) {
                    continue;
                }
                occurrences.push((
                    index,
                    AnchorOccurrence {
                        pattern_id: pattern.id.clone(),
                        category: pattern.category.clone(),
                        node: anchor,
                        matched: node.id,
                        function: ast.enclosing_function(node.id),
                        contract: ast.enclosing_contract(node.id),
                    },
                ));
            }
        }

        occurrences.sort_by_key(|(index, o)| (o.node, *index));
        debug!(
            anchors = occurrences.len(),
            vocabulary = %self.vocabulary.version,
            "anchor matching complete"
        );
        occurrences.into_iter().map(|(_, o)| o).collect()
    }
}

fn pattern_matches(pattern: &AnchorPattern, ast: &Ast, id: NodeId) -> bool {
    pattern.predicates.iter().any(|p| predicate_matches(p, ast, id))
}

fn predicate_matches(predicate: &AnchorPredicate, ast: &Ast, id: NodeId) -> bool {
    let Some(kind) = ast.kind(id) else {
        return false;
    };
    let shape = match (predicate.kind, kind) {
        (PatternKind::Assembly, NodeKind::Assembly) => true,
        (PatternKind::Identifier, NodeKind::Identifier(_)) => {
            ends_with(&ast.access_path(id), &predicate.path_suffix)
        }
        (PatternKind::Member, NodeKind::Member { .. }) => {
            ends_with(&ast.access_path(id), &predicate.path_suffix)
        }
        (PatternKind::Call, NodeKind::Call { named_args }) => {
            call_matches(predicate, ast, id, named_args.is_empty())
        }
        _ => false,
    };
    shape && role_matches(predicate.role, ast, id)
}

fn call_matches(predicate: &AnchorPredicate, ast: &Ast, id: NodeId, positional: bool) -> bool {
    let children = ast.children(id);
    let Some(&callee) = children.first() else {
        return false;
    };
    if !ends_with(&ast.access_path(callee), &predicate.path_suffix) {
        return false;
    }
    if let Some(arity) = predicate.arity {
        if !positional || children.len() - 1 != arity {
            return false;
        }
    }
    if !predicate.call_options.is_empty() {
        let given = match ast.kind(callee) {
            Some(NodeKind::CallOptions { names }) => names.as_slice(),
            _ => &[],
        };
        if !predicate.call_options.iter().any(|o| given.contains(o)) {
            return false;
        }
    }
    true
}

fn ends_with(path: &[String], suffix: &[String]) -> bool {
    !suffix.is_empty() && path.len() >= suffix.len() && path[path.len() - suffix.len()..] == *suffix
}

fn role_matches(role: Role, ast: &Ast, id: NodeId) -> bool {
    match role {
        Role::Any => true,
        Role::ResultDiscarded => matches!(
            ast.parent(id).and_then(|p| ast.kind(p)),
            Some(NodeKind::ExprStmt)
        ),
        Role::InCondition => in_condition(ast, id),
    }
}

/// Whether `id` sits inside a branch condition or a `require`/`assert` argument
fn in_condition(ast: &Ast, id: NodeId) -> bool {
    let mut child = id;
    for ancestor in ast.ancestors(id) {
        let Some(kind) = ast.kind(ancestor) else {
            return false;
        };
        let children = ast.children(ancestor);
        let is_condition = match kind {
            NodeKind::If { .. } | NodeKind::While | NodeKind::Conditional => {
                children.first() == Some(&child)
            }
            NodeKind::DoWhile => children.get(1) == Some(&child),
            NodeKind::For { .. } => ast
                .for_parts(ancestor)
                .and_then(|p| p.condition)
                .map(|c| c == child)
                .unwrap_or(false),
            NodeKind::Call { .. } => {
                children.first() != Some(&child)
                    && children
                        .first()
                        .map(|&callee| {
                            matches!(
                                ast.access_path(callee).as_slice(),
                                [name] if name == "require" || name == "assert"
                            )
                        })
                        .unwrap_or(false)
            }
            _ => false,
        };
        if is_condition {
            return true;
        }
        if kind.is_cfg_statement() || kind.is_function() {
            return false;
        }
        child = ancestor;
    }
    false
}

/// Node an occurrence at `id` is anchored on
fn anchor_site(ast: &Ast, id: NodeId) -> Option<NodeId> {
    if ast.enclosing_function(id).is_some() {
        if let Some(statement) = ast.enclosing_statement(id) {
            return Some(statement);
        }
    }
    std::iter::once(id).chain(ast.ancestors(id)).find(|&a| {
        matches!(
            ast.kind(a),
            Some(
                NodeKind::StateVariable { .. }
                    | NodeKind::ModifierInvocation { .. }
                    | NodeKind::Function { .. }
            )
        )
    })
}
