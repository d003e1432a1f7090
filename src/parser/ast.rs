use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable node identity, assigned at parse time and never reused within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel standing in for call targets that cannot be resolved statically
    pub const UNRESOLVED: NodeId = NodeId(u32::MAX);

    /// Arena index of this id
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this is the unresolved-call sentinel
    pub fn is_unresolved(self) -> bool {
        self == NodeId::UNRESOLVED
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unresolved() {
            write!(f, "#unresolved")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Source location of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Index of the owning source unit within the program
    pub unit: u32,
    /// Character offset of the first character
    pub start: usize,
    /// Character offset one past the last character
    pub end: usize,
    /// Line of the first character (1-indexed)
    pub line: usize,
    /// Column of the first character (1-indexed)
    pub column: usize,
}

/// Contract-like declaration flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// `contract` (possibly `abstract`)
    Contract,
    /// `interface`
    Interface,
    /// `library`
    Library,
}

/// Function-like declaration flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Named function
    Function,
    /// `constructor`
    Constructor,
    /// `modifier`
    Modifier,
    /// `receive`
    Receive,
    /// `fallback`
    Fallback,
}

/// Declared parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Type as written (e.g. `address payable`, `mapping(address => uint256)`)
    pub type_name: String,
    /// Data location (`storage`, `memory`, `calldata`) if given
    pub location: Option<String>,
    /// Parameter name; unnamed returns are allowed
    pub name: Option<String>,
}

/// One component of a variable declaration statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVar {
    /// Type as written
    pub type_name: String,
    /// Data location if given
    pub location: Option<String>,
    /// Variable name
    pub name: String,
}

/// Node kinds
///
/// Child layout is documented per variant; optional parts are signalled with flags
/// so that ids only ever live in the `children` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    // ============================================================================
    // Declarations
    // ============================================================================
    /// Root of a source unit; children are top-level declarations
    SourceUnit,
    /// `pragma ...;`
    Pragma,
    /// `import "path";`
    Import {
        /// Imported path as written
        path: String,
    },
    /// Contract, interface or library; children are members
    Contract {
        /// Contract name
        name: String,
        /// Declaration flavour
        kind: ContractKind,
        /// Direct bases in declaration order
        bases: Vec<String>,
    },
    /// State variable; children: `[initializer?]`
    StateVariable {
        /// Variable name
        name: String,
        /// Type as written
        type_name: String,
        /// `constant` or `immutable`
        constant: bool,
    },
    /// `struct` declaration
    Struct {
        /// Struct name
        name: String,
        /// Field names and types
        fields: Vec<(String, String)>,
    },
    /// `event`, `error`, `enum` or user-defined value type; body ignored
    TypeDeclaration {
        /// Declaration keyword
        keyword: String,
        /// Declared name
        name: String,
    },
    /// `using X for Y;`
    Using {
        /// Library name
        library: String,
    },
    /// Function, constructor, modifier, receive or fallback
    /// children: `[modifier invocations..., body?]`
    Function {
        /// Name (`constructor`, `receive`, `fallback` for the unnamed ones)
        name: String,
        /// Declaration flavour
        kind: FunctionKind,
        /// Visibility keyword if given
        visibility: Option<String>,
        /// Mutability keyword if given
        mutability: Option<String>,
        /// Parameters
        params: Vec<Param>,
        /// Return values
        returns: Vec<Param>,
        /// Whether a body block is present as the last child
        has_body: bool,
    },
    /// Modifier or base-constructor invocation on a function; children: arguments
    ModifierInvocation {
        /// Invoked name
        name: String,
    },

    // ============================================================================
    // Statements
    // ============================================================================
    /// `{ ... }`; children are statements
    Block,
    /// `unchecked { ... }`; children are statements
    Unchecked,
    /// Variable declaration; children: `[initializer?]`
    VarDecl {
        /// Declared variables; `None` marks an omitted tuple component
        vars: Vec<Option<LocalVar>>,
    },
    /// Expression statement; children: `[expression]`
    ExprStmt,
    /// `if`; children: `[condition, then, else?]`
    If {
        /// Whether an else branch is present
        has_else: bool,
    },
    /// `while`; children: `[condition, body]`
    While,
    /// `do ... while`; children: `[body, condition]`
    DoWhile,
    /// `for`; children: `[init?, condition?, update?, body]`
    For {
        /// Init statement present
        has_init: bool,
        /// Condition expression present
        has_condition: bool,
        /// Update statement (an `ExprStmt`) present
        has_update: bool,
    },
    /// `return`; children: `[value?]`
    Return,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `emit Event(...)`; children: `[call]`
    Emit,
    /// `revert Error(...)` or `revert(...)`; children: `[call?]`
    Revert,
    /// `try call returns (...) { } catch ... { }`; children: `[call, body, catch clauses...]`
    Try {
        /// Names bound by the `returns (...)` clause
        returns: Vec<Param>,
    },
    /// `catch` clause; children: `[block]`
    CatchClause {
        /// Names bound by the clause parameters
        params: Vec<Param>,
    },
    /// `assembly { ... }`, kept opaque
    Assembly,
    /// `_;` inside a modifier
    Placeholder,

    // ============================================================================
    // Expressions
    // ============================================================================
    /// Identifier reference
    Identifier(String),
    /// Number, string, bool or hex literal, as written
    Literal(String),
    /// Elementary type used as an expression (`address(x)`, `uint256(y)`)
    ElementaryType(String),
    /// `base.member`; children: `[base]`
    Member {
        /// Accessed member name
        member: String,
    },
    /// `base[index]`; children: `[base, index?]`
    Index,
    /// `base[start:end]`; children: `[base, start?, end?]`
    IndexRange,
    /// Function call; children: `[callee, arguments...]`
    Call {
        /// Names of `{name: value}` style arguments, aligned with the trailing arguments
        named_args: Vec<String>,
    },
    /// `callee{value: v, gas: g}`; children: `[callee, option values...]`
    CallOptions {
        /// Option names in order
        names: Vec<String>,
    },
    /// Unary operator; children: `[operand]`
    Unary {
        /// Operator text (`!`, `-`, `++`, `delete`, ...)
        op: String,
        /// Prefix or postfix
        prefix: bool,
    },
    /// Binary operator; children: `[lhs, rhs]`
    Binary {
        /// Operator text
        op: String,
    },
    /// Assignment; children: `[target, value]`
    Assign {
        /// `=` or compound operator text (`+=`)
        op: String,
    },
    /// `c ? a : b`; children: `[condition, then, else]`
    Conditional,
    /// `new T`
    New {
        /// Created type
        type_name: String,
    },
    /// `(a, b)` or `[a, b]`; children are components, omitted ones are skipped
    Tuple {
        /// Inline array literal rather than a parenthesized tuple
        array: bool,
    },
    /// `type(T)` or `mapping(...)` used in expression position
    TypeExpression(String),
}

impl NodeKind {
    /// Whether this kind is a statement executed by the control-flow graph
    ///
    /// Blocks, `unchecked` blocks and catch clauses are structural containers only.
    pub fn is_cfg_statement(&self) -> bool {
        matches!(
            self,
            NodeKind::VarDecl { .. }
                | NodeKind::ExprStmt
                | NodeKind::If { .. }
                | NodeKind::While
                | NodeKind::DoWhile
                | NodeKind::For { .. }
                | NodeKind::Return
                | NodeKind::Break
                | NodeKind::Continue
                | NodeKind::Emit
                | NodeKind::Revert
                | NodeKind::Try { .. }
                | NodeKind::Assembly
                | NodeKind::Placeholder
        )
    }

    /// Whether this kind groups statements without executing anything itself
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            NodeKind::Block | NodeKind::Unchecked | NodeKind::CatchClause { .. }
        )
    }

    /// Whether this kind is a function-like declaration
    pub fn is_function(&self) -> bool {
        matches!(self, NodeKind::Function { .. })
    }

    /// Whether this kind is a contract-like declaration
    pub fn is_contract(&self) -> bool {
        matches!(self, NodeKind::Contract { .. })
    }

    /// Short label used in graph features and logs
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::SourceUnit => "source_unit",
            NodeKind::Pragma => "pragma",
            NodeKind::Import { .. } => "import",
            NodeKind::Contract { .. } => "contract",
            NodeKind::StateVariable { .. } => "state_variable",
            NodeKind::Struct { .. } => "struct",
            NodeKind::TypeDeclaration { .. } => "type_declaration",
            NodeKind::Using { .. } => "using",
            NodeKind::Function { .. } => "function",
            NodeKind::ModifierInvocation { .. } => "modifier_invocation",
            NodeKind::Block => "block",
            NodeKind::Unchecked => "unchecked",
            NodeKind::VarDecl { .. } => "variable_declaration",
            NodeKind::ExprStmt => "expression_statement",
            NodeKind::If { .. } => "if",
            NodeKind::While => "while",
            NodeKind::DoWhile => "do_while",
            NodeKind::For { .. } => "for",
            NodeKind::Return => "return",
            NodeKind::Break => "break",
            NodeKind::Continue => "continue",
            NodeKind::Emit => "emit",
            NodeKind::Revert => "revert",
            NodeKind::Try { .. } => "try",
            NodeKind::CatchClause { .. } => "catch",
            NodeKind::Assembly => "assembly",
            NodeKind::Placeholder => "placeholder",
            NodeKind::Identifier(_) => "identifier",
            NodeKind::Literal(_) => "literal",
            NodeKind::ElementaryType(_) => "elementary_type",
            NodeKind::Member { .. } => "member_access",
            NodeKind::Index => "index_access",
            NodeKind::IndexRange => "index_range",
            NodeKind::Call { .. } => "call",
            NodeKind::CallOptions { .. } => "call_options",
            NodeKind::Unary { .. } => "unary",
            NodeKind::Binary { .. } => "binary",
            NodeKind::Assign { .. } => "assignment",
            NodeKind::Conditional => "conditional",
            NodeKind::New { .. } => "new",
            NodeKind::Tuple { .. } => "tuple",
            NodeKind::TypeExpression(_) => "type_expression",
        }
    }

    /// Declared name for named declarations
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeKind::Contract { name, .. }
            | NodeKind::StateVariable { name, .. }
            | NodeKind::Struct { name, .. }
            | NodeKind::TypeDeclaration { name, .. }
            | NodeKind::Function { name, .. }
            | NodeKind::ModifierInvocation { name } => Some(name),
            NodeKind::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

/// Syntax tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity
    pub id: NodeId,
    /// Node kind and payload
    pub kind: NodeKind,
    /// Source location
    pub span: Span,
    /// Ordered children
    pub children: Vec<NodeId>,
    /// Syntactic parent (non-owning back-reference)
    pub parent: Option<NodeId>,
}

/// Index-addressed arena of syntax nodes
///
/// Ids are dense: node `i` lives at index `i - base`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    base: u32,
    nodes: Vec<Node>,
}

impl Ast {
    /// Create an empty arena whose first node will receive id `base`
    pub fn with_base(base: u32) -> Self {
        Ast {
            base,
            nodes: Vec::new(),
        }
    }

    /// Allocate a node and return its id
    pub fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.base + self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            kind,
            span,
            children: Vec::new(),
            parent: None,
        });
        id
    }

    /// Attach `child` as the last child of `parent`
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    /// Look up a node by id
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let index = id.0.checked_sub(self.base)? as usize;
        self.nodes.get(index)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let index = id.0.checked_sub(self.base)? as usize;
        self.nodes.get_mut(index)
    }

    /// Replace the kind of an already allocated node
    ///
    /// Used when flags such as `has_else` are only known after the children are parsed.
    pub fn replace_kind(&mut self, id: NodeId, kind: NodeKind) {
        if let Some(node) = self.node_mut(id) {
            node.kind = kind;
        }
    }

    /// Mutable access to a node's span, used to widen spans once a construct is complete
    pub fn span_mut(&mut self, id: NodeId) -> Option<&mut Span> {
        self.node_mut(id).map(|n| &mut n.span)
    }

    /// Kind of a node
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.get(id).map(|n| &n.kind)
    }

    /// Children of a node (empty for unknown ids)
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Parent of a node
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Number of nodes in the arena
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First id handed out by this arena
    pub fn base(&self) -> u32 {
        self.base
    }

    /// One past the last id handed out by this arena
    pub fn next_id(&self) -> u32 {
        self.base + self.nodes.len() as u32
    }

    /// Iterate nodes in id order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Move every node of `other` into this arena, shifting ids so they follow ours
    ///
    /// Returns the offset that was added to `other`'s ids.
    pub fn absorb(&mut self, other: Ast, unit: u32) -> u32 {
        let offset = self.next_id() - other.base;
        let shift = |id: NodeId| NodeId(id.0 + offset);
        for mut node in other.nodes {
            node.id = shift(node.id);
            node.parent = node.parent.map(shift);
            node.children = node.children.into_iter().map(shift).collect();
            node.span.unit = unit;
            self.nodes.push(node);
        }
        offset
    }

    /// Ancestors of `id`, nearest first
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// Nearest enclosing function-like declaration
    pub fn enclosing_function(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .find(|&a| self.kind(a).map(NodeKind::is_function).unwrap_or(false))
    }

    /// Nearest enclosing contract-like declaration
    pub fn enclosing_contract(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .find(|&a| self.kind(a).map(NodeKind::is_contract).unwrap_or(false))
    }

    /// Nearest node at or above `id` that executes as a control-flow statement
    pub fn enclosing_statement(&self, id: NodeId) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|&a| self.kind(a).map(NodeKind::is_cfg_statement).unwrap_or(false))
    }

    /// All nodes in the subtree rooted at `id`, in pre-order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    // ========================================================================
    // Structured accessors for statements with optional parts
    // ========================================================================

    /// `(condition, then, else)` of an `if`
    pub fn if_parts(&self, id: NodeId) -> Option<(NodeId, NodeId, Option<NodeId>)> {
        let children = self.children(id);
        match (self.kind(id)?, children) {
            (NodeKind::If { has_else: true }, [c, t, e]) => Some((*c, *t, Some(*e))),
            (NodeKind::If { has_else: false }, [c, t]) => Some((*c, *t, None)),
            _ => None,
        }
    }

    /// Parts of a `for` loop
    pub fn for_parts(&self, id: NodeId) -> Option<ForParts> {
        let (has_init, has_condition, has_update) = match self.kind(id)? {
            NodeKind::For {
                has_init,
                has_condition,
                has_update,
            } => (*has_init, *has_condition, *has_update),
            _ => return None,
        };
        let mut iter = self.children(id).iter().copied();
        let init = if has_init { iter.next() } else { None };
        let condition = if has_condition { iter.next() } else { None };
        let update = if has_update { iter.next() } else { None };
        let body = iter.next()?;
        Some(ForParts {
            init,
            condition,
            update,
            body,
        })
    }

    /// Body block of a function, if present
    pub fn function_body(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id)? {
            NodeKind::Function { has_body: true, .. } => self.children(id).last().copied(),
            _ => None,
        }
    }

    /// Modifier invocations of a function
    pub fn function_modifiers(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&c| matches!(self.kind(c), Some(NodeKind::ModifierInvocation { .. })))
            .collect()
    }

    /// Dotted access path of an expression (`msg.sender.call` -> `["msg", "sender", "call"]`)
    ///
    /// Call options are transparent; calls and other non-path bases contribute `"()"`/`"?"`.
    pub fn access_path(&self, id: NodeId) -> Vec<String> {
        match self.kind(id) {
            Some(NodeKind::Identifier(name)) => vec![name.clone()],
            Some(NodeKind::ElementaryType(name)) => vec![name.clone()],
            Some(NodeKind::Member { member }) => {
                let mut path = match self.children(id).first() {
                    Some(&base) => self.access_path(base),
                    None => Vec::new(),
                };
                path.push(member.clone());
                path
            }
            Some(NodeKind::CallOptions { .. }) => match self.children(id).first() {
                Some(&callee) => self.access_path(callee),
                None => Vec::new(),
            },
            Some(NodeKind::Call { .. }) => vec!["()".to_string()],
            _ => vec!["?".to_string()],
        }
    }
}

/// Parts of a `for` statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForParts {
    /// Init statement
    pub init: Option<NodeId>,
    /// Loop condition expression
    pub condition: Option<NodeId>,
    /// Update statement
    pub update: Option<NodeId>,
    /// Loop body
    pub body: NodeId,
}

/// One parsed compilation unit; immutable after parse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Path the unit was read from
    pub path: String,
    /// Root node
    pub root: NodeId,
    /// Top-level declarations in source order
    pub declarations: Vec<NodeId>,
    /// SHA-256 of the source text, hex encoded
    pub digest: String,
}
