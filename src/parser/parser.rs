use super::ast::{
    Ast, ContractKind, FunctionKind, LocalVar, NodeId, NodeKind, Param, Span,
};
use crate::error::{Error, Result};
use crate::lexer::{Token, TokenKind};

const DATA_LOCATIONS: &[&str] = &["storage", "memory", "calldata"];
const VISIBILITY: &[&str] = &["public", "private", "internal", "external"];
const MUTABILITY: &[&str] = &["pure", "view", "payable", "nonpayable", "constant"];
const NUMBER_UNITS: &[&str] = &[
    "wei", "gwei", "ether", "seconds", "minutes", "hours", "days", "weeks",
];

/// Whether `name` is an elementary Solidity type
pub fn is_elementary_type(name: &str) -> bool {
    let sized = |prefix: &str| {
        name.strip_prefix(prefix)
            .map(|rest| rest.is_empty() || rest.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    };
    matches!(name, "address" | "bool" | "string" | "byte")
        || sized("uint")
        || sized("int")
        || sized("bytes")
        || name.starts_with("fixed")
        || name.starts_with("ufixed")
}

/// Recursive-descent parser for one Solidity source unit
///
/// Nodes are allocated into a fresh arena starting at id `base`; the caller relocates
/// them into the run-wide arena afterwards.
pub struct SolidityParser {
    file: String,
    tokens: Vec<Token>,
    current: usize,
    ast: Ast,
}

/// Output of parsing one source unit
#[derive(Debug)]
pub struct ParsedUnit {
    /// Arena holding every node of the unit
    pub ast: Ast,
    /// Root `SourceUnit` node
    pub root: NodeId,
    /// Top-level declarations in order
    pub declarations: Vec<NodeId>,
}

impl SolidityParser {
    /// Creates a parser over `tokens` (which must end with `Eof`)
    pub fn new(file: impl Into<String>, tokens: Vec<Token>, base: u32) -> Self {
        SolidityParser {
            file: file.into(),
            tokens,
            current: 0,
            ast: Ast::with_base(base),
        }
    }

    /// Parses the whole unit
    pub fn parse(mut self) -> Result<ParsedUnit> {
        let span = self.mark();
        let root = self.ast.alloc(NodeKind::SourceUnit, span);
        let mut declarations = Vec::new();

        while !self.is_at_end() {
            if self.match_kind(&TokenKind::Semicolon) {
                continue;
            }
            let decl = self.parse_top_level()?;
            self.ast.attach(root, decl);
            declarations.push(decl);
        }
        self.finish(root);

        Ok(ParsedUnit {
            ast: self.ast,
            root,
            declarations,
        })
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn parse_top_level(&mut self) -> Result<NodeId> {
        let span = self.mark();
        if self.match_word("pragma") {
            while !self.check(&TokenKind::Semicolon) {
                if self.is_at_end() {
                    return Err(self.eof_error());
                }
                self.advance();
            }
            self.consume(TokenKind::Semicolon, "';' after pragma")?;
            let id = self.ast.alloc(NodeKind::Pragma, span);
            self.finish(id);
            return Ok(id);
        }
        if self.match_word("import") {
            let mut path = String::new();
            while !self.check(&TokenKind::Semicolon) {
                if self.is_at_end() {
                    return Err(self.eof_error());
                }
                if let TokenKind::StringLiteral(s) = &self.advance().kind {
                    if path.is_empty() {
                        path = s.clone();
                    }
                }
            }
            self.consume(TokenKind::Semicolon, "';' after import")?;
            let id = self.ast.alloc(NodeKind::Import { path }, span);
            self.finish(id);
            return Ok(id);
        }
        if self.match_word("abstract") {
            return self.parse_contract(span);
        }
        if self.check_word("contract") || self.check_word("interface") || self.check_word("library")
        {
            return self.parse_contract(span);
        }
        self.parse_member()
    }

    fn parse_contract(&mut self, span: Span) -> Result<NodeId> {
        let keyword = self.expect_identifier("contract, interface or library")?;
        let kind = match keyword.as_str() {
            "interface" => ContractKind::Interface,
            "library" => ContractKind::Library,
            "contract" => ContractKind::Contract,
            other => {
                return Err(self.syntax_error(format!(
                    "expected contract, interface or library, got '{}'",
                    other
                )))
            }
        };
        let name = self.expect_identifier("contract name")?;
        let id = self.ast.alloc(
            NodeKind::Contract {
                name: name.clone(),
                kind,
                bases: Vec::new(),
            },
            span,
        );

        let mut bases = Vec::new();
        if self.match_word("is") {
            loop {
                bases.push(self.parse_path_name()?);
                if self.check(&TokenKind::LeftParen) {
                    self.skip_balanced(TokenKind::LeftParen, TokenKind::RightParen)?;
                }
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.ast
            .replace_kind(id, NodeKind::Contract { name, kind, bases });

        self.consume(TokenKind::LeftBrace, "'{' to open contract body")?;
        while !self.check(&TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.eof_error());
            }
            if self.match_kind(&TokenKind::Semicolon) {
                continue;
            }
            let member = self.parse_member()?;
            self.ast.attach(id, member);
        }
        self.consume(TokenKind::RightBrace, "'}' to close contract body")?;
        self.finish(id);
        Ok(id)
    }

    fn parse_member(&mut self) -> Result<NodeId> {
        let span = self.mark();
        if self.check_word("function") {
            return self.parse_function(FunctionKind::Function);
        }
        if self.check_word("constructor") {
            return self.parse_function(FunctionKind::Constructor);
        }
        if self.check_word("modifier") {
            return self.parse_function(FunctionKind::Modifier);
        }
        if self.check_word("receive") && self.check_next(&TokenKind::LeftParen) {
            return self.parse_function(FunctionKind::Receive);
        }
        if self.check_word("fallback") && self.check_next(&TokenKind::LeftParen) {
            return self.parse_function(FunctionKind::Fallback);
        }
        if self.match_word("struct") {
            let name = self.expect_identifier("struct name")?;
            self.consume(TokenKind::LeftBrace, "'{' after struct name")?;
            let mut fields = Vec::new();
            while !self.check(&TokenKind::RightBrace) {
                if self.is_at_end() {
                    return Err(self.eof_error());
                }
                let type_name = self.parse_type_name()?;
                let field = self.expect_identifier("struct field name")?;
                self.consume(TokenKind::Semicolon, "';' after struct field")?;
                fields.push((field, type_name));
            }
            self.consume(TokenKind::RightBrace, "'}' after struct fields")?;
            let id = self.ast.alloc(NodeKind::Struct { name, fields }, span);
            self.finish(id);
            return Ok(id);
        }
        if self.check_word("enum") {
            self.advance();
            let name = self.expect_identifier("enum name")?;
            self.skip_balanced(TokenKind::LeftBrace, TokenKind::RightBrace)?;
            return Ok(self.type_declaration("enum", name, span));
        }
        if self.check_word("event") || self.check_word("error") {
            let keyword = self.expect_identifier("event or error")?;
            let name = self.expect_identifier("declaration name")?;
            self.skip_until_semicolon()?;
            return Ok(self.type_declaration(&keyword, name, span));
        }
        if self.check_word("type") && !self.check_next(&TokenKind::LeftParen) {
            self.advance();
            let name = self.expect_identifier("type name")?;
            self.skip_until_semicolon()?;
            return Ok(self.type_declaration("type", name, span));
        }
        if self.match_word("using") {
            let library = self.parse_path_name()?;
            self.skip_until_semicolon()?;
            let id = self.ast.alloc(NodeKind::Using { library }, span);
            self.finish(id);
            return Ok(id);
        }
        self.parse_state_variable(span)
    }

    fn type_declaration(&mut self, keyword: &str, name: String, span: Span) -> NodeId {
        let id = self.ast.alloc(
            NodeKind::TypeDeclaration {
                keyword: keyword.to_string(),
                name,
            },
            span,
        );
        self.finish(id);
        id
    }

    fn parse_state_variable(&mut self, span: Span) -> Result<NodeId> {
        let type_name = self.parse_type_name()?;
        let mut constant = false;
        loop {
            if self.match_word("constant") || self.match_word("immutable") {
                constant = true;
            } else if self.match_word("override") {
                if self.check(&TokenKind::LeftParen) {
                    self.skip_balanced(TokenKind::LeftParen, TokenKind::RightParen)?;
                }
            } else if VISIBILITY.iter().any(|v| self.check_word(v)) || self.check_word("transient")
            {
                self.advance();
            } else {
                break;
            }
        }
        let name = self.expect_identifier("state variable name")?;
        let id = self.ast.alloc(
            NodeKind::StateVariable {
                name,
                type_name,
                constant,
            },
            span,
        );
        if self.match_kind(&TokenKind::Assign) {
            let init = self.parse_expression()?;
            self.ast.attach(id, init);
        }
        self.consume(TokenKind::Semicolon, "';' after state variable")?;
        self.finish(id);
        Ok(id)
    }

    fn parse_function(&mut self, kind: FunctionKind) -> Result<NodeId> {
        let span = self.mark();
        let keyword = self.expect_identifier("function keyword")?;
        let name = match kind {
            FunctionKind::Function | FunctionKind::Modifier => {
                // Old-style unnamed fallback: `function () external`
                if self.check(&TokenKind::LeftParen) {
                    "fallback".to_string()
                } else {
                    self.expect_identifier("function name")?
                }
            }
            _ => keyword,
        };
        let id = self.ast.alloc(
            NodeKind::Function {
                name: name.clone(),
                kind,
                visibility: None,
                mutability: None,
                params: Vec::new(),
                returns: Vec::new(),
                has_body: false,
            },
            span,
        );

        let params = if self.check(&TokenKind::LeftParen) {
            self.parse_param_list()?
        } else {
            Vec::new()
        };

        let mut visibility = None;
        let mut mutability = None;
        let mut returns = Vec::new();
        loop {
            if self.check(&TokenKind::LeftBrace) || self.check(&TokenKind::Semicolon) {
                break;
            }
            if self.is_at_end() {
                return Err(self.eof_error());
            }
            if let Some(v) = VISIBILITY.iter().find(|v| self.check_word(v)) {
                visibility = Some(v.to_string());
                self.advance();
            } else if let Some(m) = MUTABILITY.iter().find(|m| self.check_word(m)) {
                mutability = Some(m.to_string());
                self.advance();
            } else if self.match_word("virtual") {
                continue;
            } else if self.match_word("override") {
                if self.check(&TokenKind::LeftParen) {
                    self.skip_balanced(TokenKind::LeftParen, TokenKind::RightParen)?;
                }
            } else if self.match_word("returns") {
                returns = self.parse_param_list()?;
            } else {
                let invocation = self.parse_modifier_invocation()?;
                self.ast.attach(id, invocation);
            }
        }

        let has_body = if self.match_kind(&TokenKind::Semicolon) {
            false
        } else {
            let body = self.parse_block()?;
            self.ast.attach(id, body);
            true
        };

        self.ast.replace_kind(
            id,
            NodeKind::Function {
                name,
                kind,
                visibility,
                mutability,
                params,
                returns,
                has_body,
            },
        );
        self.finish(id);
        Ok(id)
    }

    fn parse_modifier_invocation(&mut self) -> Result<NodeId> {
        let span = self.mark();
        let name = self.parse_path_name()?;
        let id = self.ast.alloc(NodeKind::ModifierInvocation { name }, span);
        if self.match_kind(&TokenKind::LeftParen) {
            if !self.check(&TokenKind::RightParen) {
                loop {
                    let arg = self.parse_expression()?;
                    self.ast.attach(id, arg);
                    if !self.match_kind(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RightParen, "')' after modifier arguments")?;
        }
        self.finish(id);
        Ok(id)
    }

    fn parse_param_list(&mut self) -> Result<Vec<Param>> {
        self.consume(TokenKind::LeftParen, "'(' to open parameter list")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let type_name = self.parse_type_name()?;
                let mut location = None;
                if let Some(loc) = DATA_LOCATIONS.iter().find(|l| self.check_word(l)) {
                    location = Some(loc.to_string());
                    self.advance();
                }
                self.match_word("indexed");
                let name = match &self.peek().kind {
                    TokenKind::Identifier(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                params.push(Param {
                    type_name,
                    location,
                    name,
                });
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "')' to close parameter list")?;
        Ok(params)
    }

    /// Parses a type name into its textual form
    fn parse_type_name(&mut self) -> Result<String> {
        let mut text = if self.match_word("mapping") {
            self.consume(TokenKind::LeftParen, "'(' after mapping")?;
            let key = self.parse_type_name()?;
            if !self.check(&TokenKind::FatArrow) {
                self.expect_identifier("mapping key name")?;
            }
            self.consume(TokenKind::FatArrow, "'=>' in mapping")?;
            let value = self.parse_type_name()?;
            if !self.check(&TokenKind::RightParen) {
                self.expect_identifier("mapping value name")?;
            }
            self.consume(TokenKind::RightParen, "')' after mapping")?;
            format!("mapping({} => {})", key, value)
        } else if self.match_word("function") {
            self.skip_balanced(TokenKind::LeftParen, TokenKind::RightParen)?;
            while VISIBILITY.iter().chain(MUTABILITY).any(|w| self.check_word(w)) {
                self.advance();
            }
            if self.match_word("returns") {
                self.skip_balanced(TokenKind::LeftParen, TokenKind::RightParen)?;
            }
            "function".to_string()
        } else {
            let mut name = self.parse_path_name()?;
            if name == "address" && self.match_word("payable") {
                name.push_str(" payable");
            }
            name
        };

        while self.check(&TokenKind::LeftBracket) {
            let start = self.current;
            self.skip_balanced(TokenKind::LeftBracket, TokenKind::RightBracket)?;
            for token in &self.tokens[start..self.current] {
                text.push_str(&token.lexeme);
            }
        }
        Ok(text)
    }

    fn parse_path_name(&mut self) -> Result<String> {
        let mut name = self.expect_identifier("type or contract name")?;
        while self.check(&TokenKind::Dot) && matches!(self.peek_at(1).kind, TokenKind::Identifier(_))
        {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_identifier("name after '.'")?);
        }
        Ok(name)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_block(&mut self) -> Result<NodeId> {
        let span = self.mark();
        self.consume(TokenKind::LeftBrace, "'{' to open block")?;
        let id = self.ast.alloc(NodeKind::Block, span);
        self.parse_block_contents(id)?;
        Ok(id)
    }

    fn parse_block_contents(&mut self, id: NodeId) -> Result<()> {
        while !self.check(&TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.eof_error());
            }
            if self.match_kind(&TokenKind::Semicolon) {
                continue;
            }
            let stmt = self.parse_statement()?;
            self.ast.attach(id, stmt);
        }
        self.consume(TokenKind::RightBrace, "'}' to close block")?;
        self.finish(id);
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<NodeId> {
        let span = self.mark();
        if self.check(&TokenKind::LeftBrace) {
            return self.parse_block();
        }
        let word = match &self.peek().kind {
            TokenKind::Identifier(word) => Some(word.clone()),
            _ => None,
        };
        match word.as_deref() {
            Some("if") => return self.parse_if(),
            Some("while") => return self.parse_while(),
            Some("do") => return self.parse_do_while(),
            Some("for") => return self.parse_for(),
            Some("try") => return self.parse_try(),
            Some("return") => {
                self.advance();
                let id = self.ast.alloc(NodeKind::Return, span);
                if !self.check(&TokenKind::Semicolon) {
                    let value = self.parse_expression()?;
                    self.ast.attach(id, value);
                }
                return self.end_statement(id);
            }
            Some("break") => {
                self.advance();
                let id = self.ast.alloc(NodeKind::Break, span);
                return self.end_statement(id);
            }
            Some("continue") => {
                self.advance();
                let id = self.ast.alloc(NodeKind::Continue, span);
                return self.end_statement(id);
            }
            Some("throw") => {
                self.advance();
                let id = self.ast.alloc(NodeKind::Revert, span);
                return self.end_statement(id);
            }
            Some("emit") => {
                self.advance();
                let id = self.ast.alloc(NodeKind::Emit, span);
                let call = self.parse_expression()?;
                self.ast.attach(id, call);
                return self.end_statement(id);
            }
            Some("revert") => {
                let id = self.ast.alloc(NodeKind::Revert, span);
                if matches!(self.peek_at(1).kind, TokenKind::Identifier(_)) {
                    self.advance();
                }
                let call = self.parse_expression()?;
                self.ast.attach(id, call);
                return self.end_statement(id);
            }
            Some("unchecked") if self.check_next(&TokenKind::LeftBrace) => {
                self.advance();
                self.advance();
                let id = self.ast.alloc(NodeKind::Unchecked, span);
                self.parse_block_contents(id)?;
                return Ok(id);
            }
            Some("assembly") => {
                self.advance();
                if matches!(self.peek().kind, TokenKind::StringLiteral(_)) {
                    self.advance();
                }
                if self.check(&TokenKind::LeftParen) {
                    self.skip_balanced(TokenKind::LeftParen, TokenKind::RightParen)?;
                }
                self.skip_balanced(TokenKind::LeftBrace, TokenKind::RightBrace)?;
                let id = self.ast.alloc(NodeKind::Assembly, span);
                self.finish(id);
                return Ok(id);
            }
            Some("_") if self.check_next(&TokenKind::Semicolon) => {
                self.advance();
                let id = self.ast.alloc(NodeKind::Placeholder, span);
                return self.end_statement(id);
            }
            _ => {}
        }
        self.parse_simple_statement()
    }

    /// Variable declaration or expression statement, including the trailing `;`
    fn parse_simple_statement(&mut self) -> Result<NodeId> {
        let span = self.mark();
        if let Some(vars) = self.try_declaration_head() {
            let id = self.ast.alloc(NodeKind::VarDecl { vars }, span);
            if self.match_kind(&TokenKind::Assign) {
                let init = self.parse_expression()?;
                self.ast.attach(id, init);
            }
            return self.end_statement(id);
        }
        let id = self.ast.alloc(NodeKind::ExprStmt, span);
        let expr = self.parse_expression()?;
        self.ast.attach(id, expr);
        self.end_statement(id)
    }

    /// Speculatively reads `T [loc] name` or `(T a, , T b)`; rewinds on mismatch
    fn try_declaration_head(&mut self) -> Option<Vec<Option<LocalVar>>> {
        let saved = self.current;
        let result = if self.check(&TokenKind::LeftParen) {
            self.try_tuple_declaration()
        } else {
            self.try_local_var().map(|var| vec![Some(var)])
        };
        if result.is_none() {
            self.current = saved;
        }
        result
    }

    fn try_local_var(&mut self) -> Option<LocalVar> {
        if self.check_word("delete") || self.check_word("new") {
            return None;
        }
        if !matches!(self.peek().kind, TokenKind::Identifier(_)) {
            return None;
        }
        let type_name = self.parse_type_name().ok()?;
        let mut location = None;
        if let Some(loc) = DATA_LOCATIONS.iter().find(|l| self.check_word(l)) {
            location = Some(loc.to_string());
            self.advance();
        }
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Some(LocalVar {
                    type_name,
                    location,
                    name,
                })
            }
            _ => None,
        }
    }

    fn try_tuple_declaration(&mut self) -> Option<Vec<Option<LocalVar>>> {
        self.advance();
        let mut vars = Vec::new();
        loop {
            if self.check(&TokenKind::Comma) || self.check(&TokenKind::RightParen) {
                vars.push(None);
            } else {
                vars.push(Some(self.try_local_var()?));
            }
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        if !self.match_kind(&TokenKind::RightParen) || !self.check(&TokenKind::Assign) {
            return None;
        }
        if vars.iter().all(Option::is_none) {
            return None;
        }
        Some(vars)
    }

    fn parse_if(&mut self) -> Result<NodeId> {
        let span = self.mark();
        self.advance();
        let id = self.ast.alloc(NodeKind::If { has_else: false }, span);
        self.consume(TokenKind::LeftParen, "'(' after if")?;
        let condition = self.parse_expression()?;
        self.ast.attach(id, condition);
        self.consume(TokenKind::RightParen, "')' after if condition")?;
        let then_branch = self.parse_statement()?;
        self.ast.attach(id, then_branch);
        if self.match_word("else") {
            let else_branch = self.parse_statement()?;
            self.ast.attach(id, else_branch);
            self.ast.replace_kind(id, NodeKind::If { has_else: true });
        }
        self.finish(id);
        Ok(id)
    }

    fn parse_while(&mut self) -> Result<NodeId> {
        let span = self.mark();
        self.advance();
        let id = self.ast.alloc(NodeKind::While, span);
        self.consume(TokenKind::LeftParen, "'(' after while")?;
        let condition = self.parse_expression()?;
        self.ast.attach(id, condition);
        self.consume(TokenKind::RightParen, "')' after while condition")?;
        let body = self.parse_statement()?;
        self.ast.attach(id, body);
        self.finish(id);
        Ok(id)
    }

    fn parse_do_while(&mut self) -> Result<NodeId> {
        let span = self.mark();
        self.advance();
        let id = self.ast.alloc(NodeKind::DoWhile, span);
        let body = self.parse_statement()?;
        self.ast.attach(id, body);
        if !self.match_word("while") {
            return Err(self.syntax_error("expected 'while' after do body"));
        }
        self.consume(TokenKind::LeftParen, "'(' after while")?;
        let condition = self.parse_expression()?;
        self.ast.attach(id, condition);
        self.consume(TokenKind::RightParen, "')' after while condition")?;
        self.end_statement(id)
    }

    fn parse_for(&mut self) -> Result<NodeId> {
        let span = self.mark();
        self.advance();
        let id = self.ast.alloc(
            NodeKind::For {
                has_init: false,
                has_condition: false,
                has_update: false,
            },
            span,
        );
        self.consume(TokenKind::LeftParen, "'(' after for")?;

        let has_init = if self.match_kind(&TokenKind::Semicolon) {
            false
        } else {
            let init = self.parse_simple_statement()?;
            self.ast.attach(id, init);
            true
        };

        let has_condition = if self.match_kind(&TokenKind::Semicolon) {
            false
        } else {
            let condition = self.parse_expression()?;
            self.ast.attach(id, condition);
            self.consume(TokenKind::Semicolon, "';' after for condition")?;
            true
        };

        let has_update = if self.check(&TokenKind::RightParen) {
            false
        } else {
            let update_span = self.mark();
            let update = self.ast.alloc(NodeKind::ExprStmt, update_span);
            let expr = self.parse_expression()?;
            self.ast.attach(update, expr);
            self.finish(update);
            self.ast.attach(id, update);
            true
        };
        self.consume(TokenKind::RightParen, "')' after for clauses")?;

        let body = self.parse_statement()?;
        self.ast.attach(id, body);
        self.ast.replace_kind(
            id,
            NodeKind::For {
                has_init,
                has_condition,
                has_update,
            },
        );
        self.finish(id);
        Ok(id)
    }

    fn parse_try(&mut self) -> Result<NodeId> {
        let span = self.mark();
        self.advance();
        let id = self.ast.alloc(NodeKind::Try { returns: Vec::new() }, span);
        let call = self.parse_expression()?;
        self.ast.attach(id, call);
        let mut returns = Vec::new();
        if self.match_word("returns") {
            returns = self.parse_param_list()?;
        }
        let body = self.parse_block()?;
        self.ast.attach(id, body);

        while self.check_word("catch") {
            let clause_span = self.mark();
            self.advance();
            if matches!(self.peek().kind, TokenKind::Identifier(_)) {
                self.advance();
            }
            let params = if self.check(&TokenKind::LeftParen) {
                self.parse_param_list()?
            } else {
                Vec::new()
            };
            let clause = self
                .ast
                .alloc(NodeKind::CatchClause { params }, clause_span);
            let block = self.parse_block()?;
            self.ast.attach(clause, block);
            self.finish(clause);
            self.ast.attach(id, clause);
        }
        self.ast.replace_kind(id, NodeKind::Try { returns });
        self.finish(id);
        Ok(id)
    }

    fn end_statement(&mut self, id: NodeId) -> Result<NodeId> {
        self.consume(TokenKind::Semicolon, "';' after statement")?;
        self.finish(id);
        Ok(id)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn parse_expression(&mut self) -> Result<NodeId> {
        let target = self.parse_conditional()?;
        let op = match &self.peek().kind {
            TokenKind::Assign => "=".to_string(),
            TokenKind::CompoundAssign(op) => format!("{}=", op),
            _ => return Ok(target),
        };
        self.advance();
        let value = self.parse_expression()?;
        Ok(self.wrap(NodeKind::Assign { op }, &[target, value]))
    }

    fn parse_conditional(&mut self) -> Result<NodeId> {
        let condition = self.parse_binary(1)?;
        if !self.match_kind(&TokenKind::Question) {
            return Ok(condition);
        }
        let then_value = self.parse_expression()?;
        self.consume(TokenKind::Colon, "':' in conditional expression")?;
        let else_value = self.parse_expression()?;
        Ok(self.wrap(NodeKind::Conditional, &[condition, then_value, else_value]))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<NodeId> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, precedence)) = self.peek().kind.binary_precedence() {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            // `**` is right-associative
            let next = if op == "**" { precedence } else { precedence + 1 };
            let rhs = self.parse_binary(next)?;
            lhs = self.wrap(NodeKind::Binary { op: op.to_string() }, &[lhs, rhs]);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<NodeId> {
        let span = self.mark();
        let op = match &self.peek().kind {
            TokenKind::Not => Some("!"),
            TokenKind::Minus => Some("-"),
            TokenKind::Tilde => Some("~"),
            TokenKind::PlusPlus => Some("++"),
            TokenKind::MinusMinus => Some("--"),
            TokenKind::Identifier(word) if word == "delete" => Some("delete"),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let operand = self.parse_unary()?;
                let id = self.ast.alloc(
                    NodeKind::Unary {
                        op: op.to_string(),
                        prefix: true,
                    },
                    span,
                );
                self.ast.attach(id, operand);
                self.finish(id);
                Ok(id)
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<NodeId> {
        let mut expr = self.parse_primary()?;
        loop {
            match &self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let member = self.expect_identifier("member name after '.'")?;
                    expr = self.wrap(NodeKind::Member { member }, &[expr]);
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let mut parts = vec![expr];
                    let mut range = false;
                    if !self.check(&TokenKind::RightBracket) && !self.check(&TokenKind::Colon) {
                        parts.push(self.parse_expression()?);
                    }
                    if self.match_kind(&TokenKind::Colon) {
                        range = true;
                        if !self.check(&TokenKind::RightBracket) {
                            parts.push(self.parse_expression()?);
                        }
                    }
                    self.consume(TokenKind::RightBracket, "']' after index")?;
                    let kind = if range {
                        NodeKind::IndexRange
                    } else {
                        NodeKind::Index
                    };
                    expr = self.wrap(kind, &parts);
                }
                TokenKind::LeftBrace
                    if matches!(self.peek_at(1).kind, TokenKind::Identifier(_))
                        && matches!(self.peek_at(2).kind, TokenKind::Colon) =>
                {
                    self.advance();
                    let (names, values) = self.parse_named_values()?;
                    let mut parts = vec![expr];
                    parts.extend(values);
                    expr = self.wrap(NodeKind::CallOptions { names }, &parts);
                }
                TokenKind::LeftParen => {
                    self.advance();
                    let mut parts = vec![expr];
                    let mut named_args = Vec::new();
                    if self.match_kind(&TokenKind::LeftBrace) {
                        let (names, values) = self.parse_named_values()?;
                        named_args = names;
                        parts.extend(values);
                    } else if !self.check(&TokenKind::RightParen) {
                        loop {
                            parts.push(self.parse_expression()?);
                            if !self.match_kind(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.consume(TokenKind::RightParen, "')' after call arguments")?;
                    expr = self.wrap(NodeKind::Call { named_args }, &parts);
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op = if self.check(&TokenKind::PlusPlus) {
                        "++"
                    } else {
                        "--"
                    };
                    self.advance();
                    expr = self.wrap(
                        NodeKind::Unary {
                            op: op.to_string(),
                            prefix: false,
                        },
                        &[expr],
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Reads `name: value, ...}` after an opening brace
    fn parse_named_values(&mut self) -> Result<(Vec<String>, Vec<NodeId>)> {
        let mut names = Vec::new();
        let mut values = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            names.push(self.expect_identifier("option name")?);
            self.consume(TokenKind::Colon, "':' after option name")?;
            values.push(self.parse_expression()?);
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RightBrace, "'}' after named values")?;
        Ok((names, values))
    }

    fn parse_primary(&mut self) -> Result<NodeId> {
        let span = self.mark();
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Number(text) => {
                self.advance();
                let mut text = text.clone();
                if let Some(unit) = NUMBER_UNITS.iter().find(|u| self.check_word(u)) {
                    text.push(' ');
                    text.push_str(unit);
                    self.advance();
                }
                Ok(self.leaf(NodeKind::Literal(text), span))
            }
            TokenKind::StringLiteral(_) => {
                let mut text = String::new();
                while let TokenKind::StringLiteral(s) = &self.peek().kind {
                    text.push_str(s);
                    self.advance();
                }
                Ok(self.leaf(NodeKind::Literal(format!("\"{}\"", text)), span))
            }
            TokenKind::Identifier(word) => {
                let word = word.clone();
                match word.as_str() {
                    "true" | "false" => {
                        self.advance();
                        Ok(self.leaf(NodeKind::Literal(word), span))
                    }
                    "hex" | "unicode"
                        if matches!(self.peek_at(1).kind, TokenKind::StringLiteral(_)) =>
                    {
                        self.advance();
                        let literal = self.advance().lexeme;
                        Ok(self.leaf(NodeKind::Literal(format!("{}{}", word, literal)), span))
                    }
                    "new" => {
                        self.advance();
                        let type_name = self.parse_type_name()?;
                        Ok(self.leaf(NodeKind::New { type_name }, span))
                    }
                    "type" if self.check_next(&TokenKind::LeftParen) => {
                        self.advance();
                        self.advance();
                        let inner = self.parse_type_name()?;
                        self.consume(TokenKind::RightParen, "')' after type(...)")?;
                        Ok(self.leaf(NodeKind::TypeExpression(format!("type({})", inner)), span))
                    }
                    "mapping" => {
                        let text = self.parse_type_name()?;
                        Ok(self.leaf(NodeKind::TypeExpression(text), span))
                    }
                    "payable" if self.check_next(&TokenKind::LeftParen) => {
                        self.advance();
                        Ok(self.leaf(NodeKind::ElementaryType(word), span))
                    }
                    _ if is_elementary_type(&word) => {
                        self.advance();
                        let mut name = word;
                        if name == "address" && self.match_word("payable") {
                            name.push_str(" payable");
                        }
                        Ok(self.leaf(NodeKind::ElementaryType(name), span))
                    }
                    _ => {
                        self.advance();
                        Ok(self.leaf(NodeKind::Identifier(word), span))
                    }
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let (components, commas) = self.parse_components(&TokenKind::RightParen)?;
                self.consume(TokenKind::RightParen, "')' after expression")?;
                if commas == 0 && components.len() == 1 {
                    return Ok(components[0]);
                }
                Ok(self.group(NodeKind::Tuple { array: false }, span, &components))
            }
            TokenKind::LeftBracket => {
                self.advance();
                let (components, _) = self.parse_components(&TokenKind::RightBracket)?;
                self.consume(TokenKind::RightBracket, "']' after array literal")?;
                Ok(self.group(NodeKind::Tuple { array: true }, span, &components))
            }
            TokenKind::Eof => Err(self.eof_error()),
            other => Err(self.syntax_error(format!("unexpected token '{}' in expression", other))),
        }
    }

    /// Comma-separated, possibly empty components up to `close`
    fn parse_components(&mut self, close: &TokenKind) -> Result<(Vec<NodeId>, usize)> {
        let mut components = Vec::new();
        let mut commas = 0;
        while !self.check(close) {
            if self.match_kind(&TokenKind::Comma) {
                commas += 1;
                continue;
            }
            components.push(self.parse_expression()?);
            if self.match_kind(&TokenKind::Comma) {
                commas += 1;
            } else {
                break;
            }
        }
        Ok((components, commas))
    }

    // ========================================================================
    // Node helpers
    // ========================================================================

    fn leaf(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = self.ast.alloc(kind, span);
        self.finish(id);
        id
    }

    fn group(&mut self, kind: NodeKind, span: Span, children: &[NodeId]) -> NodeId {
        let id = self.ast.alloc(kind, span);
        for &child in children {
            self.ast.attach(id, child);
        }
        self.finish(id);
        id
    }

    /// Allocates a node spanning from its first child to the previous token
    fn wrap(&mut self, kind: NodeKind, children: &[NodeId]) -> NodeId {
        let span = children
            .first()
            .and_then(|&c| self.ast.get(c))
            .map(|n| n.span)
            .unwrap_or_else(|| self.mark());
        self.group(kind, span, children)
    }

    fn mark(&self) -> Span {
        let token = self.peek();
        Span {
            unit: 0,
            start: token.start,
            end: token.start,
            line: token.line,
            column: token.column,
        }
    }

    fn finish(&mut self, id: NodeId) {
        let end = if self.current > 0 {
            self.tokens[self.current - 1].end
        } else {
            0
        };
        if let Some(span) = self.ast.span_mut(id) {
            span.end = end.max(span.start);
        }
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.current + offset).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.tokens[self.current - 1].clone()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn check_next(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek_at(1).kind) == std::mem::discriminant(kind)
    }

    fn check_word(&self, word: &str) -> bool {
        self.peek().is_word(word)
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_word(&mut self, word: &str) -> bool {
        if self.check_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, expected: &str) -> Result<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else if self.is_at_end() {
            Err(self.eof_error())
        } else {
            let got = self.peek().kind.to_string();
            Err(self.syntax_error(format!("expected {}, got '{}'", expected, got)))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            TokenKind::Eof => Err(self.eof_error()),
            other => Err(self.syntax_error(format!("expected {}, got '{}'", what, other))),
        }
    }

    /// Skips a balanced `open ... close` group, starting at `open`
    fn skip_balanced(&mut self, open: TokenKind, close: TokenKind) -> Result<()> {
        self.consume(open.clone(), &format!("'{}'", open))?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.is_at_end() {
                return Err(self.eof_error());
            }
            let token = self.advance();
            if std::mem::discriminant(&token.kind) == std::mem::discriminant(&open) {
                depth += 1;
            } else if std::mem::discriminant(&token.kind) == std::mem::discriminant(&close) {
                depth -= 1;
            }
        }
        Ok(())
    }

    fn skip_until_semicolon(&mut self) -> Result<()> {
        while !self.check(&TokenKind::Semicolon) {
            if self.is_at_end() {
                return Err(self.eof_error());
            }
            self.advance();
        }
        self.advance();
        Ok(())
    }

    fn syntax_error(&self, message: impl Into<String>) -> Error {
        let token = self.peek();
        Error::SyntaxError {
            file: self.file.clone(),
            line: token.line,
            col: token.column,
            message: message.into(),
        }
    }

    fn eof_error(&self) -> Error {
        Error::UnexpectedEof {
            file: self.file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse(source: &str) -> ParsedUnit {
        let tokens = Scanner::new("t.sol", source).scan_tokens().unwrap();
        SolidityParser::new("t.sol", tokens, 0).parse().unwrap()
    }

    fn find(unit: &ParsedUnit, pred: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
        unit.ast.iter().filter(|n| pred(&n.kind)).map(|n| n.id).collect()
    }

    #[test]
    fn test_parse_contract_with_bases_and_members() {
        let unit = parse(
            r#"
            pragma solidity ^0.8.0;
            import "./Base.sol";
            contract Vault is Base, Ownable(msg.sender) {
                mapping(address => uint256) public balances;
                uint256 constant FEE = 1 ether;
                event Deposit(address indexed who, uint amount);
                function deposit() external payable onlyOwner { balances[msg.sender] += msg.value; }
            }
            "#,
        );
        assert_eq!(unit.declarations.len(), 3);
        let contract = unit.declarations[2];
        match unit.ast.kind(contract).unwrap() {
            NodeKind::Contract { name, bases, .. } => {
                assert_eq!(name, "Vault");
                assert_eq!(bases, &vec!["Base".to_string(), "Ownable".to_string()]);
            }
            other => panic!("expected contract, got {:?}", other),
        }
        let vars = find(&unit, |k| matches!(k, NodeKind::StateVariable { .. }));
        assert_eq!(vars.len(), 2);
        match unit.ast.kind(vars[0]).unwrap() {
            NodeKind::StateVariable { type_name, .. } => {
                assert_eq!(type_name, "mapping(address => uint256)")
            }
            _ => unreachable!(),
        }
        let functions = find(&unit, NodeKind::is_function);
        assert_eq!(functions.len(), 1);
        assert_eq!(unit.ast.function_modifiers(functions[0]).len(), 1);
        assert!(unit.ast.function_body(functions[0]).is_some());
    }

    #[test]
    fn test_call_options_and_tuple_declaration() {
        let unit = parse(
            r#"contract C { function w(uint a) public {
                (bool ok, ) = msg.sender.call{value: a}("");
                require(ok, "failed");
            } }"#,
        );
        let decls = find(&unit, |k| matches!(k, NodeKind::VarDecl { .. }));
        assert_eq!(decls.len(), 1);
        match unit.ast.kind(decls[0]).unwrap() {
            NodeKind::VarDecl { vars } => {
                assert_eq!(vars.len(), 2);
                assert_eq!(vars[0].as_ref().unwrap().name, "ok");
                assert!(vars[1].is_none());
            }
            _ => unreachable!(),
        }
        let options = find(&unit, |k| matches!(k, NodeKind::CallOptions { .. }));
        assert_eq!(options.len(), 1);
        assert_eq!(
            unit.ast.access_path(options[0]),
            vec!["msg", "sender", "call"]
        );
    }

    #[test]
    fn test_control_flow_statements() {
        let unit = parse(
            r#"contract C { function f(uint n) internal returns (uint s) {
                for (uint i = 0; i < n; i++) { if (i == 3) continue; else { s += i; } }
                while (s > 10) { s -= 1; if (s == 5) break; }
                do { s++; } while (s < 2);
                unchecked { s = s * 2; }
                assembly { let x := 1 }
                return s;
            } }"#,
        );
        let fors = find(&unit, |k| matches!(k, NodeKind::For { .. }));
        let parts = unit.ast.for_parts(fors[0]).unwrap();
        assert!(parts.init.is_some() && parts.condition.is_some() && parts.update.is_some());
        let ifs = find(&unit, |k| matches!(k, NodeKind::If { .. }));
        assert!(unit.ast.if_parts(ifs[0]).unwrap().2.is_some());
        assert!(unit.ast.if_parts(ifs[1]).unwrap().2.is_none());
        assert_eq!(find(&unit, |k| matches!(k, NodeKind::Assembly)).len(), 1);
        assert_eq!(find(&unit, |k| matches!(k, NodeKind::DoWhile)).len(), 1);
    }

    #[test]
    fn test_expression_statement_not_mistaken_for_declaration() {
        let unit = parse("contract C { uint x; function f() public { x = 1; delete x; } }");
        assert!(find(&unit, |k| matches!(k, NodeKind::VarDecl { .. })).is_empty());
        assert_eq!(find(&unit, |k| matches!(k, NodeKind::ExprStmt)).len(), 2);
    }

    #[test]
    fn test_parent_links_are_consistent() {
        let unit = parse("contract C { function f() public { uint a = 1 + 2 * 3; } }");
        for node in unit.ast.iter() {
            for &child in &node.children {
                assert_eq!(unit.ast.parent(child), Some(node.id));
            }
        }
    }

    #[test]
    fn test_missing_brace_reports_location() {
        let tokens = Scanner::new("bad.sol", "contract C { function f( { }")
            .scan_tokens()
            .unwrap();
        let err = SolidityParser::new("bad.sol", tokens, 0).parse().unwrap_err();
        match err {
            Error::SyntaxError { file, line, .. } => {
                assert_eq!(file, "bad.sol");
                assert_eq!(line, 1);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }
}
