//! Solidity parser and arena syntax tree
//!
//! Every unit of a run is parsed into its own arena and then relocated into one
//! run-wide [`Ast`], so node ids are unique across all units and never reused.
//! A unit that fails to parse is reported in [`Program::failures`] and the rest of
//! the run continues without it.

mod ast;
#[allow(clippy::module_inception)]
mod parser;

pub use ast::{
    Ast, ContractKind, ForParts, FunctionKind, LocalVar, Node, NodeId, NodeKind, Param,
    SourceUnit, Span,
};
pub use parser::{is_elementary_type, ParsedUnit, SolidityParser};

use crate::error::{Error, Result};
use crate::lexer::Scanner;
use crate::parallel::{parallel_map, ParallelConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Source text handed to the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path used for reporting and import resolution
    pub path: String,
    /// File contents
    pub content: String,
}

impl SourceFile {
    /// Create a source file from a path and its contents
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        SourceFile {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A source unit that could not be parsed
#[derive(Debug, Clone)]
pub struct ParseFailure {
    /// Path of the failing unit
    pub path: String,
    /// Syntax error with location
    pub error: Error,
}

/// All successfully parsed units of a run, sharing one arena
#[derive(Debug, Clone)]
pub struct Program {
    /// Run-wide arena
    pub ast: Ast,
    /// Parsed units in input order
    pub units: Vec<SourceUnit>,
    /// Units that failed to parse
    pub failures: Vec<ParseFailure>,
    /// SHA-256 over every input path and content, hex encoded
    pub digest: String,
}

fn parse_unit(source: &SourceFile) -> Result<ParsedUnit> {
    let tokens = Scanner::new(&source.path, &source.content).scan_tokens()?;
    SolidityParser::new(&source.path, tokens, 0).parse()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl Program {
    /// Parse `sources` on a worker pool and merge them into one program
    ///
    /// Only pool construction can fail; syntax errors are collected per unit.
    pub fn parse(sources: &[SourceFile], config: &ParallelConfig) -> Result<Program> {
        let parsed = parallel_map(sources, parse_unit, config)?;

        let mut hasher = Sha256::new();
        for source in sources {
            hasher.update(source.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(source.content.as_bytes());
            hasher.update([0u8]);
        }

        let mut program = Program {
            ast: Ast::with_base(0),
            units: Vec::new(),
            failures: Vec::new(),
            digest: hex::encode(hasher.finalize()),
        };

        for (source, result) in sources.iter().zip(parsed) {
            match result {
                Ok(unit) => {
                    let index = program.units.len() as u32;
                    let offset = program.ast.absorb(unit.ast, index);
                    let shift = |id: NodeId| NodeId(id.0 + offset);
                    debug!(
                        path = %source.path,
                        root = %shift(unit.root),
                        declarations = unit.declarations.len(),
                        "parsed source unit"
                    );
                    program.units.push(SourceUnit {
                        path: source.path.clone(),
                        root: shift(unit.root),
                        declarations: unit.declarations.into_iter().map(shift).collect(),
                        digest: sha256_hex(source.content.as_bytes()),
                    });
                }
                Err(error) => {
                    warn!(path = %source.path, error = %error, "source unit failed to parse");
                    program.failures.push(ParseFailure {
                        path: source.path.clone(),
                        error,
                    });
                }
            }
        }
        Ok(program)
    }

    /// Parse a single in-memory source, failing if it does not parse
    pub fn from_source(path: &str, content: &str) -> Result<Program> {
        let mut program = Program::parse(
            &[SourceFile::new(path, content)],
            &ParallelConfig::sequential(),
        )?;
        match program.failures.pop() {
            Some(failure) => Err(failure.error),
            None => Ok(program),
        }
    }

    /// All contract-like declarations in id order
    pub fn contracts(&self) -> Vec<NodeId> {
        self.ast
            .iter()
            .filter(|n| n.kind.is_contract())
            .map(|n| n.id)
            .collect()
    }

    /// All function-like declarations (including modifiers) in id order
    pub fn functions(&self) -> Vec<NodeId> {
        self.ast
            .iter()
            .filter(|n| n.kind.is_function())
            .map(|n| n.id)
            .collect()
    }

    /// Contract declaration with the given name
    pub fn contract_by_name(&self, name: &str) -> Option<NodeId> {
        self.ast
            .iter()
            .find(|n| matches!(&n.kind, NodeKind::Contract { name: n2, .. } if n2 == name))
            .map(|n| n.id)
    }

    /// Path of the unit a node belongs to
    pub fn file_of(&self, id: NodeId) -> Option<&str> {
        let node = self.ast.get(id)?;
        self.units
            .get(node.span.unit as usize)
            .map(|u| u.path.as_str())
    }

    /// Declared name of a function or contract node
    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.ast.kind(id).and_then(NodeKind::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_across_units() {
        let sources = vec![
            SourceFile::new("A.sol", "contract A { function f() public {} }"),
            SourceFile::new("B.sol", "contract B { function g() public {} }"),
        ];
        let program = Program::parse(&sources, &ParallelConfig::default()).unwrap();
        assert_eq!(program.units.len(), 2);
        assert!(program.units[1].root.0 > program.units[0].root.0);
        for (index, node) in program.ast.iter().enumerate() {
            assert_eq!(node.id, NodeId(index as u32));
        }
        let b = program.contract_by_name("B").unwrap();
        assert_eq!(program.file_of(b), Some("B.sol"));
    }

    #[test]
    fn test_parse_failure_only_aborts_its_unit() {
        let sources = vec![
            SourceFile::new("Good.sol", "contract Good { uint x; }"),
            SourceFile::new("Bad.sol", "contract Bad { function ( }"),
        ];
        let program = Program::parse(&sources, &ParallelConfig::default()).unwrap();
        assert_eq!(program.units.len(), 1);
        assert_eq!(program.failures.len(), 1);
        assert_eq!(program.failures[0].path, "Bad.sol");
        assert_eq!(program.digest.len(), 64);
    }
}
