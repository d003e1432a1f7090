//! Lexical analysis for Solidity sources
//!
//! Converts source text into a stream of tokens with line/column and byte positions.

mod scanner;
mod token;

pub use scanner::Scanner;
pub use token::{Token, TokenKind};
