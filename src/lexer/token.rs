use serde::{Deserialize, Serialize};

/// A single token from the source code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The type of token
    pub kind: TokenKind,
    /// Original text of the token
    pub lexeme: String,
    /// Line number where token appears (1-indexed)
    pub line: usize,
    /// Column number where token starts (1-indexed)
    pub column: usize,
    /// Character offset of the first character
    pub start: usize,
    /// Character offset one past the last character
    pub end: usize,
}

impl Token {
    /// Creates a new token with the given properties
    pub fn new(
        kind: TokenKind,
        lexeme: String,
        line: usize,
        column: usize,
        start: usize,
        end: usize,
    ) -> Self {
        Token {
            kind,
            lexeme,
            line,
            column,
            start,
            end,
        }
    }

    /// Whether this token is the identifier or keyword `word`
    pub fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Identifier(name) if name == word)
    }
}

/// All possible token types in Solidity sources
///
/// Keywords are lexed as identifiers; the parser gives them meaning by position,
/// which keeps contextual keywords such as `emit`, `payable` or `from` usable as names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    /// Number literal (decimal, hex or scientific), kept as written
    Number(String),
    /// String literal (quotes removed, escapes resolved)
    StringLiteral(String),

    // Identifiers
    /// Identifier or keyword
    Identifier(String),

    // Operators
    /// Plus operator (+)
    Plus,
    /// Minus operator (-)
    Minus,
    /// Star operator (*)
    Star,
    /// Slash operator (/)
    Slash,
    /// Percent operator (%)
    Percent,
    /// Power operator (**)
    StarStar,
    /// Increment operator (++)
    PlusPlus,
    /// Decrement operator (--)
    MinusMinus,
    /// Equality operator (==)
    Eq,
    /// Inequality operator (!=)
    NotEq,
    /// Less than operator (<)
    Lt,
    /// Greater than operator (>)
    Gt,
    /// Less than or equal operator (<=)
    LtEq,
    /// Greater than or equal operator (>=)
    GtEq,
    /// Logical AND operator (&&)
    AndAnd,
    /// Logical OR operator (||)
    OrOr,
    /// Logical NOT operator (!)
    Not,
    /// Bitwise AND (&)
    Amp,
    /// Bitwise OR (|)
    Pipe,
    /// Bitwise XOR (^)
    Caret,
    /// Bitwise NOT (~)
    Tilde,
    /// Shift left (<<)
    Shl,
    /// Shift right (>>)
    Shr,
    /// Unsigned shift right (>>>)
    Sar,
    /// Assignment operator (=)
    Assign,
    /// Compound assignment (`+=`, `-=`, `<<=`, ...), holding the binary operator text
    CompoundAssign(String),
    /// Question mark operator (?)
    Question,
    /// Colon operator (:)
    Colon,
    /// Arrow operator (->)
    Arrow,
    /// Fat arrow operator (=>)
    FatArrow,

    // Delimiters
    /// Left parenthesis (
    LeftParen,
    /// Right parenthesis )
    RightParen,
    /// Left brace {
    LeftBrace,
    /// Right brace }
    RightBrace,
    /// Left bracket [
    LeftBracket,
    /// Right bracket ]
    RightBracket,
    /// Comma delimiter
    Comma,
    /// Dot operator
    Dot,
    /// Semicolon delimiter
    Semicolon,

    // Special
    /// End of file marker
    Eof,
}

impl TokenKind {
    /// Binary operator text and precedence (higher binds tighter)
    pub fn binary_precedence(&self) -> Option<(&'static str, u8)> {
        let entry = match self {
            TokenKind::OrOr => ("||", 1),
            TokenKind::AndAnd => ("&&", 2),
            TokenKind::Eq => ("==", 3),
            TokenKind::NotEq => ("!=", 3),
            TokenKind::Lt => ("<", 4),
            TokenKind::Gt => (">", 4),
            TokenKind::LtEq => ("<=", 4),
            TokenKind::GtEq => (">=", 4),
            TokenKind::Pipe => ("|", 5),
            TokenKind::Caret => ("^", 6),
            TokenKind::Amp => ("&", 7),
            TokenKind::Shl => ("<<", 8),
            TokenKind::Shr => (">>", 8),
            TokenKind::Sar => (">>>", 8),
            TokenKind::Plus => ("+", 9),
            TokenKind::Minus => ("-", 9),
            TokenKind::Star => ("*", 10),
            TokenKind::Slash => ("/", 10),
            TokenKind::Percent => ("%", 10),
            TokenKind::StarStar => ("**", 11),
            _ => return None,
        };
        Some(entry)
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::StringLiteral(s) => write!(f, "\"{}\"", s),
            TokenKind::Identifier(id) => write!(f, "{}", id),
            TokenKind::CompoundAssign(op) => write!(f, "{}=", op),
            TokenKind::Eof => write!(f, "end of file"),
            _ => write!(f, "{:?}", self),
        }
    }
}
