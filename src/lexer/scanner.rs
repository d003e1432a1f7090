use super::token::{Token, TokenKind};
use crate::error::{Error, Result};

/// Scanner for Solidity source text
///
/// Offsets recorded on tokens are character offsets into the source.
pub struct Scanner {
    /// File name used in error messages
    file: String,
    /// Source code as character vector
    source: Vec<char>,
    /// Accumulated tokens
    tokens: Vec<Token>,
    /// Start position of current token
    start: usize,
    /// Current position in source
    current: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// Line where the current token started
    start_line: usize,
    /// Column where the current token started
    start_column: usize,
}

impl Scanner {
    /// Creates a new scanner for `source`, reporting errors against `file`
    pub fn new(file: impl Into<String>, source: &str) -> Self {
        Scanner {
            file: file.into(),
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
        }
    }

    /// Scans all tokens from source code and returns them as a vector
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            String::new(),
            self.line,
            self.column,
            self.current,
            self.current,
        ));

        Ok(std::mem::take(&mut self.tokens))
    }

    fn scan_token(&mut self) -> Result<()> {
        let c = self.advance();

        match c {
            ' ' | '\r' | '\t' | '\n' => {}

            '/' => {
                if self.match_char('/') {
                    self.skip_line_comment();
                } else if self.match_char('*') {
                    self.skip_block_comment()?;
                } else if self.match_char('=') {
                    self.add_token(TokenKind::CompoundAssign("/".into()));
                } else {
                    self.add_token(TokenKind::Slash);
                }
            }

            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            '?' => self.add_token(TokenKind::Question),
            ':' => self.add_token(TokenKind::Colon),
            '~' => self.add_token(TokenKind::Tilde),

            '.' => {
                if self.peek().is_ascii_digit() {
                    self.scan_number()?;
                } else {
                    self.add_token(TokenKind::Dot);
                }
            }

            '+' => {
                if self.match_char('+') {
                    self.add_token(TokenKind::PlusPlus);
                } else if self.match_char('=') {
                    self.add_token(TokenKind::CompoundAssign("+".into()));
                } else {
                    self.add_token(TokenKind::Plus);
                }
            }
            '-' => {
                if self.match_char('-') {
                    self.add_token(TokenKind::MinusMinus);
                } else if self.match_char('=') {
                    self.add_token(TokenKind::CompoundAssign("-".into()));
                } else if self.match_char('>') {
                    self.add_token(TokenKind::Arrow);
                } else {
                    self.add_token(TokenKind::Minus);
                }
            }
            '*' => {
                if self.match_char('*') {
                    self.add_token(TokenKind::StarStar);
                } else if self.match_char('=') {
                    self.add_token(TokenKind::CompoundAssign("*".into()));
                } else {
                    self.add_token(TokenKind::Star);
                }
            }
            '%' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::CompoundAssign("%".into()));
                } else {
                    self.add_token(TokenKind::Percent);
                }
            }

            '=' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::Eq);
                } else if self.match_char('>') {
                    self.add_token(TokenKind::FatArrow);
                } else {
                    self.add_token(TokenKind::Assign);
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::NotEq);
                } else {
                    self.add_token(TokenKind::Not);
                }
            }
            '<' => {
                if self.match_char('<') {
                    if self.match_char('=') {
                        self.add_token(TokenKind::CompoundAssign("<<".into()));
                    } else {
                        self.add_token(TokenKind::Shl);
                    }
                } else if self.match_char('=') {
                    self.add_token(TokenKind::LtEq);
                } else {
                    self.add_token(TokenKind::Lt);
                }
            }
            '>' => {
                if self.match_char('>') {
                    if self.match_char('>') {
                        if self.match_char('=') {
                            self.add_token(TokenKind::CompoundAssign(">>>".into()));
                        } else {
                            self.add_token(TokenKind::Sar);
                        }
                    } else if self.match_char('=') {
                        self.add_token(TokenKind::CompoundAssign(">>".into()));
                    } else {
                        self.add_token(TokenKind::Shr);
                    }
                } else if self.match_char('=') {
                    self.add_token(TokenKind::GtEq);
                } else {
                    self.add_token(TokenKind::Gt);
                }
            }
            '&' => {
                if self.match_char('&') {
                    self.add_token(TokenKind::AndAnd);
                } else if self.match_char('=') {
                    self.add_token(TokenKind::CompoundAssign("&".into()));
                } else {
                    self.add_token(TokenKind::Amp);
                }
            }
            '|' => {
                if self.match_char('|') {
                    self.add_token(TokenKind::OrOr);
                } else if self.match_char('=') {
                    self.add_token(TokenKind::CompoundAssign("|".into()));
                } else {
                    self.add_token(TokenKind::Pipe);
                }
            }
            '^' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::CompoundAssign("^".into()));
                } else {
                    self.add_token(TokenKind::Caret);
                }
            }

            '"' | '\'' => self.scan_string(c)?,

            c if c.is_ascii_digit() => self.scan_number()?,

            c if c.is_alphabetic() || c == '_' || c == '$' => self.scan_identifier(),

            _ => {
                return Err(self.error(format!("Unexpected character '{}'", c)));
            }
        }

        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        while !self.is_at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(self.error("Unterminated block comment"))
    }

    fn scan_string(&mut self, quote: char) -> Result<()> {
        let mut value = String::new();

        while !self.is_at_end() && self.peek() != quote {
            if self.peek() == '\\' {
                self.advance();
                let escaped = self.advance();
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    '\'' => value.push('\''),
                    '\n' => {}
                    // \xNN and \uNNNN are kept verbatim
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
            } else if self.peek() == '\n' {
                return Err(self.error("Unterminated string literal"));
            } else {
                value.push(self.advance());
            }
        }

        if self.is_at_end() {
            return Err(self.error("Unterminated string literal"));
        }

        self.advance(); // closing quote

        self.add_token(TokenKind::StringLiteral(value));
        Ok(())
    }

    fn scan_number(&mut self) -> Result<()> {
        let first = self.source[self.start];
        if first == '0' && matches!(self.peek(), 'x' | 'X') {
            self.advance();
            while self.peek().is_ascii_hexdigit() || self.peek() == '_' {
                self.advance();
            }
        } else {
            while self.peek().is_ascii_digit() || self.peek() == '_' {
                self.advance();
            }
            if self.peek() == '.' && self.peek_next().is_ascii_digit() {
                self.advance();
                while self.peek().is_ascii_digit() || self.peek() == '_' {
                    self.advance();
                }
            }
            if matches!(self.peek(), 'e' | 'E')
                && (self.peek_next().is_ascii_digit() || self.peek_next() == '-')
            {
                self.advance();
                if self.peek() == '-' {
                    self.advance();
                }
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        if self.peek().is_alphabetic() {
            return Err(self.error(format!(
                "Invalid number literal '{}{}'",
                self.current_text(),
                self.peek()
            )));
        }

        let text = self.current_text();
        self.add_token(TokenKind::Number(text));
        Ok(())
    }

    fn scan_identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' || self.peek() == '$' {
            self.advance();
        }

        let text = self.current_text();
        self.add_token(TokenKind::Identifier(text));
    }

    fn current_text(&self) -> String {
        self.source[self.start..self.current].iter().collect()
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::SyntaxError {
            file: self.file.clone(),
            line: self.start_line,
            col: self.start_column,
            message: message.into(),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.source[self.current]
        }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.source.len() {
            '\0'
        } else {
            self.source[self.current + 1]
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            false
        } else {
            self.advance();
            true
        }
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme = self.current_text();
        self.tokens.push(Token::new(
            kind,
            lexeme,
            self.start_line,
            self.start_column,
            self.start,
            self.current,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new("test.sol", source);
        scanner
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_statement() {
        let tokens = kinds("x += 1;");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::CompoundAssign("+".into()),
                TokenKind::Number("1".into()),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = kinds("// line\n/* block\n comment */ a");
        assert_eq!(tokens[0], TokenKind::Identifier("a".into()));
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_positions_track_lines() {
        let mut scanner = Scanner::new("test.sol", "a\n  bb");
        let tokens = scanner.scan_tokens().unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
        assert_eq!((tokens[1].start, tokens[1].end), (4, 6));
    }

    #[test]
    fn test_shift_and_arrow_operators() {
        let tokens = kinds("a >>= b => c >>> d");
        assert_eq!(tokens[1], TokenKind::CompoundAssign(">>".into()));
        assert_eq!(tokens[3], TokenKind::FatArrow);
        assert_eq!(tokens[5], TokenKind::Sar);
    }

    #[test]
    fn test_hex_and_single_quoted_strings() {
        let tokens = kinds("0xdeadBEEF 'abc' 1e18");
        assert_eq!(tokens[0], TokenKind::Number("0xdeadBEEF".into()));
        assert_eq!(tokens[1], TokenKind::StringLiteral("abc".into()));
        assert_eq!(tokens[2], TokenKind::Number("1e18".into()));
    }

    #[test]
    fn test_unterminated_string_reports_location() {
        let mut scanner = Scanner::new("bad.sol", "x = \"oops");
        let err = scanner.scan_tokens().unwrap_err();
        match err {
            Error::SyntaxError { file, line, col, .. } => {
                assert_eq!(file, "bad.sol");
                assert_eq!((line, col), (1, 5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
