//! Formula tokenizer
//!
//! Converts formula strings like "=SUM(Sheet2!A1:A5) * 1.1" into a sequence of
//! tokens. The optimizer rewrites token streams and renders them back to text,
//! so every token knows how to print itself.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, 1.5e10)
    Number(f64),
    /// A string literal ("hello")
    Text(String),
    /// Function name, cell reference (A1, $B$2), boolean or defined name
    Identifier(String),
    /// Sheet qualifier preceding a reference (the `Sheet2` in `Sheet2!A1`)
    SheetPrefix(String),
    /// Error literal (#DIV/0!, #N/A, ...)
    ErrorLiteral(String),
    /// Binary/comparison/concatenation/percent operators
    Operator(String),
    OpenParen,
    CloseParen,
    /// Argument separator
    Comma,
    /// Range separator (A1:B2)
    Colon,
}

impl Token {
    /// True for tokens that can end an operand (a value on the left of a binary operator)
    pub fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Number(_)
                | Token::Text(_)
                | Token::Identifier(_)
                | Token::ErrorLiteral(_)
                | Token::CloseParen
        ) || matches!(self, Token::Operator(op) if op == "%")
    }

    pub fn is_operator(&self, op: &str) -> bool {
        matches!(self, Token::Operator(s) if s == op)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", crate::types::format_number(*n)),
            Token::Text(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Token::Identifier(s) | Token::ErrorLiteral(s) | Token::Operator(s) => f.write_str(s),
            Token::SheetPrefix(name) => {
                if name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
                    write!(f, "{name}!")
                } else {
                    write!(f, "'{}'!", name.replace('\'', "''"))
                }
            }
            Token::OpenParen => f.write_str("("),
            Token::CloseParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::Colon => f.write_str(":"),
        }
    }
}

/// Known error literals, longest first so "#N/A" does not shadow nothing
pub const ERROR_LITERALS: [&str; 8] = [
    "#DIV/0!", "#VALUE!", "#REF!", "#NAME?", "#NUM!", "#N/A", "#NULL!", "#CYCLE!",
];

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer for the given formula string
    pub fn new(formula: &'a str) -> Self {
        let formula = formula.trim_start();
        let formula = formula.strip_prefix('=').unwrap_or(formula);
        Self {
            chars: formula.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire formula into a vector of tokens
    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            '"' => self.read_string()?,
            '\'' => self.read_quoted_sheet()?,
            '#' => self.read_error_literal()?,
            '(' => {
                self.advance();
                Token::OpenParen
            }
            ')' => {
                self.advance();
                Token::CloseParen
            }
            ',' | ';' => {
                self.advance();
                Token::Comma
            }
            ':' => {
                self.advance();
                Token::Colon
            }
            '+' | '-' | '*' | '/' | '^' | '&' | '%' | '=' => {
                self.advance();
                Token::Operator(c.to_string())
            }
            '<' => self.read_less_than_operator(),
            '>' => self.read_greater_than_operator(),
            c if c.is_ascii_digit() || c == '.' => self.read_number()?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_identifier(),
            c => {
                return Err(TokenizeError::new(
                    format!("Unexpected character: '{c}'"),
                    self.position,
                ));
            }
        };
        Ok(Some(token))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    /// Read a double-quoted string literal; "" inside is an escaped quote
    fn read_string(&mut self) -> Result<Token, TokenizeError> {
        Ok(Token::Text(self.read_quoted('"')?))
    }

    /// Read 'My Sheet'! as a sheet prefix
    fn read_quoted_sheet(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let name = self.read_quoted('\'')?;
        if self.peek() == Some('!') {
            self.advance();
            Ok(Token::SheetPrefix(name))
        } else {
            Err(TokenizeError::new(
                "Quoted name must be followed by '!'",
                start_pos,
            ))
        }
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, TokenizeError> {
        self.advance(); // opening quote
        let start_pos = self.position;
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(TokenizeError::new("Unterminated string literal", start_pos));
                }
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        value.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => value.push(c),
            }
        }

        Ok(value)
    }

    fn read_error_literal(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let mut literal = String::new();
        while let Some(c) = self.peek() {
            literal.push(c);
            self.advance();
            let upper = literal.to_ascii_uppercase();
            if let Some(known) = ERROR_LITERALS.iter().find(|e| **e == upper) {
                return Ok(Token::ErrorLiteral((*known).to_string()));
            }
            if literal.len() >= 8 {
                break;
            }
        }
        Err(TokenizeError::new(
            format!("Unknown error literal: {literal}"),
            start_pos,
        ))
    }

    /// Read a number (integer, decimal, or scientific notation)
    fn read_number(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let mut num_str = String::new();

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                num_str.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if let Some(c @ ('e' | 'E')) = self.peek() {
            num_str.push(c);
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                num_str.push(sign);
                self.advance();
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    num_str.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("Invalid number: {num_str}"), start_pos))
    }

    /// Read an identifier; a trailing '!' turns it into a sheet prefix
    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if self.peek() == Some('!') {
            self.advance();
            return Token::SheetPrefix(ident);
        }
        Token::Identifier(ident)
    }

    fn read_less_than_operator(&mut self) -> Token {
        self.advance(); // consume '<'
        match self.peek() {
            Some('=') => {
                self.advance();
                Token::Operator("<=".to_string())
            }
            Some('>') => {
                self.advance();
                Token::Operator("<>".to_string())
            }
            _ => Token::Operator("<".to_string()),
        }
    }

    fn read_greater_than_operator(&mut self) -> Token {
        self.advance(); // consume '>'
        match self.peek() {
            Some('=') => {
                self.advance();
                Token::Operator(">=".to_string())
            }
            _ => Token::Operator(">".to_string()),
        }
    }
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(formula).tokenize()
}

/// Render tokens back to formula text (without the leading '=')
pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(Token::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> Token {
        Token::Identifier(s.to_string())
    }

    fn op(s: &str) -> Token {
        Token::Operator(s.to_string())
    }

    #[test]
    fn test_tokenize_cell_arithmetic() {
        let tokens = tokenize("=A1+$B$2*3").unwrap();
        assert_eq!(
            tokens,
            vec![ident("A1"), op("+"), ident("$B$2"), op("*"), Token::Number(3.0)]
        );
    }

    #[test]
    fn test_tokenize_sheet_prefixes() {
        let tokens = tokenize("Data!A1+'My Sheet'!B2").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::SheetPrefix("Data".to_string()),
                ident("A1"),
                op("+"),
                Token::SheetPrefix("My Sheet".to_string()),
                ident("B2"),
            ]
        );
    }

    #[test]
    fn test_tokenize_range_and_function() {
        let tokens = tokenize("SUM(A1:A10)").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("SUM"),
                Token::OpenParen,
                ident("A1"),
                Token::Colon,
                ident("A10"),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_error_literals() {
        let tokens = tokenize("IFERROR(#DIV/0!, #n/a)").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("IFERROR"),
                Token::OpenParen,
                Token::ErrorLiteral("#DIV/0!".to_string()),
                Token::Comma,
                Token::ErrorLiteral("#N/A".to_string()),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_string_with_operator_text() {
        let tokens = tokenize("\"a+0\"&B1").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Text("a+0".to_string()), op("&"), ident("B1")]
        );
    }

    #[test]
    fn test_tokenize_comparison_operators() {
        let tokens = tokenize("a = b <= c <> d >= e").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("a"),
                op("="),
                ident("b"),
                op("<="),
                ident("c"),
                op("<>"),
                ident("d"),
                op(">="),
                ident("e"),
            ]
        );
    }

    #[test]
    fn test_tokenize_scientific_notation() {
        assert_eq!(tokenize("1.5e10").unwrap(), vec![Token::Number(1.5e10)]);
        assert_eq!(tokenize("2E-5").unwrap(), vec![Token::Number(2e-5)]);
    }

    #[test]
    fn test_render_round_trips_quotes() {
        let tokens = tokenize("'Q1 ''24'!A1&\"say \"\"hi\"\"\"").unwrap();
        assert_eq!(render(&tokens), "'Q1 ''24'!A1&\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(tokenize("\"open").unwrap_err().message.contains("Unterminated"));
        assert!(tokenize("A1 @ B1").unwrap_err().message.contains("Unexpected"));
        assert!(tokenize("#BOGUS").unwrap_err().message.contains("Unknown error"));
    }
}
