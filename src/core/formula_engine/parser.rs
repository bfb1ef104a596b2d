//! Formula parser
//!
//! Converts a sequence of tokens into an Abstract Syntax Tree (AST).
//! Uses recursive descent parsing with spreadsheet operator precedence:
//! comparison < concatenation < additive < multiplicative < power < negation < percent.

use super::tokenizer::Token;
use crate::core::address::{column_index, CellAddress, MAX_ROW};

/// Deepest nesting of parentheses, function calls and prefix signs
pub const MAX_NESTING: usize = 100;

/// Longest formula accepted, in characters (the spreadsheet limit)
pub const MAX_FORMULA_LEN: usize = 8192;

/// The cells a reference covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    Cell(CellAddress),
    /// Inclusive rectangle, normalized so start is the top-left corner
    Range { start: CellAddress, end: CellAddress },
}

impl RefTarget {
    pub fn bounds(&self) -> (CellAddress, CellAddress) {
        match self {
            RefTarget::Cell(a) => (*a, *a),
            RefTarget::Range { start, end } => (*start, *end),
        }
    }

    /// Whole-column references like A:A or B:D
    pub fn is_whole_column(&self) -> bool {
        matches!(self, RefTarget::Range { start, end } if start.row == 1 && end.row == MAX_ROW)
    }
}

/// A cell or range reference, optionally qualified with a sheet name
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub sheet: Option<String>,
    pub target: RefTarget,
}

/// Abstract Syntax Tree node for formula expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Error literal written into the formula (#N/A, ...)
    Error(String),
    Reference(Reference),
    /// Identifier that is neither a reference nor a function (defined names)
    Name(String),
    /// Function call: NAME(arg1, arg2, ...)
    FunctionCall { name: String, args: Vec<Expr> },
    /// Binary operation: left op right
    BinaryOp {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Prefix operation: -expr or +expr
    UnaryOp { op: String, operand: Box<Expr> },
    /// Postfix percent: expr%
    Percent(Box<Expr>),
}

impl Expr {
    /// Visit every reference in the expression tree, left to right
    pub fn for_each_reference<'a>(&'a self, visit: &mut impl FnMut(&'a Reference)) {
        // Long operator chains nest deeply on the left; walk them with a stack
        let mut pending = vec![self];
        while let Some(expr) = pending.pop() {
            match expr {
                Expr::Reference(reference) => visit(reference),
                Expr::FunctionCall { args, .. } => pending.extend(args.iter().rev()),
                Expr::BinaryOp { left, right, .. } => {
                    pending.push(right);
                    pending.push(left);
                }
                Expr::UnaryOp { operand, .. } | Expr::Percent(operand) => pending.push(operand),
                Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Error(_) | Expr::Name(_) => {}
            }
        }
    }
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parser for formula tokens
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    /// Create a new parser for the given tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    /// Parse the tokens into an AST
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty expression", 0));
        }
        let expr = self.expression()?;

        if !self.is_at_end() {
            return Err(ParseError::new(
                format!("Unexpected token after expression: {:?}", self.peek()),
                self.position,
            ));
        }

        Ok(expr)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Check if current token matches and consume it
    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Check if current token is any of the given operators
    fn match_any_operator(&mut self, ops: &[&str]) -> Option<String> {
        if let Some(Token::Operator(s)) = self.peek() {
            if ops.contains(&s.as_str()) {
                let op = s.clone();
                self.advance();
                return Some(op);
            }
        }
        None
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.comparison()
    }

    /// Run a parse step one nesting level down
    fn nested<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                format!("Formula nests deeper than {MAX_NESTING} levels"),
                self.position,
            ));
        }
        self.depth += 1;
        let result = step(self);
        self.depth -= 1;
        result
    }

    /// Comparison: concat (( "=" | "<>" | "<" | ">" | "<=" | ">=" ) concat)*
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.concat()?;

        while let Some(op) = self.match_any_operator(&["=", "<>", "<", ">", "<=", ">="]) {
            let right = self.concat()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    /// Concat: term ( "&" term )*
    fn concat(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;

        while let Some(op) = self.match_any_operator(&["&"]) {
            let right = self.term()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    /// Term: factor (( "+" | "-" ) factor)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;

        while let Some(op) = self.match_any_operator(&["+", "-"]) {
            let right = self.factor()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    /// Factor: power (( "*" | "/" ) power)*
    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.power()?;

        while let Some(op) = self.match_any_operator(&["*", "/"]) {
            let right = self.power()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    /// Power: unary ( "^" unary )*   (left-associative, as spreadsheets evaluate it)
    fn power(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;

        while let Some(op) = self.match_any_operator(&["^"]) {
            let right = self.unary()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    /// Unary: ( "-" | "+" ) unary | postfix
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(op) = self.match_any_operator(&["-", "+"]) {
            let operand = self.nested(Self::unary)?;
            Ok(Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            })
        } else {
            self.postfix()
        }
    }

    /// Postfix: primary "%"*
    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        while self.match_any_operator(&["%"]).is_some() {
            expr = Expr::Percent(Box::new(expr));
        }
        Ok(expr)
    }

    /// Arguments: ( expr ( "," expr )* )?
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();

        if let Some(Token::CloseParen) = self.peek() {
            return Ok(args);
        }

        args.push(self.expression()?);
        while self.match_token(&Token::Comma) {
            args.push(self.expression()?);
        }

        Ok(args)
    }

    /// Primary: NUMBER | STRING | ERROR | [SHEET!] REFERENCE | NAME "(" args ")" | "(" expr ")"
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.position;
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::ErrorLiteral(e)) => Ok(Expr::Error(e)),
            Some(Token::SheetPrefix(sheet)) => match self.advance() {
                Some(Token::Identifier(name)) => self
                    .reference(Some(sheet), &name)
                    .ok_or_else(|| ParseError::new(format!("Invalid reference: {name}"), start)),
                _ => Err(ParseError::new(
                    "Expected a cell reference after sheet name",
                    self.position,
                )),
            },
            Some(Token::Identifier(name)) => {
                if self.match_token(&Token::OpenParen) {
                    let args = self.nested(Self::arguments)?;
                    if !self.match_token(&Token::CloseParen) {
                        return Err(ParseError::new(
                            "Expected ')' after function arguments",
                            self.position,
                        ));
                    }
                    return Ok(Expr::FunctionCall { name, args });
                }
                if name.eq_ignore_ascii_case("TRUE") {
                    return Ok(Expr::Boolean(true));
                }
                if name.eq_ignore_ascii_case("FALSE") {
                    return Ok(Expr::Boolean(false));
                }
                Ok(self
                    .reference(None, &name)
                    .unwrap_or(Expr::Name(name)))
            }
            Some(Token::OpenParen) => {
                let expr = self.nested(Self::expression)?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(ParseError::new(
                        "Expected ')' after expression",
                        self.position,
                    ));
                }
                Ok(expr)
            }
            Some(token) => Err(ParseError::new(
                format!("Unexpected token: {token:?}"),
                start,
            )),
            None => Err(ParseError::new("Unexpected end of expression", start)),
        }
    }

    /// A1, A1:B2 or A:C, with the colon part consumed here
    fn reference(&mut self, sheet: Option<String>, first: &str) -> Option<Expr> {
        let first_cell = CellAddress::parse(first);
        let first_column = column_only(first);
        if first_cell.is_none() && first_column.is_none() {
            return None;
        }

        let second = match (self.peek(), self.tokens.get(self.position + 1)) {
            (Some(Token::Colon), Some(Token::Identifier(second))) => second.clone(),
            _ => {
                return first_cell.map(|cell| {
                    Expr::Reference(Reference {
                        sheet,
                        target: RefTarget::Cell(cell),
                    })
                });
            }
        };

        let target = match (first_cell, CellAddress::parse(&second)) {
            (Some(a), Some(b)) => range(a, b),
            _ => match (first_column, column_only(&second)) {
                (Some(a), Some(b)) => {
                    range(CellAddress::new(1, a), CellAddress::new(MAX_ROW, b))
                }
                _ => return None,
            },
        };
        self.position += 2;
        Some(Expr::Reference(Reference { sheet, target }))
    }
}

fn binary(op: String, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn range(a: CellAddress, b: CellAddress) -> RefTarget {
    RefTarget::Range {
        start: CellAddress::new(a.row.min(b.row), a.col.min(b.col)),
        end: CellAddress::new(a.row.max(b.row), a.col.max(b.col)),
    }
}

/// Column-only identifier ("A", "$XFD") as used in whole-column ranges
fn column_only(text: &str) -> Option<u32> {
    let letters = text.strip_prefix('$').unwrap_or(text);
    if letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    column_index(letters).filter(|col| *col <= crate::core::address::MAX_COL)
}

/// Convenience function to parse tokens into an AST
pub fn parse(tokens: Vec<Token>) -> Result<Expr, ParseError> {
    Parser::new(tokens).parse()
}

/// Tokenize and parse formula text in one step
pub fn parse_formula(formula: &str) -> Result<Expr, ParseError> {
    if formula.chars().count() > MAX_FORMULA_LEN {
        return Err(ParseError::new(
            format!("Formula is longer than {MAX_FORMULA_LEN} characters"),
            MAX_FORMULA_LEN,
        ));
    }
    let tokens =
        super::tokenizer::tokenize(formula).map_err(|e| ParseError::new(e.message, e.position))?;
    parse(tokens)
}
