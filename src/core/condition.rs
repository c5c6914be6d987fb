//! Step condition expressions
//!
//! Conditions are parsed once per step definition into an immutable
//! [`Condition`] tree and evaluated against any [`VariableLookup`]. Both the
//! symbolic (`&&`, `||`, `!`) and keyword (`and`, `or`, `not`) spellings are
//! accepted, as are `a starts-with b` and `startsWith(a, b)`.

use crate::core::error::{EvalError, ParseError};
use std::fmt;

/// Resolves variable references during evaluation.
///
/// Returns `None` when the name is not bound at all and `Some(None)` when it
/// is bound to null.
pub trait VariableLookup {
    fn lookup(&self, name: &str) -> Option<Option<&str>>;
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Variable reference, e.g. `target`, `matrix.os`, `env.CI`
    Var(String),
    /// String literal
    Str(String),
}

/// Parsed condition tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Literal(bool),
    /// Bare operand used as a boolean
    Truthy(Operand),
    Equals(Operand, Operand),
    StartsWith(Operand, Operand),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Parse condition text
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Parser { tokens, position: 0 };
        let condition = parser.parse_or()?;
        match parser.peek() {
            Token::Eof => Ok(condition),
            other => Err(parser.error(format!("unexpected token {}", other))),
        }
    }

    /// Evaluate against resolved variables. Side-effect free.
    pub fn evaluate(&self, vars: &dyn VariableLookup) -> Result<bool, EvalError> {
        match self {
            Condition::Literal(value) => Ok(*value),
            Condition::Truthy(operand) => Ok(match resolve(operand, vars)? {
                Some(value) => !value.is_empty() && value != "false" && value != "0",
                None => false,
            }),
            Condition::Equals(left, right) => {
                let left = resolve(left, vars)?;
                let right = resolve(right, vars)?;
                Ok(matches!((left, right), (Some(l), Some(r)) if l == r))
            }
            Condition::StartsWith(subject, prefix) => {
                let subject = resolve(subject, vars)?;
                let prefix = resolve(prefix, vars)?;
                Ok(matches!((subject, prefix), (Some(s), Some(p)) if s.starts_with(p)))
            }
            Condition::Not(inner) => Ok(!inner.evaluate(vars)?),
            // Both sides are evaluated so an undefined reference is reported
            // regardless of short-circuiting
            Condition::And(left, right) => {
                let left = left.evaluate(vars)?;
                let right = right.evaluate(vars)?;
                Ok(left && right)
            }
            Condition::Or(left, right) => {
                let left = left.evaluate(vars)?;
                let right = right.evaluate(vars)?;
                Ok(left || right)
            }
        }
    }

    /// Names of every variable the condition references
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut Vec<&'a str>) {
        fn push<'a>(operand: &'a Operand, names: &mut Vec<&'a str>) {
            if let Operand::Var(name) = operand {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
        }
        match self {
            Condition::Literal(_) => {}
            Condition::Truthy(op) => push(op, names),
            Condition::Equals(l, r) | Condition::StartsWith(l, r) => {
                push(l, names);
                push(r, names);
            }
            Condition::Not(inner) => inner.collect_variables(names),
            Condition::And(l, r) | Condition::Or(l, r) => {
                l.collect_variables(names);
                r.collect_variables(names);
            }
        }
    }
}

fn resolve<'a>(operand: &'a Operand, vars: &'a dyn VariableLookup) -> Result<Option<&'a str>, EvalError> {
    match operand {
        Operand::Str(value) => Ok(Some(value.as_str())),
        Operand::Var(name) => vars
            .lookup(name)
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(name) => write!(f, "{}", name),
            Operand::Str(value) => write!(f, "'{}'", value),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Literal(value) => write!(f, "{}", value),
            Condition::Truthy(op) => write!(f, "{}", op),
            Condition::Equals(l, r) => write!(f, "{} == {}", l, r),
            Condition::StartsWith(l, r) => write!(f, "{} starts-with {}", l, r),
            Condition::Not(inner) => write!(f, "!({})", inner),
            Condition::And(l, r) => write!(f, "({} && {})", l, r),
            Condition::Or(l, r) => write!(f, "({} || {})", l, r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Eq,
    Ne,
    StartsWith,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
    True,
    False,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "'{}'", name),
            Token::Str(value) => write!(f, "string '{}'", value),
            Token::Eq => write!(f, "'=='"),
            Token::Ne => write!(f, "'!='"),
            Token::StartsWith => write!(f, "'starts-with'"),
            Token::And => write!(f, "'&&'"),
            Token::Or => write!(f, "'||'"),
            Token::Not => write!(f, "'!'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
            Token::True => write!(f, "'true'"),
            Token::False => write!(f, "'false'"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            len: input.len(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<(Token, usize)>, ParseError> {
        let mut tokens = Vec::new();

        while let Some(&(pos, ch)) = self.chars.peek() {
            let token = match ch {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                ',' => self.single(Token::Comma),
                '\'' | '"' => self.string(ch, pos)?,
                '=' => self.pair('=', Token::Eq, pos)?,
                '&' => self.pair('&', Token::And, pos)?,
                '|' => self.pair('|', Token::Or, pos)?,
                '!' => {
                    self.chars.next();
                    if matches!(self.chars.peek(), Some((_, '='))) {
                        self.chars.next();
                        Token::Ne
                    } else {
                        Token::Not
                    }
                }
                c if c.is_alphanumeric() || c == '_' => self.word(),
                other => {
                    return Err(ParseError {
                        message: format!("unexpected character '{}'", other),
                        position: pos,
                    })
                }
            };
            tokens.push((token, pos));
        }

        tokens.push((Token::Eof, self.len));
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn pair(&mut self, second: char, token: Token, pos: usize) -> Result<Token, ParseError> {
        self.chars.next();
        match self.chars.next() {
            Some((_, c)) if c == second => Ok(token),
            _ => Err(ParseError {
                message: format!("expected '{}{}'", second, second),
                position: pos,
            }),
        }
    }

    fn string(&mut self, quote: char, pos: usize) -> Result<Token, ParseError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                // Doubled quote is an escaped quote: 'it''s'
                Some((_, c)) if c == quote => {
                    if matches!(self.chars.peek(), Some((_, c)) if *c == quote) {
                        self.chars.next();
                        value.push(quote);
                    } else {
                        return Ok(Token::Str(value));
                    }
                }
                Some((_, c)) => value.push(c),
                None => {
                    return Err(ParseError {
                        message: "unterminated string".to_string(),
                        position: pos,
                    })
                }
            }
        }
    }

    /// Identifiers may contain dots and dashes: `matrix.os`, `starts-with`
    fn word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        match word.as_str() {
            "and" | "AND" => Token::And,
            "or" | "OR" => Token::Or,
            "not" | "NOT" => Token::Not,
            "true" => Token::True,
            "false" => Token::False,
            "starts-with" | "STARTS-WITH" | "starts_with" => Token::StartsWith,
            _ => Token::Ident(word),
        }
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.position].0
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.position].0.clone();
        if token != Token::Eof {
            self.position += 1;
        }
        token
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.tokens[self.position].1,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", expected, self.peek())))
        }
    }

    fn parse_or(&mut self) -> Result<Condition, ParseError> {
        let mut left = self.parse_and()?;
        while *self.peek() == Token::Or {
            self.advance();
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, ParseError> {
        let mut left = self.parse_unary()?;
        while *self.peek() == Token::And {
            self.advance();
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition, ParseError> {
        if *self.peek() == Token::Not {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, ParseError> {
        match self.peek().clone() {
            Token::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::True => {
                self.advance();
                Ok(Condition::Literal(true))
            }
            Token::False => {
                self.advance();
                Ok(Condition::Literal(false))
            }
            Token::Ident(name) if name == "startsWith" && self.next_is(Token::LParen) => {
                self.advance();
                self.expect(Token::LParen)?;
                let subject = self.parse_operand()?;
                self.expect(Token::Comma)?;
                let prefix = self.parse_operand()?;
                self.expect(Token::RParen)?;
                Ok(Condition::StartsWith(subject, prefix))
            }
            _ => {
                let left = self.parse_operand()?;
                match self.peek() {
                    Token::Eq => {
                        self.advance();
                        Ok(Condition::Equals(left, self.parse_operand()?))
                    }
                    Token::Ne => {
                        self.advance();
                        let right = self.parse_operand()?;
                        Ok(Condition::Not(Box::new(Condition::Equals(left, right))))
                    }
                    Token::StartsWith => {
                        self.advance();
                        Ok(Condition::StartsWith(left, self.parse_operand()?))
                    }
                    _ => Ok(Condition::Truthy(left)),
                }
            }
        }
    }

    fn next_is(&self, token: Token) -> bool {
        self.tokens
            .get(self.position + 1)
            .is_some_and(|(next, _)| *next == token)
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(Operand::Var(name))
            }
            Token::Str(value) => {
                self.advance();
                Ok(Operand::Str(value))
            }
            other => Err(self.error(format!("expected a variable or string, found {}", other))),
        }
    }
}
