use crate::error::{Result, SiteDbError};
use serde::Serialize;
use std::fmt;

/// A literal operand in a query expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    String(String),
    Integer(i64),
    Boolean(bool),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Integer(i) => write!(f, "{i}"),
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

/// One filter condition. Conditions in a query are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Condition {
    Compare {
        field: String,
        op: ComparisonOp,
        value: Literal,
    },
    In {
        field: String,
        values: Vec<Literal>,
    },
    /// Membership of a key in a many-to-many or one-to-many relation.
    Contains { field: String, value: Literal },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderKey {
    pub field: String,
    pub descending: bool,
}

/// What a query returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Terminal {
    All,
    First,
    Get(Literal),
    Count,
    Exists,
    Min(String),
    Max(String),
}

/// A parsed query over one model's rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub model: String,
    pub filters: Vec<Condition>,
    pub order: Vec<OrderKey>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub terminal: Terminal,
}

impl Query {
    /// Start a query returning every row of `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Query {
            model: model.into(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            terminal: Terminal::All,
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order.push(OrderKey {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn terminal(mut self, terminal: Terminal) -> Self {
        self.terminal = terminal;
        self
    }

    /// Parse a query expression such as
    /// `Post.filter(draft == false).order_by(-published).limit(5).all()`.
    pub fn parse(input: &str) -> Result<Query> {
        let tokens = tokenize(input)?;
        Parser { tokens, pos: 0 }.query()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Op(ComparisonOp),
    Dot,
    Comma,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Int(i) => write!(f, "{i}"),
            Token::Op(op) => write!(f, "'{}'", op_text(*op)),
            Token::Dot => f.write_str("'.'"),
            Token::Comma => f.write_str("','"),
            Token::Minus => f.write_str("'-'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::End => f.write_str("end of input"),
        }
    }
}

fn op_text(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "==",
        other => other.sql(),
    }
}

fn error(message: impl Into<String>) -> SiteDbError {
    SiteDbError::Query(message.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, len) = match (c, next) {
                    ('=', Some('=')) => (ComparisonOp::Eq, 2),
                    ('!', Some('=')) => (ComparisonOp::Ne, 2),
                    ('<', Some('=')) => (ComparisonOp::Le, 2),
                    ('>', Some('=')) => (ComparisonOp::Ge, 2),
                    ('<', _) => (ComparisonOp::Lt, 1),
                    ('>', _) => (ComparisonOp::Gt, 1),
                    _ => return Err(error(format!("Unexpected '{c}' at position {i}"))),
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            '"' | '\'' => {
                let (text, end) = read_string(&chars, i)?;
                tokens.push(Token::Str(text));
                i = end;
            }
            '-' if chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                let (value, end) = read_integer(&chars, i + 1, true)?;
                tokens.push(Token::Int(value));
                i = end;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let (value, end) = read_integer(&chars, i, false)?;
                tokens.push(Token::Int(value));
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(error(format!("Unexpected '{other}' at position {i}"))),
        }
    }

    tokens.push(Token::End);
    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| error("Unterminated string literal"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(error("Unterminated string literal"))
}

fn read_integer(chars: &[char], start: usize, negative: bool) -> Result<(i64, usize)> {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    let digits: String = chars[start..end].iter().collect();
    let text = if negative { format!("-{digits}") } else { digits };
    let value = text
        .parse::<i64>()
        .map_err(|_| error(format!("Integer out of range: {text}")))?;
    Ok((value, end))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    // The token list always ends with `End`, which is never consumed.
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let token = self.next();
        if token == expected {
            Ok(())
        } else {
            Err(error(format!("Expected {expected}, found {token}")))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String> {
        match self.next() {
            Token::Ident(name) => Ok(name),
            other => Err(error(format!("Expected {what}, found {other}"))),
        }
    }

    fn integer(&mut self, what: &str) -> Result<i64> {
        match self.next() {
            Token::Int(value) if value >= 0 => Ok(value),
            Token::Int(value) => Err(error(format!("{what} cannot be negative: {value}"))),
            other => Err(error(format!("Expected {what}, found {other}"))),
        }
    }

    fn query(&mut self) -> Result<Query> {
        let mut query = Query::new(self.ident("a model name")?);

        loop {
            self.expect(Token::Dot)?;
            let method = self.ident("a query method")?;
            self.expect(Token::LParen)?;

            match method.as_str() {
                "filter" => {
                    query.filters.push(self.condition()?);
                    while *self.peek() == Token::Comma {
                        self.next();
                        query.filters.push(self.condition()?);
                    }
                }
                "order_by" => {
                    query.order.push(self.order_key()?);
                    while *self.peek() == Token::Comma {
                        self.next();
                        query.order.push(self.order_key()?);
                    }
                }
                "limit" => query.limit = Some(self.integer("a limit")?),
                "offset" => query.offset = Some(self.integer("an offset")?),
                "slice" => {
                    let start = self.integer("a slice start")?;
                    self.expect(Token::Comma)?;
                    let stop = self.integer("a slice end")?;
                    if stop < start {
                        return Err(error(format!("Slice end {stop} is before its start {start}")));
                    }
                    query.offset = Some(start);
                    query.limit = Some(stop - start);
                }
                "all" => query.terminal = Terminal::All,
                "first" => query.terminal = Terminal::First,
                "count" => query.terminal = Terminal::Count,
                "exists" => query.terminal = Terminal::Exists,
                "get" => query.terminal = Terminal::Get(self.literal()?),
                "min" => query.terminal = Terminal::Min(self.ident("a field name")?),
                "max" => query.terminal = Terminal::Max(self.ident("a field name")?),
                other => return Err(error(format!("Unknown query method '{other}'"))),
            }
            self.expect(Token::RParen)?;

            if is_terminal(&method) {
                break;
            }
        }

        match self.next() {
            Token::End => Ok(query),
            other => Err(error(format!("Unexpected {other} after the end of the query"))),
        }
    }

    fn condition(&mut self) -> Result<Condition> {
        let field = self.ident("a field name")?;
        match self.next() {
            Token::Op(op) => Ok(Condition::Compare {
                field,
                op,
                value: self.literal()?,
            }),
            Token::Ident(word) if word == "in" => {
                self.expect(Token::LBracket)?;
                let mut values = vec![self.literal()?];
                while *self.peek() == Token::Comma {
                    self.next();
                    values.push(self.literal()?);
                }
                self.expect(Token::RBracket)?;
                Ok(Condition::In { field, values })
            }
            Token::Ident(word) if word == "contains" => Ok(Condition::Contains {
                field,
                value: self.literal()?,
            }),
            other => Err(error(format!(
                "Expected a comparison, 'in' or 'contains' after '{field}', found {other}"
            ))),
        }
    }

    fn order_key(&mut self) -> Result<OrderKey> {
        let descending = *self.peek() == Token::Minus;
        if descending {
            self.next();
        }
        Ok(OrderKey {
            field: self.ident("a field name")?,
            descending,
        })
    }

    fn literal(&mut self) -> Result<Literal> {
        match self.next() {
            Token::Str(s) => Ok(Literal::String(s)),
            Token::Int(i) => Ok(Literal::Integer(i)),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Literal::Boolean(true)),
                "false" => Ok(Literal::Boolean(false)),
                "null" => Ok(Literal::Null),
                _ => Err(error(format!("Expected a literal, found '{word}'"))),
            },
            other => Err(error(format!("Expected a literal, found {other}"))),
        }
    }
}

fn is_terminal(method: &str) -> bool {
    matches!(
        method,
        "all" | "first" | "get" | "count" | "exists" | "min" | "max"
    )
}
