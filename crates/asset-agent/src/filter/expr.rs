//! Built-in boolean expression evaluator for asset filters.
//!
//! Supported syntax:
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := primary ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" | "in" ) primary )?
//! primary    := literal | path | "(" expr ")" | "[" ( expr ( "," expr )* )? "]"
//! literal    := string | number | "true" | "false" | "null"
//! path       := ident ( "." ident )*
//! ```
//!
//! Paths are resolved against the evaluation context, e.g.
//! `entity.system.os == "linux"`.

use serde_json::Value;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

/// Failure to evaluate a predicate expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The expression could not be parsed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Operands or the result have the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// Anything else, such as an attribute missing from the context.
    #[error("{0}")]
    Other(String),
}

/// Evaluates a boolean expression against a JSON context.
pub trait PredicateEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, EvalError>;
}

/// The default [`PredicateEvaluator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Parse an expression without evaluating it.
    pub fn check(&self, expression: &str) -> Result<(), EvalError> {
        Parser::new(expression)?.parse().map(|_| ())
    }
}

impl PredicateEvaluator for ExpressionEvaluator {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, EvalError> {
        let ast = Parser::new(expression)?.parse()?;
        match ast.eval(context)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::Type(format!(
                "expression evaluated to {}, expected a boolean",
                type_name(&other)
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    True,
    False,
    Null,
    Str(String),
    Num(f64),
    Path(Vec<String>),
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => push(&mut chars, &mut tokens, Token::LParen),
            ')' => push(&mut chars, &mut tokens, Token::RParen),
            '[' => push(&mut chars, &mut tokens, Token::LBracket),
            ']' => push(&mut chars, &mut tokens, Token::RBracket),
            ',' => push(&mut chars, &mut tokens, Token::Comma),
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err(EvalError::Syntax("expected '==' after '='".to_string()));
                }
                tokens.push(Token::Eq);
            }
            '<' => {
                chars.next();
                tokens.push(if chars.next_if_eq(&'=').is_some() { Token::Le } else { Token::Lt });
            }
            '>' => {
                chars.next();
                tokens.push(if chars.next_if_eq(&'=').is_some() { Token::Ge } else { Token::Gt });
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_none() {
                    return Err(EvalError::Syntax("expected '&&'".to_string()));
                }
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_none() {
                    return Err(EvalError::Syntax("expected '||'".to_string()));
                }
                tokens.push(Token::Or);
            }
            '"' | '\'' => {
                chars.next();
                tokens.push(Token::Str(lex_string(&mut chars, c)?));
            }
            '-' | '0'..='9' => tokens.push(Token::Num(lex_number(&mut chars)?)),
            c if c.is_ascii_alphabetic() || c == '_' => tokens.push(lex_word(&mut chars)?),
            other => {
                return Err(EvalError::Syntax(format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

fn push(chars: &mut Peekable<Chars<'_>>, tokens: &mut Vec<Token>, token: Token) {
    chars.next();
    tokens.push(token);
}

fn lex_string(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String, EvalError> {
    let mut value = String::new();
    loop {
        match chars.next() {
            Some(c) if c == quote => return Ok(value),
            Some('\\') => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some(c) => value.push(c),
                None => break,
            },
            Some(c) => value.push(c),
            None => break,
        }
    }
    Err(EvalError::Syntax("unterminated string literal".to_string()))
}

fn lex_number(chars: &mut Peekable<Chars<'_>>) -> Result<f64, EvalError> {
    let mut text = String::new();
    if let Some(sign) = chars.next_if_eq(&'-') {
        text.push(sign);
    }
    while let Some(c) = chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
        text.push(c);
    }
    text.parse::<f64>()
        .map_err(|_| EvalError::Syntax(format!("invalid number '{}'", text)))
}

fn lex_word(chars: &mut Peekable<Chars<'_>>) -> Result<Token, EvalError> {
    let mut text = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.') {
        text.push(c);
    }

    let token = match text.as_str() {
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "in" => Token::In,
        _ => {
            let segments: Vec<String> = text.split('.').map(str::to_string).collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(EvalError::Syntax(format!("invalid attribute path '{}'", text)));
            }
            Token::Path(segments)
        }
    };
    Ok(token)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Array(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
}

/// Deepest nesting of groups, arrays and negations accepted by the parser.
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, EvalError> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
            depth: 0,
        })
    }

    fn parse(mut self) -> Result<Expr, EvalError> {
        if self.tokens.is_empty() {
            return Err(EvalError::Syntax("empty expression".to_string()));
        }
        let expr = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(EvalError::Syntax(format!("unexpected token {:?}", token)));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(EvalError::Syntax(format!(
                "expected {:?}, found {:?}",
                expected,
                self.peek()
            )))
        }
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::Syntax("expression nested too deeply".to_string()));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Not) {
            let inner = self.nested(|p| p.parse_unary())?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let left = self.parse_primary()?;

        let op = match self.peek() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::In) => {
                self.pos += 1;
                let right = self.parse_primary()?;
                return Ok(Expr::In(Box::new(left), Box::new(right)));
            }
            _ => return Ok(left),
        };
        self.pos += 1;

        let right = self.parse_primary()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Path(segments)) => Ok(Expr::Path(segments)),
            Some(Token::LParen) => self.nested(|p| {
                let inner = p.parse_or()?;
                p.expect(Token::RParen)?;
                Ok(inner)
            }),
            Some(Token::LBracket) => self.nested(|p| {
                let mut items = Vec::new();
                if !p.eat(&Token::RBracket) {
                    loop {
                        items.push(p.parse_or()?);
                        if p.eat(&Token::Comma) {
                            continue;
                        }
                        p.expect(Token::RBracket)?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }),
            Some(token) => Err(EvalError::Syntax(format!("unexpected token {:?}", token))),
            None => Err(EvalError::Syntax("unexpected end of expression".to_string())),
        }
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

impl Expr {
    fn eval(&self, context: &Value) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(segments) => resolve(context, segments).cloned(),
            Expr::Array(items) => items
                .iter()
                .map(|item| item.eval(context))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Not(inner) => Ok(Value::Bool(!as_bool(&inner.eval(context)?, "!")?)),
            Expr::And(left, right) => {
                if !as_bool(&left.eval(context)?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(as_bool(&right.eval(context)?, "&&")?))
            }
            Expr::Or(left, right) => {
                if as_bool(&left.eval(context)?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(as_bool(&right.eval(context)?, "||")?))
            }
            Expr::Compare(op, left, right) => {
                let left = left.eval(context)?;
                let right = right.eval(context)?;
                compare(*op, &left, &right).map(Value::Bool)
            }
            Expr::In(needle, haystack) => {
                let needle = needle.eval(context)?;
                match haystack.eval(context)? {
                    Value::Array(items) => {
                        Ok(Value::Bool(items.iter().any(|item| values_equal(&needle, item))))
                    }
                    other => Err(EvalError::Type(format!(
                        "'in' requires an array, got {}",
                        type_name(&other)
                    ))),
                }
            }
        }
    }
}

fn resolve<'a>(context: &'a Value, segments: &[String]) -> Result<&'a Value, EvalError> {
    let mut current = context;
    for (i, segment) in segments.iter().enumerate() {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            EvalError::Other(format!(
                "no such attribute '{}'",
                segments[..=i].join(".")
            ))
        })?;
    }
    Ok(current)
}

fn as_bool(value: &Value, op: &str) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| {
        EvalError::Type(format!(
            "operator '{}' requires booleans, got {}",
            op,
            type_name(value)
        ))
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    match op {
        CmpOp::Eq => return Ok(values_equal(left, right)),
        CmpOp::Ne => return Ok(!values_equal(left, right)),
        _ => {}
    }

    let ordering = match (left, right) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
    .ok_or_else(|| {
        EvalError::Type(format!(
            "cannot order {} and {}",
            type_name(left),
            type_name(right)
        ))
    })?;

    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Eq | CmpOp::Ne => unreachable!("equality handled above"),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
