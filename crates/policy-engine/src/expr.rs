//! C1: the condition-expression evaluator.
//!
//! A small recursive-descent parser over the PDL condition grammar
//! (literals, attribute lookups, arithmetic/relational/boolean operators,
//! tuple literals, and `Ident(arg, ...)` calls), followed by tree-walking
//! evaluation against a `RequestContext` and the snapshot's function table.

use crate::functions::FunctionInvoker;
use aegis_core::value::Value;
use aegis_core::{glob, RequestContext};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("attribute missing: {0}")]
    AttributeMissing(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("{0}")]
    FunctionCall(#[from] crate::functions::FunctionCallError),
    #[error("evaluation timed out")]
    Timeout,
}

// ---------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn lex(src: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(EvalError::Parse("unterminated string literal".into()));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    if chars[i] == '.' {
                        is_float = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    tokens.push(Token::Float(text.parse().map_err(|_| {
                        EvalError::Parse(format!("invalid number literal '{text}'"))
                    })?));
                } else {
                    tokens.push(Token::Int(text.parse().map_err(|_| {
                        EvalError::Parse(format!("invalid number literal '{text}'"))
                    })?));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" => tokens.push(Token::Null),
                    _ => tokens.push(Token::Ident(text)),
                }
            }
            other => {
                return Err(EvalError::Parse(format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    BoolLit(bool),
    NullLit,
    Tuple(Vec<Expr>),
    Ident(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Token) -> Result<(), EvalError> {
        match self.advance() {
            Some(t) if &t == tok => Ok(()),
            other => Err(EvalError::Parse(format!(
                "expected {tok:?}, found {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_relational()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Not) => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Some(Token::Int(v)) => Ok(Expr::IntLit(v)),
            Some(Token::Float(v)) => Ok(Expr::FloatLit(v)),
            Some(Token::Str(s)) => Ok(Expr::StrLit(s)),
            Some(Token::Bool(b)) => Ok(Expr::BoolLit(b)),
            Some(Token::Null) => Ok(Expr::NullLit),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), Some(Token::Comma)) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let mut items = vec![self.parse_expr()?];
                let mut is_tuple = false;
                while matches!(self.peek(), Some(Token::Comma)) {
                    is_tuple = true;
                    self.advance();
                    items.push(self.parse_expr()?);
                }
                self.expect(&Token::RParen)?;
                if is_tuple {
                    Ok(Expr::Tuple(items))
                } else {
                    Ok(items.pop().unwrap())
                }
            }
            other => Err(EvalError::Parse(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }
}

pub fn parse(src: &str) -> Result<Expr, EvalError> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::Parse(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(expr)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ---------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------

/// Bound names available to every condition, beyond `ctx.attributes`.
pub struct EvalContext<'a> {
    pub ctx: &'a RequestContext,
    pub functions: &'a FunctionInvoker,
    pub deadline: Duration,
}

/// Tree-walking evaluator. Returns a boxed future so `Expr::Tuple`/`Neg`/
/// `Not`/`BinOp`/`Call` can recurse into it without growing an infinitely
/// sized `async fn` state machine.
pub fn eval<'a>(
    expr: &'a Expr,
    ec: &'a EvalContext<'a>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, EvalError>> + Send + 'a>> {
    Box::pin(async move {
        match expr {
            Expr::IntLit(v) => Ok(Value::Int(*v)),
            Expr::FloatLit(v) => Ok(Value::Float(*v)),
            Expr::StrLit(s) => Ok(Value::Str(s.clone())),
            Expr::BoolLit(b) => Ok(Value::Bool(*b)),
            Expr::NullLit => Ok(Value::Null),
            Expr::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(eval(item, ec).await?);
                }
                Ok(Value::Tuple(out))
            }
            Expr::Ident(name) => resolve_ident(name, ec),
            Expr::Neg(inner) => {
                let v = eval(inner, ec).await?;
                let f = v.as_f64().ok_or_else(|| {
                    EvalError::Parse(format!("cannot negate non-numeric value {v}"))
                })?;
                Ok(Value::Float(-f))
            }
            Expr::Not(inner) => {
                let v = eval(inner, ec).await?;
                let b = v.as_bool().ok_or_else(|| {
                    EvalError::Parse(format!("cannot negate non-boolean value {v}"))
                })?;
                Ok(Value::Bool(!b))
            }
            Expr::BinOp(op, lhs, rhs) => eval_binop(*op, lhs, rhs, ec).await,
            Expr::Call(name, args) => eval_call(name, args, ec).await,
        }
    })
}

fn resolve_ident(name: &str, ec: &EvalContext<'_>) -> Result<Value, EvalError> {
    match name {
        "subject" => Ok(Value::Tuple(
            ec.ctx.subject.iter().map(|s| Value::Str(s.clone())).collect(),
        )),
        "resource" => Ok(Value::Str(ec.ctx.resource.clone())),
        "action" => Ok(Value::Str(ec.ctx.action.clone())),
        "service" => Ok(Value::Str(ec.ctx.service_name.clone())),
        "request_time" => Ok(Value::Str(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string())),
        _ => ec
            .ctx
            .attributes
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::AttributeMissing(name.to_string())),
    }
}

async fn eval_binop<'a>(
    op: BinOp,
    lhs: &'a Expr,
    rhs: &'a Expr,
    ec: &'a EvalContext<'a>,
) -> Result<Value, EvalError> {
    // Short-circuit boolean operators.
    if op == BinOp::And {
        let l = eval(lhs, ec).await?;
        if !l.as_bool().unwrap_or(false) {
            return Ok(Value::Bool(false));
        }
        let r = eval(rhs, ec).await?;
        return Ok(Value::Bool(r.as_bool().unwrap_or(false)));
    }
    if op == BinOp::Or {
        let l = eval(lhs, ec).await?;
        if l.as_bool().unwrap_or(false) {
            return Ok(Value::Bool(true));
        }
        let r = eval(rhs, ec).await?;
        return Ok(Value::Bool(r.as_bool().unwrap_or(false)));
    }

    let l = eval(lhs, ec).await?;
    let r = eval(rhs, ec).await?;

    match op {
        BinOp::Eq => Ok(Value::Bool(l.loose_eq(&r))),
        BinOp::Ne => Ok(Value::Bool(!l.loose_eq(&r))),
        BinOp::Lt => Ok(Value::Bool(l.partial_compare(&r) == Some(std::cmp::Ordering::Less))),
        BinOp::Le => Ok(Value::Bool(matches!(
            l.partial_compare(&r),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ))),
        BinOp::Gt => Ok(Value::Bool(l.partial_compare(&r) == Some(std::cmp::Ordering::Greater))),
        BinOp::Ge => Ok(Value::Bool(matches!(
            l.partial_compare(&r),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ))),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (a, b) = (
                l.as_f64().ok_or_else(|| {
                    EvalError::Parse(format!("non-numeric operand to arithmetic operator: {l}"))
                })?,
                r.as_f64().ok_or_else(|| {
                    EvalError::Parse(format!("non-numeric operand to arithmetic operator: {r}"))
                })?,
            );
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                _ => unreachable!(),
            };
            Ok(Value::Float(result))
        }
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

async fn eval_call<'a>(
    name: &'a str,
    args: &'a [Expr],
    ec: &'a EvalContext<'a>,
) -> Result<Value, EvalError> {
    let mut values = Vec::with_capacity(args.len());
    for a in args {
        values.push(eval(a, ec).await?);
    }

    if let Some(result) = eval_builtin(name, &values) {
        return result;
    }

    // Not a built-in: resolve as an extension function. Unknown names are
    // not an error here — the caller (the matcher) treats a failed/unknown
    // call as "condition false, policy skipped", never as a deny.
    let result = ec.functions.invoke(name, &values, ec.deadline).await?;
    Ok(result)
}

fn eval_builtin(name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
    match name {
        "Sqrt" => Some(numeric1(args, f64::sqrt)),
        "Abs" => Some(numeric1(args, f64::abs)),
        "Max" => Some(numeric_fold(args, f64::NEG_INFINITY, f64::max)),
        "Min" => Some(numeric_fold(args, f64::INFINITY, f64::min)),
        "IsSubSet" => Some(is_subset(args)),
        "Contains" => Some(contains(args)),
        "Match" => Some(match_builtin(args)),
        _ => None,
    }
}

fn numeric1(args: &[Value], f: fn(f64) -> f64) -> Result<Value, EvalError> {
    let v = args
        .first()
        .and_then(Value::as_f64)
        .ok_or_else(|| EvalError::Parse("expected one numeric argument".into()))?;
    Ok(Value::Float(f(v)))
}

fn numeric_fold(args: &[Value], init: f64, f: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(EvalError::Parse("expected at least one argument".into()));
    }
    let mut acc = init;
    for a in args {
        let v = a
            .as_f64()
            .ok_or_else(|| EvalError::Parse(format!("non-numeric argument: {a}")))?;
        acc = f(acc, v);
    }
    Ok(Value::Float(acc))
}

fn as_scalar_set(v: &Value) -> Vec<Value> {
    match v {
        Value::Tuple(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// `IsSubSet(a, b)`: every element of `a` appears in `b`.
fn is_subset(args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two_args(args)?;
    let a = as_scalar_set(a);
    let b = as_scalar_set(b);
    Ok(Value::Bool(
        a.iter().all(|x| b.iter().any(|y| x.loose_eq(y))),
    ))
}

fn contains(args: &[Value]) -> Result<Value, EvalError> {
    let (haystack, needle) = two_args(args)?;
    match haystack {
        Value::Str(s) => {
            let n = needle
                .as_str()
                .ok_or_else(|| EvalError::Parse("Contains needle must be a string".into()))?;
            Ok(Value::Bool(s.contains(n)))
        }
        other => {
            let set = as_scalar_set(other);
            Ok(Value::Bool(set.iter().any(|x| x.loose_eq(needle))))
        }
    }
}

fn match_builtin(args: &[Value]) -> Result<Value, EvalError> {
    let (pattern, s) = two_args(args)?;
    let pattern = pattern
        .as_str()
        .ok_or_else(|| EvalError::Parse("Match pattern must be a string".into()))?;
    let s = s
        .as_str()
        .ok_or_else(|| EvalError::Parse("Match subject must be a string".into()))?;
    Ok(Value::Bool(glob::matches(pattern, s)))
}

fn two_args(args: &[Value]) -> Result<(&Value, &Value), EvalError> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(EvalError::Parse(format!("expected 2 arguments, got {}", args.len()))),
    }
}

/// Attribute map builder used by tests and the services' request decoding.
pub fn attributes_from_json(raw: HashMap<String, serde_json::Value>) -> HashMap<String, Value> {
    raw.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionInvoker;
    use std::collections::HashMap as Map;

    fn ctx(attrs: Map<String, Value>) -> RequestContext {
        RequestContext {
            subject: vec!["user:alice".into()],
            service_name: "crm".into(),
            resource: "/node1".into(),
            action: "get".into(),
            attributes: attrs,
        }
    }

    async fn run(src: &str, attrs: Map<String, Value>) -> Result<Value, EvalError> {
        let invoker = FunctionInvoker::new_empty();
        let ctx = ctx(attrs);
        let ec = EvalContext {
            ctx: &ctx,
            functions: &invoker,
            deadline: Duration::from_secs(1),
        };
        let expr = parse(src)?;
        eval(&expr, &ec).await
    }

    #[tokio::test]
    async fn sqrt_builtin() {
        let mut attrs = Map::new();
        attrs.insert("x".into(), Value::Float(64.0));
        let v = run("Sqrt(x) > 7.99", attrs).await.unwrap();
        assert_eq!(v.as_bool(), Some(true));
    }

    #[tokio::test]
    async fn sqrt_builtin_false_branch() {
        let mut attrs = Map::new();
        attrs.insert("x".into(), Value::Float(64.0));
        let v = run("Sqrt(x) > 8.01", attrs).await.unwrap();
        assert_eq!(v.as_bool(), Some(false));
    }

    #[tokio::test]
    async fn max_builtin() {
        let mut attrs = Map::new();
        attrs.insert("x".into(), Value::Int(7));
        attrs.insert("y".into(), Value::Int(6));
        let v = run("Max(-3, x, 5) > y", attrs).await.unwrap();
        assert_eq!(v.as_bool(), Some(true));
    }

    #[tokio::test]
    async fn is_subset_true_and_false() {
        let mut attrs = Map::new();
        attrs.insert(
            "s".into(),
            Value::Tuple(vec![Value::Str("GZ".into()), Value::Str("SH".into())]),
        );
        let v = run("IsSubSet(s,('BJ','SH','GZ','SZ'))", attrs.clone())
            .await
            .unwrap();
        assert_eq!(v.as_bool(), Some(true));

        attrs.insert(
            "s".into(),
            Value::Tuple(vec![Value::Str("GZ".into()), Value::Str("TJ".into())]),
        );
        let v = run("IsSubSet(s,('BJ','SH','GZ','SZ'))", attrs).await.unwrap();
        assert_eq!(v.as_bool(), Some(false));
    }

    #[tokio::test]
    async fn missing_attribute_is_an_error() {
        let err = run("x > 1", Map::new()).await.unwrap_err();
        assert!(matches!(err, EvalError::AttributeMissing(_)));
    }

    #[tokio::test]
    async fn equality_across_incompatible_types_is_false_not_error() {
        let v = run("'1' == 1", Map::new()).await.unwrap();
        assert_eq!(v.as_bool(), Some(false));
    }

    #[tokio::test]
    async fn unknown_extension_function_errors() {
        let err = run("totallyUnknownFn(1, 2)", Map::new()).await.unwrap_err();
        assert!(matches!(err, EvalError::FunctionCall(_)));
    }
}
