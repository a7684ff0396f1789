//! A small FHIRPath subset used by ViewDefinition columns, `forEach` and `where`.
//!
//! Supported:
//!
//! - member access (`name.given`), flattening arrays like FHIRPath collections
//! - choice elements (`value` matches `valueQuantity`, `value.ofType(Quantity)`)
//! - `first()`, `last()`, `exists()`, `empty()`, `count()`, `join('sep')`
//! - `getResourceKey()`, `getReferenceKey([Type])`, `where(<expr>)`
//! - literals (`'text'`, numbers, `true`, `false`), constants (`%name`) and
//!   `%resource` for the resource being flattened
//! - `=` / `!=` comparisons and `and`
//!
//! Parsing happens when a catalog is loaded so unsupported syntax is reported
//! up front; evaluation errors are reported per resource.

use std::collections::HashMap;

use serde_json::Value;

use crate::record::id_part;

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Path(Vec<Step>),
    Literal(Value),
    Constant(String),
    /// Steps applied to a constant, as in `%resource.id`.
    Invoke(Box<Expr>, Vec<Step>),
    Compare {
        negate: bool,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
}

/// One step of an invocation chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Member(String),
    /// Exact choice element key, `value.ofType(date)` is `valueDate`.
    ChoiceMember(String),
    First,
    Last,
    Exists,
    Empty,
    Count,
    Join(String),
    ResourceKey,
    ReferenceKey(Option<String>),
    Where(Box<Expr>),
}

/// Values available to every evaluation: the resource root and `%constants`.
pub struct EvalContext<'a> {
    pub resource: &'a Value,
    pub constants: &'a HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(serde_json::Number),
    Percent(String),
    Dot,
    LParen,
    RParen,
    Eq,
    NotEq,
}

/// Parse an expression.
pub fn parse(source: &str) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "unexpected {:?} in path '{}'",
            parser.tokens[parser.pos], source
        ));
    }
    Ok(expr)
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
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
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(format!("unterminated string in '{}'", source)),
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| format!("dangling escape in '{}'", source))?;
                            text.push(*escaped);
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            text.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '%' => {
                let (name, next) = read_ident(&chars, i + 1);
                if name.is_empty() {
                    return Err(format!("expected constant name after % in '{}'", source));
                }
                tokens.push(Token::Percent(name));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '-' && matches!(chars.get(i + 1), Some(d) if d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // "1.first()" is not a number; stop at a dot not followed by a digit
                    if chars[i] == '.' && !matches!(chars.get(i + 1), Some(d) if d.is_ascii_digit()) {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num: serde_json::Number = serde_json::from_str(&text)
                    .map_err(|_| format!("invalid number '{}' in '{}'", text, source))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let (name, next) = read_ident(&chars, i);
                tokens.push(Token::Ident(name));
                i = next;
            }
            other => return Err(format!("unsupported character '{}' in '{}'", other, source)),
        }
    }

    Ok(tokens)
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            other => Err(format!("expected {:?}, found {:?}", expected, other)),
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.comparison()?;
        while matches!(self.peek(), Some(Token::Ident(k)) if k == "and") {
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.term()?;
        let negate = match self.peek() {
            Some(Token::Eq) => false,
            Some(Token::NotEq) => true,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.term()?;
        Ok(Expr::Compare {
            negate,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn term(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Percent(name)) => {
                let mut steps = Vec::new();
                self.trailing_steps(&mut steps)?;
                if steps.is_empty() {
                    Ok(Expr::Constant(name))
                } else {
                    Ok(Expr::Invoke(Box::new(Expr::Constant(name)), steps))
                }
            }
            Some(Token::Ident(k)) if k == "true" || k == "false" => {
                Ok(Expr::Literal(Value::Bool(k == "true")))
            }
            Some(Token::Ident(name)) => {
                let mut steps = Vec::new();
                self.step(name, &mut steps)?;
                self.trailing_steps(&mut steps)?;
                Ok(Expr::Path(steps))
            }
            other => Err(format!("unexpected {:?}", other)),
        }
    }

    fn trailing_steps(&mut self, steps: &mut Vec<Step>) -> Result<(), String> {
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(name)) => self.step(name, steps)?,
                other => return Err(format!("expected name after '.', found {:?}", other)),
            }
        }
        Ok(())
    }

    fn step(&mut self, name: String, steps: &mut Vec<Step>) -> Result<(), String> {
        if self.peek() != Some(&Token::LParen) {
            steps.push(Step::Member(name));
            return Ok(());
        }
        self.pos += 1;

        let step = match name.as_str() {
            "first" => Step::First,
            "last" => Step::Last,
            "exists" => Step::Exists,
            "empty" => Step::Empty,
            "count" => Step::Count,
            "getResourceKey" => Step::ResourceKey,
            "join" => match self.next() {
                Some(Token::Str(sep)) => Step::Join(sep),
                other => return Err(format!("join() expects a string, found {:?}", other)),
            },
            "getReferenceKey" => match self.peek().cloned() {
                Some(Token::Ident(t)) => {
                    self.pos += 1;
                    Step::ReferenceKey(Some(t))
                }
                _ => Step::ReferenceKey(None),
            },
            "where" => Step::Where(Box::new(self.expr()?)),
            "ofType" => {
                let type_name = match self.next() {
                    Some(Token::Ident(t)) => t,
                    other => return Err(format!("ofType() expects a type, found {:?}", other)),
                };
                // Choice elements are stored as <name><Type>, e.g. valueQuantity.
                match steps.pop() {
                    Some(Step::Member(base)) => {
                        Step::ChoiceMember(format!("{}{}", base, capitalize(&type_name)))
                    }
                    _ => return Err("ofType() must follow an element name".to_string()),
                }
            }
            other => return Err(format!("unsupported function {}()", other)),
        };

        self.expect(Token::RParen)?;
        steps.push(step);
        Ok(())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Evaluate `expr` against the `input` collection.
pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>, input: &[Value]) -> Result<Vec<Value>, String> {
    match expr {
        Expr::Literal(v) => Ok(vec![v.clone()]),
        Expr::Constant(name) => match ctx.constants.get(name) {
            Some(v) => Ok(vec![v.clone()]),
            None if name == "resource" => Ok(vec![ctx.resource.clone()]),
            None => Err(format!("undefined constant %{}", name)),
        },
        Expr::Invoke(base, steps) => {
            let mut current = evaluate(base, ctx, input)?;
            for step in steps {
                current = apply_step(step, ctx, current)?;
            }
            Ok(current)
        }
        Expr::Path(steps) => {
            let mut current: Vec<Value> = input.to_vec();
            for (i, step) in steps.iter().enumerate() {
                // A leading type name (Patient.name) refers to the resource itself.
                if i == 0 {
                    if let Step::Member(name) = step {
                        if is_type_prefix(name, &current) {
                            continue;
                        }
                    }
                }
                current = apply_step(step, ctx, current)?;
            }
            Ok(current)
        }
        Expr::Compare { negate, lhs, rhs } => {
            let left = evaluate(lhs, ctx, input)?;
            let right = evaluate(rhs, ctx, input)?;
            if left.is_empty() || right.is_empty() {
                return Ok(Vec::new());
            }
            let equal = left.len() == right.len()
                && left.iter().zip(right.iter()).all(|(a, b)| values_equal(a, b));
            Ok(vec![Value::Bool(equal != *negate)])
        }
        Expr::And(lhs, rhs) => {
            let left = as_boolean(&evaluate(lhs, ctx, input)?)?;
            let right = as_boolean(&evaluate(rhs, ctx, input)?)?;
            Ok(match (left, right) {
                (Some(false), _) | (_, Some(false)) => vec![Value::Bool(false)],
                (Some(true), Some(true)) => vec![Value::Bool(true)],
                _ => Vec::new(),
            })
        }
    }
}

/// True when the result is exactly `[true]`.
pub fn is_true(result: &[Value]) -> bool {
    matches!(result, [Value::Bool(true)])
}

fn is_type_prefix(name: &str, current: &[Value]) -> bool {
    name.starts_with(|c: char| c.is_ascii_uppercase())
        && current
            .iter()
            .all(|v| v.get("resourceType").and_then(Value::as_str) == Some(name))
        && !current.is_empty()
}

fn apply_step(step: &Step, ctx: &EvalContext<'_>, input: Vec<Value>) -> Result<Vec<Value>, String> {
    Ok(match step {
        Step::Member(name) => collect_members(&input, |item| member(item, name)),
        Step::ChoiceMember(key) => collect_members(&input, |item| item.get(key.as_str())),
        Step::First => input.into_iter().take(1).collect(),
        Step::Last => input.into_iter().last().into_iter().collect(),
        Step::Exists => vec![Value::Bool(!input.is_empty())],
        Step::Empty => vec![Value::Bool(input.is_empty())],
        Step::Count => vec![Value::from(input.len())],
        Step::Join(sep) => {
            if input.is_empty() {
                return Ok(Vec::new());
            }
            let parts = input
                .iter()
                .map(|v| primitive_text(v).ok_or_else(|| "join() requires primitive values".to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            vec![Value::String(parts.join(sep))]
        }
        Step::ResourceKey => input
            .iter()
            .filter_map(|v| v.get("id").and_then(Value::as_str))
            .map(|id| Value::String(id_part(id).to_string()))
            .collect(),
        Step::ReferenceKey(expected_type) => input
            .iter()
            .filter_map(|v| v.get("reference").and_then(Value::as_str))
            .filter_map(|reference| reference_key(reference, expected_type.as_deref()))
            .map(Value::String)
            .collect(),
        Step::Where(criteria) => {
            let mut out = Vec::new();
            for item in input {
                let result = evaluate(criteria, ctx, std::slice::from_ref(&item))?;
                if is_true(&result) {
                    out.push(item);
                }
            }
            out
        }
    })
}

fn collect_members<'v, F>(input: &'v [Value], lookup: F) -> Vec<Value>
where
    F: Fn(&'v Value) -> Option<&'v Value>,
{
    let mut out = Vec::new();
    for item in input {
        match lookup(item) {
            Some(Value::Array(items)) => out.extend(items.iter().cloned()),
            Some(Value::Null) | None => {}
            Some(other) => out.push(other.clone()),
        }
    }
    out
}

/// Look up `name` on an object, falling back to a choice element `name<Type>`.
fn member<'v>(item: &'v Value, name: &str) -> Option<&'v Value> {
    let obj = item.as_object()?;
    if let Some(v) = obj.get(name) {
        return Some(v);
    }
    obj.iter()
        .find(|(key, _)| {
            key.len() > name.len()
                && key.starts_with(name)
                && key[name.len()..].starts_with(|c: char| c.is_ascii_uppercase())
        })
        .map(|(_, v)| v)
}

/// `Patient/123/_history/2` -> `123`, optionally requiring the type.
fn reference_key(reference: &str, expected_type: Option<&str>) -> Option<String> {
    let trimmed = match reference.find("/_history") {
        Some(pos) => &reference[..pos],
        None => reference,
    };
    let mut parts = trimmed.rsplitn(3, '/');
    let id = parts.next()?;
    let ref_type = parts.next();
    if let Some(expected) = expected_type {
        if ref_type != Some(expected) {
            return None;
        }
    }
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

/// Text form of a primitive JSON value; `None` for objects, arrays and null.
pub fn primitive_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn as_boolean(result: &[Value]) -> Result<Option<bool>, String> {
    match result {
        [] => Ok(None),
        [Value::Bool(b)] => Ok(Some(*b)),
        other => Err(format!("expected a boolean, got {:?}", other)),
    }
}
