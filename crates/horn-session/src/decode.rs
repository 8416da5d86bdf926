//! Decode the engine's printed answers into binding rows.
//!
//! Values map onto JSON: numbers stay numbers, quoted text and atoms become
//! strings, lists become arrays recursively, `true`/`false` become booleans,
//! and unbound variables or the `...` elision become `null`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::error::SessionError;

/// One solution: lower-cased variable name to decoded value.
pub type Row = Map<String, Value>;

/// Start of a `Name = ` binding, not preceded by a word character.
static BINDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w])([A-Z_]\w*) = ").unwrap());

/// Longest alias chain followed when resolving `X = Y, Y = 1`.
const MAX_ALIAS_DEPTH: usize = 16;

/// A binding's right-hand side: a value, or another variable's name.
#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Value(Value),
    Alias(String),
}

/// Decode one printed answer into a row over `variables`.
///
/// Returns `Ok(None)` when the answer is a plain failure (`false`) with no
/// bindings. Variables the engine left out of the answer decode as `null`.
pub fn decode_row(text: &str, variables: &[String]) -> Result<Option<Row>, SessionError> {
    let bindings = parse_bindings(text)?;
    if bindings.is_empty() && text.contains("false") {
        return Ok(None);
    }

    let mut row = Row::new();
    for variable in variables {
        let value = resolve(variable, &bindings);
        row.insert(variable.to_lowercase(), value);
    }
    Ok(Some(row))
}

/// Decode an aggregate answer `<result> = [item, ...]` into one row per item.
///
/// A single variable's items are its values; with several variables each item
/// is a tuple in the order of `variables`.
pub fn decode_aggregate(
    text: &str,
    result: &str,
    variables: &[String],
) -> Result<Vec<Row>, SessionError> {
    let bindings = parse_bindings(text)?;
    let Some((_, Bound::Value(list))) = bindings.iter().find(|(name, _)| name == result) else {
        if text.contains("false") {
            return Ok(Vec::new());
        }
        return Err(decode_error(text, format!("no binding for {}", result)));
    };

    let Value::Array(items) = list else {
        return Err(decode_error(text, "aggregate result is not a list"));
    };

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let mut row = Row::new();
        match (variables, item) {
            (_, Value::Null) => {
                return Err(decode_error(text, "aggregate answer was truncated by the engine"));
            }
            ([single], value) => {
                row.insert(single.to_lowercase(), value.clone());
            }
            (many, Value::Array(tuple)) if tuple.len() == many.len() => {
                for (variable, value) in many.iter().zip(tuple) {
                    row.insert(variable.to_lowercase(), value.clone());
                }
            }
            (many, other) => {
                return Err(decode_error(
                    text,
                    format!("expected a {}-tuple, got {}", many.len(), other),
                ));
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Decode a single printed term.
pub fn decode_value(text: &str) -> Result<Value, SessionError> {
    let mut parser = TermParser::new(text, 0);
    let value = parser
        .value()
        .map_err(|reason| decode_error(text, reason))?;
    parser.skip_whitespace();
    let rest = parser.rest().trim();
    let rest = rest.strip_suffix('.').unwrap_or(rest);
    if !rest.is_empty() {
        return Err(decode_error(text, format!("trailing input {:?}", rest)));
    }
    Ok(value)
}

fn decode_error(text: &str, reason: impl Into<String>) -> SessionError {
    SessionError::Decode {
        text: text.to_string(),
        reason: reason.into(),
    }
}

fn resolve(variable: &str, bindings: &[(String, Bound)]) -> Value {
    let mut name = variable;
    for _ in 0..MAX_ALIAS_DEPTH {
        match bindings.iter().find(|(n, _)| n == name) {
            Some((_, Bound::Value(value))) => return value.clone(),
            Some((_, Bound::Alias(target))) => name = target,
            None => return Value::Null,
        }
    }
    Value::Null
}

/// Scan `text` for `Name = value` pairs, left to right.
///
/// Each search resumes after the previous value, so text inside a value is
/// never mistaken for a binding.
fn parse_bindings(text: &str) -> Result<Vec<(String, Bound)>, SessionError> {
    let mut bindings = Vec::new();
    let mut pos = 0;

    while let Some(caps) = BINDING.captures_at(text, pos) {
        let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
            break;
        };

        let mut parser = TermParser::new(text, whole.end());
        let bound = match parser.peek() {
            Some(c) if c.is_ascii_uppercase() => {
                let alias = parser.identifier();
                if parser.at_delimiter() {
                    Bound::Alias(alias)
                } else {
                    parser.pos = whole.end();
                    Bound::Value(parser.value().map_err(|reason| decode_error(text, reason))?)
                }
            }
            _ => Bound::Value(parser.value().map_err(|reason| decode_error(text, reason))?),
        };

        bindings.push((name.as_str().to_string(), bound));
        pos = parser.pos;
    }

    Ok(bindings)
}

/// Recursive-descent reader for printed Prolog terms.
struct TermParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> TermParser<'a> {
    fn new(input: &'a str, pos: usize) -> Self {
        Self { input, pos }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        self.input[start..self.pos].to_string()
    }

    /// Whether the next character ends a term.
    fn at_delimiter(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) => c.is_whitespace() || matches!(c, ',' | ']' | '|' | ')' | ';' | '.'),
        }
    }

    fn value(&mut self) -> Result<Value, String> {
        self.skip_whitespace();
        let start = self.pos;
        let value = match self.peek() {
            None => return Err("unexpected end of answer".to_string()),
            Some('"') | Some('\'') | Some('`') => Value::String(self.quoted()?),
            Some('[') => self.list()?,
            Some('.') if self.rest().starts_with("...") => {
                self.pos += 3;
                Value::Null
            }
            Some(c) if c.is_ascii_digit() => self.number()?,
            Some('-') if self.rest()[1..].starts_with(|c: char| c.is_ascii_digit()) => {
                self.number()?
            }
            Some(c) if c.is_uppercase() || c == '_' => {
                self.identifier();
                Value::Null
            }
            Some(c) if c.is_alphabetic() => self.atom_or_compound(start)?,
            Some(_) => return self.raw(start),
        };

        if self.at_delimiter() {
            Ok(value)
        } else {
            // Operator terms such as `a-1` are kept as their printed text.
            self.raw(start)
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        let quote = self.bump().ok_or("expected quote")?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated quoted text".to_string()),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => return Err("unterminated escape".to_string()),
                },
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        out.push(quote);
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn list(&mut self) -> Result<Value, String> {
        self.bump();
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(Value::Array(items));
        }

        loop {
            items.push(self.value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('|') => {
                    match self.value()? {
                        Value::Array(tail) => items.extend(tail),
                        other => items.push(other),
                    }
                    self.skip_whitespace();
                    if self.bump() != Some(']') {
                        return Err("expected `]` after list tail".to_string());
                    }
                    return Ok(Value::Array(items));
                }
                Some(']') => return Ok(Value::Array(items)),
                Some(c) => return Err(format!("unexpected {:?} in list", c)),
                None => return Err("unterminated list".to_string()),
            }
        }
    }

    fn number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        self.digits();

        let mut float = false;
        if self.peek() == Some('.') && self.rest()[1..].starts_with(|c: char| c.is_ascii_digit()) {
            float = true;
            self.bump();
            self.digits();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let rest = &self.rest()[1..];
            let exponent = rest.trim_start_matches(['+', '-']);
            if exponent.starts_with(|c: char| c.is_ascii_digit()) {
                float = true;
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.bump();
                }
                self.digits();
            }
        }

        let text: String = self.input[start..self.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if !float && let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
        let n: f64 = text
            .parse()
            .map_err(|e| format!("bad number {:?}: {}", text, e))?;
        Ok(Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null))
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
    }

    fn atom_or_compound(&mut self, start: usize) -> Result<Value, String> {
        let name = self.identifier();
        if self.peek() == Some('(') {
            self.bump();
            loop {
                self.value()?;
                self.skip_whitespace();
                match self.bump() {
                    Some(',') => continue,
                    Some(')') => break,
                    _ => return Err(format!("malformed arguments of {}", name)),
                }
            }
            return Ok(Value::String(self.input[start..self.pos].to_string()));
        }

        Ok(match name.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(name),
        })
    }

    /// Printed text up to the next delimiter at nesting depth zero.
    fn raw(&mut self, start: usize) -> Result<Value, String> {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth == 0 => break,
                ')' | ']' | '}' => depth -= 1,
                '"' | '\'' => {
                    self.quoted()?;
                    continue;
                }
                ',' | '|' | ';' if depth == 0 => break,
                c if c.is_whitespace() && depth == 0 => break,
                '.' if depth == 0 && self.rest()[1..].starts_with(char::is_whitespace) => break,
                _ => {}
            }
            self.bump();
        }
        let text = self.input[start..self.pos].trim_end_matches('.');
        if text.is_empty() {
            return Err(format!("unexpected {:?}", self.peek().unwrap_or(' ')));
        }
        Ok(Value::String(text.to_string()))
    }
}
