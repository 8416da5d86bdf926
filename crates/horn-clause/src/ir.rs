//! Expression-tree IR for predicate bodies and goals.
//!
//! Trees are built directly by callers, either with the enum constructors or
//! with the combinator helpers on [`Node`]:
//!
//! ```
//! use horn_clause::Node;
//!
//! let body = Node::call("person", [Node::var("name"), Node::var("x")])
//!     .and(Node::var("x").gt(60));
//! assert_eq!(body.kind(), "combinator");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// A literal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Int(i64),
    Str(String),
    List(Vec<Literal>),
}

impl Literal {
    /// Render in Prolog surface syntax: strings double-quoted, lists bracketed.
    pub fn to_prolog(&self) -> String {
        let mut out = String::new();
        self.write_prolog(&mut out);
        out
    }

    fn write_prolog(&self, out: &mut String) {
        match self {
            Literal::Int(n) => out.push_str(&n.to_string()),
            Literal::Str(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            Literal::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_prolog(out);
                }
                out.push(']');
            }
        }
    }

    /// The value a result row carries for this literal.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Literal::Int(n) => serde_json::Value::from(*n),
            Literal::Str(s) => serde_json::Value::String(s.clone()),
            Literal::List(items) => items.iter().map(Literal::to_json).collect(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_prolog())
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Str(s)
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Int(n)
    }
}

impl From<i32> for Literal {
    fn from(n: i32) -> Self {
        Literal::Int(n.into())
    }
}

impl<T: Into<Literal>> From<Vec<T>> for Literal {
    fn from(items: Vec<T>) -> Self {
        Literal::List(items.into_iter().map(Into::into).collect())
    }
}

/// A predicate call: `name(arg1, ..., argN)`.
///
/// Arguments must be [`Node::Variable`] or [`Node::Literal`]; anything else is
/// rejected at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Node>,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Lt,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "\\=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }
}

/// An infix comparison between two operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub left: Box<Node>,
    pub op: CompareOp,
    pub right: Box<Node>,
}

/// Boolean operators. `And` binds tighter than `Or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    /// Separator placed between two operands.
    pub fn separator(self) -> &'static str {
        match self {
            BoolOp::And => ", ",
            BoolOp::Or => "; ",
        }
    }
}

/// A boolean combinator over an ordered list of operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolExpr {
    pub op: BoolOp,
    pub operands: Vec<Node>,
}

/// An expression-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Literal(Literal),
    /// A local alias, resolved through the binding table at compile time.
    Variable(String),
    Call(Call),
    Comparison(Comparison),
    Combinator(BoolExpr),
}

impl Node {
    pub fn var(alias: impl Into<String>) -> Self {
        Node::Variable(alias.into())
    }

    pub fn lit(value: impl Into<Literal>) -> Self {
        Node::Literal(value.into())
    }

    pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Node>) -> Self {
        Node::Call(Call {
            name: name.into(),
            args: args.into_iter().collect(),
        })
    }

    pub fn compare(left: impl Into<Node>, op: CompareOp, right: impl Into<Node>) -> Self {
        Node::Comparison(Comparison {
            left: Box::new(left.into()),
            op,
            right: Box::new(right.into()),
        })
    }

    pub fn equals(self, other: impl Into<Node>) -> Self {
        Self::compare(self, CompareOp::Eq, other)
    }

    pub fn not_equals(self, other: impl Into<Node>) -> Self {
        Self::compare(self, CompareOp::NotEq, other)
    }

    pub fn gt(self, other: impl Into<Node>) -> Self {
        Self::compare(self, CompareOp::Gt, other)
    }

    pub fn lt(self, other: impl Into<Node>) -> Self {
        Self::compare(self, CompareOp::Lt, other)
    }

    /// Conjunction. Extends `self` in place when it is already an `And` group.
    pub fn and(self, other: impl Into<Node>) -> Self {
        self.combine(BoolOp::And, other.into())
    }

    /// Disjunction. Extends `self` in place when it is already an `Or` group.
    pub fn or(self, other: impl Into<Node>) -> Self {
        self.combine(BoolOp::Or, other.into())
    }

    /// Build a combinator from an explicit operand list.
    pub fn all(op: BoolOp, operands: impl IntoIterator<Item = Node>) -> Self {
        Node::Combinator(BoolExpr {
            op,
            operands: operands.into_iter().collect(),
        })
    }

    fn combine(self, op: BoolOp, other: Node) -> Self {
        match self {
            Node::Combinator(mut expr) if expr.op == op => {
                expr.operands.push(other);
                Node::Combinator(expr)
            }
            node => Node::Combinator(BoolExpr {
                op,
                operands: vec![node, other],
            }),
        }
    }

    /// Short name of the node kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Literal(_) => "literal",
            Node::Variable(_) => "variable",
            Node::Call(_) => "call",
            Node::Comparison(_) => "comparison",
            Node::Combinator(_) => "combinator",
        }
    }
}

impl From<Literal> for Node {
    fn from(literal: Literal) -> Self {
        Node::Literal(literal)
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Literal(Literal::Int(n))
    }
}

impl From<i32> for Node {
    fn from(n: i32) -> Self {
        Node::Literal(Literal::Int(n.into()))
    }
}

impl From<Call> for Node {
    fn from(call: Call) -> Self {
        Node::Call(call)
    }
}
