//! Compile predicate declarations to SWI-Prolog clauses.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ClauseError;
use crate::ir::{BoolExpr, BoolOp, Call, Comparison, Literal, Node};

/// A compiled clause, always terminated by `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clause(String);

impl Clause {
    /// Wrap hand-written clause text, adding the terminator when missing.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim_end();
        if trimmed.ends_with('.') {
            Clause(trimmed.to_string())
        } else {
            Clause(format!("{}.", trimmed))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The clause text without its trailing `.`.
    pub fn without_terminator(&self) -> &str {
        self.0.strip_suffix('.').unwrap_or(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Clause {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maps local aliases to engine variable names.
///
/// A strict table rejects aliases it does not know. An implicit table, used
/// for ad-hoc goals, resolves any unknown alias to its upper-cased name.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    table: HashMap<String, String>,
    implicit: bool,
}

impl Bindings {
    /// An empty strict table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that resolves unknown aliases to their upper-cased name.
    pub fn implicit() -> Self {
        Self {
            table: HashMap::new(),
            implicit: true,
        }
    }

    /// A strict table where each parameter binds to its upper-cased name.
    pub fn from_parameters<S: AsRef<str>>(parameters: &[S]) -> Self {
        let mut bindings = Self::new();
        for parameter in parameters {
            let parameter = parameter.as_ref();
            bindings.bind(parameter, engine_variable(parameter));
        }
        bindings
    }

    /// Bind `alias` to an engine-side variable, replacing any earlier binding.
    pub fn bind(&mut self, alias: impl Into<String>, variable: impl Into<String>) {
        self.table.insert(alias.into(), variable.into());
    }

    pub fn resolve(&self, alias: &str) -> Result<String, ClauseError> {
        if let Some(variable) = self.table.get(alias) {
            return Ok(variable.clone());
        }
        if self.implicit && !alias.is_empty() {
            return Ok(engine_variable(alias));
        }
        Err(ClauseError::UnboundVariable(alias.to_string()))
    }
}

/// Engine variable name for a parameter or alias: `name` becomes `NAME`.
fn engine_variable(alias: &str) -> String {
    alias.to_uppercase()
}

/// A predicate declaration: a fact template or a rule.
///
/// ```
/// use horn_clause::{Declaration, Node};
///
/// let old = Declaration::rule(
///     "old",
///     ["name"],
///     Node::call("person", [Node::var("name"), Node::var("x")]).and(Node::var("x").gt(60)),
/// )
/// .unwrap()
/// .bind("x", "X");
///
/// assert_eq!(
///     old.compile().unwrap().as_str(),
///     "old(NAME) :- person(NAME, X), X > 60."
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    name: String,
    parameters: Vec<String>,
    locals: Vec<(String, String)>,
    body: Option<Node>,
}

impl Declaration {
    /// Declare a fact template with no body.
    pub fn fact<I, S>(name: impl Into<String>, parameters: I) -> Result<Self, ClauseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(name.into(), parameters, None)
    }

    /// Declare a rule whose body is compiled from `body`.
    pub fn rule<I, S>(name: impl Into<String>, parameters: I, body: Node) -> Result<Self, ClauseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(name.into(), parameters, Some(body))
    }

    /// Declare a rule whose body is emitted verbatim.
    pub fn raw_rule<I, S>(
        name: impl Into<String>,
        parameters: I,
        body: impl Into<String>,
    ) -> Result<Self, ClauseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(
            name.into(),
            parameters,
            Some(Node::Literal(Literal::Str(body.into()))),
        )
    }

    fn build<I, S>(name: String, parameters: I, body: Option<Node>) -> Result<Self, ClauseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if name.trim().is_empty() {
            return Err(ClauseError::EmptyName);
        }

        let mut seen = Vec::new();
        for parameter in parameters {
            let parameter = parameter.into();
            if parameter.is_empty() {
                return Err(ClauseError::EmptyName);
            }
            if seen.contains(&parameter) {
                return Err(ClauseError::DuplicateParameter(parameter));
            }
            seen.push(parameter);
        }

        Ok(Self {
            name,
            parameters: seen,
            locals: Vec::new(),
            body,
        })
    }

    /// Introduce a local alias for an engine variable, usable in the body.
    pub fn bind(mut self, alias: impl Into<String>, variable: impl Into<String>) -> Self {
        self.locals.push((alias.into(), variable.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn body(&self) -> Option<&Node> {
        self.body.as_ref()
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_none()
    }

    /// The binding table in effect for this declaration's body.
    pub fn bindings(&self) -> Bindings {
        let mut bindings = Bindings::from_parameters(&self.parameters);
        for (alias, variable) in &self.locals {
            bindings.bind(alias.clone(), variable.clone());
        }
        bindings
    }

    /// Compile to clause text.
    ///
    /// A fact compiles to its template with one placeholder variable per
    /// parameter; use [`Declaration::fact_instance`] for concrete facts.
    pub fn compile(&self) -> Result<Clause, ClauseError> {
        let bindings = self.bindings();
        let head = self.head(&bindings)?;

        let Some(body) = &self.body else {
            return Ok(Clause(format!("{}.", head)));
        };

        let body = match body {
            Node::Literal(Literal::Str(raw)) => {
                let raw = raw.trim_end();
                raw.strip_suffix('.').unwrap_or(raw).to_string()
            }
            Node::Literal(_) | Node::Variable(_) => {
                return Err(ClauseError::UnsupportedNode {
                    context: "rule body",
                    kind: body.kind(),
                });
            }
            node => compile_goal(node, &bindings)?,
        };

        Ok(Clause(format!("{} :- {}.", head, body)))
    }

    /// A concrete fact for this template, e.g. `person("andrew", 12).`.
    pub fn fact_instance(&self, args: &[Literal]) -> Result<Clause, ClauseError> {
        if args.len() != self.arity() {
            return Err(ClauseError::ArityMismatch {
                name: self.name.clone(),
                expected: self.arity(),
                actual: args.len(),
            });
        }
        let args: Vec<String> = args.iter().map(Literal::to_prolog).collect();
        Ok(Clause(format!("{}.", render_head(&self.name, &args))))
    }

    fn head(&self, bindings: &Bindings) -> Result<String, ClauseError> {
        let args = self
            .parameters
            .iter()
            .map(|p| bindings.resolve(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(render_head(&self.name, &args))
    }
}

fn render_head(name: &str, args: &[String]) -> String {
    if args.is_empty() {
        name.to_string()
    } else {
        format!("{}({})", name, args.join(", "))
    }
}

/// One pending emission in the goal renderer.
enum Emit<'a> {
    Text(&'static str),
    Node(&'a Node, Option<BoolOp>),
}

/// Compile a goal tree (call, comparison, or combinator) to text without a
/// trailing terminator.
pub fn compile_goal(node: &Node, bindings: &Bindings) -> Result<String, ClauseError> {
    let mut out = String::new();
    let mut stack = vec![Emit::Node(node, None)];

    while let Some(item) = stack.pop() {
        match item {
            Emit::Text(text) => out.push_str(text),
            Emit::Node(Node::Call(call), _) => out.push_str(&compile_call(call, bindings)?),
            Emit::Node(Node::Comparison(cmp), _) => {
                out.push_str(&compile_comparison(cmp, bindings)?)
            }
            Emit::Node(Node::Combinator(expr), enclosing) => {
                let steps = flatten(expr)?;
                // `;` binds looser than `,`, so a disjunction inside a
                // conjunction keeps its own parentheses.
                let grouped = enclosing == Some(BoolOp::And) && expr.op == BoolOp::Or;
                if grouped {
                    stack.push(Emit::Text(")"));
                }
                for step in steps.into_iter().rev() {
                    stack.push(Emit::Node(step.node, Some(step.enclosing)));
                    if let Some(op) = step.preceded_by {
                        stack.push(Emit::Text(op.separator()));
                    }
                }
                if grouped {
                    stack.push(Emit::Text("("));
                }
            }
            Emit::Node(other @ (Node::Literal(_) | Node::Variable(_)), _) => {
                return Err(ClauseError::UnsupportedNode {
                    context: "goal",
                    kind: other.kind(),
                });
            }
        }
    }

    Ok(out)
}

/// An operand of a flattened combinator.
struct Step<'a> {
    /// Operator between the previous operand and this one.
    preceded_by: Option<BoolOp>,
    /// Operator of the group the operand was spliced out of.
    enclosing: BoolOp,
    node: &'a Node,
}

/// Flatten nested groups that need no parentheses into one operand sequence.
///
/// Same-operator groups and conjunctions are spliced in place; a disjunction
/// nested in a conjunction stays a single operand.
fn flatten(expr: &BoolExpr) -> Result<Vec<Step<'_>>, ClauseError> {
    let mut steps = Vec::new();
    let mut worklist: Vec<(Option<BoolOp>, BoolOp, &Node)> = Vec::new();
    push_operands(&mut worklist, None, expr)?;

    while let Some((preceded_by, enclosing, node)) = worklist.pop() {
        match node {
            Node::Combinator(inner) if inner.op == BoolOp::And || enclosing == BoolOp::Or => {
                push_operands(&mut worklist, preceded_by, inner)?;
            }
            node => steps.push(Step {
                preceded_by,
                enclosing,
                node,
            }),
        }
    }

    Ok(steps)
}

fn push_operands<'a>(
    worklist: &mut Vec<(Option<BoolOp>, BoolOp, &'a Node)>,
    preceded_by: Option<BoolOp>,
    expr: &'a BoolExpr,
) -> Result<(), ClauseError> {
    if expr.operands.is_empty() {
        return Err(ClauseError::EmptyCombinator);
    }
    for (i, operand) in expr.operands.iter().enumerate().rev() {
        let before = if i == 0 { preceded_by } else { Some(expr.op) };
        worklist.push((before, expr.op, operand));
    }
    Ok(())
}

fn compile_call(call: &Call, bindings: &Bindings) -> Result<String, ClauseError> {
    if call.name.trim().is_empty() {
        return Err(ClauseError::EmptyName);
    }
    let args = call
        .args
        .iter()
        .map(|arg| match arg {
            Node::Variable(alias) => bindings.resolve(alias),
            Node::Literal(literal) => Ok(literal.to_prolog()),
            other => Err(ClauseError::UnsupportedNode {
                context: "call argument",
                kind: other.kind(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(render_head(&call.name, &args))
}

fn compile_comparison(cmp: &Comparison, bindings: &Bindings) -> Result<String, ClauseError> {
    let left = compile_operand(&cmp.left, bindings)?;
    let right = compile_operand(&cmp.right, bindings)?;
    Ok(format!("{} {} {}", left, cmp.op.as_str(), right))
}

fn compile_operand(node: &Node, bindings: &Bindings) -> Result<String, ClauseError> {
    match node {
        Node::Literal(literal) => Ok(literal.to_prolog()),
        Node::Variable(alias) => bindings.resolve(alias),
        Node::Call(call) => compile_call(call, bindings),
        Node::Comparison(_) | Node::Combinator(_) => Err(ClauseError::UnsupportedNode {
            context: "comparison operand",
            kind: node.kind(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn person_and_old(op: BoolOp) -> Declaration {
        let body = Node::all(
            op,
            [
                Node::call("person", [Node::var("name"), Node::var("x")]),
                Node::var("x").gt(60),
            ],
        );
        Declaration::rule("old", ["name"], body).unwrap().bind("x", "X")
    }

    #[test]
    fn test_compile_fact_template() {
        let decl = Declaration::fact("foo", ["a", "b"]).unwrap();
        assert_eq!(decl.compile().unwrap().as_str(), "foo(A, B).");
    }

    #[test]
    fn test_fact_instance() {
        let decl = Declaration::fact("person", ["name", "age"]).unwrap();
        let fact = decl
            .fact_instance(&[Literal::from("andrew"), Literal::from(12)])
            .unwrap();
        assert_eq!(fact.as_str(), r#"person("andrew", 12)."#);
    }

    #[test]
    fn test_fact_instance_arity_mismatch() {
        let decl = Declaration::fact("person", ["name", "age"]).unwrap();
        let err = decl.fact_instance(&[Literal::from("andrew")]).unwrap_err();
        assert_eq!(
            err,
            ClauseError::ArityMismatch {
                name: "person".to_string(),
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn test_compile_rule_with_conjunction() {
        let clause = person_and_old(BoolOp::And).compile().unwrap();
        insta::assert_snapshot!(clause.as_str(), @"old(NAME) :- person(NAME, X), X > 60.");
    }

    #[test]
    fn test_compile_rule_with_disjunction() {
        let clause = person_and_old(BoolOp::Or).compile().unwrap();
        assert_eq!(clause.as_str(), "old(NAME) :- person(NAME, X); X > 60.");
    }

    #[test]
    fn test_compile_rule_single_dependency() {
        let decl = Declaration::rule(
            "loves",
            ["a", "b"],
            Node::call("likes", [Node::var("b"), Node::var("a")]),
        )
        .unwrap();
        assert_eq!(decl.compile().unwrap().as_str(), "loves(A, B) :- likes(B, A).");
    }

    #[test]
    fn test_compile_raw_rule_strips_existing_terminator() {
        let decl = Declaration::raw_rule("adult", ["p"], "person(P, Age), Age >= 18.").unwrap();
        assert_eq!(
            decl.compile().unwrap().as_str(),
            "adult(P) :- person(P, Age), Age >= 18."
        );
    }

    #[test]
    fn test_rebound_parameter_used_in_head_and_body() {
        let decl = Declaration::rule("named", ["name"], Node::call("person", [Node::var("name")]))
            .unwrap()
            .bind("name", "Who");
        assert_eq!(decl.compile().unwrap().as_str(), "named(Who) :- person(Who).");
    }

    #[test]
    fn test_zero_arity_rule() {
        let decl = Declaration::rule("ready", Vec::<String>::new(), Node::call("init", []))
            .unwrap();
        assert_eq!(decl.compile().unwrap().as_str(), "ready :- init.");
    }

    #[test]
    fn test_nested_same_operator_groups_flatten() {
        let body = Node::all(
            BoolOp::And,
            [
                Node::all(BoolOp::And, [Node::call("a", []), Node::call("b", [])]),
                Node::all(BoolOp::And, [Node::call("c", []), Node::call("d", [])]),
            ],
        );
        let decl = Declaration::rule("p", Vec::<String>::new(), body).unwrap();
        assert_eq!(decl.compile().unwrap().as_str(), "p :- a, b, c, d.");
    }

    #[test]
    fn test_conjunction_inside_disjunction_needs_no_parens() {
        let body = Node::call("a", [])
            .or(Node::call("b", []).and(Node::call("c", [])))
            .or(Node::call("d", []));
        let decl = Declaration::rule("p", Vec::<String>::new(), body).unwrap();
        assert_eq!(decl.compile().unwrap().as_str(), "p :- a; b, c; d.");
    }

    #[test]
    fn test_disjunction_inside_conjunction_is_parenthesized() {
        let body = Node::call("a", [])
            .or(Node::call("b", []))
            .and(Node::call("c", []));
        let decl = Declaration::rule("p", Vec::<String>::new(), body).unwrap();
        assert_eq!(decl.compile().unwrap().as_str(), "p :- (a; b), c.");
    }

    #[test]
    fn test_last_operand_ending_in_separator_is_preserved() {
        let body = Node::call("tag", [Node::var("t")]).and(Node::var("t").equals(Node::lit("a, ")));
        let decl = Declaration::rule("tagged", ["t"], body).unwrap();
        assert_eq!(
            decl.compile().unwrap().as_str(),
            r#"tagged(T) :- tag(T), T = "a, "."#
        );
    }

    #[test]
    fn test_comparison_with_call_operand() {
        let body = Node::compare(Node::var("x"), crate::CompareOp::NotEq, Node::call("f", [Node::lit(1)]));
        let decl = Declaration::rule("g", ["x"], body).unwrap();
        assert_eq!(decl.compile().unwrap().as_str(), r"g(X) :- X \= f(1).");
    }

    #[test]
    fn test_unbound_variable_is_rejected() {
        let decl = Declaration::rule("p", ["a"], Node::call("q", [Node::var("b")])).unwrap();
        assert_eq!(
            decl.compile().unwrap_err(),
            ClauseError::UnboundVariable("b".to_string())
        );
    }

    #[test]
    fn test_duplicate_parameter_is_rejected() {
        let err = Declaration::fact("p", ["a", "a"]).unwrap_err();
        assert_eq!(err, ClauseError::DuplicateParameter("a".to_string()));
    }

    #[test]
    fn test_variable_body_is_rejected() {
        let decl = Declaration::rule("p", ["a"], Node::var("a")).unwrap();
        assert!(matches!(
            decl.compile(),
            Err(ClauseError::UnsupportedNode {
                context: "rule body",
                kind: "variable"
            })
        ));
    }

    #[test]
    fn test_call_argument_must_be_variable_or_literal() {
        let body = Node::call("p", [Node::call("q", [])]);
        let decl = Declaration::rule("r", Vec::<String>::new(), body).unwrap();
        assert!(matches!(
            decl.compile(),
            Err(ClauseError::UnsupportedNode {
                context: "call argument",
                ..
            })
        ));
    }

    #[test]
    fn test_combinator_operand_literal_is_rejected() {
        let body = Node::call("p", []).and(Node::lit(3));
        let decl = Declaration::rule("r", Vec::<String>::new(), body).unwrap();
        assert!(matches!(
            decl.compile(),
            Err(ClauseError::UnsupportedNode { context: "goal", kind: "literal" })
        ));
    }

    #[test]
    fn test_empty_combinator_is_rejected() {
        let decl = Declaration::rule("r", Vec::<String>::new(), Node::all(BoolOp::And, []))
            .unwrap();
        assert_eq!(decl.compile().unwrap_err(), ClauseError::EmptyCombinator);
    }

    #[test]
    fn test_implicit_bindings_upper_case_unknown_aliases() {
        let goal = Node::call("person", [Node::var("x"), Node::lit("andrew")]);
        let text = compile_goal(&goal, &Bindings::implicit()).unwrap();
        assert_eq!(text, r#"person(X, "andrew")"#);
    }

    #[test]
    fn test_clause_from_text_adds_terminator() {
        assert_eq!(Clause::from_text("a :- b").as_str(), "a :- b.");
        assert_eq!(Clause::from_text("a :- b.  ").without_terminator(), "a :- b");
    }
}
