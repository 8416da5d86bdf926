//! Composable queries with typed results.
//!
//! A [`Query`] is goal text plus optional pre-bound fields, which are merged
//! into every result row without asking the engine for them. Rows are
//! deserialized into the query's record type `T`, a [`Row`] by default.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use futures_util::Stream;
use horn_clause::{Bindings, ClauseError, Declaration, Literal, Node, compile_goal};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::decode::Row;
use crate::error::SessionError;
use crate::session::{Session, Solutions};
use crate::syntax::{free_variables, strip_terminator};

/// How [`Query::fetchall`] retrieves solutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One round trip per solution through the backtracking cursor.
    #[default]
    Streaming,
    /// Every solution at once, collected engine-side.
    Aggregate,
}

/// A goal to run against a session, yielding records of type `T`.
pub struct Query<T = Row> {
    text: String,
    preset: Row,
    strategy: Strategy,
    record: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            text: self.text.clone(),
            preset: self.preset.clone(),
            strategy: self.strategy,
            record: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("text", &self.text)
            .field("preset", &self.preset)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl<T> fmt::Display for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Query {
    /// A query from raw goal text; a trailing `.` is dropped.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            text: strip_terminator(&text).to_string(),
            preset: Row::new(),
            strategy: Strategy::default(),
            record: PhantomData,
        }
    }

    /// A query compiled from an expression tree. Variable aliases map to
    /// their upper-cased names.
    pub fn goal(node: &Node) -> Result<Self, SessionError> {
        Ok(Self::new(compile_goal(node, &Bindings::implicit())?))
    }

    /// Query a declared predicate with some parameters pre-bound.
    ///
    /// Bound parameters become literal arguments and pre-bound fields; the
    /// rest become free variables named after the parameter.
    ///
    /// ```
    /// use horn_clause::{Declaration, Literal};
    /// use horn_session::Query;
    ///
    /// let person = Declaration::fact("person", ["name", "age"]).unwrap();
    /// let query = Query::filter(&person, [("name", Literal::from("andrew"))]).unwrap();
    /// assert_eq!(query.text(), r#"person("andrew", AGE)"#);
    /// assert_eq!(query.preset()["name"], "andrew");
    /// ```
    pub fn filter<I, S>(declaration: &Declaration, bound: I) -> Result<Self, SessionError>
    where
        I: IntoIterator<Item = (S, Literal)>,
        S: Into<String>,
    {
        let mut values: HashMap<String, Literal> = HashMap::new();
        for (parameter, value) in bound {
            let parameter = parameter.into();
            if !declaration.parameters().contains(&parameter) {
                return Err(ClauseError::UnknownParameter {
                    name: declaration.name().to_string(),
                    parameter,
                }
                .into());
            }
            values.insert(parameter, value);
        }

        let mut preset = Row::new();
        let mut args = Vec::with_capacity(declaration.arity());
        for parameter in declaration.parameters() {
            match values.get(parameter) {
                Some(value) => {
                    preset.insert(parameter.clone(), value.to_json());
                    args.push(Node::lit(value.clone()));
                }
                None => args.push(Node::var(parameter.clone())),
            }
        }

        let call = Node::call(declaration.name(), args);
        let mut query = Self::goal(&call)?;
        query.preset = preset;
        Ok(query)
    }
}

impl<T> Query<T> {
    /// Goal text, without terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fields merged into every result row.
    pub fn preset(&self) -> &Row {
        &self.preset
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// The same query, deserializing rows into `U`.
    pub fn into_record<U>(self) -> Query<U> {
        Query {
            text: self.text,
            preset: self.preset,
            strategy: self.strategy,
            record: PhantomData,
        }
    }

    /// Conjunction: `<self>, <other>`.
    pub fn and<U>(self, other: Query<U>) -> Result<Self, SessionError> {
        let text = format!("{}, {}", group(&self.text), group(&other.text));
        self.compose(text, other.preset)
    }

    /// Disjunction: `<self>; <other>`.
    pub fn or<U>(self, other: Query<U>) -> Result<Self, SessionError> {
        let text = format!("{}; {}", self.text, other.text);
        self.compose(text, other.preset)
    }

    fn compose(mut self, text: String, preset: Row) -> Result<Self, SessionError> {
        for (key, value) in preset {
            match self.preset.get(&key) {
                Some(existing) if *existing != value => {
                    return Err(SessionError::Shape(format!(
                        "pre-bound field {key:?} is {existing} in one query and {value} in the other"
                    )));
                }
                _ => {
                    self.preset.insert(key, value);
                }
            }
        }
        self.text = text;
        Ok(self)
    }

    /// Reject pre-bound fields the engine would also bind, before any I/O.
    fn check_preset(&self) -> Result<(), SessionError> {
        for variable in free_variables(&self.text) {
            let key = variable.to_lowercase();
            if self.preset.contains_key(&key) {
                return Err(SessionError::Shape(format!(
                    "field {key:?} is pre-bound but also a free variable of {}",
                    self.text
                )));
            }
        }
        Ok(())
    }

    /// Does the goal have at least one solution?
    pub async fn prove(&self, session: &mut Session) -> Result<bool, SessionError> {
        session.ask(&self.text).await
    }
}

impl<T: DeserializeOwned> Query<T> {
    /// Start streaming solutions.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Shape` without contacting the engine when the
    /// goal has no free variables (use [`Query::prove`]) or a pre-bound field
    /// clashes with one.
    pub async fn fetch<'s>(&self, session: &'s mut Session) -> Result<Fetch<'s, T>, SessionError> {
        self.check_preset()?;
        let solutions = session.solutions(&self.text).await?;
        Ok(Fetch {
            solutions,
            preset: self.preset.clone(),
            record: PhantomData,
        })
    }

    /// Every solution, using the query's [`Strategy`].
    pub async fn fetchall(&self, session: &mut Session) -> Result<Vec<T>, SessionError> {
        match self.strategy {
            Strategy::Streaming => {
                let mut fetch = self.fetch(session).await?;
                let mut records = Vec::new();
                while let Some(record) = fetch.next().await? {
                    records.push(record);
                }
                Ok(records)
            }
            Strategy::Aggregate => {
                self.check_preset()?;
                let rows = session.collect(&self.text).await?;
                debug!(query = %self.text, rows = rows.len(), "aggregate fetch");
                rows.into_iter()
                    .map(|row| build_record(row, &self.preset))
                    .collect()
            }
        }
    }

    /// The first solution, if any. Backtracking is stopped afterwards, even
    /// when the first row does not fit `T`.
    pub async fn fetchone(&self, session: &mut Session) -> Result<Option<T>, SessionError> {
        let mut fetch = self.fetch(session).await?;
        let first = fetch.next().await;
        fetch.terminate().await?;
        first
    }
}

/// Wrap a disjunction so it stays one operand inside a conjunction.
fn group(text: &str) -> String {
    if text.contains(';') {
        format!("({})", text)
    } else {
        text.to_string()
    }
}

fn build_record<T: DeserializeOwned>(mut row: Row, preset: &Row) -> Result<T, SessionError> {
    for (key, value) in preset {
        row.insert(key.clone(), value.clone());
    }
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// A lazy, forward-only sequence of records from a streaming query.
#[derive(Debug)]
pub struct Fetch<'s, T> {
    solutions: Solutions<'s>,
    preset: Row,
    record: PhantomData<fn() -> T>,
}

impl<'s, T: DeserializeOwned> Fetch<'s, T> {
    /// The next record; `Ok(None)` once the solutions are exhausted.
    pub async fn next(&mut self) -> Result<Option<T>, SessionError> {
        match self.solutions.next_row().await? {
            Some(row) => build_record(row, &self.preset).map(Some),
            None => Ok(None),
        }
    }

    /// Stop backtracking and return the session to the prompt.
    pub async fn terminate(self) -> Result<(), SessionError> {
        self.solutions.terminate().await
    }

    /// Adapt into a [`Stream`]. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, SessionError>> {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut fetch = state?;
            match fetch.next().await {
                Ok(Some(record)) => Some((Ok(record), Some(fetch))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
