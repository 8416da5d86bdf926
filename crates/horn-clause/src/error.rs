//! Error types for clause compilation.

use thiserror::Error;

/// Errors raised while compiling a declaration or goal.
///
/// Every variant describes caller input the compiler cannot express; none of
/// them involve the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClauseError {
    /// A node kind that is not allowed where it appears.
    #[error("unsupported {kind} node in {context}")]
    UnsupportedNode {
        context: &'static str,
        kind: &'static str,
    },

    /// A variable alias with no entry in the binding table.
    #[error("variable `{0}` is not a parameter or local binding")]
    UnboundVariable(String),

    /// The same parameter name appears twice in one declaration.
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),

    /// Wrong number of arguments for a declared predicate.
    #[error("predicate `{name}` expects {expected} arguments, got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A parameter name given to a filter that the predicate does not declare.
    #[error("predicate `{name}` has no parameter `{parameter}`")]
    UnknownParameter { name: String, parameter: String },

    /// Predicate, call, or parameter name is empty.
    #[error("name cannot be empty")]
    EmptyName,

    /// A boolean combinator with no operands.
    #[error("boolean combinator has no operands")]
    EmptyCombinator,
}
