//! Error types for the session protocol.

use horn_clause::ClauseError;
use thiserror::Error;

/// Errors that can occur while talking to the engine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine could not be started or never showed its prompt.
    #[error("engine unavailable: {path}: {reason}")]
    ExecutableNotFound { path: String, reason: String },

    /// The engine rejected a clause or consulted file.
    #[error("error while compiling {clause:?}, engine said:\n{diagnostic}")]
    Compile { clause: String, diagnostic: String },

    /// The engine reported an error while running a query.
    #[error("error while executing query {query:?}, engine said:\n{diagnostic}")]
    Query { query: String, diagnostic: String },

    /// The engine did not answer within the configured timeout.
    #[error("query {query:?} timed out after {timeout_ms}ms")]
    QueryTimeout { query: String, timeout_ms: u64 },

    /// The engine closed its output, usually because the process died.
    #[error("engine exited during {during}")]
    EngineExited { during: String },

    /// The caller asked for something the query cannot provide.
    #[error("query shape error: {0}")]
    Shape(String),

    /// The clause compiler rejected a declaration or goal.
    #[error("clause compilation failed: {0}")]
    Clause(#[from] ClauseError),

    /// Engine output the decoder could not read.
    #[error("cannot decode engine output {text:?}: {reason}")]
    Decode { text: String, reason: String },

    /// A result row did not fit the requested record type.
    #[error("result row does not match record type: {0}")]
    Record(#[from] serde_json::Error),

    /// Invalid session configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error on the engine channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this error is caller misuse detected before contacting the engine.
    pub fn is_shape_error(&self) -> bool {
        matches!(self, SessionError::Shape(_) | SessionError::Clause(_))
    }
}
