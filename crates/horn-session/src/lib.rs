//! Interactive SWI-Prolog sessions.
//!
//! This crate provides:
//! - A prompt-delimited conversation with an engine subprocess
//! - Loading of compiled clauses and source files
//! - Boolean, streaming, and aggregate query forms
//! - Composable [`Query`] values with typed, lazily fetched results
//!
//! ```no_run
//! use horn_clause::{Declaration, Literal};
//! use horn_session::{Query, Session, SessionConfig};
//!
//! # async fn run() -> Result<(), horn_session::SessionError> {
//! let person = Declaration::fact("person", ["name", "age"])?;
//!
//! let mut session = Session::spawn(SessionConfig::from_env()).await?;
//! session.declare(person.fact_instance(&[Literal::from("andrew"), Literal::from(12)])?);
//! session.load_declarations().await?;
//!
//! let rows = Query::filter(&person, [("name", Literal::from("andrew"))])?
//!     .fetchall(&mut session)
//!     .await?;
//! assert_eq!(rows[0]["age"], 12);
//!
//! session.halt().await?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod config;
mod decode;
mod error;
mod query;
mod session;
pub mod syntax;

pub use config::{EXECUTABLE_ENV, SessionConfig, SessionConfigBuilder};
pub use decode::{Row, decode_aggregate, decode_row, decode_value};
pub use error::SessionError;
pub use query::{Fetch, Query, Strategy};
pub use session::{Answer, Session, SessionState, Solutions};
