//! Clause compiler for SWI-Prolog.
//!
//! This crate provides:
//! - A small expression-tree IR for predicate bodies
//! - Compilation of predicate declarations to fact and rule clauses
//! - Goal compilation for ad-hoc queries

mod compiler;
mod error;
pub mod ir;

pub use compiler::{Bindings, Clause, Declaration, compile_goal};
pub use error::ClauseError;
pub use ir::{BoolExpr, BoolOp, Call, CompareOp, Comparison, Literal, Node};
