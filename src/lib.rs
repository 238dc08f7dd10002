//! `mython` library crate.
//!
//! High-level layout:
//! - frontend: `lexer` + `parser` produce the executable AST (`statement`)
//! - shared runtime object/value model: `runtime`
//! - execution: AST-walk via `statement::execute_program`
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod statement;
pub mod token;
