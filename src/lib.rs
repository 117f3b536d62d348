// src/lib.rs
//! warren: a Warren Abstract Machine for a Prolog-like logic language.
//!
//! Clauses compile to per-clause instruction streams with Debray-style
//! register allocation; a register machine executes queries with
//! depth-first backtracking, term unification with trailing, and
//! first-argument indexing.
//!
//! Modules:
//! - machine: compiler, database, unifier, and the interpreter.
//! - prolog: surface syntax parser and source AST.

pub mod machine;
pub mod prolog;

pub use machine::compiler::compile;
pub use machine::core::{Machine, MachineConfig, Solutions, Stats, Substitution};
pub use machine::database::Database;
pub use machine::error_handling::{CompileError, MachineError};
pub use prolog::ast::{Clause, Program, Term};
pub use prolog::parser::{parse_program, parse_query, ParseError};

/// Runs a query against a compiled database, yielding answers lazily.
pub fn solve<'a>(db: &'a Database, query: &[Term]) -> Result<Solutions<'a>, CompileError> {
    Ok(Solutions::new(Machine::new(db, query)?))
}

/// Like [`solve`], with explicit machine configuration.
pub fn solve_with<'a>(
    db: &'a Database,
    query: &[Term],
    config: MachineConfig,
) -> Result<Solutions<'a>, CompileError> {
    Ok(Solutions::new(Machine::with_config(db, query, config)?))
}
