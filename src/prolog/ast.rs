// src/prolog/ast.rs
//! Source-level terms and clauses as delivered by the parser.
//!
//! Variable identity is by name and scoped to a single clause; two `Var`
//! with the same name in one clause denote the same variable, and clauses
//! never share variables. Lists arrive as nested `./2` structs terminated
//! by the atom `[]`.

use std::fmt;

/// Functor name for list cells.
pub const PAIR: &str = ".";
/// The empty-list atom.
pub const NIL: &str = "[]";

/// A source-level term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// A nullary constant.
    Atom(String),
    /// A named logic variable.
    Var(String),
    /// A compound term: functor name plus arguments.
    Struct(String, Vec<Term>),
}

impl Term {
    pub fn atom(name: impl Into<String>) -> Term {
        Term::Atom(name.into())
    }

    pub fn var(name: impl Into<String>) -> Term {
        Term::Var(name.into())
    }

    pub fn compound(name: impl Into<String>, args: Vec<Term>) -> Term {
        Term::Struct(name.into(), args)
    }

    pub fn nil() -> Term {
        Term::Atom(NIL.to_string())
    }

    /// Builds a `./2` chain from `items`, ended by `tail` (or `[]`).
    pub fn list(items: Vec<Term>, tail: Option<Term>) -> Term {
        let mut acc = tail.unwrap_or_else(Term::nil);
        for item in items.into_iter().rev() {
            acc = Term::Struct(PAIR.to_string(), vec![item, acc]);
        }
        acc
    }

    /// The functor of this term, if it has one. Atoms are `name/0`.
    pub fn functor(&self) -> Option<(&str, usize)> {
        match self {
            Term::Atom(name) => Some((name, 0)),
            Term::Struct(name, args) => Some((name, args.len())),
            Term::Var(_) => None,
        }
    }

    /// True for the anonymous variable `_`. Each textual `_` occurrence is a
    /// distinct fresh variable; `_Name` shares as usual.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Term::Var(name) if name == "_")
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(name) => write!(f, "{}", name),
            Term::Var(name) => write!(f, "{}", name),
            Term::Struct(name, args) if name == PAIR && args.len() == 2 => {
                write!(f, "[")?;
                write_list(f, &args[0], &args[1])?;
                write!(f, "]")
            }
            Term::Struct(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, head: &Term, tail: &Term) -> fmt::Result {
    write!(f, "{}", head)?;
    match tail {
        Term::Atom(name) if name == NIL => Ok(()),
        Term::Struct(name, args) if name == PAIR && args.len() == 2 => {
            write!(f, ", ")?;
            write_list(f, &args[0], &args[1])
        }
        other => write!(f, "|{}", other),
    }
}

/// A clause: a fact when the body is empty, a rule otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub head: Term,
    pub body: Vec<Term>,
}

impl Clause {
    pub fn fact(head: Term) -> Clause {
        Clause { head, body: Vec::new() }
    }

    pub fn rule(head: Term, body: Vec<Term>) -> Clause {
        Clause { head, body }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        if !self.body.is_empty() {
            write!(f, " :- ")?;
            for (i, goal) in self.body.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", goal)?;
            }
        }
        write!(f, ".")
    }
}

/// A parsed source file: the clause database plus any `?-` queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub clauses: Vec<Clause>,
    pub queries: Vec<Vec<Term>>,
}
