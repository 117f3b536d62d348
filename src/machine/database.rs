// src/machine/database.rs
//! Compiled clauses, predicates, and first-argument indexing.
//!
//! The database is immutable once built; every interpreter instance borrows
//! it read-only. Clauses live in one flat pool and are addressed by index,
//! so code pointers stay `Copy`.

use std::collections::HashMap;

use log::debug;

use crate::machine::instruction::Instruction;
use crate::machine::term::{Cell, Functor, Heap};

/// Index into the database's clause pool.
pub type ClauseId = usize;

/// Where a code pointer lives: a database clause or the compiled query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseAddr {
    Db(ClauseId),
    Query,
}

/// An instruction address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePtr {
    pub clause: ClauseAddr,
    pub pos: usize,
}

impl CodePtr {
    pub fn entry(clause: ClauseAddr) -> CodePtr {
        CodePtr { clause, pos: 0 }
    }
}

/// The shape of a clause's first head argument, used to build the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstArg {
    /// Zero-arity predicate; there is no first argument to dispatch on.
    None,
    Var,
    Atom(String),
    Struct(Functor),
}

/// One compiled clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledClause {
    pub functor: Functor,
    /// Position of this clause within its predicate, for display.
    pub clause_pos: usize,
    pub code: Vec<Instruction>,
    pub num_registers: usize,
    pub num_perm_vars: usize,
    pub first_arg: FirstArg,
}

/// A run of consecutive clauses whose first arguments share a kind.
#[derive(Debug, Clone)]
pub enum Run {
    Var(Vec<ClauseId>),
    Const(ConstRun),
}

/// A constant run with its two second-level maps.
#[derive(Debug, Clone, Default)]
pub struct ConstRun {
    pub by_atom: HashMap<String, Vec<ClauseId>>,
    pub by_functor: HashMap<Functor, Vec<ClauseId>>,
    all: Vec<ClauseId>,
}

/// Two-level first-argument index: runs by kind, then atom/functor maps
/// within each constant run. Runs preserve source order.
#[derive(Debug, Clone, Default)]
pub struct FirstArgIndex {
    pub runs: Vec<Run>,
}

impl FirstArgIndex {
    fn build(clauses: &[(ClauseId, FirstArg)]) -> FirstArgIndex {
        let mut runs: Vec<Run> = Vec::new();
        for (id, first) in clauses {
            let is_var = matches!(first, FirstArg::Var | FirstArg::None);
            match (runs.last_mut(), is_var) {
                (Some(Run::Var(ids)), true) => ids.push(*id),
                (Some(Run::Const(run)), false) => run.insert(*id, first),
                (_, true) => runs.push(Run::Var(vec![*id])),
                (_, false) => {
                    let mut run = ConstRun::default();
                    run.insert(*id, first);
                    runs.push(Run::Const(run));
                }
            }
        }
        FirstArgIndex { runs }
    }
}

impl ConstRun {
    fn insert(&mut self, id: ClauseId, first: &FirstArg) {
        match first {
            FirstArg::Atom(name) => {
                self.by_atom.entry(name.clone()).or_default().push(id);
            }
            FirstArg::Struct(functor) => {
                self.by_functor.entry(functor.clone()).or_default().push(id);
            }
            FirstArg::Var | FirstArg::None => unreachable!("var clause in constant run"),
        }
        self.all.push(id);
    }
}

/// An ordered collection of clauses sharing a functor, plus its index.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub clause_ids: Vec<ClauseId>,
    pub index: FirstArgIndex,
}

/// The compiled program: a flat clause pool and the per-functor predicates.
#[derive(Debug, Clone, Default)]
pub struct Database {
    pub clauses: Vec<CompiledClause>,
    pub preds: HashMap<Functor, Predicate>,
}

impl Database {
    /// Adds compiled clauses and builds every predicate's index. Clause
    /// order within a predicate follows insertion order.
    pub fn build(clauses: Vec<CompiledClause>) -> Database {
        let mut db = Database { clauses, preds: HashMap::new() };
        let mut by_pred: HashMap<Functor, Vec<(ClauseId, FirstArg)>> = HashMap::new();
        let mut order: Vec<Functor> = Vec::new();
        for (id, clause) in db.clauses.iter().enumerate() {
            let entry = by_pred.entry(clause.functor.clone()).or_default();
            if entry.is_empty() {
                order.push(clause.functor.clone());
            }
            entry.push((id, clause.first_arg.clone()));
        }
        for functor in order {
            let Some(entries) = by_pred.remove(&functor) else {
                continue;
            };
            let clause_ids = entries.iter().map(|(id, _)| *id).collect();
            let index = FirstArgIndex::build(&entries);
            debug!("indexed {} with {} clause(s)", functor, entries.len());
            db.preds.insert(functor, Predicate { clause_ids, index });
        }
        db
    }

    pub fn predicate(&self, functor: &Functor) -> Option<&Predicate> {
        self.preds.get(functor)
    }

    pub fn clause(&self, id: ClauseId) -> &CompiledClause {
        &self.clauses[id]
    }

    /// Candidate clauses for a call, in source order, filtered by the first
    /// argument where its walked shape allows. An empty result means the
    /// call fails immediately.
    pub fn lookup(&self, functor: &Functor, heap: &Heap, first_arg: Option<&Cell>) -> Vec<ClauseId> {
        let Some(pred) = self.preds.get(functor) else {
            return Vec::new();
        };
        let walked = match first_arg {
            Some(cell) => heap.walk(cell),
            None => return pred.clause_ids.clone(),
        };
        match walked {
            Cell::Ref(_) => pred.clause_ids.clone(),
            Cell::Atom(name) => pred
                .index
                .runs
                .iter()
                .flat_map(|run| match run {
                    Run::Var(ids) => ids.clone(),
                    Run::Const(run) => run.by_atom.get(&name).cloned().unwrap_or_default(),
                })
                .collect(),
            Cell::Struct(id) => {
                let functor = heap.struct_functor(id).clone();
                pred.index
                    .runs
                    .iter()
                    .flat_map(|run| match run {
                        Run::Var(ids) => ids.clone(),
                        Run::Const(run) => {
                            run.by_functor.get(&functor).cloned().unwrap_or_default()
                        }
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(functor: Functor, pos: usize, first: FirstArg) -> CompiledClause {
        CompiledClause {
            functor,
            clause_pos: pos,
            code: vec![Instruction::Proceed],
            num_registers: 2,
            num_perm_vars: 0,
            first_arg: first,
        }
    }

    /// Run grouping example: f(X,_), f(a,_), f(g(_),_), f(a,_), f(Y,_),
    /// f(Z,_), f(g(b),_) yields [Var],[Const x3],[Var x2],[Const].
    #[test]
    fn runs_preserve_source_order() {
        let f = Functor::new("f", 2);
        let firsts = vec![
            FirstArg::Var,
            FirstArg::Atom("a".into()),
            FirstArg::Struct(Functor::new("g", 1)),
            FirstArg::Atom("a".into()),
            FirstArg::Var,
            FirstArg::Var,
            FirstArg::Struct(Functor::new("g", 1)),
        ];
        let clauses = firsts
            .into_iter()
            .enumerate()
            .map(|(i, first)| clause(f.clone(), i, first))
            .collect();
        let db = Database::build(clauses);
        let runs = &db.predicate(&f).unwrap().index.runs;
        assert_eq!(runs.len(), 4);
        assert!(matches!(&runs[0], Run::Var(ids) if ids == &vec![0]));
        assert!(matches!(&runs[1], Run::Const(run) if run.all == vec![1, 2, 3]));
        assert!(matches!(&runs[2], Run::Var(ids) if ids == &vec![4, 5]));
        assert!(matches!(&runs[3], Run::Const(run) if run.all == vec![6]));
    }

    #[test]
    fn atom_lookup_interleaves_var_runs() {
        let f = Functor::new("f", 2);
        let firsts = vec![
            FirstArg::Var,
            FirstArg::Atom("a".into()),
            FirstArg::Struct(Functor::new("g", 1)),
            FirstArg::Atom("a".into()),
            FirstArg::Var,
        ];
        let clauses = firsts
            .into_iter()
            .enumerate()
            .map(|(i, first)| clause(f.clone(), i, first))
            .collect();
        let db = Database::build(clauses);
        let heap = Heap::new();
        let candidates = db.lookup(&f, &heap, Some(&Cell::atom("a")));
        assert_eq!(candidates, vec![0, 1, 3, 4]);
    }

    #[test]
    fn unbound_first_argument_takes_all_clauses() {
        let f = Functor::new("f", 1);
        let clauses = vec![
            clause(f.clone(), 0, FirstArg::Atom("a".into())),
            clause(f.clone(), 1, FirstArg::Atom("b".into())),
        ];
        let db = Database::build(clauses);
        let mut heap = Heap::new();
        let r = heap.new_ref();
        let candidates = db.lookup(&f, &heap, Some(&Cell::Ref(r)));
        assert_eq!(candidates, vec![0, 1]);
    }

    #[test]
    fn struct_lookup_filters_to_matching_functor() {
        let f = Functor::new("f", 2);
        let firsts = vec![
            FirstArg::Atom("a".into()),
            FirstArg::Struct(Functor::new("g", 1)),
            FirstArg::Atom("a".into()),
            FirstArg::Atom("b".into()),
        ];
        let clauses = firsts
            .into_iter()
            .enumerate()
            .map(|(i, first)| clause(f.clone(), i, first))
            .collect();
        let db = Database::build(clauses);
        let mut heap = Heap::new();
        let s = heap.new_struct(Functor::new("g", 1));
        let r = heap.new_ref();
        heap.push_slot(s, Cell::Ref(r));
        let candidates = db.lookup(&f, &heap, Some(&Cell::Struct(s)));
        assert_eq!(candidates, vec![1]);
    }
}
