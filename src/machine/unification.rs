// src/machine/unification.rs
//! Structural unification over the cell graph.
//!
//! A worklist replaces recursion so deep terms cannot overflow the stack.
//! Binding is conditional: refs that predate the newest choice point are
//! trailed there (see `Machine::bind`); younger refs need no trail entry.
//! There is no occurs check, so unification can build cyclic graphs; the
//! walk and render paths tolerate them.

use std::cmp::Ordering;
use std::collections::HashSet;

use log::trace;

use crate::machine::core::Machine;
use crate::machine::term::{Cell, StructId};

impl<'a> Machine<'a> {
    /// Unifies two cells, binding refs as needed. Returns false on
    /// mismatch; bindings already made stay in place and are undone by the
    /// trail on backtrack.
    pub fn unify(&mut self, a: &Cell, b: &Cell) -> bool {
        let mut work: Vec<(Cell, Cell)> = vec![(a.clone(), b.clone())];
        while let Some((a, b)) = work.pop() {
            let a = self.heap.walk(&a);
            let b = self.heap.walk(&b);
            trace!("unify {} with {}", self.heap.render(&a), self.heap.render(&b));
            match (a, b) {
                (Cell::Atom(x), Cell::Atom(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Cell::Ref(x), Cell::Ref(y)) => {
                    match x.cmp(&y) {
                        Ordering::Equal => {}
                        // The younger ref binds to the older one.
                        Ordering::Less => self.bind(y, Cell::Ref(x)),
                        Ordering::Greater => self.bind(x, Cell::Ref(y)),
                    }
                }
                (Cell::Ref(x), other) | (other, Cell::Ref(x)) => {
                    self.bind(x, other);
                }
                (Cell::Struct(x), Cell::Struct(y)) => {
                    if x == y {
                        continue;
                    }
                    let fx = self.heap.struct_functor(x);
                    let fy = self.heap.struct_functor(y);
                    if fx != fy {
                        return false;
                    }
                    // Left-to-right: push slot pairs in reverse so the
                    // first slot is unified first.
                    let xs = self.heap.struct_data(x).slots.clone();
                    let ys = self.heap.struct_data(y).slots.clone();
                    for pair in xs.into_iter().zip(ys).rev() {
                        work.push(pair);
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Structural identity without binding, as used by `\==`. Two unbound
    /// refs are identical only when they are the same ref.
    pub fn cells_identical(&self, a: &Cell, b: &Cell) -> bool {
        let mut work = vec![(a.clone(), b.clone())];
        let mut visited: HashSet<(StructId, StructId)> = HashSet::new();
        while let Some((a, b)) = work.pop() {
            match (self.heap.walk(&a), self.heap.walk(&b)) {
                (Cell::Atom(x), Cell::Atom(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Cell::Ref(x), Cell::Ref(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Cell::Struct(x), Cell::Struct(y)) => {
                    if x == y || !visited.insert((x, y)) {
                        continue;
                    }
                    let dx = self.heap.struct_data(x);
                    let dy = self.heap.struct_data(y);
                    if dx.functor != dy.functor {
                        return false;
                    }
                    for pair in dx.slots.iter().cloned().zip(dy.slots.iter().cloned()) {
                        work.push(pair);
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Standard order of terms: unbound refs (by age) before atoms (by
    /// name) before structs (by arity, then name, then arguments).
    pub fn compare_cells(&self, a: &Cell, b: &Cell) -> Ordering {
        self.compare_depth(a, b, crate::machine::term::RENDER_DEPTH)
    }

    fn compare_depth(&self, a: &Cell, b: &Cell, depth: usize) -> Ordering {
        if depth == 0 {
            return Ordering::Equal;
        }
        match (self.heap.walk(a), self.heap.walk(b)) {
            (Cell::Ref(x), Cell::Ref(y)) => x.cmp(&y),
            (Cell::Ref(_), _) => Ordering::Less,
            (_, Cell::Ref(_)) => Ordering::Greater,
            (Cell::Atom(x), Cell::Atom(y)) => x.cmp(&y),
            (Cell::Atom(_), Cell::Struct(_)) => Ordering::Less,
            (Cell::Struct(_), Cell::Atom(_)) => Ordering::Greater,
            (Cell::Struct(x), Cell::Struct(y)) => {
                if x == y {
                    return Ordering::Equal;
                }
                let dx = self.heap.struct_data(x);
                let dy = self.heap.struct_data(y);
                dx.functor
                    .arity
                    .cmp(&dy.functor.arity)
                    .then_with(|| dx.functor.name.cmp(&dy.functor.name))
                    .then_with(|| {
                        let xs = dx.slots.clone();
                        let ys = dy.slots.clone();
                        for (sa, sb) in xs.iter().zip(ys.iter()) {
                            let ord = self.compare_depth(sa, sb, depth - 1);
                            if ord != Ordering::Equal {
                                return ord;
                            }
                        }
                        Ordering::Equal
                    })
            }
        }
    }
}
