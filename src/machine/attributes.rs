// src/machine/attributes.rs
//! Attributed variables: the attribute table, package hooks, and the
//! unification frames that decouple attribute propagation from the core
//! unifier.

use std::collections::HashMap;

use crate::machine::error_handling::MachineError;
use crate::machine::term::{Cell, RefId};

/// Attributes of one ref, as `(package, value)` pairs in insertion order.
/// Hooks run in this order when the ref is bound.
pub type AttributeList = Vec<(String, Cell)>;

/// All attributed refs. Cloned into choice points and restored wholesale on
/// backtrack, which keeps attribute mutation trivially undoable.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    entries: HashMap<RefId, AttributeList>,
}

impl AttributeTable {
    pub fn get(&self, id: RefId) -> Option<&AttributeList> {
        self.entries.get(&id)
    }

    pub fn get_value(&self, id: RefId, pkg: &str) -> Option<&Cell> {
        self.entries
            .get(&id)?
            .iter()
            .find(|(p, _)| p == pkg)
            .map(|(_, value)| value)
    }

    /// Sets `pkg`'s attribute on `id`, replacing an existing value in place
    /// so insertion order is kept.
    pub fn put(&mut self, id: RefId, pkg: &str, value: Cell) {
        let list = self.entries.entry(id).or_default();
        match list.iter_mut().find(|(p, _)| p == pkg) {
            Some(slot) => slot.1 = value,
            None => list.push((pkg.to_string(), value)),
        }
    }

    /// Removes `pkg`'s attribute from `id`; succeeds whether or not it was
    /// present.
    pub fn delete(&mut self, id: RefId, pkg: &str) {
        if let Some(list) = self.entries.get_mut(&id) {
            list.retain(|(p, _)| p != pkg);
            if list.is_empty() {
                self.entries.remove(&id);
            }
        }
    }

    /// Removes and returns all attributes of `id`.
    pub fn take(&mut self, id: RefId) -> Option<AttributeList> {
        self.entries.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RefId, &AttributeList)> {
        self.entries.iter()
    }
}

/// Queued when the unifier binds an attributed ref. The per-package hooks
/// run between instruction boundaries, in attribute insertion order.
#[derive(Debug, Clone)]
pub struct UnificationFrame {
    pub attributed_ref: RefId,
    pub binding_value: Cell,
    /// Bindings made by the unification that produced this frame.
    pub bindings: Vec<(RefId, Cell)>,
    pub attributes: AttributeList,
}

/// A per-package attribute handler. Returning `Ok(false)` is a logical
/// failure that triggers backtracking; an `Err` surfaces or backtracks
/// depending on machine configuration.
pub type AttrHook = fn(
    &mut crate::machine::core::Machine<'_>,
    &UnificationFrame,
) -> Result<bool, MachineError>;
