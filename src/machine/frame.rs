// src/machine/frame.rs
//! Environment frames for permanent variables.

use crate::machine::database::CodePtr;
use crate::machine::term::Cell;

/// A stack frame created by `allocate`. Holds the permanent variables of
/// one clause activation and the continuation to restore on `deallocate`.
/// Frames live in an arena; `prev` is the index of the caller's frame.
#[derive(Debug, Clone)]
pub struct Environment {
    pub prev: Option<usize>,
    pub continuation: Option<CodePtr>,
    pub slots: Vec<Option<Cell>>,
}

impl Environment {
    pub fn new(prev: Option<usize>, continuation: Option<CodePtr>, slots: usize) -> Environment {
        Environment { prev, continuation, slots: vec![None; slots] }
    }
}
