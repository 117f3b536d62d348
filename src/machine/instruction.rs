// src/machine/instruction.rs
//! The abstract instruction set.
//!
//! Operands are compile-time values: functors, atom names, and addresses.
//! Choice points are created at call time from the first-argument index, so
//! there is no `try_me_else` family and no `switch_on_*` instruction; the
//! try/retry/trust discipline lives on the choice-point stack instead.

use std::fmt;

use crate::machine::term::Functor;

/// A compile-time-assigned location: temporary register `X(i)` or permanent
/// environment slot `Y(i)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addr {
    X(usize),
    Y(usize),
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::X(i) => write!(f, "X{}", i),
            Addr::Y(i) => write!(f, "Y{}", i),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Head matching.
    GetVar { reg: usize, addr: Addr },
    GetVal { reg: usize, addr: Addr },
    GetAtom { reg: usize, name: String },
    GetStruct { reg: usize, functor: Functor },
    GetPair { reg: usize },
    // Struct argument read/write; meaning depends on the machine mode.
    UnifyVar { addr: Addr },
    UnifyVal { addr: Addr },
    UnifyAtom { name: String },
    UnifyVoid { count: usize },
    // Goal argument building.
    PutVar { reg: usize, addr: Addr },
    PutVal { reg: usize, addr: Addr },
    PutAtom { reg: usize, name: String },
    PutStruct { reg: usize, functor: Functor },
    PutPair { reg: usize },
    // Control.
    Call { functor: Functor },
    Execute { functor: Functor },
    Proceed,
    Allocate { slots: usize },
    Deallocate,
    // Builtins and meta-calls.
    Builtin { name: String, args: Vec<Addr> },
    CallMeta { goal: Addr, params: Vec<Addr> },
    ExecuteMeta { goal: Addr, params: Vec<Addr> },
    InlineUnify { left: Addr, right: Addr },
    // Attributed variables.
    PutAttr { pkg: String, var: Addr, attr: Addr },
    GetAttr { pkg: String, var: Addr, attr: Addr },
    DelAttr { pkg: String, var: Addr },
    ImportPkg { pkg: String },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::GetVar { reg, addr } => write!(f, "get_var X{}, {}", reg, addr),
            Instruction::GetVal { reg, addr } => write!(f, "get_val X{}, {}", reg, addr),
            Instruction::GetAtom { reg, name } => write!(f, "get_atom X{}, {}", reg, name),
            Instruction::GetStruct { reg, functor } => {
                write!(f, "get_struct X{}, {}", reg, functor)
            }
            Instruction::GetPair { reg } => write!(f, "get_pair X{}", reg),
            Instruction::UnifyVar { addr } => write!(f, "unify_var {}", addr),
            Instruction::UnifyVal { addr } => write!(f, "unify_val {}", addr),
            Instruction::UnifyAtom { name } => write!(f, "unify_atom {}", name),
            Instruction::UnifyVoid { count } => write!(f, "unify_void {}", count),
            Instruction::PutVar { reg, addr } => write!(f, "put_var X{}, {}", reg, addr),
            Instruction::PutVal { reg, addr } => write!(f, "put_val X{}, {}", reg, addr),
            Instruction::PutAtom { reg, name } => write!(f, "put_atom X{}, {}", reg, name),
            Instruction::PutStruct { reg, functor } => {
                write!(f, "put_struct X{}, {}", reg, functor)
            }
            Instruction::PutPair { reg } => write!(f, "put_pair X{}", reg),
            Instruction::Call { functor } => write!(f, "call {}", functor),
            Instruction::Execute { functor } => write!(f, "execute {}", functor),
            Instruction::Proceed => write!(f, "proceed"),
            Instruction::Allocate { slots } => write!(f, "allocate {}", slots),
            Instruction::Deallocate => write!(f, "deallocate"),
            Instruction::Builtin { name, args } => {
                write!(f, "builtin {}", name)?;
                for arg in args {
                    write!(f, ", {}", arg)?;
                }
                Ok(())
            }
            Instruction::CallMeta { goal, params } => {
                write!(f, "call_meta {}", goal)?;
                for p in params {
                    write!(f, ", {}", p)?;
                }
                Ok(())
            }
            Instruction::ExecuteMeta { goal, params } => {
                write!(f, "execute_meta {}", goal)?;
                for p in params {
                    write!(f, ", {}", p)?;
                }
                Ok(())
            }
            Instruction::InlineUnify { left, right } => {
                write!(f, "inline_unify {}, {}", left, right)
            }
            Instruction::PutAttr { pkg, var, attr } => {
                write!(f, "put_attr {}, {}, {}", pkg, var, attr)
            }
            Instruction::GetAttr { pkg, var, attr } => {
                write!(f, "get_attr {}, {}, {}", pkg, var, attr)
            }
            Instruction::DelAttr { pkg, var } => write!(f, "del_attr {}, {}", pkg, var),
            Instruction::ImportPkg { pkg } => write!(f, "import_pkg {}", pkg),
        }
    }
}
