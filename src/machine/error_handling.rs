// src/machine/error_handling.rs
//! Error types for compilation and execution.
//!
//! Logical failure is not represented here: a failed unification or clause
//! miss propagates through backtracking and simply yields fewer answers.
//! These enums cover the static compile errors and the runtime operational
//! errors that escape the instruction loop.

use thiserror::Error;

use crate::machine::term::Functor;

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("clause head must be an atom or struct, found variable {0}")]
    HeadIsVariable(String),
    #[error("builtin {0}/{1} referenced with the wrong arity")]
    BuiltinArity(String, usize),
    #[error("meta-call needs a goal argument")]
    EmptyMetaCall,
    #[error("attribute goal {0} expects an atom package name")]
    BadAttributePackage(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum MachineError {
    #[error("register X{0} is uninitialized")]
    UninitializedRegister(usize),
    #[error("permanent slot Y{0} is uninitialized")]
    UninitializedSlot(usize),
    #[error("no environment is active")]
    EnvironmentMissing,
    #[error("unknown predicate {0}")]
    UnknownPredicate(Functor),
    #[error("unknown builtin {0}")]
    UnknownBuiltin(Functor),
    #[error("meta-call target is not callable: {0}")]
    BadMetaCall(String),
    #[error("step budget of {0} exceeded")]
    StepBudgetExceeded(u64),
    #[error("stack depth limit of {0} exceeded")]
    DepthLimitExceeded(usize),
    #[error("unknown attribute package {0}")]
    UnknownAttributePackage(String),
    #[error("put_attr on a bound term: {0}")]
    AttributeOnBoundTerm(String),
    #[error("attribute handler for {0} failed: {1}")]
    AttributeHandler(String, String),
    #[error("instruction pointer ran past the end of {0}")]
    CodeOutOfBounds(String),
    #[error("unify instruction outside a struct context")]
    NoActiveStruct,
}
