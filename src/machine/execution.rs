// src/machine/execution.rs
//! Per-instruction execution methods.
//!
//! Each instruction maps to one `execute_*` method on the machine, reached
//! through a single dispatch match. Methods return `Flow`: `Continue` for
//! ordinary progress, `Fail` to backtrack, `Answer` when `proceed` runs
//! with an empty continuation.

use log::debug;

use crate::machine::core::{ComplexArg, Flow, Machine, Mode};
use crate::machine::error_handling::MachineError;
use crate::machine::instruction::{Addr, Instruction};
use crate::machine::term::{Cell, Functor};

impl<'a> Machine<'a> {
    pub fn dispatch(&mut self, instr: &Instruction) -> Result<Flow, MachineError> {
        // Frames report the bindings made since the current instruction.
        self.unify_mark = self.bindings_seen.len();
        match instr {
            Instruction::GetVar { reg, addr } => self.execute_get_var(*reg, *addr),
            Instruction::GetVal { reg, addr } => self.execute_get_val(*reg, *addr),
            Instruction::GetAtom { reg, name } => self.execute_get_atom(*reg, name),
            Instruction::GetStruct { reg, functor } => self.execute_get_struct(*reg, functor),
            Instruction::GetPair { reg } => self.execute_get_struct(*reg, &Functor::pair()),
            Instruction::UnifyVar { addr } => self.execute_unify_var(*addr),
            Instruction::UnifyVal { addr } => self.execute_unify_val(*addr),
            Instruction::UnifyAtom { name } => self.execute_unify_atom(name),
            Instruction::UnifyVoid { count } => self.execute_unify_void(*count),
            Instruction::PutVar { reg, addr } => self.execute_put_var(*reg, *addr),
            Instruction::PutVal { reg, addr } => self.execute_put_val(*reg, *addr),
            Instruction::PutAtom { reg, name } => self.execute_put_atom(*reg, name),
            Instruction::PutStruct { reg, functor } => self.execute_put_struct(*reg, functor),
            Instruction::PutPair { reg } => self.execute_put_struct(*reg, &Functor::pair()),
            Instruction::Call { functor } => self.execute_call(functor, false),
            Instruction::Execute { functor } => self.execute_call(functor, true),
            Instruction::Proceed => self.execute_proceed(),
            Instruction::Allocate { slots } => self.execute_allocate(*slots),
            Instruction::Deallocate => self.execute_deallocate(),
            Instruction::Builtin { name, args } => self.execute_builtin(name, args),
            Instruction::CallMeta { goal, params } => self.execute_meta(*goal, params, false),
            Instruction::ExecuteMeta { goal, params } => self.execute_meta(*goal, params, true),
            Instruction::InlineUnify { left, right } => self.execute_inline_unify(*left, *right),
            Instruction::PutAttr { pkg, var, attr } => self.execute_put_attr(pkg, *var, *attr),
            Instruction::GetAttr { pkg, var, attr } => self.execute_get_attr(pkg, *var, *attr),
            Instruction::DelAttr { pkg, var } => self.execute_del_attr(pkg, *var),
            Instruction::ImportPkg { pkg } => self.execute_import_pkg(pkg),
        }
    }

    // Head matching.

    fn execute_get_var(&mut self, reg: usize, addr: Addr) -> Result<Flow, MachineError> {
        let cell = self.load(Addr::X(reg))?;
        self.store(addr, cell)?;
        Ok(Flow::Continue)
    }

    fn execute_get_val(&mut self, reg: usize, addr: Addr) -> Result<Flow, MachineError> {
        let left = self.load(Addr::X(reg))?;
        let right = self.load(addr)?;
        Ok(if self.unify(&left, &right) { Flow::Continue } else { Flow::Fail })
    }

    fn execute_get_atom(&mut self, reg: usize, name: &str) -> Result<Flow, MachineError> {
        let cell = self.load(Addr::X(reg))?;
        match self.heap.walk(&cell) {
            Cell::Atom(found) if found == name => Ok(Flow::Continue),
            Cell::Ref(id) => {
                self.bind(id, Cell::atom(name));
                Ok(Flow::Continue)
            }
            _ => Ok(Flow::Fail),
        }
    }

    fn execute_get_struct(&mut self, reg: usize, functor: &Functor) -> Result<Flow, MachineError> {
        let cell = self.load(Addr::X(reg))?;
        match self.heap.walk(&cell) {
            Cell::Struct(sid) if self.heap.struct_functor(sid) == functor => {
                self.mode = Mode::Read;
                self.complex_arg = ComplexArg { struct_id: Some(sid), index: 0 };
                Ok(Flow::Continue)
            }
            Cell::Ref(id) => {
                let sid = self.heap.new_struct(functor.clone());
                self.bind(id, Cell::Struct(sid));
                self.mode = Mode::Write;
                self.complex_arg = ComplexArg { struct_id: Some(sid), index: 0 };
                Ok(Flow::Continue)
            }
            _ => Ok(Flow::Fail),
        }
    }

    // Struct argument read/write.

    fn current_slot(&mut self) -> Result<(usize, usize), MachineError> {
        let sid = self.complex_arg.struct_id.ok_or(MachineError::NoActiveStruct)?;
        let index = self.complex_arg.index;
        self.complex_arg.index += 1;
        Ok((sid, index))
    }

    fn execute_unify_var(&mut self, addr: Addr) -> Result<Flow, MachineError> {
        let (sid, index) = self.current_slot()?;
        match self.mode {
            Mode::Read => {
                let slot = self.heap.struct_data(sid).slots[index].clone();
                self.store(addr, slot)?;
            }
            Mode::Write => {
                let id = self.heap.new_ref();
                self.heap.push_slot(sid, Cell::Ref(id));
                self.store(addr, Cell::Ref(id))?;
            }
            Mode::Run => return Err(MachineError::NoActiveStruct),
        }
        Ok(Flow::Continue)
    }

    fn execute_unify_val(&mut self, addr: Addr) -> Result<Flow, MachineError> {
        let (sid, index) = self.current_slot()?;
        match self.mode {
            Mode::Read => {
                let slot = self.heap.struct_data(sid).slots[index].clone();
                let other = self.load(addr)?;
                if !self.unify(&slot, &other) {
                    return Ok(Flow::Fail);
                }
            }
            Mode::Write => {
                let cell = self.load(addr)?;
                self.heap.push_slot(sid, cell);
            }
            Mode::Run => return Err(MachineError::NoActiveStruct),
        }
        Ok(Flow::Continue)
    }

    fn execute_unify_atom(&mut self, name: &str) -> Result<Flow, MachineError> {
        let (sid, index) = self.current_slot()?;
        match self.mode {
            Mode::Read => {
                let slot = self.heap.struct_data(sid).slots[index].clone();
                match self.heap.walk(&slot) {
                    Cell::Atom(found) if found == name => {}
                    Cell::Ref(id) => self.bind(id, Cell::atom(name)),
                    _ => return Ok(Flow::Fail),
                }
            }
            Mode::Write => self.heap.push_slot(sid, Cell::atom(name)),
            Mode::Run => return Err(MachineError::NoActiveStruct),
        }
        Ok(Flow::Continue)
    }

    fn execute_unify_void(&mut self, count: usize) -> Result<Flow, MachineError> {
        for _ in 0..count {
            let (sid, _) = self.current_slot()?;
            if self.mode == Mode::Write {
                let id = self.heap.new_ref();
                self.heap.push_slot(sid, Cell::Ref(id));
            }
        }
        Ok(Flow::Continue)
    }

    // Goal argument building.

    fn execute_put_var(&mut self, reg: usize, addr: Addr) -> Result<Flow, MachineError> {
        let id = self.heap.new_ref();
        self.store(Addr::X(reg), Cell::Ref(id))?;
        self.store(addr, Cell::Ref(id))?;
        Ok(Flow::Continue)
    }

    fn execute_put_val(&mut self, reg: usize, addr: Addr) -> Result<Flow, MachineError> {
        let cell = self.load(addr)?;
        self.store(Addr::X(reg), cell)?;
        Ok(Flow::Continue)
    }

    fn execute_put_atom(&mut self, reg: usize, name: &str) -> Result<Flow, MachineError> {
        self.store(Addr::X(reg), Cell::atom(name))?;
        Ok(Flow::Continue)
    }

    fn execute_put_struct(&mut self, reg: usize, functor: &Functor) -> Result<Flow, MachineError> {
        let sid = self.heap.new_struct(functor.clone());
        self.store(Addr::X(reg), Cell::Struct(sid))?;
        self.mode = Mode::Write;
        self.complex_arg = ComplexArg { struct_id: Some(sid), index: 0 };
        Ok(Flow::Continue)
    }

    // Control.

    /// Resolves a predicate call. Builtins return through the continuation
    /// like a fact; database predicates go through the first-argument index
    /// and push a choice point when more than one clause remains.
    fn execute_call(&mut self, functor: &Functor, tail: bool) -> Result<Flow, MachineError> {
        self.mode = Mode::Run;
        if !tail {
            self.continuation = Some(self.code_ptr);
        }
        if let Some(&handler) = self.builtins.get(functor) {
            let mut args = Vec::with_capacity(functor.arity);
            for i in 0..functor.arity {
                let cell = self
                    .registers
                    .get(i)
                    .cloned()
                    .flatten()
                    .ok_or(MachineError::UninitializedRegister(i))?;
                args.push(self.heap.walk(&cell));
            }
            return if handler(self, &args)? { self.execute_proceed() } else { Ok(Flow::Fail) };
        }
        if self.db.predicate(functor).is_none() {
            if self.config.strict {
                return Err(MachineError::UnknownPredicate(functor.clone()));
            }
            debug!("unknown predicate {}", functor);
            return Ok(Flow::Fail);
        }
        let first = if functor.arity > 0 {
            self.registers.first().cloned().flatten()
        } else {
            None
        };
        let candidates = self.db.lookup(functor, &self.heap, first.as_ref());
        match candidates.len() {
            0 => Ok(Flow::Fail),
            1 => {
                self.enter_clause(candidates[0]);
                Ok(Flow::Continue)
            }
            _ => {
                let entry = candidates[0];
                self.push_choice_point(functor.arity, candidates)?;
                self.enter_clause(entry);
                Ok(Flow::Continue)
            }
        }
    }

    /// Pushes a choice point whose cursor already points past the first
    /// alternative, which the caller is about to enter.
    fn push_choice_point(
        &mut self,
        arity: usize,
        alternatives: Vec<usize>,
    ) -> Result<(), MachineError> {
        if let Some(limit) = self.config.depth_limit {
            if self.choice_stack.len() >= limit {
                return Err(MachineError::DepthLimitExceeded(limit));
            }
        }
        self.ensure_registers(arity);
        self.choice_stack.push(crate::machine::choice_point::ChoicePoint {
            env_top: self.env_top,
            envs_len: self.envs.len(),
            continuation: self.continuation,
            alternatives,
            next_alt: 1,
            saved_args: self.registers[..arity].to_vec(),
            trail: Vec::new(),
            ref_mark: self.heap.ref_count(),
            attr_snapshot: self.attributes.clone(),
        });
        Ok(())
    }

    /// Jumps to the continuation, consuming it. An empty continuation
    /// means the query has completed: report the answer.
    fn execute_proceed(&mut self) -> Result<Flow, MachineError> {
        match self.continuation.take() {
            Some(ptr) => {
                self.code_ptr = ptr;
                Ok(Flow::Continue)
            }
            None => Ok(Flow::Answer),
        }
    }

    fn execute_allocate(&mut self, slots: usize) -> Result<Flow, MachineError> {
        if let Some(limit) = self.config.depth_limit {
            if self.envs.len() >= limit {
                return Err(MachineError::DepthLimitExceeded(limit));
            }
        }
        self.envs.push(crate::machine::frame::Environment::new(
            self.env_top,
            self.continuation,
            slots,
        ));
        self.env_top = Some(self.envs.len() - 1);
        let depth = self.env_depth();
        if depth > self.stats.max_env_depth {
            self.stats.max_env_depth = depth;
        }
        Ok(Flow::Continue)
    }

    fn execute_deallocate(&mut self) -> Result<Flow, MachineError> {
        let idx = self.env_top.ok_or(MachineError::EnvironmentMissing)?;
        let (prev, continuation) = {
            let env = &self.envs[idx];
            (env.prev, env.continuation)
        };
        self.continuation = continuation;
        self.env_top = prev;
        // Pop the frame unless a choice point still protects it.
        let protected = self.choice_stack.last().map_or(0, |cp| cp.envs_len);
        if idx + 1 == self.envs.len() && idx >= protected {
            self.envs.pop();
        }
        Ok(Flow::Continue)
    }

    // Builtins and meta-calls.

    fn execute_builtin(&mut self, name: &str, args: &[Addr]) -> Result<Flow, MachineError> {
        let functor = Functor::new(name, args.len());
        let handler = *self
            .builtins
            .get(&functor)
            .ok_or(MachineError::UnknownBuiltin(functor))?;
        let mut cells = Vec::with_capacity(args.len());
        for addr in args {
            let cell = self.load(*addr)?;
            cells.push(self.heap.walk(&cell));
        }
        Ok(if handler(self, &cells)? { Flow::Continue } else { Flow::Fail })
    }

    /// Meta-call: the goal term is inspected at run time. An atom calls a
    /// nullary predicate; a struct spreads its arguments over the first
    /// registers. Extra params are appended after the goal's own arguments.
    fn execute_meta(
        &mut self,
        goal: Addr,
        params: &[Addr],
        tail: bool,
    ) -> Result<Flow, MachineError> {
        let cell = self.load(goal)?;
        let extra: Vec<Cell> = params
            .iter()
            .map(|p| self.load(*p))
            .collect::<Result<_, _>>()?;
        let (name, own_args) = match self.heap.walk(&cell) {
            Cell::Atom(name) => (name, Vec::new()),
            Cell::Struct(sid) => {
                let data = self.heap.struct_data(sid);
                (data.functor.name.clone(), data.slots.clone())
            }
            Cell::Ref(_) => {
                return Err(MachineError::BadMetaCall(self.heap.render(&cell)));
            }
        };
        let functor = Functor::new(name, own_args.len() + extra.len());
        self.ensure_registers(functor.arity);
        for (i, arg) in own_args.into_iter().chain(extra).enumerate() {
            self.registers[i] = Some(arg);
        }
        debug!("meta-call resolves to {}", functor);
        self.execute_call(&functor, tail)
    }

    fn execute_inline_unify(&mut self, left: Addr, right: Addr) -> Result<Flow, MachineError> {
        let a = self.load(left)?;
        let b = self.load(right)?;
        Ok(if self.unify(&a, &b) { Flow::Continue } else { Flow::Fail })
    }

    // Attributed variables.

    fn execute_put_attr(&mut self, pkg: &str, var: Addr, attr: Addr) -> Result<Flow, MachineError> {
        if !self.attr_hooks.contains_key(pkg) {
            return Err(MachineError::UnknownAttributePackage(pkg.to_string()));
        }
        let cell = self.load(var)?;
        match self.heap.walk(&cell) {
            Cell::Ref(id) => {
                let value = self.load(attr)?;
                self.attributes.put(id, pkg, value);
                Ok(Flow::Continue)
            }
            other => Err(MachineError::AttributeOnBoundTerm(self.heap.render(&other))),
        }
    }

    fn execute_get_attr(&mut self, pkg: &str, var: Addr, attr: Addr) -> Result<Flow, MachineError> {
        let cell = self.load(var)?;
        match self.heap.walk(&cell) {
            Cell::Ref(id) => match self.attributes.get_value(id, pkg).cloned() {
                Some(value) => {
                    let expected = self.load(attr)?;
                    Ok(if self.unify(&value, &expected) { Flow::Continue } else { Flow::Fail })
                }
                None => Ok(Flow::Fail),
            },
            _ => Ok(Flow::Fail),
        }
    }

    fn execute_del_attr(&mut self, pkg: &str, var: Addr) -> Result<Flow, MachineError> {
        let cell = self.load(var)?;
        if let Cell::Ref(id) = self.heap.walk(&cell) {
            self.attributes.delete(id, pkg);
        }
        Ok(Flow::Continue)
    }

    fn execute_import_pkg(&mut self, pkg: &str) -> Result<Flow, MachineError> {
        if self.attr_hooks.contains_key(pkg) {
            Ok(Flow::Continue)
        } else {
            Err(MachineError::UnknownAttributePackage(pkg.to_string()))
        }
    }
}
