// src/machine/core.rs
//! The abstract machine: state, run loop, builtins, and the driver API.

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::debug;

use crate::machine::attributes::{AttrHook, AttributeTable, UnificationFrame};
use crate::machine::choice_point::ChoicePoint;
use crate::machine::compiler::compile_query;
use crate::machine::database::{ClauseAddr, ClauseId, CodePtr, CompiledClause, Database};
use crate::machine::error_handling::{CompileError, MachineError};
use crate::machine::frame::Environment;
use crate::machine::instruction::Addr;
use crate::machine::snapshot::MachineSnapshot;
use crate::machine::term::{Cell, Functor, Heap, RefId, StructId, RENDER_DEPTH};
use crate::prolog::ast::{Term, NIL};

/// A builtin predicate. Receives the walked argument cells; `Ok(false)` is
/// logical failure and triggers backtracking.
pub type BuiltinFn = fn(&mut Machine<'_>, &[Cell]) -> Result<bool, MachineError>;

/// An answer: query variable names mapped to walked terms. Unresolved refs
/// render as `_<id>` variables, except where a query variable names them.
pub type Substitution = BTreeMap<String, Term>;

/// What an instruction did with control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Logical failure; backtrack to the newest choice point.
    Fail,
    /// `proceed` with no continuation: the query succeeded.
    Answer,
}

/// Whether `unify_*` instructions consume an existing struct or populate a
/// new one. `Run` is ordinary dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Run,
    Read,
    Write,
}

/// Cursor over the struct currently being read or written.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexArg {
    pub struct_id: Option<StructId>,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Error on calls to predicates absent from the database.
    pub strict: bool,
    /// Abort with an operational error after this many instructions.
    pub step_limit: Option<u64>,
    /// Cap on environment and choice-point stack depth.
    pub depth_limit: Option<usize>,
    /// Surface attribute handler errors instead of backtracking.
    pub surface_attr_errors: bool,
    /// Record a machine snapshot after every instruction.
    pub trace: bool,
}

impl Default for MachineConfig {
    fn default() -> MachineConfig {
        MachineConfig {
            strict: false,
            step_limit: None,
            depth_limit: None,
            surface_attr_errors: false,
            trace: false,
        }
    }
}

/// Execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub steps: u64,
    /// Clauses entered, including retries; first-argument indexing keeps
    /// this low on dispatch-friendly predicates.
    pub clauses_considered: u64,
    /// Deepest environment chain reached; last-call optimization keeps
    /// this flat on tail-recursive predicates.
    pub max_env_depth: usize,
}

/// One interpreter run over a shared read-only database. All mutable state
/// lives here; concurrent queries take independent machines.
#[derive(Debug)]
pub struct Machine<'a> {
    pub db: &'a Database,
    pub heap: Heap,
    pub registers: Vec<Option<Cell>>,
    pub mode: Mode,
    pub complex_arg: ComplexArg,
    pub code_ptr: CodePtr,
    pub continuation: Option<CodePtr>,
    pub envs: Vec<Environment>,
    pub env_top: Option<usize>,
    pub choice_stack: Vec<ChoicePoint>,
    pub attributes: AttributeTable,
    pub unif_frames: VecDeque<UnificationFrame>,
    /// Every binding made during the run, in order.
    pub bindings_seen: Vec<(RefId, Cell)>,
    pub stats: Stats,
    pub trace_log: Vec<MachineSnapshot>,
    pub(crate) query: CompiledClause,
    pub(crate) query_vars: Vec<(String, usize)>,
    pub(crate) builtins: HashMap<Functor, BuiltinFn>,
    pub(crate) attr_hooks: HashMap<String, AttrHook>,
    pub(crate) config: MachineConfig,
    /// Start of the current unification in `bindings_seen`, for frames.
    pub(crate) unify_mark: usize,
    started: bool,
    halted: bool,
}

impl<'a> Machine<'a> {
    pub fn new(db: &'a Database, query: &[Term]) -> Result<Machine<'a>, CompileError> {
        Machine::with_config(db, query, MachineConfig::default())
    }

    pub fn with_config(
        db: &'a Database,
        query: &[Term],
        config: MachineConfig,
    ) -> Result<Machine<'a>, CompileError> {
        let (compiled, query_vars) = compile_query(query)?;
        let mut machine = Machine {
            db,
            heap: Heap::new(),
            registers: vec![None; compiled.num_registers],
            mode: Mode::Run,
            complex_arg: ComplexArg::default(),
            code_ptr: CodePtr::entry(ClauseAddr::Query),
            continuation: None,
            envs: Vec::new(),
            env_top: None,
            choice_stack: Vec::new(),
            attributes: AttributeTable::default(),
            unif_frames: VecDeque::new(),
            bindings_seen: Vec::new(),
            stats: Stats::default(),
            trace_log: Vec::new(),
            query: compiled,
            query_vars,
            builtins: HashMap::new(),
            attr_hooks: HashMap::new(),
            config,
            unify_mark: 0,
            started: false,
            halted: false,
        };
        machine.register_builtin(Functor::new("=", 2), builtin_unify);
        machine.register_builtin(Functor::new("\\==", 2), builtin_not_identical);
        machine.register_builtin(Functor::new("@<", 2), builtin_term_less);
        machine.register_builtin(Functor::new("atom", 1), builtin_atom);
        machine.register_builtin(Functor::new("var", 1), builtin_var);
        machine.register_builtin(Functor::new("list", 1), builtin_list);
        machine.register_builtin(Functor::new("fail", 0), builtin_fail);
        machine.register_builtin(Functor::new("true", 0), builtin_true);
        Ok(machine)
    }

    pub fn register_builtin(&mut self, functor: Functor, handler: BuiltinFn) {
        self.builtins.insert(functor, handler);
    }

    pub fn register_attribute_package(&mut self, name: &str, hook: AttrHook) {
        self.attr_hooks.insert(name.to_string(), hook);
    }

    pub fn clause(&self, addr: ClauseAddr) -> &CompiledClause {
        match addr {
            ClauseAddr::Db(id) => &self.db.clauses[id],
            ClauseAddr::Query => &self.query,
        }
    }

    pub(crate) fn ensure_registers(&mut self, count: usize) {
        if self.registers.len() < count {
            self.registers.resize(count, None);
        }
    }

    /// Reads the cell at an address.
    pub(crate) fn load(&self, addr: Addr) -> Result<Cell, MachineError> {
        match addr {
            Addr::X(i) => self
                .registers
                .get(i)
                .cloned()
                .flatten()
                .ok_or(MachineError::UninitializedRegister(i)),
            Addr::Y(i) => {
                let env = self.env_top.ok_or(MachineError::EnvironmentMissing)?;
                self.envs[env].slots[i]
                    .clone()
                    .ok_or(MachineError::UninitializedSlot(i))
            }
        }
    }

    pub(crate) fn store(&mut self, addr: Addr, cell: Cell) -> Result<(), MachineError> {
        match addr {
            Addr::X(i) => {
                self.ensure_registers(i + 1);
                self.registers[i] = Some(cell);
            }
            Addr::Y(i) => {
                let env = self.env_top.ok_or(MachineError::EnvironmentMissing)?;
                self.envs[env].slots[i] = Some(cell);
            }
        }
        Ok(())
    }

    /// Binds a ref, trailing it against the newest choice point when the
    /// ref predates it, and queueing a unification frame when the ref
    /// carries attributes.
    pub(crate) fn bind(&mut self, id: RefId, cell: Cell) {
        if let Some(cp) = self.choice_stack.last_mut() {
            if id < cp.ref_mark {
                cp.trail.push(id);
            }
        }
        self.bindings_seen.push((id, cell.clone()));
        self.heap.bind(id, cell.clone());
        if let Some(attributes) = self.attributes.take(id) {
            let bindings = self.bindings_seen[self.unify_mark..].to_vec();
            self.unif_frames.push_back(UnificationFrame {
                attributed_ref: id,
                binding_value: cell,
                bindings,
                attributes,
            });
        }
    }

    pub(crate) fn enter_clause(&mut self, id: ClauseId) {
        let num_registers = self.db.clauses[id].num_registers;
        self.ensure_registers(num_registers);
        self.code_ptr = CodePtr::entry(ClauseAddr::Db(id));
        self.mode = Mode::Run;
        self.stats.clauses_considered += 1;
    }

    /// Length of the active environment chain.
    pub fn env_depth(&self) -> usize {
        let mut depth = 0;
        let mut cur = self.env_top;
        while let Some(idx) = cur {
            depth += 1;
            cur = self.envs[idx].prev;
        }
        depth
    }

    pub(crate) fn render_code_ptr(&self, ptr: CodePtr) -> String {
        let clause = self.clause(ptr.clause);
        format!("{}#{}[{}]", clause.functor, clause.clause_pos, ptr.pos)
    }

    /// Restores the newest choice point and enters its next alternative.
    /// Returns false when the choice stack is exhausted.
    pub(crate) fn backtrack(&mut self) -> bool {
        self.unif_frames.clear();
        self.mode = Mode::Run;
        self.complex_arg = ComplexArg::default();
        loop {
            let Some(cp) = self.choice_stack.last_mut() else {
                return false;
            };
            let trail: Vec<RefId> = cp.trail.drain(..).collect();
            for id in trail {
                self.heap.unbind(id);
            }
            self.attributes = cp.attr_snapshot.clone();
            for (i, cell) in cp.saved_args.iter().enumerate() {
                self.registers[i] = cell.clone();
            }
            self.env_top = cp.env_top;
            let envs_len = cp.envs_len;
            self.continuation = cp.continuation;
            match cp.take_alternative() {
                Some((clause, is_last)) => {
                    if is_last {
                        // trust: the last alternative releases the choice point.
                        self.choice_stack.pop();
                    }
                    self.envs.truncate(envs_len);
                    debug!("retry with clause {}", self.render_code_ptr(CodePtr::entry(ClauseAddr::Db(clause))));
                    self.enter_clause(clause);
                    return true;
                }
                None => {
                    self.choice_stack.pop();
                }
            }
        }
    }

    /// Runs the queued attribute hooks between instruction boundaries.
    /// `Ok(false)` is a logical failure.
    pub(crate) fn run_attr_hooks(&mut self) -> Result<bool, MachineError> {
        while let Some(frame) = self.unif_frames.pop_front() {
            for (pkg, _) in frame.attributes.clone() {
                let hook = *self
                    .attr_hooks
                    .get(&pkg)
                    .ok_or_else(|| MachineError::UnknownAttributePackage(pkg.clone()))?;
                match hook(self, &frame) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.unif_frames.clear();
                        return Ok(false);
                    }
                    Err(err) => {
                        if self.config.surface_attr_errors {
                            return Err(MachineError::AttributeHandler(pkg, err.to_string()));
                        }
                        debug!("attribute handler for {} failed: {}", pkg, err);
                        self.unif_frames.clear();
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    fn fetch(&mut self) -> Result<crate::machine::instruction::Instruction, MachineError> {
        let ptr = self.code_ptr;
        let clause = self.clause(ptr.clause);
        let instr = clause
            .code
            .get(ptr.pos)
            .cloned()
            .ok_or_else(|| MachineError::CodeOutOfBounds(self.render_code_ptr(ptr)))?;
        self.code_ptr.pos += 1;
        Ok(instr)
    }

    /// Runs until the next answer. `Ok(None)` means the search space is
    /// exhausted; any `Err` leaves the machine halted with undefined state.
    pub fn next_solution(&mut self) -> Result<Option<Substitution>, MachineError> {
        if self.halted {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
        } else if !self.backtrack() {
            // Resuming after an answer behaves like a failure.
            self.halted = true;
            return Ok(None);
        }
        loop {
            if let Some(limit) = self.config.step_limit {
                if self.stats.steps >= limit {
                    self.halted = true;
                    return Err(MachineError::StepBudgetExceeded(limit));
                }
            }
            let here = self.code_ptr;
            let instr = match self.fetch() {
                Ok(instr) => instr,
                Err(err) => {
                    self.halted = true;
                    return Err(err);
                }
            };
            self.stats.steps += 1;
            debug!("{}: {}", self.render_code_ptr(here), instr);
            let mut flow = match self.dispatch(&instr) {
                Ok(flow) => flow,
                Err(err) => {
                    self.halted = true;
                    return Err(err);
                }
            };
            if flow == Flow::Continue && !self.unif_frames.is_empty() {
                flow = match self.run_attr_hooks() {
                    Ok(true) => Flow::Continue,
                    Ok(false) => Flow::Fail,
                    Err(err) => {
                        self.halted = true;
                        return Err(err);
                    }
                };
            }
            if self.config.trace {
                self.record_snapshot(flow == Flow::Fail);
            }
            match flow {
                Flow::Continue => {}
                Flow::Answer => {
                    return Ok(Some(self.extract_substitution()));
                }
                Flow::Fail => {
                    if !self.backtrack() {
                        self.halted = true;
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// The current bindings of the query variables, walked and decompiled
    /// to source terms.
    pub fn extract_substitution(&self) -> Substitution {
        let env = &self.envs[0];
        let mut names: HashMap<RefId, String> = HashMap::new();
        for (name, slot) in &self.query_vars {
            if let Some(cell) = &env.slots[*slot] {
                if let Cell::Ref(id) = self.heap.walk(cell) {
                    names.entry(id).or_insert_with(|| name.clone());
                }
            }
        }
        let mut subst = Substitution::new();
        for (name, slot) in &self.query_vars {
            let term = match &env.slots[*slot] {
                Some(cell) => self.decompile(cell, &names, RENDER_DEPTH),
                None => Term::var(format!("_{}", slot)),
            };
            subst.insert(name.clone(), term);
        }
        subst
    }

    fn decompile(&self, cell: &Cell, names: &HashMap<RefId, String>, depth: usize) -> Term {
        if depth == 0 {
            return Term::atom("...");
        }
        match self.heap.walk(cell) {
            Cell::Atom(name) => Term::Atom(name),
            Cell::Ref(id) => Term::Var(
                names
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("_{}", id)),
            ),
            Cell::Struct(sid) => {
                let data = self.heap.struct_data(sid);
                let args = data
                    .slots
                    .iter()
                    .map(|slot| self.decompile(slot, names, depth - 1))
                    .collect();
                Term::Struct(data.functor.name.clone(), args)
            }
        }
    }
}

// Required builtins. Arguments arrive walked.

fn builtin_unify(machine: &mut Machine<'_>, args: &[Cell]) -> Result<bool, MachineError> {
    Ok(machine.unify(&args[0], &args[1]))
}

fn builtin_not_identical(machine: &mut Machine<'_>, args: &[Cell]) -> Result<bool, MachineError> {
    Ok(!machine.cells_identical(&args[0], &args[1]))
}

fn builtin_term_less(machine: &mut Machine<'_>, args: &[Cell]) -> Result<bool, MachineError> {
    Ok(machine.compare_cells(&args[0], &args[1]) == std::cmp::Ordering::Less)
}

fn builtin_atom(machine: &mut Machine<'_>, args: &[Cell]) -> Result<bool, MachineError> {
    let _ = machine;
    Ok(matches!(args[0], Cell::Atom(_)))
}

fn builtin_var(machine: &mut Machine<'_>, args: &[Cell]) -> Result<bool, MachineError> {
    let _ = machine;
    Ok(matches!(args[0], Cell::Ref(_)))
}

/// Proper-list test: a `./2` spine ending in `[]`.
fn builtin_list(machine: &mut Machine<'_>, args: &[Cell]) -> Result<bool, MachineError> {
    let mut seen = std::collections::HashSet::new();
    let mut cell = args[0].clone();
    loop {
        match machine.heap.walk(&cell) {
            Cell::Atom(name) if name == NIL => return Ok(true),
            Cell::Struct(sid) => {
                let data = machine.heap.struct_data(sid);
                if data.functor != Functor::pair() || !seen.insert(sid) {
                    return Ok(false);
                }
                cell = data.slots[1].clone();
            }
            _ => return Ok(false),
        }
    }
}

fn builtin_fail(machine: &mut Machine<'_>, _args: &[Cell]) -> Result<bool, MachineError> {
    let _ = machine;
    Ok(false)
}

fn builtin_true(machine: &mut Machine<'_>, _args: &[Cell]) -> Result<bool, MachineError> {
    let _ = machine;
    Ok(true)
}

/// Iterator over the answers of a query.
pub struct Solutions<'a> {
    machine: Machine<'a>,
}

impl<'a> Solutions<'a> {
    pub fn new(machine: Machine<'a>) -> Solutions<'a> {
        Solutions { machine }
    }

    pub fn machine(&self) -> &Machine<'a> {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine<'a> {
        &mut self.machine
    }
}

impl<'a> Iterator for Solutions<'a> {
    type Item = Result<Substitution, MachineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.machine.next_solution().transpose()
    }
}
