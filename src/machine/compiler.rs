// src/machine/compiler.rs
//! Clause-to-instruction compiler.
//!
//! Three phases per clause. First, variables are classified: a variable
//! that occurs in two or more chunks (head plus first goal, then each
//! further goal) is permanent and lives in an environment slot; all others
//! are temporary and live in registers. Second, temporaries are allocated
//! Debray-style: a variable at head argument position i keeps register Xi
//! as its home when possible, and goal arguments are emitted in an order
//! that never reads a clobbered register, rotating through a scratch
//! register when the move graph has a cycle. Third, instructions are
//! emitted per the get/put/unify tables, with `allocate`/`deallocate`
//! bracketing clauses that need an environment and the final call turned
//! into `execute`.
//!
//! `allocate` is emitted before the head code: a permanent variable first
//! mentioned in a head argument writes its Y slot during head matching.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use crate::machine::database::{CompiledClause, Database, FirstArg};
use crate::machine::error_handling::CompileError;
use crate::machine::instruction::{Addr, Instruction};
use crate::machine::term::Functor;
use crate::prolog::ast::{Clause, Term, PAIR};

/// Builtins dispatched through the `builtin` instruction, by name and arity.
pub const BUILTIN_SPECS: &[(&str, usize)] = &[
    ("\\==", 2),
    ("@<", 2),
    ("atom", 1),
    ("var", 1),
    ("list", 1),
    ("fail", 0),
    ("true", 0),
];

/// Names reserved for builtins at any arity; using them with the wrong
/// arity is a compile error rather than a silent user predicate.
const RESERVED: &[&str] = &["=", "\\==", "@<"];

fn is_builtin(name: &str, arity: usize) -> bool {
    BUILTIN_SPECS.iter().any(|(n, a)| *n == name && *a == arity)
}

/// Compiles a program into an indexed database.
pub fn compile(clauses: &[Clause]) -> Result<Database, CompileError> {
    let mut counts: HashMap<Functor, usize> = HashMap::new();
    let mut compiled = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let functor = head_functor(&clause.head)?;
        let pos = counts.entry(functor).or_insert(0);
        compiled.push(compile_clause(clause, *pos)?);
        *pos += 1;
    }
    Ok(Database::build(compiled))
}

/// Compiles one clause.
pub fn compile_clause(clause: &Clause, clause_pos: usize) -> Result<CompiledClause, CompileError> {
    let functor = head_functor(&clause.head)?;
    let first_arg = first_arg_shape(&clause.head);
    let mut emitter = Emitter::new(&clause.head, &clause.body, false)?;
    emitter.emit_clause(&clause.head, &clause.body)?;
    debug!("compiled {} clause {}: {} instruction(s)", functor, clause_pos, emitter.code.len());
    Ok(CompiledClause {
        functor,
        clause_pos,
        code: emitter.code,
        num_registers: emitter.max_reg,
        num_perm_vars: emitter.perm.len(),
        first_arg,
    })
}

/// Compiles a query body. Every named query variable is forced permanent so
/// its binding can be read out of the environment when an answer is found;
/// the environment is never deallocated and the code ends in `proceed`,
/// which reports an answer once the continuation is empty.
pub fn compile_query(goals: &[Term]) -> Result<(CompiledClause, Vec<(String, usize)>), CompileError> {
    let head = Term::atom("?-");
    let mut emitter = Emitter::new(&head, goals, true)?;
    emitter.emit_query(goals)?;
    let vars = emitter
        .perm_order
        .iter()
        .map(|name| (name.clone(), emitter.perm[name]))
        .collect();
    Ok((
        CompiledClause {
            functor: Functor::new("?-", 0),
            clause_pos: 0,
            code: emitter.code,
            num_registers: emitter.max_reg,
            num_perm_vars: emitter.perm.len(),
            first_arg: FirstArg::None,
        },
        vars,
    ))
}

fn head_functor(head: &Term) -> Result<Functor, CompileError> {
    match head.functor() {
        Some((name, arity)) => Ok(Functor::new(name, arity)),
        None => match head {
            Term::Var(name) => Err(CompileError::HeadIsVariable(name.clone())),
            _ => unreachable!(),
        },
    }
}

fn first_arg_shape(head: &Term) -> FirstArg {
    match head {
        Term::Atom(_) => FirstArg::None,
        Term::Struct(_, args) => match &args[0] {
            Term::Var(_) => FirstArg::Var,
            Term::Atom(name) => FirstArg::Atom(name.clone()),
            Term::Struct(name, inner) => FirstArg::Struct(Functor::new(name, inner.len())),
        },
        Term::Var(_) => FirstArg::Var,
    }
}

/// Collects named variables of `term` into `out`, in textual order.
fn collect_vars(term: &Term, out: &mut Vec<String>) {
    match term {
        Term::Var(name) if name != "_" => out.push(name.clone()),
        Term::Struct(_, args) => {
            for arg in args {
                collect_vars(arg, out);
            }
        }
        _ => {}
    }
}

/// What one goal argument position does, for the move sequencer.
enum ArgAction<'a> {
    /// `put_atom`.
    Atom(&'a str),
    /// First mention of a variable: `put_var` into the register and home.
    Fresh { var: Option<&'a str> },
    /// Subsequent mention: `put_val` from the variable's home.
    Move { var: &'a str },
    /// Struct build; may read variable homes at any depth.
    Build(&'a Term),
}

struct Emitter {
    code: Vec<Instruction>,
    /// Permanent variable slots.
    perm: HashMap<String, usize>,
    perm_order: Vec<String>,
    /// Temporary homes; in-window entries come from head position claims.
    homes: HashMap<String, Addr>,
    /// Variables already materialized somewhere.
    seen: HashSet<String>,
    /// Argument-register window; scratch registers start here.
    window: usize,
    next_temp: usize,
    max_reg: usize,
    needs_env: bool,
    is_query: bool,
}

impl Emitter {
    fn new(head: &Term, body: &[Term], is_query: bool) -> Result<Emitter, CompileError> {
        // Chunk analysis: head + first goal, then one chunk per later goal.
        let mut chunk_sets: Vec<HashSet<String>> = Vec::new();
        let mut first = HashSet::new();
        let mut vars = Vec::new();
        if !is_query {
            collect_vars(head, &mut vars);
        }
        if let Some(goal) = body.first() {
            collect_vars(goal, &mut vars);
        }
        for name in vars.drain(..) {
            first.insert(name);
        }
        chunk_sets.push(first);
        for goal in body.iter().skip(1) {
            let mut set = HashSet::new();
            collect_vars(goal, &mut vars);
            for name in vars.drain(..) {
                set.insert(name);
            }
            chunk_sets.push(set);
        }

        let mut ordered = Vec::new();
        if !is_query {
            collect_vars(head, &mut ordered);
        }
        for goal in body {
            collect_vars(goal, &mut ordered);
        }

        let mut perm = HashMap::new();
        let mut perm_order = Vec::new();
        for name in &ordered {
            if perm.contains_key(name) {
                continue;
            }
            let chunks = chunk_sets.iter().filter(|set| set.contains(name)).count();
            if is_query || chunks >= 2 {
                perm.insert(name.clone(), perm_order.len());
                perm_order.push(name.clone());
            }
        }

        let head_arity = match head {
            Term::Struct(_, args) => args.len(),
            _ => 0,
        };
        let window = body
            .iter()
            .filter_map(goal_call_arity)
            .chain(std::iter::once(head_arity))
            .max()
            .unwrap_or(0);

        let needs_env = is_query || !perm.is_empty() || body.len() >= 2;
        Ok(Emitter {
            code: Vec::new(),
            perm,
            perm_order,
            homes: HashMap::new(),
            seen: HashSet::new(),
            window,
            next_temp: window,
            max_reg: 0,
            needs_env,
            is_query,
        })
    }

    fn emit_clause(&mut self, head: &Term, body: &[Term]) -> Result<(), CompileError> {
        if self.needs_env {
            self.push(Instruction::Allocate { slots: self.perm.len() });
        }
        if let Term::Struct(_, args) = head {
            for (i, arg) in args.iter().enumerate() {
                self.emit_head_arg(i, arg);
            }
        }
        if body.is_empty() {
            self.push(Instruction::Proceed);
            return Ok(());
        }
        self.emit_body(body, true)
    }

    fn emit_query(&mut self, goals: &[Term]) -> Result<(), CompileError> {
        self.push(Instruction::Allocate { slots: self.perm.len() });
        if !goals.is_empty() {
            self.emit_body(goals, false)?;
        }
        self.push(Instruction::Proceed);
        Ok(())
    }

    fn push(&mut self, instr: Instruction) {
        self.touch_instr(&instr);
        self.code.push(instr);
    }

    fn touch(&mut self, reg: usize) {
        if reg + 1 > self.max_reg {
            self.max_reg = reg + 1;
        }
    }

    fn touch_instr(&mut self, instr: &Instruction) {
        use Instruction::*;
        let regs: [Option<usize>; 2] = match instr {
            GetVar { reg, addr }
            | GetVal { reg, addr }
            | PutVar { reg, addr }
            | PutVal { reg, addr } => [Some(*reg), addr_reg(addr)],
            GetAtom { reg, .. }
            | GetStruct { reg, .. }
            | GetPair { reg }
            | PutAtom { reg, .. }
            | PutStruct { reg, .. }
            | PutPair { reg } => [Some(*reg), None],
            UnifyVar { addr } | UnifyVal { addr } => [addr_reg(addr), None],
            InlineUnify { left, right } => [addr_reg(left), addr_reg(right)],
            Builtin { args, .. } => {
                for arg in args {
                    if let Some(r) = addr_reg(arg) {
                        self.touch(r);
                    }
                }
                [None, None]
            }
            CallMeta { goal, params } | ExecuteMeta { goal, params } => {
                for arg in params {
                    if let Some(r) = addr_reg(arg) {
                        self.touch(r);
                    }
                }
                [addr_reg(goal), None]
            }
            PutAttr { var, attr, .. } | GetAttr { var, attr, .. } => {
                [addr_reg(var), addr_reg(attr)]
            }
            DelAttr { var, .. } => [addr_reg(var), None],
            _ => [None, None],
        };
        for reg in regs.into_iter().flatten() {
            self.touch(reg);
        }
    }

    fn fresh_temp(&mut self) -> usize {
        let reg = self.next_temp;
        self.next_temp += 1;
        self.touch(reg);
        reg
    }

    /// Drops temporary homes at a chunk boundary; scratch registers are
    /// reusable from the window up again.
    fn end_chunk(&mut self) {
        self.homes.clear();
        self.next_temp = self.window;
    }

    fn perm_slot(&self, name: &str) -> Option<usize> {
        self.perm.get(name).copied()
    }

    /// The address a subsequent mention reads from.
    fn var_addr(&self, name: &str) -> Addr {
        if let Some(slot) = self.perm_slot(name) {
            Addr::Y(slot)
        } else {
            self.homes[name]
        }
    }

    // Head emission.

    fn emit_head_arg(&mut self, i: usize, arg: &Term) {
        self.touch(i);
        match arg {
            Term::Atom(name) => self.push(Instruction::GetAtom { reg: i, name: name.clone() }),
            Term::Var(name) if name == "_" => {}
            Term::Var(name) => {
                if let Some(slot) = self.perm_slot(name) {
                    if self.seen.insert(name.clone()) {
                        self.push(Instruction::GetVar { reg: i, addr: Addr::Y(slot) });
                    } else {
                        self.push(Instruction::GetVal { reg: i, addr: Addr::Y(slot) });
                    }
                } else if self.seen.insert(name.clone()) {
                    // Claim the argument register as the home; the identity
                    // move is not emitted.
                    self.homes.insert(name.clone(), Addr::X(i));
                } else {
                    let addr = self.var_addr(name);
                    self.push(Instruction::GetVal { reg: i, addr });
                }
            }
            Term::Struct(..) => self.emit_head_struct(i, arg),
        }
    }

    /// Breadth-first struct matching: nested structs land in fresh
    /// registers via `unify_var` and are expanded by a follow-up
    /// `get_struct` once the enclosing struct is done.
    fn emit_head_struct(&mut self, reg: usize, term: &Term) {
        let mut queue: VecDeque<(usize, &Term)> = VecDeque::new();
        queue.push_back((reg, term));
        while let Some((reg, term)) = queue.pop_front() {
            let Term::Struct(name, args) = term else { unreachable!() };
            if name == PAIR && args.len() == 2 {
                self.push(Instruction::GetPair { reg });
            } else {
                self.push(Instruction::GetStruct {
                    reg,
                    functor: Functor::new(name.clone(), args.len()),
                });
            }
            for arg in args {
                match arg {
                    Term::Atom(a) => self.push(Instruction::UnifyAtom { name: a.clone() }),
                    Term::Var(v) if v == "_" => self.push_void(),
                    Term::Var(v) => self.emit_unify_var(v),
                    Term::Struct(..) => {
                        let fresh = self.fresh_temp();
                        self.push(Instruction::UnifyVar { addr: Addr::X(fresh) });
                        queue.push_back((fresh, arg));
                    }
                }
            }
        }
    }

    fn emit_unify_var(&mut self, name: &str) {
        let addr = if let Some(slot) = self.perm_slot(name) {
            Addr::Y(slot)
        } else if let Some(addr) = self.homes.get(name) {
            *addr
        } else {
            let fresh = self.fresh_temp();
            self.homes.insert(name.to_string(), Addr::X(fresh));
            Addr::X(fresh)
        };
        if self.seen.insert(name.to_string()) {
            self.push(Instruction::UnifyVar { addr });
        } else {
            self.push(Instruction::UnifyVal { addr });
        }
    }

    fn push_void(&mut self) {
        if let Some(Instruction::UnifyVoid { count }) = self.code.last_mut() {
            *count += 1;
        } else {
            self.push(Instruction::UnifyVoid { count: 1 });
        }
    }

    // Body emission.

    fn emit_body(&mut self, body: &[Term], tail_call: bool) -> Result<(), CompileError> {
        for (gi, goal) in body.iter().enumerate() {
            let last = gi + 1 == body.len();
            self.emit_goal(goal, last && tail_call)?;
            self.end_chunk();
        }
        if !tail_call {
            return Ok(());
        }
        // A clause ending in a non-call goal still returns via proceed.
        if !matches!(
            self.code.last(),
            Some(Instruction::Execute { .. } | Instruction::ExecuteMeta { .. })
        ) {
            if self.needs_env {
                self.push(Instruction::Deallocate);
            }
            self.push(Instruction::Proceed);
        }
        Ok(())
    }

    fn emit_goal(&mut self, goal: &Term, last: bool) -> Result<(), CompileError> {
        match goal {
            Term::Var(name) => {
                let addr = self.operand_addr(goal)?;
                debug!("meta-call through {}", name);
                self.emit_meta(addr, Vec::new(), last);
                Ok(())
            }
            Term::Atom(name) => {
                if is_builtin(name, 0) {
                    self.push(Instruction::Builtin { name: name.clone(), args: Vec::new() });
                } else if RESERVED.contains(&name.as_str()) {
                    return Err(CompileError::BuiltinArity(name.clone(), 0));
                } else {
                    self.emit_call(Functor::new(name.clone(), 0), last);
                }
                Ok(())
            }
            Term::Struct(name, args) => self.emit_struct_goal(name, args, last),
        }
    }

    fn emit_struct_goal(
        &mut self,
        name: &str,
        args: &[Term],
        last: bool,
    ) -> Result<(), CompileError> {
        match (name, args.len()) {
            ("=", 2) => {
                let left = self.operand_addr(&args[0])?;
                let right = self.operand_addr(&args[1])?;
                self.push(Instruction::InlineUnify { left, right });
                Ok(())
            }
            ("call", 0) => Err(CompileError::EmptyMetaCall),
            ("call", _) => {
                let goal = self.operand_addr(&args[0])?;
                let params = args[1..]
                    .iter()
                    .map(|arg| self.operand_addr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.emit_meta(goal, params, last);
                Ok(())
            }
            ("put_attr", 3) | ("get_attr", 3) => {
                let Term::Atom(pkg) = &args[1] else {
                    return Err(CompileError::BadAttributePackage(format!("{}/3", name)));
                };
                let var = self.operand_addr(&args[0])?;
                let attr = self.operand_addr(&args[2])?;
                let pkg = pkg.clone();
                self.push(if name == "put_attr" {
                    Instruction::PutAttr { pkg, var, attr }
                } else {
                    Instruction::GetAttr { pkg, var, attr }
                });
                Ok(())
            }
            ("del_attr", 2) => {
                let Term::Atom(pkg) = &args[1] else {
                    return Err(CompileError::BadAttributePackage("del_attr/2".into()));
                };
                let var = self.operand_addr(&args[0])?;
                self.push(Instruction::DelAttr { pkg: pkg.clone(), var });
                Ok(())
            }
            ("import", 1) => {
                let Term::Atom(pkg) = &args[0] else {
                    return Err(CompileError::BadAttributePackage("import/1".into()));
                };
                self.push(Instruction::ImportPkg { pkg: pkg.clone() });
                Ok(())
            }
            _ if is_builtin(name, args.len()) => {
                let addrs = args
                    .iter()
                    .map(|arg| self.operand_addr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.push(Instruction::Builtin { name: name.to_string(), args: addrs });
                Ok(())
            }
            _ if RESERVED.contains(&name) => {
                Err(CompileError::BuiltinArity(name.to_string(), args.len()))
            }
            _ => {
                self.emit_goal_args(args)?;
                self.emit_call(Functor::new(name, args.len()), last);
                Ok(())
            }
        }
    }

    fn emit_call(&mut self, functor: Functor, last: bool) {
        if last {
            if self.needs_env {
                self.push(Instruction::Deallocate);
            }
            self.push(Instruction::Execute { functor });
        } else {
            self.push(Instruction::Call { functor });
        }
    }

    fn emit_meta(&mut self, goal: Addr, params: Vec<Addr>, last: bool) {
        if last {
            if self.needs_env {
                self.push(Instruction::Deallocate);
            }
            self.push(Instruction::ExecuteMeta { goal, params });
        } else {
            self.push(Instruction::CallMeta { goal, params });
        }
    }

    /// Materializes an operand for builtins, inline unification, meta-calls
    /// and attribute goals, returning the address holding it.
    fn operand_addr(&mut self, term: &Term) -> Result<Addr, CompileError> {
        match term {
            Term::Var(name) if name == "_" => {
                let fresh = self.fresh_temp();
                self.push(Instruction::PutVar { reg: fresh, addr: Addr::X(fresh) });
                Ok(Addr::X(fresh))
            }
            Term::Var(name) => {
                if let Some(slot) = self.perm_slot(name) {
                    if self.seen.insert(name.clone()) {
                        let fresh = self.fresh_temp();
                        self.push(Instruction::PutVar { reg: fresh, addr: Addr::Y(slot) });
                    }
                    Ok(Addr::Y(slot))
                } else if self.seen.insert(name.clone()) {
                    let fresh = self.fresh_temp();
                    self.homes.insert(name.clone(), Addr::X(fresh));
                    self.push(Instruction::PutVar { reg: fresh, addr: Addr::X(fresh) });
                    Ok(Addr::X(fresh))
                } else {
                    Ok(self.var_addr(name))
                }
            }
            Term::Atom(name) => {
                let fresh = self.fresh_temp();
                self.push(Instruction::PutAtom { reg: fresh, name: name.clone() });
                Ok(Addr::X(fresh))
            }
            Term::Struct(..) => {
                let fresh = self.fresh_temp();
                self.emit_body_struct(fresh, term);
                Ok(Addr::X(fresh))
            }
        }
    }

    /// Bottom-up struct build: nested structs are built into fresh
    /// registers first, then referenced with `unify_val`.
    fn emit_body_struct(&mut self, reg: usize, term: &Term) {
        let Term::Struct(name, args) = term else { unreachable!() };
        let mut prebuilt: HashMap<usize, usize> = HashMap::new();
        for (i, arg) in args.iter().enumerate() {
            if let Term::Struct(..) = arg {
                let fresh = self.fresh_temp();
                self.emit_body_struct(fresh, arg);
                prebuilt.insert(i, fresh);
            }
        }
        if name == PAIR && args.len() == 2 {
            self.push(Instruction::PutPair { reg });
        } else {
            self.push(Instruction::PutStruct {
                reg,
                functor: Functor::new(name.clone(), args.len()),
            });
        }
        for (i, arg) in args.iter().enumerate() {
            match arg {
                Term::Atom(a) => self.push(Instruction::UnifyAtom { name: a.clone() }),
                Term::Var(v) if v == "_" => self.push_void(),
                Term::Var(v) => self.emit_unify_var(v),
                Term::Struct(..) => {
                    let addr = Addr::X(prebuilt[&i]);
                    self.push(Instruction::UnifyVal { addr });
                }
            }
        }
    }

    // Goal argument sequencing.

    /// Registers a struct argument reads at any depth, as of the current
    /// homes: in-window homes of already-seen variables.
    fn build_reads(&self, term: &Term, out: &mut HashSet<usize>) {
        match term {
            Term::Var(name) if name != "_" => {
                if self.perm_slot(name).is_none() && self.seen.contains(name) {
                    if let Some(Addr::X(r)) = self.homes.get(name) {
                        if *r < self.window {
                            out.insert(*r);
                        }
                    }
                }
            }
            Term::Struct(_, args) => {
                for arg in args {
                    self.build_reads(arg, out);
                }
            }
            _ => {}
        }
    }

    fn action_reads(&self, action: &ArgAction<'_>) -> HashSet<usize> {
        let mut reads = HashSet::new();
        match action {
            ArgAction::Move { var } => {
                if let Addr::X(r) = self.var_addr(var) {
                    if r < self.window {
                        reads.insert(r);
                    }
                }
            }
            ArgAction::Build(term) => self.build_reads(term, &mut reads),
            _ => {}
        }
        reads
    }

    /// Variables an action defines (first mention at this argument).
    fn action_defs<'a>(&self, action: &ArgAction<'a>) -> Vec<&'a str> {
        match action {
            ArgAction::Fresh { var: Some(v) } => vec![v],
            ArgAction::Build(term) => {
                let mut vars = Vec::new();
                let mut stack = vec![*term];
                while let Some(t) = stack.pop() {
                    match t {
                        Term::Var(name) if name != "_" && !self.seen.contains(name) => {
                            vars.push(name.as_str());
                        }
                        Term::Struct(_, args) => stack.extend(args.iter()),
                        _ => {}
                    }
                }
                vars
            }
            _ => Vec::new(),
        }
    }

    fn action_uses<'a>(&self, action: &ArgAction<'a>) -> Vec<&'a str> {
        match action {
            ArgAction::Move { var } => vec![var],
            ArgAction::Build(term) => {
                let mut vars = Vec::new();
                let mut stack = vec![*term];
                while let Some(t) = stack.pop() {
                    match t {
                        Term::Var(name) if name != "_" && self.seen.contains(name) => {
                            vars.push(name.as_str());
                        }
                        Term::Struct(_, args) => stack.extend(args.iter()),
                        _ => {}
                    }
                }
                vars
            }
            _ => Vec::new(),
        }
    }

    /// Relocates the variable homed at in-window register `reg` to a
    /// scratch register, emitting the move. This is the rotation step that
    /// breaks move-graph cycles such as `p(A,B,C) :- q(B,C,A)`.
    fn relocate_home(&mut self, reg: usize) {
        let name = self
            .homes
            .iter()
            .find(|(_, addr)| **addr == Addr::X(reg))
            .map(|(name, _)| name.clone())
            .expect("relocation target has no homed variable");
        let fresh = self.fresh_temp();
        self.push(Instruction::PutVal { reg: fresh, addr: Addr::X(reg) });
        self.homes.insert(name, Addr::X(fresh));
    }

    fn emit_goal_args(&mut self, args: &[Term]) -> Result<(), CompileError> {
        // Classify every argument position. First mentions are resolved in
        // textual order so defs always precede uses.
        let mut actions: Vec<ArgAction<'_>> = Vec::with_capacity(args.len());
        let mut mentioned: HashSet<String> = HashSet::new();
        for arg in args {
            let action = match arg {
                Term::Atom(name) => ArgAction::Atom(name.as_str()),
                Term::Var(name) if name == "_" => ArgAction::Fresh { var: None },
                Term::Var(name) => {
                    if self.seen.contains(name) || mentioned.contains(name) {
                        ArgAction::Move { var: name.as_str() }
                    } else {
                        mentioned.insert(name.clone());
                        ArgAction::Fresh { var: Some(name.as_str()) }
                    }
                }
                Term::Struct(..) => {
                    let mut vars = Vec::new();
                    collect_vars(arg, &mut vars);
                    mentioned.extend(vars);
                    ArgAction::Build(arg)
                }
            };
            actions.push(action);
        }

        let mut remaining: Vec<usize> = (0..args.len()).collect();
        while !remaining.is_empty() {
            let mut chosen = None;
            'scan: for (pos, &i) in remaining.iter().enumerate() {
                // Blocked while another pending argument still reads Xi.
                for &j in &remaining {
                    if j != i && self.action_reads(&actions[j]).contains(&i) {
                        continue 'scan;
                    }
                }
                // Blocked until every variable this argument uses is defined.
                for used in self.action_uses(&actions[i]) {
                    let defined_elsewhere = remaining
                        .iter()
                        .any(|&j| j != i && self.action_defs(&actions[j]).contains(&used));
                    if defined_elsewhere {
                        continue 'scan;
                    }
                }
                chosen = Some((pos, i));
                break;
            }
            match chosen {
                Some((pos, i)) => {
                    // Self-conflict: the build would read its own destination.
                    if matches!(actions[i], ArgAction::Build(_))
                        && self.action_reads(&actions[i]).contains(&i)
                    {
                        self.relocate_home(i);
                    }
                    self.emit_arg(i, &actions[i]);
                    remaining.remove(pos);
                }
                None => {
                    // Every pending argument is blocked; break one read edge.
                    let (reader, target) = remaining
                        .iter()
                        .find_map(|&j| {
                            self.action_reads(&actions[j])
                                .into_iter()
                                .find(|r| remaining.contains(r))
                                .map(|r| (j, r))
                        })
                        .expect("stuck argument sequence without a move conflict");
                    debug!("rotating X{} to break a move cycle (reader X{})", target, reader);
                    self.relocate_home(target);
                }
            }
        }
        Ok(())
    }

    fn emit_arg(&mut self, i: usize, action: &ArgAction<'_>) {
        self.touch(i);
        match action {
            ArgAction::Atom(name) => {
                self.push(Instruction::PutAtom { reg: i, name: (*name).to_string() })
            }
            ArgAction::Fresh { var: None } => {
                self.push(Instruction::PutVar { reg: i, addr: Addr::X(i) })
            }
            ArgAction::Fresh { var: Some(name) } => {
                let addr = if let Some(slot) = self.perm_slot(name) {
                    Addr::Y(slot)
                } else {
                    let home = self.fresh_temp();
                    self.homes.insert((*name).to_string(), Addr::X(home));
                    Addr::X(home)
                };
                self.seen.insert((*name).to_string());
                self.push(Instruction::PutVar { reg: i, addr });
            }
            ArgAction::Move { var } => {
                let addr = self.var_addr(var);
                if addr != Addr::X(i) {
                    self.push(Instruction::PutVal { reg: i, addr });
                }
            }
            ArgAction::Build(term) => self.emit_body_struct(i, term),
        }
    }
}

fn addr_reg(addr: &Addr) -> Option<usize> {
    match addr {
        Addr::X(r) => Some(*r),
        Addr::Y(_) => None,
    }
}

/// Arity of a goal that compiles to a real call, for the register window.
fn goal_call_arity(goal: &Term) -> Option<usize> {
    match goal {
        Term::Atom(name) if !is_builtin(name, 0) => Some(0),
        Term::Struct(name, args) => match (name.as_str(), args.len()) {
            ("=", 2) | ("call", _) | ("put_attr", 3) | ("get_attr", 3) | ("del_attr", 2)
            | ("import", 1) => None,
            (n, a) if is_builtin(n, a) => None,
            (_, a) => Some(a),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::instruction::Instruction as I;

    fn compile_one(clause: Clause) -> CompiledClause {
        compile_clause(&clause, 0).expect("clause compiles")
    }

    /// bit(0). compiles to a single head match and proceed.
    #[test]
    fn fact_with_atom_argument() {
        let clause = Clause::fact(Term::compound("bit", vec![Term::atom("0")]));
        let compiled = compile_one(clause);
        assert_eq!(
            compiled.code,
            vec![I::GetAtom { reg: 0, name: "0".into() }, I::Proceed]
        );
        assert_eq!(compiled.num_perm_vars, 0);
    }

    /// brackets(T, T). shares one temporary across both argument registers.
    #[test]
    fn fact_with_shared_variable() {
        let clause = Clause::fact(Term::compound(
            "brackets",
            vec![Term::var("T"), Term::var("T")],
        ));
        let compiled = compile_one(clause);
        assert_eq!(compiled.code, vec![I::GetVal { reg: 1, addr: Addr::X(0) }, I::Proceed]);
    }

    /// p(A,B,C) :- q(B,C,A). forces a rotation through a scratch register.
    #[test]
    fn register_rotation_on_move_cycle() {
        let clause = Clause::rule(
            Term::compound("p", vec![Term::var("A"), Term::var("B"), Term::var("C")]),
            vec![Term::compound("q", vec![Term::var("B"), Term::var("C"), Term::var("A")])],
        );
        let compiled = compile_one(clause);
        // Single-goal body with no permanent variables: no environment.
        assert!(!compiled.code.contains(&I::Allocate { slots: 0 }));
        assert_eq!(compiled.code.last(), Some(&I::Execute { functor: Functor::new("q", 3) }));
        // One relocation move plus the three argument moves.
        let moves: Vec<_> = compiled
            .code
            .iter()
            .filter(|i| matches!(i, I::PutVal { .. }))
            .collect();
        assert_eq!(moves.len(), 4);
        assert!(compiled.num_registers > 3);
    }

    /// walk2(A,B) :- walk(A,C), walk(C,B), A \== B. makes all three
    /// variables permanent.
    #[test]
    fn permanent_variables_span_chunks() {
        let clause = Clause::rule(
            Term::compound("walk2", vec![Term::var("A"), Term::var("B")]),
            vec![
                Term::compound("walk", vec![Term::var("A"), Term::var("C")]),
                Term::compound("walk", vec![Term::var("C"), Term::var("B")]),
                Term::compound("\\==", vec![Term::var("A"), Term::var("B")]),
            ],
        );
        let compiled = compile_one(clause);
        assert_eq!(compiled.num_perm_vars, 3);
        assert_eq!(compiled.code[0], I::Allocate { slots: 3 });
        assert_eq!(compiled.code[1], I::GetVar { reg: 0, addr: Addr::Y(0) });
        assert_eq!(compiled.code[2], I::GetVar { reg: 1, addr: Addr::Y(1) });
        // The builtin ends the clause: deallocate then proceed.
        let n = compiled.code.len();
        assert_eq!(
            &compiled.code[n - 3..],
            &[
                I::Builtin { name: "\\==".into(), args: vec![Addr::Y(0), Addr::Y(1)] },
                I::Deallocate,
                I::Proceed,
            ]
        );
    }

    /// brackets(.(<,L), T) :- brackets(L, .(>,T0)), brackets(T0, T).
    #[test]
    fn pair_head_and_last_call_optimization() {
        let clause = Clause::rule(
            Term::compound(
                "brackets",
                vec![
                    Term::compound(PAIR, vec![Term::atom("<"), Term::var("L")]),
                    Term::var("T"),
                ],
            ),
            vec![
                Term::compound(
                    "brackets",
                    vec![
                        Term::var("L"),
                        Term::compound(PAIR, vec![Term::atom(">"), Term::var("T0")]),
                    ],
                ),
                Term::compound("brackets", vec![Term::var("T0"), Term::var("T")]),
            ],
        );
        let compiled = compile_one(clause);
        // T and T0 cross chunks; L does not.
        assert_eq!(compiled.num_perm_vars, 2);
        assert_eq!(compiled.code[0], I::Allocate { slots: 2 });
        assert_eq!(compiled.code[1], I::GetPair { reg: 0 });
        assert_eq!(compiled.code[2], I::UnifyAtom { name: "<".into() });
        let n = compiled.code.len();
        assert_eq!(compiled.code[n - 2], I::Deallocate);
        assert_eq!(
            compiled.code[n - 1],
            I::Execute { functor: Functor::new("brackets", 2) }
        );
    }

    /// Nested structs in the head expand breadth-first through fresh
    /// registers.
    #[test]
    fn doubly_nested_head_struct() {
        let clause = Clause::fact(Term::compound(
            "p",
            vec![Term::compound(
                "f",
                vec![Term::compound("g", vec![Term::atom("a")])],
            )],
        ));
        let compiled = compile_one(clause);
        assert_eq!(compiled.code[0], I::GetStruct { reg: 0, functor: Functor::new("f", 1) });
        let I::UnifyVar { addr: Addr::X(fresh) } = compiled.code[1] else {
            panic!("expected unify_var, got {:?}", compiled.code[1]);
        };
        assert_eq!(
            compiled.code[2],
            I::GetStruct { reg: fresh, functor: Functor::new("g", 1) }
        );
        assert_eq!(compiled.code[3], I::UnifyAtom { name: "a".into() });
    }

    #[test]
    fn consecutive_voids_merge() {
        let clause = Clause::fact(Term::compound(
            "p",
            vec![Term::compound(
                "f",
                vec![Term::var("_"), Term::var("_"), Term::atom("a")],
            )],
        ));
        let compiled = compile_one(clause);
        assert_eq!(compiled.code[1], I::UnifyVoid { count: 2 });
    }

    #[test]
    fn head_variable_is_rejected() {
        let clause = Clause::fact(Term::var("X"));
        assert_eq!(
            compile_clause(&clause, 0),
            Err(CompileError::HeadIsVariable("X".into()))
        );
    }

    #[test]
    fn reserved_name_with_wrong_arity_is_rejected() {
        let clause = Clause::rule(
            Term::atom("p"),
            vec![Term::compound("=", vec![Term::atom("a")])],
        );
        assert_eq!(
            compile_clause(&clause, 0),
            Err(CompileError::BuiltinArity("=".into(), 1))
        );
    }

    #[test]
    fn query_variables_are_all_permanent() {
        let goals = vec![
            Term::compound("bit", vec![Term::var("X")]),
            Term::compound("color", vec![Term::var("Y")]),
        ];
        let (compiled, vars) = compile_query(&goals).expect("query compiles");
        assert_eq!(vars, vec![("X".to_string(), 0), ("Y".to_string(), 1)]);
        assert_eq!(compiled.code[0], I::Allocate { slots: 2 });
        // Queries keep their environment alive: calls stay calls and the
        // code ends in proceed.
        assert_eq!(compiled.code.last(), Some(&I::Proceed));
        assert!(!compiled.code.iter().any(|i| matches!(i, I::Execute { .. })));
    }

    /// An equality goal compiles to inline_unify, not a call.
    #[test]
    fn equality_goal_is_inlined() {
        let (compiled, _) = compile_query(&[Term::compound(
            "=",
            vec![Term::var("X"), Term::atom("a")],
        )])
        .expect("query compiles");
        assert!(compiled
            .code
            .iter()
            .any(|i| matches!(i, I::InlineUnify { .. })));
    }
}
