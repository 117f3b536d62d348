// src/machine/snapshot.rs
//! Debug snapshots: one JSON-serializable record per instruction step.
//!
//! The first record carries the compiled clause table; later records omit
//! it. Instruction addresses render as `functor#clausePos[pos]`. Cells are
//! rendered through the heap printer, so records stay readable and finite
//! even on cyclic graphs.

use serde::Serialize;

use crate::machine::core::{Machine, Mode};
use crate::machine::database::ClauseAddr;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineSnapshot {
    pub mode: String,
    pub continuation: Option<String>,
    pub complex_arg: ComplexArgSnapshot,
    pub code_ptr: CodePtrSnapshot,
    pub reg: Vec<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clauses: Option<Vec<ClauseListing>>,
    pub envs: Vec<EnvSnapshot>,
    pub env_pos: Option<usize>,
    pub choice_points: Vec<ChoicePointSnapshot>,
    pub choice_pos: Option<usize>,
    pub unif_frames: Vec<UnifFrameSnapshot>,
    pub attributes: Vec<AttributeSnapshot>,
    /// True on the snapshot that triggered backtracking.
    pub backtrack: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComplexArgSnapshot {
    pub mode: String,
    pub index: usize,
    pub cell: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodePtrSnapshot {
    pub clause_pos: usize,
    pub pos: usize,
    #[serde(rename = "Ref")]
    pub addr: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClauseListing {
    pub functor: String,
    pub clause_pos: usize,
    pub code: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvSnapshot {
    pub prev_pos: Option<usize>,
    pub continuation: Option<String>,
    pub permanent_vars: Vec<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoicePointSnapshot {
    pub prev_pos: Option<usize>,
    pub next_alternative: Option<String>,
    pub continuation: Option<String>,
    pub env_pos: Option<usize>,
    pub args: Vec<Option<String>>,
    pub trail: Vec<TrailSnapshot>,
    pub attributes: Vec<AttributeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrailSnapshot {
    pub id: usize,
    pub term: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnifFrameSnapshot {
    pub attributed_ref: usize,
    pub binding_value: String,
    pub bindings: Vec<BindingSnapshot>,
    pub attributes: Vec<AttributeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BindingSnapshot {
    #[serde(rename = "Ref")]
    pub id: usize,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeSnapshot {
    pub id: usize,
    pub attribute: String,
    pub value: String,
}

impl<'a> Machine<'a> {
    pub(crate) fn record_snapshot(&mut self, backtrack: bool) {
        let clauses = if self.trace_log.is_empty() {
            Some(self.clause_listings())
        } else {
            None
        };
        let snapshot = MachineSnapshot {
            mode: mode_name(self.mode).to_string(),
            continuation: self.continuation.map(|ptr| self.render_code_ptr(ptr)),
            complex_arg: ComplexArgSnapshot {
                mode: mode_name(self.mode).to_string(),
                index: self.complex_arg.index,
                cell: self
                    .complex_arg
                    .struct_id
                    .map(|sid| self.heap.render(&crate::machine::term::Cell::Struct(sid))),
            },
            code_ptr: CodePtrSnapshot {
                clause_pos: self.clause(self.code_ptr.clause).clause_pos,
                pos: self.code_ptr.pos,
                addr: self.render_code_ptr(self.code_ptr),
            },
            reg: self
                .registers
                .iter()
                .map(|slot| slot.as_ref().map(|cell| self.heap.render(cell)))
                .collect(),
            clauses,
            envs: self
                .envs
                .iter()
                .map(|env| EnvSnapshot {
                    prev_pos: env.prev,
                    continuation: env.continuation.map(|ptr| self.render_code_ptr(ptr)),
                    permanent_vars: env
                        .slots
                        .iter()
                        .map(|slot| slot.as_ref().map(|cell| self.heap.render(cell)))
                        .collect(),
                })
                .collect(),
            env_pos: self.env_top,
            choice_points: self
                .choice_stack
                .iter()
                .enumerate()
                .map(|(i, cp)| ChoicePointSnapshot {
                    prev_pos: i.checked_sub(1),
                    next_alternative: cp
                        .alternatives
                        .get(cp.next_alt)
                        .map(|&id| self.render_code_ptr(crate::machine::database::CodePtr::entry(ClauseAddr::Db(id)))),
                    continuation: cp.continuation.map(|ptr| self.render_code_ptr(ptr)),
                    env_pos: cp.env_top,
                    args: cp
                        .saved_args
                        .iter()
                        .map(|slot| slot.as_ref().map(|cell| self.heap.render(cell)))
                        .collect(),
                    trail: cp
                        .trail
                        .iter()
                        .map(|&id| TrailSnapshot {
                            id,
                            term: self
                                .heap
                                .ref_value(id)
                                .map(|cell| self.heap.render(cell))
                                .unwrap_or_else(|| format!("_{}", id)),
                        })
                        .collect(),
                    attributes: attribute_snapshots(self, &cp.attr_snapshot),
                })
                .collect(),
            choice_pos: self.choice_stack.len().checked_sub(1),
            unif_frames: self
                .unif_frames
                .iter()
                .map(|frame| UnifFrameSnapshot {
                    attributed_ref: frame.attributed_ref,
                    binding_value: self.heap.render(&frame.binding_value),
                    bindings: frame
                        .bindings
                        .iter()
                        .map(|(id, cell)| BindingSnapshot {
                            id: *id,
                            value: self.heap.render(cell),
                        })
                        .collect(),
                    attributes: frame
                        .attributes
                        .iter()
                        .map(|(pkg, value)| AttributeSnapshot {
                            id: frame.attributed_ref,
                            attribute: pkg.clone(),
                            value: self.heap.render(value),
                        })
                        .collect(),
                })
                .collect(),
            attributes: attribute_snapshots(self, &self.attributes),
            backtrack,
        };
        self.trace_log.push(snapshot);
    }

    fn clause_listings(&self) -> Vec<ClauseListing> {
        let mut listings: Vec<ClauseListing> = self
            .db
            .clauses
            .iter()
            .map(|clause| ClauseListing {
                functor: clause.functor.to_string(),
                clause_pos: clause.clause_pos,
                code: clause.code.iter().map(|instr| instr.to_string()).collect(),
            })
            .collect();
        listings.push(ClauseListing {
            functor: self.query.functor.to_string(),
            clause_pos: 0,
            code: self.query.code.iter().map(|instr| instr.to_string()).collect(),
        });
        listings
    }
}

fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Run => "run",
        Mode::Read => "read",
        Mode::Write => "write",
    }
}

fn attribute_snapshots(
    machine: &Machine<'_>,
    table: &crate::machine::attributes::AttributeTable,
) -> Vec<AttributeSnapshot> {
    let mut out: Vec<AttributeSnapshot> = table
        .iter()
        .flat_map(|(&id, list)| {
            list.iter().map(move |(pkg, value)| (id, pkg.clone(), value.clone()))
        })
        .map(|(id, attribute, value)| AttributeSnapshot {
            id,
            attribute,
            value: machine.heap.render(&value),
        })
        .collect();
    out.sort_by(|a, b| (a.id, &a.attribute).cmp(&(b.id, &b.attribute)));
    out
}
