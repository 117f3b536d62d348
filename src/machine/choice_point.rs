// src/machine/choice_point.rs
//! Choice points: saved machine state for backtracking.

use crate::machine::attributes::AttributeTable;
use crate::machine::database::{ClauseId, CodePtr};
use crate::machine::term::{Cell, RefId};

/// Saved state enabling retry of alternative clauses. Pushed when a call
/// finds more than one candidate clause; updated on retry; popped when the
/// last alternative is taken (trust) or the alternatives are exhausted.
#[derive(Debug, Clone)]
pub struct ChoicePoint {
    /// Environment top at creation.
    pub env_top: Option<usize>,
    /// Environment arena length at creation; frames above it are garbage
    /// once this choice point is restored.
    pub envs_len: usize,
    pub continuation: Option<CodePtr>,
    /// Remaining candidate clauses, in source order.
    pub alternatives: Vec<ClauseId>,
    /// Index into `alternatives` of the next clause to try.
    pub next_alt: usize,
    /// The call's argument registers at creation.
    pub saved_args: Vec<Option<Cell>>,
    /// Refs bound since this choice point that predate it and must be
    /// unbound on backtrack.
    pub trail: Vec<RefId>,
    /// Ref-id watermark: refs with an id below this existed before the
    /// choice point, so their bindings are trailed.
    pub ref_mark: usize,
    /// Attribute table at creation, restored wholesale on backtrack.
    pub attr_snapshot: AttributeTable,
}

impl ChoicePoint {
    /// The next alternative, if any, advancing the cursor. Returns the
    /// clause together with whether this was the final alternative.
    pub fn take_alternative(&mut self) -> Option<(ClauseId, bool)> {
        let clause = *self.alternatives.get(self.next_alt)?;
        self.next_alt += 1;
        Some((clause, self.next_alt == self.alternatives.len()))
    }
}
