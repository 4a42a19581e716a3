//! Builds the reduced control-flow graph of one method.
//!
//! The builder is fed events in instruction order: lines, markers, real
//! instructions, jumps and probes. Sequence edges are wired immediately;
//! jump edges are deferred until all markers have nodes and wired in
//! [`finish`](InstructionsBuilder::finish).

use std::collections::HashMap;

use crate::data::ProbeArray;
use crate::unit::opcode::LabelId;

use super::instruction::{InsnArena, NodeId};
use super::line::UNKNOWN_LINE;

struct Jump {
    from: NodeId,
    target: LabelId,
    branch: u32,
}

/// Event-driven graph builder for one method body.
pub struct InstructionsBuilder<'a> {
    probes: Option<&'a ProbeArray>,
    arena: InsnArena,
    current_line: i32,
    current: Option<NodeId>,
    pending_labels: Vec<LabelId>,
    label_nodes: HashMap<LabelId, NodeId>,
    jumps: Vec<Jump>,
}

impl<'a> InstructionsBuilder<'a> {
    /// `probes` are the recorded values; `None` analyzes structure only,
    /// with nothing covered.
    #[must_use]
    pub fn new(probes: Option<&'a ProbeArray>) -> Self {
        Self {
            probes,
            arena: InsnArena::new(),
            current_line: UNKNOWN_LINE,
            current: None,
            pending_labels: Vec::new(),
            label_nodes: HashMap::new(),
            jumps: Vec::new(),
        }
    }

    /// Source line for the instructions that follow.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line as i32;
    }

    /// A marker; it attaches to the next instruction. A marker that
    /// cannot be fallen into breaks the sequence edge.
    pub fn add_label(&mut self, label: LabelId, is_successor: bool) {
        self.pending_labels.push(label);
        if !is_successor {
            self.no_successor();
        }
    }

    /// A real instruction: becomes a node, collects pending markers and
    /// receives the sequence edge from its predecessor as branch 0.
    pub fn add_instruction(&mut self) -> NodeId {
        let node = self.arena.add_node(self.current_line);
        for label in self.pending_labels.drain(..) {
            self.label_nodes.insert(label, node);
        }
        if let Some(prev) = self.current {
            self.arena.add_branch(prev, node, 0);
        }
        self.current = Some(node);
        node
    }

    /// The current instruction does not flow into the next one.
    pub fn no_successor(&mut self) {
        self.current = None;
    }

    /// A jump edge of the current instruction, wired once markers are
    /// resolved.
    pub fn add_jump(&mut self, target: LabelId, branch: u32) {
        let Some(from) = self.current else {
            panic!("jump event without a current instruction");
        };
        self.jumps.push(Jump { from, target, branch });
    }

    /// A probe on a branch of the current instruction.
    pub fn add_probe(&mut self, probe_id: u32, branch: u32) {
        let Some(at) = self.current else {
            panic!("probe event without a current instruction");
        };
        let executed = self
            .probes
            .is_some_and(|p| p.is_covered(probe_id as usize));
        self.arena.add_probe_branch(at, branch, executed);
    }

    /// Wires the deferred jump edges and hands the arena over.
    ///
    /// # Panics
    ///
    /// A jump to a marker that never attached to an instruction is an
    /// internal consistency violation.
    #[must_use]
    pub fn finish(mut self) -> InsnArena {
        for jump in self.jumps.drain(..) {
            let Some(&target) = self.label_nodes.get(&jump.target) else {
                panic!("jump to unresolved marker {}", jump.target);
            };
            self.arena.add_branch(jump.from, target, jump.branch);
        }
        self.arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::counter::Counter;
    use crate::data::ProbeMode;

    #[test]
    fn sequence_edges_chain_instructions() {
        let probes = ProbeArray::Exists(vec![true]);
        let mut b = InstructionsBuilder::new(Some(&probes));
        b.set_line(3);
        let first = b.add_instruction();
        let second = b.add_instruction();
        b.add_probe(0, 0);
        let arena = b.finish();
        assert_eq!(arena.line(first), 3);
        assert_eq!(arena.instruction_counter(first), Counter::new(0, 1));
        assert_eq!(arena.instruction_counter(second), Counter::new(0, 1));
    }

    #[test]
    fn deferred_jump_wires_to_later_marker() {
        // jump forward to a marker, with the jump's probe covered
        let probes = ProbeArray::Exists(vec![true, false]);
        let mut b = InstructionsBuilder::new(Some(&probes));
        let jump = b.add_instruction();
        b.add_jump(0, 1);
        b.add_probe(1, 0); // fall-through exit probe, missed
        b.no_successor();
        b.add_label(0, false);
        let target = b.add_instruction();
        b.add_probe(0, 0); // exit probe at target, covered
        let arena = b.finish();
        assert_eq!(arena.instruction_counter(target), Counter::new(0, 1));
        // the jump saw its target covered through the wired edge
        assert_eq!(arena.instruction_counter(jump), Counter::new(0, 1));
        assert_eq!(arena.branch_counter(jump), Counter::new(1, 1));
    }

    #[test]
    fn none_probes_leave_everything_missed() {
        let mut b = InstructionsBuilder::new(None);
        let n = b.add_instruction();
        b.add_probe(0, 0);
        let arena = b.finish();
        assert_eq!(arena.instruction_counter(n), Counter::new(1, 0));
    }

    #[test]
    fn non_successor_label_breaks_the_chain() {
        let probes = ProbeArray::new(ProbeMode::Exists, 1);
        let mut b = InstructionsBuilder::new(Some(&probes));
        let before = b.add_instruction();
        b.add_label(0, false);
        let after = b.add_instruction();
        let arena = b.finish();
        // no sequence edge: covering `after` must not touch `before`
        assert_eq!(arena.instruction_counter(before), Counter::new(1, 0));
        assert_eq!(arena.instruction_counter(after), Counter::new(1, 0));
    }

    #[test]
    #[should_panic(expected = "unresolved marker")]
    fn unresolved_jump_target_panics() {
        let mut b = InstructionsBuilder::new(None);
        b.add_instruction();
        b.add_jump(9, 1);
        let _ = b.finish();
    }
}
