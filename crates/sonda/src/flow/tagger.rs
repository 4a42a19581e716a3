//! Marker tagging pass.
//!
//! A single forward walk classifies every marker before probes are placed:
//! a marker is a *target* when a jump, switch or handler table references
//! it, a *successor* when the preceding instruction can fall through into
//! it, and *multi-target* when control reaches it along more than one edge.
//! Only multi-target markers ever receive probes.

use crate::unit::opcode::{Insn, JumpCond, LabelId};
use crate::unit::Code;

#[derive(Debug, Clone, Copy, Default)]
struct TagInfo {
    target: bool,
    multi: bool,
    successor: bool,
    /// Scratch flag for per-switch physical-label dedup
    done: bool,
}

/// Tags for every marker of one method body.
#[derive(Debug)]
pub struct MarkerTags {
    tags: Vec<TagInfo>,
}

impl MarkerTags {
    /// Runs the tagging walk over a method body.
    #[must_use]
    pub fn analyze(code: &Code) -> Self {
        let mut tags = Self {
            tags: vec![TagInfo::default(); code.label_count()],
        };
        // Handler table edges exist regardless of instruction order.
        for h in &code.handlers {
            tags.set_target(h.start);
            tags.set_target(h.handler);
        }
        let mut successor = false;
        let mut first = true;
        for insn in &code.insns {
            match insn {
                Insn::Marker(l) => {
                    if first {
                        tags.set_target(*l);
                    }
                    if successor {
                        tags.set_successor(*l);
                    }
                }
                Insn::Line(_) => {}
                Insn::Jump { cond, target } => {
                    tags.set_target(*target);
                    successor = *cond != JumpCond::Goto;
                    first = false;
                }
                Insn::Switch { keys, default } => {
                    tags.reset_done(std::iter::once(*default).chain(keys.iter().map(|&(_, l)| l)));
                    // Each physical label counts as one edge per switch,
                    // no matter how many keys share it.
                    for label in std::iter::once(*default).chain(keys.iter().map(|&(_, l)| l)) {
                        if !tags.is_done(label) {
                            tags.set_done(label);
                            tags.set_target(label);
                        }
                    }
                    successor = false;
                    first = false;
                }
                Insn::Return(_) | Insn::Throw => {
                    successor = false;
                    first = false;
                }
                _ => {
                    successor = true;
                    first = false;
                }
            }
        }
        tags
    }

    fn set_target(&mut self, label: LabelId) {
        let tag = &mut self.tags[label as usize];
        if tag.target || tag.successor {
            tag.multi = true;
        } else {
            tag.target = true;
        }
    }

    fn set_successor(&mut self, label: LabelId) {
        let tag = &mut self.tags[label as usize];
        tag.successor = true;
        if tag.target {
            tag.multi = true;
        }
    }

    /// Control reaches this marker along more than one edge.
    #[must_use]
    pub fn is_multi_target(&self, label: LabelId) -> bool {
        self.tags.get(label as usize).is_some_and(|t| t.multi)
    }

    /// The preceding instruction can fall through into this marker.
    #[must_use]
    pub fn is_successor(&self, label: LabelId) -> bool {
        self.tags.get(label as usize).is_some_and(|t| t.successor)
    }

    /// A fall-through multi-target marker needs an inline probe.
    #[must_use]
    pub fn needs_inline_probe(&self, label: LabelId) -> bool {
        let Some(tag) = self.tags.get(label as usize) else {
            return false;
        };
        tag.multi && tag.successor
    }

    /// Clears the dedup scratch flag on the given labels.
    pub fn reset_done(&mut self, labels: impl Iterator<Item = LabelId>) {
        for label in labels {
            self.tags[label as usize].done = false;
        }
    }

    #[must_use]
    pub fn is_done(&self, label: LabelId) -> bool {
        self.tags[label as usize].done
    }

    pub fn set_done(&mut self, label: LabelId) {
        self.tags[label as usize].done = true;
    }
}
