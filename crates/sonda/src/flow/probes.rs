//! Probe placement.
//!
//! One deterministic walk assigns probe ids and decides where probes go:
//! on the taken edge of jumps to multi-target markers, inline before
//! fall-through multi-target markers, on switch edges (one per physical
//! label) and before every method exit. Instrumentation and analysis both
//! consume the resulting plan, so ids agree by construction as long as
//! methods are walked in declaration order.

use std::collections::HashMap;

use crate::unit::opcode::{Insn, LabelId};
use crate::unit::Code;

use super::tagger::MarkerTags;

/// Class-scoped sequential probe id source.
#[derive(Debug, Default)]
pub struct IdGen {
    next: u32,
}

impl IdGen {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Ids handed out so far.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.next
    }
}

/// A probe attached to one instruction of the original body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSite {
    /// Inline probe executed when control falls through into the marker
    AtMarker { label: LabelId, id: u32 },
    /// Probe on the taken edge of a jump
    JumpTaken { id: u32 },
    /// Probe immediately before a return or throw
    BeforeExit { id: u32 },
    /// Probes on switch edges, one per probed physical label
    SwitchTargets { targets: Vec<(LabelId, u32)> },
}

/// Probe sites of one method, keyed by instruction index.
#[derive(Debug, Default)]
pub struct ProbePlan {
    sites: HashMap<usize, ProbeSite>,
}

impl ProbePlan {
    /// The probe site attached to the instruction at `index`, if any.
    #[must_use]
    pub fn site_at(&self, index: usize) -> Option<&ProbeSite> {
        self.sites.get(&index)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Number of instructions that carry probes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }
}

/// Assigns probe ids and sites for one method body.
#[must_use]
pub fn plan_probes(code: &Code, tags: &mut MarkerTags, ids: &mut IdGen) -> ProbePlan {
    let mut plan = ProbePlan::default();
    for (index, insn) in code.insns.iter().enumerate() {
        match insn {
            Insn::Marker(label) => {
                if tags.needs_inline_probe(*label) {
                    plan.sites.insert(
                        index,
                        ProbeSite::AtMarker {
                            label: *label,
                            id: ids.next_id(),
                        },
                    );
                }
            }
            Insn::Jump { target, .. } => {
                if tags.is_multi_target(*target) {
                    plan.sites
                        .insert(index, ProbeSite::JumpTaken { id: ids.next_id() });
                }
            }
            Insn::Switch { keys, default } => {
                tags.reset_done(std::iter::once(*default).chain(keys.iter().map(|&(_, l)| l)));
                let mut targets = Vec::new();
                for label in std::iter::once(*default).chain(keys.iter().map(|&(_, l)| l)) {
                    if tags.is_done(label) {
                        continue;
                    }
                    tags.set_done(label);
                    if tags.is_multi_target(label) {
                        targets.push((label, ids.next_id()));
                    }
                }
                if !targets.is_empty() {
                    plan.sites.insert(index, ProbeSite::SwitchTargets { targets });
                }
            }
            Insn::Return(_) | Insn::Throw => {
                plan.sites
                    .insert(index, ProbeSite::BeforeExit { id: ids.next_id() });
            }
            _ => {}
        }
    }
    plan
}
