//! Per-method coverage analysis.
//!
//! The analyzer replays a method body through the graph builder, feeding
//! it the same probe plan instrumentation used, so probe ids line up
//! without any shared state. The calculator then applies filter
//! directives and folds the graph into a [`MethodCoverage`].

use std::collections::{HashMap, HashSet};

use crate::data::ProbeArray;
use crate::flow::{MarkerTags, ProbePlan, ProbeSite};
use crate::unit::opcode::{Insn, LabelId};
use crate::unit::{Code, MethodDef};

use super::builder::InstructionsBuilder;
use super::filter::{run_filters, FilterDirectives};
use super::instruction::{InsnArena, NodeId};
use super::nodes::MethodCoverage;

/// Analyzes one method body against recorded probes.
#[must_use]
pub fn analyze_method(
    method: &MethodDef,
    code: &Code,
    plan: &ProbePlan,
    tags: &mut MarkerTags,
    probes: Option<&ProbeArray>,
) -> MethodCoverage {
    let (arena, node_of) = build_graph(code, plan, tags, probes);
    let directives = run_filters(method, code);
    Calculator {
        arena,
        node_of,
        overrides: HashMap::new(),
    }
    .calculate(method, &directives)
}

fn build_graph(
    code: &Code,
    plan: &ProbePlan,
    tags: &mut MarkerTags,
    probes: Option<&ProbeArray>,
) -> (InsnArena, Vec<Option<NodeId>>) {
    let mut builder = InstructionsBuilder::new(probes);
    let mut node_of: Vec<Option<NodeId>> = vec![None; code.insns.len()];
    for (index, insn) in code.insns.iter().enumerate() {
        match (insn, plan.site_at(index)) {
            (Insn::Marker(label), Some(ProbeSite::AtMarker { id, .. })) => {
                // The inline probe owns the fall-through edge into the
                // marker; the sequence edge is cut so it is not counted
                // twice.
                builder.add_probe(*id, 0);
                builder.no_successor();
                builder.add_label(*label, tags.is_successor(*label));
            }
            (Insn::Marker(label), _) => {
                builder.add_label(*label, tags.is_successor(*label));
            }
            (Insn::Line(line), _) => builder.set_line(*line),
            (Insn::Jump { .. }, Some(ProbeSite::JumpTaken { id })) => {
                node_of[index] = Some(builder.add_instruction());
                builder.add_probe(*id, 1);
            }
            (Insn::Jump { target, .. }, _) => {
                node_of[index] = Some(builder.add_instruction());
                builder.add_jump(*target, 1);
            }
            (Insn::Switch { keys, default }, site) => {
                node_of[index] = Some(builder.add_instruction());
                let probed: HashMap<LabelId, u32> = match site {
                    Some(ProbeSite::SwitchTargets { targets }) => {
                        targets.iter().copied().collect()
                    }
                    _ => HashMap::new(),
                };
                // Branch numbering matches placement: default first, then
                // keys, one branch per physical label.
                tags.reset_done(
                    std::iter::once(*default).chain(keys.iter().map(|&(_, l)| l)),
                );
                let mut branch = 0;
                for label in std::iter::once(*default).chain(keys.iter().map(|&(_, l)| l)) {
                    if tags.is_done(label) {
                        continue;
                    }
                    tags.set_done(label);
                    match probed.get(&label) {
                        Some(id) => builder.add_probe(*id, branch),
                        None => builder.add_jump(label, branch),
                    }
                    branch += 1;
                }
            }
            (Insn::Return(_) | Insn::Throw, Some(ProbeSite::BeforeExit { id })) => {
                node_of[index] = Some(builder.add_instruction());
                builder.add_probe(*id, 0);
            }
            _ => {
                node_of[index] = Some(builder.add_instruction());
            }
        }
    }
    (builder.finish(), node_of)
}

struct Calculator {
    arena: InsnArena,
    node_of: Vec<Option<NodeId>>,
    /// Nodes rebuilt by merges or branch replacements, keyed by
    /// instruction index
    overrides: HashMap<usize, NodeId>,
}

impl Calculator {
    fn calculate(mut self, method: &MethodDef, directives: &FilterDirectives) -> MethodCoverage {
        let mut ignored: HashSet<usize> = HashSet::new();
        for &(from, to) in &directives.ignored {
            ignored.extend(from..=to);
        }
        self.apply_merges(directives, &mut ignored);
        self.apply_replacements(directives);

        let mut coverage = MethodCoverage::new(&method.name, &method.desc);
        for index in 0..self.node_of.len() {
            if ignored.contains(&index) {
                continue;
            }
            let Some(node) = self.node_at(index) else {
                continue;
            };
            coverage.increment(
                self.arena.instruction_counter(node),
                self.arena.branch_counter(node),
                self.arena.line(node),
            );
        }
        coverage.increment_method_counter();
        coverage
    }

    fn node_at(&self, index: usize) -> Option<NodeId> {
        self.overrides
            .get(&index)
            .copied()
            .or_else(|| self.node_of.get(index).copied().flatten())
    }

    fn apply_merges(&mut self, directives: &FilterDirectives, ignored: &mut HashSet<usize>) {
        // b joins a's equivalence class; the representative is found by
        // chasing the map.
        let mut merged: HashMap<usize, usize> = HashMap::new();
        for &(a, b) in &directives.merged {
            let rep = find_representative(&merged, a);
            merged.insert(b, rep);
        }
        let members: Vec<usize> = merged.keys().copied().collect();
        for member in members {
            let rep = find_representative(&merged, member);
            ignored.insert(member);
            let (Some(rep_node), Some(member_node)) = (self.node_at(rep), self.node_at(member))
            else {
                continue;
            };
            let combined = self.arena.merge(rep_node, member_node);
            self.overrides.insert(rep, combined);
        }
    }

    fn apply_replacements(&mut self, directives: &FilterDirectives) {
        for (source, targets) in &directives.replacements {
            let Some(source_node) = self.node_at(*source) else {
                continue;
            };
            let target_nodes: Vec<NodeId> =
                targets.iter().filter_map(|&t| self.node_at(t)).collect();
            let replaced = self.arena.replace_branches(source_node, &target_nodes);
            self.overrides.insert(*source, replaced);
        }
    }
}

fn find_representative(merged: &HashMap<usize, usize>, mut index: usize) -> usize {
    while let Some(&next) = merged.get(&index) {
        if next == index {
            break;
        }
        index = next;
    }
    index
}
