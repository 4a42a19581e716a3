//! Instruction nodes of the reduced control-flow graph.
//!
//! Analysis does not need a full graph: every node remembers at most one
//! predecessor together with the branch index it arrived on. Coverage is
//! propagated backwards along that chain and stops at the first node that
//! already has coverage, which keeps propagation linear overall.

use super::counter::Counter;

/// Index of a node in an [`InsnArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Growable bit set for covered branch indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSet {
    words: Vec<u64>,
}

impl BranchSet {
    pub fn set(&mut self, bit: u32) {
        let word = bit as usize / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (bit % 64);
    }

    #[must_use]
    pub fn get(&self, bit: u32) -> bool {
        self.words
            .get(bit as usize / 64)
            .is_some_and(|w| w & (1 << (bit % 64)) != 0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn union(&mut self, other: &Self) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }
}

/// One instruction node.
#[derive(Debug, Clone, Default)]
pub struct InsnNode {
    line: i32,
    /// Outgoing branches registered so far
    branches: u32,
    covered: BranchSet,
    /// The single remembered incoming edge: predecessor node and the
    /// branch index this node occupies in it
    predecessor: Option<(NodeId, u32)>,
}

/// Arena of instruction nodes for one method.
#[derive(Debug, Default)]
pub struct InsnArena {
    nodes: Vec<InsnNode>,
}

impl InsnArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, line: i32) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(InsnNode {
            line,
            ..InsnNode::default()
        });
        id
    }

    #[must_use]
    pub fn line(&self, node: NodeId) -> i32 {
        self.nodes[node.0].line
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registers a control-flow edge from `from` to `to` as branch
    /// `branch` of `from`. If `to` already has coverage, the edge is
    /// immediately known taken and coverage propagates backwards.
    pub fn add_branch(&mut self, from: NodeId, to: NodeId, branch: u32) {
        self.nodes[from.0].branches += 1;
        self.nodes[to.0].predecessor = Some((from, branch));
        if !self.nodes[to.0].covered.is_empty() {
            self.propagate(from, branch);
        }
    }

    /// Registers branch `branch` of `at` whose outcome a probe recorded
    /// directly.
    pub fn add_probe_branch(&mut self, at: NodeId, branch: u32, executed: bool) {
        self.nodes[at.0].branches += 1;
        if executed {
            self.propagate(at, branch);
        }
    }

    /// Marks branch `branch` of `node` covered and walks the predecessor
    /// chain. A node that already had coverage ends the walk after taking
    /// the new branch bit: everything upstream of it is already settled.
    fn propagate(&mut self, mut node: NodeId, mut branch: u32) {
        loop {
            let settled = !self.nodes[node.0].covered.is_empty();
            self.nodes[node.0].covered.set(branch);
            if settled {
                return;
            }
            match self.nodes[node.0].predecessor {
                Some((pred, pred_branch)) => {
                    node = pred;
                    branch = pred_branch;
                }
                None => return,
            }
        }
    }

    /// A fresh node holding the union of two nodes' coverage, used when a
    /// filter declares instructions equivalent.
    pub fn merge(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let mut covered = self.nodes[a.0].covered.clone();
        covered.union(&self.nodes[b.0].covered);
        let id = NodeId(self.nodes.len());
        self.nodes.push(InsnNode {
            line: self.nodes[a.0].line,
            branches: self.nodes[a.0].branches,
            covered,
            predecessor: None,
        });
        id
    }

    /// A fresh node whose branches are the given targets: one branch per
    /// target, covered when the target has any coverage.
    pub fn replace_branches(&mut self, source: NodeId, targets: &[NodeId]) -> NodeId {
        let mut covered = BranchSet::default();
        let mut idx = 0;
        for &target in targets {
            if !self.nodes[target.0].covered.is_empty() {
                covered.set(idx);
                idx += 1;
            }
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(InsnNode {
            line: self.nodes[source.0].line,
            branches: targets.len() as u32,
            covered,
            predecessor: None,
        });
        id
    }

    /// Instruction counter of one node: (1,0) missed or (0,1) covered.
    #[must_use]
    pub fn instruction_counter(&self, node: NodeId) -> Counter {
        if self.nodes[node.0].covered.is_empty() {
            Counter::new(1, 0)
        } else {
            Counter::new(0, 1)
        }
    }

    /// Branch counter of one node; nodes with fewer than two branches
    /// contribute nothing.
    #[must_use]
    pub fn branch_counter(&self, node: NodeId) -> Counter {
        let n = &self.nodes[node.0];
        if n.branches < 2 {
            return Counter::ZERO;
        }
        let covered = n.covered.count();
        Counter::new(n.branches - covered, covered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_coverage_propagates_up_a_chain() {
        let mut arena = InsnArena::new();
        let a = arena.add_node(1);
        let b = arena.add_node(2);
        let c = arena.add_node(3);
        arena.add_branch(a, b, 0);
        arena.add_branch(b, c, 0);
        // an exit probe on c was hit
        arena.add_probe_branch(c, 0, true);
        for node in [a, b, c] {
            assert_eq!(arena.instruction_counter(node), Counter::new(0, 1));
        }
    }

    #[test]
    fn propagation_stops_at_settled_nodes() {
        let mut arena = InsnArena::new();
        let top = arena.add_node(1);
        let join = arena.add_node(2);
        let exit = arena.add_node(3);
        arena.add_branch(top, join, 0);
        arena.add_branch(join, exit, 0);
        arena.add_probe_branch(exit, 0, true);
        assert_eq!(arena.branch_counter(join), Counter::ZERO);
        // a second covered edge into the join must not re-walk upstream
        arena.add_probe_branch(join, 1, true);
        assert_eq!(arena.branch_counter(join), Counter::new(0, 2));
    }

    #[test]
    fn wiring_an_edge_to_covered_target_back_propagates() {
        let mut arena = InsnArena::new();
        let jump = arena.add_node(1);
        let target = arena.add_node(5);
        arena.add_probe_branch(target, 0, true);
        arena.add_branch(jump, target, 1);
        assert_eq!(arena.instruction_counter(jump), Counter::new(0, 1));
    }

    #[test]
    fn branch_counter_needs_two_branches() {
        let mut arena = InsnArena::new();
        let lone = arena.add_node(1);
        arena.add_probe_branch(lone, 0, true);
        assert_eq!(arena.branch_counter(lone), Counter::ZERO);

        let cond = arena.add_node(2);
        arena.add_probe_branch(cond, 0, true);
        arena.add_probe_branch(cond, 1, false);
        assert_eq!(arena.branch_counter(cond), Counter::new(1, 1));
    }

    #[test]
    fn merge_unions_coverage_into_a_fresh_node() {
        let mut arena = InsnArena::new();
        let a = arena.add_node(4);
        let b = arena.add_node(4);
        arena.add_probe_branch(a, 0, true);
        arena.add_probe_branch(b, 0, false);
        let merged = arena.merge(a, b);
        assert_eq!(arena.instruction_counter(merged), Counter::new(0, 1));
        assert_eq!(arena.line(merged), 4);
    }

    #[test]
    fn replace_branches_counts_covered_targets() {
        let mut arena = InsnArena::new();
        let source = arena.add_node(1);
        let t1 = arena.add_node(2);
        let t2 = arena.add_node(3);
        let t3 = arena.add_node(4);
        arena.add_probe_branch(t1, 0, true);
        arena.add_probe_branch(t3, 0, true);
        let replaced = arena.replace_branches(source, &[t1, t2, t3]);
        assert_eq!(arena.branch_counter(replaced), Counter::new(1, 2));
        assert_eq!(arena.instruction_counter(replaced), Counter::new(0, 1));
    }

    #[test]
    fn branch_set_grows_past_one_word() {
        let mut set = BranchSet::default();
        set.set(70);
        assert!(set.get(70));
        assert!(!set.get(7));
        assert_eq!(set.count(), 1);
    }
}
