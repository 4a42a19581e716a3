//! Per-source-line coverage data.

use serde::{Deserialize, Serialize};

use super::counter::Counter;

/// Line number of instructions without line information.
pub const UNKNOWN_LINE: i32 = -1;

/// Highest branch index the per-line mask can record.
const MASK_BITS: u32 = 31;

/// Coverage of one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Line {
    pub instructions: Counter,
    pub branches: Counter,
    /// Bit `i` set when branch `i` of this line was taken; branches past
    /// bit 30 saturate into the top bit
    pub covered_mask: u32,
}

impl Line {
    /// Accumulates one instruction's counters into the line.
    #[must_use]
    pub fn increment(self, instructions: Counter, branches: Counter) -> Self {
        let mut mask = self.covered_mask;
        for i in 0..branches.covered {
            mask |= 1 << i.min(MASK_BITS - 1);
        }
        Self {
            instructions: self.instructions.increment(instructions),
            branches: self.branches.increment(branches),
            covered_mask: mask,
        }
    }

    /// The line carries no instructions at all.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.instructions.total() == 0 && self.branches.total() == 0
    }
}

/// Dense per-line storage with a sliding offset, grown on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineStore {
    offset: i32,
    lines: Vec<Line>,
}

impl LineStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            offset: UNKNOWN_LINE,
            lines: Vec::new(),
        }
    }

    fn ensure_capacity(&mut self, line: i32) {
        if self.offset == UNKNOWN_LINE {
            self.offset = line;
            self.lines.push(Line::default());
        } else if line < self.offset {
            let grow = (self.offset - line) as usize;
            let mut fresh = vec![Line::default(); grow];
            fresh.append(&mut self.lines);
            self.lines = fresh;
            self.offset = line;
        } else {
            let index = (line - self.offset) as usize;
            if index >= self.lines.len() {
                self.lines.resize(index + 1, Line::default());
            }
        }
    }

    /// Accumulates counters into `line`; [`UNKNOWN_LINE`] is ignored.
    pub fn increment(&mut self, line: i32, instructions: Counter, branches: Counter) {
        if line == UNKNOWN_LINE {
            return;
        }
        self.ensure_capacity(line);
        let index = (line - self.offset) as usize;
        self.lines[index] = self.lines[index].increment(instructions, branches);
    }

    /// Merges all lines of `other` into this store.
    pub fn merge(&mut self, other: &Self) {
        for (line, data) in other.iter() {
            self.increment(line, data.instructions, data.branches);
        }
    }

    #[must_use]
    pub fn get(&self, line: i32) -> Line {
        if self.offset == UNKNOWN_LINE || line < self.offset {
            return Line::default();
        }
        self.lines
            .get((line - self.offset) as usize)
            .copied()
            .unwrap_or_default()
    }

    /// First line with data, if any.
    #[must_use]
    pub fn first_line(&self) -> Option<i32> {
        self.iter().map(|(l, _)| l).next()
    }

    /// Last line with data, if any.
    #[must_use]
    pub fn last_line(&self) -> Option<i32> {
        self.iter().map(|(l, _)| l).last()
    }

    /// Counter over lines: a line is covered when any instruction on it
    /// is covered.
    #[must_use]
    pub fn line_counter(&self) -> Counter {
        let mut counter = Counter::ZERO;
        for (_, line) in self.iter() {
            let hit = line.instructions.covered > 0;
            counter = counter.increment(Counter::new(u32::from(!hit), u32::from(hit)));
        }
        counter
    }

    /// Iterates non-empty lines in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, Line)> + '_ {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.is_empty())
            .map(move |(i, l)| (self.offset + i as i32, *l))
    }
}
