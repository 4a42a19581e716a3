//! Missed/covered counter pairs.
//!
//! Counters are tiny copyable values. Small counters additionally exist
//! as interned singletons so that callers holding a `&'static Counter`
//! can compare by pointer identity; arithmetic always goes through plain
//! values.

use serde::{Deserialize, Serialize};

/// Values up to this bound (inclusive) have interned singletons.
pub const SINGLETON_LIMIT: u32 = 30;

static SINGLETONS: [[Counter; SINGLETON_LIMIT as usize + 1]; SINGLETON_LIMIT as usize + 1] =
    build_singletons();

const fn build_singletons(
) -> [[Counter; SINGLETON_LIMIT as usize + 1]; SINGLETON_LIMIT as usize + 1] {
    let mut table =
        [[Counter::ZERO; SINGLETON_LIMIT as usize + 1]; SINGLETON_LIMIT as usize + 1];
    let mut missed = 0;
    while missed <= SINGLETON_LIMIT as usize {
        let mut covered = 0;
        while covered <= SINGLETON_LIMIT as usize {
            table[missed][covered] = Counter {
                missed: missed as u32,
                covered: covered as u32,
            };
            covered += 1;
        }
        missed += 1;
    }
    table
}

/// Counts of missed and covered items of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counter {
    pub missed: u32,
    pub covered: u32,
}

impl Counter {
    pub const ZERO: Self = Self { missed: 0, covered: 0 };

    #[must_use]
    pub const fn new(missed: u32, covered: u32) -> Self {
        Self { missed, covered }
    }

    /// The interned singleton for small counters, shared process-wide.
    /// Two calls with equal small operands return the same reference.
    #[must_use]
    pub fn shared(missed: u32, covered: u32) -> Option<&'static Self> {
        if missed <= SINGLETON_LIMIT && covered <= SINGLETON_LIMIT {
            Some(&SINGLETONS[missed as usize][covered as usize])
        } else {
            None
        }
    }

    #[must_use]
    pub const fn total(self) -> u32 {
        self.missed + self.covered
    }

    /// Component-wise sum.
    #[must_use]
    pub const fn increment(self, other: Self) -> Self {
        Self {
            missed: self.missed + other.missed,
            covered: self.covered + other.covered,
        }
    }

    #[must_use]
    pub const fn status(self) -> CoverageStatus {
        match (self.missed, self.covered) {
            (0, 0) => CoverageStatus::Empty,
            (_, 0) => CoverageStatus::NotCovered,
            (0, _) => CoverageStatus::FullyCovered,
            _ => CoverageStatus::PartlyCovered,
        }
    }

    /// Covered fraction in `[0, 1]`, or `None` when nothing was counted.
    #[must_use]
    pub fn covered_ratio(self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            None
        } else {
            Some(f64::from(self.covered) / f64::from(total))
        }
    }
}

/// Coverage state of a node or counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageStatus {
    /// Nothing to cover
    Empty,
    /// Analyzed without execution data, so nothing is known either way.
    /// Distinct from [`NotCovered`](Self::NotCovered), which means the
    /// code demonstrably did not run.
    NoData,
    NotCovered,
    PartlyCovered,
    FullyCovered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_are_identity_shared() {
        let a = Counter::shared(3, 7).unwrap();
        let b = Counter::shared(3, 7).unwrap();
        assert!(std::ptr::eq(a, b));
        let c = Counter::shared(3, 8).unwrap();
        assert!(!std::ptr::eq(a, c));
        assert_eq!(*a, Counter::new(3, 7));
    }

    #[test]
    fn large_counters_are_not_interned() {
        assert!(Counter::shared(SINGLETON_LIMIT, SINGLETON_LIMIT).is_some());
        assert!(Counter::shared(SINGLETON_LIMIT + 1, 0).is_none());
        assert!(Counter::shared(0, SINGLETON_LIMIT + 1).is_none());
    }

    #[test]
    fn increment_is_component_wise() {
        let c = Counter::new(1, 2).increment(Counter::new(3, 4));
        assert_eq!(c, Counter::new(4, 6));
        assert_eq!(c.total(), 10);
    }

    #[test]
    fn status_partition() {
        assert_eq!(Counter::ZERO.status(), CoverageStatus::Empty);
        assert_eq!(Counter::new(2, 0).status(), CoverageStatus::NotCovered);
        assert_eq!(Counter::new(0, 2).status(), CoverageStatus::FullyCovered);
        assert_eq!(Counter::new(1, 1).status(), CoverageStatus::PartlyCovered);
    }

    #[test]
    fn ratio_handles_empty() {
        assert!(Counter::ZERO.covered_ratio().is_none());
        let r = Counter::new(1, 3).covered_ratio().unwrap();
        assert!((r - 0.75).abs() < f64::EPSILON);
    }
}
