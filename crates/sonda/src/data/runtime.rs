//! Runtime support for instrumented code.
//!
//! [`MonitorGuard`] mirrors the advice the instrumenter emits around
//! monitor instructions: a thread-local nesting depth that tells the probe
//! writer whether the current thread holds a lock. [`LiveProbes`] is the
//! shared in-process probe array those writes land in.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::probes::{ProbeArray, ProbeMode};

thread_local! {
    static MONITOR_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Thread-local monitor nesting counter.
///
/// Incremented immediately before a monitor is entered and decremented
/// immediately after it is released, so the depth is nonzero for the whole
/// time the thread can rely on mutual exclusion.
#[derive(Debug)]
pub struct MonitorGuard;

impl MonitorGuard {
    /// Records that the current thread is about to enter a monitor.
    pub fn enter() {
        MONITOR_DEPTH.with(|d| d.set(d.get().saturating_add(1)));
    }

    /// Records that the current thread released a monitor.
    pub fn exit() {
        MONITOR_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }

    /// Whether the current thread holds at least one monitor.
    #[must_use]
    pub fn is_locked() -> bool {
        MONITOR_DEPTH.with(Cell::get) > 0
    }

    /// Current nesting depth, for tests and diagnostics.
    #[must_use]
    pub fn depth() -> u32 {
        MONITOR_DEPTH.with(Cell::get)
    }
}

/// Live, shared probe storage for one instrumented unit.
///
/// `Exists` probes are plain flag stores. Counting probes pick a slot per
/// hit: while the writing thread holds a monitor the lock-protected slot
/// is incremented exactly; otherwise the primary slot takes a racy
/// read-modify-write, emulating the unsynchronized field increment the
/// instrumented code performs. Counts saturate instead of wrapping.
#[derive(Debug)]
pub struct LiveProbes {
    mode: ProbeMode,
    flags: Vec<AtomicBool>,
    primary: Vec<AtomicU32>,
    parallel: Vec<AtomicU32>,
}

impl LiveProbes {
    #[must_use]
    pub fn new(mode: ProbeMode, len: usize) -> Self {
        let zeroes = |n: usize| (0..n).map(|_| AtomicU32::new(0)).collect();
        match mode {
            ProbeMode::Exists => Self {
                mode,
                flags: (0..len).map(|_| AtomicBool::new(false)).collect(),
                primary: Vec::new(),
                parallel: Vec::new(),
            },
            ProbeMode::Count => Self {
                mode,
                flags: Vec::new(),
                primary: zeroes(len),
                parallel: Vec::new(),
            },
            ProbeMode::ParallelCount => Self {
                mode,
                flags: Vec::new(),
                primary: zeroes(len),
                parallel: zeroes(len),
            },
        }
    }

    #[must_use]
    pub const fn mode(&self) -> ProbeMode {
        self.mode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self.mode {
            ProbeMode::Exists => self.flags.len(),
            ProbeMode::Count | ProbeMode::ParallelCount => self.primary.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records a hit of probe `index` on the current thread.
    pub fn hit(&self, index: usize) {
        match self.mode {
            ProbeMode::Exists => {
                if let Some(flag) = self.flags.get(index) {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            ProbeMode::Count => {
                if MonitorGuard::is_locked() {
                    saturating_fetch_add(&self.primary, index);
                } else {
                    racy_increment(&self.primary, index);
                }
            }
            ProbeMode::ParallelCount => {
                if MonitorGuard::is_locked() {
                    saturating_fetch_add(&self.parallel, index);
                } else {
                    racy_increment(&self.primary, index);
                }
            }
        }
    }

    /// Copies the current values into an owned [`ProbeArray`].
    #[must_use]
    pub fn snapshot(&self) -> ProbeArray {
        let read = |v: &[AtomicU32]| v.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        match self.mode {
            ProbeMode::Exists => ProbeArray::Exists(
                self.flags
                    .iter()
                    .map(|f| f.load(Ordering::Relaxed))
                    .collect(),
            ),
            ProbeMode::Count => ProbeArray::Count(read(&self.primary)),
            ProbeMode::ParallelCount => ProbeArray::ParallelCount {
                primary: read(&self.primary),
                parallel: read(&self.parallel),
            },
        }
    }

    /// Zeroes all slots.
    pub fn reset(&self) {
        for f in &self.flags {
            f.store(false, Ordering::Relaxed);
        }
        for c in self.primary.iter().chain(&self.parallel) {
            c.store(0, Ordering::Relaxed);
        }
    }
}

fn saturating_fetch_add(slots: &[AtomicU32], index: usize) {
    if let Some(slot) = slots.get(index) {
        slot.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            (v < u32::MAX).then(|| v + 1)
        })
        .ok();
    }
}

// Deliberately non-atomic read-then-write: hits may be lost under
// contention, matching the plain field increment in instrumented code.
fn racy_increment(slots: &[AtomicU32], index: usize) {
    if let Some(slot) = slots.get(index) {
        let v = slot.load(Ordering::Relaxed);
        slot.store(v.saturating_add(1), Ordering::Relaxed);
    }
}
