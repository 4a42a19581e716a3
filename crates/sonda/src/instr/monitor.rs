//! Monitor-awareness advice.
//!
//! Counting probe modes need to know whether the executing thread holds a
//! monitor when a probe fires. The instrumenter weaves calls to the
//! runtime's nesting counter: before every monitor acquisition, after
//! every release, and around the implicit monitor of synchronized
//! methods. The calls take nothing and return nothing, so they never
//! affect stack or locals.

use crate::data::ProbeMode;
use crate::unit::opcode::Insn;
use crate::unit::{MethodDef, ACC_SYNCHRONIZED};

/// Runtime class holding the thread-local nesting counter.
pub const GUARD_OWNER: &str = "sonda/rt/MonitorGuard";

fn guard_call(name: &str) -> Insn {
    Insn::InvokeStatic {
        owner: GUARD_OWNER.to_string(),
        name: name.to_string(),
        desc: "()V".to_string(),
    }
}

/// Advice weaving decisions for one method.
#[derive(Debug)]
pub struct MonitorAdvice {
    active: bool,
    synchronized: bool,
}

impl MonitorAdvice {
    #[must_use]
    pub fn for_method(mode: ProbeMode, method: &MethodDef) -> Self {
        Self {
            active: mode.is_counting(),
            synchronized: method.flags & ACC_SYNCHRONIZED != 0,
        }
    }

    /// Advice at method entry: a synchronized method runs under its
    /// monitor from the first instruction on.
    pub fn on_entry(&self, out: &mut Vec<Insn>) {
        if self.active && self.synchronized {
            out.push(guard_call("enter"));
        }
    }

    /// Advice before a return or throw leaves a synchronized method.
    pub fn on_exit(&self, out: &mut Vec<Insn>) {
        if self.active && self.synchronized {
            out.push(guard_call("exit"));
        }
    }

    /// Advice emitted before `insn`: the counter rises before the
    /// monitor is actually entered, so a probe on the acquisition
    /// instruction itself already counts as locked.
    pub fn before(&self, insn: &Insn, out: &mut Vec<Insn>) {
        if self.active && matches!(insn, Insn::MonitorEnter) {
            out.push(guard_call("enter"));
        }
    }

    /// Advice emitted after `insn`: the counter drops only once the
    /// monitor is really released.
    pub fn after(&self, insn: &Insn, out: &mut Vec<Insn>) {
        if self.active && matches!(insn, Insn::MonitorExit) {
            out.push(guard_call("exit"));
        }
    }
}
