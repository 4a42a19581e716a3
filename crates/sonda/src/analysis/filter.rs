//! Coverage filters.
//!
//! Filters inspect a method body and emit directives over instruction
//! indices: ignore a range, declare two instructions equivalent, or
//! replace an instruction's branches with a different target set. The
//! calculator applies the directives after the graph is built, so filters
//! never touch probe placement.

use crate::unit::opcode::{Insn, VarKind};
use crate::unit::{Code, MethodDef};

/// Sink for filter directives. Indices refer to the original instruction
/// stream of the method.
pub trait FilterOutput {
    /// Exclude instructions `from..=to` from coverage entirely.
    fn ignore(&mut self, from: usize, to: usize);

    /// Treat two instructions as one: coverage of either counts for the
    /// representative, the other is ignored.
    fn merge(&mut self, a: usize, b: usize);

    /// Replace the branches of `source` with the given target
    /// instructions.
    fn replace_branches(&mut self, source: usize, targets: Vec<usize>);
}

/// A coverage filter.
pub trait Filter {
    fn filter(&self, method: &MethodDef, code: &Code, output: &mut dyn FilterOutput);
}

/// Collected directives of all filters for one method.
#[derive(Debug, Default)]
pub struct FilterDirectives {
    pub ignored: Vec<(usize, usize)>,
    pub merged: Vec<(usize, usize)>,
    pub replacements: Vec<(usize, Vec<usize>)>,
}

impl FilterOutput for FilterDirectives {
    fn ignore(&mut self, from: usize, to: usize) {
        self.ignored.push((from, to));
    }

    fn merge(&mut self, a: usize, b: usize) {
        self.merged.push((a, b));
    }

    fn replace_branches(&mut self, source: usize, targets: Vec<usize>) {
        self.replacements.push((source, targets));
    }
}

/// Runs the built-in filters over one method.
pub fn run_filters(method: &MethodDef, code: &Code) -> FilterDirectives {
    let mut directives = FilterDirectives::default();
    SynchronizedExitFilter.filter(method, code, &mut directives);
    directives
}

/// Ignores the compiler-generated monitor-release handler of
/// `synchronized` blocks: the catch-any region that releases the monitor
/// and rethrows. Application code never branches there deliberately, so
/// counting it only produces phantom missed lines.
pub struct SynchronizedExitFilter;

impl Filter for SynchronizedExitFilter {
    fn filter(&self, _method: &MethodDef, code: &Code, output: &mut dyn FilterOutput) {
        for handler in &code.handlers {
            if !handler.catch_type.is_empty() {
                continue;
            }
            let Some(start) = code
                .insns
                .iter()
                .position(|i| *i == Insn::Marker(handler.handler))
            else {
                continue;
            };
            if let Some((from, to)) = match_exit_sequence(&code.insns, start + 1) {
                output.ignore(from, to);
            }
        }
    }
}

/// Matches the two shapes compilers emit for the release handler:
/// `store e; load m; monitorexit; load e; throw` or the shorter
/// `load m; monitorexit; throw`.
fn match_exit_sequence(insns: &[Insn], from: usize) -> Option<(usize, usize)> {
    let mut real = insns
        .iter()
        .enumerate()
        .skip(from)
        .filter(|(_, i)| !i.is_pseudo());

    let (first_idx, first) = real.next()?;
    let stored = match first {
        Insn::Store { kind: VarKind::Ref, var } => Some(*var),
        Insn::Load { kind: VarKind::Ref, .. } => None,
        _ => return None,
    };
    if stored.is_some() {
        let (_, insn) = real.next()?;
        if !matches!(insn, Insn::Load { kind: VarKind::Ref, .. }) {
            return None;
        }
    }
    let (_, insn) = real.next()?;
    if !matches!(insn, Insn::MonitorExit) {
        return None;
    }
    if let Some(var) = stored {
        let (_, insn) = real.next()?;
        if !matches!(insn, Insn::Load { kind: VarKind::Ref, var: v } if *v == var) {
            return None;
        }
    }
    let (last_idx, insn) = real.next()?;
    if !matches!(insn, Insn::Throw) {
        return None;
    }
    Some((first_idx, last_idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Handler, ACC_PUBLIC};

    fn method() -> MethodDef {
        MethodDef {
            flags: ACC_PUBLIC,
            name: "locked".into(),
            desc: "()V".into(),
            code: None,
        }
    }

    fn code(insns: Vec<Insn>, handlers: Vec<Handler>) -> Code {
        Code {
            max_stack: 2,
            max_locals: 3,
            insns,
            handlers,
            frames: vec![],
        }
    }

    fn catch_any(handler: u16) -> Handler {
        Handler { start: 0, end: 1, handler, catch_type: String::new() }
    }

    #[test]
    fn long_release_handler_is_ignored() {
        let insns = vec![
            Insn::Marker(0),
            Insn::Nop,
            Insn::Marker(1),
            Insn::Return(None),
            Insn::Marker(2),
            Insn::Store { kind: VarKind::Ref, var: 2 },
            Insn::Load { kind: VarKind::Ref, var: 1 },
            Insn::MonitorExit,
            Insn::Load { kind: VarKind::Ref, var: 2 },
            Insn::Throw,
        ];
        let c = code(insns, vec![catch_any(2)]);
        let d = run_filters(&method(), &c);
        assert_eq!(d.ignored, vec![(5, 9)]);
    }

    #[test]
    fn short_release_handler_is_ignored() {
        let insns = vec![
            Insn::Marker(0),
            Insn::Return(None),
            Insn::Marker(1),
            Insn::Line(9),
            Insn::Load { kind: VarKind::Ref, var: 1 },
            Insn::MonitorExit,
            Insn::Throw,
        ];
        let c = code(insns, vec![catch_any(1)]);
        let d = run_filters(&method(), &c);
        assert_eq!(d.ignored, vec![(4, 6)]);
    }

    #[test]
    fn typed_handlers_and_real_code_are_kept() {
        // a real catch block: not the release pattern
        let insns = vec![
            Insn::Marker(0),
            Insn::Return(None),
            Insn::Marker(1),
            Insn::Store { kind: VarKind::Ref, var: 1 },
            Insn::Return(None),
        ];
        let typed = Handler {
            start: 0,
            end: 1,
            handler: 1,
            catch_type: "demo/Failure".into(),
        };
        let c = code(insns.clone(), vec![typed]);
        assert!(run_filters(&method(), &c).ignored.is_empty());

        // catch-any but the body does not release a monitor
        let c = code(insns, vec![catch_any(1)]);
        assert!(run_filters(&method(), &c).ignored.is_empty());
    }

    #[test]
    fn rethrow_of_a_different_local_is_not_matched() {
        let insns = vec![
            Insn::Marker(0),
            Insn::Return(None),
            Insn::Marker(1),
            Insn::Store { kind: VarKind::Ref, var: 2 },
            Insn::Load { kind: VarKind::Ref, var: 1 },
            Insn::MonitorExit,
            Insn::Load { kind: VarKind::Ref, var: 1 },
            Insn::Throw,
        ];
        let c = code(insns, vec![catch_any(1)]);
        assert!(run_filters(&method(), &c).ignored.is_empty());
    }
}
