//! Operand stack and local variable simulation.
//!
//! The tracker replays a method body cell by cell so the instrumenter can
//! synthesize stack map frames for the intermediate markers it creates.
//! State is kept expanded: a long occupies `[Long, Top]` in both locals
//! and stack. Declared frames replace the simulated state wholesale, which
//! also makes code after an unconditional exit tractable. At control-flow
//! joins states merge per cell, unrelated references collapsing to the
//! common supertype placeholder.

use crate::result::{SondaError, SondaResult};
use crate::unit::opcode::{
    ElemKind, Frame, Insn, LabelId, MethodDesc, TypeDesc, VType, VarKind, STRING_TYPE,
};
use crate::unit::{Code, MethodDef, ACC_STATIC};

/// Simulated verification state, advanced one instruction at a time.
#[derive(Debug)]
pub struct FrameTracker {
    locals: Vec<VType>,
    stack: Vec<VType>,
    /// Owner of the method being tracked, for `this` and constructor
    /// completion
    owner: String,
}

impl FrameTracker {
    /// Entry state of a method: `this` (uninitialized in a constructor)
    /// followed by the expanded parameters.
    pub fn at_entry(owner: &str, method: &MethodDef) -> SondaResult<Self> {
        let desc = MethodDesc::parse(&method.desc)?;
        let mut locals = Vec::new();
        if method.flags & ACC_STATIC == 0 {
            locals.push(if method.name == "<init>" {
                VType::UninitThis
            } else {
                VType::Ref(owner.to_string())
            });
        }
        for param in &desc.params {
            push_expanded(&mut locals, VType::of(param));
        }
        Ok(Self {
            locals,
            stack: Vec::new(),
            owner: owner.to_string(),
        })
    }

    /// Replaces the simulated state with a declared frame.
    pub fn apply_frame(&mut self, frame: &Frame) {
        self.locals = frame.locals.clone();
        self.stack = frame.stack.clone();
    }

    /// Checks the simulated state against a declared frame, then adopts
    /// the declared cells. Every simulated cell must merge into its
    /// declared counterpart without widening it further.
    pub fn reconcile_frame(&mut self, frame: &Frame) -> SondaResult<()> {
        if self.stack.len() != frame.stack.len() {
            return Err(verify(format!(
                "declared frame expects stack depth {}, found {}",
                frame.stack.len(),
                self.stack.len()
            )));
        }
        for (sim, decl) in self.stack.iter().zip(&frame.stack) {
            if &sim.merge(decl) != decl {
                return Err(verify(format!(
                    "stack cell {sim:?} does not fit declared {decl:?}"
                )));
            }
        }
        for (index, decl) in frame.locals.iter().enumerate() {
            let sim = self.locals.get(index).cloned().unwrap_or(VType::Top);
            if &sim.merge(decl) != decl {
                return Err(verify(format!(
                    "local {index} {sim:?} does not fit declared {decl:?}"
                )));
            }
        }
        self.apply_frame(frame);
        Ok(())
    }

    /// Merges a recorded jump-edge state into the fall-through state at a
    /// marker that has no declared frame.
    pub fn merge_frame(&mut self, frame: &Frame) -> SondaResult<()> {
        let merged = merge_frames(&self.snapshot(), frame)?;
        self.locals = merged.locals;
        self.stack = merged.stack;
        Ok(())
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Frame {
        Frame {
            locals: self.locals.clone(),
            stack: self.stack.clone(),
        }
    }

    /// Snapshot with the top `pops` stack cells removed: the state on the
    /// taken edge of a jump before the jump consumed its operands.
    pub fn snapshot_with_pops(&self, pops: u16) -> SondaResult<Frame> {
        let pops = pops as usize;
        if self.stack.len() < pops {
            return Err(stack_underflow());
        }
        Ok(Frame {
            locals: self.locals.clone(),
            stack: self.stack[..self.stack.len() - pops].to_vec(),
        })
    }

    /// Cells currently on the operand stack.
    #[must_use]
    pub fn stack_size(&self) -> u16 {
        self.stack.len() as u16
    }

    /// Advances over one instruction.
    #[allow(clippy::too_many_lines)]
    pub fn step(&mut self, insn: &Insn) -> SondaResult<()> {
        match insn {
            Insn::Nop | Insn::Marker(_) | Insn::Line(_) => {}
            Insn::PushInt(_) => self.push(VType::Int),
            Insn::PushLong(_) => self.push_wide(VType::Long),
            Insn::PushFloat(_) => self.push(VType::Float),
            Insn::PushDouble(_) => self.push_wide(VType::Double),
            Insn::PushNull => self.push(VType::Null),
            Insn::PushString(_) => self.push(VType::Ref(STRING_TYPE.to_string())),
            Insn::PushDynamic { desc, .. } => {
                let t = TypeDesc::parse(desc)?;
                self.push_type(&t);
            }
            Insn::Load { kind, var } => self.load(*kind, *var)?,
            Insn::Store { kind, var } => self.store(*kind, *var)?,
            Insn::IncInt { var, .. } => {
                if self.locals.get(*var as usize) != Some(&VType::Int) {
                    return Err(verify(format!("increment of non-int local {var}")));
                }
            }
            Insn::IntOp(_) => {
                self.pop_n(2)?;
                self.push(VType::Int);
            }
            Insn::LongOp(_) => {
                self.pop_n(4)?;
                self.push_wide(VType::Long);
            }
            Insn::LongCmp => {
                self.pop_n(4)?;
                self.push(VType::Int);
            }
            Insn::NewArray(kind) => {
                self.pop_n(1)?;
                self.push(VType::Ref(kind.array_desc().to_string()));
            }
            Insn::ArrayLoad(kind) => {
                self.pop_n(2)?;
                self.push_elem(*kind);
            }
            Insn::ArrayStore(kind) => {
                self.pop_n(2 + kind.slots() as usize)?;
            }
            Insn::ArrayLength => {
                self.pop_n(1)?;
                self.push(VType::Int);
            }
            Insn::GetStatic { desc, .. } => {
                let t = TypeDesc::parse(desc)?;
                self.push_type(&t);
            }
            Insn::PutStatic { desc, .. } => {
                let t = TypeDesc::parse(desc)?;
                self.pop_n(t.slots() as usize)?;
            }
            Insn::GetField { desc, .. } => {
                self.pop_n(1)?;
                let t = TypeDesc::parse(desc)?;
                self.push_type(&t);
            }
            Insn::PutField { desc, .. } => {
                let t = TypeDesc::parse(desc)?;
                self.pop_n(t.slots() as usize + 1)?;
            }
            Insn::InvokeStatic { desc, .. } => {
                let d = MethodDesc::parse(desc)?;
                self.pop_n(d.param_slots() as usize)?;
                if let Some(ret) = &d.ret {
                    self.push_type(ret);
                }
            }
            Insn::InvokeVirtual { owner, name, desc } => {
                let d = MethodDesc::parse(desc)?;
                self.pop_n(d.param_slots() as usize + 1)?;
                if name == "<init>" {
                    self.complete_init(owner);
                }
                if let Some(ret) = &d.ret {
                    self.push_type(ret);
                }
            }
            Insn::InvokeDynamic { desc, .. } => {
                let d = MethodDesc::parse(desc)?;
                self.pop_n(d.param_slots() as usize)?;
                if let Some(ret) = &d.ret {
                    self.push_type(ret);
                }
            }
            Insn::New(name) => self.push(VType::Ref(name.clone())),
            Insn::Jump { cond, .. } => {
                self.pop_n(cond.pops() as usize)?;
            }
            Insn::Switch { .. } => {
                self.pop_n(1)?;
            }
            Insn::Return(kind) => {
                if let Some(k) = kind {
                    self.pop_n(k.slots() as usize)?;
                }
            }
            Insn::Throw | Insn::MonitorEnter | Insn::MonitorExit | Insn::Pop => {
                self.pop_n(1)?;
            }
            Insn::Dup => {
                let top = self.stack.last().ok_or_else(stack_underflow)?.clone();
                if top == VType::Top {
                    return Err(verify("dup of wide half"));
                }
                self.stack.push(top);
            }
            Insn::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(stack_underflow());
                }
                if self.stack[len - 1] == VType::Top || self.stack[len - 2] == VType::Top {
                    return Err(verify("swap of wide half"));
                }
                self.stack.swap(len - 1, len - 2);
            }
        }
        Ok(())
    }

    fn load(&mut self, kind: VarKind, var: u16) -> SondaResult<()> {
        let cell = self
            .locals
            .get(var as usize)
            .ok_or_else(|| verify(format!("load of undefined local {var}")))?
            .clone();
        match kind {
            VarKind::Int => self.check_and_push(cell, &VType::Int, var)?,
            VarKind::Float => self.check_and_push(cell, &VType::Float, var)?,
            VarKind::Long => {
                if cell != VType::Long {
                    return Err(verify(format!("local {var} is not a long")));
                }
                self.push_wide(VType::Long);
            }
            VarKind::Double => {
                if cell != VType::Double {
                    return Err(verify(format!("local {var} is not a double")));
                }
                self.push_wide(VType::Double);
            }
            VarKind::Ref => match cell {
                VType::Null | VType::UninitThis | VType::Ref(_) => self.push(cell),
                other => {
                    return Err(verify(format!("local {var} is not a reference: {other:?}")))
                }
            },
        }
        Ok(())
    }

    fn check_and_push(&mut self, cell: VType, expected: &VType, var: u16) -> SondaResult<()> {
        if &cell != expected {
            return Err(verify(format!("local {var} is not a {expected:?}")));
        }
        self.push(cell);
        Ok(())
    }

    fn store(&mut self, kind: VarKind, var: u16) -> SondaResult<()> {
        let slots = kind.slots() as usize;
        if self.stack.len() < slots {
            return Err(stack_underflow());
        }
        let value = if slots == 2 {
            self.stack.pop();
            self.stack.pop().ok_or_else(stack_underflow)?
        } else {
            self.stack.pop().ok_or_else(stack_underflow)?
        };
        self.set_local(var, value, slots == 2);
        Ok(())
    }

    fn set_local(&mut self, var: u16, value: VType, wide: bool) {
        let index = var as usize;
        let needed = index + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VType::Top);
        }
        // Overwriting the second half of a wide pair kills its start.
        if index > 0 && self.locals[index - 1].is_wide() {
            self.locals[index - 1] = VType::Top;
        }
        self.locals[index] = value;
        if wide {
            self.locals[index + 1] = VType::Top;
        }
    }

    /// After a constructor call, the uninitialized receiver becomes a
    /// plain reference everywhere it appears.
    fn complete_init(&mut self, owner: &str) {
        let replacement = VType::Ref(if owner == self.owner {
            self.owner.clone()
        } else {
            owner.to_string()
        });
        for cell in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if *cell == VType::UninitThis {
                *cell = replacement.clone();
            }
        }
    }

    fn push(&mut self, t: VType) {
        self.stack.push(t);
    }

    fn push_wide(&mut self, t: VType) {
        self.stack.push(t);
        self.stack.push(VType::Top);
    }

    fn push_type(&mut self, t: &TypeDesc) {
        match t {
            TypeDesc::Long | TypeDesc::Double => self.push_wide(VType::of(t)),
            _ => self.push(VType::of(t)),
        }
    }

    fn push_elem(&mut self, kind: ElemKind) {
        match kind {
            ElemKind::Flag | ElemKind::Int => self.push(VType::Int),
            ElemKind::Long => self.push_wide(VType::Long),
        }
    }

    fn pop_n(&mut self, n: usize) -> SondaResult<()> {
        if self.stack.len() < n {
            return Err(stack_underflow());
        }
        self.stack.truncate(self.stack.len() - n);
        Ok(())
    }
}

fn push_expanded(cells: &mut Vec<VType>, t: VType) {
    let wide = t.is_wide();
    cells.push(t);
    if wide {
        cells.push(VType::Top);
    }
}

/// Cell-wise merge of two states flowing into the same marker. Stack
/// depths must agree; locals pad with `Top` on the shorter side.
fn merge_frames(a: &Frame, b: &Frame) -> SondaResult<Frame> {
    if a.stack.len() != b.stack.len() {
        return Err(verify(format!(
            "stack depth {} meets {} at a join",
            a.stack.len(),
            b.stack.len()
        )));
    }
    let locals_len = a.locals.len().max(b.locals.len());
    let cell = |cells: &[VType], i: usize| cells.get(i).cloned().unwrap_or(VType::Top);
    Ok(Frame {
        locals: (0..locals_len)
            .map(|i| cell(&a.locals, i).merge(&cell(&b.locals, i)))
            .collect(),
        stack: a.stack.iter().zip(&b.stack).map(|(x, y)| x.merge(y)).collect(),
    })
}

fn record_edge(
    edges: &mut std::collections::HashMap<LabelId, Frame>,
    label: LabelId,
    frame: Frame,
) -> SondaResult<()> {
    match edges.entry(label) {
        std::collections::hash_map::Entry::Occupied(mut e) => {
            let merged = merge_frames(e.get(), &frame)?;
            e.insert(merged);
        }
        std::collections::hash_map::Entry::Vacant(e) => {
            e.insert(frame);
        }
    }
    Ok(())
}

fn verify(reason: impl Into<String>) -> SondaError {
    SondaError::VerificationFailed {
        method: String::new(),
        reason: reason.into(),
    }
}

fn stack_underflow() -> SondaError {
    verify("operand stack underflow")
}

/// Attaches the method name to a verification error raised inside the
/// tracker.
pub fn in_method(err: SondaError, method: &MethodDef) -> SondaError {
    match err {
        SondaError::VerificationFailed { reason, .. } => SondaError::VerificationFailed {
            method: format!("{}{}", method.name, method.desc),
            reason,
        },
        other => other,
    }
}

/// Replays a whole body, checking stack discipline and declared limits.
///
/// Declared frames must reconcile with the simulated fall-through state
/// and then replace it. Markers without a declared frame recover or
/// refine their state from the jump edges recorded on the way down, so
/// pre-frame format versions verify too. Everything in between must stay
/// within `max_stack`/`max_locals` and never underflow.
pub fn verify_method(owner: &str, method: &MethodDef, code: &Code) -> SondaResult<()> {
    let mut tracker = FrameTracker::at_entry(owner, method).map_err(|e| in_method(e, method))?;
    let declared: std::collections::HashMap<LabelId, &Frame> =
        code.frames.iter().map(|(l, f)| (*l, f)).collect();
    let mut edges: std::collections::HashMap<LabelId, Frame> = std::collections::HashMap::new();
    let mut live = true;
    for insn in &code.insns {
        if let Insn::Marker(label) = insn {
            match (declared.get(label), live) {
                (Some(frame), true) => {
                    tracker.reconcile_frame(frame).map_err(|e| in_method(e, method))?;
                }
                (Some(frame), false) => tracker.apply_frame(frame),
                (None, true) => {
                    if let Some(edge) = edges.get(label) {
                        tracker.merge_frame(edge).map_err(|e| in_method(e, method))?;
                    }
                }
                (None, false) => {
                    let Some(edge) = edges.get(label) else {
                        return Err(in_method(
                            verify(format!("marker {label} with no known entry state")),
                            method,
                        ));
                    };
                    tracker.apply_frame(edge);
                }
            }
            live = true;
        }
        if !live && !insn.is_pseudo() {
            return Err(in_method(verify("unreachable instruction"), method));
        }
        if live {
            match insn {
                Insn::Jump { cond, target } => {
                    let edge = tracker
                        .snapshot_with_pops(cond.pops())
                        .map_err(|e| in_method(e, method))?;
                    record_edge(&mut edges, *target, edge).map_err(|e| in_method(e, method))?;
                }
                Insn::Switch { keys, default } => {
                    let edge = tracker
                        .snapshot_with_pops(1)
                        .map_err(|e| in_method(e, method))?;
                    record_edge(&mut edges, *default, edge.clone())
                        .map_err(|e| in_method(e, method))?;
                    for (_, label) in keys {
                        record_edge(&mut edges, *label, edge.clone())
                            .map_err(|e| in_method(e, method))?;
                    }
                }
                _ => {}
            }
            tracker.step(insn).map_err(|e| in_method(e, method))?;
            if tracker.stack_size() > code.max_stack {
                return Err(in_method(
                    verify(format!(
                        "stack grows to {} over declared {}",
                        tracker.stack_size(),
                        code.max_stack
                    )),
                    method,
                ));
            }
            if tracker.locals.len() > code.max_locals as usize {
                return Err(in_method(
                    verify(format!(
                        "locals grow to {} over declared {}",
                        tracker.locals.len(),
                        code.max_locals
                    )),
                    method,
                ));
            }
            if !insn.falls_through() {
                live = false;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::opcode::{BinOp, JumpCond};
    use crate::unit::ACC_PUBLIC;

    fn method(name: &str, desc: &str, flags: u16, code: Code) -> MethodDef {
        MethodDef {
            flags,
            name: name.into(),
            desc: desc.into(),
            code: Some(code),
        }
    }

    fn simple_code(max_stack: u16, max_locals: u16, insns: Vec<Insn>) -> Code {
        Code {
            max_stack,
            max_locals,
            insns,
            handlers: vec![],
            frames: vec![],
        }
    }

    #[test]
    fn entry_state_expands_parameters() {
        let m = method("grow", "(IJ)I", ACC_PUBLIC, simple_code(0, 4, vec![]));
        let t = FrameTracker::at_entry("demo/Widget", &m).unwrap();
        assert_eq!(
            t.snapshot().locals,
            vec![
                VType::Ref("demo/Widget".into()),
                VType::Int,
                VType::Long,
                VType::Top,
            ]
        );
    }

    #[test]
    fn constructor_receiver_starts_uninitialized() {
        let m = method("<init>", "()V", ACC_PUBLIC, simple_code(0, 1, vec![]));
        let mut t = FrameTracker::at_entry("demo/Widget", &m).unwrap();
        assert_eq!(t.snapshot().locals, vec![VType::UninitThis]);
        t.step(&Insn::Load { kind: VarKind::Ref, var: 0 }).unwrap();
        t.step(&Insn::InvokeVirtual {
            owner: "core/Object".into(),
            name: "<init>".into(),
            desc: "()V".into(),
        })
        .unwrap();
        assert_eq!(t.snapshot().locals, vec![VType::Ref("core/Object".into())]);
    }

    #[test]
    fn wide_store_writes_pair_and_kills_split_neighbor() {
        let m = method("f", "()V", ACC_PUBLIC | ACC_STATIC, simple_code(4, 4, vec![]));
        let mut t = FrameTracker::at_entry("demo/Widget", &m).unwrap();
        t.step(&Insn::PushLong(1)).unwrap();
        t.step(&Insn::Store { kind: VarKind::Long, var: 0 }).unwrap();
        assert_eq!(t.snapshot().locals, vec![VType::Long, VType::Top]);
        // Storing an int into the second half demotes the long.
        t.step(&Insn::PushInt(0)).unwrap();
        t.step(&Insn::Store { kind: VarKind::Int, var: 1 }).unwrap();
        assert_eq!(t.snapshot().locals, vec![VType::Top, VType::Int]);
    }

    #[test]
    fn snapshot_with_pops_gives_taken_edge_state() {
        let m = method("f", "(II)V", ACC_PUBLIC | ACC_STATIC, simple_code(4, 4, vec![]));
        let mut t = FrameTracker::at_entry("demo/Widget", &m).unwrap();
        t.step(&Insn::PushInt(3)).unwrap();
        t.step(&Insn::Load { kind: VarKind::Int, var: 0 }).unwrap();
        t.step(&Insn::Load { kind: VarKind::Int, var: 1 }).unwrap();
        let edge = t
            .snapshot_with_pops(JumpCond::IfICmpLt.pops())
            .unwrap();
        assert_eq!(edge.stack, vec![VType::Int]);
        assert_eq!(t.stack_size(), 3);
    }

    #[test]
    fn verify_catches_underflow_and_stack_overrun() {
        let m = method(
            "f",
            "()V",
            ACC_PUBLIC | ACC_STATIC,
            simple_code(1, 0, vec![Insn::Pop, Insn::Return(None)]),
        );
        let err = verify_method("demo/Widget", &m, m.code.as_ref().unwrap()).unwrap_err();
        assert!(matches!(err, SondaError::VerificationFailed { .. }));

        let m = method(
            "f",
            "()V",
            ACC_PUBLIC | ACC_STATIC,
            simple_code(
                1,
                0,
                vec![Insn::PushInt(1), Insn::PushInt(2), Insn::IntOp(BinOp::Add),
                     Insn::Pop, Insn::Return(None)],
            ),
        );
        assert!(verify_method("demo/Widget", &m, m.code.as_ref().unwrap()).is_err());
    }

    #[test]
    fn frameless_join_recovers_and_merges_edge_states() {
        // both arms leave one reference on the stack; no declared frames
        let code = simple_code(
            1,
            1,
            vec![
                Insn::Load { kind: VarKind::Int, var: 0 },
                Insn::Jump { cond: JumpCond::IfEq, target: 0 },
                Insn::PushString("a".into()),
                Insn::Jump { cond: JumpCond::Goto, target: 1 },
                Insn::Marker(0),
                Insn::PushNull,
                Insn::Marker(1),
                Insn::Return(Some(VarKind::Ref)),
            ],
        );
        let m = method("f", "(I)Lcore/Object;", ACC_PUBLIC | ACC_STATIC, code);
        assert!(verify_method("demo/Widget", &m, m.code.as_ref().unwrap()).is_ok());
    }

    #[test]
    fn declared_frame_must_fit_the_fall_through_state() {
        // local 0 is an int but the declared frame claims a float
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            insns: vec![
                Insn::Load { kind: VarKind::Int, var: 0 },
                Insn::Marker(0),
                Insn::Return(Some(VarKind::Int)),
            ],
            handlers: vec![],
            frames: vec![(0, Frame { locals: vec![VType::Float], stack: vec![VType::Int] })],
        };
        let m = method("f", "(I)I", ACC_PUBLIC | ACC_STATIC, code);
        let err = verify_method("demo/Widget", &m, m.code.as_ref().unwrap()).unwrap_err();
        assert!(matches!(err, SondaError::VerificationFailed { .. }));
    }

    #[test]
    fn unrelated_references_merge_to_supertype() {
        let a = Frame {
            locals: vec![VType::Ref("demo/A".into())],
            stack: vec![VType::Null],
        };
        let b = Frame {
            locals: vec![VType::Ref("demo/B".into()), VType::Int],
            stack: vec![VType::Ref("demo/C".into())],
        };
        let m = merge_frames(&a, &b).unwrap();
        assert_eq!(
            m.locals,
            vec![VType::Ref(crate::unit::OBJECT_TYPE.into()), VType::Top]
        );
        assert_eq!(m.stack, vec![VType::Ref("demo/C".into())]);
        // a join with differing stack depths cannot verify
        let empty = Frame::default();
        assert!(merge_frames(&a, &empty).is_err());
    }

    #[test]
    fn declared_frame_replaces_state() {
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            insns: vec![
                Insn::Jump { cond: JumpCond::Goto, target: 0 },
                Insn::Marker(0),
                Insn::PushInt(1),
                Insn::Return(Some(VarKind::Int)),
            ],
            handlers: vec![],
            frames: vec![(0, Frame { locals: vec![VType::Int], stack: vec![] })],
        };
        let m = method("f", "(I)I", ACC_PUBLIC | ACC_STATIC, code);
        assert!(verify_method("demo/Widget", &m, m.code.as_ref().unwrap()).is_ok());
    }
}
