//! Serializes a [`UnitDef`] back to the binary unit format.

use super::opcode::{BinOp, ElemKind, Frame, Insn, JumpCond, VType, VarKind};
use super::{Code, FieldDef, Handler, MethodDef, UnitDef, UnitKind, MAGIC};

/// Encodes a unit. The output round-trips through [`super::reader::read_unit`].
///
/// # Panics
///
/// Lengths are written as fixed-width prefixes; a string or member list
/// too large for its prefix panics rather than truncating into a corrupt
/// unit.
#[must_use]
pub fn write_unit(unit: &UnitDef) -> Vec<u8> {
    let mut w = Writer::default();
    w.u32(MAGIC);
    w.u16(unit.version);
    w.u8(match unit.kind {
        UnitKind::Class => 0,
        UnitKind::Interface => 1,
    });
    w.string(&unit.name);
    w.string(&unit.super_name);
    w.len16(unit.interfaces.len());
    for i in &unit.interfaces {
        w.string(i);
    }
    match &unit.source_file {
        Some(s) => {
            w.u8(1);
            w.string(s);
        }
        None => w.u8(0),
    }
    w.len16(unit.fields.len());
    for f in &unit.fields {
        w.field(f);
    }
    w.len16(unit.methods.len());
    for m in &unit.methods {
        w.method(m);
    }
    w.out
}

#[derive(Default)]
struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes a `u16` length prefix, refusing values that do not fit.
    fn len16(&mut self, len: usize) {
        assert!(
            len <= usize::from(u16::MAX),
            "length {len} does not fit a u16 prefix"
        );
        self.u16(len as u16);
    }

    fn len32(&mut self, len: usize) {
        assert!(
            u32::try_from(len).is_ok(),
            "length {len} does not fit a u32 prefix"
        );
        self.u32(len as u32);
    }

    fn string(&mut self, s: &str) {
        self.len16(s.len());
        self.out.extend_from_slice(s.as_bytes());
    }

    fn field(&mut self, f: &FieldDef) {
        self.u16(f.flags);
        self.string(&f.name);
        self.string(&f.desc);
    }

    fn method(&mut self, m: &MethodDef) {
        self.u16(m.flags);
        self.string(&m.name);
        self.string(&m.desc);
        match &m.code {
            Some(code) => {
                self.u8(1);
                self.code(code);
            }
            None => self.u8(0),
        }
    }

    fn code(&mut self, code: &Code) {
        self.u16(code.max_stack);
        self.u16(code.max_locals);
        self.len32(code.insns.len());
        for insn in &code.insns {
            self.insn(insn);
        }
        self.len16(code.handlers.len());
        for h in &code.handlers {
            self.handler(h);
        }
        self.len16(code.frames.len());
        for (label, frame) in &code.frames {
            self.u16(*label);
            self.frame(frame);
        }
    }

    fn handler(&mut self, h: &Handler) {
        self.u16(h.start);
        self.u16(h.end);
        self.u16(h.handler);
        self.string(&h.catch_type);
    }

    fn frame(&mut self, frame: &Frame) {
        self.len16(frame.locals.len());
        for t in &frame.locals {
            self.vtype(t);
        }
        self.len16(frame.stack.len());
        for t in &frame.stack {
            self.vtype(t);
        }
    }

    fn vtype(&mut self, t: &VType) {
        match t {
            VType::Top => self.u8(0),
            VType::Int => self.u8(1),
            VType::Float => self.u8(2),
            VType::Long => self.u8(3),
            VType::Double => self.u8(4),
            VType::Null => self.u8(5),
            VType::UninitThis => self.u8(6),
            VType::Ref(name) => {
                self.u8(7);
                self.string(name);
            }
        }
    }

    fn var_kind(&mut self, k: VarKind) {
        self.u8(match k {
            VarKind::Int => 0,
            VarKind::Float => 1,
            VarKind::Ref => 2,
            VarKind::Long => 3,
            VarKind::Double => 4,
        });
    }

    fn elem_kind(&mut self, k: ElemKind) {
        self.u8(match k {
            ElemKind::Flag => 0,
            ElemKind::Int => 1,
            ElemKind::Long => 2,
        });
    }

    fn bin_op(&mut self, op: BinOp) {
        self.u8(match op {
            BinOp::Add => 0,
            BinOp::Sub => 1,
            BinOp::Mul => 2,
            BinOp::Div => 3,
            BinOp::Rem => 4,
            BinOp::And => 5,
            BinOp::Or => 6,
            BinOp::Xor => 7,
        });
    }

    fn jump_cond(&mut self, c: JumpCond) {
        self.u8(match c {
            JumpCond::Goto => 0,
            JumpCond::IfEq => 1,
            JumpCond::IfNe => 2,
            JumpCond::IfLt => 3,
            JumpCond::IfGe => 4,
            JumpCond::IfGt => 5,
            JumpCond::IfLe => 6,
            JumpCond::IfICmpEq => 7,
            JumpCond::IfICmpNe => 8,
            JumpCond::IfICmpLt => 9,
            JumpCond::IfICmpGe => 10,
            JumpCond::IfNull => 11,
            JumpCond::IfNonNull => 12,
        });
    }

    fn member(&mut self, owner: &str, name: &str, desc: &str) {
        self.string(owner);
        self.string(name);
        self.string(desc);
    }

    #[allow(clippy::match_same_arms)]
    fn insn(&mut self, insn: &Insn) {
        match insn {
            Insn::Nop => self.u8(0),
            Insn::PushInt(v) => {
                self.u8(1);
                self.u32(*v as u32);
            }
            Insn::PushLong(v) => {
                self.u8(2);
                self.u64(*v as u64);
            }
            Insn::PushFloat(v) => {
                self.u8(3);
                self.u32(v.to_bits());
            }
            Insn::PushDouble(v) => {
                self.u8(4);
                self.u64(v.to_bits());
            }
            Insn::PushNull => self.u8(5),
            Insn::PushString(s) => {
                self.u8(6);
                self.string(s);
            }
            Insn::PushDynamic { name, desc, bootstrap } => {
                self.u8(7);
                self.string(name);
                self.string(desc);
                self.string(bootstrap);
            }
            Insn::Load { kind, var } => {
                self.u8(8);
                self.var_kind(*kind);
                self.u16(*var);
            }
            Insn::Store { kind, var } => {
                self.u8(9);
                self.var_kind(*kind);
                self.u16(*var);
            }
            Insn::IncInt { var, delta } => {
                self.u8(10);
                self.u16(*var);
                self.u16(*delta as u16);
            }
            Insn::IntOp(op) => {
                self.u8(11);
                self.bin_op(*op);
            }
            Insn::LongOp(op) => {
                self.u8(12);
                self.bin_op(*op);
            }
            Insn::LongCmp => self.u8(13),
            Insn::NewArray(k) => {
                self.u8(14);
                self.elem_kind(*k);
            }
            Insn::ArrayLoad(k) => {
                self.u8(15);
                self.elem_kind(*k);
            }
            Insn::ArrayStore(k) => {
                self.u8(16);
                self.elem_kind(*k);
            }
            Insn::ArrayLength => self.u8(17),
            Insn::GetStatic { owner, name, desc } => {
                self.u8(18);
                self.member(owner, name, desc);
            }
            Insn::PutStatic { owner, name, desc } => {
                self.u8(19);
                self.member(owner, name, desc);
            }
            Insn::GetField { owner, name, desc } => {
                self.u8(20);
                self.member(owner, name, desc);
            }
            Insn::PutField { owner, name, desc } => {
                self.u8(21);
                self.member(owner, name, desc);
            }
            Insn::InvokeStatic { owner, name, desc } => {
                self.u8(22);
                self.member(owner, name, desc);
            }
            Insn::InvokeVirtual { owner, name, desc } => {
                self.u8(23);
                self.member(owner, name, desc);
            }
            Insn::InvokeDynamic { name, desc, bootstrap } => {
                self.u8(24);
                self.string(name);
                self.string(desc);
                self.string(bootstrap);
            }
            Insn::New(name) => {
                self.u8(25);
                self.string(name);
            }
            Insn::Jump { cond, target } => {
                self.u8(26);
                self.jump_cond(*cond);
                self.u16(*target);
            }
            Insn::Switch { keys, default } => {
                self.u8(27);
                self.u16(*default);
                self.len16(keys.len());
                for (key, label) in keys {
                    self.u32(*key as u32);
                    self.u16(*label);
                }
            }
            Insn::Return(kind) => {
                self.u8(28);
                match kind {
                    None => self.u8(0),
                    Some(k) => {
                        self.u8(1);
                        self.var_kind(*k);
                    }
                }
            }
            Insn::Throw => self.u8(29),
            Insn::MonitorEnter => self.u8(30),
            Insn::MonitorExit => self.u8(31),
            Insn::Dup => self.u8(32),
            Insn::Pop => self.u8(33),
            Insn::Swap => self.u8(34),
            Insn::Marker(l) => {
                self.u8(35);
                self.u16(*l);
            }
            Insn::Line(l) => {
                self.u8(36);
                self.u32(*l);
            }
        }
    }
}
