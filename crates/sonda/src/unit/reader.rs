//! Parses the binary unit format into a [`UnitDef`].

use crate::result::{SondaError, SondaResult};

use super::opcode::{BinOp, ElemKind, Frame, Insn, JumpCond, VType, VarKind};
use super::{
    Code, FieldDef, Handler, MethodDef, UnitDef, UnitKind, CONDY_SINCE, MAGIC, MAX_VERSION,
    MIN_VERSION,
};

/// Decodes a unit from its binary encoding.
///
/// Trailing bytes after the method table are rejected, as is any version
/// outside the supported range.
pub fn read_unit(bytes: &[u8]) -> SondaResult<UnitDef> {
    let mut r = Reader { bytes, pos: 0 };
    if r.u32()? != MAGIC {
        return Err(SondaError::malformed("bad magic"));
    }
    let version = r.u16()?;
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(SondaError::UnsupportedVersion { version });
    }
    let kind = match r.u8()? {
        0 => UnitKind::Class,
        1 => UnitKind::Interface,
        k => return Err(SondaError::malformed(format!("bad unit kind {k}"))),
    };
    let name = r.string()?;
    let super_name = r.string()?;
    let interfaces = r.counted16(Reader::string)?;
    let source_file = match r.u8()? {
        0 => None,
        1 => Some(r.string()?),
        f => return Err(SondaError::malformed(format!("bad source-file flag {f}"))),
    };
    let fields = r.counted16(Reader::field)?;
    let methods = r.counted16(|r| r.method(version))?;
    if r.pos != bytes.len() {
        return Err(SondaError::malformed(format!(
            "{} trailing bytes after method table",
            bytes.len() - r.pos
        )));
    }
    Ok(UnitDef {
        version,
        kind,
        name,
        super_name,
        interfaces,
        source_file,
        fields,
        methods,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> SondaResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.bytes.len())
            .ok_or_else(|| SondaError::malformed("truncated unit"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> SondaResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> SondaResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> SondaResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> SondaResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn string(&mut self) -> SondaResult<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| SondaError::malformed("non-UTF-8 string"))
    }

    fn counted16<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> SondaResult<T>,
    ) -> SondaResult<Vec<T>> {
        let count = self.u16()? as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }

    fn field(&mut self) -> SondaResult<FieldDef> {
        Ok(FieldDef {
            flags: self.u16()?,
            name: self.string()?,
            desc: self.string()?,
        })
    }

    fn method(&mut self, version: u16) -> SondaResult<MethodDef> {
        let flags = self.u16()?;
        let name = self.string()?;
        let desc = self.string()?;
        let code = match self.u8()? {
            0 => None,
            1 => Some(self.code(version)?),
            f => return Err(SondaError::malformed(format!("bad code flag {f}"))),
        };
        Ok(MethodDef {
            flags,
            name,
            desc,
            code,
        })
    }

    fn code(&mut self, version: u16) -> SondaResult<Code> {
        let max_stack = self.u16()?;
        let max_locals = self.u16()?;
        let insn_count = self.u32()? as usize;
        let mut insns = Vec::with_capacity(insn_count.min(65_536));
        for _ in 0..insn_count {
            insns.push(self.insn(version)?);
        }
        let handlers = self.counted16(Reader::handler)?;
        let frames = self.counted16(|r| {
            let label = r.u16()?;
            let frame = r.frame()?;
            Ok((label, frame))
        })?;
        Ok(Code {
            max_stack,
            max_locals,
            insns,
            handlers,
            frames,
        })
    }

    fn handler(&mut self) -> SondaResult<Handler> {
        Ok(Handler {
            start: self.u16()?,
            end: self.u16()?,
            handler: self.u16()?,
            catch_type: self.string()?,
        })
    }

    fn frame(&mut self) -> SondaResult<Frame> {
        let locals = self.counted16(Reader::vtype)?;
        let stack = self.counted16(Reader::vtype)?;
        Ok(Frame { locals, stack })
    }

    fn vtype(&mut self) -> SondaResult<VType> {
        Ok(match self.u8()? {
            0 => VType::Top,
            1 => VType::Int,
            2 => VType::Float,
            3 => VType::Long,
            4 => VType::Double,
            5 => VType::Null,
            6 => VType::UninitThis,
            7 => VType::Ref(self.string()?),
            t => return Err(SondaError::malformed(format!("bad verification type {t}"))),
        })
    }

    fn var_kind(&mut self) -> SondaResult<VarKind> {
        Ok(match self.u8()? {
            0 => VarKind::Int,
            1 => VarKind::Float,
            2 => VarKind::Ref,
            3 => VarKind::Long,
            4 => VarKind::Double,
            k => return Err(SondaError::malformed(format!("bad variable kind {k}"))),
        })
    }

    fn elem_kind(&mut self) -> SondaResult<ElemKind> {
        Ok(match self.u8()? {
            0 => ElemKind::Flag,
            1 => ElemKind::Int,
            2 => ElemKind::Long,
            k => return Err(SondaError::malformed(format!("bad element kind {k}"))),
        })
    }

    fn bin_op(&mut self) -> SondaResult<BinOp> {
        Ok(match self.u8()? {
            0 => BinOp::Add,
            1 => BinOp::Sub,
            2 => BinOp::Mul,
            3 => BinOp::Div,
            4 => BinOp::Rem,
            5 => BinOp::And,
            6 => BinOp::Or,
            7 => BinOp::Xor,
            op => return Err(SondaError::malformed(format!("bad operator {op}"))),
        })
    }

    fn jump_cond(&mut self) -> SondaResult<JumpCond> {
        Ok(match self.u8()? {
            0 => JumpCond::Goto,
            1 => JumpCond::IfEq,
            2 => JumpCond::IfNe,
            3 => JumpCond::IfLt,
            4 => JumpCond::IfGe,
            5 => JumpCond::IfGt,
            6 => JumpCond::IfLe,
            7 => JumpCond::IfICmpEq,
            8 => JumpCond::IfICmpNe,
            9 => JumpCond::IfICmpLt,
            10 => JumpCond::IfICmpGe,
            11 => JumpCond::IfNull,
            12 => JumpCond::IfNonNull,
            c => return Err(SondaError::malformed(format!("bad jump condition {c}"))),
        })
    }

    fn insn(&mut self, version: u16) -> SondaResult<Insn> {
        Ok(match self.u8()? {
            0 => Insn::Nop,
            1 => Insn::PushInt(self.u32()? as i32),
            2 => Insn::PushLong(self.u64()? as i64),
            3 => Insn::PushFloat(f32::from_bits(self.u32()?)),
            4 => Insn::PushDouble(f64::from_bits(self.u64()?)),
            5 => Insn::PushNull,
            6 => Insn::PushString(self.string()?),
            7 => {
                if version < CONDY_SINCE {
                    return Err(SondaError::malformed(format!(
                        "dynamic constant in version {version} unit"
                    )));
                }
                Insn::PushDynamic {
                    name: self.string()?,
                    desc: self.string()?,
                    bootstrap: self.string()?,
                }
            }
            8 => Insn::Load {
                kind: self.var_kind()?,
                var: self.u16()?,
            },
            9 => Insn::Store {
                kind: self.var_kind()?,
                var: self.u16()?,
            },
            10 => Insn::IncInt {
                var: self.u16()?,
                delta: self.u16()? as i16,
            },
            11 => Insn::IntOp(self.bin_op()?),
            12 => Insn::LongOp(self.bin_op()?),
            13 => Insn::LongCmp,
            14 => Insn::NewArray(self.elem_kind()?),
            15 => Insn::ArrayLoad(self.elem_kind()?),
            16 => Insn::ArrayStore(self.elem_kind()?),
            17 => Insn::ArrayLength,
            18 => {
                let (owner, name, desc) = self.member()?;
                Insn::GetStatic { owner, name, desc }
            }
            19 => {
                let (owner, name, desc) = self.member()?;
                Insn::PutStatic { owner, name, desc }
            }
            20 => {
                let (owner, name, desc) = self.member()?;
                Insn::GetField { owner, name, desc }
            }
            21 => {
                let (owner, name, desc) = self.member()?;
                Insn::PutField { owner, name, desc }
            }
            22 => {
                let (owner, name, desc) = self.member()?;
                Insn::InvokeStatic { owner, name, desc }
            }
            23 => {
                let (owner, name, desc) = self.member()?;
                Insn::InvokeVirtual { owner, name, desc }
            }
            24 => Insn::InvokeDynamic {
                name: self.string()?,
                desc: self.string()?,
                bootstrap: self.string()?,
            },
            25 => Insn::New(self.string()?),
            26 => Insn::Jump {
                cond: self.jump_cond()?,
                target: self.u16()?,
            },
            27 => {
                let default = self.u16()?;
                let keys = self.counted16(|r| {
                    let key = r.u32()? as i32;
                    let label = r.u16()?;
                    Ok((key, label))
                })?;
                Insn::Switch { keys, default }
            }
            28 => match self.u8()? {
                0 => Insn::Return(None),
                1 => Insn::Return(Some(self.var_kind()?)),
                f => return Err(SondaError::malformed(format!("bad return flag {f}"))),
            },
            29 => Insn::Throw,
            30 => Insn::MonitorEnter,
            31 => Insn::MonitorExit,
            32 => Insn::Dup,
            33 => Insn::Pop,
            34 => Insn::Swap,
            35 => Insn::Marker(self.u16()?),
            36 => Insn::Line(self.u32()?),
            op => return Err(SondaError::malformed(format!("bad opcode {op}"))),
        })
    }

    fn member(&mut self) -> SondaResult<(String, String, String)> {
        Ok((self.string()?, self.string()?, self.string()?))
    }
}
