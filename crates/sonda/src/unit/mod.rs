//! The compact unit format.
//!
//! A unit is one class or interface serialized as a big-endian binary
//! stream: header, field table, method table. Method bodies carry the
//! instruction stream defined in [`opcode`], exception handler ranges and,
//! from format version 3 on, declared stack map frames at every marker that
//! is reachable by a jump.

pub mod opcode;
pub mod reader;
pub mod writer;

use sha2::{Digest, Sha256};

use crate::result::{SondaError, SondaResult};

use opcode::{Frame, Insn, LabelId};

pub use opcode::{
    BinOp, ElemKind, JumpCond, MethodDesc, TypeDesc, VarKind, VType, OBJECT_TYPE,
};

/// Magic number at the start of every unit: `SNDA`.
pub const MAGIC: u32 = 0x534E_4441;

/// Oldest readable format version.
pub const MIN_VERSION: u16 = 1;

/// Newest readable format version.
pub const MAX_VERSION: u16 = 4;

/// First version that requires declared stack map frames.
pub const FRAMES_SINCE: u16 = 3;

/// First version that supports dynamically-resolved constants.
pub const CONDY_SINCE: u16 = 4;

/// Member is public.
pub const ACC_PUBLIC: u16 = 0x0001;
/// Member is private.
pub const ACC_PRIVATE: u16 = 0x0002;
/// Member is static.
pub const ACC_STATIC: u16 = 0x0008;
/// Member is final.
pub const ACC_FINAL: u16 = 0x0010;
/// Method holds the instance/class monitor while it runs.
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
/// Method has no body.
pub const ACC_ABSTRACT: u16 = 0x0400;
/// Member was generated by a tool.
pub const ACC_SYNTHETIC: u16 = 0x1000;

/// Kind of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Class,
    Interface,
}

/// A parsed unit.
#[derive(Debug, Clone)]
pub struct UnitDef {
    /// Format version the unit was encoded with
    pub version: u16,
    pub kind: UnitKind,
    /// Internal name, e.g. `demo/util/Widget`
    pub name: String,
    /// Internal name of the superclass, empty for the root type
    pub super_name: String,
    pub interfaces: Vec<String>,
    /// Source file name, if the compiler recorded one
    pub source_file: Option<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

/// A field declaration.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub flags: u16,
    pub name: String,
    pub desc: String,
}

/// A method declaration, with a body unless abstract.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub flags: u16,
    pub name: String,
    pub desc: String,
    pub code: Option<Code>,
}

/// A method body.
#[derive(Debug, Clone)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub insns: Vec<Insn>,
    pub handlers: Vec<Handler>,
    /// Declared frames keyed by marker, present from version 3 on
    pub frames: Vec<(LabelId, Frame)>,
}

/// An exception handler range. All bounds are marker ids.
#[derive(Debug, Clone)]
pub struct Handler {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    /// Internal name of the caught type, empty catches everything
    pub catch_type: String,
}

impl UnitDef {
    /// True when declared frames are required at this version.
    #[must_use]
    pub const fn requires_frames(&self) -> bool {
        self.version >= FRAMES_SINCE
    }

    /// True when dynamically-resolved constants are available.
    #[must_use]
    pub const fn supports_condy(&self) -> bool {
        self.version >= CONDY_SINCE
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.kind == UnitKind::Interface
    }

    /// Looks up a method by name and descriptor.
    #[must_use]
    pub fn method(&self, name: &str, desc: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name && m.desc == desc)
    }

    /// Rejects units that already carry synthetic probe members.
    pub fn assert_not_instrumented(&self) -> SondaResult<()> {
        let tainted = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.methods.iter().map(|m| m.name.as_str()))
            .any(|n| n.starts_with("$sonda"));
        if tainted {
            return Err(SondaError::AlreadyInstrumented {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl Code {
    /// Number of marker ids used by the body (highest id + 1).
    #[must_use]
    pub fn label_count(&self) -> usize {
        let mut max: Option<LabelId> = None;
        let mut see = |l: LabelId| {
            max = Some(max.map_or(l, |m| m.max(l)));
        };
        for insn in &self.insns {
            match insn {
                Insn::Marker(l) | Insn::Jump { target: l, .. } => see(*l),
                Insn::Switch { keys, default } => {
                    see(*default);
                    for &(_, l) in keys {
                        see(l);
                    }
                }
                _ => {}
            }
        }
        for h in &self.handlers {
            see(h.start);
            see(h.end);
            see(h.handler);
        }
        max.map_or(0, |m| m as usize + 1)
    }
}

/// 64-bit content identity of a unit: the first eight bytes of its SHA-256
/// digest, big-endian. Computed over the original, uninstrumented bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
