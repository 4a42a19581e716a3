//! Instruction set of the unit format.
//!
//! The stream mixes real opcodes with two pseudo-instructions: `Marker`
//! defines a jump target and `Line` attaches a source line to the
//! instructions that follow. Jump operands reference markers by id, so
//! instructions can be inserted without displacing any encoded offsets.

use crate::result::{SondaError, SondaResult};

/// Identifier of a jump-target marker, local to one method.
pub type LabelId = u16;

/// Kind of a local variable access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Single-slot integer
    Int,
    /// Single-slot float
    Float,
    /// Single-slot reference
    Ref,
    /// Two-slot long
    Long,
    /// Two-slot double
    Double,
}

impl VarKind {
    /// Number of local slots the value occupies.
    #[must_use]
    pub const fn slots(self) -> u16 {
        match self {
            Self::Int | Self::Float | Self::Ref => 1,
            Self::Long | Self::Double => 2,
        }
    }
}

/// Element kind of an array instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKind {
    /// Boolean flags, descriptor `[Z`
    Flag,
    /// Integers, descriptor `[I`
    Int,
    /// Longs, descriptor `[J`
    Long,
}

impl ElemKind {
    /// Array descriptor for this element kind.
    #[must_use]
    pub const fn array_desc(self) -> &'static str {
        match self {
            Self::Flag => "[Z",
            Self::Int => "[I",
            Self::Long => "[J",
        }
    }

    /// Slots one element occupies on the operand stack.
    #[must_use]
    pub const fn slots(self) -> u16 {
        match self {
            Self::Flag | Self::Int => 1,
            Self::Long => 2,
        }
    }
}

/// Binary operator on two same-typed operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
}

/// Condition of a jump instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpCond {
    /// Unconditional
    Goto,
    IfEq,
    IfNe,
    IfLt,
    IfGe,
    IfGt,
    IfLe,
    IfICmpEq,
    IfICmpNe,
    IfICmpLt,
    IfICmpGe,
    IfNull,
    IfNonNull,
}

impl JumpCond {
    /// Operand-stack slots the condition consumes.
    #[must_use]
    pub const fn pops(self) -> u16 {
        match self {
            Self::Goto => 0,
            Self::IfEq
            | Self::IfNe
            | Self::IfLt
            | Self::IfGe
            | Self::IfGt
            | Self::IfLe
            | Self::IfNull
            | Self::IfNonNull => 1,
            Self::IfICmpEq | Self::IfICmpNe | Self::IfICmpLt | Self::IfICmpGe => 2,
        }
    }

    /// The condition that branches exactly when this one falls through.
    ///
    /// # Panics
    ///
    /// `Goto` has no inversion; asking for one is a programming error.
    #[must_use]
    pub const fn inverted(self) -> Self {
        match self {
            Self::IfEq => Self::IfNe,
            Self::IfNe => Self::IfEq,
            Self::IfLt => Self::IfGe,
            Self::IfGe => Self::IfLt,
            Self::IfGt => Self::IfLe,
            Self::IfLe => Self::IfGt,
            Self::IfICmpEq => Self::IfICmpNe,
            Self::IfICmpNe => Self::IfICmpEq,
            Self::IfICmpLt => Self::IfICmpGe,
            Self::IfICmpGe => Self::IfICmpLt,
            Self::IfNull => Self::IfNonNull,
            Self::IfNonNull => Self::IfNull,
            Self::Goto => panic!("goto has no inverted condition"),
        }
    }
}

/// A single element of a method's instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Nop,
    PushInt(i32),
    PushLong(i64),
    PushFloat(f32),
    PushDouble(f64),
    PushNull,
    PushString(String),
    /// Dynamically-resolved constant (format version 4).
    PushDynamic {
        name: String,
        desc: String,
        bootstrap: String,
    },
    Load {
        kind: VarKind,
        var: u16,
    },
    Store {
        kind: VarKind,
        var: u16,
    },
    IncInt {
        var: u16,
        delta: i16,
    },
    IntOp(BinOp),
    LongOp(BinOp),
    /// Compares two longs, pushes an int.
    LongCmp,
    NewArray(ElemKind),
    ArrayLoad(ElemKind),
    ArrayStore(ElemKind),
    ArrayLength,
    GetStatic {
        owner: String,
        name: String,
        desc: String,
    },
    PutStatic {
        owner: String,
        name: String,
        desc: String,
    },
    GetField {
        owner: String,
        name: String,
        desc: String,
    },
    PutField {
        owner: String,
        name: String,
        desc: String,
    },
    InvokeStatic {
        owner: String,
        name: String,
        desc: String,
    },
    InvokeVirtual {
        owner: String,
        name: String,
        desc: String,
    },
    InvokeDynamic {
        name: String,
        desc: String,
        bootstrap: String,
    },
    /// Allocates and initializes an instance in one step.
    New(String),
    Jump {
        cond: JumpCond,
        target: LabelId,
    },
    /// Lookup switch: pops an int, jumps to the matching key or default.
    Switch {
        keys: Vec<(i32, LabelId)>,
        default: LabelId,
    },
    /// Method exit; `None` returns void.
    Return(Option<VarKind>),
    Throw,
    MonitorEnter,
    MonitorExit,
    Dup,
    Pop,
    Swap,
    /// Jump-target definition (pseudo-instruction).
    Marker(LabelId),
    /// Source line of the following instructions (pseudo-instruction).
    Line(u32),
}

impl Insn {
    /// True for pseudo-instructions that do not execute.
    #[must_use]
    pub const fn is_pseudo(&self) -> bool {
        matches!(self, Self::Marker(_) | Self::Line(_))
    }

    /// True for instructions that leave the method.
    #[must_use]
    pub const fn is_exit(&self) -> bool {
        matches!(self, Self::Return(_) | Self::Throw)
    }

    /// True when control can continue with the next instruction.
    #[must_use]
    pub fn falls_through(&self) -> bool {
        match self {
            Self::Jump { cond, .. } => *cond != JumpCond::Goto,
            Self::Switch { .. } | Self::Return(_) | Self::Throw => false,
            _ => true,
        }
    }
}

/// A parameter or return type parsed from a method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
    Int,
    Float,
    Long,
    Double,
    Ref(String),
}

impl TypeDesc {
    /// Local/stack slots a value of this type occupies.
    #[must_use]
    pub const fn slots(&self) -> u16 {
        match self {
            Self::Int | Self::Float | Self::Ref(_) => 1,
            Self::Long | Self::Double => 2,
        }
    }

    /// Parses a single field descriptor, e.g. `I` or `Ldemo/Widget;`.
    pub fn parse(desc: &str) -> SondaResult<Self> {
        let (t, next) = parse_type(desc, 0)?;
        if next != desc.len() {
            return Err(SondaError::malformed(format!("bad descriptor {desc:?}")));
        }
        Ok(t)
    }
}

/// Parsed method descriptor, e.g. `(IJ[Z)V`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDesc {
    /// Parameter types in declaration order
    pub params: Vec<TypeDesc>,
    /// Return type, `None` for void
    pub ret: Option<TypeDesc>,
}

impl MethodDesc {
    /// Parses a descriptor string.
    pub fn parse(desc: &str) -> SondaResult<Self> {
        let bytes = desc.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(SondaError::malformed(format!("bad descriptor {desc:?}")));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while pos < bytes.len() && bytes[pos] != b')' {
            let (t, next) = parse_type(desc, pos)?;
            params.push(t);
            pos = next;
        }
        if pos >= bytes.len() {
            return Err(SondaError::malformed(format!("bad descriptor {desc:?}")));
        }
        pos += 1; // ')'
        let ret = if bytes.get(pos) == Some(&b'V') {
            None
        } else {
            let (t, next) = parse_type(desc, pos)?;
            if next != bytes.len() {
                return Err(SondaError::malformed(format!("bad descriptor {desc:?}")));
            }
            Some(t)
        };
        Ok(Self { params, ret })
    }

    /// Total local slots the parameters occupy.
    #[must_use]
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(TypeDesc::slots).sum()
    }
}

fn parse_type(desc: &str, pos: usize) -> SondaResult<(TypeDesc, usize)> {
    let bytes = desc.as_bytes();
    match bytes.get(pos) {
        Some(b'Z' | b'B' | b'C' | b'S' | b'I') => Ok((TypeDesc::Int, pos + 1)),
        Some(b'F') => Ok((TypeDesc::Float, pos + 1)),
        Some(b'J') => Ok((TypeDesc::Long, pos + 1)),
        Some(b'D') => Ok((TypeDesc::Double, pos + 1)),
        Some(b'L') => {
            let end = desc[pos..]
                .find(';')
                .ok_or_else(|| SondaError::malformed(format!("bad descriptor {desc:?}")))?;
            Ok((TypeDesc::Ref(desc[pos + 1..pos + end].to_string()), pos + end + 1))
        }
        Some(b'[') => {
            let (_, next) = parse_type(desc, pos + 1)?;
            Ok((TypeDesc::Ref(desc[pos..next].to_string()), next))
        }
        _ => Err(SondaError::malformed(format!("bad descriptor {desc:?}"))),
    }
}

/// A verification type occupying one frame cell.
///
/// Two-slot types are stored expanded: the wide type followed by [`VType::Top`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VType {
    /// Unusable or second half of a wide value
    Top,
    Int,
    Float,
    Long,
    Double,
    /// The null reference
    Null,
    /// `this` before constructor chaining completed
    UninitThis,
    /// Reference of the named type (internal name or array descriptor)
    Ref(String),
}

impl VType {
    /// True for types whose value spans two cells.
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Verification type for a descriptor type.
    #[must_use]
    pub fn of(t: &TypeDesc) -> Self {
        match t {
            TypeDesc::Int => Self::Int,
            TypeDesc::Float => Self::Float,
            TypeDesc::Long => Self::Long,
            TypeDesc::Double => Self::Double,
            TypeDesc::Ref(name) => Self::Ref(name.clone()),
        }
    }

    /// Merge of two cell types at a control-flow join.
    ///
    /// Incompatible reference types collapse to the common supertype
    /// placeholder; anything else incompatible collapses to `Top`.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (Self::Null, Self::Ref(n)) | (Self::Ref(n), Self::Null) => Self::Ref(n.clone()),
            (Self::Ref(_), Self::Ref(_)) => Self::Ref(OBJECT_TYPE.to_string()),
            _ => Self::Top,
        }
    }
}

/// Placeholder supertype used when unrelated references merge.
pub const OBJECT_TYPE: &str = "core/Object";

/// Type of string constants.
pub const STRING_TYPE: &str = "core/String";

/// A stack map frame: the verification state at one marker.
///
/// Cells are expanded, so a long local reads `[Long, Top]` and occupies
/// two entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub locals: Vec<VType>,
    pub stack: Vec<VType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_roundtrip_slots() {
        let d = MethodDesc::parse("(IJ[ZLdemo/Widget;D)V").unwrap();
        assert_eq!(d.params.len(), 5);
        assert_eq!(d.param_slots(), 1 + 2 + 1 + 1 + 2);
        assert!(d.ret.is_none());
    }

    #[test]
    fn descriptor_return_type() {
        let d = MethodDesc::parse("()[Z").unwrap();
        assert!(d.params.is_empty());
        assert_eq!(d.ret, Some(TypeDesc::Ref("[Z".to_string())));
    }

    #[test]
    fn descriptor_rejects_garbage() {
        assert!(MethodDesc::parse("IJ)V").is_err());
        assert!(MethodDesc::parse("(Q)V").is_err());
        assert!(MethodDesc::parse("(I").is_err());
    }

    #[test]
    fn inverted_condition_pairs() {
        assert_eq!(JumpCond::IfEq.inverted(), JumpCond::IfNe);
        assert_eq!(JumpCond::IfICmpLt.inverted(), JumpCond::IfICmpGe);
        assert_eq!(JumpCond::IfNull.inverted(), JumpCond::IfNonNull);
    }

    #[test]
    fn reference_merge_collapses_to_placeholder() {
        let a = VType::Ref("demo/A".into());
        let b = VType::Ref("demo/B".into());
        assert_eq!(a.merge(&b), VType::Ref(OBJECT_TYPE.into()));
        assert_eq!(a.merge(&VType::Null), a);
        assert_eq!(VType::Int.merge(&VType::Float), VType::Top);
    }

    #[test]
    fn fall_through_classification() {
        assert!(Insn::Nop.falls_through());
        assert!(Insn::Jump { cond: JumpCond::IfEq, target: 0 }.falls_through());
        assert!(!Insn::Jump { cond: JumpCond::Goto, target: 0 }.falls_through());
        assert!(!Insn::Return(None).falls_through());
        assert!(!Insn::Throw.falls_through());
        assert!(!Insn::Switch { keys: vec![], default: 0 }.falls_through());
    }
}
