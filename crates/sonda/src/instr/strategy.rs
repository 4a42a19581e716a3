//! Probe storage strategies.
//!
//! Where instrumented code keeps its probe array depends on what the unit
//! can hold: classes get a synthetic field with a lazy accessor,
//! interfaces with normal concrete methods get a public field the static
//! initializer writes eagerly, interfaces whose only code is the static
//! initializer pass a fresh array through it without declaring anything,
//! and format version 4 units resolve it through a dynamic constant. The
//! strategies form a closed set, so this is a sum type rather than a
//! trait object.

use crate::data::ProbeMode;
use crate::unit::opcode::{Frame, Insn, JumpCond, VType, VarKind};
use crate::unit::{
    Code, FieldDef, MethodDef, UnitDef, ACC_FINAL, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC,
    ACC_SYNTHETIC, FRAMES_SINCE,
};

/// Name of the synthetic probe array field.
pub const FIELD_NAME: &str = "$sondaProbes";

/// Name of the synthetic lazy accessor method.
pub const INIT_NAME: &str = "$sondaInit";

/// Name of the class initializer method.
pub const CLINIT_NAME: &str = "<clinit>";

/// Runtime class the generated code fetches probe arrays from.
pub const RUNTIME_OWNER: &str = "sonda/rt/ProbeStore";

/// Bootstrap class backing dynamic probe constants.
pub const BOOTSTRAP_OWNER: &str = "sonda/rt/Bootstrap";

/// How the probe array reference reaches method bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Synthetic static field plus lazy accessor on a class
    ClassField,
    /// Synthetic static field on an interface, written eagerly by `<clinit>`
    InterfaceField,
    /// Runtime lookup at every method entry, nothing declared
    LocalOnly,
    /// Dynamic constant resolved once by the loader (version 4)
    DynamicConstant,
    /// Nothing to instrument
    None,
}

/// A chosen strategy with everything retrieval code needs.
#[derive(Debug)]
pub struct ProbeStrategy {
    pub kind: StorageKind,
    owner: String,
    class_id: u64,
    probe_count: u32,
    mode: ProbeMode,
}

impl ProbeStrategy {
    /// Picks the storage strategy for a unit.
    #[must_use]
    pub fn choose(unit: &UnitDef, class_id: u64, mode: ProbeMode, probe_count: u32) -> Self {
        let kind = if probe_count == 0 || unit.methods.iter().all(|m| m.code.is_none()) {
            StorageKind::None
        } else if unit.supports_condy() {
            StorageKind::DynamicConstant
        } else if unit.is_interface() {
            let has_normal_code = unit
                .methods
                .iter()
                .any(|m| m.code.is_some() && m.name != CLINIT_NAME);
            if has_normal_code {
                StorageKind::InterfaceField
            } else {
                // The only executable code is the static initializer, so
                // the array is fetched fresh inside it and never stored.
                StorageKind::LocalOnly
            }
        } else {
            StorageKind::ClassField
        };
        Self {
            kind,
            owner: unit.name.clone(),
            class_id,
            probe_count,
            mode,
        }
    }

    fn field_vtype(&self) -> VType {
        VType::Ref(ref_name(self.mode.field_desc()))
    }

    fn init_desc(&self) -> String {
        format!("(){}", self.mode.field_desc())
    }

    fn runtime_desc(&self) -> String {
        format!("(JLcore/String;I){}", self.mode.field_desc())
    }

    /// Emits the call that asks the runtime for this unit's probe array.
    /// Peak stack: two cells of class id, the name, the probe count.
    fn emit_runtime_access(&self, out: &mut Vec<Insn>) {
        out.push(Insn::PushLong(self.class_id as i64));
        out.push(Insn::PushString(self.owner.clone()));
        out.push(Insn::PushInt(self.probe_count as i32));
        out.push(Insn::InvokeStatic {
            owner: RUNTIME_OWNER.to_string(),
            name: "probes".to_string(),
            desc: self.runtime_desc(),
        });
    }

    /// Emits instructions leaving the probe array reference on the stack
    /// and returns the operand-stack cells the sequence needs.
    ///
    /// Inside an interface `<clinit>` the field does not exist yet, so
    /// the array is fetched and stored right there.
    ///
    /// # Panics
    ///
    /// [`StorageKind::None`] has no retrieval; asking for one is a
    /// programming error.
    pub fn retrieve(&self, out: &mut Vec<Insn>, in_clinit: bool) -> u16 {
        match self.kind {
            StorageKind::ClassField => {
                out.push(Insn::InvokeStatic {
                    owner: self.owner.clone(),
                    name: INIT_NAME.to_string(),
                    desc: self.init_desc(),
                });
                1
            }
            StorageKind::InterfaceField => {
                if in_clinit {
                    self.emit_runtime_access(out);
                    out.push(Insn::Dup);
                    out.push(Insn::PutStatic {
                        owner: self.owner.clone(),
                        name: FIELD_NAME.to_string(),
                        desc: self.mode.field_desc().to_string(),
                    });
                    4
                } else {
                    out.push(Insn::InvokeStatic {
                        owner: self.owner.clone(),
                        name: INIT_NAME.to_string(),
                        desc: self.init_desc(),
                    });
                    1
                }
            }
            StorageKind::LocalOnly => {
                self.emit_runtime_access(out);
                4
            }
            StorageKind::DynamicConstant => {
                out.push(Insn::PushDynamic {
                    name: FIELD_NAME.to_string(),
                    desc: self.mode.field_desc().to_string(),
                    bootstrap: BOOTSTRAP_OWNER.to_string(),
                });
                1
            }
            StorageKind::None => panic!("no retrieval for an uninstrumented unit"),
        }
    }

    /// Adds the synthetic members the strategy relies on.
    pub fn declare_members(&self, unit: &mut UnitDef) {
        match self.kind {
            StorageKind::ClassField => {
                self.declare_field(unit, ACC_PRIVATE);
                self.declare_accessor(unit);
            }
            StorageKind::InterfaceField => {
                self.declare_field(unit, ACC_PUBLIC);
                self.declare_accessor(unit);
                // The field must be assigned eagerly. An existing
                // initializer gets the write during its own rewrite; when
                // there is none, one is synthesized here.
                if unit.method(CLINIT_NAME, "()V").is_none() {
                    self.declare_clinit(unit);
                }
            }
            StorageKind::LocalOnly | StorageKind::DynamicConstant | StorageKind::None => {}
        }
    }

    /// A static initializer that populates the interface field through
    /// the accessor and discards the returned array.
    fn declare_clinit(&self, unit: &mut UnitDef) {
        unit.methods.push(MethodDef {
            flags: ACC_STATIC | ACC_SYNTHETIC,
            name: CLINIT_NAME.to_string(),
            desc: "()V".to_string(),
            code: Some(Code {
                max_stack: 1,
                max_locals: 0,
                insns: vec![
                    Insn::InvokeStatic {
                        owner: self.owner.clone(),
                        name: INIT_NAME.to_string(),
                        desc: self.init_desc(),
                    },
                    Insn::Pop,
                    Insn::Return(None),
                ],
                handlers: vec![],
                frames: vec![],
            }),
        });
    }

    fn declare_field(&self, unit: &mut UnitDef, visibility: u16) {
        unit.fields.push(FieldDef {
            flags: visibility | ACC_STATIC | ACC_FINAL | ACC_SYNTHETIC,
            name: FIELD_NAME.to_string(),
            desc: self.mode.field_desc().to_string(),
        });
    }

    /// The lazy accessor: return the field if set, otherwise fetch from
    /// the runtime, store and return.
    fn declare_accessor(&self, unit: &mut UnitDef) {
        let field_desc = self.mode.field_desc().to_string();
        let done = 0;
        let mut insns = vec![
            Insn::GetStatic {
                owner: self.owner.clone(),
                name: FIELD_NAME.to_string(),
                desc: field_desc.clone(),
            },
            Insn::Dup,
            Insn::Jump { cond: JumpCond::IfNonNull, target: done },
            Insn::Pop,
        ];
        self.emit_runtime_access(&mut insns);
        insns.push(Insn::Dup);
        insns.push(Insn::PutStatic {
            owner: self.owner.clone(),
            name: FIELD_NAME.to_string(),
            desc: field_desc,
        });
        insns.push(Insn::Marker(done));
        insns.push(Insn::Return(Some(VarKind::Ref)));
        let frames = if unit.version >= FRAMES_SINCE {
            vec![(
                done,
                Frame {
                    locals: vec![],
                    stack: vec![self.field_vtype()],
                },
            )]
        } else {
            vec![]
        };
        unit.methods.push(MethodDef {
            flags: if unit.is_interface() {
                ACC_PUBLIC | ACC_STATIC | ACC_SYNTHETIC
            } else {
                ACC_PRIVATE | ACC_STATIC | ACC_SYNTHETIC
            },
            name: INIT_NAME.to_string(),
            desc: self.init_desc(),
            code: Some(Code {
                max_stack: 4,
                max_locals: 0,
                insns,
                handlers: vec![],
                frames,
            }),
        });
    }
}

fn ref_name(field_desc: &str) -> String {
    if let Some(stripped) = field_desc.strip_prefix('L') {
        stripped.trim_end_matches(';').to_string()
    } else {
        field_desc.to_string()
    }
}
