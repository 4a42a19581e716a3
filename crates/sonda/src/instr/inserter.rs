//! Probe reference slot insertion.
//!
//! The probe array reference lives in a fresh local slot placed directly
//! after the method parameters. Every access to a local at or above that
//! slot shifts up by one, and stack map frames gain the probe cell at the
//! same index.

use crate::data::ProbeMode;
use crate::result::SondaResult;
use crate::unit::opcode::{Frame, Insn, MethodDesc, VType};
use crate::unit::{MethodDef, ACC_STATIC};

/// Remaps locals around the inserted probe slot.
#[derive(Debug)]
pub struct SlotInserter {
    /// Index of the inserted slot: first slot after the parameters
    pos: u16,
    probe_type: VType,
}

impl SlotInserter {
    pub fn for_method(method: &MethodDef, mode: ProbeMode) -> SondaResult<Self> {
        let desc = MethodDesc::parse(&method.desc)?;
        let instance = u16::from(method.flags & ACC_STATIC == 0);
        let probe_type = match mode.field_desc() {
            "[Z" => VType::Ref("[Z".to_string()),
            other => {
                // strip the L...; wrapping of an object descriptor
                VType::Ref(other[1..other.len() - 1].to_string())
            }
        };
        Ok(Self {
            pos: instance + desc.param_slots(),
            probe_type,
        })
    }

    /// The slot the probe reference occupies.
    #[must_use]
    pub const fn slot(&self) -> u16 {
        self.pos
    }

    /// Maps an original local index to its post-insertion index.
    #[must_use]
    pub const fn map(&self, var: u16) -> u16 {
        if var < self.pos {
            var
        } else {
            var + 1
        }
    }

    /// Rewrites the local operand of one instruction in place.
    pub fn remap(&self, insn: &mut Insn) {
        match insn {
            Insn::Load { var, .. } | Insn::Store { var, .. } | Insn::IncInt { var, .. } => {
                *var = self.map(*var);
            }
            _ => {}
        }
    }

    /// Inserts the probe cell into a frame's locals.
    ///
    /// When the insertion point falls on the second half of a live wide
    /// pair, the pair cannot survive the split: its start demotes to
    /// `Top` and the displaced half remains as an explicit filler, so
    /// every cell index still agrees with [`map`](Self::map).
    pub fn rewrite_frame(&self, frame: &mut Frame) {
        let pos = self.pos as usize;
        if frame.locals.len() < pos {
            frame.locals.resize(pos, VType::Top);
        }
        if pos > 0 && frame.locals.get(pos - 1).is_some_and(VType::is_wide) {
            frame.locals[pos - 1] = VType::Top;
        }
        frame.locals.insert(pos, self.probe_type.clone());
    }
}
