//! Probe instrumentation.
//!
//! [`instrument`] rewrites a unit so that every execution path leaves a
//! trace: the probe array reference is materialized into a fresh local at
//! method entry, probes are inserted at the sites the flow pass picked,
//! and stack map frames are recomputed for the markers the rewrite
//! creates. The original bytes are never modified; identity is the
//! content hash of the input.

pub mod frame;
pub mod inserter;
pub mod monitor;
pub mod strategy;

use std::collections::HashMap;

use tracing::debug;

use crate::data::ProbeMode;
use crate::flow::{plan_probes, IdGen, MarkerTags, ProbePlan, ProbeSite};
use crate::result::SondaResult;
use crate::unit::opcode::{ElemKind, Frame, Insn, JumpCond, LabelId, VarKind};
use crate::unit::reader::read_unit;
use crate::unit::writer::write_unit;
use crate::unit::{content_hash, Code, MethodDef, FRAMES_SINCE};

use frame::{in_method, FrameTracker};
use inserter::SlotInserter;
use monitor::MonitorAdvice;
use strategy::{ProbeStrategy, StorageKind};

/// Result of instrumenting one unit.
#[derive(Debug)]
pub struct Instrumented {
    /// Serialized instrumented unit
    pub bytes: Vec<u8>,
    /// Content hash of the original bytes
    pub class_id: u64,
    /// Probes the unit records
    pub probe_count: u32,
}

/// Instruments a unit for the given probe mode.
pub fn instrument(bytes: &[u8], mode: ProbeMode) -> SondaResult<Instrumented> {
    let class_id = content_hash(bytes);
    let mut unit = read_unit(bytes)?;
    unit.assert_not_instrumented()?;

    // Probe ids are assigned across all methods in declaration order, so
    // instrumentation and analysis agree without sharing state.
    let mut ids = IdGen::new();
    let mut plans: Vec<Option<ProbePlan>> = Vec::with_capacity(unit.methods.len());
    for method in &unit.methods {
        plans.push(method.code.as_ref().map(|code| {
            let mut tags = MarkerTags::analyze(code);
            plan_probes(code, &mut tags, &mut ids)
        }));
    }
    let probe_count = ids.count();

    let strategy = ProbeStrategy::choose(&unit, class_id, mode, probe_count);
    debug!(
        unit = %unit.name,
        probes = probe_count,
        strategy = ?strategy.kind,
        mode = mode.name(),
        "instrumenting unit"
    );
    if strategy.kind == StorageKind::None {
        return Ok(Instrumented {
            bytes: bytes.to_vec(),
            class_id,
            probe_count,
        });
    }

    let owner = unit.name.clone();
    let version = unit.version;
    for (method, plan) in unit.methods.iter_mut().zip(&plans) {
        if let Some(plan) = plan {
            instrument_method(&owner, version, &strategy, mode, method, plan)?;
        }
    }
    strategy.declare_members(&mut unit);

    Ok(Instrumented {
        bytes: write_unit(&unit),
        class_id,
        probe_count,
    })
}

/// Emits the hit-recording sequence for one probe id.
fn emit_probe(out: &mut Vec<Insn>, mode: ProbeMode, slot: u16, id: u32) {
    out.push(Insn::Load {
        kind: VarKind::Ref,
        var: slot,
    });
    out.push(Insn::PushInt(id as i32));
    match mode {
        ProbeMode::Exists => {
            out.push(Insn::PushInt(1));
            out.push(Insn::ArrayStore(ElemKind::Flag));
        }
        ProbeMode::Count | ProbeMode::ParallelCount => {
            out.push(Insn::InvokeVirtual {
                owner: probe_holder(mode),
                name: "increment".to_string(),
                desc: "(I)V".to_string(),
            });
        }
    }
}

/// Internal name of the counting probe holder class.
fn probe_holder(mode: ProbeMode) -> String {
    let desc = mode.field_desc();
    desc.strip_prefix('L')
        .map_or_else(|| desc.to_string(), |s| s.trim_end_matches(';').to_string())
}

#[allow(clippy::too_many_lines)]
fn instrument_method(
    owner: &str,
    version: u16,
    strategy: &ProbeStrategy,
    mode: ProbeMode,
    method: &mut MethodDef,
    plan: &ProbePlan,
) -> SondaResult<()> {
    let Some(code) = method.code.take() else {
        return Ok(());
    };
    let inserter = SlotInserter::for_method(method, mode)?;
    let advice = MonitorAdvice::for_method(mode, method);
    let slot = inserter.slot();
    let with_frames = version >= FRAMES_SINCE;
    let mut tracker = if with_frames {
        Some(FrameTracker::at_entry(owner, method).map_err(|e| in_method(e, method))?)
    } else {
        None
    };
    let declared: HashMap<LabelId, Frame> = code.frames.iter().cloned().collect();
    let mut next_label = code.label_count() as LabelId;
    let mut fresh = || {
        let l = next_label;
        next_label += 1;
        l
    };

    let mut out: Vec<Insn> = Vec::with_capacity(code.insns.len() * 2);
    let mut frames: Vec<(LabelId, Frame)> = Vec::new();

    // Entry: fetch the probe array into its slot, then the advice for the
    // implicit monitor of a synchronized method.
    let retrieval_stack = strategy.retrieve(&mut out, method.name == strategy::CLINIT_NAME);
    out.push(Insn::Store {
        kind: VarKind::Ref,
        var: slot,
    });
    advice.on_entry(&mut out);

    // Snapshot in rewritten coordinates: probe cell inserted, operand
    // cells the instruction will consume removed.
    let edge_frame = |tracker: &Option<FrameTracker>, pops: u16| -> SondaResult<Option<Frame>> {
        match tracker {
            Some(t) => {
                let mut f = t.snapshot_with_pops(pops)?;
                inserter.rewrite_frame(&mut f);
                Ok(Some(f))
            }
            None => Ok(None),
        }
    };

    for (index, insn) in code.insns.iter().enumerate() {
        match (insn, plan.site_at(index)) {
            (Insn::Marker(label), site) => {
                if let Some(ProbeSite::AtMarker { id, .. }) = site {
                    // Fall-through edge only; jumps land after the probe.
                    emit_probe(&mut out, mode, slot, *id);
                }
                out.push(insn.clone());
                if let Some(declared_frame) = declared.get(label) {
                    if let Some(t) = tracker.as_mut() {
                        t.apply_frame(declared_frame);
                    }
                    let mut f = declared_frame.clone();
                    inserter.rewrite_frame(&mut f);
                    frames.push((*label, f));
                }
            }
            (Insn::Jump { cond, target }, Some(ProbeSite::JumpTaken { id })) => {
                if *cond == JumpCond::Goto {
                    emit_probe(&mut out, mode, slot, *id);
                    out.push(insn.clone());
                } else {
                    // Invert the branch over the probe so only the taken
                    // edge records a hit.
                    let intermediate = fresh();
                    out.push(Insn::Jump {
                        cond: cond.inverted(),
                        target: intermediate,
                    });
                    emit_probe(&mut out, mode, slot, *id);
                    out.push(Insn::Jump {
                        cond: JumpCond::Goto,
                        target: *target,
                    });
                    out.push(Insn::Marker(intermediate));
                    if let Some(f) = edge_frame(&tracker, cond.pops())? {
                        frames.push((intermediate, f));
                    }
                }
            }
            (Insn::Switch { keys, default }, Some(ProbeSite::SwitchTargets { targets })) => {
                let mut redirect: HashMap<LabelId, LabelId> = HashMap::new();
                for (label, _) in targets {
                    redirect.insert(*label, fresh());
                }
                let map = |l: LabelId| redirect.get(&l).copied().unwrap_or(l);
                out.push(Insn::Switch {
                    keys: keys.iter().map(|&(k, l)| (k, map(l))).collect(),
                    default: map(*default),
                });
                // One trampoline per probed physical label.
                let landing = edge_frame(&tracker, 1)?;
                for (label, id) in targets {
                    out.push(Insn::Marker(redirect[label]));
                    if let Some(f) = &landing {
                        frames.push((redirect[label], f.clone()));
                    }
                    emit_probe(&mut out, mode, slot, *id);
                    out.push(Insn::Jump {
                        cond: JumpCond::Goto,
                        target: *label,
                    });
                }
            }
            (Insn::Return(_) | Insn::Throw, Some(ProbeSite::BeforeExit { id })) => {
                emit_probe(&mut out, mode, slot, *id);
                advice.on_exit(&mut out);
                let mut exit = insn.clone();
                inserter.remap(&mut exit);
                out.push(exit);
            }
            (Insn::MonitorEnter, _) => {
                advice.before(insn, &mut out);
                out.push(insn.clone());
            }
            (Insn::MonitorExit, _) => {
                out.push(insn.clone());
                advice.after(insn, &mut out);
            }
            (_, _) => {
                let mut mapped = insn.clone();
                inserter.remap(&mut mapped);
                out.push(mapped);
            }
        }
        if let Some(t) = tracker.as_mut() {
            t.step(insn).map_err(|e| in_method(e, method))?;
        }
    }

    method.code = Some(Code {
        max_stack: (code.max_stack + mode.probe_stack_size()).max(retrieval_stack),
        max_locals: code.max_locals + 1,
        insns: out,
        handlers: code.handlers,
        frames,
    });
    Ok(())
}
