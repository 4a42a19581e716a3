//! Class-level coverage analysis.

use tracing::debug;

use crate::data::ExecutionData;
use crate::flow::{plan_probes, IdGen, MarkerTags, ProbePlan};
use crate::result::{SondaError, SondaResult};
use crate::unit::reader::read_unit;
use crate::unit::content_hash;

use super::method::analyze_method;
use super::nodes::ClassCoverage;

/// Analyzes the original (uninstrumented) bytes of a unit against
/// recorded execution data.
///
/// Probe ids are re-derived from the bytes in declaration order, so the
/// data must come from an instrumentation of exactly these bytes: the
/// content hash is checked, and a probe array shorter than the id space
/// is rejected. `None` produces a structure-only result with
/// [`ClassCoverage::no_data`] set, reported as no-data rather than as
/// missed.
pub fn analyze_class(bytes: &[u8], data: Option<&ExecutionData>) -> SondaResult<ClassCoverage> {
    let unit = read_unit(bytes)?;
    unit.assert_not_instrumented()?;
    let class_id = content_hash(bytes);
    if let Some(data) = data {
        if data.class_id != class_id {
            return Err(SondaError::ClassIdMismatch {
                name: unit.name.clone(),
                expected: data.class_id,
                actual: class_id,
            });
        }
    }

    let mut ids = IdGen::new();
    let mut plans: Vec<Option<(MarkerTags, ProbePlan)>> = Vec::with_capacity(unit.methods.len());
    for method in &unit.methods {
        plans.push(method.code.as_ref().map(|code| {
            let mut tags = MarkerTags::analyze(code);
            let plan = plan_probes(code, &mut tags, &mut ids);
            (tags, plan)
        }));
    }
    let probe_count = ids.count() as usize;
    let probes = data.map(|d| &d.probes);
    if let Some(p) = probes {
        if p.len() < probe_count {
            return Err(SondaError::UnexpectedEndOfData {
                needed: probe_count,
                available: p.len(),
            });
        }
    }

    let mut class = ClassCoverage::new(
        unit.name.clone(),
        class_id,
        unit.super_name.clone(),
        unit.interfaces.clone(),
        unit.source_file.clone(),
    );
    class.no_data = data.is_none();
    for (method, entry) in unit.methods.iter().zip(plans.iter_mut()) {
        let Some((tags, plan)) = entry else {
            continue;
        };
        let Some(code) = method.code.as_ref() else {
            continue;
        };
        let coverage = analyze_method(method, code, plan, tags, probes);
        class.add_method(coverage);
    }
    debug!(
        unit = %class.name,
        probes = probe_count,
        no_data = class.no_data,
        methods = class.methods.len(),
        "analyzed unit"
    );
    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::counter::{Counter, CoverageStatus};
    use crate::data::{ProbeArray, ProbeMode};
    use crate::unit::opcode::{Frame, Insn, JumpCond, VType, VarKind};
    use crate::unit::writer::write_unit;
    use crate::unit::{
        Code, MethodDef, UnitDef, UnitKind, ACC_PUBLIC, ACC_STATIC, OBJECT_TYPE,
    };

    fn sample_unit() -> UnitDef {
        UnitDef {
            version: 3,
            kind: UnitKind::Class,
            name: "demo/util/Pick".into(),
            super_name: OBJECT_TYPE.into(),
            interfaces: vec![],
            source_file: Some("Pick.src".into()),
            fields: vec![],
            methods: vec![
                MethodDef {
                    flags: ACC_PUBLIC | ACC_STATIC,
                    name: "pick".into(),
                    desc: "(I)I".into(),
                    code: Some(Code {
                        max_stack: 1,
                        max_locals: 1,
                        insns: vec![
                            Insn::Line(4),
                            Insn::Load { kind: VarKind::Int, var: 0 },
                            Insn::Jump { cond: JumpCond::IfNe, target: 0 },
                            Insn::Line(5),
                            Insn::PushInt(7),
                            Insn::Return(Some(VarKind::Int)),
                            Insn::Marker(0),
                            Insn::Line(6),
                            Insn::Load { kind: VarKind::Int, var: 0 },
                            Insn::Return(Some(VarKind::Int)),
                        ],
                        handlers: vec![],
                        frames: vec![(0, Frame { locals: vec![VType::Int], stack: vec![] })],
                    }),
                },
                MethodDef {
                    flags: ACC_PUBLIC | ACC_STATIC,
                    name: "noop".into(),
                    desc: "()V".into(),
                    code: Some(Code {
                        max_stack: 0,
                        max_locals: 0,
                        insns: vec![Insn::Line(9), Insn::Return(None)],
                        handlers: vec![],
                        frames: vec![],
                    }),
                },
            ],
        }
    }

    fn data(bytes: &[u8], probes: ProbeArray) -> ExecutionData {
        ExecutionData::new(content_hash(bytes), "demo/util/Pick", probes)
    }

    #[test]
    fn full_run_covers_everything() {
        let bytes = write_unit(&sample_unit());
        // probes: pick exits 0 and 1, noop exit 2
        let d = data(&bytes, ProbeArray::Exists(vec![true, true, true]));
        let class = analyze_class(&bytes, Some(&d)).unwrap();
        assert_eq!(class.name, "demo/util/Pick");
        assert_eq!(class.package_name(), "demo/util");
        let c = class.counters();
        assert_eq!(c.methods, Counter::new(0, 2));
        assert_eq!(c.classes, Counter::new(0, 1));
        assert_eq!(c.branches, Counter::new(0, 2));
        assert_eq!(class.status(), CoverageStatus::FullyCovered);
    }

    #[test]
    fn partial_run_mixes_counters() {
        let bytes = write_unit(&sample_unit());
        // only noop ran
        let d = data(&bytes, ProbeArray::Exists(vec![false, false, true]));
        let class = analyze_class(&bytes, Some(&d)).unwrap();
        let c = class.counters();
        assert_eq!(c.methods, Counter::new(1, 1));
        assert_eq!(c.classes, Counter::new(0, 1));
        assert_eq!(c.branches, Counter::new(2, 0));
    }

    #[test]
    fn missing_data_marks_class_no_data() {
        let bytes = write_unit(&sample_unit());
        let class = analyze_class(&bytes, None).unwrap();
        assert!(class.no_data);
        assert_eq!(class.status(), CoverageStatus::NoData);
        assert_eq!(class.counters().instructions.covered, 0);
    }

    #[test]
    fn no_data_is_distinct_from_all_missed() {
        let bytes = write_unit(&sample_unit());
        let none = analyze_class(&bytes, None).unwrap();
        let missed = analyze_class(
            &bytes,
            Some(&data(&bytes, ProbeArray::Exists(vec![false, false, false]))),
        )
        .unwrap();
        // same counters, different status: nothing known vs known cold
        assert_eq!(none.counters().instructions, missed.counters().instructions);
        assert_eq!(none.status(), CoverageStatus::NoData);
        assert_eq!(missed.status(), CoverageStatus::NotCovered);
        // the if line carries both branches of pick
        assert_eq!(none.line_status(4), CoverageStatus::NoData);
        assert_eq!(none.branch_status(4), CoverageStatus::NoData);
        assert_eq!(missed.line_status(4), CoverageStatus::NotCovered);
        assert_eq!(missed.branch_status(4), CoverageStatus::NotCovered);
    }

    #[test]
    fn stale_data_is_rejected() {
        let bytes = write_unit(&sample_unit());
        let stale = ExecutionData::new(0xBAD, "demo/util/Pick", ProbeArray::new(ProbeMode::Exists, 3));
        assert!(matches!(
            analyze_class(&bytes, Some(&stale)),
            Err(SondaError::ClassIdMismatch { .. })
        ));
    }

    #[test]
    fn short_probe_array_is_rejected() {
        let bytes = write_unit(&sample_unit());
        let d = data(&bytes, ProbeArray::new(ProbeMode::Exists, 2));
        assert!(matches!(
            analyze_class(&bytes, Some(&d)),
            Err(SondaError::UnexpectedEndOfData { needed: 3, available: 2 })
        ));
    }

    #[test]
    fn counting_probes_drive_the_same_booleans() {
        let bytes = write_unit(&sample_unit());
        let d = data(
            &bytes,
            ProbeArray::ParallelCount { primary: vec![2, 0, 0], parallel: vec![0, 0, 5] },
        );
        let class = analyze_class(&bytes, Some(&d)).unwrap();
        let c = class.counters();
        // probe 1 never fired in either slot
        assert_eq!(c.branches, Counter::new(1, 1));
        assert_eq!(c.methods, Counter::new(0, 2));
    }
}
