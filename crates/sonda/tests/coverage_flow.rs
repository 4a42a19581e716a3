//! End-to-end flow: instrument a unit, record hits through the runtime
//! surface, collect into a store and analyze the original bytes.

use sonda::unit::opcode::{Frame, Insn, JumpCond, VType, VarKind};
use sonda::unit::writer::write_unit;
use sonda::unit::{Code, MethodDef, UnitDef, UnitKind, ACC_PUBLIC, ACC_STATIC, OBJECT_TYPE};
use sonda::{
    analyze_class, instrument, BundleCoverage, Counter, CoverageStatus, ExecutionData, LiveProbes,
    ProbeMode, ProbeStore, SondaError,
};

/// Two methods: a branchy `pick` (probes 0 and 1, one per exit) and a
/// straight-line `noop` (probe 2).
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

#[test]
fn instrument_record_and_analyze() {
    let original = write_unit(&sample_unit());
    let out = instrument(&original, ProbeMode::Exists).unwrap();
    assert_eq!(out.probe_count, 3);
    assert_ne!(out.bytes, original);

    // a "run": pick takes the fall-through exit, noop returns
    let live = LiveProbes::new(ProbeMode::Exists, out.probe_count as usize);
    live.hit(0);
    live.hit(2);

    let store = ProbeStore::new();
    store
        .put(ExecutionData::new(out.class_id, "demo/util/Pick", live.snapshot()))
        .unwrap();
    let collected = store.snapshot(false).unwrap();
    assert_eq!(collected.len(), 1);

    let class = analyze_class(&original, Some(&collected[0])).unwrap();
    let c = class.counters();
    assert_eq!(c.methods, Counter::new(0, 2));
    assert_eq!(c.branches, Counter::new(1, 1));
    assert_eq!(class.status(), CoverageStatus::PartlyCovered);
}

#[test]
fn runs_merge_in_the_store() {
    let original = write_unit(&sample_unit());
    let out = instrument(&original, ProbeMode::Count).unwrap();

    let store = ProbeStore::new();
    for probe in [0_usize, 1] {
        let live = LiveProbes::new(ProbeMode::Count, out.probe_count as usize);
        live.hit(probe);
        store
            .put(ExecutionData::new(out.class_id, "demo/util/Pick", live.snapshot()))
            .unwrap();
    }
    let collected = store.snapshot(false).unwrap();
    let class = analyze_class(&original, Some(&collected[0])).unwrap();
    // both pick exits across the two runs, noop never ran
    assert_eq!(class.counters().branches, Counter::new(0, 2));
    assert_eq!(class.counters().methods, Counter::new(1, 1));
}

#[test]
fn instrumented_bytes_are_rejected_everywhere() {
    let original = write_unit(&sample_unit());
    let out = instrument(&original, ProbeMode::Exists).unwrap();
    assert!(matches!(
        instrument(&out.bytes, ProbeMode::Exists),
        Err(SondaError::AlreadyInstrumented { .. })
    ));
    assert!(matches!(
        analyze_class(&out.bytes, None),
        Err(SondaError::AlreadyInstrumented { .. })
    ));
}

#[test]
fn bundle_report_round_trips_as_json() {
    let original = write_unit(&sample_unit());
    let out = instrument(&original, ProbeMode::Exists).unwrap();
    let live = LiveProbes::new(ProbeMode::Exists, out.probe_count as usize);
    live.hit(0);
    live.hit(1);
    live.hit(2);
    let data = ExecutionData::new(out.class_id, "demo/util/Pick", live.snapshot());

    let class = analyze_class(&original, Some(&data)).unwrap();
    let bundle = BundleCoverage::from_classes("demo", vec![class]);
    assert_eq!(bundle.packages.len(), 1);
    assert_eq!(bundle.packages[0].name, "demo/util");
    assert_eq!(bundle.counters().classes, Counter::new(0, 1));

    let json = serde_json::to_string_pretty(&bundle).unwrap();
    let back: BundleCoverage = serde_json::from_str(&json).unwrap();
    assert_eq!(back.counters(), bundle.counters());
}
