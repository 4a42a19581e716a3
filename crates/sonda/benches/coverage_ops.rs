//! Coverage Operations Benchmarks
//!
//! Benchmarks for instrumentation and analysis of synthetic units.
//!
//! Run with: `cargo bench --bench coverage_ops`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sonda::unit::opcode::{Insn, JumpCond, VarKind};
use sonda::unit::writer::write_unit;
use sonda::unit::{Code, MethodDef, UnitDef, UnitKind, ACC_PUBLIC, ACC_STATIC, OBJECT_TYPE};
use sonda::{analyze_class, instrument, ExecutionData, ProbeArray, ProbeMode};

/// A unit with `methods` copies of a small branchy method.
fn synthetic_unit(methods: usize) -> UnitDef {
    let body = Code {
        max_stack: 2,
        max_locals: 1,
        insns: vec![
            Insn::Line(1),
            Insn::Load { kind: VarKind::Int, var: 0 },
            Insn::Jump { cond: JumpCond::IfNe, target: 0 },
            Insn::Line(2),
            Insn::PushInt(7),
            Insn::Return(Some(VarKind::Int)),
            Insn::Marker(0),
            Insn::Line(3),
            Insn::Load { kind: VarKind::Int, var: 0 },
            Insn::Jump { cond: JumpCond::IfLt, target: 1 },
            Insn::Line(4),
            Insn::PushInt(0),
            Insn::Return(Some(VarKind::Int)),
            Insn::Marker(1),
            Insn::Line(5),
            Insn::Load { kind: VarKind::Int, var: 0 },
            Insn::Return(Some(VarKind::Int)),
        ],
        handlers: vec![],
        frames: vec![],
    };
    UnitDef {
        version: 2,
        kind: UnitKind::Class,
        name: "bench/Synthetic".into(),
        super_name: OBJECT_TYPE.into(),
        interfaces: vec![],
        source_file: Some("Synthetic.src".into()),
        fields: vec![],
        methods: (0..methods)
            .map(|i| MethodDef {
                flags: ACC_PUBLIC | ACC_STATIC,
                name: format!("m{i}"),
                desc: "(I)I".into(),
                code: Some(body.clone()),
            })
            .collect(),
    }
}

fn bench_instrument(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument");

    for methods in [1, 10, 100] {
        let bytes = write_unit(&synthetic_unit(methods));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{methods}_methods")),
            &bytes,
            |bench, bytes| {
                bench.iter(|| {
                    let out = instrument(black_box(bytes), ProbeMode::Exists).unwrap();
                    black_box(out);
                });
            },
        );
    }

    group.finish();
}

fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze");

    for methods in [1, 10, 100] {
        let bytes = write_unit(&synthetic_unit(methods));
        let out = instrument(&bytes, ProbeMode::Exists).unwrap();
        let mut probes = ProbeArray::new(ProbeMode::Exists, out.probe_count as usize);
        // cover every other probe for a mixed result
        for id in (0..out.probe_count as usize).step_by(2) {
            probes.record(id);
        }
        let data = ExecutionData::new(out.class_id, "bench/Synthetic", probes);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{methods}_methods")),
            &(bytes, data),
            |bench, (bytes, data)| {
                bench.iter(|| {
                    let coverage = analyze_class(black_box(bytes), Some(data)).unwrap();
                    black_box(coverage.counters());
                });
            },
        );
    }

    group.finish();
}

fn bench_probe_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("probe_merge");

    for len in [64, 1024, 16384] {
        let mut a = ProbeArray::new(ProbeMode::Count, len);
        let mut b = ProbeArray::new(ProbeMode::Count, len);
        for id in 0..len {
            if id % 2 == 0 {
                a.record(id);
            } else {
                b.record(id);
            }
        }
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{len}_probes")),
            &(a, b),
            |bench, (a, b)| {
                bench.iter(|| {
                    let mut merged = a.clone();
                    merged.merge(black_box(b), "bench/Synthetic").unwrap();
                    black_box(merged);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_instrument, bench_analyze, bench_probe_merge);
criterion_main!(benches);
