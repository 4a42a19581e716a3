//! # Sonda - Probe-Based Code Coverage for Portable Unit Bytecode
//!
//! Sonda instruments compiled units with execution probes, collects probe
//! hits at runtime, and turns recorded probe arrays back into instruction,
//! branch, line, complexity, method and class counters.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     unit (reader/writer)                │
//! │        binary unit format ⇄ in-memory definitions       │
//! └────────────┬───────────────────────────────┬────────────┘
//!              │                               │
//!              ▼                               ▼
//! ┌────────────────────────┐      ┌────────────────────────┐
//! │          flow          │      │          flow          │
//! │  marker tags + probe   │      │   the same plan, re-   │
//! │  plan (instrumenter)   │      │  derived (analyzer)    │
//! └────────────┬───────────┘      └────────────┬───────────┘
//!              │                               │
//!              ▼                               ▼
//! ┌────────────────────────┐      ┌────────────────────────┐
//! │         instr          │      │        analysis        │
//! │  probe insertion, slot │      │  graph builder, filters│
//! │  shift, frame tracking │      │  counters, node tree   │
//! └────────────┬───────────┘      └────────────▲───────────┘
//!              │                               │
//!              ▼                               │
//! ┌────────────────────────┐      ┌────────────┴───────────┐
//! │     runtime (data)     │─────▶│     ExecutionData      │
//! │  live probes, store,   │      │  probe arrays keyed by │
//! │  monitor guard         │      │       content hash     │
//! └────────────────────────┘      └────────────────────────┘
//! ```
//!
//! Probe ids are never stored in the instrumented output: both sides
//! derive them from the original bytes with the same deterministic walk,
//! so analysis only needs the pristine unit and its probe array.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sonda::{analyze_class, instrument, ExecutionData, ProbeMode};
//!
//! # fn main() -> sonda::SondaResult<()> {
//! let original: Vec<u8> = std::fs::read("Widget.unit")?;
//! let out = instrument(&original, ProbeMode::Exists)?;
//! // ... load `out.bytes`, run, collect a probe array `probes` ...
//! # let probes = sonda::ProbeArray::new(ProbeMode::Exists, out.probe_count as usize);
//! let data = ExecutionData::new(out.class_id, "demo/Widget", probes);
//! let coverage = analyze_class(&original, Some(&data))?;
//! println!("{:?}", coverage.counters());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Coverage analysis: graph construction, counters, filters and the
/// coverage node hierarchy.
#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::missing_const_for_fn,
    clippy::missing_docs_in_private_items
)]
pub mod analysis;

/// Execution data: probe arrays, the runtime store and the live probe
/// surface instrumented code calls into.
#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::missing_const_for_fn
)]
pub mod data;

/// Control-flow preparation shared by instrumentation and analysis:
/// marker tagging and probe planning.
#[allow(clippy::must_use_candidate, clippy::missing_const_for_fn)]
pub mod flow;

/// Probe instrumentation: slot insertion, frame tracking, storage
/// strategies and the method rewriter.
#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::missing_const_for_fn,
    clippy::missing_panics_doc
)]
pub mod instr;

/// Error and result types.
#[allow(clippy::missing_errors_doc)]
pub mod result;

/// The portable unit format: definitions, opcodes, reader and writer.
#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::missing_const_for_fn,
    clippy::missing_docs_in_private_items
)]
pub mod unit;

pub use analysis::{
    analyze_class, BundleCoverage, ClassCoverage, Counter, CoverageCounters, CoverageStatus,
    Line, LineStore, MethodCoverage, PackageCoverage, UNKNOWN_LINE,
};
pub use data::{ExecutionData, LiveProbes, MonitorGuard, ProbeArray, ProbeMode, ProbeStore};
pub use instr::{instrument, Instrumented};
pub use result::{SondaError, SondaResult};
pub use unit::content_hash;
