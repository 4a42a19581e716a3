//! Probe data: modes, recorded arrays, execution data store, runtime
//! support.

pub mod execution;
pub mod probes;
pub mod runtime;

pub use execution::{ExecutionData, ProbeStore};
pub use probes::{ProbeArray, ProbeMode};
pub use runtime::{LiveProbes, MonitorGuard};
