//! Control-flow analysis shared by instrumentation and coverage analysis.

pub mod probes;
pub mod tagger;

pub use probes::{plan_probes, IdGen, ProbePlan, ProbeSite};
pub use tagger::MarkerTags;
