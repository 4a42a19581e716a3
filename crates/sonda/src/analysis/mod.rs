//! Coverage analysis: graph construction, counters, filters and the
//! coverage node hierarchy.

pub mod analyzer;
pub mod builder;
pub mod counter;
pub mod filter;
pub mod instruction;
pub mod line;
pub mod method;
pub mod nodes;

pub use analyzer::analyze_class;
pub use counter::{Counter, CoverageStatus};
pub use filter::{Filter, FilterDirectives, FilterOutput};
pub use line::{Line, LineStore, UNKNOWN_LINE};
pub use nodes::{
    BundleCoverage, ClassCoverage, CoverageCounters, MethodCoverage, PackageCoverage,
};
