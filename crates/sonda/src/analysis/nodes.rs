//! Coverage node hierarchy: method, class, package, bundle.
//!
//! Counters roll up strictly bottom-up. Methods accumulate per
//! instruction, classes merge their methods' lines and derive the class
//! counter from the method counter, packages and bundles just aggregate.
//! All nodes serialize for report export.

use serde::{Deserialize, Serialize};

use super::counter::{Counter, CoverageStatus};
use super::line::{LineStore, UNKNOWN_LINE};

/// The six counter dimensions of a coverage node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCounters {
    pub instructions: Counter,
    pub branches: Counter,
    pub lines: Counter,
    pub complexity: Counter,
    pub methods: Counter,
    pub classes: Counter,
}

impl CoverageCounters {
    pub fn increment(&mut self, other: &Self) {
        self.instructions = self.instructions.increment(other.instructions);
        self.branches = self.branches.increment(other.branches);
        self.lines = self.lines.increment(other.lines);
        self.complexity = self.complexity.increment(other.complexity);
        self.methods = self.methods.increment(other.methods);
        self.classes = self.classes.increment(other.classes);
    }

    /// Status derived from the instruction counter.
    #[must_use]
    pub const fn status(&self) -> CoverageStatus {
        self.instructions.status()
    }
}

/// Coverage of one method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCoverage {
    pub name: String,
    pub desc: String,
    pub instructions: Counter,
    pub branches: Counter,
    pub complexity: Counter,
    pub methods: Counter,
    pub lines: LineStore,
}

impl MethodCoverage {
    #[must_use]
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            instructions: Counter::ZERO,
            branches: Counter::ZERO,
            complexity: Counter::ZERO,
            methods: Counter::ZERO,
            lines: LineStore::new(),
        }
    }

    /// Accumulates one instruction. A node with more than one branch
    /// contributes its decision points to cyclomatic complexity.
    pub fn increment(&mut self, instructions: Counter, branches: Counter, line: i32) {
        if line != UNKNOWN_LINE {
            self.lines.increment(line, instructions, branches);
        }
        self.instructions = self.instructions.increment(instructions);
        self.branches = self.branches.increment(branches);
        if branches.total() > 1 {
            let covered = branches.covered.saturating_sub(1);
            let missed = (branches.total() - covered).saturating_sub(1);
            self.complexity = self.complexity.increment(Counter::new(missed, covered));
        }
    }

    /// Counts the method itself, covered when any instruction executed.
    /// The method also contributes one unit of complexity.
    pub fn increment_method_counter(&mut self) {
        let base = if self.instructions.covered == 0 {
            Counter::new(1, 0)
        } else {
            Counter::new(0, 1)
        };
        self.methods = self.methods.increment(base);
        self.complexity = self.complexity.increment(base);
    }

    #[must_use]
    pub fn first_line(&self) -> Option<i32> {
        self.lines.first_line()
    }

    #[must_use]
    pub fn last_line(&self) -> Option<i32> {
        self.lines.last_line()
    }

    #[must_use]
    pub fn counters(&self) -> CoverageCounters {
        CoverageCounters {
            instructions: self.instructions,
            branches: self.branches,
            lines: self.lines.line_counter(),
            complexity: self.complexity,
            methods: self.methods,
            classes: Counter::ZERO,
        }
    }
}

/// Coverage of one class or interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCoverage {
    pub name: String,
    /// Content hash of the original unit bytes
    pub class_id: u64,
    pub super_name: String,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub methods: Vec<MethodCoverage>,
    pub lines: LineStore,
    /// True when analyzed without execution data for this unit
    pub no_data: bool,
}

impl ClassCoverage {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        class_id: u64,
        super_name: impl Into<String>,
        interfaces: Vec<String>,
        source_file: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            class_id,
            super_name: super_name.into(),
            interfaces,
            source_file,
            methods: Vec::new(),
            lines: LineStore::new(),
            no_data: false,
        }
    }

    /// Adds a method; its lines merge into the class store. Methods
    /// without instructions carry no weight and are dropped.
    pub fn add_method(&mut self, method: MethodCoverage) {
        if method.instructions.total() == 0 {
            return;
        }
        self.lines.merge(&method.lines);
        self.methods.push(method);
    }

    /// The package this class belongs to: its name up to the last `/`.
    #[must_use]
    pub fn package_name(&self) -> &str {
        self.name.rfind('/').map_or("", |i| &self.name[..i])
    }

    #[must_use]
    pub fn counters(&self) -> CoverageCounters {
        let mut counters = CoverageCounters::default();
        for method in &self.methods {
            counters.increment(&method.counters());
        }
        // one class unit, covered when any method is
        if counters.methods.total() > 0 {
            counters.classes = if counters.methods.covered > 0 {
                Counter::new(0, 1)
            } else {
                Counter::new(1, 0)
            };
        }
        counters
    }

    /// Without execution data nothing is known, which is reported as
    /// [`CoverageStatus::NoData`] rather than as missed.
    #[must_use]
    pub fn status(&self) -> CoverageStatus {
        if self.no_data && self.counters().instructions.total() > 0 {
            return CoverageStatus::NoData;
        }
        self.counters().status()
    }

    /// Status of one source line, honoring the class's data availability.
    #[must_use]
    pub fn line_status(&self, line: i32) -> CoverageStatus {
        let l = self.lines.get(line);
        if l.is_empty() {
            return CoverageStatus::Empty;
        }
        if self.no_data {
            return CoverageStatus::NoData;
        }
        l.instructions.status()
    }

    /// Status of the branches on one source line.
    #[must_use]
    pub fn branch_status(&self, line: i32) -> CoverageStatus {
        let l = self.lines.get(line);
        if l.branches.total() == 0 {
            return CoverageStatus::Empty;
        }
        if self.no_data {
            return CoverageStatus::NoData;
        }
        l.branches.status()
    }
}

/// Coverage of one package: all classes sharing a name prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageCoverage {
    pub name: String,
    pub classes: Vec<ClassCoverage>,
}

impl PackageCoverage {
    #[must_use]
    pub fn counters(&self) -> CoverageCounters {
        let mut counters = CoverageCounters::default();
        for class in &self.classes {
            counters.increment(&class.counters());
        }
        counters
    }
}

/// A named group of packages, the root of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleCoverage {
    pub name: String,
    pub packages: Vec<PackageCoverage>,
}

impl BundleCoverage {
    /// Groups classes into packages by name prefix. Packages and classes
    /// are sorted for stable reports.
    #[must_use]
    pub fn from_classes(name: impl Into<String>, mut classes: Vec<ClassCoverage>) -> Self {
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        let mut packages: Vec<PackageCoverage> = Vec::new();
        for class in classes {
            let package_name = class.package_name().to_string();
            match packages.iter_mut().find(|p| p.name == package_name) {
                Some(package) => package.classes.push(class),
                None => packages.push(PackageCoverage {
                    name: package_name,
                    classes: vec![class],
                }),
            }
        }
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            name: name.into(),
            packages,
        }
    }

    #[must_use]
    pub fn counters(&self) -> CoverageCounters {
        let mut counters = CoverageCounters::default();
        for package in &self.packages {
            counters.increment(&package.counters());
        }
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered_method(name: &str) -> MethodCoverage {
        let mut m = MethodCoverage::new(name, "()V");
        m.increment(Counter::new(0, 1), Counter::ZERO, 10);
        m.increment(Counter::new(1, 0), Counter::new(1, 1), 11);
        m.increment_method_counter();
        m
    }

    fn missed_method(name: &str) -> MethodCoverage {
        let mut m = MethodCoverage::new(name, "()V");
        m.increment(Counter::new(1, 0), Counter::ZERO, 20);
        m.increment_method_counter();
        m
    }

    #[test]
    fn complexity_formula() {
        let mut m = MethodCoverage::new("f", "()V");
        // fully covered 2-way decision: one covered decision point
        m.increment(Counter::new(0, 1), Counter::new(0, 2), UNKNOWN_LINE);
        assert_eq!(m.complexity, Counter::new(0, 1));
        // untouched 3-way decision: two missed decision points
        m.increment(Counter::new(1, 0), Counter::new(3, 0), UNKNOWN_LINE);
        assert_eq!(m.complexity, Counter::new(2, 1));
        // half-covered 2-way decision: one missed point
        m.increment(Counter::new(0, 1), Counter::new(1, 1), UNKNOWN_LINE);
        assert_eq!(m.complexity, Counter::new(3, 1));
        // the method itself adds one covered unit
        m.increment_method_counter();
        assert_eq!(m.complexity, Counter::new(3, 2));
    }

    #[test]
    fn method_counter_flips_on_any_coverage() {
        let m = covered_method("hit");
        assert_eq!(m.methods, Counter::new(0, 1));
        let m = missed_method("cold");
        assert_eq!(m.methods, Counter::new(1, 0));
    }

    #[test]
    fn class_counters_aggregate_methods() {
        let mut class = ClassCoverage::new("demo/util/Widget", 1, "core/Object", vec![], None);
        class.add_method(covered_method("a"));
        class.add_method(missed_method("b"));
        class.add_method(MethodCoverage::new("empty", "()V")); // dropped
        let c = class.counters();
        assert_eq!(class.methods.len(), 2);
        assert_eq!(c.methods, Counter::new(1, 1));
        assert_eq!(c.classes, Counter::new(0, 1));
        assert_eq!(c.instructions, Counter::new(2, 1));
        assert_eq!(class.lines.first_line(), Some(10));
        assert_eq!(class.lines.last_line(), Some(20));
    }

    #[test]
    fn uncovered_class_counts_as_missed() {
        let mut class = ClassCoverage::new("demo/Cold", 2, "core/Object", vec![], None);
        class.add_method(missed_method("only"));
        assert_eq!(class.counters().classes, Counter::new(1, 0));
        assert_eq!(class.status(), CoverageStatus::NotCovered);
    }

    #[test]
    fn class_without_data_reports_no_data_per_line() {
        let mut class = ClassCoverage::new("demo/Dark", 3, "core/Object", vec![], None);
        class.add_method(missed_method("only"));
        class.no_data = true;
        assert_eq!(class.status(), CoverageStatus::NoData);
        assert_eq!(class.line_status(20), CoverageStatus::NoData);
        assert_eq!(class.branch_status(20), CoverageStatus::Empty);
        // a line with no instructions stays empty either way
        assert_eq!(class.line_status(99), CoverageStatus::Empty);

        class.no_data = false;
        assert_eq!(class.status(), CoverageStatus::NotCovered);
        assert_eq!(class.line_status(20), CoverageStatus::NotCovered);
    }

    #[test]
    fn bundle_groups_by_package() {
        let classes = vec![
            ClassCoverage::new("demo/util/A", 1, "core/Object", vec![], None),
            ClassCoverage::new("demo/util/B", 2, "core/Object", vec![], None),
            ClassCoverage::new("demo/C", 3, "core/Object", vec![], None),
            ClassCoverage::new("Top", 4, "core/Object", vec![], None),
        ];
        let bundle = BundleCoverage::from_classes("app", classes);
        let names: Vec<&str> = bundle.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["", "demo", "demo/util"]);
        assert_eq!(bundle.packages[2].classes.len(), 2);
    }

    #[test]
    fn nodes_serialize_to_json() {
        let mut class = ClassCoverage::new("demo/Widget", 9, "core/Object", vec![], None);
        class.add_method(covered_method("run"));
        let bundle = BundleCoverage::from_classes("app", vec![class]);
        let json = serde_json::to_string(&bundle).unwrap();
        let back: BundleCoverage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.counters(), bundle.counters());
    }
}
