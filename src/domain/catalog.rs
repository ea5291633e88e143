//! The template catalog describes which parameters each test reports.
//!
//! The catalog is read-only input to the computation core. It carries no
//! logic beyond lookups and an author-facing [`Catalog::check`].

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use petgraph::{algo::tarjan_scc, graphmap::DiGraphMap};
use serde::{Deserialize, Serialize};

use crate::domain::{Formula, FormulaError, Gender};

/// Identifier of a test template, e.g. `LIPID` or `CBC`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// Creates a test ID from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Whether a parameter holds a number or free text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    /// A numeric measurement.
    #[default]
    Numeric,
    /// Free text, never classified.
    Text,
}

/// A `[min, max]` interval. Either end may be missing in the template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lower end of the normal interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper end of the normal interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Bounds {
    /// Creates a complete interval.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Returns `(min, max)` when both ends are present, finite and ordered.
    #[must_use]
    pub fn complete(&self) -> Option<(f64, f64)> {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min.is_finite() && max.is_finite() && min <= max => {
                Some((min, max))
            }
            _ => None,
        }
    }
}

/// Gender-specific reference ranges for a numeric parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    /// Range applied to male subjects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub male: Option<Bounds>,
    /// Range applied to female subjects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub female: Option<Bounds>,
}

impl ReferenceRange {
    /// A range that is identical for both genders.
    #[must_use]
    pub const fn both(bounds: Bounds) -> Self {
        Self {
            male: Some(bounds),
            female: Some(bounds),
        }
    }
}

/// A single reportable value within a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Display name, also the name formulas use to reference this parameter.
    pub name: String,

    /// Numeric or text.
    #[serde(default)]
    pub kind: ParameterKind,

    /// Unit of measurement, e.g. `mg/dL`.
    #[serde(default)]
    pub unit: String,

    /// Arithmetic expression deriving this parameter from its siblings.
    ///
    /// Placeholders are written `{Parameter Name}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,

    /// Reference range, only meaningful for numeric parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ReferenceRange>,
}

impl Parameter {
    /// A numeric parameter with no formula and no range.
    pub fn numeric(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Numeric,
            unit: unit.into(),
            formula: None,
            range: None,
        }
    }

    /// A text parameter.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Text,
            unit: String::new(),
            formula: None,
            range: None,
        }
    }

    /// Sets the formula.
    #[must_use]
    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    /// Sets the reference range.
    #[must_use]
    pub const fn with_range(mut self, range: ReferenceRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Whether the value of this parameter is derived rather than entered.
    #[must_use]
    pub const fn is_formula(&self) -> bool {
        self.formula.is_some()
    }
}

/// A test template: an ordered list of parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTemplate {
    /// Unique identifier of the test.
    pub id: TestId,

    /// Human-readable test name.
    #[serde(default)]
    pub name: String,

    /// Parameters in report order.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl TestTemplate {
    /// Parses a template from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid template.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

/// A problem a template author should fix.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogIssue {
    /// Two parameters in one test share a name.
    #[error("{test}: parameter '{name}' is declared more than once")]
    DuplicateParameter {
        /// The test.
        test: TestId,
        /// The repeated name.
        name: String,
    },

    /// A formula does not parse.
    #[error("{test}: formula for '{parameter}' is invalid: {error}")]
    InvalidFormula {
        /// The test.
        test: TestId,
        /// The formula parameter.
        parameter: String,
        /// The parse error.
        error: FormulaError,
    },

    /// A formula references a name that no test declares.
    #[error("{test}: formula for '{parameter}' references unknown parameter '{reference}'")]
    UnknownReference {
        /// The test.
        test: TestId,
        /// The formula parameter.
        parameter: String,
        /// The unknown name.
        reference: String,
    },

    /// Formulas reference each other in a loop and can never resolve.
    ///
    /// The loop may span several tests, since selected tests are resolved
    /// together.
    #[error("{}: circular formula references between {}", join(tests), cycle.join(", "))]
    CircularReference {
        /// Tests declaring the names in the cycle, sorted.
        tests: Vec<TestId>,
        /// Names involved in the cycle, sorted.
        cycle: Vec<String>,
    },

    /// Several tests declare the same parameter name, so they cannot be
    /// selected together.
    #[error("{}: parameter '{name}' is declared by more than one test", join(tests))]
    SharedParameter {
        /// The tests declaring the name, sorted.
        tests: Vec<TestId>,
        /// The shared name.
        name: String,
    },

    /// A formula is declared on a text parameter.
    #[error("{test}: text parameter '{parameter}' declares a formula")]
    FormulaOnText {
        /// The test.
        test: TestId,
        /// The text parameter.
        parameter: String,
    },

    /// A range is declared on a text parameter.
    #[error("{test}: text parameter '{parameter}' declares a reference range")]
    RangeOnText {
        /// The test.
        test: TestId,
        /// The text parameter.
        parameter: String,
    },

    /// A numeric range is missing an end or is inverted for one gender.
    #[error("{test}: reference range for '{parameter}' is incomplete for {gender}")]
    IncompleteRange {
        /// The test.
        test: TestId,
        /// The parameter.
        parameter: String,
        /// The affected gender.
        gender: Gender,
    },
}

/// The set of known test templates, keyed by test ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    tests: BTreeMap<TestId, TestTemplate>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a template, returning the template it replaced, if any.
    pub fn insert(&mut self, template: TestTemplate) -> Option<TestTemplate> {
        self.tests.insert(template.id.clone(), template)
    }

    /// Looks up a template by ID.
    #[must_use]
    pub fn get(&self, id: &TestId) -> Option<&TestTemplate> {
        self.tests.get(id)
    }

    /// Iterates templates in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &TestTemplate> + '_ {
        self.tests.values()
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Whether the catalog has no templates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Reports authoring problems across every template.
    ///
    /// Formula references are checked against the whole catalog, because
    /// any selection of tests is resolved as one parameter set.
    #[must_use]
    pub fn check(&self) -> Vec<CatalogIssue> {
        let mut owners: BTreeMap<&str, BTreeSet<&TestId>> = BTreeMap::new();
        for template in self.iter() {
            for parameter in &template.parameters {
                owners
                    .entry(parameter.name.as_str())
                    .or_default()
                    .insert(&template.id);
            }
        }

        let mut issues = Vec::new();
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for template in self.iter() {
            check_template(template, &owners, &mut graph, &mut issues);
        }

        for (name, tests) in &owners {
            if tests.len() > 1 {
                issues.push(CatalogIssue::SharedParameter {
                    tests: tests.iter().map(|&t| t.clone()).collect(),
                    name: (*name).to_string(),
                });
            }
        }

        for component in tarjan_scc(&graph) {
            let is_cycle = component.len() > 1 || graph.contains_edge(component[0], component[0]);
            if is_cycle {
                let mut cycle: Vec<String> = component.iter().map(ToString::to_string).collect();
                cycle.sort();
                let tests: BTreeSet<&TestId> = component
                    .iter()
                    .filter_map(|name| owners.get(name))
                    .flatten()
                    .copied()
                    .collect();
                issues.push(CatalogIssue::CircularReference {
                    tests: tests.into_iter().cloned().collect(),
                    cycle,
                });
            }
        }
        issues
    }
}

impl FromIterator<TestTemplate> for Catalog {
    fn from_iter<I: IntoIterator<Item = TestTemplate>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for template in iter {
            catalog.insert(template);
        }
        catalog
    }
}

fn join(tests: &[TestId]) -> String {
    tests
        .iter()
        .map(TestId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_template<'a>(
    template: &'a TestTemplate,
    owners: &BTreeMap<&'a str, BTreeSet<&'a TestId>>,
    graph: &mut DiGraphMap<&'a str, ()>,
    issues: &mut Vec<CatalogIssue>,
) {
    let test = &template.id;
    let mut seen = BTreeSet::new();

    for parameter in &template.parameters {
        let name = parameter.name.as_str();
        if !seen.insert(name) {
            issues.push(CatalogIssue::DuplicateParameter {
                test: test.clone(),
                name: parameter.name.clone(),
            });
        }
        graph.add_node(name);

        check_range(test, parameter, issues);

        let Some(source) = &parameter.formula else {
            continue;
        };
        if parameter.kind == ParameterKind::Text {
            issues.push(CatalogIssue::FormulaOnText {
                test: test.clone(),
                parameter: parameter.name.clone(),
            });
        }
        match Formula::parse(source) {
            Ok(formula) => {
                for reference in formula.references() {
                    if let Some((&target, _)) = owners.get_key_value(reference) {
                        graph.add_edge(name, target, ());
                    } else {
                        issues.push(CatalogIssue::UnknownReference {
                            test: test.clone(),
                            parameter: parameter.name.clone(),
                            reference: reference.to_string(),
                        });
                    }
                }
            }
            Err(error) => issues.push(CatalogIssue::InvalidFormula {
                test: test.clone(),
                parameter: parameter.name.clone(),
                error,
            }),
        }
    }
}

fn check_range(test: &TestId, parameter: &Parameter, issues: &mut Vec<CatalogIssue>) {
    let Some(range) = &parameter.range else {
        return;
    };
    if parameter.kind == ParameterKind::Text {
        issues.push(CatalogIssue::RangeOnText {
            test: test.clone(),
            parameter: parameter.name.clone(),
        });
        return;
    }
    for (gender, bounds) in [(Gender::Male, range.male), (Gender::Female, range.female)] {
        if bounds.and_then(|b| b.complete()).is_none() {
            issues.push(CatalogIssue::IncompleteRange {
                test: test.clone(),
                parameter: parameter.name.clone(),
                gender,
            });
        }
    }
}
