//! Resolution of formula parameters by fixpoint iteration.
//!
//! Operator input supplies the raw parameters. Formula parameters are then
//! evaluated in passes: each pass evaluates every formula whose references
//! all have values, until a pass resolves nothing new. Declaration order does
//! not matter, and a formula that can't be evaluated only affects its own
//! parameter (and those that depend on it).

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::domain::{EvalError, Formula, FormulaError, Parameter, ParameterKind};

/// Operator input, keyed by parameter name.
///
/// Blank entries are treated as absent.
pub type RawValues = BTreeMap<String, String>;

/// The resolved value of a parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A numeric result.
    Number(f64),
    /// Free text, passed through from operator input.
    Text(String),
    /// No value: missing input, missing dependency, or a failed formula.
    #[default]
    Unresolved,
}

impl Value {
    /// The numeric value, if there is one.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether the parameter has a value.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// A non-fatal problem found while resolving.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Issue {
    /// A formula references parameters that have no value.
    #[error("'{parameter}' is waiting for {}", missing.join(", "))]
    UnresolvedDependency {
        /// The formula parameter.
        parameter: String,
        /// Referenced names without a value.
        missing: Vec<String>,
    },

    /// A formula does not parse.
    #[error("'{parameter}' has an invalid formula: {error}")]
    InvalidExpression {
        /// The formula parameter.
        parameter: String,
        /// Why it failed to parse.
        error: FormulaError,
    },

    /// A formula evaluated to something other than a finite number.
    #[error("'{parameter}' could not be computed: {error}")]
    NonFinite {
        /// The formula parameter.
        parameter: String,
        /// The evaluation failure.
        error: EvalError,
    },

    /// Operator input for a numeric parameter is not a number.
    #[error("'{parameter}' expects a number, got '{input}'")]
    InvalidInput {
        /// The parameter.
        parameter: String,
        /// The rejected input.
        input: String,
    },
}

/// Two parameters in one computation group share a name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parameter '{0}' is declared more than once")]
pub struct DuplicateParameter(pub String);

/// The output of [`ParameterSet::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    values: BTreeMap<String, Value>,
    issues: Vec<Issue>,
    passes: usize,
}

impl Resolution {
    /// The value of a parameter, if the parameter exists.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The numeric value of a parameter, if it has one.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_number)
    }

    /// Every parameter and its value, in name order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Problems found while resolving.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Number of formula passes run.
    #[must_use]
    pub const fn passes(&self) -> usize {
        self.passes
    }
}

/// The full set of parameters computed together for one report.
///
/// Names are unique across the set, so a formula placeholder always refers to
/// exactly one parameter. Formulas are parsed once, when the set is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    parameters: Vec<Parameter>,
    formulas: Vec<Option<Result<Formula, FormulaError>>>,
}

impl ParameterSet {
    /// Builds a parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateParameter`] if two parameters share a name.
    pub fn new<I>(parameters: I) -> Result<Self, DuplicateParameter>
    where
        I: IntoIterator<Item = Parameter>,
    {
        let parameters: Vec<Parameter> = parameters.into_iter().collect();

        let mut names = HashSet::with_capacity(parameters.len());
        for parameter in &parameters {
            if !names.insert(parameter.name.as_str()) {
                return Err(DuplicateParameter(parameter.name.clone()));
            }
        }

        let formulas = parameters
            .iter()
            .map(|p| p.formula.as_deref().map(Formula::parse))
            .collect();

        Ok(Self {
            parameters,
            formulas,
        })
    }

    /// Looks up a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Iterates parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> + '_ {
        self.parameters.iter()
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Resolves every parameter from operator input.
    ///
    /// This is a pure function of `self` and `raw`. Raw input supplied for a
    /// formula parameter is ignored.
    #[instrument(level = "debug", skip_all, fields(parameters = self.parameters.len()))]
    pub fn resolve(&self, raw: &RawValues) -> Resolution {
        let mut values = BTreeMap::new();
        let mut issues = Vec::new();
        let mut known: HashMap<&str, f64> = HashMap::new();
        let mut pending: Vec<(&Parameter, &Formula)> = Vec::new();

        for (parameter, formula) in self.parameters.iter().zip(&self.formulas) {
            let name = parameter.name.as_str();
            match formula {
                Some(Ok(formula)) => pending.push((parameter, formula)),
                Some(Err(error)) => {
                    tracing::warn!(parameter = name, %error, "invalid formula");
                    issues.push(Issue::InvalidExpression {
                        parameter: parameter.name.clone(),
                        error: error.clone(),
                    });
                }
                None => {
                    let value = raw_value(parameter, raw.get(name), &mut issues);
                    if let Value::Number(n) = value {
                        known.insert(name, n);
                    }
                    values.insert(parameter.name.clone(), value);
                }
            }
            values.entry(parameter.name.clone()).or_default();
        }

        let mut passes = 0;
        while !pending.is_empty() {
            passes += 1;
            let mut resolved = 0;

            pending.retain(|&(parameter, formula)| {
                let name = parameter.name.as_str();
                match formula.evaluate(|r| known.get(r).copied()).and_then(round) {
                    Ok(value) => {
                        known.insert(name, value);
                        values.insert(parameter.name.clone(), Value::Number(value));
                        resolved += 1;
                        false
                    }
                    Err(EvalError::Unresolved(_)) => true,
                    Err(error) => {
                        tracing::debug!(parameter = name, %error, "formula did not produce a number");
                        issues.push(Issue::NonFinite {
                            parameter: parameter.name.clone(),
                            error,
                        });
                        false
                    }
                }
            });

            tracing::debug!(pass = passes, resolved, remaining = pending.len());
            if resolved == 0 {
                break;
            }
        }

        for (parameter, formula) in pending {
            let missing = formula
                .references()
                .filter(|r| !known.contains_key(r))
                .map(ToString::to_string)
                .collect();
            issues.push(Issue::UnresolvedDependency {
                parameter: parameter.name.clone(),
                missing,
            });
        }

        Resolution {
            values,
            issues,
            passes,
        }
    }
}

/// Magnitude above which an `f64` has no fractional digits left to round.
const ROUNDING_LIMIT: f64 = 1e15;

/// Rounds to two decimal places.
fn round(value: f64) -> Result<f64, EvalError> {
    if !value.is_finite() {
        return Err(EvalError::NonFinite);
    }
    if value.abs() >= ROUNDING_LIMIT {
        return Ok(value);
    }
    Ok((value * 100.0).round() / 100.0)
}

fn raw_value(parameter: &Parameter, input: Option<&String>, issues: &mut Vec<Issue>) -> Value {
    let Some(input) = input.map(|s| s.trim()).filter(|s| !s.is_empty()) else {
        return Value::Unresolved;
    };
    match parameter.kind {
        ParameterKind::Text => Value::Text(input.to_string()),
        ParameterKind::Numeric => match input.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => {
                issues.push(Issue::InvalidInput {
                    parameter: parameter.name.clone(),
                    input: input.to_string(),
                });
                Value::Unresolved
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bounds, ReferenceRange};

    fn raw(pairs: &[(&str, &str)]) -> RawValues {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn lipid() -> ParameterSet {
        ParameterSet::new([
            Parameter::numeric("Total Cholesterol", "mg/dL")
                .with_range(ReferenceRange::both(Bounds::new(0.0, 200.0))),
            Parameter::numeric("HDL", "mg/dL")
                .with_range(ReferenceRange::both(Bounds::new(30.0, 60.0))),
            Parameter::numeric("LDL", "mg/dL")
                .with_formula("{Total Cholesterol} - {HDL} - 20")
                .with_range(ReferenceRange::both(Bounds::new(0.0, 100.0))),
        ])
        .unwrap()
    }

    #[test]
    fn without_formulas_raw_values_pass_through() {
        let set = ParameterSet::new([
            Parameter::numeric("Hemoglobin", "g/dL"),
            Parameter::numeric("WBC", "10^3/uL"),
            Parameter::text("Appearance"),
        ])
        .unwrap();
        let resolution = set.resolve(&raw(&[
            ("Hemoglobin", "13.456"),
            ("WBC", "7"),
            ("Appearance", "clear"),
        ]));

        assert_eq!(resolution.number("Hemoglobin"), Some(13.456));
        assert_eq!(resolution.number("WBC"), Some(7.0));
        assert_eq!(
            resolution.get("Appearance"),
            Some(&Value::Text("clear".to_string()))
        );
        assert!(resolution.issues().is_empty());
        assert_eq!(resolution.passes(), 0);
    }

    #[test]
    fn computes_formula_from_two_inputs() {
        let resolution = lipid().resolve(&raw(&[("Total Cholesterol", "200"), ("HDL", "50")]));
        assert_eq!(resolution.number("LDL"), Some(130.0));
        assert!(resolution.issues().is_empty());
    }

    #[test]
    fn rounds_to_two_decimals() {
        let set = ParameterSet::new([
            Parameter::numeric("A", ""),
            Parameter::numeric("B", ""),
            Parameter::numeric("Ratio", "").with_formula("{A} / {B}"),
        ])
        .unwrap();
        let resolution = set.resolve(&raw(&[("A", "10"), ("B", "3")]));
        assert_eq!(resolution.number("Ratio"), Some(3.33));

        let resolution = set.resolve(&raw(&[("A", "2"), ("B", "3")]));
        assert_eq!(resolution.number("Ratio"), Some(0.67));
    }

    #[test]
    fn huge_finite_results_are_kept() {
        let set = ParameterSet::new([
            Parameter::numeric("A", ""),
            Parameter::numeric("Copy", "").with_formula("{A} * 1"),
        ])
        .unwrap();

        let resolution = set.resolve(&raw(&[("A", "1e307")]));

        assert_eq!(resolution.number("Copy"), Some(1e307));
        assert!(resolution.issues().is_empty());
    }

    #[test]
    fn clearing_a_dependency_blanks_the_formula() {
        let set = lipid();
        let before = set.resolve(&raw(&[("Total Cholesterol", "200"), ("HDL", "50")]));
        assert_eq!(before.number("LDL"), Some(130.0));

        let after = set.resolve(&raw(&[("Total Cholesterol", "200"), ("HDL", "")]));
        assert_eq!(after.get("LDL"), Some(&Value::Unresolved));
        assert_eq!(
            after.issues(),
            &[Issue::UnresolvedDependency {
                parameter: "LDL".to_string(),
                missing: vec!["HDL".to_string()],
            }]
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let set = lipid();
        let input = raw(&[("Total Cholesterol", "187.5"), ("HDL", "41.25")]);
        let first = set.resolve(&input);
        let second = set.resolve(&input);

        assert_eq!(first, second);
        for ((name_a, a), (name_b, b)) in first.values().zip(second.values()) {
            assert_eq!(name_a, name_b);
            assert_eq!(
                a.as_number().map(f64::to_bits),
                b.as_number().map(f64::to_bits)
            );
        }
    }

    #[test]
    fn resolves_regardless_of_declaration_order() {
        let set = ParameterSet::new([
            Parameter::numeric("D", "").with_formula("{C} * 2"),
            Parameter::numeric("C", "").with_formula("{B} + 1"),
            Parameter::numeric("B", "").with_formula("{A} + 1"),
            Parameter::numeric("A", ""),
        ])
        .unwrap();
        let resolution = set.resolve(&raw(&[("A", "1")]));

        assert_eq!(resolution.number("B"), Some(2.0));
        assert_eq!(resolution.number("C"), Some(3.0));
        assert_eq!(resolution.number("D"), Some(6.0));
        assert!(resolution.passes() <= 3 + 1);
    }

    #[test]
    fn ignores_raw_input_for_formula_parameters() {
        let resolution = lipid().resolve(&raw(&[
            ("Total Cholesterol", "200"),
            ("HDL", "50"),
            ("LDL", "999"),
        ]));
        assert_eq!(resolution.number("LDL"), Some(130.0));

        let resolution = lipid().resolve(&raw(&[("LDL", "999")]));
        assert_eq!(resolution.get("LDL"), Some(&Value::Unresolved));
    }

    #[test]
    fn invalid_formula_is_local() {
        let set = ParameterSet::new([
            Parameter::numeric("A", ""),
            Parameter::numeric("Broken", "").with_formula("{A} +* 2"),
            Parameter::numeric("Fine", "").with_formula("{A} * 2"),
        ])
        .unwrap();
        let resolution = set.resolve(&raw(&[("A", "4")]));

        assert_eq!(resolution.get("Broken"), Some(&Value::Unresolved));
        assert_eq!(resolution.number("Fine"), Some(8.0));
        assert!(matches!(
            resolution.issues(),
            [Issue::InvalidExpression { parameter, .. }] if parameter == "Broken"
        ));
    }

    #[test]
    fn division_by_zero_is_unresolved_not_zero() {
        let set = ParameterSet::new([
            Parameter::numeric("A", ""),
            Parameter::numeric("B", ""),
            Parameter::numeric("Ratio", "").with_formula("{A} / {B}"),
            Parameter::numeric("Scaled", "").with_formula("{Ratio} * 10"),
        ])
        .unwrap();
        let resolution = set.resolve(&raw(&[("A", "1"), ("B", "0")]));

        assert_eq!(resolution.get("Ratio"), Some(&Value::Unresolved));
        assert_eq!(resolution.get("Scaled"), Some(&Value::Unresolved));
        assert_eq!(
            resolution.issues(),
            &[
                Issue::NonFinite {
                    parameter: "Ratio".to_string(),
                    error: EvalError::DivisionByZero,
                },
                Issue::UnresolvedDependency {
                    parameter: "Scaled".to_string(),
                    missing: vec!["Ratio".to_string()],
                },
            ]
        );
    }

    #[test]
    fn circular_formulas_stay_unresolved() {
        let set = ParameterSet::new([
            Parameter::numeric("A", "").with_formula("{B} + 1"),
            Parameter::numeric("B", "").with_formula("{A} + 1"),
        ])
        .unwrap();
        let resolution = set.resolve(&RawValues::new());

        assert_eq!(resolution.get("A"), Some(&Value::Unresolved));
        assert_eq!(resolution.get("B"), Some(&Value::Unresolved));
        assert_eq!(resolution.passes(), 1);
        assert_eq!(resolution.issues().len(), 2);
    }

    #[test]
    fn non_numeric_input_is_reported() {
        let resolution = lipid().resolve(&raw(&[("Total Cholesterol", "high"), ("HDL", "50")]));
        assert_eq!(resolution.get("Total Cholesterol"), Some(&Value::Unresolved));
        assert_eq!(resolution.get("LDL"), Some(&Value::Unresolved));
        assert!(resolution.issues().contains(&Issue::InvalidInput {
            parameter: "Total Cholesterol".to_string(),
            input: "high".to_string(),
        }));
    }

    #[test]
    fn trims_operator_input() {
        let resolution = lipid().resolve(&raw(&[("Total Cholesterol", " 200 "), ("HDL", "\t50")]));
        assert_eq!(resolution.number("LDL"), Some(130.0));
    }

    #[test]
    fn rejects_duplicate_names() {
        let result = ParameterSet::new([Parameter::numeric("HDL", ""), Parameter::numeric("HDL", "")]);
        assert_eq!(result, Err(DuplicateParameter("HDL".to_string())));
    }

    #[test]
    fn every_parameter_has_an_entry() {
        let resolution = lipid().resolve(&RawValues::new());
        let names: Vec<_> = resolution.values().map(|(name, _)| name).collect();
        assert_eq!(names, ["HDL", "LDL", "Total Cholesterol"]);
    }
}
