//! The in-progress state of one report.
//!
//! A [`DraftSession`] is owned by its caller. It holds snapshots of the
//! selected test templates, the operator's raw input and the most recent
//! computed results. Every mutation recomputes the whole draft, so
//! [`DraftSession::entries`] always reflects the current input.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    domain::{
        AllocationError, Allocator, BandPolicy, Catalog, FormatPolicy, Gender, Identifier,
        IdentifierKind, Issue, ParameterKind, ParameterSet, RawValues, Scope, TestId,
        TestTemplate, ThreatLevel, Value,
    },
    storage::CounterStore,
};

/// Addresses one parameter of one selected test.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ParameterKey {
    /// The test the parameter belongs to.
    pub test: TestId,
    /// Position of the parameter in the test template.
    pub index: usize,
}

impl ParameterKey {
    /// Creates a key.
    #[must_use]
    pub fn new(test: impl Into<TestId>, index: usize) -> Self {
        Self {
            test: test.into(),
            index,
        }
    }
}

/// The computed state of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    /// Which parameter this is.
    pub key: ParameterKey,
    /// Parameter name.
    pub name: String,
    /// Unit of measurement.
    pub unit: String,
    /// Numeric or text.
    pub kind: ParameterKind,
    /// What the operator typed, if anything.
    pub raw_value: Option<String>,
    /// The resolved value.
    pub value: Value,
    /// The classification, or `None` if the subject's gender selects no
    /// range.
    pub threat_level: Option<ThreatLevel>,
}

/// A rejected edit to a draft.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    /// The test is already part of the draft.
    #[error("test '{0}' is already selected")]
    AlreadySelected(TestId),

    /// Two selected tests declare the same parameter name.
    #[error("parameter '{0}' is declared by more than one selected test")]
    DuplicateParameter(String),

    /// The test is not part of the draft.
    #[error("test '{0}' is not selected")]
    UnknownTest(TestId),

    /// No parameter at this position.
    #[error("test '{}' has no parameter at position {}", .0.test, .0.index)]
    UnknownParameter(ParameterKey),

    /// Formula parameters are computed, not entered.
    #[error("'{0}' is computed by a formula and cannot be edited")]
    FormulaNotEditable(String),
}

/// A draft that cannot be finalized.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Nothing is selected.
    #[error("the draft has no tests")]
    Empty,

    /// Some parameters could not be classified for the subject's gender.
    #[error("cannot classify {} for gender '{gender}'", parameters.join(", "))]
    Unclassifiable {
        /// The subject's gender.
        gender: Gender,
        /// Names of the affected parameters.
        parameters: Vec<String>,
    },

    /// No report identifier could be issued.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Mutable state of one report being entered.
#[derive(Debug, Clone)]
pub struct DraftSession {
    id: Uuid,
    gender: Gender,
    policy: BandPolicy,
    tests: Vec<TestTemplate>,
    raw: BTreeMap<ParameterKey, String>,
    parameters: ParameterSet,
    entries: Vec<ResultEntry>,
    issues: Vec<Issue>,
}

impl DraftSession {
    /// Starts an empty draft.
    #[must_use]
    pub fn new(gender: Gender, policy: BandPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            gender,
            policy,
            tests: Vec::new(),
            raw: BTreeMap::new(),
            parameters: ParameterSet::default(),
            entries: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// The session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The subject's gender.
    #[must_use]
    pub const fn gender(&self) -> Gender {
        self.gender
    }

    /// The selected tests, in selection order.
    #[must_use]
    pub fn tests(&self) -> &[TestTemplate] {
        &self.tests
    }

    /// Current results, in selection then template order.
    #[must_use]
    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    /// Problems found by the last computation.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Adds a test to the draft.
    ///
    /// # Errors
    ///
    /// Fails if the test is already selected or declares a parameter name
    /// that another selected test also declares.
    pub fn select_test(&mut self, template: TestTemplate) -> Result<(), DraftError> {
        if self.position(&template.id).is_some() {
            return Err(DraftError::AlreadySelected(template.id));
        }
        let mut tests = self.tests.clone();
        tests.push(template);
        self.replace_tests(tests)?;
        self.recompute();
        Ok(())
    }

    /// Removes a test and its raw values from the draft.
    ///
    /// # Errors
    ///
    /// Fails if the test is not selected.
    pub fn deselect_test(&mut self, id: &TestId) -> Result<TestTemplate, DraftError> {
        let position = self
            .position(id)
            .ok_or_else(|| DraftError::UnknownTest(id.clone()))?;
        let mut tests = self.tests.clone();
        let removed = tests.remove(position);
        self.replace_tests(tests)?;
        self.raw.retain(|key, _| &key.test != id);
        self.recompute();
        Ok(removed)
    }

    /// Records operator input for a parameter.
    ///
    /// # Errors
    ///
    /// Fails for unknown keys and for formula parameters.
    pub fn set_raw(
        &mut self,
        key: ParameterKey,
        value: impl Into<String>,
    ) -> Result<(), DraftError> {
        self.editable(&key)?;
        self.raw.insert(key, value.into());
        self.recompute();
        Ok(())
    }

    /// Removes operator input for a parameter, returning what was there.
    ///
    /// # Errors
    ///
    /// Fails for unknown keys and for formula parameters.
    pub fn clear_raw(&mut self, key: &ParameterKey) -> Result<Option<String>, DraftError> {
        self.editable(key)?;
        let previous = self.raw.remove(key);
        self.recompute();
        Ok(previous)
    }

    /// Changes the subject's gender and reclassifies.
    pub fn set_gender(&mut self, gender: Gender) {
        self.gender = gender;
        self.recompute();
    }

    /// Re-runs resolution and classification over the whole draft.
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn recompute(&mut self) {
        let raw: RawValues = self
            .raw
            .iter()
            .filter_map(|(key, value)| {
                self.parameter(key)
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();
        let resolution = self.parameters.resolve(&raw);

        self.entries = self
            .tests
            .iter()
            .flat_map(|test| {
                test.parameters
                    .iter()
                    .enumerate()
                    .map(move |(index, parameter)| (test, index, parameter))
            })
            .map(|(test, index, parameter)| {
                let key = ParameterKey::new(test.id.clone(), index);
                let value = resolution
                    .get(&parameter.name)
                    .cloned()
                    .unwrap_or_default();
                let threat_level = self
                    .policy
                    .classify_parameter(parameter, &value, self.gender)
                    .ok();
                ResultEntry {
                    raw_value: self.raw.get(&key).cloned(),
                    key,
                    name: parameter.name.clone(),
                    unit: parameter.unit.clone(),
                    kind: parameter.kind,
                    value,
                    threat_level,
                }
            })
            .collect();
        self.issues = resolution.issues().to_vec();
    }

    /// Refreshes the selected tests from a changed catalog.
    ///
    /// Tests that are no longer in the catalog are dropped and returned. Raw
    /// values that no longer address an editable parameter are discarded.
    ///
    /// # Errors
    ///
    /// Fails, leaving the draft untouched, if the refreshed tests declare a
    /// parameter name twice.
    pub fn on_catalog_changed(&mut self, catalog: &Catalog) -> Result<Vec<TestId>, DraftError> {
        let mut removed = Vec::new();
        let tests: Vec<TestTemplate> = self
            .tests
            .iter()
            .filter_map(|test| {
                let refreshed = catalog.get(&test.id).cloned();
                if refreshed.is_none() {
                    tracing::warn!(test = %test.id, "test removed from catalog, dropping it");
                    removed.push(test.id.clone());
                }
                refreshed
            })
            .collect();

        self.replace_tests(tests)?;
        let tests = &self.tests;
        self.raw.retain(|key, _| {
            tests
                .iter()
                .find(|test| test.id == key.test)
                .and_then(|test| test.parameters.get(key.index))
                .is_some_and(|parameter| !parameter.is_formula())
        });
        self.recompute();
        Ok(removed)
    }

    /// Finalizes the draft.
    ///
    /// Allocates exactly one report identifier. If allocation fails nothing
    /// is produced and the draft can be submitted again.
    ///
    /// # Errors
    ///
    /// Fails if the draft is empty, if any parameter is unclassifiable, or if
    /// no identifier could be allocated.
    #[instrument(skip(self, allocator, policy), fields(session = %self.id, scope = %scope))]
    pub fn submit<S: CounterStore>(
        &self,
        allocator: &Allocator<S>,
        scope: &Scope,
        policy: &FormatPolicy,
    ) -> Result<FinalizedReport, SubmitError> {
        if self.tests.is_empty() {
            return Err(SubmitError::Empty);
        }
        let unclassifiable: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.threat_level.is_none())
            .map(|entry| entry.name.clone())
            .collect();
        if !unclassifiable.is_empty() {
            return Err(SubmitError::Unclassifiable {
                gender: self.gender,
                parameters: unclassifiable,
            });
        }

        let report_id = allocator.allocate(scope, IdentifierKind::Report, policy)?;

        let tests = self
            .tests
            .iter()
            .map(|test| FinalizedTest {
                test_id: test.id.clone(),
                name: test.name.clone(),
                rows: self
                    .entries
                    .iter()
                    .filter(|entry| entry.key.test == test.id)
                    .map(|entry| ReportRow {
                        parameter_name: entry.name.clone(),
                        unit: entry.unit.clone(),
                        value: entry.value.clone(),
                        threat_level: entry.threat_level.unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect();

        tracing::info!(report = %report_id, "draft finalized");
        Ok(FinalizedReport {
            report_id,
            session: self.id,
            gender: self.gender,
            finalized_at: Utc::now(),
            tests,
        })
    }

    fn position(&self, id: &TestId) -> Option<usize> {
        self.tests.iter().position(|test| &test.id == id)
    }

    fn parameter(&self, key: &ParameterKey) -> Option<&str> {
        self.tests
            .iter()
            .find(|test| test.id == key.test)
            .and_then(|test| test.parameters.get(key.index))
            .map(|parameter| parameter.name.as_str())
    }

    fn editable(&self, key: &ParameterKey) -> Result<(), DraftError> {
        let parameter = self
            .tests
            .iter()
            .find(|test| test.id == key.test)
            .and_then(|test| test.parameters.get(key.index))
            .ok_or_else(|| DraftError::UnknownParameter(key.clone()))?;
        if parameter.is_formula() {
            return Err(DraftError::FormulaNotEditable(parameter.name.clone()));
        }
        Ok(())
    }

    fn replace_tests(&mut self, tests: Vec<TestTemplate>) -> Result<(), DraftError> {
        let parameters =
            ParameterSet::new(tests.iter().flat_map(|test| test.parameters.iter().cloned()))
                .map_err(|e| DraftError::DuplicateParameter(e.0))?;
        self.tests = tests;
        self.parameters = parameters;
        Ok(())
    }
}

/// A submitted report, ready for rendering.
///
/// Unresolved values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedReport {
    /// The allocated report identifier.
    pub report_id: Identifier,
    /// The draft session the report came from.
    pub session: Uuid,
    /// The subject's gender.
    pub gender: Gender,
    /// When the report was finalized.
    pub finalized_at: DateTime<Utc>,
    /// Results per test.
    pub tests: Vec<FinalizedTest>,
}

/// The results of one test in a finalized report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedTest {
    /// The test.
    pub test_id: TestId,
    /// Human-readable test name.
    pub name: String,
    /// One row per parameter, in template order.
    pub rows: Vec<ReportRow>,
}

/// One parameter of a finalized report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    /// Parameter name.
    pub parameter_name: String,
    /// Unit of measurement.
    pub unit: String,
    /// The resolved value.
    pub value: Value,
    /// The classification.
    pub threat_level: ThreatLevel,
}
