//! Domain models for lab result computation.
//!
//! This module contains the template catalog data model, the formula
//! language, the dependency resolver, the range classifier, the draft session
//! that owns in-progress results, and the identifier allocator.

/// Test templates and their parameters.
pub mod catalog;
pub use catalog::{
    Bounds, Catalog, CatalogIssue, Parameter, ParameterKind, ReferenceRange, TestId, TestTemplate,
};

/// The constrained arithmetic language used by formula parameters.
pub mod formula;
pub use formula::{EvalError, Formula, FormulaError};

/// Fixpoint resolution of formula parameters.
pub mod resolver;
pub use resolver::{DuplicateParameter, Issue, ParameterSet, RawValues, Resolution, Value};

/// Reference-range classification.
pub mod classifier;
pub use classifier::{BandPolicy, Gender, ThreatLevel, Unclassifiable};

/// Caller-owned draft state for a report in progress.
pub mod draft;
pub use draft::{DraftError, DraftSession, FinalizedReport, ParameterKey, ResultEntry, SubmitError};

/// Human-facing sequential identifiers.
pub mod identifier;
pub use identifier::{
    FormatPolicy, Identifier, IdentifierError, IdentifierKind, Prefix, ProvisionalIdentifier,
    Scope,
};

/// Atomic identifier allocation with bounded retries.
pub mod allocator;
pub use allocator::{AllocationError, Allocator};

mod config;
pub use config::Config;
