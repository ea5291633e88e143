//! Computation core for lab reports
//!
//! Resolves formula-derived test parameters, classifies results against
//! gender-specific reference ranges, and allocates collision-free sequential
//! identifiers for patients, samples, reports, invoices and prescriptions.

pub mod domain;
pub use domain::{
    Allocator, BandPolicy, Catalog, Config, DraftSession, FinalizedReport, Formula, Gender,
    Identifier, IdentifierKind, Parameter, ParameterSet, Resolution, ResultEntry, Scope,
    TestTemplate, ThreatLevel, Value,
};

/// Filesystem storage for configuration, catalogs and counters.
pub mod storage;
pub use storage::{CounterStore, DirectoryCounterStore, LabDirectory, MemoryCounterStore};
