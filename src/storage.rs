mod catalog;
pub mod counter;
mod counters;
pub mod directory;
mod memory;

pub use catalog::{CatalogLoadError, load_catalog};
pub use counter::{CounterKey, CounterStore, StoreError};
pub use counters::DirectoryCounterStore;
pub use directory::{InitError, LabDirectory};
pub use memory::MemoryCounterStore;
