//! A filesystem backed lab workspace.
//!
//! A workspace keeps everything under a `.lab` directory:
//!
//! ```text
//! .lab/
//! ├── config.toml
//! ├── catalog/     test templates, one YAML document per file
//! └── counters/    identifier counters, see [`DirectoryCounterStore`]
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{
    domain::{Allocator, Catalog, Config},
    storage::{CatalogLoadError, DirectoryCounterStore, load_catalog},
};

const LAB_DIR: &str = ".lab";
const CONFIG_FILE: &str = "config.toml";
const CATALOG_DIR: &str = "catalog";
const COUNTERS_DIR: &str = "counters";

const EXAMPLE_TEMPLATE: &str = r"id: LIPID
name: Lipid Profile
parameters:
  - name: Total Cholesterol
    unit: mg/dL
    range:
      male: { min: 0, max: 200 }
      female: { min: 0, max: 200 }
  - name: HDL
    unit: mg/dL
    range:
      male: { min: 40, max: 60 }
      female: { min: 50, max: 60 }
  - name: Triglycerides
    unit: mg/dL
    range:
      male: { min: 0, max: 150 }
      female: { min: 0, max: 150 }
  - name: LDL
    unit: mg/dL
    formula: '{Total Cholesterol} - {HDL} - {Triglycerides} / 5'
    range:
      male: { min: 0, max: 100 }
      female: { min: 0, max: 100 }
  - name: Remarks
    kind: text
";

/// A lab workspace on disk: configuration, catalog and counters.
#[derive(Debug)]
pub struct LabDirectory {
    root: PathBuf,
    config: Config,
    catalog: Catalog,
}

/// Errors from [`LabDirectory::init`].
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The workspace already exists.
    #[error("workspace already initialized (found {})", .0.display())]
    AlreadyInitialized(PathBuf),

    /// A file or directory could not be created.
    #[error("failed to create {}: {source}", path.display())]
    Io {
        /// What was being created.
        path: PathBuf,
        /// The underlying failure.
        source: io::Error,
    },

    /// The default configuration could not be written.
    #[error("{0}")]
    Config(String),
}

impl LabDirectory {
    /// Opens the workspace rooted at `root`.
    ///
    /// A missing or invalid configuration file falls back to the default
    /// configuration. A missing catalog directory is an empty catalog.
    ///
    /// # Errors
    ///
    /// Fails if a catalog template cannot be read or parsed.
    pub fn open(root: PathBuf) -> Result<Self, CatalogLoadError> {
        let config = load_config(&root);
        let catalog = load_catalog(&catalog_dir(&root))?;
        tracing::debug!(
            "Opened workspace at {} with {} tests",
            root.display(),
            catalog.len()
        );
        Ok(Self {
            root,
            config,
            catalog,
        })
    }

    /// Creates a new workspace with the default configuration and an
    /// example template.
    ///
    /// # Errors
    ///
    /// Fails if `.lab` already exists or cannot be created.
    pub fn init(root: &Path) -> Result<(), InitError> {
        let lab_dir = root.join(LAB_DIR);
        if lab_dir.exists() {
            return Err(InitError::AlreadyInitialized(lab_dir));
        }

        for dir in [catalog_dir(root), counters_dir(root)] {
            fs::create_dir_all(&dir).map_err(|source| InitError::Io { path: dir, source })?;
        }

        Config::default()
            .save(&lab_dir.join(CONFIG_FILE))
            .map_err(InitError::Config)?;

        let example = catalog_dir(root).join("lipid.yaml");
        fs::write(&example, EXAMPLE_TEMPLATE).map_err(|source| InitError::Io {
            path: example,
            source,
        })?;

        tracing::info!("Initialized workspace at {}", lab_dir.display());
        Ok(())
    }

    /// The workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The loaded template catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The durable counter store of this workspace.
    #[must_use]
    pub fn counter_store(&self) -> DirectoryCounterStore {
        DirectoryCounterStore::new(counters_dir(&self.root))
    }

    /// An allocator over this workspace's counters.
    #[must_use]
    pub fn allocator(&self) -> Allocator<DirectoryCounterStore> {
        Allocator::new(self.counter_store(), &self.config)
    }
}

fn catalog_dir(root: &Path) -> PathBuf {
    root.join(LAB_DIR).join(CATALOG_DIR)
}

fn counters_dir(root: &Path) -> PathBuf {
    root.join(LAB_DIR).join(COUNTERS_DIR)
}

fn load_config(root: &Path) -> Config {
    let path = root.join(LAB_DIR).join(CONFIG_FILE);
    Config::load(&path).unwrap_or_else(|e| {
        tracing::debug!("Failed to load config: {e}");
        Config::default()
    })
}
