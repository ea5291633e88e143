use std::{
    io,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::domain::{Catalog, TestTemplate};

/// Errors raised while loading a catalog directory.
#[derive(Debug, thiserror::Error)]
pub enum CatalogLoadError {
    /// A template file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The file.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// A template file is not a valid template.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        /// The file.
        path: PathBuf,
        /// The underlying error.
        source: serde_yaml::Error,
    },

    /// Two files declare the same test ID.
    #[error("test '{id}' is defined in both {} and {}", first.display(), second.display())]
    DuplicateTest {
        /// The repeated test ID.
        id: String,
        /// The file loaded first.
        first: PathBuf,
        /// The file that repeats it.
        second: PathBuf,
    },
}

/// Loads every `*.yaml` / `*.yml` template under `root`.
///
/// A missing directory is an empty catalog. Files are read in path order, so
/// the result does not depend on directory iteration order.
///
/// # Errors
///
/// Fails on the first unreadable or invalid file, or on a test ID defined in
/// two files.
pub fn load_catalog(root: &Path) -> Result<Catalog, CatalogLoadError> {
    let mut catalog = Catalog::new();
    let mut sources: Vec<(String, PathBuf)> = Vec::new();

    for path in collect_template_paths(root) {
        let content = std::fs::read_to_string(&path).map_err(|source| CatalogLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let template =
            TestTemplate::from_yaml(&content).map_err(|source| CatalogLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        if let Some((_, first)) = sources.iter().find(|(id, _)| id == template.id.as_str()) {
            return Err(CatalogLoadError::DuplicateTest {
                id: template.id.to_string(),
                first: first.clone(),
                second: path,
            });
        }
        tracing::debug!("Loaded template {} from {}", template.id, path.display());
        sources.push((template.id.to_string(), path));
        catalog.insert(template);
    }

    Ok(catalog)
}

fn collect_template_paths(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Skipping unreadable catalog entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        })
        .collect();
    paths.sort();
    paths
}
