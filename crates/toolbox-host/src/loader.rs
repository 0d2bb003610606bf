//! Descriptor file discovery
//!
//! Walks a category directory and "imports" every descriptor manifest in it.
//! Files are read from disk on every call, so a reload always sees the
//! current contents.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::LoadError;

/// File extension of descriptor manifests
pub const MODULE_SUFFIX: &str = "toml";

/// Key of a wrapping default export
const DEFAULT_EXPORT: &str = "default";

/// One imported descriptor file
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// File name up to the first `.`
    pub identifier: String,
    pub path: PathBuf,
    pub value: toml::Table,
}

impl LoadedModule {
    /// Files whose identifier starts with `_` are disabled
    pub fn is_disabled(&self) -> bool {
        self.identifier.starts_with('_')
    }
}

/// Recursively import every manifest below `root`
///
/// Within a directory, files come before subdirectories and both are sorted
/// by name. The first file that cannot be read or parsed aborts the walk.
pub fn load_tree(root: &Path) -> Result<Vec<LoadedModule>, LoadError> {
    let mut modules = Vec::new();

    let walker = WalkDir::new(root).min_depth(1).sort_by(files_first);

    for entry in walker {
        let entry = entry.map_err(|source| LoadError::Walk {
            path: root.to_path_buf(),
            source,
        })?;

        if !entry.file_type().is_file() || !is_module(entry.path()) {
            continue;
        }

        modules.push(import(entry.path())?);
    }

    debug!(target: "loader", "Found {} module(s) in {}", modules.len(), root.display());
    Ok(modules)
}

/// Read and parse a single manifest, unwrapping a default export
pub fn import(path: &Path) -> Result<LoadedModule, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut value: toml::Table = toml::from_str(&content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(toml::Value::Table(inner)) = value.get(DEFAULT_EXPORT) {
        value = inner.clone();
    }

    Ok(LoadedModule {
        identifier: identifier(path),
        path: path.to_path_buf(),
        value,
    })
}

fn identifier(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split('.').next())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn is_module(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(MODULE_SUFFIX)
}

fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}
