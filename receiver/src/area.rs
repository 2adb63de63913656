//! Area table lookup and sandboxed target resolution.
//!
//! An area is an administrator-controlled base directory that deploys may
//! write beneath. Requests name an area and a project; [`AreaTable::resolve`]
//! turns that pair into an absolute path and refuses any result that does not
//! stay inside the area after canonicalization.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors arising from target path resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The requested area is not configured.
    #[error("unknown area alias: {area}")]
    UnknownArea {
        /// The rejected area name.
        area: String,
    },

    /// The project path leaves the area's base directory.
    #[error("project path escapes area base: {project}")]
    PathEscape {
        /// The offending project value.
        project: String,
    },

    /// The path could not be made absolute.
    #[error("failed to canonicalize {path}: {source}")]
    Canonicalize {
        /// The path being resolved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Mapping from area name to its absolute base directory.
///
/// Constructed once at startup and shared read-only by every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AreaTable {
    areas: BTreeMap<String, Utf8PathBuf>,
}

impl AreaTable {
    /// Build a table from `(name, base)` pairs.
    ///
    /// # Examples
    ///
    /// ```
    /// use deployhook_receiver::area::AreaTable;
    ///
    /// let table = AreaTable::new([("repos", "/srv/repos")]);
    /// assert_eq!(table.base("repos").map(|p| p.as_str()), Some("/srv/repos"));
    /// ```
    #[must_use]
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Utf8PathBuf>,
    {
        Self {
            areas: entries
                .into_iter()
                .map(|(name, base)| (name.into(), base.into()))
                .collect(),
        }
    }

    /// Return the base directory configured for `area`.
    #[must_use]
    pub fn base(&self, area: &str) -> Option<&Utf8Path> {
        self.areas.get(area).map(Utf8PathBuf::as_path)
    }

    /// Iterate over configured `(name, base)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Utf8Path)> {
        self.areas
            .iter()
            .map(|(name, base)| (name.as_str(), base.as_path()))
    }

    /// Return the number of configured areas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.areas.len()
    }

    /// Return true when no areas are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Resolve `project` beneath the base directory of `area`.
    ///
    /// Both the joined candidate and the base are canonicalized before the
    /// containment check, so `..` sequences, absolute overrides and symlinks
    /// inside the area cannot lead outside it.
    ///
    /// A project that names the base itself (`""`, `"."`, `"a/.."`) resolves
    /// to the base. Deploying to that path replaces the whole area, removing
    /// every other project beneath it.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownArea`] for an unconfigured area,
    /// [`ResolveError::PathEscape`] when the canonical candidate lies outside
    /// the canonical base, and [`ResolveError::Canonicalize`] when the current
    /// directory cannot be read to absolutize a path.
    pub fn resolve(&self, area: &str, project: &str) -> Result<PathBuf, ResolveError> {
        let base = self.base(area).ok_or_else(|| ResolveError::UnknownArea {
            area: area.to_owned(),
        })?;
        let candidate = base.as_std_path().join(project);

        let canonical_base = canonicalize_lenient(base.as_std_path())?;
        let canonical_candidate = canonicalize_lenient(&candidate)?;

        if !canonical_candidate.starts_with(&canonical_base) {
            return Err(ResolveError::PathEscape {
                project: project.to_owned(),
            });
        }
        Ok(canonical_candidate)
    }
}

/// Canonicalize a path that may not exist yet.
///
/// Existing prefixes are resolved through the filesystem (following
/// symlinks); the missing suffix is normalized lexically.
pub(crate) fn canonicalize_lenient(path: &Path) -> Result<PathBuf, ResolveError> {
    let absolute = std::path::absolute(path).map_err(|source| ResolveError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })?;

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => {
                resolved.push(part);
                if let Ok(real) = fs::canonicalize(&resolved) {
                    resolved = real;
                }
            }
        }
    }
    Ok(resolved)
}
