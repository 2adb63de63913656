//! Startup configuration loading.
//!
//! The receiver reads two trusted local files before it binds its listener:
//! the area table (a JSON object of area name to absolute base directory)
//! and the minisign public key. Either one missing or malformed is fatal.

use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use std::fs;
use std::io;
use thiserror::Error;

use crate::area::AreaTable;
use crate::artefact::signature::{PublicKey, SignatureError};

/// Errors arising from loading startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The file being read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The area table is not a JSON object of strings.
    #[error("invalid area table {path}: {source}")]
    AreaSyntax {
        /// The area table file.
        path: Utf8PathBuf,
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An area base directory is empty or relative.
    #[error("area {area} in {path} must map to an absolute directory, found {base:?}")]
    RelativeArea {
        /// The area table file.
        path: Utf8PathBuf,
        /// The offending area name.
        area: String,
        /// The configured base.
        base: String,
    },

    /// The public key file does not hold a minisign public key.
    #[error("invalid public key {path}: {source}")]
    PublicKey {
        /// The key file.
        path: Utf8PathBuf,
        /// The parse failure.
        #[source]
        source: SignatureError,
    },
}

impl AreaTable {
    /// Load the area table from the JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise
    /// the errors of [`AreaTable::from_json`].
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let table = Self::from_json(&text, path)?;
        info!("loaded {} areas from {path}", table.len());
        Ok(table)
    }

    /// Parse an area table from JSON text; `origin` names the source in
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AreaSyntax`] for anything other than an object
    /// of strings and [`ConfigError::RelativeArea`] when a base is empty or
    /// not absolute.
    pub fn from_json(text: &str, origin: &Utf8Path) -> Result<Self, ConfigError> {
        let table: Self = serde_json::from_str(text).map_err(|source| ConfigError::AreaSyntax {
            path: origin.to_owned(),
            source,
        })?;
        if let Some((area, base)) = table
            .iter()
            .find(|(_, base)| base.as_str().is_empty() || !base.is_absolute())
        {
            return Err(ConfigError::RelativeArea {
                path: origin.to_owned(),
                area: area.to_owned(),
                base: base.to_string(),
            });
        }
        Ok(table)
    }
}

/// Read and validate the minisign public key at `path`.
///
/// The raw file bytes are returned so each verification parses them afresh.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read and
/// [`ConfigError::PublicKey`] if it does not parse.
pub fn load_public_key(path: &Utf8Path) -> Result<Vec<u8>, ConfigError> {
    let material = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    let key = PublicKey::parse(&material).map_err(|source| ConfigError::PublicKey {
        path: path.to_owned(),
        source,
    })?;
    info!("trusting minisign key {} from {path}", key.key_id());
    Ok(material)
}
