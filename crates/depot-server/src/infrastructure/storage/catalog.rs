//! Loads the permission catalog from a TOML file.
//!
//! ```toml
//! [[permission]]
//! service = "ASSET_SVR"
//! operation = "DOWNLOAD"
//! default = "allow"
//! ```
//!
//! The catalog is read once at startup and never changes while running.

use std::path::{Path, PathBuf};

use depot_core::protocol::services::{asset, ASSET};
use depot_core::{Attribute, Catalog, CatalogError, PermissionKey};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("I/O error reading catalog at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] CatalogError),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    permission: Vec<CatalogRecord>,
}

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    service: String,
    operation: String,
    #[serde(default)]
    default: Attribute,
}

/// Parses catalog TOML text.
///
/// # Errors
///
/// [`CatalogLoadError::Parse`] for bad TOML, [`CatalogLoadError::Invalid`]
/// for duplicate or blank entries.
pub fn parse_catalog(text: &str) -> Result<Catalog, CatalogLoadError> {
    let file: CatalogFile = toml::from_str(text)?;
    let records = file
        .permission
        .into_iter()
        .map(|r| (PermissionKey::new(r.service, r.operation), r.default));
    Ok(Catalog::from_records(records)?)
}

/// Reads and parses the catalog at `path`.  Unlike the config file, a
/// missing catalog is an error.
pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_catalog(&text)
}

/// The catalog used when no catalog file is configured: reading assets is
/// allowed, uploading needs an explicit allow.
pub fn builtin_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.insert(ASSET, asset::LIST, Attribute::Allow);
    catalog.insert(ASSET, asset::DOWNLOAD, Attribute::Allow);
    catalog.insert(ASSET, asset::UPLOAD, Attribute::Default);
    catalog
}
