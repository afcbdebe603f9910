//! Package manifest loading.
//!
//! The manifest (`package.json` by default) is the single source of truth for
//! the project version. Only `name` and `version` are read; every other key
//! is ignored.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid manifest {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Manifest {path} has version `{version}`, which is not a semantic version")]
    InvalidVersion { path: PathBuf, version: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
}

impl PackageManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: PackageManifest =
            serde_json::from_str(&content).map_err(|source| ManifestError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        if !crate::version::is_version_literal(&manifest.version) {
            return Err(ManifestError::InvalidVersion {
                path: path.to_path_buf(),
                version: manifest.version,
            });
        }
        Ok(manifest)
    }
}
