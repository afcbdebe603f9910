//! Filesystem stages and helpers: input discovery, `clean`, and `copy`.
//!
//! ## Discovery
//!
//! Stage inputs are glob patterns resolved against a base directory. `*`
//! never crosses a path separator, so `*.*` selects only top-level files and
//! `js/*.ts` only the direct children of `js/`. Results are sorted and
//! deduplicated; directories never match.
//!
//! ## Copy
//!
//! ```text
//! src/index.html        →  dist/index.html      (copy.sources, top level only)
//! src/favicon.ico       →  dist/favicon.ico
//! src/assets/img/a.png  →  dist/assets/img/a.png (copy.assets, recursive)
//! ```

use crate::config::CopyConfig;
use crate::layout::Layout;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum FilesError {
    #[error("Invalid glob pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Refusing to remove `{0}`: not a path below the project root that spares the sources")]
    OutsideProject(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FilesError + '_ {
    move |source| FilesError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Files under `base_dir` matching any of `patterns`, sorted and deduplicated.
///
/// `base_dir` is matched literally; only `patterns` carry glob syntax.
pub fn discover_files(base_dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, FilesError> {
    let base = glob::Pattern::escape(&base_dir.to_string_lossy());
    let mut files = BTreeSet::new();
    for pattern in patterns {
        let full_pattern = Path::new(&base).join(pattern);
        let paths = glob::glob(&full_pattern.to_string_lossy()).map_err(|source| {
            FilesError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            }
        })?;
        for entry in paths {
            let path = entry.map_err(|e| FilesError::Io {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            if path.is_file() {
                files.insert(path);
            }
        }
    }
    Ok(files.into_iter().collect())
}

/// Compile glob patterns for [`matches_any`].
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>, FilesError> {
    patterns
        .iter()
        .map(|pattern| {
            glob::Pattern::new(pattern).map_err(|source| FilesError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Whether `relative` (a path relative to the pattern base) matches any pattern.
///
/// Uses the same separator rules as [`discover_files`].
pub fn matches_any(relative: &Path, patterns: &[glob::Pattern]) -> bool {
    let options = glob::MatchOptions {
        require_literal_separator: true,
        ..glob::MatchOptions::new()
    };
    patterns
        .iter()
        .any(|pattern| pattern.matches_path_with(relative, options))
}

/// Copy one file, creating the destination's parent directories.
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), FilesError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::copy(src, dst).map_err(io_error(src))?;
    Ok(())
}

/// Write `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: impl AsRef<[u8]>) -> Result<(), FilesError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::write(path, content).map_err(io_error(path))
}

/// Copy the tree under `src` into `dst`. Returns the number of files copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<usize, FilesError> {
    let mut copied = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|source| FilesError::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            copy_file(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Normalised form of a clean path, or `None` when removing it could touch
/// the project root, anything outside it, or one of the `protected` paths.
///
/// `protected` holds project-relative paths (the source dir, the manifest)
/// that must survive a clean together with all their ancestors.
pub fn clean_target(path: &str, protected: &[&str]) -> Option<PathBuf> {
    let mut target = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if target.as_os_str().is_empty() {
        return None;
    }
    let keeps_protected = protected.iter().all(|kept| {
        let kept: PathBuf = Path::new(kept)
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        !kept.starts_with(&target)
    });
    keeps_protected.then_some(target)
}

/// Remove each configured directory under `root`.
///
/// Every path is checked with [`clean_target`] before anything is removed.
/// A path that doesn't exist is skipped. Returns the paths that were removed.
pub fn clean(root: &Path, paths: &[String], protected: &[&str]) -> Result<Vec<PathBuf>, FilesError> {
    let targets = paths
        .iter()
        .map(|path| {
            clean_target(path, protected)
                .map(|relative| root.join(relative))
                .ok_or_else(|| FilesError::OutsideProject(path.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut removed = Vec::new();
    for target in targets {
        if target.is_dir() {
            fs::remove_dir_all(&target).map_err(io_error(&target))?;
        } else if target.exists() {
            fs::remove_file(&target).map_err(io_error(&target))?;
        } else {
            continue;
        }
        tracing::debug!(path = %target.display(), "removed");
        removed.push(target);
    }
    Ok(removed)
}

/// Result of the copy stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Top-level source files copied.
    pub files: usize,
    /// Files copied from the assets tree.
    pub assets: usize,
}

/// Copy top-level source files and the assets tree into the distribution dir.
pub fn copy_static(layout: &Layout, config: &CopyConfig) -> Result<CopyOutcome, FilesError> {
    let mut outcome = CopyOutcome::default();
    let dist = layout.dist_dir();
    fs::create_dir_all(dist).map_err(io_error(dist))?;

    for src in discover_files(layout.source_dir(), &config.sources)? {
        if let Some(name) = src.file_name() {
            copy_file(&src, &dist.join(name))?;
            outcome.files += 1;
        }
    }

    let assets = layout.source_dir().join(&config.assets);
    if assets.is_dir() {
        outcome.assets = copy_dir_recursive(&assets, &dist.join(&config.assets))?;
    } else {
        tracing::debug!(path = %assets.display(), "no assets directory");
    }
    Ok(outcome)
}
