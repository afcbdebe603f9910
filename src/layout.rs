//! Staging and distribution layout.
//!
//! Every path the pipeline writes is derived here, so the rewriter and the
//! placement stage can never disagree about where an artifact lives.
//!
//! ```text
//! tmp/                                  # project.staging_dir
//! ├── compiled/                         # transform outputs
//! ├── unminified/concat/app.js          # concat stage
//! ├── minified/app.js                   # minify stage
//! └── dev/index.html                    # development-mode documents
//! dist/                                 # project.dist_dir
//! ├── index.html                        # production-mode documents
//! ├── assets/…                          # copied verbatim
//! ├── app.js        app.css             # unminified, concatenated, decorated
//! └── app.min.js    app.min.css         # minified
//! ```
//!
//! ## Artifact names
//!
//! A build block names its target as `app`, `app.js`, or `js/app.js`. The
//! kind extension is stripped to get the artifact name (`app`, `js/app`);
//! the distribution files are then always `<name>.<ext>` and
//! `<name>.min.<ext>`.

use crate::config::ProjectConfig;
use crate::types::BlockKind;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// The name an artifact is published under, without extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactName {
    pub name: String,
    pub kind: BlockKind,
}

impl ArtifactName {
    /// Derive the artifact name from a block target.
    ///
    /// - `"app"` → `app`
    /// - `"app.js"` → `app`
    /// - `"app.min.js"` → `app`
    /// - `"js/app.js"` → `js/app`
    /// - `"app.css"` in a script block → `app.css` (extension doesn't match the kind)
    pub fn from_target(target: &str, kind: BlockKind) -> Self {
        let ext = format!(".{}", kind.extension());
        let stem = target.strip_suffix(&ext).unwrap_or(target);
        let stem = stem.strip_suffix(".min").unwrap_or(stem);
        Self {
            name: stem.to_string(),
            kind,
        }
    }

    /// `<name>.<ext>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.kind.extension())
    }

    /// `<name>.min.<ext>`
    pub fn minified_file_name(&self) -> String {
        format!("{}.min.{}", self.name, self.kind.extension())
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Absolute directories of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    source_dir: PathBuf,
    staging_dir: PathBuf,
    dist_dir: PathBuf,
}

impl Layout {
    pub fn new(root: &Path, project: &ProjectConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            source_dir: root.join(&project.source_dir),
            staging_dir: root.join(&project.staging_dir),
            dist_dir: root.join(&project.dist_dir),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn dist_dir(&self) -> &Path {
        &self.dist_dir
    }

    /// Where development-mode documents are written.
    pub fn dev_dir(&self) -> PathBuf {
        self.staging_dir.join("dev")
    }

    /// Concat stage output: `<staging>/unminified/concat/<name>.<ext>`.
    pub fn unminified(&self, artifact: &ArtifactName) -> PathBuf {
        self.staging_dir
            .join("unminified")
            .join("concat")
            .join(artifact.file_name())
    }

    /// Minify stage output: `<staging>/minified/<name>.<ext>`.
    pub fn minified(&self, artifact: &ArtifactName) -> PathBuf {
        self.staging_dir.join("minified").join(artifact.file_name())
    }

    /// Published unminified artifact: `<dist>/<name>.<ext>`.
    pub fn dist_artifact(&self, artifact: &ArtifactName) -> PathBuf {
        self.dist_dir.join(artifact.file_name())
    }

    /// Published minified artifact: `<dist>/<name>.min.<ext>`.
    pub fn dist_minified(&self, artifact: &ArtifactName) -> PathBuf {
        self.dist_dir.join(artifact.minified_file_name())
    }

    /// Path relative to the project root with `/` separators, for headers
    /// and CLI output.
    pub fn display(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        to_slash(relative)
    }
}

/// A reference from a document in `from_dir` to `target`, as written into HTML.
pub fn relative_ref(target: &Path, from_dir: &Path) -> String {
    match pathdiff::diff_paths(target, from_dir) {
        Some(relative) => to_slash(&relative),
        None => to_slash(target),
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            Component::CurDir => None,
            Component::RootDir | Component::Prefix(_) => Some(String::new()),
        })
        .collect::<Vec<_>>()
        .join("/")
}
