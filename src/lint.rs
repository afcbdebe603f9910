//! Lint stage.
//!
//! Runs the configured linter once over every selected source. Whether a
//! failure stops the run is `lint.blocking`; the stage itself only reports.

use crate::config::LintConfig;
use crate::files::{self, FilesError};
use crate::toolchain::{Invocation, ToolError, Toolchain};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LintError {
    #[error(transparent)]
    Files(#[from] FilesError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("Lint failed on {files} file(s):\n{output}")]
    Failed { files: usize, output: String },
}

/// Files the linter would check: root-relative globs minus excluded paths.
pub fn select_sources(root: &Path, config: &LintConfig) -> Result<Vec<PathBuf>, LintError> {
    let files = files::discover_files(root, &config.sources)?;
    Ok(files
        .into_iter()
        .filter(|path| {
            let shown = path.strip_prefix(root).unwrap_or(path).to_string_lossy();
            !config.exclude.iter().any(|ex| shown.contains(ex.as_str()))
        })
        .collect())
}

/// Lint the selected sources. Returns the number of files checked.
pub fn run(root: &Path, config: &LintConfig, toolchain: &dyn Toolchain) -> Result<usize, LintError> {
    let sources = select_sources(root, config)?;
    if sources.is_empty() {
        tracing::info!("nothing to lint");
        return Ok(0);
    }

    let relative: Vec<PathBuf> = sources
        .iter()
        .map(|p| p.strip_prefix(root).unwrap_or(p).to_path_buf())
        .collect();
    let count = relative.len();
    let invocation = Invocation::new("lint", &config.command, root, relative, None);
    let result = toolchain.run(&invocation)?;
    if !result.success {
        return Err(LintError::Failed {
            files: count,
            output: result.diagnostics().to_string(),
        });
    }
    Ok(count)
}
