//! Transform stages: compile one source format into another.
//!
//! Each `[compile.<name>]` table becomes one [`Transform`]. Inputs are globs
//! relative to the source directory; the output is either fixed (one
//! invocation for all inputs) or pattern-derived (one invocation per input):
//!
//! ```text
//! [compile.typescript]  output = "compiled/interface.js"
//!     src/js/api.ts + src/js/ui.ts  →  tmp/compiled/interface.js
//!
//! [compile.less]        output_dir = "compiled", extension = "css"
//!     src/css/site.less             →  tmp/compiled/site.css
//!     src/css/print.less            →  tmp/compiled/print.css
//! ```
//!
//! Transforms never read each other's outputs, so the pipeline runs
//! consecutive transforms in parallel.

use crate::config::TransformConfig;
use crate::files::{self, FilesError};
use crate::layout::Layout;
use crate::toolchain::{Invocation, ToolError, Toolchain};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Files(#[from] FilesError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("Transform `{stage}` failed running `{program}`:\n{diagnostics}")]
    Failed {
        stage: String,
        program: String,
        diagnostics: String,
    },
    #[error("Transform `{stage}` succeeded but did not write {path}")]
    MissingOutput { stage: String, path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputForm {
    Fixed(PathBuf),
    Pattern { dir: PathBuf, extension: String },
}

/// One configured compile step, resolved against the project layout.
#[derive(Debug, Clone)]
pub struct Transform {
    pub name: String,
    inputs: Vec<String>,
    patterns: Vec<glob::Pattern>,
    command: Vec<String>,
    source_dir: PathBuf,
    workdir: PathBuf,
    output: OutputForm,
}

/// Files a transform wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    pub inputs: usize,
    pub written: Vec<PathBuf>,
}

impl TransformOutcome {
    /// Nothing matched the input globs.
    pub fn skipped(&self) -> bool {
        self.inputs == 0
    }
}

impl Transform {
    pub fn new(name: &str, config: &TransformConfig, layout: &Layout) -> Result<Self, TransformError> {
        let staging = layout.staging_dir();
        let output = match (&config.output, &config.output_dir) {
            (Some(fixed), _) => OutputForm::Fixed(staging.join(fixed)),
            (None, dir) => OutputForm::Pattern {
                dir: staging.join(dir.as_deref().unwrap_or_default()),
                extension: config.extension.clone().unwrap_or_default(),
            },
        };
        Ok(Self {
            name: name.to_string(),
            inputs: config.inputs.clone(),
            patterns: files::compile_patterns(&config.inputs)?,
            command: config.command.clone(),
            source_dir: layout.source_dir().to_path_buf(),
            workdir: layout.root().to_path_buf(),
            output,
        })
    }

    /// Input files, sorted and deduplicated.
    pub fn discover_inputs(&self) -> Result<Vec<PathBuf>, TransformError> {
        Ok(files::discover_files(&self.source_dir, &self.inputs)?)
    }

    /// Compiled location of a source this transform owns.
    ///
    /// `source_ref` is relative to the source directory, as written in HTML.
    /// Returns `None` when no input glob selects it.
    pub fn output_for(&self, source_ref: &Path) -> Option<PathBuf> {
        files::matches_any(source_ref, &self.patterns).then(|| self.output_path(source_ref))
    }

    fn output_path(&self, input: &Path) -> PathBuf {
        match &self.output {
            OutputForm::Fixed(path) => path.clone(),
            OutputForm::Pattern { dir, extension } => {
                let stem = input.file_stem().unwrap_or(input.as_os_str());
                let mut file_name = stem.to_os_string();
                file_name.push(".");
                file_name.push(extension);
                dir.join(file_name)
            }
        }
    }

    /// The invocations that would compile `inputs`.
    pub fn plan(&self, inputs: &[PathBuf]) -> Vec<Invocation> {
        if inputs.is_empty() {
            return Vec::new();
        }
        match &self.output {
            OutputForm::Fixed(path) => vec![Invocation::new(
                &self.name,
                &self.command,
                &self.workdir,
                inputs.to_vec(),
                Some(path.clone()),
            )],
            OutputForm::Pattern { .. } => inputs
                .iter()
                .map(|input| {
                    Invocation::new(
                        &self.name,
                        &self.command,
                        &self.workdir,
                        vec![input.clone()],
                        Some(self.output_path(input)),
                    )
                })
                .collect(),
        }
    }

    /// Compile every input through `toolchain`.
    ///
    /// The first failing invocation aborts the transform. No input match is
    /// not an error: the transform is skipped and reports zero inputs.
    pub fn run(&self, toolchain: &dyn Toolchain) -> Result<TransformOutcome, TransformError> {
        let inputs = self.discover_inputs()?;
        if inputs.is_empty() {
            tracing::warn!(stage = %self.name, patterns = ?self.inputs, "no inputs matched, skipping");
            return Ok(TransformOutcome::default());
        }

        let mut written = Vec::new();
        for invocation in self.plan(&inputs) {
            if let Some(parent) = invocation.output.as_deref().and_then(Path::parent) {
                std::fs::create_dir_all(parent).map_err(|source| FilesError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }

            let result = toolchain.run(&invocation)?;
            if !result.success {
                return Err(TransformError::Failed {
                    stage: self.name.clone(),
                    program: invocation.program().to_string(),
                    diagnostics: result.diagnostics().to_string(),
                });
            }
            if let Some(output) = invocation.output {
                if !output.is_file() {
                    return Err(TransformError::MissingOutput {
                        stage: self.name.clone(),
                        path: output,
                    });
                }
                tracing::debug!(stage = %self.name, output = %output.display(), "compiled");
                written.push(output);
            }
        }

        Ok(TransformOutcome {
            inputs: inputs.len(),
            written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildConfig, ProjectConfig};
    use crate::toolchain::tests::MockToolchain;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn stock(name: &str, root: &Path) -> Transform {
        let config = BuildConfig::default();
        let layout = Layout::new(root, &ProjectConfig::default());
        Transform::new(name, &config.compile[name], &layout).unwrap()
    }

    // =========================================================================
    // output_for tests
    // =========================================================================

    #[test]
    fn output_for_fixed_output() {
        let ts = stock("typescript", Path::new("/project"));
        assert_eq!(
            ts.output_for(Path::new("js/api.ts")),
            Some(PathBuf::from("/project/tmp/compiled/interface.js"))
        );
        assert_eq!(ts.output_for(Path::new("css/site.less")), None);
    }

    #[test]
    fn output_for_pattern_output() {
        let less = stock("less", Path::new("/project"));
        assert_eq!(
            less.output_for(Path::new("css/site.less")),
            Some(PathBuf::from("/project/tmp/compiled/site.css"))
        );
    }

    // =========================================================================
    // plan tests
    // =========================================================================

    #[test]
    fn invalid_input_glob_is_rejected_up_front() {
        let config = TransformConfig {
            inputs: vec!["js/[*.ts".to_string()],
            output: Some("compiled/x.js".to_string()),
            command: vec!["tsc".to_string()],
            ..TransformConfig::default()
        };
        let layout = Layout::new(Path::new("/project"), &ProjectConfig::default());
        assert!(matches!(
            Transform::new("typescript", &config, &layout),
            Err(TransformError::Files(FilesError::InvalidPattern { .. }))
        ));
    }

    #[test]
    fn fixed_output_plans_one_invocation() {
        let ts = stock("typescript", Path::new("/project"));
        let inputs = vec![
            PathBuf::from("/project/src/js/api.ts"),
            PathBuf::from("/project/src/js/ui.ts"),
        ];
        let plan = ts.plan(&inputs);
        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan[0].argv,
            vec![
                "tsc",
                "--sourceMap",
                "--outFile",
                "/project/tmp/compiled/interface.js",
                "/project/src/js/api.ts",
                "/project/src/js/ui.ts",
            ]
        );
    }

    #[test]
    fn pattern_output_plans_one_invocation_per_input() {
        let less = stock("less", Path::new("/project"));
        let inputs = vec![
            PathBuf::from("/project/src/css/print.less"),
            PathBuf::from("/project/src/css/site.less"),
        ];
        let outputs: Vec<_> = less
            .plan(&inputs)
            .into_iter()
            .map(|i| i.output.unwrap())
            .collect();
        assert_eq!(
            outputs,
            vec![
                PathBuf::from("/project/tmp/compiled/print.css"),
                PathBuf::from("/project/tmp/compiled/site.css"),
            ]
        );
    }

    // =========================================================================
    // run tests
    // =========================================================================

    #[test]
    fn run_writes_declared_outputs() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "src/css/site.less", "body {}");
        touch(tmp.path(), "src/css/print.less", "@media print {}");
        let mock = MockToolchain::new();

        let outcome = stock("less", tmp.path()).run(&mock).unwrap();
        assert_eq!(outcome.inputs, 2);
        assert_eq!(outcome.written.len(), 2);
        assert_eq!(
            fs::read_to_string(tmp.path().join("tmp/compiled/site.css")).unwrap(),
            "body {}"
        );
        assert_eq!(mock.stages(), vec!["less", "less"]);
    }

    #[test]
    fn run_without_inputs_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let mock = MockToolchain::new();
        let outcome = stock("typescript", tmp.path()).run(&mock).unwrap();
        assert!(outcome.skipped());
        assert!(mock.get_invocations().is_empty());
    }

    #[test]
    fn run_failure_carries_diagnostics() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "src/js/api.ts", "let x: number = 'a';");
        let mock = MockToolchain::failing("typescript");

        let err = stock("typescript", tmp.path()).run(&mock).unwrap_err();
        match err {
            TransformError::Failed {
                stage,
                program,
                diagnostics,
            } => {
                assert_eq!(stage, "typescript");
                assert_eq!(program, "tsc");
                assert!(diagnostics.contains("mock failure"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn run_missing_output_is_error() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "src/js/api.ts", "");
        let mock = MockToolchain::silent("typescript");
        let err = stock("typescript", tmp.path()).run(&mock).unwrap_err();
        assert!(matches!(err, TransformError::MissingOutput { .. }));
    }
}
