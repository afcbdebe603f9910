//! The production path: prepare, concat, minify, usemin, products.
//!
//! ```text
//! prepare   src/index.html blocks → artifact plan + generated concat/minify configs
//! concat    compiled sources      → tmp/unminified/concat/app.js
//! minify    unminified artifact   → tmp/minified/app.js
//! usemin    src/*.html            → dist/*.html (production references)
//! products  staging artifacts     → dist/app.js, dist/app.min.js
//! ```
//!
//! ## Prepare
//!
//! The `usemin.prepare` documents define the artifacts: one per block, keyed
//! by kind and name. A block's sources are mapped to their compiled
//! locations through the transforms (see [`SourceMap`]). Declaring the same
//! artifact twice with different sources is an error.
//!
//! Prepare then generates one concat and one minify configuration per
//! artifact. Their `options` tables are where injection hooks run, so
//! decoration reaches both artifact kinds without concat knowing about it.
//!
//! ## Development
//!
//! [`develop`] rewrites the same documents into `tmp/dev/` with one reference
//! per compiled source instead.

use crate::blocks::{self, BuildBlock, MalformedBlockError, ReferenceResolver};
use crate::compose::{InjectionContext, InjectionRegistry};
use crate::concat::{self, ConcatError, ConcatOptions};
use crate::config::BuildConfig;
use crate::files::{self, FilesError};
use crate::layout::{self, ArtifactName, Layout};
use crate::toolchain::{Invocation, ToolError, Toolchain};
use crate::transform::Transform;
use crate::types::{BlockKind, Mode};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error(transparent)]
    Blocks(#[from] MalformedBlockError),
    #[error(transparent)]
    Files(#[from] FilesError),
    #[error(transparent)]
    Concat(#[from] ConcatError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("Cannot read document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Artifact `{artifact}` is declared in {first} and again in {second} with different sources")]
    ConflictingTarget {
        artifact: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Invalid minify options for `{artifact}`: missing `command`")]
    MinifyOptions { artifact: String },
    #[error("Minifying `{artifact}` failed running `{program}`:\n{diagnostics}")]
    MinifyFailed {
        artifact: String,
        program: String,
        diagnostics: String,
    },
    #[error("Minifier succeeded but did not write {0}")]
    MissingOutput(PathBuf),
}

// ============================================================================
// Source references
// ============================================================================

/// Maps references written in documents to compiled locations.
#[derive(Debug, Clone)]
pub struct SourceMap {
    source_dir: PathBuf,
    transforms: Vec<Transform>,
}

impl SourceMap {
    pub fn new(source_dir: &Path, transforms: Vec<Transform>) -> Self {
        Self {
            source_dir: source_dir.to_path_buf(),
            transforms,
        }
    }

    /// Where the source behind `reference` ends up after compilation.
    ///
    /// `document_dir` is the document's directory relative to the source
    /// dir. References no transform owns are used as they are.
    pub fn compiled_path(&self, document_dir: &Path, reference: &str) -> PathBuf {
        let source = normalize_ref(document_dir, reference);
        self.transforms
            .iter()
            .find_map(|t| t.output_for(&source))
            .unwrap_or_else(|| self.source_dir.join(&source))
    }
}

/// Resolve `reference` (as written in a document in `document_dir`) to a
/// path relative to the source dir. Query strings and fragments are dropped,
/// a leading `/` means the source dir.
pub fn normalize_ref(document_dir: &Path, reference: &str) -> PathBuf {
    let bare = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference);
    let (base, rest) = match bare.strip_prefix('/') {
        Some(rest) => (Path::new(""), rest),
        None => (document_dir, bare),
    };

    let joined = base.join(rest);
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in joined.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    parts.iter().collect()
}

/// Resolver for one document written to `out_dir`.
struct DocumentResolver<'a> {
    sources: &'a SourceMap,
    layout: &'a Layout,
    document_dir: PathBuf,
    out_dir: PathBuf,
}

impl ReferenceResolver for DocumentResolver<'_> {
    fn compiled_ref(&self, _block: &BuildBlock, source: &str) -> String {
        let compiled = self.sources.compiled_path(&self.document_dir, source);
        layout::relative_ref(&compiled, &self.out_dir)
    }

    fn artifact_ref(&self, block: &BuildBlock) -> String {
        let minified = self.layout.dist_minified(&block.artifact());
        layout::relative_ref(&minified, &self.out_dir)
    }
}

// ============================================================================
// Prepare
// ============================================================================

/// One artifact and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArtifact {
    pub name: ArtifactName,
    /// Document that declared it, relative to the source dir.
    pub document: PathBuf,
    /// References as written in the block.
    pub references: Vec<String>,
    /// Compiled locations, in block order, duplicates removed.
    pub inputs: Vec<PathBuf>,
}

/// A generated stage configuration for one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedStep {
    pub artifact: ArtifactName,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// The part of the configuration injection hooks may edit.
    pub options: toml::Table,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblePlan {
    pub artifacts: Vec<PlannedArtifact>,
    pub concat: Vec<GeneratedStep>,
    pub minify: Vec<GeneratedStep>,
}

/// What the assemble stage produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembleOutcome {
    pub artifacts: Vec<ArtifactName>,
    /// Rewritten documents in the distribution dir.
    pub documents: Vec<PathBuf>,
    /// Files placed under their distribution names.
    pub products: Vec<PathBuf>,
}

/// Everything the assemble and develop stages read.
pub struct Assembler<'a> {
    pub layout: &'a Layout,
    pub config: &'a BuildConfig,
    pub sources: &'a SourceMap,
    pub injections: &'a InjectionRegistry,
    /// Run facts handed to injection hooks; `stage` is set per step.
    pub context: InjectionContext<'a>,
}

fn read_document(path: &Path) -> Result<String, AssembleError> {
    fs::read_to_string(path).map_err(|source| AssembleError::Document {
        path: path.to_path_buf(),
        source,
    })
}

fn parent_or_empty(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

impl Assembler<'_> {
    /// Scan the prepare documents and generate concat and minify configs.
    pub fn prepare(&self) -> Result<AssemblePlan, AssembleError> {
        let mut plan = AssemblePlan::default();

        for document in &self.config.usemin.prepare {
            let document = PathBuf::from(document);
            let path = self.layout.source_dir().join(&document);
            let html = read_document(&path)?;
            let document_dir = parent_or_empty(&document);

            for block in blocks::scan_blocks(&path, &html)? {
                let name = block.artifact();
                let mut inputs: Vec<PathBuf> = Vec::new();
                for reference in &block.sources {
                    let compiled = self.sources.compiled_path(&document_dir, reference);
                    if !inputs.contains(&compiled) {
                        inputs.push(compiled);
                    }
                }

                if let Some(existing) = plan.artifacts.iter().find(|a| a.name == name) {
                    if existing.inputs != inputs {
                        return Err(AssembleError::ConflictingTarget {
                            artifact: name.file_name(),
                            first: existing.document.clone(),
                            second: document.clone(),
                        });
                    }
                    continue;
                }
                plan.artifacts.push(PlannedArtifact {
                    name,
                    document: document.clone(),
                    references: block.sources.clone(),
                    inputs,
                });
            }
        }

        for artifact in &plan.artifacts {
            let unminified = self.layout.unminified(&artifact.name);

            let mut options = ConcatOptions::base_table(&self.config.concat);
            self.injections.apply(
                &InjectionContext {
                    stage: "concat",
                    ..self.context
                },
                &mut options,
            );
            plan.concat.push(GeneratedStep {
                artifact: artifact.name.clone(),
                inputs: artifact.inputs.clone(),
                output: unminified.clone(),
                options,
            });

            let command = match artifact.name.kind {
                BlockKind::Script => &self.config.minify.js,
                BlockKind::Stylesheet => &self.config.minify.css,
            };
            let mut options = toml::Table::new();
            options.insert(
                "command".to_string(),
                toml::Value::Array(command.iter().cloned().map(toml::Value::String).collect()),
            );
            self.injections.apply(
                &InjectionContext {
                    stage: "minify",
                    ..self.context
                },
                &mut options,
            );
            plan.minify.push(GeneratedStep {
                artifact: artifact.name.clone(),
                inputs: vec![unminified],
                output: self.layout.minified(&artifact.name),
                options,
            });
        }

        tracing::debug!(artifacts = plan.artifacts.len(), "prepared");
        Ok(plan)
    }

    fn run_concat(&self, step: &GeneratedStep) -> Result<(), AssembleError> {
        let options = ConcatOptions::from_table(step.options.clone())?;
        let content = concat::concatenate(self.layout, &step.inputs, &options)?;
        files::write_file(&step.output, content)?;
        tracing::debug!(output = %step.output.display(), "concatenated");
        Ok(())
    }

    fn run_minify(&self, step: &GeneratedStep, toolchain: &dyn Toolchain) -> Result<(), AssembleError> {
        let command: Vec<String> = step
            .options
            .get("command")
            .and_then(toml::Value::as_array)
            .map(|args| {
                args.iter()
                    .filter_map(|a| a.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if command.is_empty() {
            return Err(AssembleError::MinifyOptions {
                artifact: step.artifact.file_name(),
            });
        }

        if let Some(parent) = step.output.parent() {
            fs::create_dir_all(parent).map_err(|source| FilesError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let invocation = Invocation::new(
            "minify",
            &command,
            self.layout.root(),
            step.inputs.clone(),
            Some(step.output.clone()),
        );
        let result = toolchain.run(&invocation)?;
        if !result.success {
            return Err(AssembleError::MinifyFailed {
                artifact: step.artifact.file_name(),
                program: invocation.program().to_string(),
                diagnostics: result.diagnostics().to_string(),
            });
        }
        if !step.output.is_file() {
            return Err(AssembleError::MissingOutput(step.output.clone()));
        }
        Ok(())
    }

    /// Rewrite every `usemin.documents` match for `mode` into `out_root`.
    fn rewrite_documents(
        &self,
        mode: Mode,
        out_root: &Path,
        planned: Option<&[PlannedArtifact]>,
    ) -> Result<Vec<PathBuf>, AssembleError> {
        let source_dir = self.layout.source_dir();
        let mut written = Vec::new();

        for path in files::discover_files(source_dir, &self.config.usemin.documents)? {
            let relative = path.strip_prefix(source_dir).unwrap_or(&path).to_path_buf();
            let out_path = out_root.join(&relative);
            let resolver = DocumentResolver {
                sources: self.sources,
                layout: self.layout,
                document_dir: parent_or_empty(&relative),
                out_dir: parent_or_empty(&out_path),
            };

            let html = read_document(&path)?;
            let rewritten = blocks::rewrite(&path, &html, mode, &resolver)?;
            if let Some(planned) = planned {
                for block in &rewritten.blocks {
                    let name = block.artifact();
                    if !planned.iter().any(|a| a.name == name) {
                        tracing::warn!(
                            document = %relative.display(),
                            artifact = %name,
                            "block names an artifact no prepare document declares"
                        );
                    }
                }
            }
            files::write_file(&out_path, rewritten.html)?;
            written.push(out_path);
        }
        Ok(written)
    }

    /// Run the whole production path.
    pub fn assemble(&self, toolchain: &dyn Toolchain) -> Result<AssembleOutcome, AssembleError> {
        let plan = self.prepare()?;

        for step in &plan.concat {
            self.run_concat(step)?;
        }
        for step in &plan.minify {
            self.run_minify(step, toolchain)?;
        }

        let documents = self.rewrite_documents(
            Mode::Production,
            self.layout.dist_dir(),
            Some(&plan.artifacts),
        )?;

        let mut products = Vec::new();
        for artifact in &plan.artifacts {
            let name = &artifact.name;
            for (from, to) in [
                (self.layout.unminified(name), self.layout.dist_artifact(name)),
                (self.layout.minified(name), self.layout.dist_minified(name)),
            ] {
                files::copy_file(&from, &to)?;
                products.push(to);
            }
        }

        Ok(AssembleOutcome {
            artifacts: plan.artifacts.into_iter().map(|a| a.name).collect(),
            documents,
            products,
        })
    }

    /// Rewrite documents for development into the staging `dev` dir.
    pub fn develop(&self) -> Result<Vec<PathBuf>, AssembleError> {
        self.rewrite_documents(Mode::Development, &self.layout.dev_dir(), None)
    }
}
