//! Task execution.
//!
//! A [`BuildContext`] is everything a run needs, loaded once up front: the
//! composed config, the package manifest, the stage registry, and the
//! injection hooks. Nothing is re-read or mutated while stages run.
//!
//! ```text
//! full = [version, clean, lint, compile, copy, assemble]
//!
//!   version → clean → lint → [typescript ∥ less] → copy → assemble
//! ```
//!
//! Groups run in order. A group of consecutive transforms runs in parallel on
//! a rayon pool capped by `project.max_processes`; every other stage runs on
//! its own. The first failing stage aborts the run. Partial output is left
//! where it is.
//!
//! Progress is reported through an optional channel of [`PipelineEvent`]s so
//! the caller decides how to show it (see [`crate::output`]).

use crate::assemble::{AssembleError, AssembleOutcome, Assembler, PlannedArtifact, SourceMap};
use crate::blocks::{self, MalformedBlockError};
use crate::compose::{InjectionContext, InjectionRegistry};
use crate::concat::decoration_hook;
use crate::config::{self, BuildConfig, ConfigError, LoadedConfig};
use crate::files::{self, CopyOutcome, FilesError};
use crate::layout::Layout;
use crate::lint::{self, LintError};
use crate::manifest::{ManifestError, PackageManifest};
use crate::registry::{Stage, StageRegistry, StageWork};
use crate::toolchain::Toolchain;
use crate::transform::{TransformError, TransformOutcome};
use crate::version::{self, PropagationOutcome, VersionError, VersionRule};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Lint(#[from] LintError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Files(#[from] FilesError),
    #[error(transparent)]
    Blocks(#[from] MalformedBlockError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error("Cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// What one stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Version(Vec<PropagationOutcome>),
    Clean(Vec<PathBuf>),
    /// `failure` holds the linter output of a non-blocking failure.
    Lint { files: usize, failure: Option<String> },
    Transform(TransformOutcome),
    Copy(CopyOutcome),
    Assemble(AssembleOutcome),
    Develop(Vec<PathBuf>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

/// Result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub task: String,
    pub stages: Vec<StageReport>,
    /// Linter output of advisory (non-blocking) lint failures.
    pub lint_failures: Vec<String>,
}

/// Progress of a run, in execution order per group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    TaskStarted { task: String, stages: Vec<String> },
    GroupStarted { stages: Vec<String> },
    StageFinished(StageReport),
}

fn emit(events: Option<&Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        // A dropped receiver only means nobody is watching.
        tx.send(event).ok();
    }
}

/// Everything loaded before a run starts.
pub struct BuildContext {
    pub layout: Layout,
    pub loaded: LoadedConfig,
    pub manifest: PackageManifest,
    pub registry: StageRegistry,
    pub injections: InjectionRegistry,
    pub sources: SourceMap,
    /// `YYYY-MM-DD`, shown in the banner.
    pub build_date: String,
}

impl BuildContext {
    /// Compose the config, read the manifest, build the stage registry, and
    /// attach the stock injection hooks. Every configuration error surfaces
    /// here.
    pub fn load(
        root: &Path,
        config_path: Option<&Path>,
        assignments: &[String],
    ) -> Result<Self, PipelineError> {
        let loaded = config::load_config(root, config_path, assignments)?;
        let layout = Layout::new(root, &loaded.config.project);
        let manifest = PackageManifest::load(&root.join(&loaded.config.project.manifest))?;
        let registry = StageRegistry::from_config(&loaded.config, &layout)?;

        let mut injections = InjectionRegistry::for_tree(&loaded.tree);
        let decoration = &loaded.config.concat.decoration;
        if decoration.enabled {
            injections.register("concat", decoration_hook(decoration.clone()))?;
        }

        let sources = SourceMap::new(layout.source_dir(), registry.transforms().cloned().collect());
        tracing::debug!(
            package = %manifest.name,
            version = %manifest.version,
            stages = registry.stages().count(),
            "build context loaded"
        );

        Ok(Self {
            layout,
            loaded,
            manifest,
            registry,
            injections,
            sources,
            build_date: chrono::Local::now().format("%Y-%m-%d").to_string(),
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.loaded.config
    }

    fn assembler(&self) -> Assembler<'_> {
        Assembler {
            layout: &self.layout,
            config: self.config(),
            sources: &self.sources,
            injections: &self.injections,
            context: InjectionContext {
                stage: "assemble",
                package_name: &self.manifest.name,
                version: &self.manifest.version,
                build_date: &self.build_date,
            },
        }
    }

    fn run_stage(&self, stage: &Stage, toolchain: &dyn Toolchain) -> Result<StageOutcome, PipelineError> {
        let config = self.config();
        let root = self.layout.root();
        tracing::info!(stage = %stage.name, "running");

        let outcome = match &stage.work {
            StageWork::Version => {
                let rules = VersionRule::from_targets(root, &config.version.targets)?;
                StageOutcome::Version(version::propagate(&self.manifest.version, &rules)?)
            }
            StageWork::Clean => {
                let protected = [config.project.source_dir.as_str(), config.project.manifest.as_str()];
                StageOutcome::Clean(files::clean(root, &config.clean.paths, &protected)?)
            }
            StageWork::Lint => match lint::run(root, &config.lint, toolchain) {
                Ok(files) => StageOutcome::Lint { files, failure: None },
                Err(LintError::Failed { files, output }) if !config.lint.blocking => {
                    tracing::warn!(files, "lint failed (advisory)");
                    StageOutcome::Lint {
                        files,
                        failure: Some(output),
                    }
                }
                Err(e) => return Err(e.into()),
            },
            StageWork::Transform(transform) => StageOutcome::Transform(transform.run(toolchain)?),
            StageWork::Copy => StageOutcome::Copy(files::copy_static(&self.layout, &config.copy)?),
            StageWork::Assemble => StageOutcome::Assemble(self.assembler().assemble(toolchain)?),
            StageWork::Develop => StageOutcome::Develop(self.assembler().develop()?),
        };
        Ok(outcome)
    }

    fn timed(&self, stage: &Stage, toolchain: &dyn Toolchain) -> Result<StageReport, PipelineError> {
        let started = Instant::now();
        let outcome = self.run_stage(stage, toolchain)?;
        Ok(StageReport {
            stage: stage.name.clone(),
            outcome,
            elapsed: started.elapsed(),
        })
    }

    /// Run `task` (a task name or a single stage name).
    pub fn run(
        &self,
        task: &str,
        toolchain: &dyn Toolchain,
        events: Option<Sender<PipelineEvent>>,
    ) -> Result<RunReport, PipelineError> {
        let groups = self.registry.plan(task)?;
        let events = events.as_ref();
        emit(
            events,
            PipelineEvent::TaskStarted {
                task: task.to_string(),
                stages: groups
                    .iter()
                    .flat_map(|g| g.names())
                    .map(str::to_string)
                    .collect(),
            },
        );

        let threads = config::effective_threads(&self.config().project);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;

        let mut report = RunReport {
            task: task.to_string(),
            ..RunReport::default()
        };
        for group in &groups {
            emit(
                events,
                PipelineEvent::GroupStarted {
                    stages: group.names().into_iter().map(str::to_string).collect(),
                },
            );

            let results: Vec<Result<StageReport, PipelineError>> = if group.is_parallel() {
                pool.install(|| {
                    group
                        .stages
                        .par_iter()
                        .map(|stage| self.timed(stage, toolchain))
                        .collect()
                })
            } else {
                group.stages.iter().map(|stage| self.timed(stage, toolchain)).collect()
            };

            for result in results {
                let stage_report = result?;
                if let StageOutcome::Lint {
                    failure: Some(output),
                    ..
                } = &stage_report.outcome
                {
                    report.lint_failures.push(output.clone());
                }
                emit(events, PipelineEvent::StageFinished(stage_report.clone()));
                report.stages.push(stage_report);
            }
        }
        Ok(report)
    }
}

// ============================================================================
// Check
// ============================================================================

/// What `check` found, without building anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Each task with the stages it resolves to.
    pub tasks: Vec<(String, Vec<String>)>,
    /// Each transform with its number of matched inputs.
    pub transforms: Vec<(String, usize)>,
    /// Each rewritten document with its number of build blocks.
    pub documents: Vec<(PathBuf, usize)>,
    pub artifacts: Vec<PlannedArtifact>,
}

/// Resolve every task, count transform inputs, and scan every document.
pub fn check(ctx: &BuildContext) -> Result<CheckReport, PipelineError> {
    let mut report = CheckReport::default();

    for task in ctx.registry.task_names() {
        let stages = ctx
            .registry
            .resolve(task)?
            .into_iter()
            .map(|s| s.name.clone())
            .collect();
        report.tasks.push((task.to_string(), stages));
    }

    for transform in ctx.registry.transforms() {
        let inputs = transform.discover_inputs()?;
        report.transforms.push((transform.name.clone(), inputs.len()));
    }

    let source_dir = ctx.layout.source_dir();
    for path in files::discover_files(source_dir, &ctx.config().usemin.documents)? {
        let html = std::fs::read_to_string(&path).map_err(|source| FilesError::Io {
            path: path.clone(),
            source,
        })?;
        let found = blocks::scan_blocks(&path, &html)?;
        let relative = path.strip_prefix(source_dir).unwrap_or(&path).to_path_buf();
        report.documents.push((relative, found.len()));
    }

    report.artifacts = ctx.assembler().prepare()?.artifacts;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use crate::toolchain::tests::MockToolchain;
    use std::fs;

    fn context(root: &Path, assignments: &[&str]) -> BuildContext {
        let assignments: Vec<String> = assignments.iter().map(|s| s.to_string()).collect();
        BuildContext::load(root, None, &assignments).unwrap()
    }

    // =========================================================================
    // Load tests
    // =========================================================================

    #[test]
    fn load_registers_decoration_hook() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        assert_eq!(ctx.injections.hook_count("concat"), 1);
        assert_eq!(ctx.manifest.version, "2.3.0");
        assert_eq!(ctx.build_date.len(), 10);
    }

    #[test]
    fn load_without_decoration() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &["concat.decoration.enabled=false"]);
        assert_eq!(ctx.injections.hook_count("concat"), 0);
    }

    #[test]
    fn load_missing_manifest_is_error() {
        let tmp = setup_fixtures();
        fs::remove_file(tmp.path().join("package.json")).unwrap();
        assert!(matches!(
            BuildContext::load(tmp.path(), None, &[]),
            Err(PipelineError::Manifest(_))
        ));
    }

    #[test]
    fn load_rejects_clean_of_project_root() {
        let tmp = setup_fixtures();
        let result = BuildContext::load(tmp.path(), None, &["clean.paths=[\"./\"]".to_string()]);
        assert!(matches!(
            result,
            Err(PipelineError::Config(ConfigError::Validation(_)))
        ));
        assert!(tmp.path().join("package.json").is_file());
        assert!(tmp.path().join("src/index.html").is_file());
    }

    #[test]
    fn load_rejects_task_cycle() {
        let tmp = setup_fixtures();
        let result = BuildContext::load(
            tmp.path(),
            None,
            &["tasks.a=[\"b\"]".to_string(), "tasks.b=[\"a\"]".to_string()],
        );
        assert!(matches!(
            result,
            Err(PipelineError::Config(ConfigError::TaskCycle(_)))
        ));
    }

    // =========================================================================
    // Run tests
    // =========================================================================

    #[test]
    fn full_run_executes_stages_in_order() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        let mock = MockToolchain::new();
        let report = ctx.run("default", &mock, None).unwrap();

        let names: Vec<&str> = report.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names[..3], ["version", "clean", "lint"]);
        assert_eq!(names[names.len() - 2..], ["copy", "assemble"]);
        assert!(names.contains(&"typescript") && names.contains(&"less"));
        assert!(report.lint_failures.is_empty());
        assert!(tmp.path().join("dist/app.min.js").is_file());
        assert!(tmp.path().join("dist/index.html").is_file());
    }

    #[test]
    fn compile_group_runs_both_transforms() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        let mock = MockToolchain::new();
        let (tx, rx) = std::sync::mpsc::channel();
        ctx.run("compile", &mock, Some(tx)).unwrap();

        let events: Vec<PipelineEvent> = rx.iter().collect();
        assert!(events.contains(&PipelineEvent::GroupStarted {
            stages: vec!["typescript".to_string(), "less".to_string()],
        }));
        let mut stages = mock.stages();
        stages.sort();
        stages.dedup();
        assert_eq!(stages, vec!["less", "typescript"]);
    }

    #[test]
    fn failing_stage_stops_later_stages() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        let mock = MockToolchain::failing("typescript");
        let err = ctx.run("full", &mock, None).unwrap_err();

        assert!(matches!(err, PipelineError::Transform(TransformError::Failed { .. })));
        assert!(!tmp.path().join("dist").exists());
        assert!(!mock.stages().contains(&"minify".to_string()));
    }

    #[test]
    fn blocking_lint_failure_aborts() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        let err = ctx.run("full", &MockToolchain::failing("lint"), None).unwrap_err();
        assert!(matches!(err, PipelineError::Lint(LintError::Failed { .. })));
    }

    #[test]
    fn advisory_lint_failure_is_recorded() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &["lint.blocking=false"]);
        let report = ctx.run("full", &MockToolchain::failing("lint"), None).unwrap();
        assert_eq!(report.lint_failures.len(), 1);
        assert!(report.lint_failures[0].contains("mock failure"));
        assert!(tmp.path().join("dist/app.min.css").is_file());
    }

    #[test]
    fn version_failure_is_fatal() {
        let tmp = setup_fixtures();
        fs::write(tmp.path().join("bower.json"), "{}\n").unwrap();
        let ctx = context(tmp.path(), &[]);
        let mock = MockToolchain::new();
        let err = ctx.run("full", &mock, None).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Version(VersionError::PatternNotFound { .. })
        ));
        assert!(mock.get_invocations().is_empty());
    }

    #[test]
    fn dev_run_rewrites_into_staging() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        let report = ctx.run("dev", &MockToolchain::new(), None).unwrap();
        assert_eq!(report.stages.last().unwrap().stage, "develop");

        let html = fs::read_to_string(tmp.path().join("tmp/dev/index.html")).unwrap();
        assert!(html.contains("../compiled/interface.js"));
        assert!(!tmp.path().join("dist").exists());
    }

    #[test]
    fn single_stage_name_runs_alone() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        let report = ctx.run("copy", &MockToolchain::new(), None).unwrap();
        assert_eq!(report.stages.len(), 1);
        assert!(matches!(report.stages[0].outcome, StageOutcome::Copy(_)));
    }

    #[test]
    fn unknown_task_is_rejected_before_running() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        let mock = MockToolchain::new();
        assert!(matches!(
            ctx.run("deploy", &mock, None),
            Err(PipelineError::Config(ConfigError::UnknownTask { .. }))
        ));
        assert!(mock.get_invocations().is_empty());
    }

    // =========================================================================
    // Check tests
    // =========================================================================

    #[test]
    fn check_reports_without_building() {
        let tmp = setup_fixtures();
        let ctx = context(tmp.path(), &[]);
        let report = check(&ctx).unwrap();

        let full = report.tasks.iter().find(|(t, _)| t == "full").unwrap();
        assert_eq!(full.1.first().map(String::as_str), Some("version"));
        assert_eq!(report.documents, vec![(PathBuf::from("index.html"), 2)]);
        assert_eq!(report.artifacts.len(), 2);
        assert!(report.transforms.iter().all(|(_, n)| *n > 0));
        assert!(!tmp.path().join("tmp").exists());
    }

    #[test]
    fn check_reports_malformed_document() {
        let tmp = setup_fixtures();
        write(tmp.path(), "src/broken.html", "<!-- build:js app -->\n");
        let ctx = context(tmp.path(), &[]);
        assert!(matches!(check(&ctx), Err(PipelineError::Blocks(_))));
    }
}
