//! Stage registry and task resolution.
//!
//! Every runnable unit of the pipeline is a [`Stage`]: a name, the inputs and
//! outputs it declares, and its [`StageWork`]. Built-in stages always exist;
//! each `[compile.<name>]` table adds a transform stage.
//!
//! ## Tasks
//!
//! A task is a named list in `[tasks]`. Entries name stages first, then
//! other tasks, so `assemble = ["assemble"]` is a task running the stage of
//! the same name. The name given on the command line is looked up as a task
//! first, then as a stage.
//!
//! Resolution flattens a task into stages (first occurrence wins) and checks
//! it before anything runs:
//!
//! - every name exists ([`ConfigError::UnknownTask`])
//! - no task includes itself ([`ConfigError::TaskCycle`])
//! - `version` runs first, `clean` runs before anything that writes outputs,
//!   and `assemble`/`develop` run after every transform
//!   ([`ConfigError::Ordering`])
//!
//! ## Groups
//!
//! Consecutive transforms form one parallel group; every other stage is a
//! group of its own.
//!
//! ```text
//! full → [version] [clean] [lint] [typescript ∥ less] [copy] [assemble]
//! ```

use crate::config::{BuildConfig, ConfigError};
use crate::layout::Layout;
use crate::transform::Transform;
use std::collections::BTreeMap;

/// What a stage does when it runs.
#[derive(Debug, Clone)]
pub enum StageWork {
    /// Propagate the manifest version into the version targets.
    Version,
    /// Remove the configured output directories.
    Clean,
    /// Run the linter.
    Lint,
    /// Compile sources through an external tool.
    Transform(Transform),
    /// Copy top-level sources and assets into dist.
    Copy,
    /// Prepare, concat, minify, rewrite documents, place products.
    Assemble,
    /// Rewrite documents for development into the staging dir.
    Develop,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    /// Declared input patterns, root-relative.
    pub inputs: Vec<String>,
    /// Declared outputs, root-relative.
    pub outputs: Vec<String>,
    pub work: StageWork,
}

impl Stage {
    pub fn is_transform(&self) -> bool {
        matches!(self.work, StageWork::Transform(_))
    }

    fn writes_outputs(&self) -> bool {
        !matches!(self.work, StageWork::Version | StageWork::Clean | StageWork::Lint)
    }
}

/// Stages that run together. More than one stage means they run in parallel.
#[derive(Debug, Clone)]
pub struct StageGroup<'a> {
    pub stages: Vec<&'a Stage>,
}

impl StageGroup<'_> {
    pub fn is_parallel(&self) -> bool {
        self.stages.len() > 1
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: BTreeMap<String, Stage>,
    tasks: BTreeMap<String, Vec<String>>,
}

fn join(base: &str, pattern: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), pattern)
}

impl StageRegistry {
    /// Register the built-in stages and one transform per `[compile.*]` table,
    /// then check that every task resolves.
    pub fn from_config(config: &BuildConfig, layout: &Layout) -> Result<Self, ConfigError> {
        let project = &config.project;
        let mut stages = BTreeMap::new();
        let mut add = |name: &str, inputs: Vec<String>, outputs: Vec<String>, work: StageWork| {
            stages.insert(
                name.to_string(),
                Stage {
                    name: name.to_string(),
                    inputs,
                    outputs,
                    work,
                },
            );
        };

        let targets: Vec<String> = config.version.targets.iter().map(|t| t.path.clone()).collect();
        add("version", targets.clone(), targets, StageWork::Version);
        add("clean", vec![], config.clean.paths.clone(), StageWork::Clean);
        add("lint", config.lint.sources.clone(), vec![], StageWork::Lint);

        for (name, transform) in &config.compile {
            let inputs = transform
                .inputs
                .iter()
                .map(|p| join(&project.source_dir, p))
                .collect();
            let output = match (&transform.output, &transform.output_dir, &transform.extension) {
                (Some(fixed), _, _) => join(&project.staging_dir, fixed),
                (None, dir, ext) => join(
                    &join(&project.staging_dir, dir.as_deref().unwrap_or_default()),
                    &format!("*.{}", ext.as_deref().unwrap_or_default()),
                ),
            };
            let work = Transform::new(name, transform, layout)
                .map_err(|e| ConfigError::Validation(format!("compile.{name}: {e}")))?;
            add(name, inputs, vec![output], StageWork::Transform(work));
        }

        let mut copy_inputs: Vec<String> = config
            .copy
            .sources
            .iter()
            .map(|p| join(&project.source_dir, p))
            .collect();
        copy_inputs.push(join(&join(&project.source_dir, &config.copy.assets), "**"));
        add("copy", copy_inputs, vec![project.dist_dir.clone()], StageWork::Copy);

        let documents: Vec<String> = config
            .usemin
            .documents
            .iter()
            .map(|p| join(&project.source_dir, p))
            .collect();
        add(
            "assemble",
            documents.clone(),
            vec![project.dist_dir.clone()],
            StageWork::Assemble,
        );
        add(
            "develop",
            documents,
            vec![join(&project.staging_dir, "dev")],
            StageWork::Develop,
        );

        let registry = Self {
            stages,
            tasks: config.tasks.clone(),
        };
        for task in registry.tasks.keys() {
            registry.resolve(task)?;
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages.get(name)
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.values()
    }

    pub fn transforms(&self) -> impl Iterator<Item = &Transform> {
        self.stages.values().filter_map(|s| match &s.work {
            StageWork::Transform(t) => Some(t),
            _ => None,
        })
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Flatten `name` into the ordered list of stages it runs.
    pub fn resolve(&self, name: &str) -> Result<Vec<&Stage>, ConfigError> {
        let mut order: Vec<&str> = Vec::new();
        if self.tasks.contains_key(name) {
            let mut stack = Vec::new();
            self.expand_task(name, &mut stack, &mut order)?;
        } else if self.stages.contains_key(name) {
            order.push(name);
        } else {
            return Err(ConfigError::UnknownTask {
                name: name.to_string(),
                task: "command line".to_string(),
            });
        }

        let resolved: Vec<&Stage> = order.iter().filter_map(|n| self.stages.get(*n)).collect();
        check_ordering(name, &resolved)?;
        Ok(resolved)
    }

    fn expand_task<'a>(
        &'a self,
        task: &'a str,
        stack: &mut Vec<&'a str>,
        order: &mut Vec<&'a str>,
    ) -> Result<(), ConfigError> {
        if stack.contains(&task) {
            let mut cycle: Vec<&str> = stack.clone();
            cycle.push(task);
            return Err(ConfigError::TaskCycle(cycle.join(" → ")));
        }
        stack.push(task);
        let entries = self.tasks.get(task).map(Vec::as_slice).unwrap_or_default();
        for entry in entries {
            if let Some((name, _)) = self.stages.get_key_value(entry.as_str()) {
                if !order.contains(&name.as_str()) {
                    order.push(name.as_str());
                }
            } else if let Some((name, _)) = self.tasks.get_key_value(entry.as_str()) {
                self.expand_task(name.as_str(), stack, order)?;
            } else {
                return Err(ConfigError::UnknownTask {
                    name: entry.clone(),
                    task: task.to_string(),
                });
            }
        }
        stack.pop();
        Ok(())
    }

    /// Resolve `name` and split it into execution groups.
    pub fn plan(&self, name: &str) -> Result<Vec<StageGroup<'_>>, ConfigError> {
        let mut groups: Vec<StageGroup<'_>> = Vec::new();
        for stage in self.resolve(name)? {
            match groups.last_mut() {
                Some(group)
                    if stage.is_transform() && group.stages.iter().all(|s| s.is_transform()) =>
                {
                    group.stages.push(stage);
                }
                _ => groups.push(StageGroup {
                    stages: vec![stage],
                }),
            }
        }
        Ok(groups)
    }
}

fn check_ordering(task: &str, stages: &[&Stage]) -> Result<(), ConfigError> {
    let violation = |reason: String| ConfigError::Ordering {
        task: task.to_string(),
        reason,
    };

    for (i, stage) in stages.iter().enumerate() {
        let later = &stages[i + 1..];
        match stage.work {
            StageWork::Version if i > 0 => {
                return Err(violation(format!(
                    "`version` must run before `{}`",
                    stages[0].name
                )));
            }
            StageWork::Clean => {
                if let Some(writer) = stages[..i].iter().find(|s| s.writes_outputs()) {
                    return Err(violation(format!(
                        "`clean` would remove what `{}` wrote",
                        writer.name
                    )));
                }
            }
            StageWork::Assemble | StageWork::Develop => {
                if let Some(transform) = later.iter().find(|s| s.is_transform()) {
                    return Err(violation(format!(
                        "`{}` needs compiled outputs but runs before `{}`",
                        stage.name, transform.name
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
