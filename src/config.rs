//! Build configuration module.
//!
//! Handles loading, composing and validating `catmin.toml`. The file is
//! optional: stock defaults describe a project laid out like this:
//!
//! ```text
//! project/
//! ├── catmin.toml              # Build config (optional, overrides stock defaults)
//! ├── package.json             # { "name": ..., "version": ... }, the single source of the version
//! └── src/
//!     ├── index.html           # Pages with <!-- build:js app.js --> blocks
//!     ├── js/*.ts              # Compiled by the `typescript` transform
//!     ├── css/*.less           # Compiled by the `less` transform
//!     └── assets/              # Copied verbatim to dist/assets
//! ```
//!
//! ## Sections
//!
//! Every top-level table is one section of the [`ConfigTree`]: `project`,
//! `tasks`, and one per stage (`version`, `clean`, `lint`, `compile`, `copy`,
//! `concat`, `minify`, `usemin`). A `catmin.toml` only lists what it changes:
//!
//! ```toml
//! [lint]
//! blocking = false
//!
//! [compile.sass]
//! inputs = ["scss/*.scss"]
//! output_dir = "compiled"
//! extension = "css"
//! command = ["sass", "{input}", "{output}"]
//! ```
//!
//! Unknown sections and unknown keys are rejected to catch typos early.
//!
//! ## Command templates
//!
//! External tools are configured as argv arrays. `{input}` is replaced by one
//! input path, `{inputs}` expands to every input path as separate arguments,
//! and `{output}` is replaced by the output path.

use crate::compose::{self, ConfigTree, Override};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};
use thiserror::Error;

/// Name of the project config file looked up in the project root.
pub const CONFIG_FILENAME: &str = "catmin.toml";

/// Stage names that the pipeline provides itself. Transforms may not reuse them.
pub const BUILTIN_STAGES: &[&str] = &["version", "clean", "lint", "copy", "assemble", "develop"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Unknown stage `{name}` (from {origin})")]
    UnknownStage { name: String, origin: String },
    #[error("Task `{task}` references unknown task or stage `{name}`")]
    UnknownTask { name: String, task: String },
    #[error("Task cycle: {0}")]
    TaskCycle(String),
    #[error("Task `{task}` runs stages out of order: {reason}")]
    Ordering { task: String, reason: String },
    #[error("Invalid override `{0}` (expected section.key=value)")]
    InvalidOverride(String),
    #[error("Invalid version pattern for {target}: {source}")]
    InvalidPattern {
        target: String,
        #[source]
        source: regex::Error,
    },
}

/// Typed view of the composed [`ConfigTree`].
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Directory layout and the package manifest location.
    pub project: ProjectConfig,
    /// Named task lists. Entries are stage names or other task names.
    pub tasks: BTreeMap<String, Vec<String>>,
    /// In-place version propagation rules.
    pub version: VersionConfig,
    /// Directories removed before a full build.
    pub clean: CleanConfig,
    /// Advisory lint stage.
    pub lint: LintConfig,
    /// Transform stages, keyed by stage name.
    pub compile: BTreeMap<String, TransformConfig>,
    /// Static copy into the distribution directory.
    pub copy: CopyConfig,
    /// Concatenation and decoration.
    pub concat: ConcatConfig,
    /// Minifier commands per artifact kind.
    pub minify: MinifyConfig,
    /// Which HTML documents are planned from and rewritten.
    pub usemin: UseminConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            tasks: default_tasks(),
            version: VersionConfig::default(),
            clean: CleanConfig::default(),
            lint: LintConfig::default(),
            compile: default_transforms(),
            copy: CopyConfig::default(),
            concat: ConcatConfig::default(),
            minify: MinifyConfig::default(),
            usemin: UseminConfig::default(),
        }
    }
}

fn default_tasks() -> BTreeMap<String, Vec<String>> {
    let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    BTreeMap::from([
        ("compile".to_string(), list(&["typescript", "less"])),
        ("assemble".to_string(), list(&["assemble"])),
        (
            "full".to_string(),
            list(&["version", "clean", "lint", "compile", "copy", "assemble"]),
        ),
        ("default".to_string(), list(&["full"])),
        ("dev".to_string(), list(&["version", "compile", "develop"])),
    ])
}

fn default_transforms() -> BTreeMap<String, TransformConfig> {
    BTreeMap::from([
        (
            "typescript".to_string(),
            TransformConfig {
                inputs: vec!["js/*.ts".to_string()],
                output: Some("compiled/interface.js".to_string()),
                output_dir: None,
                extension: None,
                command: ["tsc", "--sourceMap", "--outFile", "{output}", "{inputs}"]
                    .map(String::from)
                    .to_vec(),
            },
        ),
        (
            "less".to_string(),
            TransformConfig {
                inputs: vec!["css/*.less".to_string()],
                output: None,
                output_dir: Some("compiled".to_string()),
                extension: Some("css".to_string()),
                command: ["lessc", "{input}", "{output}"].map(String::from).to_vec(),
            },
        ),
    ])
}

impl BuildConfig {
    /// Validate values that serde can't check on its own.
    ///
    /// Task lists are checked separately by the stage registry, which knows
    /// the full set of stage names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, dir) in [
            ("project.source_dir", &self.project.source_dir),
            ("project.staging_dir", &self.project.staging_dir),
            ("project.dist_dir", &self.project.dist_dir),
            ("project.manifest", &self.project.manifest),
        ] {
            check_relative(key, dir)?;
        }
        let protected = [self.project.source_dir.as_str(), self.project.manifest.as_str()];
        for path in &self.clean.paths {
            if crate::files::clean_target(path, &protected).is_none() {
                return Err(ConfigError::Validation(format!(
                    "clean.paths must name a directory below the project root that spares \
                     {} and {}, got `{path}`",
                    self.project.source_dir, self.project.manifest
                )));
            }
        }
        if self.project.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "project.max_processes must be at least 1".into(),
            ));
        }

        for (name, transform) in &self.compile {
            if BUILTIN_STAGES.contains(&name.as_str()) || self.tasks.contains_key(name) {
                return Err(ConfigError::Validation(format!(
                    "transform `{name}` clashes with a built-in stage or task name"
                )));
            }
            transform.validate(name)?;
        }

        for target in &self.version.targets {
            check_relative("version.targets.path", &target.path)?;
            crate::version::rule_regex(target.prefix.as_deref()).map_err(|source| {
                ConfigError::InvalidPattern {
                    target: target.path.clone(),
                    source,
                }
            })?;
        }

        check_command("lint.command", &self.lint.command)?;
        check_command("minify.js", &self.minify.js)?;
        check_command("minify.css", &self.minify.css)?;
        if self.usemin.prepare.is_empty() {
            return Err(ConfigError::Validation(
                "usemin.prepare must name at least one document".into(),
            ));
        }
        Ok(())
    }
}

fn check_relative(key: &str, value: &str) -> Result<(), ConfigError> {
    let path = Path::new(value);
    if value.trim().is_empty()
        || path.is_absolute()
        || path.components().any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ConfigError::Validation(format!(
            "{key} must be a relative path inside the project, got `{value}`"
        )));
    }
    Ok(())
}

fn check_command(key: &str, command: &[String]) -> Result<(), ConfigError> {
    if command.first().is_none_or(|program| program.trim().is_empty()) {
        return Err(ConfigError::Validation(format!("{key} must not be empty")));
    }
    Ok(())
}

/// Directory layout of the project, all relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Package manifest holding `name` and `version`.
    pub manifest: String,
    /// Root of the source tree; HTML references are relative to it.
    pub source_dir: String,
    /// Intermediate build outputs.
    pub staging_dir: String,
    /// Final distribution directory.
    pub dist_dir: String,
    /// Maximum parallel transform workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            manifest: "package.json".to_string(),
            source_dir: "src".to_string(),
            staging_dir: "tmp".to_string(),
            dist_dir: "dist".to_string(),
            max_processes: None,
        }
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(project: &ProjectConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    project.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VersionConfig {
    /// Files that receive the manifest version, processed in order.
    pub targets: Vec<VersionTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionTarget {
    /// File to rewrite, relative to the project root.
    pub path: String,
    /// Regex for the text right before the version literal.
    /// Defaults to [`crate::version::DEFAULT_PREFIX`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanConfig {
    pub paths: Vec<String>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            paths: vec!["tmp".to_string(), "dist".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LintConfig {
    /// Linter argv; `{inputs}` expands to the selected files.
    pub command: Vec<String>,
    /// Globs relative to the project root.
    pub sources: Vec<String>,
    /// Files whose path contains any of these substrings are skipped.
    pub exclude: Vec<String>,
    /// Whether a lint failure aborts the run. Defaults to `true`.
    pub blocking: bool,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            command: ["jshint", "--config", ".jshintrc", "{inputs}"]
                .map(String::from)
                .to_vec(),
            sources: vec!["src/js/*.js".to_string()],
            exclude: Vec::new(),
            blocking: true,
        }
    }
}

/// One compile step: source format A → format B.
///
/// Exactly one output form must be given: `output` (a single fixed file for
/// all inputs) or `output_dir` + `extension` (one file per input).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    /// Globs relative to the source directory.
    pub inputs: Vec<String>,
    /// Fixed output, relative to the staging directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Pattern output directory, relative to the staging directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Pattern output extension, without the dot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Compiler argv.
    pub command: Vec<String>,
}

impl TransformConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.inputs.is_empty() {
            return Err(ConfigError::Validation(format!(
                "compile.{name}.inputs must not be empty"
            )));
        }
        check_command(&format!("compile.{name}.command"), &self.command)?;
        match (&self.output, &self.output_dir, &self.extension) {
            (Some(output), None, None) => check_relative(&format!("compile.{name}.output"), output),
            (None, Some(dir), Some(ext)) if !ext.is_empty() => {
                check_relative(&format!("compile.{name}.output_dir"), dir)
            }
            _ => Err(ConfigError::Validation(format!(
                "compile.{name} needs either `output`, or `output_dir` and `extension`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CopyConfig {
    /// Globs for top-level files of the source directory.
    pub sources: Vec<String>,
    /// Assets directory inside the source directory, copied recursively.
    pub assets: String,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            sources: vec!["*.*".to_string()],
            assets: "assets".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcatConfig {
    /// Inserted between concatenated files.
    pub separator: String,
    pub decoration: DecorationConfig,
}

impl Default for ConcatConfig {
    fn default() -> Self {
        Self {
            separator: "\n".to_string(),
            decoration: DecorationConfig::default(),
        }
    }
}

/// Banner and per-file header attached to the concat stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecorationConfig {
    pub enabled: bool,
    /// Rendered once at the top. Placeholders: `{name}`, `{version}`, `{date}`.
    pub banner: String,
    /// Rendered before each file. Placeholder: `{path}`.
    pub file_header: String,
}

impl Default for DecorationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            banner: "/*******************************************/\n\
                     /* {name} - v{version} - {date} */\n\n"
                .to_string(),
            file_header: "/**********************************************/\n\
                          /* {path} */\n\n"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinifyConfig {
    pub js: Vec<String>,
    pub css: Vec<String>,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        Self {
            js: ["uglifyjs", "{input}", "-o", "{output}"]
                .map(String::from)
                .to_vec(),
            css: ["cleancss", "-o", "{output}", "{input}"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UseminConfig {
    /// Documents (relative to the source dir) whose blocks define the artifacts.
    pub prepare: Vec<String>,
    /// Globs (relative to the source dir) of documents rewritten into dist.
    pub documents: Vec<String>,
}

impl Default for UseminConfig {
    fn default() -> Self {
        Self {
            prepare: vec!["index.html".to_string()],
            documents: vec!["*.html".to_string()],
        }
    }
}

// =============================================================================
// Config loading, composing, and validation
// =============================================================================

/// Returns the stock default config as a [`ConfigTree`].
///
/// This is the canonical representation of all default values, used as the
/// base layer for composing user overrides on top.
pub fn stock_defaults_tree() -> Result<ConfigTree, ConfigError> {
    let value = toml::Value::try_from(BuildConfig::default()).expect("default config must serialize");
    match value {
        toml::Value::Table(table) => ConfigTree::from_table(table),
        other => Err(ConfigError::Validation(format!(
            "stock defaults serialized to {}",
            other.type_str()
        ))),
    }
}

/// Load a config file as a raw TOML table.
///
/// Returns `Ok(None)` if the file doesn't exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(config_path: &Path) -> Result<Option<toml::Table>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(config_path)?;
    let table: toml::Table = toml::from_str(&content)?;
    Ok(Some(table))
}

/// The composed tree together with its typed, validated view.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub tree: ConfigTree,
    pub config: BuildConfig,
}

/// Compose stock defaults, an optional config file, and `--set` assignments.
///
/// `config_path` defaults to `<root>/catmin.toml`. The result is validated;
/// every configuration error surfaces here, before any stage runs.
pub fn load_config(
    root: &Path,
    config_path: Option<&Path>,
    assignments: &[String],
) -> Result<LoadedConfig, ConfigError> {
    let defaults = stock_defaults_tree()?;
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.join(CONFIG_FILENAME));

    let mut overrides = Vec::new();
    if let Some(layer) = load_raw_config(&config_path)? {
        tracing::debug!(path = %config_path.display(), "loaded config file");
        overrides.extend(Override::from_layer(
            layer,
            &config_path.display().to_string(),
        ));
    }
    for raw in assignments {
        overrides.push(Override::parse_assignment(raw)?);
    }

    let tree = compose::compose(&defaults, &overrides)?;
    let config: BuildConfig = tree.typed()?;
    config.validate()?;
    Ok(LoadedConfig { tree, config })
}

/// Returns a fully-commented stock `catmin.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# catmin configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Each table only needs the keys it
# wants to override. Unknown tables and keys are errors.
#
# Command templates: {input} = one input, {inputs} = all inputs as separate
# arguments, {output} = the output path.

# ---------------------------------------------------------------------------
# Project layout (relative to the project root)
# ---------------------------------------------------------------------------
[project]
manifest = "package.json"   # name + version, the single source of the version
source_dir = "src"
staging_dir = "tmp"
dist_dir = "dist"
# Maximum parallel transform workers. Omit to auto-detect (= CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Tasks: ordered lists of stages or other tasks
# ---------------------------------------------------------------------------
[tasks]
compile = ["typescript", "less"]
assemble = ["assemble"]
full = ["version", "clean", "lint", "compile", "copy", "assemble"]
default = ["full"]
dev = ["version", "compile", "develop"]

# ---------------------------------------------------------------------------
# Version propagation: the manifest version is written into each target
# ---------------------------------------------------------------------------
[version]
targets = []
# targets = [
#   { path = "bower.json" },
#   { path = "src/js/interface.ts", prefix = "[^\\-]version:string['\"]?\\s*[:=]\\s*['\"]" },
# ]

[clean]
paths = ["tmp", "dist"]

# ---------------------------------------------------------------------------
# Lint (advisory). blocking = true aborts the run when the linter fails.
# ---------------------------------------------------------------------------
[lint]
command = ["jshint", "--config", ".jshintrc", "{inputs}"]
sources = ["src/js/*.js"]
exclude = []
blocking = true

# ---------------------------------------------------------------------------
# Transforms: inputs are globs under source_dir, outputs go under staging_dir
# ---------------------------------------------------------------------------
[compile.less]
inputs = ["css/*.less"]
output_dir = "compiled"
extension = "css"
command = ["lessc", "{input}", "{output}"]

[compile.typescript]
inputs = ["js/*.ts"]
output = "compiled/interface.js"
command = ["tsc", "--sourceMap", "--outFile", "{output}", "{inputs}"]

# ---------------------------------------------------------------------------
# Static copy into dist
# ---------------------------------------------------------------------------
[copy]
sources = ["*.*"]
assets = "assets"

# ---------------------------------------------------------------------------
# Concatenation. Decoration adds a banner and a header before each file.
# ---------------------------------------------------------------------------
[concat]
separator = "\n"

[concat.decoration]
enabled = true
banner = "/*******************************************/\n/* {name} - v{version} - {date} */\n\n"
file_header = "/**********************************************/\n/* {path} */\n\n"

[minify]
js = ["uglifyjs", "{input}", "-o", "{output}"]
css = ["cleancss", "-o", "{output}", "{input}"]

# ---------------------------------------------------------------------------
# Build blocks: `prepare` documents define the artifacts, `documents` are
# rewritten into dist.
# ---------------------------------------------------------------------------
[usemin]
prepare = ["index.html"]
documents = ["*.html"]
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_project_layout() {
        let config = BuildConfig::default();
        assert_eq!(config.project.manifest, "package.json");
        assert_eq!(config.project.source_dir, "src");
        assert_eq!(config.project.staging_dir, "tmp");
        assert_eq!(config.project.dist_dir, "dist");
    }

    #[test]
    fn default_config_has_stock_tasks() {
        let config = BuildConfig::default();
        assert_eq!(config.tasks["compile"], vec!["typescript", "less"]);
        assert_eq!(config.tasks["default"], vec!["full"]);
        assert_eq!(
            config.tasks["full"],
            vec!["version", "clean", "lint", "compile", "copy", "assemble"]
        );
    }

    #[test]
    fn default_lint_is_blocking() {
        assert!(BuildConfig::default().lint.blocking);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[lint]
blocking = false
"#;
        let config: BuildConfig = toml::from_str(toml).unwrap();
        assert!(!config.lint.blocking);
        assert_eq!(config.lint.sources, vec!["src/js/*.js"]);
        assert_eq!(config.concat.separator, "\n");
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let loaded = load_config(tmp.path(), None, &[]).unwrap();
        assert_eq!(loaded.config.project.dist_dir, "dist");
        assert!(loaded.tree.contains("concat"));
    }

    #[test]
    fn load_config_reads_file_over_defaults() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            r#"
[project]
dist_dir = "public"

[compile.sass]
inputs = ["scss/*.scss"]
output_dir = "compiled"
extension = "css"
command = ["sass", "{input}", "{output}"]
"#,
        )
        .unwrap();

        let loaded = load_config(tmp.path(), None, &[]).unwrap();
        assert_eq!(loaded.config.project.dist_dir, "public");
        assert_eq!(loaded.config.project.source_dir, "src");
        assert!(loaded.config.compile.contains_key("sass"));
        assert!(loaded.config.compile.contains_key("typescript"));
    }

    #[test]
    fn load_config_applies_assignments_after_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "[lint]\nblocking = false\n",
        )
        .unwrap();
        let loaded =
            load_config(tmp.path(), None, &["lint.blocking=true".to_string()]).unwrap();
        assert!(loaded.config.lint.blocking);
    }

    #[test]
    fn load_config_unknown_section_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "[uglify]\nmangle = true\n").unwrap();
        let result = load_config(tmp.path(), None, &[]);
        assert!(matches!(result, Err(ConfigError::UnknownStage { .. })));
    }

    #[test]
    fn load_config_unknown_key_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "[lint]\nblockng = false\n").unwrap();
        let result = load_config(tmp.path(), None, &[]);
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "this is not valid toml [[[").unwrap();
        let result = load_config(tmp.path(), None, &[]);
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_explicit_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("release.toml");
        fs::write(&path, "[project]\ndist_dir = \"release\"\n").unwrap();
        let loaded = load_config(tmp.path(), Some(&path), &[]).unwrap();
        assert_eq!(loaded.config.project.dist_dir, "release");
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(BuildConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_parent_dir_in_clean() {
        let mut config = BuildConfig::default();
        config.clean.paths = vec!["../elsewhere".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_clean_of_root_or_sources() {
        for path in [".", "./", "src", "src/", ""] {
            let mut config = BuildConfig::default();
            config.clean.paths = vec![path.to_string()];
            assert!(
                matches!(config.validate(), Err(ConfigError::Validation(_))),
                "accepted `{path}`"
            );
        }
    }

    #[test]
    fn validate_rejects_absolute_dist_dir() {
        let mut config = BuildConfig::default();
        config.project.dist_dir = "/var/www".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_transform_with_both_output_forms() {
        let mut config = BuildConfig::default();
        let ts = config.compile.get_mut("typescript").unwrap();
        ts.output_dir = Some("compiled".to_string());
        ts.extension = Some("js".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("compile.typescript"));
    }

    #[test]
    fn validate_rejects_transform_named_like_builtin() {
        let mut config = BuildConfig::default();
        let less = config.compile.remove("less").unwrap();
        config.compile.insert("copy".to_string(), less);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_version_prefix() {
        let mut config = BuildConfig::default();
        config.version.targets.push(VersionTarget {
            path: "bower.json".to_string(),
            prefix: Some("version(".to_string()),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_minify_command() {
        let mut config = BuildConfig::default();
        config.minify.css = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_processes() {
        let mut config = BuildConfig::default();
        config.project.max_processes = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let project = ProjectConfig {
            max_processes: Some(1),
            ..ProjectConfig::default()
        };
        assert_eq!(effective_threads(&project), 1);
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        let project = ProjectConfig {
            max_processes: Some(99999),
            ..ProjectConfig::default()
        };
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&project), cores);
    }

    // =========================================================================
    // Stock defaults tests
    // =========================================================================

    #[test]
    fn stock_defaults_tree_has_all_sections() {
        let tree = stock_defaults_tree().unwrap();
        for section in [
            "project", "tasks", "version", "clean", "lint", "compile", "copy", "concat",
            "minify", "usemin",
        ] {
            assert!(tree.contains(section), "missing section {section}");
        }
    }

    #[test]
    fn stock_config_toml_is_valid_toml() {
        let _: toml::Value =
            toml::from_str(stock_config_toml()).expect("stock config must be valid TOML");
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let parsed: BuildConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = BuildConfig::default();
        assert_eq!(parsed.tasks, defaults.tasks);
        assert_eq!(parsed.compile, defaults.compile);
        assert_eq!(parsed.concat.decoration.banner, defaults.concat.decoration.banner);
        assert_eq!(
            parsed.concat.decoration.file_header,
            defaults.concat.decoration.file_header
        );
        assert_eq!(parsed.minify.js, defaults.minify.js);
        assert_eq!(parsed.lint.command, defaults.lint.command);
        assert_eq!(parsed.usemin.documents, defaults.usemin.documents);
    }
}
