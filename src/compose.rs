//! Configuration composition.
//!
//! A build run works from exactly one [`ConfigTree`]: an ordered mapping from
//! section name (one per stage, plus `project` and `tasks`) to a nested TOML
//! table. The tree is produced once by [`compose`] and then only ever read.
//!
//! ## Layers
//!
//! ```text
//! stock defaults        (typed Default impls, serialized)
//!   ← catmin.toml       (one override per top-level table)
//!   ← --set key=value   (one override per flag)
//! ```
//!
//! Merging follows [`merge_toml`]: tables merge key by key, everything else
//! (scalars, arrays) is replaced wholesale by the overriding layer. An
//! override naming a section the defaults do not have is rejected before any
//! stage runs.
//!
//! ## Injection points
//!
//! Some stages get their configuration *generated* at run time (the concat
//! and minify stages are planned from the build blocks found in HTML). An
//! [`InjectionRegistry`] lets callers attach hooks to such a stage. A hook
//! only ever receives the `options` table of the generated configuration,
//! never the targets or any other stage. This is how the concat banner and
//! per-file headers are attached without the concat stage knowing about them.

use crate::config::ConfigError;
use std::collections::BTreeMap;
use std::fmt;

/// Sections that hold run-wide settings rather than one stage's options.
pub const NON_STAGE_SECTIONS: &[&str] = &["project", "tasks"];

/// Section whose tables each configure one transform stage.
pub const TRANSFORMS_SECTION: &str = "compile";

/// Immutable, composed configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    sections: toml::Table,
}

impl ConfigTree {
    /// Wrap a table whose values must all be tables themselves.
    pub fn from_table(sections: toml::Table) -> Result<Self, ConfigError> {
        for (name, value) in &sections {
            if !value.is_table() {
                return Err(ConfigError::Validation(format!(
                    "section `{name}` must be a table, found {}",
                    value.type_str()
                )));
            }
        }
        Ok(Self { sections })
    }

    pub fn section(&self, name: &str) -> Option<&toml::Table> {
        self.sections.get(name).and_then(|v| v.as_table())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Section names in tree order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// A deep copy of the whole tree as a TOML value.
    pub fn to_value(&self) -> toml::Value {
        toml::Value::Table(self.sections.clone())
    }

    /// Deserialize the whole tree into a typed view.
    pub fn typed<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let typed: T = self.to_value().try_into()?;
        Ok(typed)
    }
}

/// One layer of overrides against a single section.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Section (stage) the patch applies to.
    pub section: String,
    /// Value merged on top of the section.
    pub patch: toml::Value,
    /// Where the override came from, for error messages.
    pub origin: String,
}

impl Override {
    pub fn new(section: impl Into<String>, patch: toml::Value, origin: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            patch,
            origin: origin.into(),
        }
    }

    /// Split a parsed config file into one override per top-level key.
    pub fn from_layer(layer: toml::Table, origin: &str) -> Vec<Override> {
        layer
            .into_iter()
            .map(|(section, patch)| Override::new(section, patch, origin))
            .collect()
    }

    /// Parse a `section.key.path=value` assignment.
    ///
    /// The value is read as a TOML value (`false`, `3`, `["a", "b"]`); anything
    /// that doesn't parse is taken as a plain string.
    pub fn parse_assignment(raw: &str) -> Result<Override, ConfigError> {
        let (path, value) = raw
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidOverride(raw.to_string()))?;
        let mut keys: Vec<&str> = path.trim().split('.').map(str::trim).collect();
        if keys.iter().any(|k| k.is_empty()) {
            return Err(ConfigError::InvalidOverride(raw.to_string()));
        }

        let mut patch = parse_override_value(value.trim());
        let section = keys.remove(0).to_string();
        for key in keys.into_iter().rev() {
            let mut table = toml::Table::new();
            table.insert(key.to_string(), patch);
            patch = toml::Value::Table(table);
        }
        Ok(Override::new(section, patch, format!("--set {raw}")))
    }
}

fn parse_override_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `overrides` in order on top of a copy of `defaults`.
///
/// Every override is checked against the defaults first, so a typo in any
/// layer fails before a single section is merged.
pub fn compose(defaults: &ConfigTree, overrides: &[Override]) -> Result<ConfigTree, ConfigError> {
    if let Some(unknown) = overrides.iter().find(|o| !defaults.contains(&o.section)) {
        return Err(ConfigError::UnknownStage {
            name: unknown.section.clone(),
            origin: unknown.origin.clone(),
        });
    }

    let mut sections = defaults.sections.clone();
    for layer in overrides {
        let base = sections
            .remove(&layer.section)
            .unwrap_or_else(|| toml::Value::Table(toml::Table::new()));
        sections.insert(layer.section.clone(), merge_toml(base, layer.patch.clone()));
    }
    ConfigTree::from_table(sections)
}

// =============================================================================
// Injection points
// =============================================================================

/// What a hook gets to know about the run it is decorating.
#[derive(Debug, Clone, Copy)]
pub struct InjectionContext<'a> {
    pub stage: &'a str,
    pub package_name: &'a str,
    pub version: &'a str,
    pub build_date: &'a str,
}

type InjectionHook = Box<dyn Fn(&InjectionContext<'_>, &mut toml::Table) + Send + Sync>;

/// Hooks keyed by the stage whose generated `options` they may edit.
pub struct InjectionRegistry {
    known: Vec<String>,
    hooks: BTreeMap<String, Vec<InjectionHook>>,
}

impl InjectionRegistry {
    /// A registry that accepts hooks for the stage sections of `tree` and for
    /// each transform under `compile`. `project` and `tasks` configure no
    /// stage and are not injection points.
    pub fn for_tree(tree: &ConfigTree) -> Self {
        let transforms = tree
            .section(TRANSFORMS_SECTION)
            .into_iter()
            .flat_map(|table| table.keys().map(String::as_str));
        let known = tree
            .names()
            .filter(|name| !NON_STAGE_SECTIONS.contains(name) && *name != TRANSFORMS_SECTION)
            .chain(transforms)
            .map(str::to_string)
            .collect();
        Self {
            known,
            hooks: BTreeMap::new(),
        }
    }

    /// Attach `hook` to `stage`. Unknown stages are rejected here, not when
    /// the stage eventually runs.
    pub fn register<F>(&mut self, stage: &str, hook: F) -> Result<(), ConfigError>
    where
        F: Fn(&InjectionContext<'_>, &mut toml::Table) + Send + Sync + 'static,
    {
        if !self.known.iter().any(|k| k == stage) {
            return Err(ConfigError::UnknownStage {
                name: stage.to_string(),
                origin: "injection point".to_string(),
            });
        }
        self.hooks
            .entry(stage.to_string())
            .or_default()
            .push(Box::new(hook));
        Ok(())
    }

    pub fn hook_count(&self, stage: &str) -> usize {
        self.hooks.get(stage).map_or(0, Vec::len)
    }

    /// Run every hook registered for `ctx.stage`, in registration order.
    pub fn apply(&self, ctx: &InjectionContext<'_>, options: &mut toml::Table) {
        if let Some(hooks) = self.hooks.get(ctx.stage) {
            for hook in hooks {
                hook(ctx, options);
            }
        }
    }
}

impl fmt::Debug for InjectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .hooks
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("InjectionRegistry")
            .field("hooks", &counts)
            .finish()
    }
}
