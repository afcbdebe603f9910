//! Concatenation and decoration.
//!
//! Sources are joined in the order given, with `separator` between them.
//! Decoration is additive: a banner once at the top, and a header before each
//! source naming its path. Source bytes are copied unchanged.
//!
//! ```text
//! /*******************************************/     banner
//! /* singular - v2.3.0 - 2026-10-19 */
//!
//! /**********************************************/  file header
//! /* tmp/compiled/interface.js */
//!
//! ...interface.js...
//! ```
//!
//! Decoration is not part of the concat stage itself. It is attached through
//! the `concat` injection point by [`decoration_hook`], which writes `banner`
//! and `file_header` into the generated `options` table. Both artifact kinds
//! go through the same stage, so both get the same decoration.

use crate::compose::InjectionContext;
use crate::config::{ConcatConfig, DecorationConfig};
use crate::layout::Layout;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConcatError {
    #[error("Concat source not found: {0}")]
    MissingSource(PathBuf),
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid concat options: {0}")]
    Options(#[from] toml::de::Error),
}

/// Options of one concat invocation, after injection hooks ran.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConcatOptions {
    pub separator: String,
    /// Rendered banner, written once at the top.
    pub banner: Option<String>,
    /// Per-source header template; `{path}` is the source path.
    pub file_header: Option<String>,
}

impl Default for ConcatOptions {
    fn default() -> Self {
        Self {
            separator: "\n".to_string(),
            banner: None,
            file_header: None,
        }
    }
}

impl ConcatOptions {
    /// The `options` table generated for every artifact, before hooks.
    pub fn base_table(config: &ConcatConfig) -> toml::Table {
        let mut table = toml::Table::new();
        table.insert(
            "separator".to_string(),
            toml::Value::String(config.separator.clone()),
        );
        table
    }

    pub fn from_table(table: toml::Table) -> Result<Self, ConcatError> {
        let options: ConcatOptions = toml::Value::Table(table).try_into()?;
        Ok(options)
    }
}

/// Replace `{key}` placeholders. Unknown placeholders are left as written.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
}

/// Injection hook that decorates concat output with a banner and file headers.
pub fn decoration_hook(
    decoration: DecorationConfig,
) -> impl Fn(&InjectionContext<'_>, &mut toml::Table) + Send + Sync + 'static {
    move |ctx: &InjectionContext<'_>, options: &mut toml::Table| {
        let banner = render_template(
            &decoration.banner,
            &[
                ("name", ctx.package_name),
                ("version", ctx.version),
                ("date", ctx.build_date),
            ],
        );
        options.insert("banner".to_string(), toml::Value::String(banner));
        options.insert(
            "file_header".to_string(),
            toml::Value::String(decoration.file_header.clone()),
        );
    }
}

/// Concatenate `sources` in order.
///
/// Header paths are shown relative to the project root.
pub fn concatenate(
    layout: &Layout,
    sources: &[PathBuf],
    options: &ConcatOptions,
) -> Result<Vec<u8>, ConcatError> {
    let mut out = Vec::new();
    if let Some(banner) = &options.banner {
        out.extend_from_slice(banner.as_bytes());
    }

    for (i, source) in sources.iter().enumerate() {
        let content = read_source(source)?;
        if i > 0 {
            out.extend_from_slice(options.separator.as_bytes());
        }
        if let Some(header) = &options.file_header {
            let path = layout.display(source);
            out.extend_from_slice(render_template(header, &[("path", &path)]).as_bytes());
        }
        out.extend_from_slice(&content);
    }
    Ok(out)
}

fn read_source(path: &Path) -> Result<Vec<u8>, ConcatError> {
    fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConcatError::MissingSource(path.to_path_buf())
        } else {
            ConcatError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> (TempDir, Layout) {
        let tmp = TempDir::new().unwrap();
        for (name, content) in files {
            let path = tmp.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let layout = Layout::new(tmp.path(), &ProjectConfig::default());
        (tmp, layout)
    }

    fn ctx() -> InjectionContext<'static> {
        InjectionContext {
            stage: "concat",
            package_name: "singular",
            version: "2.3.0",
            build_date: "2026-10-19",
        }
    }

    #[test]
    fn concatenation_keeps_listed_order() {
        let (tmp, layout) = project(&[("b.js", "var b;"), ("a.js", "var a;")]);
        let sources = vec![tmp.path().join("b.js"), tmp.path().join("a.js")];
        let out = concatenate(&layout, &sources, &ConcatOptions::default()).unwrap();
        assert_eq!(out, b"var b;\nvar a;".to_vec());
    }

    #[test]
    fn custom_separator() {
        let (tmp, layout) = project(&[("a.css", "a{}"), ("b.css", "b{}")]);
        let options = ConcatOptions {
            separator: ";\n".to_string(),
            ..ConcatOptions::default()
        };
        let sources = vec![tmp.path().join("a.css"), tmp.path().join("b.css")];
        assert_eq!(
            concatenate(&layout, &sources, &options).unwrap(),
            b"a{};\nb{}".to_vec()
        );
    }

    #[test]
    fn decoration_only_adds_at_head_and_boundaries() {
        let (tmp, layout) = project(&[("tmp/compiled/a.js", "A\n"), ("tmp/compiled/b.js", "B\n")]);
        let options = ConcatOptions {
            separator: "\n".to_string(),
            banner: Some("/* banner */\n".to_string()),
            file_header: Some("/* {path} */\n".to_string()),
        };
        let sources = vec![
            tmp.path().join("tmp/compiled/a.js"),
            tmp.path().join("tmp/compiled/b.js"),
        ];
        let out = String::from_utf8(concatenate(&layout, &sources, &options).unwrap()).unwrap();
        assert_eq!(
            out,
            "/* banner */\n/* tmp/compiled/a.js */\nA\n\n/* tmp/compiled/b.js */\nB\n"
        );
    }

    #[test]
    fn source_bytes_are_not_altered() {
        let (tmp, layout) = project(&[]);
        let raw = b"caf\xe9\r\n{path}".to_vec();
        fs::write(tmp.path().join("raw.css"), &raw).unwrap();
        let options = ConcatOptions {
            file_header: Some("/* {path} */\n".to_string()),
            ..ConcatOptions::default()
        };
        let out = concatenate(&layout, &[tmp.path().join("raw.css")], &options).unwrap();
        assert!(out.ends_with(&raw));
    }

    #[test]
    fn missing_source_is_error() {
        let (tmp, layout) = project(&[]);
        let result = concatenate(&layout, &[tmp.path().join("nope.js")], &ConcatOptions::default());
        assert!(matches!(result, Err(ConcatError::MissingSource(_))));
    }

    // =========================================================================
    // Decoration hook tests
    // =========================================================================

    #[test]
    fn decoration_hook_renders_banner() {
        let hook = decoration_hook(DecorationConfig::default());
        let mut options = ConcatOptions::base_table(&ConcatConfig::default());
        hook(&ctx(), &mut options);

        let parsed = ConcatOptions::from_table(options).unwrap();
        let banner = parsed.banner.unwrap();
        assert!(banner.contains("/* singular - v2.3.0 - 2026-10-19 */"));
        assert!(banner.starts_with("/*****"));
        assert_eq!(parsed.file_header.unwrap(), DecorationConfig::default().file_header);
        assert_eq!(parsed.separator, "\n");
    }

    #[test]
    fn undecorated_options_have_no_banner() {
        let parsed =
            ConcatOptions::from_table(ConcatOptions::base_table(&ConcatConfig::default())).unwrap();
        assert_eq!(parsed, ConcatOptions::default());
    }

    #[test]
    fn render_template_leaves_unknown_placeholders() {
        assert_eq!(
            render_template("{name} {other}", &[("name", "x")]),
            "x {other}"
        );
    }
}
