//! In-place version propagation.
//!
//! The manifest version is written into every configured target file. Each
//! target is searched for its prefix pattern immediately followed by a
//! version literal; only the literal is replaced. The target is handled as
//! raw bytes, so the surrounding text and its encoding stay exactly as they
//! were.
//!
//! ## Patterns
//!
//! The default prefix matches the usual declarations:
//!
//! ```text
//! "version": "1.2.0"              package.json / bower.json
//! version: '1.2.0'                object literals
//! ```
//!
//! Targets with other shapes supply their own prefix, e.g.
//! `[^\-]version:string['"]?\s*[:=]\s*['"]` for a typed TypeScript field.
//!
//! ## Failure
//!
//! A prefix that doesn't match aborts propagation with
//! [`VersionError::PatternNotFound`]. Rules are applied in order and writes
//! are not rolled back: targets before the failing rule keep their new
//! version, targets after it are never opened.

use crate::config::VersionTarget;
use regex::bytes::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Text preceding a version literal, when a target doesn't configure its own.
pub const DEFAULT_PREFIX: &str = r#"[^\-]version['"]?\s*[:=]\s*['"]"#;

/// A semantic version with optional pre-release and build metadata.
pub const VERSION_LITERAL: &str = r"\d+\.\d+\.\d+(?:-[0-9A-Za-z.\-]+)?(?:\+[0-9A-Za-z.\-]+)?";

static EXACT_VERSION: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(&format!("^{VERSION_LITERAL}$")).expect("version literal regex is valid")
});

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("Version pattern `{pattern}` not found in {path}")]
    PatternNotFound { path: PathBuf, pattern: String },
    #[error("Cannot access version target {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid version pattern for {path}: {source}")]
    InvalidPattern {
        path: PathBuf,
        #[source]
        source: regex::Error,
    },
}

/// Whether `s` is exactly one version literal.
pub fn is_version_literal(s: &str) -> bool {
    EXACT_VERSION.is_match(s)
}

/// Build the search regex for a prefix: the prefix, then the literal in a
/// group named `version`.
pub fn rule_regex(prefix: Option<&str>) -> Result<Regex, regex::Error> {
    let prefix = prefix.unwrap_or(DEFAULT_PREFIX);
    Regex::new(&format!("(?:{prefix})(?P<version>{VERSION_LITERAL})"))
}

/// One target file and where in it the version lives.
#[derive(Debug, Clone)]
pub struct VersionRule {
    pub path: PathBuf,
    pattern: String,
    regex: Regex,
}

impl VersionRule {
    pub fn new(path: PathBuf, prefix: Option<&str>) -> Result<Self, VersionError> {
        let regex = rule_regex(prefix).map_err(|source| VersionError::InvalidPattern {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            pattern: prefix.unwrap_or(DEFAULT_PREFIX).to_string(),
            regex,
        })
    }

    /// Rules for configured targets, resolved against the project root.
    pub fn from_targets(root: &Path, targets: &[VersionTarget]) -> Result<Vec<Self>, VersionError> {
        targets
            .iter()
            .map(|t| Self::new(root.join(&t.path), t.prefix.as_deref()))
            .collect()
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// What propagation did to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationOutcome {
    pub path: PathBuf,
    /// The literal found before propagation.
    pub previous: String,
    /// False when the target already carried the version and wasn't written.
    pub changed: bool,
}

/// Replace the first version literal that follows `regex`'s prefix.
///
/// Returns the new content and the literal it replaced, or `None` when the
/// pattern doesn't occur.
pub fn splice(content: &[u8], regex: &Regex, version: &str) -> Option<(Vec<u8>, String)> {
    let found = regex.captures(content)?.name("version")?;
    let previous = String::from_utf8_lossy(found.as_bytes()).into_owned();

    let mut spliced = Vec::with_capacity(content.len() + version.len());
    spliced.extend_from_slice(&content[..found.start()]);
    spliced.extend_from_slice(version.as_bytes());
    spliced.extend_from_slice(&content[found.end()..]);
    Some((spliced, previous))
}

/// Write `version` into every rule target, in order.
pub fn propagate(
    version: &str,
    rules: &[VersionRule],
) -> Result<Vec<PropagationOutcome>, VersionError> {
    let mut outcomes = Vec::with_capacity(rules.len());
    for rule in rules {
        let io_err = |source| VersionError::Io {
            path: rule.path.clone(),
            source,
        };
        let content = fs::read(&rule.path).map_err(io_err)?;

        let (spliced, previous) =
            splice(&content, &rule.regex, version).ok_or_else(|| VersionError::PatternNotFound {
                path: rule.path.clone(),
                pattern: rule.pattern.clone(),
            })?;

        let changed = spliced != content;
        if changed {
            fs::write(&rule.path, &spliced).map_err(io_err)?;
            tracing::info!(path = %rule.path.display(), from = %previous, to = %version, "version updated");
        } else {
            tracing::debug!(path = %rule.path.display(), "version already current");
        }
        outcomes.push(PropagationOutcome {
            path: rule.path.clone(),
            previous,
            changed,
        });
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TS_PREFIX: &str = r#"[^\-]version:string['"]?\s*[:=]\s*['"]"#;

    fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    // =========================================================================
    // splice tests
    // =========================================================================

    #[test]
    fn splice_json_version() {
        let regex = rule_regex(None).unwrap();
        let content = br#"{
  "name": "singular",
  "version": "1.0.0",
  "main": "dist/singular.js"
}"#;
        let (out, previous) = splice(content, &regex, "2.3.0").unwrap();
        assert_eq!(previous, "1.0.0");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{
  "name": "singular",
  "version": "2.3.0",
  "main": "dist/singular.js"
}"#
        );
    }

    #[test]
    fn splice_typescript_field_with_custom_prefix() {
        let regex = rule_regex(Some(TS_PREFIX)).unwrap();
        let content = b"export class Api {\n  public version:string = '0.9.1-beta.2';\n}\n";
        let (out, previous) = splice(content, &regex, "1.0.0").unwrap();
        assert_eq!(previous, "0.9.1-beta.2");
        assert_eq!(
            out,
            b"export class Api {\n  public version:string = '1.0.0';\n}\n".to_vec()
        );
    }

    #[test]
    fn splice_replaces_only_first_occurrence() {
        let regex = rule_regex(None).unwrap();
        let content = b"{ \"version\": \"1.0.0\", \"x\": { \"version\": \"1.0.0\" } }";
        let (out, _) = splice(content, &regex, "2.0.0").unwrap();
        assert_eq!(
            out,
            b"{ \"version\": \"2.0.0\", \"x\": { \"version\": \"1.0.0\" } }".to_vec()
        );
    }

    #[test]
    fn splice_ignores_hyphenated_keys() {
        let regex = rule_regex(None).unwrap();
        let content = b"{ \"engine-version\": \"9.9.9\" }";
        assert!(splice(content, &regex, "2.0.0").is_none());
    }

    #[test]
    fn splice_preserves_non_utf8_bytes() {
        let regex = rule_regex(None).unwrap();
        let mut content = b"// caf\xe9\nvar version = '1.0.0';\n".to_vec();
        let (out, _) = splice(&content, &regex, "1.1.0").unwrap();
        content[23..28].copy_from_slice(b"1.1.0");
        assert_eq!(out, content);
    }

    #[test]
    fn is_version_literal_checks_whole_string() {
        assert!(is_version_literal("2.3.0"));
        assert!(is_version_literal("2.3.0-rc.1+build.5"));
        assert!(!is_version_literal("v2.3.0"));
        assert!(!is_version_literal("2.3"));
    }

    // =========================================================================
    // propagate tests
    // =========================================================================

    #[test]
    fn propagate_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let bower = write(tmp.path(), "bower.json", b"{ \"version\": \"1.0.0\" }\n");
        let rules = vec![VersionRule::new(bower.clone(), None).unwrap()];

        let first = propagate("2.3.0", &rules).unwrap();
        assert!(first[0].changed);
        let after_first = fs::read(&bower).unwrap();

        let second = propagate("2.3.0", &rules).unwrap();
        assert!(!second[0].changed);
        assert_eq!(second[0].previous, "2.3.0");
        assert_eq!(fs::read(&bower).unwrap(), after_first);
    }

    #[test]
    fn propagate_pattern_not_found_names_file() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "notes.txt", b"no version here\n");
        let rules = vec![VersionRule::new(path.clone(), None).unwrap()];

        let err = propagate("2.3.0", &rules).unwrap_err();
        match err {
            VersionError::PatternNotFound { path: p, pattern } => {
                assert_eq!(p, path);
                assert_eq!(pattern, DEFAULT_PREFIX);
            }
            other => panic!("expected PatternNotFound, got {other:?}"),
        }
    }

    #[test]
    fn propagate_stops_at_failing_rule_without_rollback() {
        let tmp = TempDir::new().unwrap();
        let first = write(tmp.path(), "first.json", b"{ \"version\": \"1.0.0\" }");
        let broken = write(tmp.path(), "broken.json", b"{ \"name\": \"x\" }");
        let last = write(tmp.path(), "last.json", b"{ \"version\": \"1.0.0\" }");
        let rules = vec![
            VersionRule::new(first.clone(), None).unwrap(),
            VersionRule::new(broken, None).unwrap(),
            VersionRule::new(last.clone(), None).unwrap(),
        ];

        assert!(matches!(
            propagate("2.3.0", &rules),
            Err(VersionError::PatternNotFound { .. })
        ));
        // Rules before the failure keep their change.
        assert_eq!(fs::read(&first).unwrap(), b"{ \"version\": \"2.3.0\" }".to_vec());
        // Rules after the failure are never touched.
        assert_eq!(fs::read(&last).unwrap(), b"{ \"version\": \"1.0.0\" }".to_vec());
    }

    #[test]
    fn propagate_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let rules = vec![VersionRule::new(tmp.path().join("missing.json"), None).unwrap()];
        assert!(matches!(
            propagate("2.3.0", &rules),
            Err(VersionError::Io { .. })
        ));
    }

    #[test]
    fn from_targets_resolves_against_root() {
        let targets = vec![
            VersionTarget {
                path: "bower.json".to_string(),
                prefix: None,
            },
            VersionTarget {
                path: "src/js/interface.ts".to_string(),
                prefix: Some(TS_PREFIX.to_string()),
            },
        ];
        let rules = VersionRule::from_targets(Path::new("/project"), &targets).unwrap();
        assert_eq!(rules[0].path, PathBuf::from("/project/bower.json"));
        assert_eq!(rules[1].pattern(), TS_PREFIX);
    }

    #[test]
    fn invalid_prefix_is_rejected() {
        let result = VersionRule::new(PathBuf::from("x"), Some("version("));
        assert!(matches!(result, Err(VersionError::InvalidPattern { .. })));
    }
}
