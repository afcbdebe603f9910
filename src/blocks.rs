//! Build-block discovery and rewriting.
//!
//! A build block is a marked region of an HTML document listing the sources
//! of one artifact:
//!
//! ```html
//! <!-- build:js app.js -->
//! <script src="js/api.ts"></script>
//! <script src="js/ui.ts"></script>
//! <!-- endbuild -->
//! ```
//!
//! The start marker names the kind (`js`/`script` or `css`/`stylesheet`) and
//! the target. The end marker is `<!-- endbuild -->`, or
//! `<!-- endbuild:<kind> -->` to have the kind checked. Script blocks collect
//! `<script src>` values, stylesheet blocks `<link href>` values.
//!
//! ## Rewriting
//!
//! The region from the start of the start marker to the end of the end
//! marker is replaced; every other byte of the document is kept.
//!
//! | Mode | Replacement |
//! |------|-------------|
//! | Development | one tag per source, pointing at its compiled location (duplicates collapsed) |
//! | Production | one tag pointing at `<name>.min.<ext>` |
//!
//! Where those references point is the [`ReferenceResolver`]'s decision.
//!
//! ## One-shot
//!
//! Rewriting consumes the markers. A rewritten document contains no blocks,
//! so rewriting it again returns it unchanged. The pipeline therefore always
//! rewrites from the original source document, never from its own output.

use crate::layout::ArtifactName;
use crate::types::{BlockKind, Mode};
use maud::html;
use regex::Regex;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<!--\s*(?:build:(?P<kind>[A-Za-z]+)(?:\s+(?P<target>[^\s>]+?))?|endbuild(?::(?P<end>[A-Za-z]+))?)\s*-->",
    )
    .expect("marker regex is valid")
});

static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
        .expect("script regex is valid")
});

static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("link regex is valid")
});

/// Why a block couldn't be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockProblem {
    Unterminated { target: String },
    EndWithoutStart,
    Nested { outer: String },
    KindMismatch { start: BlockKind, end: String },
    UnknownKind(String),
    MissingTarget,
    Empty { target: String },
}

impl fmt::Display for BlockProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockProblem::Unterminated { target } => {
                write!(f, "block `{target}` has no end marker")
            }
            BlockProblem::EndWithoutStart => write!(f, "end marker without a start marker"),
            BlockProblem::Nested { outer } => {
                write!(f, "start marker inside block `{outer}`")
            }
            BlockProblem::KindMismatch { start, end } => {
                write!(f, "block opened as `{start}` but closed as `{end}`")
            }
            BlockProblem::UnknownKind(kind) => write!(f, "unknown block kind `{kind}`"),
            BlockProblem::MissingTarget => write!(f, "start marker names no target"),
            BlockProblem::Empty { target } => {
                write!(f, "block `{target}` references no files")
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed build block in {document}, line {line}: {problem}")]
pub struct MalformedBlockError {
    pub document: PathBuf,
    pub line: usize,
    pub problem: BlockProblem,
}

/// One marked region of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildBlock {
    pub kind: BlockKind,
    /// Target as written in the start marker.
    pub target: String,
    /// References in document order, as written.
    pub sources: Vec<String>,
    /// 1-based line of the start marker.
    pub start_line: usize,
    /// 1-based line of the end marker.
    pub end_line: usize,
    /// Byte range of the region, markers included.
    pub span: Range<usize>,
    /// Whitespace before the start marker on its line.
    pub indent: String,
}

impl BuildBlock {
    pub fn artifact(&self) -> ArtifactName {
        ArtifactName::from_target(&self.target, self.kind)
    }
}

/// Decides where rewritten references point.
pub trait ReferenceResolver {
    /// Development: the compiled location of one source of `block`.
    fn compiled_ref(&self, block: &BuildBlock, source: &str) -> String;

    /// Production: the minified artifact of `block`.
    fn artifact_ref(&self, block: &BuildBlock) -> String;
}

/// A document after rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub html: String,
    /// The blocks that were replaced, in document order.
    pub blocks: Vec<BuildBlock>,
}

fn line_of(html: &str, offset: usize) -> usize {
    html[..offset].bytes().filter(|&b| b == b'\n').count() + 1
}

fn indent_before(html: &str, offset: usize) -> String {
    let line_start = html[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = &html[line_start..offset];
    if prefix.chars().all(|c| c == ' ' || c == '\t') {
        prefix.to_string()
    } else {
        String::new()
    }
}

struct OpenBlock {
    kind: BlockKind,
    target: String,
    start: usize,
    body_start: usize,
    line: usize,
}

/// Find every build block in `html`.
///
/// `document` only names the document in errors.
pub fn scan_blocks(document: &Path, html: &str) -> Result<Vec<BuildBlock>, MalformedBlockError> {
    let malformed = |offset: usize, problem: BlockProblem| MalformedBlockError {
        document: document.to_path_buf(),
        line: line_of(html, offset),
        problem,
    };

    let mut blocks = Vec::new();
    let mut open: Option<OpenBlock> = None;

    for caps in MARKER.captures_iter(html) {
        let Some(marker) = caps.get(0) else { continue };

        if let Some(kind) = caps.name("kind") {
            if let Some(outer) = &open {
                return Err(malformed(
                    marker.start(),
                    BlockProblem::Nested {
                        outer: outer.target.clone(),
                    },
                ));
            }
            let kind = BlockKind::parse(kind.as_str()).ok_or_else(|| {
                malformed(marker.start(), BlockProblem::UnknownKind(kind.as_str().to_string()))
            })?;
            let target = caps
                .name("target")
                .ok_or_else(|| malformed(marker.start(), BlockProblem::MissingTarget))?;
            open = Some(OpenBlock {
                kind,
                target: target.as_str().to_string(),
                start: marker.start(),
                body_start: marker.end(),
                line: line_of(html, marker.start()),
            });
            continue;
        }

        let Some(block) = open.take() else {
            return Err(malformed(marker.start(), BlockProblem::EndWithoutStart));
        };
        if let Some(end) = caps.name("end") {
            if BlockKind::parse(end.as_str()) != Some(block.kind) {
                return Err(malformed(
                    marker.start(),
                    BlockProblem::KindMismatch {
                        start: block.kind,
                        end: end.as_str().to_string(),
                    },
                ));
            }
        }

        let body = &html[block.body_start..marker.start()];
        let tags = match block.kind {
            BlockKind::Script => &*SCRIPT_SRC,
            BlockKind::Stylesheet => &*LINK_HREF,
        };
        let sources: Vec<String> = tags
            .captures_iter(body)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        if sources.is_empty() {
            return Err(MalformedBlockError {
                document: document.to_path_buf(),
                line: block.line,
                problem: BlockProblem::Empty {
                    target: block.target,
                },
            });
        }

        blocks.push(BuildBlock {
            kind: block.kind,
            indent: indent_before(html, block.start),
            target: block.target,
            sources,
            start_line: block.line,
            end_line: line_of(html, marker.start()),
            span: block.start..marker.end(),
        });
    }

    if let Some(block) = open {
        return Err(MalformedBlockError {
            document: document.to_path_buf(),
            line: block.line,
            problem: BlockProblem::Unterminated {
                target: block.target,
            },
        });
    }
    Ok(blocks)
}

/// Whether `html` still contains any build marker.
pub fn contains_markers(html: &str) -> bool {
    MARKER.is_match(html)
}

/// Render one reference tag.
pub fn render_tag(kind: BlockKind, reference: &str) -> String {
    let markup = match kind {
        BlockKind::Script => html! { script src=(reference) {} },
        BlockKind::Stylesheet => html! { link rel="stylesheet" href=(reference); },
    };
    markup.into_string()
}

/// The references that replace `block` in `mode`.
pub fn replacement_refs(
    block: &BuildBlock,
    mode: Mode,
    resolver: &dyn ReferenceResolver,
) -> Vec<String> {
    match mode {
        Mode::Production => vec![resolver.artifact_ref(block)],
        Mode::Development => {
            let mut refs: Vec<String> = Vec::with_capacity(block.sources.len());
            for source in &block.sources {
                let compiled = resolver.compiled_ref(block, source);
                if !refs.contains(&compiled) {
                    refs.push(compiled);
                }
            }
            refs
        }
    }
}

/// Rewrite every block of `html` for `mode`.
///
/// Fails without producing output if any block is malformed.
pub fn rewrite(
    document: &Path,
    html: &str,
    mode: Mode,
    resolver: &dyn ReferenceResolver,
) -> Result<Rewritten, MalformedBlockError> {
    let blocks = scan_blocks(document, html)?;

    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for block in &blocks {
        out.push_str(&html[cursor..block.span.start]);
        let separator = format!("\n{}", block.indent);
        let tags: Vec<String> = replacement_refs(block, mode, resolver)
            .iter()
            .map(|r| render_tag(block.kind, r))
            .collect();
        out.push_str(&tags.join(&separator));
        cursor = block.span.end;
    }
    out.push_str(&html[cursor..]);

    Ok(Rewritten { html: out, blocks })
}
