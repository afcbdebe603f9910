//! Shared types used across pipeline stages.
//!
//! These are the small vocabulary types that the block rewriter, the assemble
//! stage, and the output formatter all agree on.

use std::fmt;

/// The kind of a build block, which decides the artifact extension and the
/// tag template used when the block is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockKind {
    /// `<!-- build:js ... -->` (alias `script`)
    Script,
    /// `<!-- build:css ... -->` (alias `stylesheet`)
    Stylesheet,
}

impl BlockKind {
    /// Parse the kind token of a marker. Accepts the short usemin names
    /// (`js`, `css`) and the long ones (`script`, `stylesheet`).
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "js" | "script" => Some(Self::Script),
            "css" | "stylesheet" => Some(Self::Stylesheet),
            _ => None,
        }
    }

    /// Artifact file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Script => "js",
            Self::Stylesheet => "css",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Which flavor of references the rewriter emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One reference per source file, pointing at its compiled location.
    Development,
    /// One reference per block, pointing at the minified artifact.
    Production,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_short_and_long_names() {
        assert_eq!(BlockKind::parse("js"), Some(BlockKind::Script));
        assert_eq!(BlockKind::parse("script"), Some(BlockKind::Script));
        assert_eq!(BlockKind::parse("CSS"), Some(BlockKind::Stylesheet));
        assert_eq!(BlockKind::parse("stylesheet"), Some(BlockKind::Stylesheet));
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        assert_eq!(BlockKind::parse("html"), None);
        assert_eq!(BlockKind::parse(""), None);
    }

    #[test]
    fn extension_matches_kind() {
        assert_eq!(BlockKind::Script.extension(), "js");
        assert_eq!(BlockKind::Stylesheet.extension(), "css");
    }
}
