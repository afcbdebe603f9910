//! # catmin
//!
//! A declarative build pipeline for front-end assets. A project declares its
//! stages once in `catmin.toml`; catmin compiles the sources, concatenates
//! and minifies them, and rewrites the HTML that references them.
//!
//! # Architecture: Named Tasks Over Stages
//!
//! A run is a named task resolved into an ordered list of stages:
//!
//! ```text
//! version    package.json version  →  bower.json, src/js/core.ts   (in place)
//! clean      tmp/, dist/           →  (removed)
//! lint       src/js/*.js           →  (advisory or blocking)
//! compile    src/js/*.ts           →  tmp/compiled/interface.js    (typescript)
//!            src/css/*.less        →  tmp/compiled/*.css           (less)
//! copy       src/*.*, src/assets/  →  dist/
//! assemble   build blocks          →  dist/app.min.js, dist/index.html
//! ```
//!
//! Everything a stage needs is decided before the first stage starts: the
//! config is composed and validated, every task is resolved, and the
//! injection hooks are attached. A configuration mistake never surfaces
//! halfway through a build.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Typed `catmin.toml` sections, stock defaults, loading and validation |
//! | [`compose`] | Config tree composition and per-stage injection points |
//! | [`manifest`] | `package.json` reading: the single source of the version |
//! | [`layout`] | Where every stage reads and writes, artifact naming |
//! | [`registry`] | Stages, task resolution, ordering checks, parallel groups |
//! | [`pipeline`] | Runs a task, reports progress, `check` |
//! | [`version`] | Regex-based in-place version propagation |
//! | [`toolchain`] | External tool seam: command templates and process execution |
//! | [`transform`] | Compile stages (`typescript`, `less`, ...) |
//! | [`lint`] | Lint stage |
//! | [`files`] | Discovery, `clean`, static `copy` |
//! | [`blocks`] | `<!-- build:js app -->` block scanning and rewriting |
//! | [`concat`] | Concatenation and banner/header decoration |
//! | [`assemble`] | prepare → concat → minify → usemin → products, and the dev rewrite |
//! | [`output`] | CLI output formatting |
//! | [`types`] | Small shared enums (`BlockKind`, `Mode`) |
//!
//! # Design Decisions
//!
//! ## Composition Instead of Mutation
//!
//! The config is a tree of sections composed once from stock defaults, the
//! project file, and `--set` assignments. Nothing edits it afterwards. Stages
//! that need to decorate another stage's generated configuration register an
//! injection hook for that stage's name ([`compose::InjectionRegistry`]);
//! unknown names are rejected at registration.
//!
//! ## External Tools Behind a Trait
//!
//! Compilers, the linter, and the minifiers are opaque commands. They run
//! through [`toolchain::Toolchain`], so every stage can be tested with a fake
//! that records invocations and writes outputs itself.
//!
//! ## One-Shot Build Blocks
//!
//! Rewriting consumes the `build:`/`endbuild` markers. A rewritten document
//! contains no markers, and rewriting it again leaves it unchanged.

pub mod assemble;
pub mod blocks;
pub mod compose;
pub mod concat;
pub mod config;
pub mod files;
pub mod layout;
pub mod lint;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod toolchain;
pub mod transform;
pub mod types;
pub mod version;

#[cfg(test)]
pub(crate) mod test_helpers;
