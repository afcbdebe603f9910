//! CLI output formatting for pipeline runs.
//!
//! # Stage-First Display
//!
//! Output follows the run: one header line per stage, with what the stage
//! touched shown as indented context lines. Paths are shown relative to the
//! project root so the output reads the same on every machine.
//!
//! # Output Format
//!
//! ## Run
//!
//! ```text
//! ==> full: version → clean → lint → typescript → less → copy → assemble
//! version
//!     bower.json: 2.2.0 → updated
//!     src/js/core.ts: 2.3.0 (unchanged)
//! clean
//!     removed tmp
//! lint (2 files)
//! typescript ∥ less
//! less (1 input)
//!     tmp/compiled/core.css
//! typescript (2 inputs)
//!     tmp/compiled/interface.js
//! copy (1 file, 2 assets)
//! assemble
//!     app.js → dist/app.js, dist/app.min.js
//!     app.css → dist/app.css, dist/app.min.css
//!     Document: dist/index.html
//!
//! Built full: 7 stages in 1.24s
//! ```
//!
//! ## Check
//!
//! ```text
//! Tasks
//!     full: version → clean → lint → typescript → less → copy → assemble
//! Transforms
//!     less: 1 input
//! Documents
//!     index.html: 2 blocks
//! Artifacts
//!     app.js ← index.html (3 sources)
//! ```
//!
//! # Architecture
//!
//! Each format function returns `Vec<String>` for testability; `print_*`
//! wrappers write to stdout. Format functions are pure: no I/O, no side
//! effects.

use crate::pipeline::{CheckReport, PipelineEvent, RunReport, StageOutcome, StageReport};
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 file`, `2 files`.
fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Path relative to `root`, with `/` separators.
fn shown(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

// ============================================================================
// Run output
// ============================================================================

fn format_stage(report: &StageReport, root: &Path) -> Vec<String> {
    let stage = &report.stage;
    let mut lines = Vec::new();
    match &report.outcome {
        StageOutcome::Version(outcomes) => {
            lines.push(stage.clone());
            for outcome in outcomes {
                let path = shown(root, &outcome.path);
                lines.push(if outcome.changed {
                    format!("{}{path}: {} → updated", indent(1), outcome.previous)
                } else {
                    format!("{}{path}: {} (unchanged)", indent(1), outcome.previous)
                });
            }
        }
        StageOutcome::Clean(removed) => {
            lines.push(stage.clone());
            for path in removed {
                lines.push(format!("{}removed {}", indent(1), shown(root, path)));
            }
        }
        StageOutcome::Lint { files, failure } => {
            lines.push(format!("{stage} ({})", plural(*files, "file")));
            if let Some(output) = failure {
                lines.push(format!("{}Advisory failure:", indent(1)));
                lines.extend(output.lines().map(|l| format!("{}{l}", indent(2))));
            }
        }
        StageOutcome::Transform(outcome) => {
            if outcome.skipped() {
                lines.push(format!("{stage} (no inputs, skipped)"));
            } else {
                lines.push(format!("{stage} ({})", plural(outcome.inputs, "input")));
                for path in &outcome.written {
                    lines.push(format!("{}{}", indent(1), shown(root, path)));
                }
            }
        }
        StageOutcome::Copy(outcome) => {
            lines.push(format!(
                "{stage} ({}, {})",
                plural(outcome.files, "file"),
                plural(outcome.assets, "asset")
            ));
        }
        StageOutcome::Assemble(outcome) => {
            lines.push(stage.clone());
            // Products come in (unminified, minified) pairs per artifact.
            for (artifact, pair) in outcome.artifacts.iter().zip(outcome.products.chunks(2)) {
                let pair: Vec<String> = pair.iter().map(|p| shown(root, p)).collect();
                lines.push(format!(
                    "{}{} → {}",
                    indent(1),
                    artifact.file_name(),
                    pair.join(", ")
                ));
            }
            for document in &outcome.documents {
                lines.push(format!("{}Document: {}", indent(1), shown(root, document)));
            }
        }
        StageOutcome::Develop(documents) => {
            lines.push(stage.clone());
            for document in documents {
                lines.push(format!("{}Document: {}", indent(1), shown(root, document)));
            }
        }
    }
    lines
}

/// Format one pipeline event as it arrives.
pub fn format_event(event: &PipelineEvent, root: &Path) -> Vec<String> {
    match event {
        PipelineEvent::TaskStarted { task, stages } => {
            vec![format!("==> {task}: {}", stages.join(" → "))]
        }
        PipelineEvent::GroupStarted { stages } if stages.len() > 1 => {
            vec![stages.join(" ∥ ")]
        }
        PipelineEvent::GroupStarted { .. } => Vec::new(),
        PipelineEvent::StageFinished(report) => format_stage(report, root),
    }
}

/// Summary printed after a successful run.
pub fn format_run_report(report: &RunReport) -> Vec<String> {
    let elapsed: f64 = report.stages.iter().map(|s| s.elapsed.as_secs_f64()).sum();
    let mut lines = vec![
        String::new(),
        format!(
            "Built {}: {} in {elapsed:.2}s",
            report.task,
            plural(report.stages.len(), "stage")
        ),
    ];
    if !report.lint_failures.is_empty() {
        lines.push(format!(
            "Lint reported problems ({}), not blocking",
            plural(report.lint_failures.len(), "failure")
        ));
    }
    lines
}

pub fn print_event(event: &PipelineEvent, root: &Path) {
    for line in format_event(event, root) {
        println!("{}", line);
    }
}

pub fn print_run_report(report: &RunReport) {
    for line in format_run_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Check output
// ============================================================================

pub fn format_check(report: &CheckReport) -> Vec<String> {
    let mut lines = vec!["Tasks".to_string()];
    for (task, stages) in &report.tasks {
        lines.push(format!("{}{task}: {}", indent(1), stages.join(" → ")));
    }

    lines.push("Transforms".to_string());
    for (name, inputs) in &report.transforms {
        lines.push(format!("{}{name}: {}", indent(1), plural(*inputs, "input")));
    }

    lines.push("Documents".to_string());
    for (document, blocks) in &report.documents {
        lines.push(format!(
            "{}{}: {}",
            indent(1),
            document.display(),
            plural(*blocks, "block")
        ));
    }

    lines.push("Artifacts".to_string());
    for artifact in &report.artifacts {
        lines.push(format!(
            "{}{} ← {} ({})",
            indent(1),
            artifact.name.file_name(),
            artifact.document.display(),
            plural(artifact.references.len(), "source")
        ));
    }
    lines
}

pub fn print_check(report: &CheckReport) {
    for line in format_check(report) {
        println!("{}", line);
    }
}
