//! External tool invocation.
//!
//! Compilers, the linter and the minifiers are opaque collaborators with a
//! file-list-in / file-list-out contract. Stages describe what to run as an
//! [`Invocation`]; a [`Toolchain`] runs it.
//!
//! The production implementation is [`CommandToolchain`], which spawns the
//! configured argv as a child process. Tests swap in a recording fake.
//!
//! ## Templates
//!
//! | Placeholder | Expansion |
//! |-------------|-----------|
//! | `{inputs}` as a whole argument | one argument per input |
//! | `{input}` | the first input |
//! | `{output}` | the output path |

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Empty command for stage `{0}`")]
    EmptyCommand(String),
    #[error("Cannot run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// One external command, fully expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Stage that issued the command.
    pub stage: String,
    pub argv: Vec<String>,
    /// Directory the command runs in.
    pub workdir: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Invocation {
    /// Expand `template` for the given inputs and output.
    pub fn new(
        stage: &str,
        template: &[String],
        workdir: &Path,
        inputs: Vec<PathBuf>,
        output: Option<PathBuf>,
    ) -> Self {
        let input_args: Vec<String> = inputs.iter().map(|p| p.display().to_string()).collect();
        let output_arg = output.as_ref().map(|p| p.display().to_string());
        Self {
            stage: stage.to_string(),
            argv: expand_template(template, &input_args, output_arg.as_deref()),
            workdir: workdir.to_path_buf(),
            inputs,
            output,
        }
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

/// Expand command placeholders.
pub fn expand_template(template: &[String], inputs: &[String], output: Option<&str>) -> Vec<String> {
    let first_input = inputs.first().map(String::as_str).unwrap_or_default();
    let mut argv = Vec::with_capacity(template.len() + inputs.len());
    for arg in template {
        if arg == "{inputs}" {
            argv.extend(inputs.iter().cloned());
            continue;
        }
        let mut expanded = arg.replace("{input}", first_input);
        if let Some(output) = output {
            expanded = expanded.replace("{output}", output);
        }
        argv.push(expanded);
    }
    argv
}

/// What a finished command reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Stderr, or stdout when the tool reports on stdout only.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim_end()
        } else {
            self.stderr.trim_end()
        }
    }
}

/// Runs external commands for stages.
///
/// `Sync` so transforms in one parallel group can share it across rayon
/// workers.
pub trait Toolchain: Sync {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;
}

/// Spawns each invocation as a child process and waits for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandToolchain;

impl CommandToolchain {
    pub fn new() -> Self {
        Self
    }
}

impl Toolchain for CommandToolchain {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let (program, args) = invocation
            .argv
            .split_first()
            .ok_or_else(|| ToolError::EmptyCommand(invocation.stage.clone()))?;

        tracing::debug!(stage = %invocation.stage, argv = ?invocation.argv, "running tool");
        let output = Command::new(program)
            .args(args)
            .current_dir(&invocation.workdir)
            .output()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
