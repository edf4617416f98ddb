//! Sandbox runner: executes one untrusted program inside an isolated,
//! resource-capped environment and returns raw execution telemetry.
//!
//! Everything the submitted program does (non-zero exit, timeout, OOM)
//! is a normal `Ok` value; `Err(SandboxError)` is reserved for real
//! infrastructure faults (cannot spawn, broken toolchain, box setup
//! failure), which the orchestrator converts to `SystemError`.

mod isolate;
mod process;

pub use isolate::IsolateSandbox;
pub use process::ProcessSandbox;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::Language;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("environment initialization failed: {0}")]
    Initialization(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("unknown sandbox error: {0}")]
    Unknown(String),
}

/// Resource ceilings for one test-case run.
#[derive(Clone, Copy, Debug)]
pub struct RunLimits {
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
}

/// Telemetry from one execution of the submitted program.
#[derive(Clone, Debug, Default)]
pub struct RunOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub time_ms: i32,
    pub memory_kb: i32,
    /// Wall clock exceeded the limit and the runner killed the process.
    pub timed_out: bool,
    /// The memory ceiling was hit; distinct from a normal non-zero exit.
    pub oom: bool,
}

/// Outcome of the compile step. A failed or timed-out compile is a
/// user-facing `CompilationError`, not an infrastructure fault.
#[derive(Clone, Debug)]
pub struct CompileOutcome {
    pub success: bool,
    /// Compiler stdout + stderr.
    pub output: String,
    pub time_ms: i32,
    pub timed_out: bool,
}

/// Factory for per-submission sandbox sessions.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Materialize the source file into a fresh scratch environment.
    async fn start(
        &self,
        language: &Language,
        source_code: &str,
    ) -> Result<Box<dyn SandboxSession>, SandboxError>;
}

/// One submission's isolated environment: compile once, run each test
/// case in a fresh scratch area, tear everything down on `close`.
#[async_trait]
pub trait SandboxSession: Send {
    /// Run the language's compile step under its own (shorter) budget.
    /// `Ok(None)` when the language has no compile step.
    async fn compile(&mut self, budget_ms: u64) -> Result<Option<CompileOutcome>, SandboxError>;

    /// Execute the program with stdin bound to `input`.
    async fn run(&mut self, input: &str, limits: &RunLimits) -> Result<RunOutcome, SandboxError>;

    /// Discard the scratch environment. Implementations also clean up
    /// on drop so no exit path leaves residue behind.
    async fn close(&mut self);
}

/// Paths substituted into a language's command templates.
pub(crate) struct CommandContext {
    pub source: PathBuf,
    pub dir: PathBuf,
    pub exe: PathBuf,
}

impl CommandContext {
    pub fn for_dir(dir: &Path, language: &Language) -> Self {
        Self {
            source: dir.join(language.source_filename()),
            dir: dir.to_path_buf(),
            exe: dir.join("prog"),
        }
    }
}

/// Expand a command template into an argv vector.
///
/// Placeholders: `{source}`, `{dir}`, `{exe}`. Substitution happens
/// before whitespace splitting, so template authors must not use paths
/// containing spaces.
pub(crate) fn expand_command(
    template: &str,
    ctx: &CommandContext,
) -> Result<Vec<String>, SandboxError> {
    let expanded = template
        .replace("{source}", &ctx.source.to_string_lossy())
        .replace("{dir}", &ctx.dir.to_string_lossy())
        .replace("{exe}", &ctx.exe.to_string_lossy());

    let argv: Vec<String> = expanded.split_whitespace().map(String::from).collect();
    if argv.is_empty() {
        return Err(SandboxError::Initialization(format!(
            "empty command template: {template:?}"
        )));
    }
    Ok(argv)
}
