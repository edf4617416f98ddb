//! Sandbox backed by the `isolate` binary (the runner used by many
//! judges): per-run boxes with cgroup-enforced time and memory
//! ceilings and no network access.
//!
//! Every compile and every test-case run gets its own freshly
//! initialized box; build artifacts travel through a host-side staging
//! directory, so nothing a run writes survives into the next one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use common::Language;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

use super::{
    CommandContext, CompileOutcome, RunLimits, RunOutcome, Sandbox, SandboxError, SandboxSession,
    expand_command,
};

/// Wall-clock grace on top of the CPU budget, mirroring how judges
/// usually configure isolate.
const WALL_GRACE_MS: u64 = 2_000;

pub struct IsolateSandbox {
    isolate_bin: String,
    output_cap: usize,
    next_box: AtomicU32,
}

impl IsolateSandbox {
    pub fn new(isolate_bin: impl Into<String>, output_cap: usize) -> Self {
        Self {
            isolate_bin: isolate_bin.into(),
            output_cap,
            next_box: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    async fn start(
        &self,
        language: &Language,
        source_code: &str,
    ) -> Result<Box<dyn SandboxSession>, SandboxError> {
        // isolate supports a bounded number of concurrent boxes
        let box_id = self.next_box.fetch_add(1, Ordering::SeqCst) % 1000;

        let staging = tempfile::Builder::new()
            .prefix("gavel-isolate-")
            .tempdir()
            .map_err(|e| {
                SandboxError::Initialization(format!("cannot create staging dir: {e}"))
            })?;

        let source_path = staging.path().join(language.source_filename());
        tokio::fs::write(&source_path, source_code)
            .await
            .map_err(|e| SandboxError::Initialization(format!("cannot write source file: {e}")))?;

        Ok(Box::new(IsolateSession {
            isolate_bin: self.isolate_bin.clone(),
            output_cap: self.output_cap,
            box_id,
            language: language.clone(),
            staging: Some(staging),
        }))
    }
}

struct IsolateSession {
    isolate_bin: String,
    output_cap: usize,
    box_id: u32,
    language: Language,
    staging: Option<TempDir>,
}

/// Parsed isolate meta file.
#[derive(Debug, Default)]
struct Meta {
    exit_code: Option<i32>,
    signal: Option<i32>,
    time_ms: i32,
    wall_time_ms: i32,
    memory_kb: i32,
    oom_killed: bool,
    status: Option<String>,
}

fn parse_meta(content: &str) -> Meta {
    let mut meta = Meta::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "exitcode" => meta.exit_code = value.parse().ok(),
            "exitsig" => meta.signal = value.parse().ok(),
            "time" => {
                meta.time_ms = value.parse::<f64>().map(|s| (s * 1000.0) as i32).unwrap_or(0)
            }
            "time-wall" => {
                meta.wall_time_ms =
                    value.parse::<f64>().map(|s| (s * 1000.0) as i32).unwrap_or(0)
            }
            "cg-mem" | "max-rss" => {
                if meta.memory_kb == 0 {
                    meta.memory_kb = value.parse().unwrap_or(0);
                }
            }
            "status" => meta.status = Some(value.to_string()),
            "cg-oom-killed" => meta.oom_killed = value == "1",
            _ => {}
        }
    }
    meta
}

impl IsolateSession {
    fn staging_path(&self) -> Result<&Path, SandboxError> {
        self.staging
            .as_ref()
            .map(|t| t.path())
            .ok_or_else(|| SandboxError::Execution("sandbox session already closed".into()))
    }

    async fn init_box(&self) -> Result<PathBuf, SandboxError> {
        let output = Command::new(&self.isolate_bin)
            .arg(format!("--box-id={}", self.box_id))
            .arg("--cg")
            .arg("--init")
            .output()
            .await
            .map_err(|e| {
                SandboxError::Initialization(format!("failed to execute isolate --init: {e}"))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Initialization(format!(
                "isolate --init failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let path_text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path_text.is_empty() {
            return Err(SandboxError::Initialization(
                "isolate --init did not return a box path".into(),
            ));
        }
        Ok(PathBuf::from(path_text))
    }

    async fn cleanup_box(&self) -> Result<(), SandboxError> {
        let output = Command::new(&self.isolate_bin)
            .arg(format!("--box-id={}", self.box_id))
            .arg("--cg")
            .arg("--cleanup")
            .output()
            .await
            .map_err(|e| {
                SandboxError::Execution(format!("failed to execute isolate --cleanup: {e}"))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Execution(format!(
                "isolate --cleanup failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Invoke `isolate --run` and parse the meta file. Isolate exits 0
    /// on success and 1 when the boxed program failed; anything else is
    /// an isolate-internal fault.
    async fn run_boxed(
        &self,
        argv: Vec<String>,
        meta_path: &Path,
        extra_args: Vec<String>,
    ) -> Result<Meta, SandboxError> {
        let mut command = Command::new(&self.isolate_bin);
        command
            .arg(format!("--box-id={}", self.box_id))
            .arg("--cg")
            .arg(format!("--meta={}", meta_path.to_string_lossy()))
            .arg("--stdout=stdout.txt")
            .arg("--stderr=stderr.txt")
            .args(extra_args)
            .arg("--run")
            .arg("--")
            .args(argv);

        let output = command.output().await.map_err(|e| {
            SandboxError::Execution(format!("failed to execute isolate --run: {e}"))
        })?;

        match output.status.code() {
            Some(0) | Some(1) => {
                let content = tokio::fs::read_to_string(meta_path).await.map_err(|e| {
                    SandboxError::Execution(format!("failed to read isolate meta file: {e}"))
                })?;
                Ok(parse_meta(&content))
            }
            _ => Err(SandboxError::Unknown(format!(
                "isolate internal error: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn read_box_file(&self, box_dir: &Path, name: &str) -> String {
        read_capped(&box_dir.join(name), self.output_cap).await
    }
}

/// Read at most `cap` bytes of a file. The cap bounds what enters
/// worker memory, not just what is kept.
async fn read_capped(path: &Path, cap: usize) -> String {
    let Ok(file) = tokio::fs::File::open(path).await else {
        return String::new();
    };
    let mut bytes = Vec::new();
    if file.take(cap as u64).read_to_end(&mut bytes).await.is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Copy the regular files of `from` into `to`.
async fn copy_files(from: &Path, to: &Path) -> Result<(), SandboxError> {
    let mut entries = tokio::fs::read_dir(from)
        .await
        .map_err(|e| SandboxError::Execution(format!("cannot read {}: {e}", from.display())))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SandboxError::Execution(e.to_string()))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| SandboxError::Execution(e.to_string()))?;
        if file_type.is_file() {
            tokio::fs::copy(entry.path(), to.join(entry.file_name()))
                .await
                .map_err(|e| SandboxError::Execution(format!("cannot copy into box: {e}")))?;
        }
    }
    Ok(())
}

#[async_trait]
impl SandboxSession for IsolateSession {
    async fn compile(&mut self, budget_ms: u64) -> Result<Option<CompileOutcome>, SandboxError> {
        let Some(template) = self.language.compile_command.clone() else {
            return Ok(None);
        };

        let staging = self.staging_path()?.to_path_buf();
        let box_root = self.init_box().await?;
        let box_dir = box_root.join("box");
        copy_files(&staging, &box_dir).await?;

        let ctx = CommandContext::for_dir(Path::new("/box"), &self.language);
        let argv = expand_command(&template, &ctx)?;
        let meta_path = staging.join("compile.meta");
        let budget_s = budget_ms as f64 / 1000.0;

        let result = self
            .run_boxed(
                argv,
                &meta_path,
                vec![
                    format!("--wall-time={budget_s:.3}"),
                    "--processes".into(),
                    "--full-env".into(),
                ],
            )
            .await;

        let outcome = match result {
            Ok(meta) => {
                let output = format!(
                    "{}{}",
                    self.read_box_file(&box_dir, "stderr.txt").await,
                    self.read_box_file(&box_dir, "stdout.txt").await,
                );
                let timed_out = meta.status.as_deref() == Some("TO");
                Some(CompileOutcome {
                    success: !timed_out && meta.exit_code == Some(0) && meta.signal.is_none(),
                    output: if timed_out {
                        format!("compile step exceeded the {budget_ms}ms budget")
                    } else {
                        output
                    },
                    time_ms: meta.wall_time_ms,
                    timed_out,
                })
            }
            Err(e) => {
                let _ = self.cleanup_box().await;
                return Err(e);
            }
        };

        // Carry build artifacts back out so each run starts from a
        // clean box seeded with them.
        if outcome.as_ref().is_some_and(|o| o.success) {
            copy_files(&box_dir, &staging).await?;
        }
        self.cleanup_box().await?;

        Ok(outcome)
    }

    async fn run(&mut self, input: &str, limits: &RunLimits) -> Result<RunOutcome, SandboxError> {
        let staging = self.staging_path()?.to_path_buf();
        let box_root = self.init_box().await?;
        let box_dir = box_root.join("box");
        copy_files(&staging, &box_dir).await?;

        tokio::fs::write(box_dir.join("stdin.txt"), input)
            .await
            .map_err(|e| SandboxError::Execution(format!("cannot write stdin file: {e}")))?;

        let ctx = CommandContext::for_dir(Path::new("/box"), &self.language);
        let argv = expand_command(&self.language.run_command, &ctx)?;
        let meta_path = staging.join(format!("run-{}.meta", uuid::Uuid::new_v4()));

        let time_s = limits.time_limit_ms as f64 / 1000.0;
        let wall_s = (limits.time_limit_ms + WALL_GRACE_MS) as f64 / 1000.0;
        let mem_kb = limits.memory_limit_mb * 1024;
        // Caps stdout/stderr on disk; anything past the capture cap is
        // waste, so the program is stopped from producing it at all.
        let fsize_kb = (self.output_cap / 1024).max(1);

        let result = self
            .run_boxed(
                argv,
                &meta_path,
                vec![
                    format!("--time={time_s:.3}"),
                    format!("--wall-time={wall_s:.3}"),
                    format!("--cg-mem={mem_kb}"),
                    format!("--fsize={fsize_kb}"),
                    "--stdin=stdin.txt".into(),
                    "--env=PATH".into(),
                ],
            )
            .await;

        let outcome = match result {
            Ok(meta) => {
                let stdout = self.read_box_file(&box_dir, "stdout.txt").await;
                let stderr = self.read_box_file(&box_dir, "stderr.txt").await;
                let timed_out = meta.status.as_deref() == Some("TO");
                let oom = meta.oom_killed;
                RunOutcome {
                    exit_code: if meta.signal.is_some() {
                        None
                    } else {
                        meta.exit_code.or(Some(0))
                    },
                    stdout,
                    stderr,
                    time_ms: if meta.time_ms > 0 {
                        meta.time_ms
                    } else {
                        meta.wall_time_ms
                    },
                    memory_kb: meta.memory_kb,
                    timed_out,
                    oom,
                }
            }
            Err(e) => {
                let _ = self.cleanup_box().await;
                return Err(e);
            }
        };

        self.cleanup_box().await?;
        Ok(outcome)
    }

    async fn close(&mut self) {
        if let Err(e) = self.cleanup_box().await {
            warn!(box_id = self.box_id, error = %e, "Final isolate cleanup failed");
        }
        if let Some(staging) = self.staging.take() {
            let path = staging.path().to_path_buf();
            if let Err(e) = staging.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove staging dir");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_meta() {
        let meta = parse_meta("time:0.042\ntime-wall:0.051\ncg-mem:10240\nexitcode:0\nstatus:OK\n");
        assert_eq!(meta.exit_code, Some(0));
        assert_eq!(meta.time_ms, 42);
        assert_eq!(meta.memory_kb, 10240);
        assert!(!meta.oom_killed);
    }

    #[test]
    fn parses_oom_and_signal() {
        let meta = parse_meta("time:0.100\nexitsig:9\nstatus:SG\ncg-mem:262144\ncg-oom-killed:1\n");
        assert_eq!(meta.signal, Some(9));
        assert!(meta.oom_killed);
        assert_eq!(meta.status.as_deref(), Some("SG"));
    }

    #[tokio::test]
    async fn box_file_reads_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout.txt");
        tokio::fs::write(&path, "x".repeat(4096)).await.unwrap();

        assert_eq!(read_capped(&path, 16).await.len(), 16);
        assert_eq!(read_capped(&dir.path().join("missing"), 16).await, "");
    }

    #[test]
    fn parses_timeout_meta() {
        let meta = parse_meta("time:2.001\ntime-wall:2.050\nstatus:TO\nmessage:Time limit exceeded\n");
        assert_eq!(meta.status.as_deref(), Some("TO"));
        assert_eq!(meta.time_ms, 2001);
    }
}
