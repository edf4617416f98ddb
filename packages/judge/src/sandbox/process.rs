//! Plain-process sandbox: `tokio::process` with a wall-clock kill,
//! an address-space rlimit and peak-RSS sampling. No namespace or
//! network isolation, so this runner is for development and tests;
//! production deployments use the isolate-backed runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::Language;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use super::{
    CommandContext, CompileOutcome, RunLimits, RunOutcome, Sandbox, SandboxError, SandboxSession,
    expand_command,
};

pub struct ProcessSandbox {
    scratch_root: PathBuf,
    output_cap: usize,
}

impl ProcessSandbox {
    pub fn new(scratch_root: impl Into<PathBuf>, output_cap: usize) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            output_cap,
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn start(
        &self,
        language: &Language,
        source_code: &str,
    ) -> Result<Box<dyn SandboxSession>, SandboxError> {
        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(|e| {
                SandboxError::Initialization(format!(
                    "cannot create scratch root {}: {e}",
                    self.scratch_root.display()
                ))
            })?;

        let scratch = tempfile::Builder::new()
            .prefix("gavel-")
            .tempdir_in(&self.scratch_root)
            .map_err(|e| SandboxError::Initialization(format!("cannot create scratch dir: {e}")))?;

        let source_path = scratch.path().join(language.source_filename());
        tokio::fs::write(&source_path, source_code)
            .await
            .map_err(|e| {
                SandboxError::Initialization(format!(
                    "cannot write source file {}: {e}",
                    source_path.display()
                ))
            })?;

        Ok(Box::new(ProcessSession {
            language: language.clone(),
            scratch: Some(scratch),
            output_cap: self.output_cap,
            run_seq: 0,
        }))
    }
}

struct ProcessSession {
    language: Language,
    scratch: Option<TempDir>,
    output_cap: usize,
    run_seq: u32,
}

impl ProcessSession {
    fn dir(&self) -> Result<&Path, SandboxError> {
        self.scratch
            .as_ref()
            .map(|t| t.path())
            .ok_or_else(|| SandboxError::Execution("sandbox session already closed".into()))
    }
}

#[async_trait]
impl SandboxSession for ProcessSession {
    async fn compile(&mut self, budget_ms: u64) -> Result<Option<CompileOutcome>, SandboxError> {
        let Some(template) = self.language.compile_command.clone() else {
            return Ok(None);
        };

        let dir = self.dir()?.to_path_buf();
        let ctx = CommandContext::for_dir(&dir, &self.language);
        let argv = expand_command(&template, &ctx)?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            SandboxError::Initialization(format!("cannot spawn compiler '{}': {e}", argv[0]))
        })?;

        let stdout_task = spawn_capped_reader(child.stdout.take(), self.output_cap);
        let stderr_task = spawn_capped_reader(child.stderr.take(), self.output_cap);

        let status = match timeout(Duration::from_millis(budget_ms), child.wait()).await {
            Ok(res) => Some(
                res.map_err(|e| SandboxError::Execution(format!("compiler wait failed: {e}")))?,
            ),
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        let time_ms = started.elapsed().as_millis() as i32;
        let stdout = stdout_task.await;
        let stderr = stderr_task.await;

        Ok(Some(match status {
            Some(st) => CompileOutcome {
                success: st.success(),
                output: format!("{stderr}{stdout}"),
                time_ms,
                timed_out: false,
            },
            None => CompileOutcome {
                success: false,
                output: format!("compile step exceeded the {budget_ms}ms budget"),
                time_ms,
                timed_out: true,
            },
        }))
    }

    async fn run(&mut self, input: &str, limits: &RunLimits) -> Result<RunOutcome, SandboxError> {
        self.run_seq += 1;
        let base = self.dir()?.to_path_buf();

        // Fresh working directory per run, seeded with the source and
        // build artifacts, so one test case's writes never reach the next.
        let work = base.join(format!("run-{}", self.run_seq));
        tokio::fs::create_dir(&work)
            .await
            .map_err(|e| SandboxError::Initialization(format!("cannot create run dir: {e}")))?;
        seed_dir(&base, &work).await?;

        let ctx = CommandContext::for_dir(&work, &self.language);
        let argv = expand_command(&self.language.run_command, &ctx)?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&work)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let mem_bytes = limits.memory_limit_mb.saturating_mul(1024 * 1024);
            unsafe {
                cmd.pre_exec(move || apply_rlimits(mem_bytes));
            }
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            SandboxError::Execution(format!("cannot spawn program '{}': {e}", argv[0]))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let bytes = input.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = stdin.write_all(&bytes).await;
            });
        }

        let stdout_task = spawn_capped_reader(child.stdout.take(), self.output_cap);
        let stderr_task = spawn_capped_reader(child.stderr.take(), self.output_cap);

        let peak_kb = Arc::new(AtomicI64::new(0));
        let monitor = child.id().map(|pid| {
            let peak_kb = Arc::clone(&peak_kb);
            tokio::spawn(sample_peak_rss(pid, peak_kb))
        });

        let mut timed_out = false;
        let status = match timeout(Duration::from_millis(limits.time_limit_ms), child.wait()).await
        {
            Ok(res) => {
                Some(res.map_err(|e| SandboxError::Execution(format!("wait failed: {e}")))?)
            }
            Err(_) => {
                timed_out = true;
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        let time_ms = started.elapsed().as_millis() as i32;
        if let Some(handle) = monitor {
            handle.abort();
        }

        let stdout = stdout_task.await;
        let stderr = stderr_task.await;

        let exit_code = status.and_then(|st| st.code());
        let memory_kb = peak_kb.load(Ordering::SeqCst) as i32;
        let limit_kb = (limits.memory_limit_mb * 1024) as i32;
        // The rlimit turns a breach into an abnormal exit; the sampled
        // peak distinguishes OOM from an ordinary crash. Blind spot:
        // RLIMIT_AS caps address space while VmHWM tracks resident
        // pages, so an allocation failure whose RSS stayed low reads
        // as RuntimeError. The isolate runner reports OOM exactly.
        let failed = timed_out || exit_code != Some(0);
        let oom = !timed_out && failed && memory_kb >= limit_kb;

        Ok(RunOutcome {
            exit_code,
            stdout,
            stderr,
            time_ms,
            memory_kb,
            timed_out,
            oom,
        })
    }

    async fn close(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove scratch dir");
            }
        }
    }
}

/// Copy the regular files of `from` into `to` (source + build output;
/// scratch layouts are flat).
async fn seed_dir(from: &Path, to: &Path) -> Result<(), SandboxError> {
    let mut entries = tokio::fs::read_dir(from)
        .await
        .map_err(|e| SandboxError::Execution(format!("cannot read scratch dir: {e}")))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SandboxError::Execution(format!("cannot read scratch dir: {e}")))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| SandboxError::Execution(e.to_string()))?;
        if file_type.is_file() {
            tokio::fs::copy(entry.path(), to.join(entry.file_name()))
                .await
                .map_err(|e| SandboxError::Execution(format!("cannot seed run dir: {e}")))?;
        }
    }
    Ok(())
}

/// Read a stream up to `cap` bytes, draining the rest so the child
/// never blocks on a full pipe.
fn spawn_capped_reader<R>(
    reader: Option<R>,
    cap: usize,
) -> impl std::future::Future<Output = String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let handle = reader.map(|mut r| {
        tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                match r.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if buf.len() < cap {
                            let take = n.min(cap - buf.len());
                            buf.extend_from_slice(&chunk[..take]);
                        }
                    }
                }
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    });
    async move {
        match handle {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

/// Poll `VmHWM` until the process exits. On platforms without procfs
/// the first read fails and the peak stays at zero.
async fn sample_peak_rss(pid: u32, peak_kb: Arc<AtomicI64>) {
    let path = format!("/proc/{pid}/status");
    loop {
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                if let Some(kb) = parse_vm_hwm(&text) {
                    peak_kb.fetch_max(kb, Ordering::SeqCst);
                }
            }
            Err(_) => break,
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn parse_vm_hwm(status: &str) -> Option<i64> {
    status
        .lines()
        .find(|l| l.starts_with("VmHWM:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

#[cfg(unix)]
fn apply_rlimits(mem_bytes: u64) -> std::io::Result<()> {
    unsafe {
        let mem = libc::rlimit {
            rlim_cur: mem_bytes as libc::rlim_t,
            rlim_max: mem_bytes as libc::rlim_t,
        };
        if libc::setrlimit(libc::RLIMIT_AS, &mem) != 0 {
            return Err(std::io::Error::last_os_error());
        }

        // no core dumps from sandboxed code
        let core = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::setrlimit(libc::RLIMIT_CORE, &core) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
