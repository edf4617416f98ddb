use std::path::PathBuf;

use common::config::MqSettings;
use common::model::Language;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Which sandbox implementation the worker runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    /// Plain-process runner; development and tests only.
    Process,
    /// Isolate-backed runner for production.
    Isolate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Unique identifier for this worker instance. Default: "worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Submissions judged in parallel. Default: 4.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_sandbox_kind")]
    pub sandbox: SandboxKind,
    /// Isolate executable path. Default: "isolate".
    #[serde(default = "default_isolate_bin")]
    pub isolate_bin: String,
    /// Scratch root for the process sandbox. Default: "/tmp/gavel".
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Compile budget in milliseconds. Default: 10000.
    #[serde(default = "default_compile_timeout_ms")]
    pub compile_timeout_ms: u64,
    /// Cap on captured stdout/stderr bytes. Default: 1 MiB.
    #[serde(default = "default_output_cap_bytes")]
    pub output_cap_bytes: usize,
}

fn default_worker_id() -> String {
    "worker-1".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_sandbox_kind() -> SandboxKind {
    SandboxKind::Process
}
fn default_isolate_bin() -> String {
    "isolate".into()
}
fn default_scratch_dir() -> PathBuf {
    "/tmp/gavel".into()
}
fn default_compile_timeout_ms() -> u64 {
    10_000
}
fn default_output_cap_bytes() -> usize {
    1024 * 1024
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            concurrency: default_concurrency(),
            sandbox: default_sandbox_kind(),
            isolate_bin: default_isolate_bin(),
            scratch_dir: default_scratch_dir(),
            compile_timeout_ms: default_compile_timeout_ms(),
            output_cap_bytes: default_output_cap_bytes(),
        }
    }
}

/// Worker application configuration: defaults, then an optional TOML
/// file, then `GAVEL__`-prefixed environment overrides.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct JudgeAppConfig {
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub mq: MqSettings,
    /// Language toolchain table, injected rather than hard-coded.
    #[serde(default)]
    pub languages: Vec<Language>,
}

impl JudgeAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GAVEL_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("GAVEL").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = JudgeAppConfig::default();
        assert_eq!(cfg.worker.concurrency, 4);
        assert_eq!(cfg.worker.sandbox, SandboxKind::Process);
        assert_eq!(cfg.mq.job_queue, "judge_jobs");
        assert!(cfg.languages.is_empty());
    }

    #[test]
    fn languages_parse_from_toml() {
        let cfg: JudgeAppConfig = toml_str(
            r#"
            [[languages]]
            id = "cpp"
            compile_command = "g++ -O2 -o {exe} {source}"
            run_command = "{exe}"
            file_extension = "cpp"

            [[languages]]
            id = "python"
            run_command = "python3 {source}"
            file_extension = "py"
            "#,
        );
        assert_eq!(cfg.languages.len(), 2);
        assert!(cfg.languages[0].compile_command.is_some());
        assert!(cfg.languages[1].compile_command.is_none());
    }

    fn toml_str(raw: &str) -> JudgeAppConfig {
        Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
