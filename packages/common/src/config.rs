use serde::Deserialize;

/// Queue settings shared by producers and the worker.
#[derive(Debug, Deserialize, Clone)]
pub struct MqSettings {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue for judge jobs. Default: "judge_jobs".
    #[serde(default = "default_job_queue")]
    pub job_queue: String,
    /// Queue for status updates. Default: "judge_status".
    #[serde(default = "default_status_queue")]
    pub status_queue: String,
    /// Queue for dead-lettered jobs. Default: "judge_dlq".
    #[serde(default = "default_dlq_queue")]
    pub dlq_queue: String,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Retry settings for queue-level failures.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    /// Retries before a job is dead-lettered. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_job_queue() -> String {
    "judge_jobs".into()
}
fn default_status_queue() -> String {
    "judge_status".into()
}
fn default_dlq_queue() -> String {
    "judge_dlq".into()
}
fn default_max_attempts() -> u8 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for MqSettings {
    fn default() -> Self {
        Self {
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            job_queue: default_job_queue(),
            status_queue: default_status_queue(),
            dlq_queue: default_dlq_queue(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
