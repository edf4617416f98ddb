mod config;
mod consumer;
mod error;
mod orchestrator;
mod output;
mod publisher;
mod sandbox;

use std::sync::Arc;

use anyhow::Context;
use common::retry::RetryPolicy;
use common::store::MemoryStore;
use mq::MqConfig;
use tracing::{error, info};

use crate::config::{JudgeAppConfig, SandboxKind};
use crate::consumer::ConsumerSettings;
use crate::orchestrator::{JudgeOrchestrator, JudgeSettings};
use crate::publisher::MqStatusPublisher;
use crate::sandbox::{IsolateSandbox, ProcessSandbox, Sandbox};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = JudgeAppConfig::load().context("Failed to load config")?;
    info!("Judge worker starting: {}", config.worker.id);

    let mq = Arc::new(
        mq::connect(&MqConfig {
            url: config.mq.url.clone(),
            pool_size: config.mq.pool_size,
        })
        .await
        .context("Failed to connect to MQ")?,
    );

    info!(
        job_queue = %config.mq.job_queue,
        status_queue = %config.mq.status_queue,
        dlq_queue = %config.mq.dlq_queue,
        max_attempts = config.mq.retry.max_attempts,
        "MQ connected"
    );

    // The standalone worker runs against an in-memory store seeded
    // with the configured language table; production deployments embed
    // the engine as a library and provide their own stores.
    let store = Arc::new(MemoryStore::new());
    for language in &config.languages {
        store.insert_language(language.clone());
    }
    if config.languages.is_empty() {
        error!("No languages configured; every submission will fail as SystemError");
    }

    let sandbox: Arc<dyn Sandbox> = match config.worker.sandbox {
        SandboxKind::Process => Arc::new(ProcessSandbox::new(
            config.worker.scratch_dir.clone(),
            config.worker.output_cap_bytes,
        )),
        SandboxKind::Isolate => Arc::new(IsolateSandbox::new(
            config.worker.isolate_bin.clone(),
            config.worker.output_cap_bytes,
        )),
    };

    let publisher = Arc::new(MqStatusPublisher::new(
        Arc::clone(&mq),
        config.mq.status_queue.clone(),
    ));

    let orchestrator = Arc::new(JudgeOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        sandbox,
        publisher,
        JudgeSettings {
            compile_timeout_ms: config.worker.compile_timeout_ms,
        },
    ));

    let settings = ConsumerSettings {
        concurrency: config.worker.concurrency,
        job_queue: config.mq.job_queue.clone(),
        dlq_queue: config.mq.dlq_queue.clone(),
        retry: RetryPolicy {
            max_attempts: config.mq.retry.max_attempts,
            base_delay_ms: config.mq.retry.base_delay_ms,
            max_delay_ms: config.mq.retry.max_delay_ms,
        },
    };

    if let Err(e) = consumer::run_worker(orchestrator, mq, settings).await {
        error!(error = %e, "Worker stopped unexpectedly");
    }

    Ok(())
}
