//! Worker loop: dequeue judge jobs at bounded concurrency, invoke the
//! orchestrator, retry queue-level failures with backoff, dead-letter
//! what cannot be processed.
//!
//! Retries are reserved for infrastructure faults (the orchestrator
//! could not record a verdict). Any cleanly recorded verdict,
//! `SystemError` included, completes the job.

use std::future::Future;
use std::sync::Arc;

use common::dlq::{DlqEnvelope, DlqErrorCode};
use common::job::JudgeJob;
use common::retry::{RetryAttempt, RetryPolicy};
use mq::{BroccoliError, BrokerMessage, Mq};
use tracing::{error, info, warn};

use crate::error::JudgeError;
use crate::orchestrator::JudgeOrchestrator;

#[derive(Clone)]
pub struct ConsumerSettings {
    /// Maximum submissions judged in parallel by this worker.
    pub concurrency: usize,
    pub job_queue: String,
    pub dlq_queue: String,
    pub retry: RetryPolicy,
}

/// Consume the job queue until the broker connection fails.
pub async fn run_worker(
    orchestrator: Arc<JudgeOrchestrator>,
    mq: Arc<Mq>,
    settings: ConsumerSettings,
) -> Result<(), BroccoliError> {
    info!(
        queue = %settings.job_queue,
        concurrency = settings.concurrency,
        max_attempts = settings.retry.max_attempts,
        "Worker consuming judge jobs"
    );

    let job_queue = settings.job_queue.clone();
    let concurrency = settings.concurrency;
    let mq_for_handler = Arc::clone(&mq);
    mq.process_messages(
        &job_queue,
        Some(concurrency),
        None,
        move |message: BrokerMessage<serde_json::Value>| {
            let orchestrator = Arc::clone(&orchestrator);
            let mq = Arc::clone(&mq_for_handler);
            let settings = settings.clone();
            async move { process_message(message.payload, &orchestrator, &mq, &settings).await }
        },
    )
    .await
}

async fn process_message(
    payload: serde_json::Value,
    orchestrator: &Arc<JudgeOrchestrator>,
    mq: &Arc<Mq>,
    settings: &ConsumerSettings,
) -> Result<(), BroccoliError> {
    let job: JudgeJob = match serde_json::from_value(payload.clone()) {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "Failed to parse JudgeJob, dead-lettering");
            let envelope = DlqEnvelope {
                message_id: payload
                    .get("job_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                submission_id: payload
                    .get("submission_id")
                    .and_then(|v| v.as_i64())
                    .map(|v| v as i32),
                payload,
                error_code: DlqErrorCode::DeserializationError,
                error_message: format!("failed to parse JudgeJob: {e}"),
                retry_history: vec![],
            };
            return dead_letter(mq, &settings.dlq_queue, envelope).await;
        }
    };

    info!(
        submission_id = job.submission_id,
        job_id = %job.job_id,
        "Processing judge job"
    );

    let result = judge_with_retries(&job, &settings.retry, || {
        let orchestrator = Arc::clone(orchestrator);
        let submission_id = job.submission_id;
        async move { orchestrator.judge(submission_id).await }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(history) => {
            let last_error = history
                .last()
                .map(|a| a.error.clone())
                .unwrap_or_default();
            error!(
                submission_id = job.submission_id,
                job_id = %job.job_id,
                attempts = history.len(),
                error = %last_error,
                "Retries exhausted, dead-lettering job"
            );
            let envelope = DlqEnvelope {
                message_id: job.job_id.clone(),
                submission_id: Some(job.submission_id),
                payload: serde_json::to_value(&job).unwrap_or_default(),
                error_code: DlqErrorCode::MaxRetriesExceeded,
                error_message: last_error,
                retry_history: history,
            };
            dead_letter(mq, &settings.dlq_queue, envelope).await
        }
    }
}

/// Run `attempt` until it succeeds or the policy is exhausted,
/// sleeping the backoff delay between attempts. `Err` carries the
/// attempt history for the DLQ envelope.
pub async fn judge_with_retries<F, Fut>(
    job: &JudgeJob,
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<(), Vec<RetryAttempt>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), JudgeError>>,
{
    let mut history: Vec<RetryAttempt> = Vec::new();
    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let failure = history.len() as u8 + 1;
                history.push(RetryAttempt::new(failure, e.to_string()));

                if !policy.allows(failure) {
                    return Err(history);
                }

                let delay = policy.delay_for(failure);
                warn!(
                    submission_id = job.submission_id,
                    job_id = %job.job_id,
                    attempt = failure,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying judge job"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn dead_letter(
    mq: &Arc<Mq>,
    dlq_queue: &str,
    envelope: DlqEnvelope,
) -> Result<(), BroccoliError> {
    mq.publish(dlq_queue, None, &envelope, None)
        .await
        .map(|_| ())
        .map_err(|e| BroccoliError::Publish(format!("failed to publish to DLQ: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn success_is_not_retried() {
        let job = JudgeJob::new(1);
        let calls = AtomicU32::new(0);

        let result = judge_with_retries(&job, &fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn infra_failure_is_retried_then_exhausted() {
        let job = JudgeJob::new(1);
        let calls = AtomicU32::new(0);

        let result = judge_with_retries(&job, &fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(JudgeError::Mq("broker unreachable".into())) }
        })
        .await;

        let history = result.unwrap_err();
        // initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].attempt, 1);
        assert_eq!(history[2].attempt, 3);
    }

    #[tokio::test]
    async fn transient_failure_recovers() {
        let job = JudgeJob::new(1);
        let calls = AtomicU32::new(0);

        let result = judge_with_retries(&job, &fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(JudgeError::Mq("transient".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
