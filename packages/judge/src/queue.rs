use std::sync::Arc;

use common::job::JudgeJob;
use mq::Mq;
use tracing::info;

use crate::error::JudgeError;

/// Producer side of the job queue: intake creates the submission in
/// `Pending`, then hands its id here. The synchronous fallback is
/// `JudgeOrchestrator::judge` called directly; both paths run the
/// identical pipeline.
pub struct JudgeQueue {
    mq: Arc<Mq>,
    queue: String,
}

impl JudgeQueue {
    pub fn new(mq: Arc<Mq>, queue: impl Into<String>) -> Self {
        Self {
            mq,
            queue: queue.into(),
        }
    }

    /// Enqueue a judging job for the submission. Returns the job id.
    pub async fn enqueue(&self, submission_id: i32) -> Result<String, JudgeError> {
        let job = JudgeJob::new(submission_id);
        self.mq
            .publish(&self.queue, None, &job, None)
            .await
            .map_err(|e| JudgeError::Mq(format!("failed to enqueue judge job: {e}")))?;

        info!(submission_id, job_id = %job.job_id, "Enqueued judge job");
        Ok(job.job_id)
    }
}
