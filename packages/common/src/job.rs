use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A judging job on the work queue.
///
/// The payload is thin: the worker re-reads the
/// submission, problem and language through its stores, so a job can
/// never go stale while it waits in the queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeJob {
    /// Job identifier (UUID).
    pub job_id: String,
    /// Submission to judge.
    pub submission_id: i32,
    pub enqueued_at: DateTime<Utc>,
}

impl JudgeJob {
    pub fn new(submission_id: i32) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            submission_id,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_get_unique_ids() {
        let a = JudgeJob::new(1);
        let b = JudgeJob::new(1);
        assert_ne!(a.job_id, b.job_id);
        assert_eq!(a.submission_id, b.submission_id);
    }
}
