use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Submission;
use crate::status::SubmissionStatus;

/// A status transition pushed to anyone tracking a submission.
///
/// Best-effort delivery: the persisted submission row is the source of
/// truth, this event is a latency optimization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub update_id: String,
    pub submission_id: i32,
    pub status: SubmissionStatus,
    pub execution_time_ms: Option<i32>,
    pub memory_used_kb: Option<i32>,
    pub test_cases_passed: Option<i32>,
    pub total_test_cases: Option<i32>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    /// A bare transition with no result figures yet (e.g. `Running`).
    pub fn transition(submission_id: i32, status: SubmissionStatus) -> Self {
        Self {
            update_id: Uuid::new_v4().to_string(),
            submission_id,
            status,
            execution_time_ms: None,
            memory_used_kb: None,
            test_cases_passed: None,
            total_test_cases: None,
            error_message: None,
        }
    }

    /// The final update carrying the verdict figures.
    pub fn from_submission(submission: &Submission) -> Self {
        Self {
            update_id: Uuid::new_v4().to_string(),
            submission_id: submission.id,
            status: submission.status,
            execution_time_ms: submission.time_used,
            memory_used_kb: submission.memory_used,
            test_cases_passed: Some(submission.test_cases_passed),
            total_test_cases: Some(submission.total_test_cases),
            error_message: submission.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_update_has_no_figures() {
        let u = StatusUpdate::transition(5, SubmissionStatus::Running);
        assert_eq!(u.submission_id, 5);
        assert_eq!(u.status, SubmissionStatus::Running);
        assert!(u.test_cases_passed.is_none());
        assert!(u.error_message.is_none());
    }
}
