use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::logs::ExecutionLogs;
use crate::model::{Language, Problem, Submission};
use crate::status::SubmissionStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("submission {0} not found")]
    SubmissionNotFound(i32),

    #[error("invalid status transition for submission {id}: {from} -> {to}")]
    InvalidTransition {
        id: i32,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error("invalid verdict for submission {id}: {reason}")]
    InvalidVerdict { id: i32, reason: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Terminal result of a judging run, written in one shot.
#[derive(Clone, Debug)]
pub struct VerdictRecord {
    pub status: SubmissionStatus,
    pub points_earned: i32,
    pub test_cases_passed: i32,
    pub total_test_cases: i32,
    /// Maximum execution time across test cases (milliseconds).
    pub time_used: Option<i32>,
    /// Peak memory across test cases (kilobytes).
    pub memory_used: Option<i32>,
    pub error_message: Option<String>,
    pub logs: ExecutionLogs,
}

/// Persistence seam for submissions.
///
/// The hosting application supplies the real implementation; the
/// engine only needs these three operations. Implementations must
/// enforce the lifecycle: no transition out of a terminal status, and
/// a verdict may only carry a terminal status.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get(&self, id: i32) -> Result<Option<Submission>, StoreError>;

    /// Transition a submission to `Running` and persist immediately,
    /// so observers see progress and a crash mid-judging is visible.
    async fn mark_running(&self, id: i32) -> Result<(), StoreError>;

    /// Write the terminal verdict, aggregates and execution logs.
    async fn record_verdict(&self, id: i32, verdict: &VerdictRecord) -> Result<(), StoreError>;
}

/// Read-only problem lookup (limits + ordered test cases).
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get(&self, id: i32) -> Result<Option<Problem>, StoreError>;
}

/// Read-only language toolchain lookup.
#[async_trait]
pub trait LanguageStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Language>, StoreError>;
}

/// In-memory store backing the worker binary and tests.
#[derive(Default)]
pub struct MemoryStore {
    submissions: DashMap<i32, Submission>,
    problems: DashMap<i32, Problem>,
    languages: DashMap<String, Language>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intake: store a submission in `Pending`.
    pub fn create_submission(&self, submission: Submission) {
        self.submissions.insert(submission.id, submission);
    }

    pub fn insert_problem(&self, problem: Problem) {
        self.problems.insert(problem.id, problem);
    }

    pub fn insert_language(&self, language: Language) {
        self.languages.insert(language.id.clone(), language);
    }
}

fn validate_verdict(id: i32, verdict: &VerdictRecord) -> Result<(), StoreError> {
    if !verdict.status.is_terminal() {
        return Err(StoreError::InvalidVerdict {
            id,
            reason: format!("status {} is not terminal", verdict.status),
        });
    }
    if verdict.test_cases_passed > verdict.total_test_cases {
        return Err(StoreError::InvalidVerdict {
            id,
            reason: format!(
                "{} passed out of {} total",
                verdict.test_cases_passed, verdict.total_test_cases
            ),
        });
    }
    Ok(())
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get(&self, id: i32) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.get(&id).map(|s| s.clone()))
    }

    async fn mark_running(&self, id: i32) -> Result<(), StoreError> {
        let mut entry = self
            .submissions
            .get_mut(&id)
            .ok_or(StoreError::SubmissionNotFound(id))?;
        if !entry.status.can_transition_to(SubmissionStatus::Running) {
            return Err(StoreError::InvalidTransition {
                id,
                from: entry.status,
                to: SubmissionStatus::Running,
            });
        }
        entry.status = SubmissionStatus::Running;
        Ok(())
    }

    async fn record_verdict(&self, id: i32, verdict: &VerdictRecord) -> Result<(), StoreError> {
        validate_verdict(id, verdict)?;
        let mut entry = self
            .submissions
            .get_mut(&id)
            .ok_or(StoreError::SubmissionNotFound(id))?;
        if !entry.status.can_transition_to(verdict.status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: entry.status,
                to: verdict.status,
            });
        }
        entry.status = verdict.status;
        entry.points_earned = verdict.points_earned;
        entry.test_cases_passed = verdict.test_cases_passed;
        entry.total_test_cases = verdict.total_test_cases;
        entry.time_used = verdict.time_used;
        entry.memory_used = verdict.memory_used;
        entry.error_message = verdict.error_message.clone();
        entry.logs = Some(verdict.logs.clone());
        Ok(())
    }
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn get(&self, id: i32) -> Result<Option<Problem>, StoreError> {
        Ok(self.problems.get(&id).map(|p| p.clone()))
    }
}

#[async_trait]
impl LanguageStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Language>, StoreError> {
        Ok(self.languages.get(id).map(|l| l.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_submission(id: i32) -> MemoryStore {
        let store = MemoryStore::new();
        store.create_submission(Submission::new(id, 1, 1, "cpp", "int main() {}"));
        store
    }

    fn accepted_verdict() -> VerdictRecord {
        VerdictRecord {
            status: SubmissionStatus::Accepted,
            points_earned: 100,
            test_cases_passed: 3,
            total_test_cases: 3,
            time_used: Some(15),
            memory_used: Some(2048),
            error_message: None,
            logs: ExecutionLogs::default(),
        }
    }

    #[tokio::test]
    async fn running_then_verdict() {
        let store = store_with_submission(1);
        store.mark_running(1).await.unwrap();
        assert_eq!(
            SubmissionStore::get(&store, 1).await.unwrap().unwrap().status,
            SubmissionStatus::Running
        );

        store.record_verdict(1, &accepted_verdict()).await.unwrap();
        let s = SubmissionStore::get(&store, 1).await.unwrap().unwrap();
        assert_eq!(s.status, SubmissionStatus::Accepted);
        assert_eq!(s.points_earned, 100);
        assert!(s.logs.is_some());
    }

    #[tokio::test]
    async fn mark_running_is_idempotent() {
        let store = store_with_submission(1);
        store.mark_running(1).await.unwrap();
        store.mark_running(1).await.unwrap();
        store.record_verdict(1, &accepted_verdict()).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_submissions_are_immutable() {
        let store = store_with_submission(1);
        store.mark_running(1).await.unwrap();
        store.record_verdict(1, &accepted_verdict()).await.unwrap();

        assert!(matches!(
            store.mark_running(1).await,
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.record_verdict(1, &accepted_verdict()).await,
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn verdict_must_be_terminal_and_consistent() {
        let store = store_with_submission(1);
        store.mark_running(1).await.unwrap();

        let mut bad = accepted_verdict();
        bad.status = SubmissionStatus::Running;
        assert!(matches!(
            store.record_verdict(1, &bad).await,
            Err(StoreError::InvalidVerdict { .. })
        ));

        let mut bad = accepted_verdict();
        bad.test_cases_passed = 4;
        assert!(matches!(
            store.record_verdict(1, &bad).await,
            Err(StoreError::InvalidVerdict { .. })
        ));
    }

    #[tokio::test]
    async fn missing_submission_is_reported() {
        let store = MemoryStore::new();
        assert!(SubmissionStore::get(&store, 9).await.unwrap().is_none());
        assert!(matches!(
            store.mark_running(9).await,
            Err(StoreError::SubmissionNotFound(9))
        ));
    }
}
