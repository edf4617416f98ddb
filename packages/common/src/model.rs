use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logs::ExecutionLogs;
use crate::status::SubmissionStatus;

/// A request to judge a piece of source code against a problem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub id: i32,
    pub user_id: i32,
    pub problem_id: i32,
    /// Language identifier, resolved through the language store.
    pub language: String,
    pub source_code: String,
    pub status: SubmissionStatus,
    /// Maximum execution time across all test cases (milliseconds).
    pub time_used: Option<i32>,
    /// Peak memory across all test cases (kilobytes).
    pub memory_used: Option<i32>,
    /// Sum of the score weights of the test cases that passed.
    pub points_earned: i32,
    pub test_cases_passed: i32,
    pub total_test_cases: i32,
    /// Human-readable explanation for any non-accepted verdict.
    pub error_message: Option<String>,
    /// Complete, replayable record of the judging run.
    pub logs: Option<ExecutionLogs>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// A fresh submission awaiting judging.
    pub fn new(id: i32, user_id: i32, problem_id: i32, language: &str, source_code: &str) -> Self {
        Self {
            id,
            user_id,
            problem_id,
            language: language.to_string(),
            source_code: source_code.to_string(),
            status: SubmissionStatus::Pending,
            time_used: None,
            memory_used: None,
            points_earned: 0,
            test_cases_passed: 0,
            total_test_cases: 0,
            error_message: None,
            logs: None,
            created_at: Utc::now(),
        }
    }
}

/// Problem metadata the judge needs: resource limits and test data.
///
/// Read-only to the engine; supplied by the hosting application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub id: i32,
    /// Per-test-case execution budget in milliseconds.
    pub time_limit_ms: i32,
    /// Memory ceiling in megabytes.
    pub memory_limit_mb: i32,
    /// Test cases in judging order.
    pub test_cases: Vec<TestCase>,
}

/// One (input, expected output, weight) triple.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i32,
    pub input: String,
    pub expected_output: String,
    /// Score weight awarded when this test case passes.
    pub score: i32,
    /// Sample test cases are visible to the submitter.
    #[serde(default)]
    pub is_sample: bool,
    /// Hidden test cases never expose their data in submitter-facing views.
    #[serde(default)]
    pub is_hidden: bool,
}

/// Toolchain descriptor for one language.
///
/// Compile and run commands are templates with `{source}`, `{dir}` and
/// `{exe}` placeholders, so the set of supported languages is
/// configuration rather than code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Language {
    /// Language identifier (e.g. "cpp", "python").
    pub id: String,
    /// Sandbox image or runtime identifier, when the sandbox needs one.
    #[serde(default)]
    pub image: Option<String>,
    /// Compile command template. `None` for interpreted languages.
    #[serde(default)]
    pub compile_command: Option<String>,
    /// Run command template.
    pub run_command: String,
    /// Source file extension without the dot (e.g. "cpp").
    pub file_extension: String,
}

impl Language {
    /// Filename the source blob is materialized as inside the sandbox.
    pub fn source_filename(&self) -> String {
        format!("main.{}", self.file_extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_submission_is_pending() {
        let s = Submission::new(1, 7, 42, "cpp", "int main() {}");
        assert_eq!(s.status, SubmissionStatus::Pending);
        assert_eq!(s.points_earned, 0);
        assert!(s.logs.is_none());
    }

    #[test]
    fn source_filename_uses_extension() {
        let lang = Language {
            id: "python".into(),
            image: None,
            compile_command: None,
            run_command: "python3 {source}".into(),
            file_extension: "py".into(),
        };
        assert_eq!(lang.source_filename(), "main.py");
    }
}
