use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::SubmissionStatus;

/// Result of running one test case.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCaseRun {
    pub test_case_id: i32,
    /// Per-test-case outcome; one of the terminal verdict values.
    pub status: SubmissionStatus,
    /// Points awarded (the test case's weight when it passed, else 0).
    pub score: i32,
    pub time_used_ms: i32,
    pub memory_used_kb: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Expected output, recorded only when the run was not accepted.
    pub expected_output: Option<String>,
    /// Actual output, recorded only when the run was not accepted.
    pub actual_output: Option<String>,
    pub is_sample: bool,
}

impl TestCaseRun {
    pub fn passed(&self) -> bool {
        self.status.is_accepted()
    }
}

/// The complete, replayable record of a judging run.
///
/// Everything a consumer needs to explain a verdict lives here: the
/// compile step, every executed test case in order, and the aggregate
/// figures the submission row carries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionLogs {
    /// Compiler diagnostics (stdout + stderr), when a compile step ran.
    pub compile_output: Option<String>,
    pub compile_time_ms: Option<i32>,
    /// Per-test-case results, in judging order. Test cases after the
    /// first failure are absent (early-exit policy).
    pub test_case_runs: Vec<TestCaseRun>,
    /// Sum of execution time over all executed test cases.
    pub total_time_ms: i32,
    /// Peak memory over all executed test cases.
    pub peak_memory_kb: i32,
    pub judged_at: Option<DateTime<Utc>>,
}

impl ExecutionLogs {
    pub fn record(&mut self, run: TestCaseRun) {
        self.total_time_ms += run.time_used_ms;
        self.peak_memory_kb = self.peak_memory_kb.max(run.memory_used_kb);
        self.test_case_runs.push(run);
    }

    pub fn passed_count(&self) -> i32 {
        self.test_case_runs.iter().filter(|r| r.passed()).count() as i32
    }

    pub fn points_earned(&self) -> i32 {
        self.test_case_runs.iter().map(|r| r.score).sum()
    }

    /// Maximum single-test-case execution time, for the submission row.
    pub fn max_time_ms(&self) -> i32 {
        self.test_case_runs
            .iter()
            .map(|r| r.time_used_ms)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(id: i32, status: SubmissionStatus, score: i32, time: i32, mem: i32) -> TestCaseRun {
        TestCaseRun {
            test_case_id: id,
            status,
            score,
            time_used_ms: time,
            memory_used_kb: mem,
            stdout: None,
            stderr: None,
            expected_output: None,
            actual_output: None,
            is_sample: false,
        }
    }

    #[test]
    fn aggregates_follow_recorded_runs() {
        let mut logs = ExecutionLogs::default();
        logs.record(run(1, SubmissionStatus::Accepted, 30, 12, 1024));
        logs.record(run(2, SubmissionStatus::Accepted, 30, 48, 4096));
        logs.record(run(3, SubmissionStatus::WrongAnswer, 0, 20, 2048));

        assert_eq!(logs.passed_count(), 2);
        assert_eq!(logs.points_earned(), 60);
        assert_eq!(logs.total_time_ms, 80);
        assert_eq!(logs.max_time_ms(), 48);
        assert_eq!(logs.peak_memory_kb, 4096);
    }

    #[test]
    fn logs_serialize_roundtrip() {
        let mut logs = ExecutionLogs::default();
        logs.compile_output = Some("warning: unused variable".into());
        logs.compile_time_ms = Some(310);
        logs.record(run(1, SubmissionStatus::Accepted, 50, 9, 512));
        logs.judged_at = Some(Utc::now());

        let json = serde_json::to_string(&logs).unwrap();
        let back: ExecutionLogs = serde_json::from_str(&json).unwrap();
        assert_eq!(back.test_case_runs.len(), 1);
        assert_eq!(back.points_earned(), 50);
        assert_eq!(back.compile_time_ms, Some(310));
    }
}
