//! Per-submission judging pipeline: resolve metadata, compile, run
//! each test case through the sandbox in problem order, classify,
//! aggregate and persist the verdict.

use std::sync::Arc;

use chrono::Utc;
use common::logs::{ExecutionLogs, TestCaseRun};
use common::model::{Problem, TestCase};
use common::status::SubmissionStatus;
use common::store::{LanguageStore, ProblemStore, SubmissionStore, VerdictRecord};
use common::update::StatusUpdate;
use tracing::{error, info, instrument, warn};

use crate::error::JudgeError;
use crate::output::outputs_match;
use crate::publisher::StatusPublisher;
use crate::sandbox::{RunLimits, Sandbox, SandboxSession};

#[derive(Clone, Copy, Debug)]
pub struct JudgeSettings {
    /// Budget for the compile step, separate from (and typically
    /// shorter than) the per-test-case execution budget.
    pub compile_timeout_ms: u64,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            compile_timeout_ms: 10_000,
        }
    }
}

pub struct JudgeOrchestrator {
    submissions: Arc<dyn SubmissionStore>,
    problems: Arc<dyn ProblemStore>,
    languages: Arc<dyn LanguageStore>,
    sandbox: Arc<dyn Sandbox>,
    publisher: Arc<dyn StatusPublisher>,
    settings: JudgeSettings,
}

impl JudgeOrchestrator {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        problems: Arc<dyn ProblemStore>,
        languages: Arc<dyn LanguageStore>,
        sandbox: Arc<dyn Sandbox>,
        publisher: Arc<dyn StatusPublisher>,
        settings: JudgeSettings,
    ) -> Self {
        Self {
            submissions,
            problems,
            languages,
            sandbox,
            publisher,
            settings,
        }
    }

    /// Judge one submission end to end.
    ///
    /// Every outcome the submitter can cause, including an internal
    /// fault reported cleanly as `SystemError`, is recorded on the
    /// submission and returns `Ok`. `Err` means the verdict could not
    /// be recorded at all, which is the queue's cue to retry.
    #[instrument(skip(self))]
    pub async fn judge(&self, submission_id: i32) -> Result<(), JudgeError> {
        let submission = self
            .submissions
            .get(submission_id)
            .await?
            .ok_or(JudgeError::MissingSubmission(submission_id))?;

        if submission.status.is_terminal() {
            info!(status = %submission.status, "Submission already judged, skipping");
            return Ok(());
        }

        // Resolve collaborators up front; missing data fails fast into
        // SystemError instead of leaving the submission stuck.
        let problem = self.problems.get(submission.problem_id).await?;
        let language = self.languages.get(&submission.language).await?;

        let Some(problem) = problem else {
            return self
                .record_system_error(
                    submission_id,
                    ExecutionLogs::default(),
                    0,
                    format!("problem {} not found", submission.problem_id),
                )
                .await;
        };
        let Some(language) = language else {
            return self
                .record_system_error(
                    submission_id,
                    ExecutionLogs::default(),
                    0,
                    format!("language '{}' not configured", submission.language),
                )
                .await;
        };
        if problem.test_cases.is_empty() {
            return self
                .record_system_error(
                    submission_id,
                    ExecutionLogs::default(),
                    0,
                    format!("problem {} has no test cases", problem.id),
                )
                .await;
        }

        self.submissions.mark_running(submission_id).await?;
        self.publisher
            .publish(StatusUpdate::transition(
                submission_id,
                SubmissionStatus::Running,
            ))
            .await;

        let total = problem.test_cases.len() as i32;
        let mut session = match self.sandbox.start(&language, &submission.source_code).await {
            Ok(s) => s,
            Err(e) => {
                return self
                    .record_system_error(
                        submission_id,
                        ExecutionLogs::default(),
                        total,
                        format!("failed to start sandbox: {e}"),
                    )
                    .await;
            }
        };

        let pipeline = self.run_pipeline(session.as_mut(), &problem).await;
        session.close().await;

        let verdict = match pipeline {
            Ok(verdict) => verdict,
            Err((logs, message)) => {
                return self
                    .record_system_error(submission_id, logs, total, message)
                    .await;
            }
        };

        info!(
            status = %verdict.status,
            score = verdict.points_earned,
            passed = verdict.test_cases_passed,
            total = verdict.total_test_cases,
            time_ms = ?verdict.time_used,
            memory_kb = ?verdict.memory_used,
            "Judging complete"
        );

        self.finish(submission_id, verdict).await
    }

    /// Compile and run test cases; `Err` carries the partial logs of an
    /// infrastructure fault.
    async fn run_pipeline(
        &self,
        session: &mut dyn SandboxSession,
        problem: &Problem,
    ) -> Result<VerdictRecord, (ExecutionLogs, String)> {
        let mut logs = ExecutionLogs::default();
        let total = problem.test_cases.len() as i32;

        match session.compile(self.settings.compile_timeout_ms).await {
            Ok(None) => {}
            Ok(Some(outcome)) => {
                logs.compile_output = Some(outcome.output.clone());
                logs.compile_time_ms = Some(outcome.time_ms);
                if !outcome.success {
                    logs.judged_at = Some(Utc::now());
                    let message = if outcome.timed_out {
                        "Compilation timed out".to_string()
                    } else {
                        "Compilation failed".to_string()
                    };
                    return Ok(VerdictRecord {
                        status: SubmissionStatus::CompilationError,
                        points_earned: 0,
                        test_cases_passed: 0,
                        total_test_cases: total,
                        time_used: None,
                        memory_used: None,
                        error_message: Some(message),
                        logs,
                    });
                }
            }
            Err(e) => return Err((logs, format!("sandbox failure during compile: {e}"))),
        }

        let limits = RunLimits {
            time_limit_ms: problem.time_limit_ms as u64,
            memory_limit_mb: problem.memory_limit_mb as u64,
        };

        let mut overall = SubmissionStatus::Accepted;
        let mut failed_position = None;

        // Strictly sequential, in problem order; the first failure
        // decides the verdict and stops the run.
        for (position, test_case) in problem.test_cases.iter().enumerate() {
            let outcome = match session.run(&test_case.input, &limits).await {
                Ok(o) => o,
                Err(e) => {
                    return Err((
                        logs,
                        format!(
                            "sandbox failure on test case {}: {e}",
                            position + 1
                        ),
                    ));
                }
            };

            let status = if outcome.timed_out {
                SubmissionStatus::TimeLimitExceeded
            } else if outcome.oom {
                SubmissionStatus::MemoryLimitExceeded
            } else if outcome.exit_code != Some(0) {
                SubmissionStatus::RuntimeError
            } else if outputs_match(&outcome.stdout, &test_case.expected_output) {
                SubmissionStatus::Accepted
            } else {
                SubmissionStatus::WrongAnswer
            };

            let passed = status.is_accepted();
            logs.record(test_case_run(test_case, status, &outcome, passed));

            if !passed {
                overall = status;
                failed_position = Some(position + 1);
                break;
            }
        }

        logs.judged_at = Some(Utc::now());

        let error_message = failed_position.map(|position| match overall {
            SubmissionStatus::WrongAnswer => format!("Wrong answer on test case {position}"),
            SubmissionStatus::TimeLimitExceeded => {
                format!("Time limit exceeded on test case {position}")
            }
            SubmissionStatus::MemoryLimitExceeded => {
                format!("Memory limit exceeded on test case {position}")
            }
            SubmissionStatus::RuntimeError => format!("Runtime error on test case {position}"),
            _ => format!("Failed on test case {position}"),
        });

        Ok(VerdictRecord {
            status: overall,
            points_earned: logs.points_earned(),
            test_cases_passed: logs.passed_count(),
            total_test_cases: total,
            time_used: Some(logs.max_time_ms()),
            memory_used: Some(logs.peak_memory_kb),
            error_message,
            logs,
        })
    }

    /// Record a terminal `SystemError`, preserving partial results.
    /// Logged at error level: this is the engine's own fault, not the
    /// submitter's.
    async fn record_system_error(
        &self,
        submission_id: i32,
        mut logs: ExecutionLogs,
        total_test_cases: i32,
        message: String,
    ) -> Result<(), JudgeError> {
        error!(submission_id, message, "Judging aborted with internal error");

        logs.judged_at = Some(Utc::now());
        let verdict = VerdictRecord {
            status: SubmissionStatus::SystemError,
            points_earned: logs.points_earned(),
            test_cases_passed: logs.passed_count(),
            total_test_cases: total_test_cases.max(logs.test_case_runs.len() as i32),
            time_used: Some(logs.max_time_ms()),
            memory_used: Some(logs.peak_memory_kb),
            error_message: Some(message),
            logs,
        };
        self.finish(submission_id, verdict).await
    }

    async fn finish(&self, submission_id: i32, verdict: VerdictRecord) -> Result<(), JudgeError> {
        self.submissions
            .record_verdict(submission_id, &verdict)
            .await?;

        match self.submissions.get(submission_id).await {
            Ok(Some(submission)) => {
                self.publisher
                    .publish(StatusUpdate::from_submission(&submission))
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                // The verdict is already durable; the push is best-effort.
                warn!(submission_id, error = %e, "Could not re-read submission for status push");
            }
        }
        Ok(())
    }
}

fn test_case_run(
    test_case: &TestCase,
    status: SubmissionStatus,
    outcome: &crate::sandbox::RunOutcome,
    passed: bool,
) -> TestCaseRun {
    TestCaseRun {
        test_case_id: test_case.id,
        status,
        score: if passed { test_case.score } else { 0 },
        time_used_ms: outcome.time_ms,
        memory_used_kb: outcome.memory_kb,
        stdout: Some(outcome.stdout.clone()),
        stderr: if outcome.stderr.is_empty() {
            None
        } else {
            Some(outcome.stderr.clone())
        },
        expected_output: (!passed).then(|| test_case.expected_output.clone()),
        actual_output: (!passed).then(|| outcome.stdout.clone()),
        is_sample: test_case.is_sample,
    }
}
