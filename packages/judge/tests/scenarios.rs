//! End-to-end judging scenarios against a scripted sandbox: the
//! orchestrator, stores and publisher are real, only the execution
//! environment is faked.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::store::{MemoryStore, SubmissionStore};
use common::{Language, Problem, Submission, SubmissionStatus, TestCase};
use judge::orchestrator::{JudgeOrchestrator, JudgeSettings};
use judge::publisher::BroadcastPublisher;
use judge::sandbox::{
    CompileOutcome, RunLimits, RunOutcome, Sandbox, SandboxError, SandboxSession,
};

/// What the fake sandbox does for one `run` call.
#[derive(Clone)]
enum Step {
    Outcome(RunOutcome),
    Infra(String),
}

/// Replays a fixed script of per-test-case outcomes. Each `start`
/// yields a fresh session over the same script, so repeated judging of
/// the same submission behaves identically.
struct ScriptedSandbox {
    compile: Option<CompileOutcome>,
    steps: Vec<Step>,
    runs: Arc<AtomicUsize>,
}

impl ScriptedSandbox {
    fn new(compile: Option<CompileOutcome>, steps: Vec<Step>) -> Self {
        Self {
            compile,
            steps,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

struct ScriptedSession {
    compile: Option<CompileOutcome>,
    steps: std::vec::IntoIter<Step>,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn start(
        &self,
        _language: &Language,
        _source_code: &str,
    ) -> Result<Box<dyn SandboxSession>, SandboxError> {
        Ok(Box::new(ScriptedSession {
            compile: self.compile.clone(),
            steps: self.steps.clone().into_iter(),
            runs: Arc::clone(&self.runs),
        }))
    }
}

#[async_trait]
impl SandboxSession for ScriptedSession {
    async fn compile(&mut self, _budget_ms: u64) -> Result<Option<CompileOutcome>, SandboxError> {
        Ok(self.compile.clone())
    }

    async fn run(&mut self, _input: &str, _limits: &RunLimits) -> Result<RunOutcome, SandboxError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.steps.next() {
            Some(Step::Outcome(outcome)) => Ok(outcome),
            Some(Step::Infra(message)) => Err(SandboxError::Execution(message)),
            None => Err(SandboxError::Execution("script exhausted".into())),
        }
    }

    async fn close(&mut self) {}
}

fn ok_run(stdout: &str, time_ms: i32, memory_kb: i32) -> Step {
    Step::Outcome(RunOutcome {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        time_ms,
        memory_kb,
        ..Default::default()
    })
}

fn timed_out_run(time_ms: i32) -> Step {
    Step::Outcome(RunOutcome {
        exit_code: None,
        time_ms,
        timed_out: true,
        ..Default::default()
    })
}

fn python() -> Language {
    Language {
        id: "python".into(),
        image: None,
        compile_command: None,
        run_command: "python3 {source}".into(),
        file_extension: "py".into(),
    }
}

fn case(id: i32, input: &str, expected: &str, score: i32) -> TestCase {
    TestCase {
        id,
        input: input.to_string(),
        expected_output: expected.to_string(),
        score,
        is_sample: false,
        is_hidden: false,
    }
}

/// A store seeded with one pending submission (id 1) for problem 1.
fn seeded_store(test_cases: Vec<TestCase>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_language(python());
    store.insert_problem(Problem {
        id: 1,
        time_limit_ms: 1_000,
        memory_limit_mb: 256,
        test_cases,
    });
    store.create_submission(Submission::new(1, 7, 1, "python", "print(input())"));
    store
}

fn orchestrator(
    store: &Arc<MemoryStore>,
    sandbox: Arc<ScriptedSandbox>,
) -> (JudgeOrchestrator, Arc<BroadcastPublisher>) {
    let publisher = Arc::new(BroadcastPublisher::new(16));
    let orchestrator = JudgeOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        sandbox,
        publisher.clone(),
        JudgeSettings::default(),
    );
    (orchestrator, publisher)
}

#[tokio::test]
async fn all_cases_pass_yields_accepted_with_summed_weights() {
    let store = seeded_store(vec![case(10, "1", "1", 30), case(11, "2", "4", 70)]);
    let sandbox = Arc::new(ScriptedSandbox::new(
        None,
        vec![ok_run("1", 12, 2_048), ok_run("4", 30, 4_096)],
    ));
    let (orchestrator, _) = orchestrator(&store, sandbox.clone());

    orchestrator.judge(1).await.unwrap();

    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::Accepted);
    assert_eq!(judged.points_earned, 100);
    assert_eq!(judged.test_cases_passed, 2);
    assert_eq!(judged.total_test_cases, 2);
    assert_eq!(judged.time_used, Some(30));
    assert_eq!(judged.memory_used, Some(4_096));
    assert_eq!(judged.error_message, None);
    assert_eq!(sandbox.run_count(), 2);

    let logs = judged.logs.expect("logs recorded");
    assert_eq!(logs.test_case_runs.len(), 2);
    assert!(logs.judged_at.is_some());
    // Passing runs never carry diff material.
    assert!(logs.test_case_runs[0].expected_output.is_none());
}

#[tokio::test]
async fn first_failure_stops_the_run() {
    let store = seeded_store(vec![
        case(10, "1", "1", 20),
        case(11, "2", "4", 30),
        case(12, "3", "9", 50),
    ]);
    let sandbox = Arc::new(ScriptedSandbox::new(
        None,
        vec![ok_run("1", 10, 1_024), timed_out_run(1_000), ok_run("9", 10, 1_024)],
    ));
    let (orchestrator, _) = orchestrator(&store, sandbox.clone());

    orchestrator.judge(1).await.unwrap();

    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::TimeLimitExceeded);
    assert_eq!(judged.test_cases_passed, 1);
    assert_eq!(judged.total_test_cases, 3);
    assert_eq!(judged.points_earned, 20);
    assert_eq!(
        judged.error_message.as_deref(),
        Some("Time limit exceeded on test case 2")
    );
    // The third case is never executed.
    assert_eq!(sandbox.run_count(), 2);
    assert_eq!(judged.logs.unwrap().test_case_runs.len(), 2);
}

#[tokio::test]
async fn wrong_answer_records_the_diff() {
    let store = seeded_store(vec![case(10, "2", "4", 100)]);
    let sandbox = Arc::new(ScriptedSandbox::new(None, vec![ok_run("5", 10, 1_024)]));
    let (orchestrator, _) = orchestrator(&store, sandbox);

    orchestrator.judge(1).await.unwrap();

    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::WrongAnswer);
    assert_eq!(judged.points_earned, 0);
    let logs = judged.logs.unwrap();
    let run = &logs.test_case_runs[0];
    assert_eq!(run.expected_output.as_deref(), Some("4"));
    assert_eq!(run.actual_output.as_deref(), Some("5"));
}

#[tokio::test]
async fn compile_failure_short_circuits_execution() {
    let store = seeded_store(vec![case(10, "1", "1", 100)]);
    let sandbox = Arc::new(ScriptedSandbox::new(
        Some(CompileOutcome {
            success: false,
            output: "main.cpp:1: error: expected ';'".into(),
            time_ms: 140,
            timed_out: false,
        }),
        vec![],
    ));
    let (orchestrator, _) = orchestrator(&store, sandbox.clone());

    orchestrator.judge(1).await.unwrap();

    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::CompilationError);
    assert_eq!(judged.points_earned, 0);
    assert_eq!(judged.error_message.as_deref(), Some("Compilation failed"));
    assert_eq!(sandbox.run_count(), 0);

    let logs = judged.logs.unwrap();
    assert!(logs.compile_output.unwrap().contains("expected ';'"));
    assert!(logs.test_case_runs.is_empty());
}

#[tokio::test]
async fn trailing_newline_differences_are_tolerated() {
    let store = seeded_store(vec![case(10, "6 7", "42\n", 100)]);
    let sandbox = Arc::new(ScriptedSandbox::new(None, vec![ok_run("42", 5, 512)]));
    let (orchestrator, _) = orchestrator(&store, sandbox);

    orchestrator.judge(1).await.unwrap();

    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::Accepted);
}

#[tokio::test]
async fn infrastructure_fault_lands_in_system_error_not_running() {
    let store = seeded_store(vec![case(10, "1", "1", 60), case(11, "2", "4", 40)]);
    let sandbox = Arc::new(ScriptedSandbox::new(
        None,
        vec![ok_run("1", 10, 1_024), Step::Infra("runner crashed".into())],
    ));
    let (orchestrator, _) = orchestrator(&store, sandbox);

    orchestrator.judge(1).await.unwrap();

    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::SystemError);
    assert!(judged.status.is_terminal());
    // Partial results from before the fault survive.
    assert_eq!(judged.test_cases_passed, 1);
    assert_eq!(judged.points_earned, 60);
    assert!(
        judged
            .error_message
            .as_deref()
            .unwrap()
            .contains("test case 2")
    );
}

#[tokio::test]
async fn missing_language_is_a_system_error() {
    let store = Arc::new(MemoryStore::new());
    store.insert_problem(Problem {
        id: 1,
        time_limit_ms: 1_000,
        memory_limit_mb: 256,
        test_cases: vec![case(10, "1", "1", 100)],
    });
    store.create_submission(Submission::new(1, 7, 1, "cobol", "DISPLAY '1'."));
    let sandbox = Arc::new(ScriptedSandbox::new(None, vec![]));
    let (orchestrator, _) = orchestrator(&store, sandbox);

    orchestrator.judge(1).await.unwrap();

    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::SystemError);
    assert!(judged.error_message.unwrap().contains("cobol"));
}

#[tokio::test]
async fn already_judged_submission_is_left_alone() {
    let store = seeded_store(vec![case(10, "1", "1", 100)]);
    let sandbox = Arc::new(ScriptedSandbox::new(None, vec![ok_run("1", 10, 1_024)]));
    let (orchestrator, _) = orchestrator(&store, sandbox.clone());

    orchestrator.judge(1).await.unwrap();
    assert_eq!(sandbox.run_count(), 1);

    // A redelivered job for a terminal submission is a no-op.
    orchestrator.judge(1).await.unwrap();
    assert_eq!(sandbox.run_count(), 1);
    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::Accepted);
}

#[tokio::test]
async fn redelivered_job_for_running_submission_completes() {
    let store = seeded_store(vec![case(10, "1", "1", 100)]);
    let sandbox = Arc::new(ScriptedSandbox::new(None, vec![ok_run("1", 10, 1_024)]));
    let (orchestrator, _) = orchestrator(&store, sandbox);

    // A previous worker died after marking the submission running, and
    // the at-least-once broker redelivered the job.
    store.mark_running(1).await.unwrap();

    orchestrator.judge(1).await.unwrap();

    let judged = store.get(1).await.unwrap().unwrap();
    assert_eq!(judged.status, SubmissionStatus::Accepted);
    assert_eq!(judged.points_earned, 100);
}

#[tokio::test]
async fn judging_is_deterministic_for_identical_inputs() {
    let cases = vec![case(10, "1", "1", 40), case(11, "2", "4", 60)];
    let steps = vec![ok_run("1", 10, 1_024), ok_run("5", 12, 1_024)];

    let mut results = Vec::new();
    for _ in 0..2 {
        let store = seeded_store(cases.clone());
        let sandbox = Arc::new(ScriptedSandbox::new(None, steps.clone()));
        let (orchestrator, _) = orchestrator(&store, sandbox);
        orchestrator.judge(1).await.unwrap();
        let judged = store.get(1).await.unwrap().unwrap();
        results.push((
            judged.status,
            judged.points_earned,
            judged.test_cases_passed,
            judged.error_message,
        ));
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].0, SubmissionStatus::WrongAnswer);
}

#[tokio::test]
async fn status_updates_flow_running_then_terminal() {
    let store = seeded_store(vec![case(10, "1", "1", 100)]);
    let sandbox = Arc::new(ScriptedSandbox::new(None, vec![ok_run("1", 10, 1_024)]));
    let (orchestrator, publisher) = orchestrator(&store, sandbox);
    let mut updates = publisher.subscribe();

    orchestrator.judge(1).await.unwrap();

    let running = updates.try_recv().unwrap();
    assert_eq!(running.submission_id, 1);
    assert_eq!(running.status, SubmissionStatus::Running);

    let terminal = updates.try_recv().unwrap();
    assert_eq!(terminal.submission_id, 1);
    assert_eq!(terminal.status, SubmissionStatus::Accepted);
    assert_eq!(terminal.test_cases_passed, Some(1));
    assert_eq!(terminal.total_test_cases, Some(1));
}

#[tokio::test]
async fn unknown_submission_is_a_retryable_error() {
    let store = Arc::new(MemoryStore::new());
    let sandbox = Arc::new(ScriptedSandbox::new(None, vec![]));
    let (orchestrator, _) = orchestrator(&store, sandbox);

    // No verdict can be recorded, so the error surfaces to the queue.
    assert!(orchestrator.judge(99).await.is_err());
}
