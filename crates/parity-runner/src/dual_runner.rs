use parity_backends::{
    BackendKind, ChunkSender, DebugSender, ExecutionBackend, ExecutionOutcome, OutcomeStatus,
    RunRequest,
};
use parity_fixtures::TestFixture;
use parity_logs::{CompletionGrammar, LogNormalizer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::governor::ConcurrencyGovernor;

pub const DEFAULT_FIXTURE_OVERHEAD: Duration = Duration::from_secs(60);

/// Final classification of one fixture. Ordering is the summary order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verdict {
    Pass,
    Fail,
    Timeout,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn is_failure(self) -> bool {
        self != Self::Pass
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVerdict {
    pub fixture_name: String,
    pub verdict: Verdict,
    /// Why the fixture did not pass.
    pub reason: Option<String>,
    pub debug_trail: Vec<String>,
    /// Normalized text per backend. A backend that never finished
    /// contributes its streamed chunks, cleaned.
    pub outputs: BTreeMap<BackendKind, String>,
    /// Raw log per backend, kept for diagnosing failures.
    pub raw_outputs: BTreeMap<BackendKind, String>,
    pub elapsed: Duration,
}

impl TestVerdict {
    /// Placeholder for a fixture whose runner never reported.
    pub fn missing(fixture_name: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            fixture_name: fixture_name.into(),
            verdict: Verdict::Timeout,
            reason: Some("no verdict before the global deadline".to_string()),
            debug_trail: Vec::new(),
            outputs: BTreeMap::new(),
            raw_outputs: BTreeMap::new(),
            elapsed,
        }
    }
}

/// What a backend task reports to its runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Chunk(String),
    Finished(ExecutionOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualRunnerConfig {
    /// Grace added to each fixture's own timeout.
    pub fixture_overhead: Duration,
}

impl Default for DualRunnerConfig {
    fn default() -> Self {
        Self {
            fixture_overhead: DEFAULT_FIXTURE_OVERHEAD,
        }
    }
}

struct SideState {
    kind: BackendKind,
    grammar: CompletionGrammar,
    chunks: String,
    outcome: Option<ExecutionOutcome>,
}

impl SideState {
    fn new(backend: &dyn ExecutionBackend) -> Self {
        Self {
            kind: backend.kind(),
            grammar: backend.grammar(),
            chunks: String::new(),
            outcome: None,
        }
    }

    fn apply(&mut self, event: Option<BackendEvent>) {
        match event {
            Some(BackendEvent::Chunk(chunk)) => self.chunks.push_str(&chunk),
            Some(BackendEvent::Finished(outcome)) => self.outcome = Some(outcome),
            None => {
                if self.outcome.is_none() {
                    self.outcome = Some(ExecutionOutcome::errored(
                        self.kind,
                        self.chunks.clone(),
                        "backend task ended without an outcome",
                    ));
                }
            }
        }
    }

    /// Takes whatever the backend task sent before the loop stopped.
    fn drain(&mut self, events: &mut UnboundedReceiver<BackendEvent>) {
        while let Ok(event) = events.try_recv() {
            self.apply(Some(event));
        }
    }

    fn finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn output(&self, normalizer: &LogNormalizer) -> String {
        match &self.outcome {
            Some(outcome) => outcome.normalized_log.clone(),
            None => normalizer.normalize_partial(self.grammar, &self.chunks),
        }
    }

    fn raw_output(&self) -> String {
        match &self.outcome {
            Some(outcome) if !outcome.raw_log.is_empty() => outcome.raw_log.clone(),
            _ => self.chunks.clone(),
        }
    }
}

/// Runs one fixture on two backends and classifies the pair of outcomes.
pub struct DualRunner {
    backend_a: Arc<dyn ExecutionBackend>,
    backend_b: Arc<dyn ExecutionBackend>,
    governor: ConcurrencyGovernor,
    config: DualRunnerConfig,
}

impl DualRunner {
    pub fn new(
        backend_a: Arc<dyn ExecutionBackend>,
        backend_b: Arc<dyn ExecutionBackend>,
        governor: ConcurrencyGovernor,
        config: DualRunnerConfig,
    ) -> Self {
        Self {
            backend_a,
            backend_b,
            governor,
            config,
        }
    }

    pub fn config(&self) -> DualRunnerConfig {
        self.config
    }

    pub fn fixture_budget(&self, fixture: &TestFixture) -> Duration {
        fixture.timeout() + self.config.fixture_overhead
    }

    /// Produces exactly one verdict. Debug lines are appended to the trail
    /// and copied to `debug_out`. Backend tasks still running at the
    /// deadline are left to finish on their own.
    pub async fn run(&self, fixture: Arc<TestFixture>, debug_out: DebugSender) -> TestVerdict {
        let started = Instant::now();
        let deadline = started + self.fixture_budget(&fixture);
        let (debug_tx, mut debug_rx) = mpsc::unbounded_channel::<String>();

        let mut a_rx = self.spawn_backend(self.backend_a.clone(), &fixture, deadline, &debug_tx);
        let mut b_rx = self.spawn_backend(self.backend_b.clone(), &fixture, deadline, &debug_tx);
        drop(debug_tx);

        let mut side_a = SideState::new(self.backend_a.as_ref());
        let mut side_b = SideState::new(self.backend_b.as_ref());
        let mut trail = Vec::new();
        let mut debug_open = true;
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        let deadline_fired = loop {
            if side_a.finished() && side_b.finished() {
                break false;
            }
            tokio::select! {
                event = a_rx.recv(), if !side_a.finished() => side_a.apply(event),
                event = b_rx.recv(), if !side_b.finished() => side_b.apply(event),
                message = debug_rx.recv(), if debug_open => match message {
                    Some(message) => {
                        let _ = debug_out.send(message.clone());
                        trail.push(message);
                    }
                    None => debug_open = false,
                },
                _ = &mut expiry => break true,
            }
        };
        side_a.drain(&mut a_rx);
        side_b.drain(&mut b_rx);
        while let Ok(message) = debug_rx.try_recv() {
            let _ = debug_out.send(message.clone());
            trail.push(message);
        }

        let (verdict, reason) = classify(deadline_fired, [&side_a, &side_b]);
        let elapsed = started.elapsed();
        info!(
            fixture = %fixture.derived_name,
            verdict = %verdict,
            elapsed_ms = elapsed.as_millis() as u64,
            "fixture finished"
        );
        if let Some(reason) = reason.as_deref() {
            let _ = debug_out.send(format!("{verdict}: {reason}"));
        }

        let normalizer = LogNormalizer::for_runtime(&fixture.runtime);
        let mut outputs = BTreeMap::new();
        let mut raw_outputs = BTreeMap::new();
        for side in [&side_a, &side_b] {
            outputs.insert(side.kind, side.output(&normalizer));
            raw_outputs.insert(side.kind, side.raw_output());
        }
        TestVerdict {
            fixture_name: fixture.derived_name.clone(),
            verdict,
            reason,
            debug_trail: trail,
            outputs,
            raw_outputs,
            elapsed,
        }
    }

    fn spawn_backend(
        &self,
        backend: Arc<dyn ExecutionBackend>,
        fixture: &Arc<TestFixture>,
        deadline: Instant,
        debug: &DebugSender,
    ) -> UnboundedReceiver<BackendEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = RunRequest {
            fixture: fixture.clone(),
            backend: backend.kind(),
        };
        let governor = self.governor.clone();
        let debug = debug.clone();
        tokio::spawn(async move {
            let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
            let work = run_request(
                backend.as_ref(),
                &governor,
                &request,
                deadline,
                &debug,
                &chunk_tx,
            );
            tokio::pin!(work);
            let outcome = loop {
                tokio::select! {
                    outcome = &mut work => break outcome,
                    Some(chunk) = chunk_rx.recv() => {
                        let _ = tx.send(BackendEvent::Chunk(chunk));
                    }
                }
            };
            while let Ok(chunk) = chunk_rx.try_recv() {
                let _ = tx.send(BackendEvent::Chunk(chunk));
            }
            debug!(
                backend = %request.backend,
                fixture = %request.fixture.derived_name,
                status = ?outcome.status,
                "backend finished"
            );
            let _ = debug.send(format!(
                "{}: finished {}",
                request.backend,
                status_label(outcome.status)
            ));
            let _ = tx.send(BackendEvent::Finished(outcome));
        });
        rx
    }
}

/// The governor slot covers only the call that starts the execution.
async fn run_request(
    backend: &dyn ExecutionBackend,
    governor: &ConcurrencyGovernor,
    request: &RunRequest,
    deadline: Instant,
    debug: &DebugSender,
    chunks: &ChunkSender,
) -> ExecutionOutcome {
    let started = {
        let _permit = match governor.acquire().await {
            Ok(permit) => permit,
            Err(error) => return ExecutionOutcome::errored(request.backend, String::new(), error),
        };
        backend.invoke(&request.fixture, debug).await
    };
    match started {
        Ok(handle) => {
            backend
                .finish(&request.fixture, handle, deadline, debug, chunks)
                .await
        }
        Err(error) => {
            let _ = debug.send(format!("{}: {error}", request.label()));
            ExecutionOutcome::errored(request.backend, String::new(), error)
        }
    }
}

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Completed => "completed",
        OutcomeStatus::TimedOut => "timed out",
        OutcomeStatus::Errored => "with error",
    }
}

fn classify(deadline_fired: bool, sides: [&SideState; 2]) -> (Verdict, Option<String>) {
    if deadline_fired {
        return (
            Verdict::Timeout,
            Some("deadline elapsed before both backends finished".to_string()),
        );
    }
    let outcomes: Vec<&ExecutionOutcome> =
        sides.into_iter().filter_map(|side| side.outcome.as_ref()).collect();
    if let Some(outcome) = outcomes
        .iter()
        .find(|outcome| outcome.status == OutcomeStatus::TimedOut)
    {
        return (
            Verdict::Timeout,
            Some(format!("{} timed out", outcome.backend)),
        );
    }
    if let Some(outcome) = outcomes
        .iter()
        .find(|outcome| outcome.status == OutcomeStatus::Errored)
    {
        return (
            Verdict::Fail,
            Some(format!(
                "{} errored: {}",
                outcome.backend,
                outcome.error.as_deref().unwrap_or("unknown error")
            )),
        );
    }
    if let Some(outcome) = outcomes
        .iter()
        .find(|outcome| outcome.normalized_log.trim().is_empty())
    {
        return (
            Verdict::Fail,
            Some(format!("{} produced no output", outcome.backend)),
        );
    }
    match outcomes.as_slice() {
        [first, second] if first.normalized_log == second.normalized_log => (Verdict::Pass, None),
        [first, second] => (
            Verdict::Fail,
            Some(format!(
                "normalized output differs between {} and {}",
                first.backend, second.backend
            )),
        ),
        _ => (
            Verdict::Fail,
            Some("missing backend outcome".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{DualRunner, DualRunnerConfig, Verdict};
    use crate::governor::ConcurrencyGovernor;
    use crate::test_support::{fixture, FakeBackend};
    use parity_backends::BackendKind;
    use parity_logs::CompletionGrammar;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn runner(a: FakeBackend, b: FakeBackend, overhead: Duration) -> DualRunner {
        DualRunner::new(
            Arc::new(a),
            Arc::new(b),
            ConcurrencyGovernor::new(5),
            DualRunnerConfig {
                fixture_overhead: overhead,
            },
        )
    }

    #[tokio::test]
    async fn functional_identical_output_passes() {
        let runner = runner(
            FakeBackend::new(BackendKind::Queue, "hello a=1\n"),
            FakeBackend::new(BackendKind::Invoke, "hello a=1\n"),
            Duration::from_secs(5),
        );
        let (debug_tx, _debug_rx) = mpsc::unbounded_channel();
        let verdict = runner.run(fixture("ctx", 10), debug_tx).await;
        assert_eq!(verdict.verdict, Verdict::Pass);
        assert_eq!(verdict.fixture_name, "lambda-test-suite-nodejs-ctx");
        assert!(verdict.reason.is_none());
        assert_eq!(verdict.outputs[&BackendKind::Queue], "hello a=1\n");
    }

    #[tokio::test]
    async fn functional_different_output_fails() {
        let runner = runner(
            FakeBackend::new(BackendKind::Queue, "hello a=1\n"),
            FakeBackend::new(BackendKind::Invoke, "hello a=2\n"),
            Duration::from_secs(5),
        );
        let (debug_tx, _debug_rx) = mpsc::unbounded_channel();
        let verdict = runner.run(fixture("ctx", 10), debug_tx).await;
        assert_eq!(verdict.verdict, Verdict::Fail);
        assert!(verdict
            .reason
            .as_deref()
            .is_some_and(|reason| reason.contains("differs")));
    }

    #[tokio::test]
    async fn regression_empty_output_on_both_sides_fails() {
        let runner = runner(
            FakeBackend::new(BackendKind::Queue, ""),
            FakeBackend::new(BackendKind::Invoke, ""),
            Duration::from_secs(5),
        );
        let (debug_tx, _debug_rx) = mpsc::unbounded_channel();
        let verdict = runner.run(fixture("ctx", 10), debug_tx).await;
        assert_eq!(verdict.verdict, Verdict::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn regression_hung_backend_times_out_at_deadline() {
        let mut hung = FakeBackend::new(BackendKind::Queue, "never\n");
        hung.run_time = None;
        let mut quick = FakeBackend::new(BackendKind::Invoke, "hello a=1\n");
        quick.run_time = Some(Duration::from_secs(1));
        let runner = runner(hung, quick, Duration::from_secs(1));
        let (debug_tx, mut debug_rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        let verdict = runner.run(fixture("ctx", 1), debug_tx).await;

        assert_eq!(verdict.verdict, Verdict::Timeout);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
        assert!(verdict
            .debug_trail
            .iter()
            .any(|line| line.starts_with("invoke:")));
        assert_eq!(verdict.outputs[&BackendKind::Invoke], "hello a=1\n");
        assert!(debug_rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn regression_timeout_keeps_partial_output_streamed_before_deadline() {
        let request = "6f1c4a1e-0d3b-11e6-9a7e-4b2f0a1c9e11";
        let mut stalled = FakeBackend::new(BackendKind::Invoke, "never\n");
        stalled.grammar = CompletionGrammar::Invoke;
        stalled.run_time = None;
        stalled.progress = Some(format!(
            "START RequestId: {request} Version: $LATEST\n\
             2016-04-11T21:20:51.123Z\t{request}\tpartial-progress\n"
        ));
        let runner = runner(
            FakeBackend::new(BackendKind::Queue, "hello a=1\n"),
            stalled,
            Duration::from_secs(1),
        );
        let (debug_tx, _debug_rx) = mpsc::unbounded_channel();

        let verdict = runner.run(fixture("ctx", 1), debug_tx).await;

        assert_eq!(verdict.verdict, Verdict::Timeout);
        assert_eq!(verdict.outputs[&BackendKind::Queue], "hello a=1\n");
        assert_eq!(verdict.outputs[&BackendKind::Invoke], "partial-progress\n");
        assert!(verdict.raw_outputs[&BackendKind::Invoke].starts_with("START RequestId:"));
    }

    #[tokio::test]
    async fn regression_uninterpretable_log_is_attached_to_failure() {
        let leaked = "[INFO]\t2016-04-11T21:20:51.123Z\t000000000000000000000001\tleaked\n";
        let runner = runner(
            FakeBackend::new(BackendKind::Queue, leaked),
            FakeBackend::new(BackendKind::Invoke, "hello a=1\n"),
            Duration::from_secs(5),
        );
        let (debug_tx, _debug_rx) = mpsc::unbounded_channel();

        let verdict = runner.run(fixture("ctx", 10), debug_tx).await;

        assert_eq!(verdict.verdict, Verdict::Fail);
        assert!(verdict
            .reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("queue errored")));
        assert_eq!(verdict.outputs[&BackendKind::Queue], "");
        assert_eq!(verdict.raw_outputs[&BackendKind::Queue], leaked);
        assert_eq!(verdict.raw_outputs[&BackendKind::Invoke], "hello a=1\n");
    }

    #[tokio::test(start_paused = true)]
    async fn functional_twenty_runs_respect_shared_capacity() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let backend = |kind| {
            let mut backend = FakeBackend::new(kind, "hello a=1\n");
            backend.invoke_delay = Duration::from_millis(250);
            backend.active = active.clone();
            backend.peak = peak.clone();
            Arc::new(backend)
        };
        let runner = Arc::new(DualRunner::new(
            backend(BackendKind::Queue),
            backend(BackendKind::Invoke),
            ConcurrencyGovernor::new(5),
            DualRunnerConfig {
                fixture_overhead: Duration::from_secs(60),
            },
        ));

        let mut handles = Vec::new();
        for index in 0..20 {
            let runner = runner.clone();
            let fixture = fixture(&format!("case{index}"), 30);
            handles.push(tokio::spawn(async move {
                let (debug_tx, _debug_rx) = mpsc::unbounded_channel();
                runner.run(fixture, debug_tx).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("runner").verdict, Verdict::Pass);
        }

        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(peak.load(Ordering::SeqCst), 5);
    }
}
