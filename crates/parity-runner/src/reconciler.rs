use chrono::Utc;
use parity_fixtures::TestFixture;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel_join::{forward_with_heartbeat, join_channels, DEFAULT_HEARTBEAT_INTERVAL};
use crate::dual_runner::{DualRunner, TestVerdict, Verdict};
use crate::notifier::{FailureNotice, Notifier};

/// Item on the merged stream drained by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    Verdict(TestVerdict),
    Debug(String),
}

impl From<String> for ReconcileEvent {
    fn from(line: String) -> Self {
        Self::Debug(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub heartbeat_interval: Duration,
    /// How long to wait for failure notifications before returning.
    pub notify_grace: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            notify_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Sorted by verdict (pass, fail, timeout) then fixture name.
    pub verdicts: Vec<TestVerdict>,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl RunReport {
    pub fn from_verdicts(mut verdicts: Vec<TestVerdict>) -> Self {
        verdicts.sort_by(|left, right| {
            left.verdict
                .cmp(&right.verdict)
                .then_with(|| left.fixture_name.cmp(&right.fixture_name))
        });
        let count = |wanted: Verdict| verdicts.iter().filter(|v| v.verdict == wanted).count();
        Self {
            passed: count(Verdict::Pass),
            failed: count(Verdict::Fail),
            timed_out: count(Verdict::Timeout),
            verdicts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .map(|verdict| match verdict.reason.as_deref() {
                Some(reason) => format!(
                    "{} {} ({reason})",
                    verdict.verdict, verdict.fixture_name
                ),
                None => format!("{} {}", verdict.verdict, verdict.fixture_name),
            })
            .collect()
    }
}

/// Sum of every fixture's timeout plus `overhead` per fixture.
pub fn global_deadline(fixtures: &[Arc<TestFixture>], overhead: Duration) -> Duration {
    fixtures
        .iter()
        .map(|fixture| fixture.timeout() + overhead)
        .sum()
}

/// Runs the whole catalog and owns the tallies.
pub struct Reconciler {
    runner: Arc<DualRunner>,
    notifier: Arc<dyn Notifier>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        runner: Arc<DualRunner>,
        notifier: Arc<dyn Notifier>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            runner,
            notifier,
            config,
        }
    }

    pub async fn run(&self, fixtures: Vec<TestFixture>) -> RunReport {
        let fixtures: Vec<Arc<TestFixture>> = fixtures.into_iter().map(Arc::new).collect();
        let started = Instant::now();
        let budget = global_deadline(&fixtures, self.runner.config().fixture_overhead);
        info!(
            fixtures = fixtures.len(),
            budget_secs = budget.as_secs(),
            "starting parity run"
        );

        let mut streams = Vec::with_capacity(fixtures.len() * 2);
        for fixture in &fixtures {
            let (result_tx, result_rx) = mpsc::unbounded_channel::<ReconcileEvent>();
            let (debug_tx, debug_rx) = mpsc::unbounded_channel::<String>();
            let (line_tx, line_rx) = mpsc::unbounded_channel::<ReconcileEvent>();
            forward_with_heartbeat(
                format!("{}: ", fixture.derived_name),
                debug_rx,
                line_tx,
                self.config.heartbeat_interval,
            );
            let runner = self.runner.clone();
            let fixture = fixture.clone();
            tokio::spawn(async move {
                let verdict = runner.run(fixture, debug_tx).await;
                let _ = result_tx.send(ReconcileEvent::Verdict(verdict));
            });
            streams.push(result_rx);
            streams.push(line_rx);
        }
        let mut merged = join_channels(streams);

        let expiry = tokio::time::sleep(budget);
        tokio::pin!(expiry);
        let mut verdicts: Vec<TestVerdict> = Vec::with_capacity(fixtures.len());
        loop {
            tokio::select! {
                event = merged.recv() => match event {
                    Some(ReconcileEvent::Verdict(verdict)) => {
                        debug!(fixture = %verdict.fixture_name, verdict = %verdict.verdict, "verdict received");
                        verdicts.push(verdict);
                    }
                    Some(ReconcileEvent::Debug(line)) => info!("{line}"),
                    None => break,
                },
                _ = &mut expiry => {
                    warn!(
                        budget_secs = budget.as_secs(),
                        outstanding = fixtures.len().saturating_sub(verdicts.len()),
                        "global deadline elapsed"
                    );
                    break;
                }
            }
        }

        let reported: HashSet<String> = verdicts
            .iter()
            .map(|verdict| verdict.fixture_name.clone())
            .collect();
        for fixture in &fixtures {
            if !reported.contains(&fixture.derived_name) {
                verdicts.push(TestVerdict::missing(
                    fixture.derived_name.clone(),
                    started.elapsed(),
                ));
            }
        }

        let report = RunReport::from_verdicts(verdicts);
        for line in report.summary_lines() {
            info!("{line}");
        }
        info!(
            passed = report.passed,
            failed = report.failed,
            timed_out = report.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "parity run complete"
        );
        self.notify_failures(&report).await;
        report
    }

    /// Delivery problems are logged and never change the report.
    async fn notify_failures(&self, report: &RunReport) {
        let mut pending = JoinSet::new();
        for verdict in report
            .verdicts
            .iter()
            .filter(|verdict| verdict.verdict.is_failure())
        {
            let notice = FailureNotice {
                fixture_name: verdict.fixture_name.clone(),
                verdict: verdict.verdict,
                reason: verdict.reason.clone(),
                occurred_at: Utc::now(),
            };
            let notifier = self.notifier.clone();
            pending.spawn(async move {
                if let Err(error) = notifier.notify(&notice).await {
                    warn!(fixture = %notice.fixture_name, %error, "failure notification not delivered");
                }
            });
        }
        if pending.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(self.config.notify_grace, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                outstanding = pending.len(),
                "failure notifications still pending"
            );
            pending.detach_all();
        }
    }
}
