use async_trait::async_trait;
use parity_backends::{
    BackendKind, ClientError, ExecutionBackend, InvokeBackend, InvokeClient, QueueBackend, QueueClient,
    QueueTask, QueueTaskStatus,
};
use parity_fixtures::{load_catalog, CatalogOptions, TestFixture};
use parity_runner::{
    ConcurrencyGovernor, DualRunner, DualRunnerConfig, FailureNotice, Notifier, NotifyError,
    Reconciler, ReconcilerConfig, RunReport, Verdict,
};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TASK_ID: &str = "5710b5e7a1c2d3e4f5a6b7c8";
const PRIOR_REQUEST: &str = "0b7d2e34-0d3c-11e6-8f55-9d1b2c3a4e5f";
const REQUEST: &str = "6f1c4a1e-0d3b-11e6-9a7e-4b2f0a1c9e11";

type Render = fn(&Value) -> String;

fn hello(event: &Value) -> String {
    format!("hello a={}", event["a"])
}

fn hello_off_by_one(event: &Value) -> String {
    format!("hello a={}", event["a"].as_i64().unwrap_or_default() + 1)
}

/// IronWorker stand-in: the task's log is the handler output for its payload.
struct FakeIronWorker {
    render: Render,
    payloads: Mutex<Vec<String>>,
}

#[async_trait]
impl QueueClient for FakeIronWorker {
    async fn queue_task(&self, task: &QueueTask) -> Result<String, ClientError> {
        self.payloads.lock().expect("lock").push(task.payload.clone());
        Ok(TASK_ID.to_string())
    }

    async fn wait_for_task(&self, task_id: &str) -> Result<QueueTaskStatus, ClientError> {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        Ok(QueueTaskStatus {
            id: task_id.to_string(),
            status: "complete".to_string(),
            msg: None,
        })
    }

    async fn fetch_task_log(&self, _task_id: &str) -> Result<String, ClientError> {
        let payload = self.payloads.lock().expect("lock").last().cloned();
        let event: Value = serde_json::from_str(&payload.unwrap_or_default())
            .map_err(ClientError::Serde)?;
        Ok(format!(
            "Unable to find image 'iron/lambda-nodejs:latest' locally\n\
             latest: Pulling from iron/lambda-nodejs\n\
             Status: Downloaded newer image for iron/lambda-nodejs:latest\n\
             {}\n",
            (self.render)(&event)
        ))
    }
}

/// Lambda stand-in: one log stream that already holds an earlier run; each
/// invocation appends a new START/END span.
struct FakeLambda {
    render: Render,
    stream: Mutex<String>,
    leak_foreign_end: bool,
    stall: bool,
}

impl FakeLambda {
    fn new(render: Render) -> Self {
        Self {
            render,
            stream: Mutex::new(format!(
                "START RequestId: {PRIOR_REQUEST} Version: $LATEST\n\
                 2016-04-11T21:19:00.000Z\t{PRIOR_REQUEST}\thello a=0\n\
                 END RequestId: {PRIOR_REQUEST}\n\
                 REPORT RequestId: {PRIOR_REQUEST}\tDuration: 1.00 ms\n"
            )),
            leak_foreign_end: false,
            stall: false,
        }
    }
}

#[async_trait]
impl InvokeClient for FakeLambda {
    async fn invoke_async(&self, _function_name: &str, payload: &str) -> Result<(), ClientError> {
        let event: Value = serde_json::from_str(payload).map_err(ClientError::Serde)?;
        let mut stream = self.stream.lock().expect("lock");
        stream.push_str(&format!(
            "START RequestId: {REQUEST} Version: $LATEST\n\
             2016-04-11T21:20:51.123Z\t{REQUEST}\t{}\n",
            (self.render)(&event)
        ));
        if self.stall {
            return Ok(());
        }
        if self.leak_foreign_end {
            stream.push_str("END RequestId: 11111111-2222-3333-4444-555555555555\n");
        }
        stream.push_str(&format!(
            "END RequestId: {REQUEST}\n\
             REPORT RequestId: {REQUEST}\tDuration: 12.50 ms\tBilled Duration: 100 ms\n"
        ));
        Ok(())
    }

    async fn fetch_recent_log(&self, _function_name: &str) -> Result<String, ClientError> {
        Ok(self.stream.lock().expect("lock").clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notified: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        self.notified
            .lock()
            .expect("lock")
            .push(notice.fixture_name.clone());
        Ok(())
    }
}

fn write_fixture(root: &Path, name: &str) {
    let dir = root.join("node").join(name);
    fs::create_dir_all(&dir).expect("fixture dir");
    fs::write(
        dir.join("lambda.test"),
        format!(
            r#"{{"handler": "test.run", "name": "{name}", "runtime": "nodejs", "timeout": 10, "event": {{"a": 1}}}}"#
        ),
    )
    .expect("fixture file");
}

fn catalog_of(names: &[&str]) -> (tempfile::TempDir, Vec<TestFixture>) {
    let root = tempfile::tempdir().expect("tempdir");
    for name in names {
        write_fixture(root.path(), name);
    }
    let fixtures = load_catalog(&CatalogOptions::new(root.path())).expect("catalog loads");
    (root, fixtures)
}

fn catalog() -> (tempfile::TempDir, Vec<TestFixture>) {
    catalog_of(&["ctx"])
}

async fn run_catalog(
    iron: FakeIronWorker,
    lambda: FakeLambda,
    notifier: Arc<RecordingNotifier>,
    fixtures: Vec<TestFixture>,
) -> RunReport {
    let queue: Arc<dyn ExecutionBackend> = Arc::new(QueueBackend::new(Arc::new(iron), "iron"));
    let invoke: Arc<dyn ExecutionBackend> =
        Arc::new(InvokeBackend::new(Arc::new(lambda)).with_poll_interval(Duration::from_secs(3)));
    let runner = DualRunner::new(
        queue,
        invoke,
        ConcurrencyGovernor::new(5),
        DualRunnerConfig {
            fixture_overhead: Duration::from_secs(60),
        },
    );
    Reconciler::new(Arc::new(runner), notifier, ReconcilerConfig::default())
        .run(fixtures)
        .await
}

fn iron(render: Render) -> FakeIronWorker {
    FakeIronWorker {
        render,
        payloads: Mutex::new(Vec::new()),
    }
}

#[tokio::test(start_paused = true)]
async fn integration_matching_backends_pass() {
    let (_root, fixtures) = catalog();
    assert_eq!(fixtures[0].derived_name, "lambda-test-suite-nodejs-ctx");
    let notifier = Arc::new(RecordingNotifier::default());

    let report = run_catalog(iron(hello), FakeLambda::new(hello), notifier.clone(), fixtures).await;

    assert_eq!((report.passed, report.failed, report.timed_out), (1, 0, 0));
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.verdicts[0].verdict, Verdict::Pass);
    assert!(report.verdicts[0]
        .outputs
        .values()
        .all(|output| output == "hello a=1\n"));
    assert!(notifier.notified.lock().expect("lock").is_empty());
}

#[tokio::test(start_paused = true)]
async fn integration_diverging_output_fails_and_notifies_once() {
    let (_root, fixtures) = catalog();
    let notifier = Arc::new(RecordingNotifier::default());

    let report = run_catalog(
        iron(hello),
        FakeLambda::new(hello_off_by_one),
        notifier.clone(),
        fixtures,
    )
    .await;

    assert_eq!((report.passed, report.failed, report.timed_out), (0, 1, 0));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(
        notifier.notified.lock().expect("lock").as_slice(),
        ["lambda-test-suite-nodejs-ctx".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn regression_foreign_end_marker_fails_the_fixture() {
    let (_root, fixtures) = catalog();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut lambda = FakeLambda::new(hello);
    lambda.leak_foreign_end = true;

    let report = run_catalog(iron(hello), lambda, notifier.clone(), fixtures).await;

    assert_eq!(report.failed, 1);
    let reason = report.verdicts[0].reason.clone().unwrap_or_default();
    assert!(reason.contains("invoke errored"), "reason: {reason}");
    assert_eq!(notifier.notified.lock().expect("lock").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn regression_stalled_invocation_times_out_with_partial_output() {
    // Two fixtures keep the global deadline past the per-fixture one.
    let (_root, fixtures) = catalog_of(&["ctx", "other"]);
    let notifier = Arc::new(RecordingNotifier::default());
    let mut lambda = FakeLambda::new(hello);
    lambda.stall = true;

    let report = run_catalog(iron(hello), lambda, notifier.clone(), fixtures).await;

    assert_eq!((report.passed, report.failed, report.timed_out), (0, 0, 2));
    let verdict = report
        .verdicts
        .iter()
        .find(|verdict| verdict.fixture_name == "lambda-test-suite-nodejs-ctx")
        .expect("ctx verdict");
    assert_eq!(verdict.verdict, Verdict::Timeout);
    assert_eq!(verdict.outputs[&BackendKind::Queue], "hello a=1\n");
    assert_eq!(verdict.outputs[&BackendKind::Invoke], "hello a=1\n");
    assert!(verdict.raw_outputs[&BackendKind::Invoke].contains("START RequestId:"));
    assert_eq!(notifier.notified.lock().expect("lock").len(), 2);
}
