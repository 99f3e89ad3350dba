use async_trait::async_trait;
use parity_backends::{
    BackendError, BackendHandle, BackendKind, CapturedLog, ChunkSender, ClientError, DebugSender,
    ExecutionBackend,
};
use parity_fixtures::{FixtureFile, TestFixture};
use parity_logs::CompletionGrammar;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TASK_ID: &str = "56f1a2b3c4d5e6f7a8b9c0d1";

/// Scripted backend: `invoke` takes `invoke_delay`, then `progress` is
/// streamed, completion takes `run_time` (or never finishes) and yields
/// `output`. Fixtures named in `rejected` fail to start.
pub(crate) struct FakeBackend {
    pub kind: BackendKind,
    pub grammar: CompletionGrammar,
    pub output: String,
    pub progress: Option<String>,
    pub rejected: Vec<String>,
    pub invoke_delay: Duration,
    pub run_time: Option<Duration>,
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub(crate) fn new(kind: BackendKind, output: &str) -> Self {
        Self {
            kind,
            grammar: CompletionGrammar::Queue,
            output: output.to_string(),
            progress: None,
            rejected: Vec::new(),
            invoke_delay: Duration::ZERO,
            run_time: Some(Duration::from_millis(10)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn grammar(&self) -> CompletionGrammar {
        self.grammar
    }

    async fn invoke(
        &self,
        fixture: &TestFixture,
        debug: &DebugSender,
    ) -> Result<BackendHandle, BackendError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.invoke_delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.rejected.contains(&fixture.derived_name) {
            return Err(BackendError::Invocation(ClientError::HttpStatus {
                status: 503,
                body: "service unavailable".to_string(),
            }));
        }
        let _ = debug.send(format!("{}: started {}", self.kind, fixture.derived_name));
        Ok(BackendHandle::Task {
            task_id: TASK_ID.to_string(),
        })
    }

    async fn await_completion(
        &self,
        _fixture: &TestFixture,
        _handle: BackendHandle,
        _deadline: Instant,
        _debug: &DebugSender,
        chunks: &ChunkSender,
    ) -> Result<CapturedLog, BackendError> {
        if let Some(progress) = &self.progress {
            let _ = chunks.send(progress.clone());
        }
        match self.run_time {
            Some(run_time) => tokio::time::sleep(run_time).await,
            None => std::future::pending::<()>().await,
        }
        let _ = chunks.send(self.output.clone());
        Ok(CapturedLog {
            raw: self.output.clone(),
            marker: Some(TASK_ID.to_string()),
        })
    }
}

pub(crate) fn fixture(name: &str, timeout: i64) -> Arc<TestFixture> {
    let file: FixtureFile = serde_json::from_value(json!({
        "handler": "test.run", "name": name, "runtime": "nodejs",
        "event": {"a": 1}, "timeout": timeout
    }))
    .expect("fixture");
    Arc::new(TestFixture::from_file(
        file,
        "lambda-test-suite",
        PathBuf::from(format!("node/{name}/lambda.test")),
    ))
}
