use async_trait::async_trait;
use parity_fixtures::TestFixture;
use parity_logs::{CompletionError, CompletionGrammar, LogNormalizer};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::client::ClientError;
use crate::snapshot::LogSnapshot;

/// Progress messages emitted while a backend runs.
pub type DebugSender = mpsc::UnboundedSender<String>;

/// Raw log text, sent as soon as a backend observes it.
pub type ChunkSender = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    Queue,
    Invoke,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Invoke => "invoke",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixture bound to the backend that will execute it.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub fixture: Arc<TestFixture>,
    pub backend: BackendKind,
}

impl RunRequest {
    pub fn label(&self) -> String {
        format!("{}@{}", self.fixture.derived_name, self.backend)
    }
}

/// Backend-side reference to an execution that has been started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendHandle {
    Task { task_id: String },
    Invocation {
        function_name: String,
        baseline: LogSnapshot,
    },
}

/// Raw output of one finished execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLog {
    pub raw: String,
    pub marker: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invocation failed: {0}")]
    Invocation(#[source] ClientError),
    #[error("log fetch failed: {0}")]
    Fetch(#[source] ClientError),
    #[error("deadline exceeded before completion")]
    Timeout { partial_log: String },
    #[error("log integrity violation: {0}")]
    Integrity(#[from] CompletionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Completed,
    TimedOut,
    Errored,
}

/// Everything one backend produced for one fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub backend: BackendKind,
    pub raw_log: String,
    pub normalized_log: String,
    pub status: OutcomeStatus,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn errored(backend: BackendKind, raw_log: String, error: impl fmt::Display) -> Self {
        Self {
            backend,
            raw_log,
            normalized_log: String::new(),
            status: OutcomeStatus::Errored,
            error: Some(error.to_string()),
        }
    }
}

/// One of the two compute platforms under comparison.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Grammar its captures follow.
    fn grammar(&self) -> CompletionGrammar;

    /// Starts the fixture. This is the rate-limited call.
    async fn invoke(
        &self,
        fixture: &TestFixture,
        debug: &DebugSender,
    ) -> Result<BackendHandle, BackendError>;

    /// Waits until the execution behind `handle` has finished and returns its
    /// log. Log text is also streamed to `chunks` in arrival order.
    async fn await_completion(
        &self,
        fixture: &TestFixture,
        handle: BackendHandle,
        deadline: Instant,
        debug: &DebugSender,
        chunks: &ChunkSender,
    ) -> Result<CapturedLog, BackendError>;

    /// Awaits `handle`, normalizes the capture and folds every error into
    /// the returned outcome.
    async fn finish(
        &self,
        fixture: &TestFixture,
        handle: BackendHandle,
        deadline: Instant,
        debug: &DebugSender,
        chunks: &ChunkSender,
    ) -> ExecutionOutcome {
        let kind = self.kind();
        let normalizer = LogNormalizer::for_runtime(&fixture.runtime);
        match self
            .await_completion(fixture, handle, deadline, debug, chunks)
            .await
        {
            Ok(captured) => {
                let queue_marker = match self.grammar() {
                    CompletionGrammar::Queue => captured.marker.as_deref(),
                    CompletionGrammar::Invoke => None,
                };
                match normalizer.normalize_capture(self.grammar(), &captured.raw, queue_marker) {
                    Ok(normalized) => ExecutionOutcome {
                        backend: kind,
                        raw_log: captured.raw,
                        normalized_log: normalized,
                        status: OutcomeStatus::Completed,
                        error: None,
                    },
                    Err(error) => ExecutionOutcome::errored(kind, captured.raw, error),
                }
            }
            Err(BackendError::Timeout { partial_log }) => {
                debug!(fixture = %fixture.derived_name, backend = %kind, "backend timed out");
                ExecutionOutcome {
                    backend: kind,
                    normalized_log: normalizer.normalize_partial(self.grammar(), &partial_log),
                    raw_log: partial_log,
                    status: OutcomeStatus::TimedOut,
                    error: Some("deadline exceeded before completion".to_string()),
                }
            }
            Err(error) => ExecutionOutcome::errored(kind, String::new(), error),
        }
    }

    /// Invokes then finishes; never returns an error.
    async fn run(
        &self,
        fixture: &TestFixture,
        deadline: Instant,
        debug: &DebugSender,
        chunks: &ChunkSender,
    ) -> ExecutionOutcome {
        match self.invoke(fixture, debug).await {
            Ok(handle) => self.finish(fixture, handle, deadline, debug, chunks).await,
            Err(error) => ExecutionOutcome::errored(self.kind(), String::new(), error),
        }
    }
}
