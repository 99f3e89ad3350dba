use async_trait::async_trait;
use parity_fixtures::TestFixture;
use parity_logs::{detect_completion, CompletionGrammar};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::backend::{
    BackendError, BackendHandle, BackendKind, CapturedLog, ChunkSender, DebugSender,
    ExecutionBackend,
};
use crate::client::{ClientError, InvokeClient};
use crate::snapshot::LogSnapshot;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Serverless adapter: fire-and-forget invocation, then poll the log store
/// until the request's span is complete.
pub struct InvokeBackend {
    client: Arc<dyn InvokeClient>,
    poll_interval: Duration,
}

impl InvokeBackend {
    pub fn new(client: Arc<dyn InvokeClient>) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    async fn baseline(&self, function_name: &str) -> Result<LogSnapshot, BackendError> {
        match self.client.fetch_recent_log(function_name).await {
            Ok(text) => Ok(LogSnapshot::capture(&text)),
            Err(ClientError::NotFound(_)) => Ok(LogSnapshot::empty()),
            Err(error) => Err(BackendError::Fetch(error)),
        }
    }
}

#[async_trait]
impl ExecutionBackend for InvokeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Invoke
    }

    fn grammar(&self) -> CompletionGrammar {
        CompletionGrammar::Invoke
    }

    async fn invoke(
        &self,
        fixture: &TestFixture,
        debug: &DebugSender,
    ) -> Result<BackendHandle, BackendError> {
        let function_name = fixture.derived_name.clone();
        let baseline = self.baseline(&function_name).await?;
        self.client
            .invoke_async(&function_name, &fixture.payload())
            .await
            .map_err(BackendError::Invocation)?;
        debug!(fixture = %function_name, "invoked function asynchronously");
        let _ = debug.send(format!("invoke: invoked {function_name}"));
        Ok(BackendHandle::Invocation {
            function_name,
            baseline,
        })
    }

    async fn await_completion(
        &self,
        _fixture: &TestFixture,
        handle: BackendHandle,
        deadline: Instant,
        debug: &DebugSender,
        chunks: &ChunkSender,
    ) -> Result<CapturedLog, BackendError> {
        let BackendHandle::Invocation {
            function_name,
            baseline,
        } = handle
        else {
            return Err(BackendError::Invocation(ClientError::InvalidResponse(
                "invoke backend received a foreign handle".to_string(),
            )));
        };

        let mut poll = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        let mut partial = String::new();
        let mut last_error: Option<ClientError> = None;
        let mut polls = 0_u32;

        loop {
            tokio::select! {
                _ = &mut expiry => {
                    return match last_error {
                        Some(error) if partial.is_empty() => Err(BackendError::Fetch(error)),
                        _ => Err(BackendError::Timeout { partial_log: partial }),
                    };
                }
                _ = poll.tick() => {}
            }

            polls = polls.saturating_add(1);
            match self.client.fetch_recent_log(&function_name).await {
                Ok(text) => {
                    last_error = None;
                    let fresh = baseline.new_content(&text);
                    if fresh != partial {
                        let _ = debug.send(format!(
                            "invoke: poll {polls} observed {} new bytes",
                            fresh.len()
                        ));
                        // A rotated stream restarts the chunk sequence.
                        let appended = fresh.strip_prefix(partial.as_str()).unwrap_or(fresh);
                        let _ = chunks.send(appended.to_string());
                    }
                    partial = fresh.to_string();
                    let scan = detect_completion(CompletionGrammar::Invoke, fresh)?;
                    if scan.complete {
                        debug!(fixture = %function_name, polls, "invocation span complete");
                        return Ok(CapturedLog {
                            raw: partial,
                            marker: scan.marker,
                        });
                    }
                }
                Err(ClientError::NotFound(_)) => {
                    let _ = debug.send(format!("invoke: poll {polls} found no log stream yet"));
                }
                Err(error) => {
                    warn!(fixture = %function_name, polls, %error, "log store poll failed");
                    let _ = debug.send(format!("invoke: poll {polls} failed: {error}"));
                    last_error = Some(error);
                }
            }
        }
    }
}
