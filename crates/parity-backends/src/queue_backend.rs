use async_trait::async_trait;
use parity_fixtures::TestFixture;
use parity_logs::CompletionGrammar;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::{
    BackendError, BackendHandle, BackendKind, CapturedLog, ChunkSender, DebugSender,
    ExecutionBackend,
};
use crate::client::{ClientError, QueueClient, QueueTask};

/// Job-queue adapter: the service owns the wait, the adapter fetches once.
pub struct QueueBackend {
    client: Arc<dyn QueueClient>,
    image_prefix: String,
}

impl QueueBackend {
    pub fn new(client: Arc<dyn QueueClient>, image_prefix: impl Into<String>) -> Self {
        Self {
            client,
            image_prefix: image_prefix.into(),
        }
    }

    fn code_name(&self, fixture: &TestFixture) -> String {
        format!(
            "{}/{}",
            self.image_prefix.trim_end_matches('/'),
            fixture.derived_name
        )
    }
}

#[async_trait]
impl ExecutionBackend for QueueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Queue
    }

    fn grammar(&self) -> CompletionGrammar {
        CompletionGrammar::Queue
    }

    async fn invoke(
        &self,
        fixture: &TestFixture,
        debug: &DebugSender,
    ) -> Result<BackendHandle, BackendError> {
        let task = QueueTask {
            code_name: self.code_name(fixture),
            payload: fixture.payload(),
            timeout: fixture.timeout_seconds,
        };
        let task_id = self
            .client
            .queue_task(&task)
            .await
            .map_err(BackendError::Invocation)?;
        debug!(fixture = %fixture.derived_name, task_id = %task_id, "queued task");
        let _ = debug.send(format!("queue: queued task {task_id} ({})", task.code_name));
        Ok(BackendHandle::Task { task_id })
    }

    async fn await_completion(
        &self,
        fixture: &TestFixture,
        handle: BackendHandle,
        deadline: Instant,
        debug: &DebugSender,
        chunks: &ChunkSender,
    ) -> Result<CapturedLog, BackendError> {
        let BackendHandle::Task { task_id } = handle else {
            return Err(BackendError::Invocation(ClientError::InvalidResponse(
                "queue backend received a foreign handle".to_string(),
            )));
        };

        let status = match tokio::time::timeout_at(deadline, self.client.wait_for_task(&task_id))
            .await
        {
            Ok(result) => result.map_err(BackendError::Fetch)?,
            Err(_) => {
                return Err(BackendError::Timeout {
                    partial_log: String::new(),
                })
            }
        };
        debug!(
            fixture = %fixture.derived_name,
            task_id = %task_id,
            status = %status.status,
            "queue task finished"
        );
        let _ = debug.send(format!("queue: task {task_id} finished with status {}", status.status));

        let raw = self
            .client
            .fetch_task_log(&task_id)
            .await
            .map_err(BackendError::Fetch)?;
        let _ = chunks.send(raw.clone());
        Ok(CapturedLog {
            raw,
            marker: Some(task_id),
        })
    }
}
