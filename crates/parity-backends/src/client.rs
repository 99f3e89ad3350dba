use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Work item submitted to the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueTask {
    pub code_name: String,
    pub payload: String,
    pub timeout: u64,
}

/// Terminal state reported by the job queue for one task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueTaskStatus {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub msg: Option<String>,
}

impl QueueTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "complete" | "error" | "cancelled" | "killed" | "timeout"
        )
    }
}

/// Hosted job-queue service.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Cheap authenticated call used to verify connectivity before a run.
    async fn ping(&self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Enqueues the task and returns its id.
    async fn queue_task(&self, task: &QueueTask) -> Result<String, ClientError>;

    /// Resolves once the service reports the task finished.
    async fn wait_for_task(&self, task_id: &str) -> Result<QueueTaskStatus, ClientError>;

    async fn fetch_task_log(&self, task_id: &str) -> Result<String, ClientError>;
}

/// Serverless invoke service plus its cumulative log store.
#[async_trait]
pub trait InvokeClient: Send + Sync {
    async fn ping(&self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Fire-and-forget invocation; there is no synchronous result.
    async fn invoke_async(&self, function_name: &str, payload: &str) -> Result<(), ClientError>;

    /// Current content of the function's most recent log stream.
    ///
    /// Returns [`ClientError::NotFound`] while the store has no stream yet.
    async fn fetch_recent_log(&self, function_name: &str) -> Result<String, ClientError>;
}
