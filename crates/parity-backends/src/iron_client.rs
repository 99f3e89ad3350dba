use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::client::{ClientError, QueueClient, QueueTask, QueueTaskStatus};

pub const DEFAULT_IRON_HOST: &str = "worker-aws-us-east-1.iron.io";

#[derive(Debug, Clone)]
pub struct IronWorkerConfig {
    /// Scheme and host, e.g. `https://worker-aws-us-east-1.iron.io`.
    pub api_base: String,
    pub project_id: String,
    pub token: String,
    pub request_timeout_ms: u64,
    /// Interval between task status checks while waiting for completion.
    pub status_poll_interval: Duration,
    /// Attempts made when the log is not yet available after completion.
    pub log_fetch_attempts: usize,
}

impl IronWorkerConfig {
    pub fn new(
        api_base: impl Into<String>,
        project_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            project_id: project_id.into(),
            token: token.into(),
            request_timeout_ms: 30_000,
            status_poll_interval: Duration::from_secs(1),
            log_fetch_attempts: 5,
        }
    }
}

/// IronWorker REST (v2) client.
#[derive(Debug, Clone)]
pub struct IronWorkerClient {
    client: reqwest::Client,
    config: IronWorkerConfig,
}

#[derive(Debug, Deserialize)]
struct QueuedTasksResponse {
    #[serde(default)]
    tasks: Vec<QueuedTask>,
}

#[derive(Debug, Deserialize)]
struct QueuedTask {
    id: String,
}

impl IronWorkerClient {
    pub fn new(config: IronWorkerConfig) -> Result<Self, ClientError> {
        if config.token.trim().is_empty() {
            return Err(ClientError::Config("missing IronWorker token".to_string()));
        }
        if config.project_id.trim().is_empty() {
            return Err(ClientError::Config("missing IronWorker project id".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("OAuth {}", config.token.trim())).map_err(|e| {
                ClientError::Config(format!("invalid IronWorker token header: {e}"))
            })?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    fn project_url(&self, suffix: &str) -> String {
        format!(
            "{}/2/projects/{}/{suffix}",
            self.config.api_base.trim_end_matches('/'),
            self.config.project_id
        )
    }

    async fn task_status(&self, task_id: &str) -> Result<QueueTaskStatus, ClientError> {
        let response = self
            .client
            .get(self.project_url(&format!("tasks/{task_id}")))
            .send()
            .await?;
        let body = checked_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl QueueClient for IronWorkerClient {
    async fn ping(&self) -> Result<(), ClientError> {
        let response = self
            .client
            .get(self.project_url("tasks"))
            .query(&[("per_page", "1")])
            .send()
            .await?;
        checked_body(response).await.map(|_| ())
    }

    async fn queue_task(&self, task: &QueueTask) -> Result<String, ClientError> {
        let response = self
            .client
            .post(self.project_url("tasks"))
            .json(&json!({ "tasks": [task] }))
            .send()
            .await?;
        let body = checked_body(response).await?;
        let parsed: QueuedTasksResponse = serde_json::from_str(&body)?;
        let Some(first) = parsed.tasks.into_iter().next() else {
            return Err(ClientError::InvalidResponse(format!(
                "empty task id list queueing {}",
                task.code_name
            )));
        };
        Ok(first.id)
    }

    async fn wait_for_task(&self, task_id: &str) -> Result<QueueTaskStatus, ClientError> {
        loop {
            let status = self.task_status(task_id).await?;
            if status.is_terminal() {
                return Ok(status);
            }
            debug!(task_id = %task_id, status = %status.status, "task still running");
            tokio::time::sleep(self.config.status_poll_interval).await;
        }
    }

    async fn fetch_task_log(&self, task_id: &str) -> Result<String, ClientError> {
        let attempts = self.config.log_fetch_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            let response = self
                .client
                .get(self.project_url(&format!("tasks/{task_id}/log")))
                .send()
                .await?;
            match checked_body(response).await {
                Ok(body) => return Ok(body),
                Err(ClientError::NotFound(body)) => {
                    debug!(task_id = %task_id, attempt, "task log not available yet");
                    last_error = Some(ClientError::NotFound(body));
                    tokio::time::sleep(self.config.status_poll_interval).await;
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error
            .unwrap_or_else(|| ClientError::NotFound(format!("log for task {task_id}"))))
    }
}

/// Successful bodies must be valid UTF-8: a replaced byte could make two
/// different logs compare equal.
async fn checked_body(response: reqwest::Response) -> Result<String, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if status.is_success() {
        return String::from_utf8(bytes.to_vec()).map_err(|error| {
            ClientError::InvalidResponse(format!("response body is not valid UTF-8: {error}"))
        });
    }
    let body = String::from_utf8_lossy(&bytes).into_owned();
    if status.as_u16() == 404 {
        return Err(ClientError::NotFound(body));
    }
    Err(ClientError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}
