use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dual_runner::Verdict;

pub const DEFAULT_SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";
const MISSING_TASK_ID: &str = "\"No task ID, not running on IronWorker.\"";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification rejected with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("invalid notifier configuration: {0}")]
    Config(String),
}

/// A fixture that did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
    pub fixture_name: String,
    pub verdict: Verdict,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError>;
}

/// Used when mail delivery is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        warn!(
            fixture = %notice.fixture_name,
            verdict = %notice.verdict,
            reason = notice.reason.as_deref().unwrap_or(""),
            "test failure"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: String,
    pub endpoint: String,
    pub from_email: String,
    pub from_name: String,
    pub to: Vec<String>,
    /// Identifies the harness run in the mail body.
    pub task_id: Option<String>,
    pub request_timeout_ms: u64,
}

impl SendGridConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_SENDGRID_ENDPOINT.to_string(),
            from_email: "lambda-test-suite-notifications@iron.io".to_string(),
            from_name: "Lambda Test Suite".to_string(),
            to: vec!["dev@iron.io".to_string()],
            task_id: None,
            request_timeout_ms: 10_000,
        }
    }
}

/// Sends one plain-text mail per failing fixture.
#[derive(Debug, Clone)]
pub struct SendGridNotifier {
    client: reqwest::Client,
    config: SendGridConfig,
}

impl SendGridNotifier {
    pub fn new(config: SendGridConfig) -> Result<Self, NotifyError> {
        if config.api_key.trim().is_empty() {
            return Err(NotifyError::Config("missing SendGrid API key".to_string()));
        }
        if config.to.is_empty() {
            return Err(NotifyError::Config("no notification recipients".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    fn subject(notice: &FailureNotice) -> String {
        format!("TEST-FAILURE {}", notice.fixture_name)
    }

    fn body(&self, notice: &FailureNotice) -> String {
        let task_id = self.config.task_id.as_deref().unwrap_or(MISSING_TASK_ID);
        let mut body = format!(
            "The following test failed due to divergence between IronWorker and AWS Lambda output:\n\n\t{}: {} ({})\n",
            notice.occurred_at.to_rfc3339(),
            notice.fixture_name,
            notice.verdict
        );
        if let Some(reason) = notice.reason.as_deref() {
            body.push_str(&format!("\t{reason}\n"));
        }
        body.push_str(&format!(
            "\nPlease check the task log for task ID {task_id} for full output."
        ));
        body
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        let to: Vec<_> = self
            .config
            .to
            .iter()
            .map(|email| json!({ "email": email }))
            .collect();
        let payload = json!({
            "personalizations": [{ "to": to }],
            "from": { "email": self.config.from_email, "name": self.config.from_name },
            "subject": Self::subject(notice),
            "content": [{ "type": "text/plain", "value": self.body(notice) }]
        });
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.trim())
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        debug!(fixture = %notice.fixture_name, "failure mail sent");
        Ok(())
    }
}
