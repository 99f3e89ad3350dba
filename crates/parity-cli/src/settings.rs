use std::time::Duration;

use anyhow::{bail, Result};
use parity_backends::{AwsCredentials, IronWorkerConfig, LambdaClientConfig};
use parity_fixtures::CatalogOptions;
use parity_runner::{DualRunnerConfig, ReconcilerConfig, SendGridConfig};

use crate::cli_args::Cli;

const CLIENT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Everything the harness needs, resolved from flags and environment.
#[derive(Debug, Clone)]
pub(crate) struct HarnessSettings {
    pub catalog: CatalogOptions,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub runner: DualRunnerConfig,
    pub reconciler: ReconcilerConfig,
    pub image_prefix: String,
    pub iron: IronWorkerConfig,
    pub lambda: LambdaClientConfig,
    pub sendgrid: Option<SendGridConfig>,
}

impl HarnessSettings {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut catalog = CatalogOptions::new(cli.tests_dir.clone());
        catalog.suite_prefix = cli.suite_prefix.clone();
        catalog.filter = cli
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
            .map(str::to_string);

        let iron = IronWorkerConfig::new(
            iron_api_base(&cli.iron_host),
            required(&cli.iron_project_id, "IRON_PROJECT_ID")?,
            required(&cli.iron_token, "IRON_TOKEN")?,
        );
        let lambda = LambdaClientConfig {
            region: cli.aws_region.trim().to_string(),
            credentials: AwsCredentials {
                access_key_id: required(&cli.aws_access_key_id, "AWS_ACCESS_KEY_ID")?,
                secret_access_key: required(&cli.aws_secret_access_key, "AWS_SECRET_ACCESS_KEY")?,
                session_token: optional(&cli.aws_session_token),
            },
            lambda_endpoint: optional(&cli.lambda_endpoint),
            logs_endpoint: optional(&cli.logs_endpoint),
            request_timeout_ms: CLIENT_REQUEST_TIMEOUT_MS,
        };
        let sendgrid = optional(&cli.sendgrid_api_key).map(|api_key| {
            let mut config = SendGridConfig::new(api_key);
            config.task_id = optional(&cli.task_id);
            config
        });

        let settings = Self {
            catalog,
            concurrency: cli.concurrency,
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            runner: DualRunnerConfig {
                fixture_overhead: Duration::from_secs(cli.fixture_overhead_secs),
            },
            reconciler: ReconcilerConfig {
                heartbeat_interval: Duration::from_secs(cli.heartbeat_secs),
                notify_grace: Duration::from_secs(cli.notify_grace_secs),
            },
            image_prefix: required(&cli.image_prefix, "IRON_LAMBDA_TEST_IMAGE_PREFIX")?,
            iron,
            lambda,
            sendgrid,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must be greater than 0");
        }
        if self.reconciler.heartbeat_interval.is_zero() {
            bail!("heartbeat interval must be greater than 0");
        }
        if self.lambda.region.is_empty() {
            bail!("AWS_REGION must not be empty");
        }
        if self.catalog.suite_prefix.trim().is_empty() {
            bail!("suite prefix must not be empty");
        }
        Ok(())
    }
}

fn iron_api_base(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    match optional(value) {
        Some(value) => Ok(value),
        None => bail!("{name} must be set"),
    }
}
