use std::path::PathBuf;

use clap::Parser;
use parity_backends::DEFAULT_IRON_HOST;
use parity_fixtures::DEFAULT_SUITE_PREFIX;
use parity_runner::DEFAULT_CONCURRENCY;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "runner",
    about = "Runs every fixture on IronWorker and AWS Lambda and compares their output",
    long_about = "Runs all tests. If filter is passed, only runs tests matching filter. \
                  Filter is applied to the entire path relative to the tests directory."
)]
pub(crate) struct Cli {
    #[arg(help = "Substring matched against each fixture path relative to the tests directory")]
    pub filter: Option<String>,

    #[arg(
        long = "tests-dir",
        env = "PARITY_TESTS_DIR",
        default_value = "tests",
        help = "Root holding <runtime>/<fixture>/lambda.test files"
    )]
    pub tests_dir: PathBuf,

    #[arg(
        long = "suite-prefix",
        env = "PARITY_SUITE_PREFIX",
        default_value = DEFAULT_SUITE_PREFIX,
        help = "Prefix of every derived function and image name"
    )]
    pub suite_prefix: String,

    #[arg(
        long,
        env = "PARITY_CONCURRENCY",
        default_value_t = DEFAULT_CONCURRENCY,
        value_parser = parse_positive_usize,
        help = "Maximum simultaneous backend invocations"
    )]
    pub concurrency: usize,

    #[arg(
        long = "poll-interval-ms",
        env = "PARITY_POLL_INTERVAL_MS",
        default_value_t = 3_000,
        value_parser = parse_positive_u64,
        help = "Interval between log store polls while waiting for a Lambda run"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long = "fixture-overhead-secs",
        env = "PARITY_FIXTURE_OVERHEAD_SECS",
        default_value_t = 60,
        help = "Grace added to each fixture's own timeout"
    )]
    pub fixture_overhead_secs: u64,

    #[arg(
        long = "heartbeat-secs",
        env = "PARITY_HEARTBEAT_SECS",
        default_value_t = 60,
        value_parser = parse_positive_u64,
        help = "Silence after which a fixture's last progress line is repeated"
    )]
    pub heartbeat_secs: u64,

    #[arg(
        long = "notify-grace-secs",
        env = "PARITY_NOTIFY_GRACE_SECS",
        default_value_t = 30,
        help = "How long to wait for failure mails before exiting"
    )]
    pub notify_grace_secs: u64,

    #[arg(
        long = "image-prefix",
        env = "IRON_LAMBDA_TEST_IMAGE_PREFIX",
        help = "Docker image prefix of the IronWorker code packages"
    )]
    pub image_prefix: Option<String>,

    #[arg(long = "iron-token", env = "IRON_TOKEN", hide_env_values = true)]
    pub iron_token: Option<String>,

    #[arg(long = "iron-project-id", env = "IRON_PROJECT_ID")]
    pub iron_project_id: Option<String>,

    #[arg(long = "iron-host", env = "IRON_HOST", default_value = DEFAULT_IRON_HOST)]
    pub iron_host: String,

    #[arg(long = "aws-access-key-id", env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,

    #[arg(
        long = "aws-secret-access-key",
        env = "AWS_SECRET_ACCESS_KEY",
        hide_env_values = true
    )]
    pub aws_secret_access_key: Option<String>,

    #[arg(long = "aws-session-token", env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub aws_session_token: Option<String>,

    #[arg(long = "aws-region", env = "AWS_REGION", default_value = "us-east-1")]
    pub aws_region: String,

    #[arg(
        long = "lambda-endpoint",
        env = "PARITY_LAMBDA_ENDPOINT",
        help = "Override for the Lambda API base URL"
    )]
    pub lambda_endpoint: Option<String>,

    #[arg(
        long = "logs-endpoint",
        env = "PARITY_LOGS_ENDPOINT",
        help = "Override for the CloudWatch Logs API base URL"
    )]
    pub logs_endpoint: Option<String>,

    #[arg(long = "sendgrid-api-key", env = "SENDGRID_API_KEY", hide_env_values = true)]
    pub sendgrid_api_key: Option<String>,

    #[arg(long = "task-id", env = "TASK_ID", help = "IronWorker task running this harness")]
    pub task_id: Option<String>,
}
