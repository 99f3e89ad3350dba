mod bootstrap_helpers;
mod cli_args;
mod settings;
mod startup_preflight;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parity_backends::{
    ExecutionBackend, InvokeBackend, IronWorkerClient, LambdaClient, QueueBackend,
};
use parity_fixtures::load_catalog;
use parity_runner::{
    ConcurrencyGovernor, DualRunner, LogNotifier, Notifier, Reconciler, SendGridNotifier,
};
use tracing::{error, info, warn};

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::settings::HarnessSettings;
use crate::startup_preflight::verify_connectivity;

/// Configuration, connectivity and catalog failures.
const EXIT_SETUP_FAILURE: i32 = 2;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            error!("{error:#}");
            EXIT_SETUP_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = HarnessSettings::from_cli(&cli).context("invalid configuration")?;

    let iron = Arc::new(
        IronWorkerClient::new(settings.iron.clone()).context("failed to build IronWorker client")?,
    );
    let lambda = Arc::new(
        LambdaClient::new(settings.lambda.clone()).context("failed to build AWS client")?,
    );
    verify_connectivity(iron.as_ref(), lambda.as_ref()).await?;

    let fixtures = load_catalog(&settings.catalog).context("failed to load fixtures")?;
    if fixtures.is_empty() {
        warn!(root = %settings.catalog.root.display(), "no fixtures matched");
    }
    info!(fixtures = fixtures.len(), "loaded fixture catalog");

    let queue: Arc<dyn ExecutionBackend> =
        Arc::new(QueueBackend::new(iron, settings.image_prefix.clone()));
    let invoke: Arc<dyn ExecutionBackend> =
        Arc::new(InvokeBackend::new(lambda).with_poll_interval(settings.poll_interval));
    let runner = Arc::new(DualRunner::new(
        queue,
        invoke,
        ConcurrencyGovernor::new(settings.concurrency),
        settings.runner,
    ));

    let report = Reconciler::new(runner, build_notifier(&settings)?, settings.reconciler)
        .run(fixtures)
        .await;
    Ok(report.exit_code())
}

fn build_notifier(settings: &HarnessSettings) -> Result<Arc<dyn Notifier>> {
    match settings.sendgrid.clone() {
        Some(config) => Ok(Arc::new(
            SendGridNotifier::new(config).context("failed to build SendGrid notifier")?,
        )),
        None => {
            info!("SendGrid support not enabled");
            Ok(Arc::new(LogNotifier))
        }
    }
}
