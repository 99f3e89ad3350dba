use anyhow::{Context, Result};
use parity_backends::{InvokeClient, QueueClient};
use tracing::info;

/// Fails fast when either service is unreachable or rejects the credentials.
pub(crate) async fn verify_connectivity(
    queue: &dyn QueueClient,
    invoke: &dyn InvokeClient,
) -> Result<()> {
    queue
        .ping()
        .await
        .context("IronWorker connectivity check failed")?;
    invoke
        .ping()
        .await
        .context("AWS connectivity check failed")?;
    info!("verified IronWorker and AWS connectivity");
    Ok(())
}
