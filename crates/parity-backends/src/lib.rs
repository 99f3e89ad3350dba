//! Execution backends under comparison and the service clients they drive.
//!
//! [`QueueBackend`] enqueues a task on a hosted job queue and waits for the
//! service's completion signal. [`InvokeBackend`] fires an asynchronous
//! function invocation and polls a shared log store until the request's span
//! is complete. Both stream raw log text while they wait and fold the final
//! capture into a normalized [`ExecutionOutcome`].

mod aws_client;
mod backend;
mod client;
mod invoke_backend;
mod iron_client;
mod queue_backend;
mod sigv4;
mod snapshot;

pub use aws_client::{AwsCredentials, LambdaClient, LambdaClientConfig};
pub use backend::{
    BackendError, BackendHandle, BackendKind, CapturedLog, ChunkSender, DebugSender,
    ExecutionBackend, ExecutionOutcome, OutcomeStatus, RunRequest,
};
pub use client::{ClientError, InvokeClient, QueueClient, QueueTask, QueueTaskStatus};
pub use invoke_backend::{InvokeBackend, DEFAULT_POLL_INTERVAL};
pub use iron_client::{IronWorkerClient, IronWorkerConfig, DEFAULT_IRON_HOST};
pub use queue_backend::QueueBackend;
pub use snapshot::LogSnapshot;
