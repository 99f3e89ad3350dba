//! Orchestration: runs every fixture on both backends under a shared
//! concurrency limit, fans the per-fixture streams into one, and reconciles
//! the verdicts into a report.

mod channel_join;
mod dual_runner;
mod governor;
mod notifier;
mod reconciler;
#[cfg(test)]
mod test_support;

pub use channel_join::{forward_with_heartbeat, join_channels, DEFAULT_HEARTBEAT_INTERVAL};
pub use dual_runner::{
    BackendEvent, DualRunner, DualRunnerConfig, TestVerdict, Verdict, DEFAULT_FIXTURE_OVERHEAD,
};
pub use governor::{ConcurrencyGovernor, GovernorPermit, DEFAULT_CONCURRENCY};
pub use notifier::{
    FailureNotice, LogNotifier, Notifier, NotifyError, SendGridConfig, SendGridNotifier,
    DEFAULT_SENDGRID_ENDPOINT,
};
pub use reconciler::{global_deadline, ReconcileEvent, Reconciler, ReconcilerConfig, RunReport};
