//! Recurring background work as an injected capability
//!
//! The engine never owns a timer of its own. Hosts hand it a [`Scheduler`];
//! every job it starts comes back as a [`ScheduledTask`] that stops the job
//! when cancelled or dropped.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A job run once per period
pub type ScheduledFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs jobs on a fixed period
pub trait Scheduler: Send + Sync {
    /// Start running `task` every `period`, first run one period from now
    fn every(&self, period: Duration, task: ScheduledFn) -> ScheduledTask;
}

/// Handle to a running job. Dropping it cancels the job.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Wrap a cancellation token and, if one was spawned, the job's task
    pub fn new(token: CancellationToken, handle: Option<JoinHandle<()>>) -> Self {
        Self { token, handle }
    }

    /// Stop future runs. A run already in progress finishes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the job has been told to stop
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the job loop to exit
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Scheduled task ended abnormally");
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// [`Scheduler`] backed by `tokio::time::interval`.
///
/// Must be used from inside a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    /// Create a scheduler on the current runtime
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn every(&self, period: Duration, task: ScheduledFn) -> ScheduledTask {
        let period = period.max(Duration::from_millis(1));
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => task().await,
                }
            }
            tracing::debug!("Scheduled task stopped");
        });

        ScheduledTask::new(token, Some(handle))
    }
}
