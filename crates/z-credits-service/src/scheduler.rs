//! Interval polling for the background processors.
//!
//! Each job runs on its own task driven by `tokio::time::interval`. A cycle
//! that is still running when the next tick arrives causes that tick to be
//! skipped, so cycles never overlap and never queue up behind a slow one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::processor::{AlertProcessor, TopupProcessor};

/// A unit of periodic work.
#[async_trait]
pub trait PollJob: Send + Sync + 'static {
    /// Name used in logs and stats.
    fn name(&self) -> &'static str;

    /// Run one cycle. Errors are the job's to log.
    async fn run(&self);
}

#[derive(Debug, Default)]
struct PollState {
    running: AtomicBool,
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
}

/// Clears the running flag even if the job panics.
struct RunningGuard(Arc<PollState>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Counters for one polling loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Cycles that started.
    pub cycles_started: u64,
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Ticks dropped because a cycle was still running.
    pub cycles_skipped: u64,
    /// Whether a cycle is running now.
    pub running: bool,
}

/// Read-only view of a running loop, for health reporting.
#[derive(Debug, Clone)]
pub struct PollMonitor {
    name: &'static str,
    state: Arc<PollState>,
}

impl PollMonitor {
    /// Job name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PollStats {
        PollStats {
            cycles_started: self.state.cycles_started.load(Ordering::SeqCst),
            cycles_completed: self.state.cycles_completed.load(Ordering::SeqCst),
            cycles_skipped: self.state.cycles_skipped.load(Ordering::SeqCst),
            running: self.state.running.load(Ordering::SeqCst),
        }
    }
}

/// Owner of a polling loop.
pub struct PollHandle {
    monitor: PollMonitor,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// A monitor for this loop.
    #[must_use]
    pub fn monitor(&self) -> PollMonitor {
        self.monitor.clone()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PollStats {
        self.monitor.stats()
    }

    /// Stop the loop and wait for an in-flight cycle to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(job = self.monitor.name, error = %e, "Poll loop terminated abnormally");
        }
    }
}

/// Starts polling loops that share one shutdown signal.
#[derive(Debug, Clone, Default)]
pub struct PollScheduler {
    shutdown: CancellationToken,
}

impl PollScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every loop started by this scheduler.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run `job` every `interval`, starting immediately.
    #[must_use]
    pub fn start(&self, job: Arc<dyn PollJob>, interval: Duration) -> PollHandle {
        let cancel = self.shutdown.child_token();
        let state = Arc::new(PollState::default());
        let monitor = PollMonitor {
            name: job.name(),
            state: Arc::clone(&state),
        };

        tracing::info!(job = job.name(), interval_secs = interval.as_secs(), "Poll loop started");
        let task = tokio::spawn(poll_loop(job, interval, state, cancel.clone()));

        PollHandle {
            monitor,
            cancel,
            task,
        }
    }
}

async fn poll_loop(
    job: Arc<dyn PollJob>,
    interval: Duration,
    state: Arc<PollState>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            _ = ticker.tick() => {
                if state.running.swap(true, Ordering::SeqCst) {
                    state.cycles_skipped.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(job = job.name(), "Previous cycle still running, skipping tick");
                    continue;
                }

                state.cycles_started.fetch_add(1, Ordering::SeqCst);
                let job = Arc::clone(&job);
                let state = Arc::clone(&state);
                in_flight = Some(tokio::spawn(async move {
                    let guard = RunningGuard(Arc::clone(&state));
                    job.run().await;
                    state.cycles_completed.fetch_add(1, Ordering::SeqCst);
                    drop(guard);
                }));
            }
        }
    }

    if let Some(task) = in_flight {
        if let Err(e) = task.await {
            tracing::error!(job = job.name(), error = %e, "Final cycle failed");
        }
    }
    tracing::info!(job = job.name(), "Poll loop stopped");
}

/// Runs a top-up cycle on every tick.
pub struct TopupJob {
    processor: Arc<TopupProcessor>,
}

impl TopupJob {
    /// Wrap a processor.
    #[must_use]
    pub fn new(processor: Arc<TopupProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl PollJob for TopupJob {
    fn name(&self) -> &'static str {
        "auto_topup"
    }

    async fn run(&self) {
        if let Err(e) = self.processor.process_all(Utc::now()).await {
            tracing::error!(error = %e, "Top-up cycle failed");
        }
    }
}

/// Runs an alert cycle on every tick.
pub struct AlertJob {
    processor: Arc<AlertProcessor>,
}

impl AlertJob {
    /// Wrap a processor.
    #[must_use]
    pub fn new(processor: Arc<AlertProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl PollJob for AlertJob {
    fn name(&self) -> &'static str {
        "low_balance_alerts"
    }

    async fn run(&self) {
        if let Err(e) = self.processor.process_all(Utc::now()).await {
            tracing::error!(error = %e, "Alert cycle failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SleepJob {
        work: Duration,
    }

    #[async_trait]
    impl PollJob for SleepJob {
        fn name(&self) -> &'static str {
            "sleep"
        }

        async fn run(&self) {
            tokio::time::sleep(self.work).await;
        }
    }

    fn job(work_secs: u64) -> Arc<dyn PollJob> {
        Arc::new(SleepJob {
            work: Duration::from_secs(work_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_every_tick() {
        let scheduler = PollScheduler::new();
        let handle = scheduler.start(job(0), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(25)).await;
        let stats = handle.stats();
        assert_eq!(stats.cycles_started, 3);
        assert_eq!(stats.cycles_completed, 3);
        assert_eq!(stats.cycles_skipped, 0);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_skips_ticks() {
        let scheduler = PollScheduler::new();
        let handle = scheduler.start(job(25), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(35)).await;
        let stats = handle.stats();
        assert_eq!(stats.cycles_started, 2);
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.cycles_skipped, 2);
        assert!(stats.running);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_cycle() {
        let scheduler = PollScheduler::new();
        let handle = scheduler.start(job(5), Duration::from_secs(60));
        let monitor = handle.monitor();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(monitor.stats().running);

        handle.stop().await;
        let stats = monitor.stats();
        assert_eq!(stats.cycles_completed, 1);
        assert!(!stats.running);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_loop() {
        let scheduler = PollScheduler::new();
        let a = scheduler.start(job(0), Duration::from_secs(10));
        let b = scheduler.start(job(0), Duration::from_secs(10));

        let (a_monitor, b_monitor) = (a.monitor(), b.monitor());

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown();
        a.stop().await;
        b.stop().await;

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(a_monitor.stats().cycles_started, 1);
        assert_eq!(b_monitor.stats().cycles_started, 1);
    }
}
