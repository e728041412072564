//! Probe scheduling.
//!
//! One independent repeating timer per (target, probe) pair, each on its
//! own tokio task. Pairs run fully in parallel with no cross-pair
//! ordering; within a pair, each tick is awaited before the next one is
//! taken and missed ticks are skipped, so a probe can never overlap
//! itself. Every registered probe runs eagerly once at startup - the
//! interval's first tick completes immediately.

use crate::metrics::MetricSink;
use crate::probe::{self, Target};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Errors that can occur in the scheduler
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Probe task panicked: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Scheduler for periodic probe execution
pub struct Scheduler {
    targets: Vec<Arc<Target>>,
    sink: Arc<MetricSink>,
    query_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        targets: Vec<Arc<Target>>,
        sink: Arc<MetricSink>,
        query_timeout: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            targets,
            sink,
            query_timeout,
            shutdown_rx,
        }
    }

    /// Spawn one timer task per (target, probe) pair and run until a
    /// shutdown signal is received.
    pub async fn run(self) -> Result<(), SchedulerError> {
        let mut tasks = JoinSet::new();
        let mut pairs = 0;

        for target in &self.targets {
            for probe in target.probes() {
                let target = Arc::clone(target);
                let probe = probe.clone();
                let sink = Arc::clone(&self.sink);
                let shutdown_rx = self.shutdown_rx.clone();
                let timeout = self.query_timeout;

                tasks.spawn(probe_loop(target, probe, sink, timeout, shutdown_rx));
                pairs += 1;
            }
        }

        info!(pairs, "Probe scheduler started");

        if tasks.is_empty() {
            // Nothing to schedule; stay alive until shutdown so the
            // metrics endpoint keeps serving.
            let mut shutdown_rx = self.shutdown_rx.clone();
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
            return Ok(());
        }

        while let Some(res) = tasks.join_next().await {
            res?;
        }

        info!("Probe scheduler stopped");
        Ok(())
    }

    /// Run every registered probe exactly once (dry-run mode).
    pub async fn run_once(&self) {
        info!("Running every probe once");

        let runs = self.targets.iter().flat_map(|target| {
            target.probes().iter().map(move |probe| {
                probe::run(target, probe, &self.sink, self.query_timeout)
            })
        });

        futures::future::join_all(runs).await;
    }
}

/// Repeating timer for one (target, probe) pair.
///
/// The probe/target snapshots are moved into the task by value, so the
/// loop never reads shared loop variables. Awaiting `run` before taking
/// the next tick is what serializes a pair with itself.
async fn probe_loop(
    target: Arc<Target>,
    probe: crate::config::ProbeConfig,
    sink: Arc<MetricSink>,
    timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(probe.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                probe::run(&target, &probe, &sink, timeout).await;
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!(
                        database = %target.name(),
                        probe = %probe.name,
                        "Probe loop received shutdown signal"
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_returns_after_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sink = Arc::new(MetricSink::new().unwrap());
        let scheduler = Scheduler::new(vec![], sink, Duration::from_secs(1), shutdown_rx);

        let handle = tokio::spawn(scheduler.run());
        let _ = shutdown_tx.send(true);

        let res = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .expect("scheduler task panicked");
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_run_once_with_no_targets() {
        let (_tx, shutdown_rx) = watch::channel(false);
        let sink = Arc::new(MetricSink::new().unwrap());
        let scheduler = Scheduler::new(vec![], sink, Duration::from_secs(1), shutdown_rx);

        scheduler.run_once().await;
    }
}
