//! Background maintenance
//!
//! Two independent timers: pattern pruning (hourly by default) and cluster
//! optimization (every six hours). Each run happens on the blocking pool so
//! the async runtime keeps serving queries. A failed run is logged and simply
//! retried on the next tick.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::{MaintenanceJob, MaintenanceReport, ParkingEngine};
use crate::error::ParkResult;

/// Starts maintenance timers for an engine
pub struct MaintenanceScheduler;

impl MaintenanceScheduler {
    /// Spawn both jobs on the current runtime using the engine's configured cadences
    pub fn spawn(engine: ParkingEngine) -> MaintenanceHandle {
        let cadence = &engine.config().maintenance;
        let patterns_every = Duration::from_secs(cadence.pattern_prune_interval_secs);
        let clusters_every = Duration::from_secs(cadence.cluster_optimize_interval_secs);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pattern_engine = engine.clone();
        let patterns = tokio::spawn(run_job(
            MaintenanceJob::PatternPrune,
            patterns_every,
            shutdown_rx.clone(),
            move || {
                let engine = pattern_engine.clone();
                async move {
                    tokio::task::spawn_blocking(move || engine.run_pattern_maintenance()).await
                }
            },
        ));

        let clusters = tokio::spawn(run_job(
            MaintenanceJob::ClusterOptimize,
            clusters_every,
            shutdown_rx,
            move || {
                let engine = engine.clone();
                async move {
                    tokio::task::spawn_blocking(move || engine.run_cluster_maintenance()).await
                }
            },
        ));

        info!(
            pattern_interval_secs = patterns_every.as_secs(),
            cluster_interval_secs = clusters_every.as_secs(),
            "maintenance scheduler started"
        );

        MaintenanceHandle {
            shutdown: shutdown_tx,
            tasks: vec![patterns, clusters],
        }
    }
}

/// Stops the scheduler when asked
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Signal both timers and wait for them to exit.
    ///
    /// A run already in progress completes first.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }
        info!("maintenance scheduler stopped");
    }
}

async fn run_job<F, Fut>(
    job: MaintenanceJob,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    run: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<ParkResult<MaintenanceReport>, tokio::task::JoinError>>,
{
    // First run one full period after start
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run().await {
                    Ok(Ok(report)) => debug!(
                        job = job.as_str(),
                        pruned = report.pruned,
                        merged = report.merged,
                        "maintenance run complete"
                    ),
                    Ok(Err(e)) => warn!(
                        job = job.as_str(),
                        error = %e,
                        "maintenance run failed, retrying next tick"
                    ),
                    Err(e) => warn!(
                        job = job.as_str(),
                        error = %e,
                        "maintenance run panicked, retrying next tick"
                    ),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
