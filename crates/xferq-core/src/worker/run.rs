//! Run the worker with up to `max_concurrent_tasks` polls in flight.
//!
//! Each slot runs one [`Worker::run_once`]. When a poll comes back idle no new
//! slots are filled until the in-flight ones drain; bulk parents are then
//! swept and the loop sleeps for the poll interval. Store failures back off
//! per the retry policy; the loop only stops on shutdown. Claims left by this
//! owner (or configured dead owners) are recovered once before the first poll.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{Activity, Worker, WorkerResult};
use crate::retry::{ErrorKind, RetryDecision};
use crate::task_db::{now_millis, TaskFamily};

/// Housekeeping done by one [`Worker::maintain`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub stale_claims_released: u64,
    pub collections_resolved: usize,
    pub migrations_completed: usize,
    pub tokens_purged: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub polls: u64,
    pub errors: u64,
}

impl Worker {
    /// Expire stale claims, sweep bulk parents and purge old access tokens.
    pub async fn maintain(&self) -> WorkerResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        let now = now_millis();
        let stale_before = now - self.config.claim_staleness().as_millis() as i64;
        for family in TaskFamily::ALL {
            report.stale_claims_released += self.db.release_stale_claims(family, stale_before).await?;
        }
        self.sweep_parents(&mut report).await?;
        let tokens_before = now - self.config.token_retention().as_millis() as i64;
        report.tokens_purged = self.db.purge_result_access_tokens(tokens_before).await?;
        Ok(report)
    }

    /// Resolve bulk parents whose last child finished while another worker
    /// held the parent's claim.
    async fn sweep_parents(&self, report: &mut MaintenanceReport) -> WorkerResult<()> {
        report.collections_resolved += self.resolve_collections().await?.len();
        report.migrations_completed += self.complete_bulk_migrations().await?.len();
        Ok(())
    }
}

/// Poll until `shutdown` turns true. In-flight polls are allowed to finish.
pub async fn run_workers(worker: Worker, mut shutdown: watch::Receiver<bool>) -> RunStats {
    let max_concurrent = worker.config.max_concurrent_tasks.max(1);
    let poll_interval = worker.config.poll_interval();
    let maintenance_interval = worker.config.claim_staleness().max(poll_interval);

    let mut stats = RunStats::default();
    let mut join_set = tokio::task::JoinSet::new();
    let mut idle = false;
    let mut consecutive_errors = 0u32;
    let mut last_maintenance: Option<Instant> = None;

    info!(owner = %worker.owner_id, max_concurrent, "worker started");

    match worker.db.recover_claims(&worker.recovery_owners).await {
        Ok(report) if report.total() > 0 || report.migrations_requeued > 0 => {
            info!(?report, "recovered claims left by a previous run");
        }
        Ok(_) => {}
        Err(e) => {
            stats.errors += 1;
            error!("startup recovery failed: {}", e);
        }
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        if last_maintenance.map_or(true, |t| t.elapsed() >= maintenance_interval) {
            match worker.maintain().await {
                Ok(report) => {
                    if report != MaintenanceReport::default() {
                        info!(?report, "maintenance pass");
                    }
                }
                Err(e) => warn!("maintenance pass failed: {}", e),
            }
            last_maintenance = Some(Instant::now());
        }

        if !idle {
            while join_set.len() < max_concurrent {
                let w = worker.clone();
                join_set.spawn(async move { w.run_once().await });
            }
        }

        if join_set.is_empty() {
            let mut swept = MaintenanceReport::default();
            if let Err(e) = worker.sweep_parents(&mut swept).await {
                warn!("parent sweep failed: {}", e);
            } else if swept != MaintenanceReport::default() {
                info!(?swept, "resolved bulk parents while idle");
            }
            wait_or_shutdown(&mut shutdown, poll_interval).await;
            idle = false;
            continue;
        }

        let Some(joined) = join_set.join_next().await else {
            continue;
        };
        stats.polls += 1;
        match joined {
            Ok(Ok(Activity::Idle)) => idle = true,
            Ok(Ok(_)) => {
                consecutive_errors = 0;
                idle = false;
            }
            Ok(Err(e)) => {
                stats.errors += 1;
                consecutive_errors = consecutive_errors.saturating_add(1);
                if let Some(delay) = error_delay(&worker, consecutive_errors, e.retry_kind()) {
                    warn!(attempt = consecutive_errors, "worker poll failed, backing off {:?}: {}", delay, e);
                    wait_or_shutdown(&mut shutdown, delay).await;
                } else {
                    error!("worker poll failed: {}", e);
                }
            }
            Err(e) => {
                stats.errors += 1;
                error!("worker poll panicked or was cancelled: {}", e);
            }
        }
    }

    while let Some(joined) = join_set.join_next().await {
        stats.polls += 1;
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                stats.errors += 1;
                warn!("worker poll failed during shutdown: {}", e);
            }
            Err(e) => {
                stats.errors += 1;
                error!("worker poll panicked or was cancelled: {}", e);
            }
        }
    }

    info!(owner = %worker.owner_id, polls = stats.polls, errors = stats.errors, "worker stopped");
    stats
}

/// `None` for errors that will not go away by waiting.
fn error_delay(worker: &Worker, attempt: u32, kind: ErrorKind) -> Option<Duration> {
    match worker.retry.decide(attempt, kind) {
        RetryDecision::RetryAfter(d) => Some(d),
        RetryDecision::NoRetry if kind == ErrorKind::Other => None,
        // Persistent store trouble: keep trying at the slowest pace.
        RetryDecision::NoRetry => Some(worker.retry.max_delay),
    }
}

async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        changed = shutdown.changed() => {
            // Sender gone: nobody can ask us to stop, keep the pace.
            if changed.is_err() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
