//! Worker engine: pulls ready tasks, claims them, runs the transfer and
//! records the outcome.
//!
//! Every step is safe to repeat after a crash: the claim is a
//! compare-and-set, results are upserts, and a task is deleted only after
//! its result is written.

mod collection;
mod download;
mod migration;
mod progress;
mod run;
mod traits;

use std::sync::Arc;

use thiserror::Error;

use crate::config::{WorkerConfig, XferqConfig};
use crate::error::StoreError;
use crate::fanout::{Coordinator, FanOutError};
use crate::retry::{classify_store_error, ErrorKind, RetryPolicy};
use crate::task_db::{now_millis, TaskDb, TaskId};

pub use progress::StoreProgress;
pub use run::{run_workers, MaintenanceReport, RunStats};
pub use traits::*;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    FanOut(#[from] FanOutError),
}

impl WorkerError {
    pub fn retry_kind(&self) -> ErrorKind {
        match self {
            WorkerError::Store(e) | WorkerError::FanOut(FanOutError::Store(e)) => {
                classify_store_error(e)
            }
            // Metadata engine unreachable.
            WorkerError::FanOut(FanOutError::Resolve { .. }) => ErrorKind::Connection,
        }
    }
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// What one poll of a queue did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    /// Nothing ready.
    Idle,
    /// Another worker claimed the task first.
    Contended,
    /// Picked up, but parked until a later poll (e.g. waiting on a restore).
    Deferred(TaskId),
    Done(T),
}

impl<T> Step<T> {
    pub fn is_idle(&self) -> bool {
        matches!(self, Step::Idle)
    }
}

/// External systems the worker hands work to.
#[derive(Clone)]
pub struct Collaborators {
    pub transfers: Arc<dyn TransferExecutor>,
    pub migrations: Arc<dyn MigrationExecutor>,
    pub resolver: Arc<dyn PathResolver>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct Worker {
    db: TaskDb,
    owner_id: String,
    config: WorkerConfig,
    retry: RetryPolicy,
    /// Owners whose leftover claims are cleared when [`run_workers`] starts.
    recovery_owners: Vec<String>,
    collaborators: Collaborators,
    coordinator: Coordinator,
}

impl Worker {
    pub fn new(
        db: TaskDb,
        owner_id: impl Into<String>,
        config: WorkerConfig,
        collaborators: Collaborators,
    ) -> Self {
        let owner_id = owner_id.into();
        let coordinator = Coordinator::new(
            db.clone(),
            owner_id.clone(),
            Arc::clone(&collaborators.notifier),
        );
        Self {
            db,
            recovery_owners: vec![owner_id.clone()],
            owner_id,
            config,
            retry: RetryPolicy::default(),
            collaborators,
            coordinator,
        }
    }

    /// Worker for this instance as configured: owner id, `[worker]` limits,
    /// the `[retry]` policy and the dead owners to recover from at start.
    pub fn from_config(db: TaskDb, cfg: &XferqConfig, collaborators: Collaborators) -> Self {
        let retry = cfg.retry.as_ref().map(RetryPolicy::from).unwrap_or_default();
        Self::new(db, cfg.owner_id.clone(), cfg.worker.clone(), collaborators)
            .with_retry_policy(retry)
            .with_recovery_owners(cfg.recovery_owners())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// This worker's own id is always included.
    pub fn with_recovery_owners(mut self, owners: Vec<String>) -> Self {
        let mut all = vec![self.owner_id.clone()];
        for owner in owners {
            if !all.contains(&owner) {
                all.push(owner);
            }
        }
        self.recovery_owners = all;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn recovery_owners(&self) -> &[String] {
        &self.recovery_owners
    }

    pub fn db(&self) -> &TaskDb {
        &self.db
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Tasks attempted at or after this instant are not picked again yet.
    fn attempt_cutoff(&self) -> i64 {
        now_millis() - self.config.claim_staleness().as_millis() as i64
    }

    /// One poll across all queues, downloads first.
    pub async fn run_once(&self) -> WorkerResult<Activity> {
        let step = self.run_once_download().await?;
        if !step.is_idle() {
            return Ok(Activity::Download(step));
        }
        let step = self.run_once_collection().await?;
        if !step.is_idle() {
            return Ok(Activity::Collection(step));
        }
        let step = self.run_once_bulk_migration().await?;
        if !step.is_idle() {
            return Ok(Activity::BulkMigration(step));
        }
        let step = self.run_once_migration().await?;
        if !step.is_idle() {
            return Ok(Activity::Migration(step));
        }
        Ok(Activity::Idle)
    }
}

/// Result of [`Worker::run_once`].
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    Idle,
    Download(Step<crate::task_db::DownloadTaskResult>),
    Collection(Step<Vec<TaskId>>),
    BulkMigration(Step<Vec<TaskId>>),
    Migration(Step<crate::task_db::DataMigrationTaskResult>),
}
