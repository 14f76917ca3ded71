//! Collaborators the engine calls out to. None of them touch the task store.

use async_trait::async_trait;
use thiserror::Error;

use crate::destination::FileLocation;
use crate::retry::ErrorKind;
use crate::task_db::{
    DataMigrationTask, DataMigrationTaskResult, DataObjectDownloadTask, DownloadResultKind,
    DownloadTaskResult,
};

/// Boxed error from a collaborator.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Receives transfer progress; implementations must not block.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn progress(&self, percent_complete: i64, staging_percent_complete: Option<i64>);
}

/// Whether the source bytes can be read now or must first be restored from
/// deep archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staging {
    Ready,
    RestoreRequested,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub size: Option<i64>,
    /// Bytes per second.
    pub effective_transfer_speed: Option<i64>,
}

/// A failed transfer: the result kind to record and how retryable it is.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransferError {
    pub result: DownloadResultKind,
    pub kind: ErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn new(result: DownloadResultKind, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            result,
            kind,
            message: message.into(),
        }
    }
}

/// Moves the bytes of one data object to its destination. Must tolerate
/// being run again for the same task after a crash.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn stage(&self, _task: &DataObjectDownloadTask) -> Result<Staging, TransferError> {
        Ok(Staging::Ready)
    }

    async fn transfer(
        &self,
        task: &DataObjectDownloadTask,
        progress: &dyn ProgressSink,
    ) -> Result<TransferReport, TransferError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_location: Option<FileLocation>,
    pub to_location: Option<FileLocation>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct MigrationError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Copies one data object between archive configurations.
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    async fn migrate(&self, task: &DataMigrationTask) -> Result<MigrationReport, MigrationError>;
}

/// Metadata engine lookup: every data-object path under a collection.
#[async_trait]
pub trait PathResolver: Send + Sync {
    async fn data_object_paths(&self, collection_path: &str) -> Result<Vec<String>, CollaboratorError>;
}

/// Terminal notifications for requesters who asked for a completion event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn download_completed(&self, result: &DownloadTaskResult);

    async fn migration_completed(&self, _result: &DataMigrationTaskResult) {}
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn download_completed(&self, result: &DownloadTaskResult) {
        tracing::info!(task_id = %result.id, user = %result.user_id, "download {} for {}", result.result, result.path);
    }

    async fn migration_completed(&self, result: &DataMigrationTaskResult) {
        tracing::info!(task_id = %result.id, user = %result.user_id, "migration {} for {}", result.result, result.path);
    }
}
