use async_trait::async_trait;

use super::traits::ProgressSink;
use crate::task_db::{TaskDb, TaskId};

/// Writes progress onto the task row. The write also refreshes the claim
/// heartbeat, so a long transfer is not mistaken for a stale one.
pub struct StoreProgress {
    db: TaskDb,
    task_id: TaskId,
}

impl StoreProgress {
    pub fn new(db: TaskDb, task_id: impl Into<TaskId>) -> Self {
        Self {
            db,
            task_id: task_id.into(),
        }
    }
}

#[async_trait]
impl ProgressSink for StoreProgress {
    async fn progress(&self, percent_complete: i64, staging_percent_complete: Option<i64>) {
        // Progress is advisory; a failed write must not fail the transfer.
        if let Err(e) = self
            .db
            .update_download_progress(&self.task_id, percent_complete, staging_percent_complete)
            .await
        {
            tracing::warn!(task_id = %self.task_id, "progress update failed: {}", e);
        }
    }
}
