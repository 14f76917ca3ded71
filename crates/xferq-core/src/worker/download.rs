use tracing::{debug, info, warn};

use super::progress::StoreProgress;
use super::traits::{Staging, TransferError};
use super::{Step, Worker, WorkerResult};
use crate::retry::{retryable_result, RetryDecision};
use crate::task_db::{
    now_millis, DataObjectDownloadTask, DownloadResultKind, DownloadStatus, DownloadTaskResult,
    TaskFamily,
};

impl Worker {
    /// Take the next ready data-object download (queued first, then those
    /// waiting on a restore) and carry it to a result.
    pub async fn run_once_download(&self) -> WorkerResult<Step<DownloadTaskResult>> {
        let cutoff = self.attempt_cutoff();
        for status in [DownloadStatus::Received, DownloadStatus::RestoreRequested] {
            if let Some(task) = self
                .db
                .next_ready_download(status, self.config.destination_filter, cutoff)
                .await?
            {
                return self.process_download(task).await;
            }
        }
        Ok(Step::Idle)
    }

    async fn process_download(&self, task: DataObjectDownloadTask) -> WorkerResult<Step<DownloadTaskResult>> {
        if !self
            .db
            .try_claim(TaskFamily::DataObjectDownload, &task.id, &self.owner_id)
            .await?
        {
            debug!(task_id = %task.id, "download claimed by another worker");
            return Ok(Step::Contended);
        }
        self.db
            .mark_processed(TaskFamily::DataObjectDownload, &task.id, now_millis())
            .await?;

        let id = task.id.clone();
        match self.execute_download(task).await {
            Ok(step) => Ok(step),
            Err(e) => {
                // Left for the next attempt once the cutoff passes.
                if let Err(release_err) = self.db.release(TaskFamily::DataObjectDownload, &id).await {
                    warn!(task_id = %id, "releasing download after error: {}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn execute_download(
        &self,
        mut task: DataObjectDownloadTask,
    ) -> WorkerResult<Step<DownloadTaskResult>> {
        if let Some(parent) = task.collection_task_id.as_deref() {
            if self.db.collection_cancellation_requested(parent).await? {
                return self
                    .finish_download(task, DownloadResultKind::Canceled, Some("collection download canceled".into()), None)
                    .await;
            }
        }

        match self.collaborators.transfers.stage(&task).await {
            Ok(Staging::Ready) => {}
            Ok(Staging::RestoreRequested) => {
                if task.status != DownloadStatus::RestoreRequested
                    && !self
                        .db
                        .update_download_status(&task.id, task.status, DownloadStatus::RestoreRequested)
                        .await?
                {
                    return self.status_lost(task).await;
                }
                self.db.release(TaskFamily::DataObjectDownload, &task.id).await?;
                info!(task_id = %task.id, "restore requested for {}", task.path);
                return Ok(Step::Deferred(task.id));
            }
            Err(e) => return self.fail_download(task, e).await,
        }

        if !self
            .db
            .update_download_status(&task.id, task.status, DownloadStatus::InProgress)
            .await?
        {
            return self.status_lost(task).await;
        }
        task.status = DownloadStatus::InProgress;
        info!(task_id = %task.id, "transferring {}", task.path);

        let sink = StoreProgress::new(self.db.clone(), task.id.clone());
        match self.collaborators.transfers.transfer(&task, &sink).await {
            Ok(report) => {
                if report.size.is_some() {
                    task.size = report.size;
                }
                if let (Some(parent), Some(size)) = (task.collection_task_id.as_deref(), task.size) {
                    self.db.add_collection_bytes_transferred(parent, size).await?;
                }
                self.finish_download(task, DownloadResultKind::Completed, None, report.effective_transfer_speed)
                    .await
            }
            Err(e) => self.fail_download(task, e).await,
        }
    }

    /// The status compare-and-set missed: the task was moved under us, most
    /// likely canceled along with its collection.
    async fn status_lost(&self, task: DataObjectDownloadTask) -> WorkerResult<Step<DownloadTaskResult>> {
        match self.db.get_download_task(&task.id).await? {
            Some(current) if current.status == DownloadStatus::Canceled => {
                self.finish_download(current, DownloadResultKind::Canceled, Some("download canceled".into()), None)
                    .await
            }
            _ => {
                self.db.release(TaskFamily::DataObjectDownload, &task.id).await?;
                Ok(Step::Contended)
            }
        }
    }

    /// Record a failure. A retryable failure on the first hop also queues a
    /// second attempt under a derived id and points the result at it.
    async fn fail_download(
        &self,
        task: DataObjectDownloadTask,
        err: TransferError,
    ) -> WorkerResult<Step<DownloadTaskResult>> {
        warn!(task_id = %task.id, "transfer of {} failed: {}", task.path, err);

        let mut retry_task_id = None;
        let retry_allowed = matches!(self.retry.decide(1, err.kind), RetryDecision::RetryAfter(_));
        if retryable_result(err.result) && !task.first_hop_retried && retry_allowed {
            let retry_id = format!("{}-retry", task.id);
            let known = self.db.get_download_task(&retry_id).await?.is_some()
                || self.db.get_download_result(&retry_id).await?.is_some();
            if !known {
                let mut retry = task.clone();
                retry.id = retry_id.clone();
                retry.status = DownloadStatus::Received;
                retry.first_hop_retried = true;
                retry.created = 0;
                retry.processed = None;
                retry.in_process = false;
                retry.owner_id = None;
                retry.percent_complete = None;
                retry.staging_percent_complete = None;
                retry.restore_requested = false;
                self.db.upsert_download_task(&mut retry).await?;
                info!(task_id = %task.id, retry_task_id = %retry_id, "queued retry for {}", task.path);
            }
            retry_task_id = Some(retry_id);
        }

        let mut result = DownloadTaskResult::for_task(&task, err.result, Some(err.message), now_millis());
        result.retry_task_id = retry_task_id;
        self.store_download_result(task, result).await
    }

    async fn finish_download(
        &self,
        task: DataObjectDownloadTask,
        kind: DownloadResultKind,
        message: Option<String>,
        effective_transfer_speed: Option<i64>,
    ) -> WorkerResult<Step<DownloadTaskResult>> {
        let mut result = DownloadTaskResult::for_task(&task, kind, message, now_millis());
        result.effective_transfer_speed = effective_transfer_speed;
        self.store_download_result(task, result).await
    }

    /// Result first, then delete: a crash in between only repeats the upsert.
    async fn store_download_result(
        &self,
        task: DataObjectDownloadTask,
        result: DownloadTaskResult,
    ) -> WorkerResult<Step<DownloadTaskResult>> {
        self.db.upsert_download_result(&result).await?;
        self.db.delete_download_task(&task.id).await?;
        info!(task_id = %task.id, "download of {} resolved: {}", task.path, result.result);

        match task.collection_task_id.as_deref() {
            None => {
                if task.completion_event && result.retry_task_id.is_none() {
                    self.collaborators.notifier.download_completed(&result).await;
                }
            }
            Some(parent) => {
                // The maintenance sweep picks the parent up if this misses.
                if let Err(e) = self.coordinator.try_resolve_collection(parent).await {
                    warn!(task_id = %parent, "collection fan-in attempt failed: {}", e);
                }
            }
        }
        Ok(Step::Done(result))
    }
}
