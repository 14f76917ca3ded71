use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::{
    child_task_id, expand_targets, failure_count, failure_message, Coordinator, FanOutError,
};
use crate::error::{StoreError, StoreResult};
use crate::state::{check_transition, TaskStatus};
use crate::task_db::{
    now_millis, CollectionDownloadItem, CollectionDownloadTask, CollectionStatus,
    DataObjectDownloadTask, DownloadResultKind, DownloadStatus, DownloadTaskResult,
    ResultCounts, StatusFilter, TaskFamily, TaskId, TaskType,
};
use crate::worker::PathResolver;

/// A resolved bulk download: the stored result plus the per-kind tally it was
/// derived from.
#[derive(Debug, Clone)]
pub struct CollectionOutcome {
    pub result: DownloadTaskResult,
    pub counts: ResultCounts<DownloadResultKind>,
}

impl CollectionOutcome {
    pub fn failures(&self) -> i64 {
        failure_count(&self.counts)
    }
}

impl Coordinator {
    /// Persist a new bulk request as `RECEIVED`.
    pub async fn submit_collection(&self, task: &mut CollectionDownloadTask) -> StoreResult<TaskId> {
        task.status = CollectionStatus::Received;
        self.db.upsert_collection_task(task).await
    }

    /// Submit and fan out in one step. Returns the child task ids, or an
    /// empty list when another worker already holds the new task.
    pub async fn create_collection_task(
        &self,
        task: &mut CollectionDownloadTask,
        resolver: &dyn PathResolver,
    ) -> Result<Vec<TaskId>, FanOutError> {
        let id = self.submit_collection(task).await?;
        if !self
            .db
            .try_claim(TaskFamily::CollectionDownload, &id, &self.owner_id)
            .await?
        {
            return Ok(Vec::new());
        }
        let fanned = self.fan_out(task, resolver).await;
        self.db.release(TaskFamily::CollectionDownload, &id).await?;
        fanned
    }

    /// Create one child download per resolved path and move the parent to
    /// `ACTIVE`. The caller holds the parent's claim.
    ///
    /// Paths that already have a child or a child result (a fan-out
    /// interrupted by a crash) are not duplicated.
    pub async fn fan_out(
        &self,
        task: &mut CollectionDownloadTask,
        resolver: &dyn PathResolver,
    ) -> Result<Vec<TaskId>, FanOutError> {
        check_transition(task.status, CollectionStatus::Active)?;
        let destination = task.destination.clone().ok_or_else(|| {
            StoreError::InvalidDestination(format!("collection task {} has no destination", task.id))
        })?;

        let targets = expand_targets(
            task.task_type,
            &task.path,
            &task.data_object_paths,
            &task.collection_paths,
            resolver,
        )
        .await?;

        let mut items = Vec::with_capacity(targets.len());
        let mut ids = Vec::with_capacity(targets.len());
        for target in &targets {
            let location = destination.location().join(&target.relative);
            let id = child_task_id(&task.id, &target.path);
            let known = self.db.get_download_task(&id).await?.is_some()
                || self.db.get_download_result(&id).await?.is_some();
            if !known {
                let mut child = DataObjectDownloadTask::new(
                    task.user_id.clone(),
                    target.path.clone(),
                    task.configuration_id.clone(),
                    destination.with_location(location.clone()),
                );
                child.id = id.clone();
                child.collection_task_id = Some(task.id.clone());
                child.priority = task.priority;
                self.db.upsert_download_task(&mut child).await?;
            }
            items.push(CollectionDownloadItem {
                path: Some(target.path.clone()),
                collection_path: target.collection_path.clone(),
                data_object_download_task_id: Some(id.clone()),
                destination_location_file_container_id: Some(location.container_id),
                destination_location_file_id: Some(location.file_id),
                ..Default::default()
            });
            ids.push(id);
        }

        if matches!(task.task_type, TaskType::Collection | TaskType::CollectionList) {
            task.data_object_paths = targets.iter().map(|t| t.path.clone()).collect();
        }
        task.items = items;
        let stored = self
            .db
            .record_collection_fan_out(&task.id, &task.items, &task.data_object_paths)
            .await?;
        match stored {
            Some(CollectionStatus::Canceling) => {
                // Canceled while paths were resolving: the new children never start.
                task.status = CollectionStatus::Canceling;
                task.cancellation_requested = true;
                let canceled = self.cancel_queued_children(&task.id).await?;
                info!(task_id = %task.id, canceled, "collection canceled during fan-out");
                return Ok(ids);
            }
            Some(status) => task.status = status,
            None => {
                return Err(StoreError::InvalidTransition {
                    family: CollectionStatus::FAMILY,
                    from: task.status.to_string(),
                    to: CollectionStatus::Active.to_string(),
                }
                .into());
            }
        }

        info!(
            task_id = %task.id,
            children = ids.len(),
            "fanned out {} request for {}",
            task.task_type,
            task.path
        );
        Ok(ids)
    }

    /// Resolve a bulk download whose children are all done.
    ///
    /// Returns `None` when the parent is missing, not yet fanned out, claimed
    /// by someone else, or still has outstanding children.
    pub async fn try_resolve_collection(&self, id: &str) -> StoreResult<Option<CollectionOutcome>> {
        let Some(parent) = self.db.get_collection_task(id).await? else {
            return Ok(None);
        };
        if !matches!(
            parent.status,
            CollectionStatus::Active | CollectionStatus::Canceling
        ) {
            return Ok(None);
        }
        if !self
            .db
            .try_claim(TaskFamily::CollectionDownload, id, &self.owner_id)
            .await?
        {
            return Ok(None);
        }

        let resolved = match self
            .db
            .mark_processed(TaskFamily::CollectionDownload, id, now_millis())
            .await
        {
            Ok(_) => self.resolve_claimed(parent).await,
            Err(e) => Err(e),
        };
        match resolved {
            Ok(Some(outcome)) => Ok(Some(outcome)),
            Ok(None) => {
                self.db.release(TaskFamily::CollectionDownload, id).await?;
                Ok(None)
            }
            Err(e) => {
                if let Err(release_err) = self.db.release(TaskFamily::CollectionDownload, id).await {
                    warn!(task_id = %id, "releasing collection after failed resolution: {}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn resolve_claimed(
        &self,
        mut parent: CollectionDownloadTask,
    ) -> StoreResult<Option<CollectionOutcome>> {
        let outstanding = self.db.count_download_tasks_by_collection(&parent.id).await?;
        if outstanding > 0 {
            debug!(task_id = %parent.id, outstanding, "collection still has active children");
            return Ok(None);
        }

        let results: HashMap<TaskId, DownloadTaskResult> = self
            .db
            .list_download_results_by_collection(&parent.id)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut failures = 0usize;
        for item in parent.items.iter_mut() {
            let Some(child_id) = item.data_object_download_task_id.as_deref() else {
                continue;
            };
            let Some(last) = final_result(&results, child_id) else {
                debug!(task_id = %parent.id, child = %child_id, "collection child has no final result yet");
                return Ok(None);
            };
            if !last.result.is_success() {
                failures += 1;
            }
            item.result = Some(last.result);
            item.message = last.message.clone();
            item.size = last.size;
            item.effective_transfer_speed = last.effective_transfer_speed;
            item.percent_complete = Some(100);
            item.restore_in_progress = None;
            item.staging_in_progress = None;
        }

        let counts = self.db.aggregate_download_result_count(&parent.id).await?;

        let (status, kind, message) = if parent.status == CollectionStatus::Canceling {
            (
                CollectionStatus::Canceled,
                DownloadResultKind::Canceled,
                Some("canceled by request".to_string()),
            )
        } else if failures == 0 {
            (CollectionStatus::Completed, DownloadResultKind::Completed, None)
        } else if parent.all_or_nothing {
            (
                CollectionStatus::Failed,
                DownloadResultKind::Failed,
                Some(format!("{} of {} items failed", failures, parent.items.len())),
            )
        } else {
            (
                CollectionStatus::Completed,
                DownloadResultKind::CompletedWithFailures,
                Some(failure_message(failures)),
            )
        };
        check_transition(parent.status, status)?;

        let result = DownloadTaskResult::for_collection(&parent, kind, message, now_millis());
        self.db.upsert_download_result(&result).await?;
        self.db.delete_collection_task(&parent.id).await?;

        info!(
            task_id = %parent.id,
            items = parent.items.len(),
            failures,
            "collection download resolved: {}",
            kind
        );
        if parent.completion_event {
            self.notifier.download_completed(&result).await;
        }
        Ok(Some(CollectionOutcome { result, counts }))
    }

    /// Stop a bulk download: no new children start, queued ones are
    /// canceled, running ones finish. Returns `false` if the task is gone.
    pub async fn request_cancellation(&self, id: &str) -> StoreResult<bool> {
        let Some(parent) = self.db.get_collection_task(id).await? else {
            return Ok(false);
        };
        self.db.set_collection_cancellation_requested(id, true).await?;
        if matches!(
            parent.status,
            CollectionStatus::Received | CollectionStatus::Active
        ) {
            self.db
                .update_collection_status(id, parent.status, CollectionStatus::Canceling)
                .await?;
        }

        let drained = self.cancel_queued_children(id).await?;
        info!(task_id = %id, drained, "collection cancellation requested");

        self.try_resolve_collection(id).await?;
        Ok(true)
    }

    /// Cancel children that have not started and record their results.
    /// Running children are left to finish.
    async fn cancel_queued_children(&self, collection_id: &str) -> StoreResult<usize> {
        let mut filters = StatusFilter::any_destination(DownloadStatus::Received);
        filters.extend(StatusFilter::any_destination(DownloadStatus::RestoreRequested));
        let canceled = self
            .db
            .update_download_tasks_status(collection_id, &filters, DownloadStatus::Canceled)
            .await?;
        debug!(task_id = %collection_id, canceled, "queued children canceled");
        self.drain_canceled_children(collection_id).await
    }

    /// Resolve children already moved to `CANCELED` that nobody is working on.
    pub(crate) async fn drain_canceled_children(&self, collection_id: &str) -> StoreResult<usize> {
        let mut drained = 0;
        for child in self.db.list_download_tasks_by_collection(collection_id).await? {
            if child.status != DownloadStatus::Canceled || child.in_process {
                continue;
            }
            if !self
                .db
                .try_claim(TaskFamily::DataObjectDownload, &child.id, &self.owner_id)
                .await?
            {
                continue;
            }
            let result = DownloadTaskResult::for_task(
                &child,
                DownloadResultKind::Canceled,
                Some("collection download canceled".to_string()),
                now_millis(),
            );
            self.db.upsert_download_result(&result).await?;
            self.db.delete_download_task(&child.id).await?;
            drained += 1;
        }
        Ok(drained)
    }
}

/// Follow `retry_task_id` pointers from `id` to the last attempt's result.
fn final_result<'a>(
    results: &'a HashMap<TaskId, DownloadTaskResult>,
    id: &str,
) -> Option<&'a DownloadTaskResult> {
    let mut current = results.get(id)?;
    let mut hops = 0;
    while let Some(next) = current.retry_task_id.as_deref() {
        hops += 1;
        if hops > results.len() {
            return None;
        }
        current = results.get(next)?;
    }
    Some(current)
}
