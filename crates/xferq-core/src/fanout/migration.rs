use tracing::{debug, info};

use super::{child_task_id, expand_targets, Coordinator, FanOutError};
use crate::error::StoreResult;
use crate::state::check_transition;
use crate::task_db::{
    now_millis, DataMigrationTask, DataMigrationTaskResult, MigrationResultKind, MigrationStatus,
    TaskFamily, TaskId, TaskType,
};
use crate::worker::PathResolver;

impl Coordinator {
    /// Expand a bulk migration into one `DATA_OBJECT` child per path and
    /// move the parent to `IN_PROGRESS`. Returns the ids of newly created
    /// children. A `DATA_OBJECT` request has no children and is left as is.
    pub async fn fan_out_migration(
        &self,
        parent: &mut DataMigrationTask,
        resolver: &dyn PathResolver,
    ) -> Result<Vec<TaskId>, FanOutError> {
        if parent.task_type == TaskType::DataObject {
            return Ok(Vec::new());
        }
        check_transition(parent.status, MigrationStatus::InProgress)?;
        if parent.id.is_empty() {
            self.db.upsert_migration_task(parent).await?;
        }

        let targets = expand_targets(
            parent.task_type,
            &parent.path,
            &parent.data_object_paths,
            &parent.collection_paths,
            resolver,
        )
        .await?;

        let mut ids = Vec::new();
        for target in &targets {
            let id = child_task_id(&parent.id, &target.path);
            if self.db.get_migration_task(&id).await?.is_some()
                || self.db.get_migration_result(&id).await?.is_some()
            {
                continue;
            }
            let mut child = DataMigrationTask::new(
                parent.user_id.clone(),
                target.path.clone(),
                parent.configuration_id.clone(),
                parent.from_archive_configuration_id.clone(),
                parent.to_archive_configuration_id.clone(),
                TaskType::DataObject,
            );
            child.id = id;
            child.parent_id = Some(parent.id.clone());
            child.align_archive_path = parent.align_archive_path;
            child.priority = parent.priority;
            ids.push(self.db.upsert_migration_task(&mut child).await?);
        }

        if matches!(parent.task_type, TaskType::Collection | TaskType::CollectionList) {
            parent.data_object_paths = targets.iter().map(|t| t.path.clone()).collect();
        }
        parent.status = MigrationStatus::InProgress;
        self.db.upsert_migration_task(parent).await?;

        info!(
            task_id = %parent.id,
            children = ids.len(),
            "fanned out {} migration for {}",
            parent.task_type,
            parent.path
        );
        Ok(ids)
    }

    /// Close a bulk migration once none of its children is left.
    ///
    /// Any failed child fails the parent; otherwise any ignored child yields
    /// `COMPLETED_IGNORED_ITEMS`.
    pub async fn complete_bulk_migration(
        &self,
        parent_id: &str,
    ) -> StoreResult<Option<DataMigrationTaskResult>> {
        let Some(parent) = self.db.get_migration_task(parent_id).await? else {
            return Ok(None);
        };
        if parent.status != MigrationStatus::InProgress || parent.task_type == TaskType::DataObject {
            return Ok(None);
        }
        if !self
            .db
            .try_claim(TaskFamily::DataMigration, parent_id, &self.owner_id)
            .await?
        {
            return Ok(None);
        }
        // Fresh heartbeat so the stale-claim sweep leaves this claim alone.
        if let Err(e) = self
            .db
            .mark_processed(TaskFamily::DataMigration, parent_id, now_millis())
            .await
        {
            self.db.release(TaskFamily::DataMigration, parent_id).await?;
            return Err(e);
        }

        let remaining = self.db.list_migration_children(parent_id).await?.len();
        if remaining > 0 {
            debug!(task_id = %parent_id, remaining, "bulk migration still has active children");
            self.db.release(TaskFamily::DataMigration, parent_id).await?;
            return Ok(None);
        }

        let counts = self.db.aggregate_migration_result_count(parent_id).await?;
        let (status, kind) = if counts.get(MigrationResultKind::Failed) > 0 {
            (MigrationStatus::Failed, MigrationResultKind::Failed)
        } else if counts.get(MigrationResultKind::Ignored) > 0 {
            (MigrationStatus::Completed, MigrationResultKind::CompletedIgnoredItems)
        } else {
            (MigrationStatus::Completed, MigrationResultKind::Completed)
        };
        check_transition(parent.status, status)?;

        let message = match kind {
            MigrationResultKind::Completed => None,
            _ => Some(format!(
                "{} failed, {} ignored of {} items",
                counts.get(MigrationResultKind::Failed),
                counts.get(MigrationResultKind::Ignored),
                counts.total()
            )),
        };
        let result = DataMigrationTaskResult::for_task(&parent, kind, message, now_millis());
        self.db.upsert_migration_result(&result).await?;
        self.db.delete_migration_task(parent_id).await?;

        info!(task_id = %parent_id, items = counts.total(), "bulk migration resolved: {}", kind);
        self.notifier.migration_completed(&result).await;
        Ok(Some(result))
    }
}
