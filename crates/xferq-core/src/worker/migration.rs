use tracing::{info, warn};

use super::{Step, Worker, WorkerResult};
use crate::task_db::{
    now_millis, DataMigrationTask, DataMigrationTaskResult, MigrationResultKind, MigrationStatus,
    TaskFamily, TaskId, TaskType,
};

const BULK_TYPES: [TaskType; 3] = [
    TaskType::Collection,
    TaskType::DataObjectList,
    TaskType::CollectionList,
];

impl Worker {
    /// Fan out the next received bulk migration.
    pub async fn run_once_bulk_migration(&self) -> WorkerResult<Step<Vec<TaskId>>> {
        let cutoff = self.attempt_cutoff();
        let mut next = None;
        for task_type in BULK_TYPES {
            next = self
                .db
                .next_ready_migration(MigrationStatus::Received, Some(task_type), cutoff)
                .await?;
            if next.is_some() {
                break;
            }
        }
        let Some(mut parent) = next else {
            return Ok(Step::Idle);
        };
        if !self
            .db
            .try_claim(TaskFamily::DataMigration, &parent.id, &self.owner_id)
            .await?
        {
            return Ok(Step::Contended);
        }
        self.db
            .mark_processed(TaskFamily::DataMigration, &parent.id, now_millis())
            .await?;

        let fanned = self
            .coordinator
            .fan_out_migration(&mut parent, self.collaborators.resolver.as_ref())
            .await;
        self.db.release(TaskFamily::DataMigration, &parent.id).await?;
        Ok(Step::Done(fanned?))
    }

    /// Migrate the next received data object.
    pub async fn run_once_migration(&self) -> WorkerResult<Step<DataMigrationTaskResult>> {
        let Some(task) = self
            .db
            .next_ready_migration(MigrationStatus::Received, Some(TaskType::DataObject), self.attempt_cutoff())
            .await?
        else {
            return Ok(Step::Idle);
        };
        if !self
            .db
            .try_claim(TaskFamily::DataMigration, &task.id, &self.owner_id)
            .await?
        {
            return Ok(Step::Contended);
        }
        self.db
            .mark_processed(TaskFamily::DataMigration, &task.id, now_millis())
            .await?;

        let id = task.id.clone();
        match self.execute_migration(task).await {
            Ok(step) => Ok(step),
            Err(e) => {
                if let Err(release_err) = self.db.release(TaskFamily::DataMigration, &id).await {
                    warn!(task_id = %id, "releasing migration after error: {}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn execute_migration(
        &self,
        mut task: DataMigrationTask,
    ) -> WorkerResult<Step<DataMigrationTaskResult>> {
        let (kind, message) = if task.from_archive_configuration_id == task.to_archive_configuration_id
            && !task.align_archive_path
        {
            (
                MigrationResultKind::Ignored,
                Some("source and target archive configurations are the same".to_string()),
            )
        } else {
            if !self
                .db
                .update_migration_status(&task.id, task.status, MigrationStatus::InProgress)
                .await?
            {
                self.db.release(TaskFamily::DataMigration, &task.id).await?;
                return Ok(Step::Contended);
            }
            task.status = MigrationStatus::InProgress;
            info!(task_id = %task.id, "migrating {}", task.path);

            match self.collaborators.migrations.migrate(&task).await {
                Ok(report) => {
                    if report.from_location.is_some() {
                        task.from_location = report.from_location;
                    }
                    if report.to_location.is_some() {
                        task.to_location = report.to_location;
                    }
                    if report.size.is_some() {
                        task.size = report.size;
                    }
                    (MigrationResultKind::Completed, None)
                }
                Err(e) => {
                    warn!(task_id = %task.id, "migration of {} failed: {}", task.path, e);
                    (MigrationResultKind::Failed, Some(e.message))
                }
            }
        };

        let result = DataMigrationTaskResult::for_task(&task, kind, message, now_millis());
        self.db.upsert_migration_result(&result).await?;
        self.db.delete_migration_task(&task.id).await?;
        info!(task_id = %task.id, "migration of {} resolved: {}", task.path, kind);

        match task.parent_id.as_deref() {
            Some(parent) => {
                if let Err(e) = self.coordinator.complete_bulk_migration(parent).await {
                    warn!(task_id = %parent, "bulk migration completion failed: {}", e);
                }
            }
            None => self.collaborators.notifier.migration_completed(&result).await,
        }
        Ok(Step::Done(result))
    }

    /// Close bulk migrations whose children are all done.
    pub async fn complete_bulk_migrations(&self) -> WorkerResult<Vec<DataMigrationTaskResult>> {
        let mut completed = Vec::new();
        for task_type in BULK_TYPES {
            for parent in self
                .db
                .list_migrations(MigrationStatus::InProgress, Some(task_type))
                .await?
            {
                if parent.in_process {
                    continue;
                }
                if let Some(result) = self.coordinator.complete_bulk_migration(&parent.id).await? {
                    completed.push(result);
                }
            }
        }
        Ok(completed)
    }
}
