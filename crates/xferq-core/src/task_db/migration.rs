//! Storage-to-storage migration tasks.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{assign_id, decode_rows, now_millis, parse_column, TaskDb};
use super::items::{decode_paths, encode_paths};
use super::types::{DataMigrationTask, MigrationStatus, TaskId, TaskType};
use crate::destination::FileLocation;
use crate::error::{StorageContext, StoreResult, Subsystem};
use crate::state::check_transition;

const SUBSYSTEM: Subsystem = Subsystem::DataMigration;

const MIGRATION_COLUMNS: &str = r#"
    id, parent_id, user_id, path, configuration_id,
    from_archive_configuration_id, to_archive_configuration_id, task_type, status,
    align_archive_path, size, percent_complete, data_object_paths, collection_paths,
    from_container_id, from_file_id, to_container_id, to_file_id,
    created, processed, in_process, owner_id, priority
"#;

/// Both halves present or no location at all.
pub(crate) fn location_from_columns(
    container_id: Option<String>,
    file_id: Option<String>,
) -> Option<FileLocation> {
    match (container_id, file_id) {
        (Some(container_id), Some(file_id)) => Some(FileLocation {
            container_id,
            file_id,
        }),
        _ => None,
    }
}

pub(crate) fn location_columns(loc: Option<&FileLocation>) -> (Option<&str>, Option<&str>) {
    match loc {
        Some(l) => (Some(l.container_id.as_str()), Some(l.file_id.as_str())),
        None => (None, None),
    }
}

impl TaskDb {
    fn migration_from_row(&self, row: &SqliteRow) -> StoreResult<DataMigrationTask> {
        let status = parse_column(row, "status", MigrationStatus::parse)?;
        let task_type = parse_column(row, "task_type", TaskType::parse)?;
        let data_object_paths: Option<String> = row.get("data_object_paths");
        let collection_paths: Option<String> = row.get("collection_paths");
        Ok(DataMigrationTask {
            id: row.get("id"),
            parent_id: row.get("parent_id"),
            user_id: row.get("user_id"),
            path: row.get("path"),
            configuration_id: row.get("configuration_id"),
            from_archive_configuration_id: row.get("from_archive_configuration_id"),
            to_archive_configuration_id: row.get("to_archive_configuration_id"),
            task_type,
            status,
            align_archive_path: row.get("align_archive_path"),
            size: row.get("size"),
            percent_complete: row.get("percent_complete"),
            data_object_paths: decode_paths(data_object_paths.as_deref())?,
            collection_paths: decode_paths(collection_paths.as_deref())?,
            from_location: location_from_columns(row.get("from_container_id"), row.get("from_file_id")),
            to_location: location_from_columns(row.get("to_container_id"), row.get("to_file_id")),
            created: row.get("created"),
            processed: row.get("processed"),
            in_process: row.get("in_process"),
            owner_id: row.get("owner_id"),
            priority: Some(row.get("priority")),
        })
    }

    /// Insert or replace a migration task by id (merge semantics). A missing
    /// priority is one past the highest migration priority of the configuration.
    pub async fn upsert_migration_task(&self, task: &mut DataMigrationTask) -> StoreResult<TaskId> {
        let data_object_paths = encode_paths(&task.data_object_paths)?;
        let collection_paths = encode_paths(&task.collection_paths)?;
        assign_id(&mut task.id);
        if task.created == 0 {
            task.created = now_millis();
        }
        let (from_container, from_file) = location_columns(task.from_location.as_ref());
        let (to_container, to_file) = location_columns(task.to_location.as_ref());

        let row = sqlx::query(
            r#"
            INSERT INTO data_migration_task (
                id, parent_id, user_id, path, configuration_id,
                from_archive_configuration_id, to_archive_configuration_id, task_type, status,
                align_archive_path, size, percent_complete, data_object_paths, collection_paths,
                from_container_id, from_file_id, to_container_id, to_file_id,
                created, processed, priority
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20,
                COALESCE(?21, (
                    SELECT COALESCE(MAX(priority), 0) + 1 FROM data_migration_task
                    WHERE configuration_id = ?5
                ))
            )
            ON CONFLICT(id) DO UPDATE SET
                parent_id = excluded.parent_id,
                user_id = excluded.user_id,
                path = excluded.path,
                configuration_id = excluded.configuration_id,
                from_archive_configuration_id = excluded.from_archive_configuration_id,
                to_archive_configuration_id = excluded.to_archive_configuration_id,
                task_type = excluded.task_type,
                status = excluded.status,
                align_archive_path = excluded.align_archive_path,
                size = excluded.size,
                percent_complete = excluded.percent_complete,
                data_object_paths = excluded.data_object_paths,
                collection_paths = excluded.collection_paths,
                from_container_id = excluded.from_container_id,
                from_file_id = excluded.from_file_id,
                to_container_id = excluded.to_container_id,
                to_file_id = excluded.to_file_id,
                priority = COALESCE(?21, data_migration_task.priority)
            RETURNING priority, created
            "#,
        )
        .bind(&task.id)
        .bind(&task.parent_id)
        .bind(&task.user_id)
        .bind(&task.path)
        .bind(&task.configuration_id)
        .bind(&task.from_archive_configuration_id)
        .bind(&task.to_archive_configuration_id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(task.align_archive_path)
        .bind(task.size)
        .bind(task.percent_complete)
        .bind(data_object_paths)
        .bind(collection_paths)
        .bind(from_container)
        .bind(from_file)
        .bind(to_container)
        .bind(to_file)
        .bind(task.created)
        .bind(task.processed)
        .bind(task.priority)
        .fetch_one(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;

        task.priority = Some(row.get("priority"));
        task.created = row.get("created");
        Ok(task.id.clone())
    }

    pub async fn get_migration_task(&self, id: &str) -> StoreResult<Option<DataMigrationTask>> {
        let sql = format!("SELECT {} FROM data_migration_task WHERE id = ?1", MIGRATION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        row.map(|r| self.migration_from_row(&r)).transpose()
    }

    pub async fn delete_migration_task(&self, id: &str) -> StoreResult<bool> {
        let r = sqlx::query("DELETE FROM data_migration_task WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    pub async fn list_migrations(
        &self,
        status: MigrationStatus,
        task_type: Option<TaskType>,
    ) -> StoreResult<Vec<DataMigrationTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM data_migration_task
            WHERE status = ?1 AND (?2 IS NULL OR task_type = ?2)
            ORDER BY priority ASC, created ASC
            "#,
            MIGRATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(task_type.map(TaskType::as_str))
            .fetch_all(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(decode_rows(SUBSYSTEM, &rows, |r| self.migration_from_row(r)))
    }

    /// Active child tasks of a bulk migration.
    pub async fn list_migration_children(&self, parent_id: &str) -> StoreResult<Vec<DataMigrationTask>> {
        let sql = format!(
            "SELECT {} FROM data_migration_task WHERE parent_id = ?1 ORDER BY created ASC, id ASC",
            MIGRATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(decode_rows(SUBSYSTEM, &rows, |r| self.migration_from_row(r)))
    }

    pub async fn next_ready_migration(
        &self,
        status: MigrationStatus,
        task_type: Option<TaskType>,
        older_than: i64,
    ) -> StoreResult<Option<DataMigrationTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM data_migration_task
            WHERE status = ?1
              AND in_process = 0
              AND (processed IS NULL OR processed < ?2)
              AND (?3 IS NULL OR task_type = ?3)
            ORDER BY priority ASC, created ASC
            LIMIT 8
            "#,
            MIGRATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(older_than)
            .bind(task_type.map(TaskType::as_str))
            .fetch_all(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(decode_rows(SUBSYSTEM, &rows, |r| self.migration_from_row(r))
            .into_iter()
            .next())
    }

    pub async fn update_migration_status(
        &self,
        id: &str,
        from: MigrationStatus,
        to: MigrationStatus,
    ) -> StoreResult<bool> {
        check_transition(from, to)?;
        let r = sqlx::query("UPDATE data_migration_task SET status = ?1 WHERE id = ?2 AND status = ?3")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    /// Move every task of `owner_id` in `from` to `to` at once.
    pub async fn set_migration_status(
        &self,
        from: MigrationStatus,
        owner_id: &str,
        to: MigrationStatus,
    ) -> StoreResult<u64> {
        check_transition(from, to)?;
        let r = sqlx::query(
            "UPDATE data_migration_task SET status = ?1 WHERE status = ?2 AND owner_id = ?3",
        )
        .bind(to.as_str())
        .bind(from.as_str())
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected())
    }

    /// Progress write; refreshes the `processed` heartbeat while claimed.
    pub async fn update_migration_progress(&self, id: &str, percent_complete: i64) -> StoreResult<bool> {
        let r = sqlx::query(
            r#"
            UPDATE data_migration_task
            SET percent_complete = ?1,
                processed = CASE WHEN in_process = 1 THEN ?2 ELSE processed END
            WHERE id = ?3
            "#,
        )
        .bind(percent_complete.clamp(0, 100))
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }
}
