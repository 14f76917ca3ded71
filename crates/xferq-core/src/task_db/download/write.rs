//! Data-object download writes: upsert, delete, status and progress.

use sqlx::{QueryBuilder, Row, Sqlite};

use super::super::db::{assign_id, now_millis, TaskDb};
use super::super::types::{DataObjectDownloadTask, DownloadStatus, StatusFilter, TaskId};
use crate::destination::StoredDestination;
use crate::error::{StorageContext, StoreResult, Subsystem};
use crate::state::check_transition;

const SUBSYSTEM: Subsystem = Subsystem::DataObjectDownload;

impl TaskDb {
    /// Insert or replace a task by id.
    ///
    /// A blank id gets a fresh UUID; a missing priority is set to one past the
    /// highest download priority of the same configuration, inside the same
    /// statement. `created` and the claim columns are never overwritten on
    /// conflict. The assigned id, priority and created time are written back
    /// into `task`.
    pub async fn upsert_download_task(&self, task: &mut DataObjectDownloadTask) -> StoreResult<TaskId> {
        let dest = StoredDestination::seal(task.destination.as_ref(), &self.vault)?;
        assign_id(&mut task.id);
        if task.created == 0 {
            task.created = now_millis();
        }

        let query = sqlx::query(
            r#"
            INSERT INTO data_object_download_task (
                id, user_id, path, configuration_id, archive_configuration_id,
                transfer_request_id, transfer_type, status,
                destination_type, dest_container_id, dest_file_id, s3_access_key, s3_secret_key,
                s3_region, s3_endpoint_url, s3_path_style, access_token,
                download_file_path, collection_task_id, percent_complete,
                staging_percent_complete, size, created, processed,
                restore_requested, first_hop_retried, completion_event, priority
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27,
                COALESCE(?28, (
                    SELECT COALESCE(MAX(p), 0) + 1 FROM (
                        SELECT priority AS p FROM data_object_download_task WHERE configuration_id = ?4
                        UNION ALL
                        SELECT priority AS p FROM collection_download_task WHERE configuration_id = ?4
                    )
                ))
            )
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                path = excluded.path,
                configuration_id = excluded.configuration_id,
                archive_configuration_id = excluded.archive_configuration_id,
                transfer_request_id = excluded.transfer_request_id,
                transfer_type = excluded.transfer_type,
                status = excluded.status,
                destination_type = excluded.destination_type,
                dest_container_id = excluded.dest_container_id,
                dest_file_id = excluded.dest_file_id,
                s3_access_key = excluded.s3_access_key,
                s3_secret_key = excluded.s3_secret_key,
                s3_region = excluded.s3_region,
                s3_endpoint_url = excluded.s3_endpoint_url,
                s3_path_style = excluded.s3_path_style,
                access_token = excluded.access_token,
                download_file_path = excluded.download_file_path,
                collection_task_id = excluded.collection_task_id,
                percent_complete = excluded.percent_complete,
                staging_percent_complete = excluded.staging_percent_complete,
                size = excluded.size,
                restore_requested = excluded.restore_requested,
                first_hop_retried = excluded.first_hop_retried,
                completion_event = excluded.completion_event,
                priority = COALESCE(?28, data_object_download_task.priority)
            RETURNING priority, created
            "#,
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.path)
        .bind(&task.configuration_id)
        .bind(&task.archive_configuration_id)
        .bind(&task.transfer_request_id)
        .bind(&task.transfer_type)
        .bind(task.status.as_str());
        let row = dest
            .bind(query)
            .bind(&task.download_file_path)
            .bind(&task.collection_task_id)
            .bind(task.percent_complete)
            .bind(task.staging_percent_complete)
            .bind(task.size)
            .bind(task.created)
            .bind(task.processed)
            .bind(task.restore_requested)
            .bind(task.first_hop_retried)
            .bind(task.completion_event)
            .bind(task.priority)
            .fetch_one(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;

        task.priority = Some(row.get("priority"));
        task.created = row.get("created");
        Ok(task.id.clone())
    }

    /// Returns whether a row was removed.
    pub async fn delete_download_task(&self, id: &str) -> StoreResult<bool> {
        let r = sqlx::query("DELETE FROM data_object_download_task WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    /// Move a task from `from` to `to`, only if it is still in `from`.
    ///
    /// Illegal transitions are rejected before touching the store; a task that
    /// has already moved on yields `Ok(false)`.
    pub async fn update_download_status(
        &self,
        id: &str,
        from: DownloadStatus,
        to: DownloadStatus,
    ) -> StoreResult<bool> {
        check_transition(from, to)?;
        let r = sqlx::query(
            r#"
            UPDATE data_object_download_task
            SET status = ?1,
                restore_requested = CASE WHEN ?1 = 'RESTORE_REQUESTED' THEN 1 ELSE restore_requested END
            WHERE id = ?2 AND status = ?3
            "#,
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    /// Move every child of `collection_task_id` whose current `(status,
    /// destination_type)` matches one of `filters` to `to`. An empty filter
    /// list matches nothing. Returns the number of tasks moved.
    pub async fn update_download_tasks_status(
        &self,
        collection_task_id: &str,
        filters: &[StatusFilter],
        to: DownloadStatus,
    ) -> StoreResult<u64> {
        for f in filters {
            check_transition(f.status, to)?;
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE data_object_download_task SET status = ");
        qb.push_bind(to.as_str());
        qb.push(" WHERE collection_task_id = ");
        qb.push_bind(collection_task_id);
        qb.push(" AND (1 = 0");
        for f in filters {
            qb.push(" OR (status = ");
            qb.push_bind(f.status.as_str());
            qb.push(" AND destination_type = ");
            qb.push_bind(f.destination_type.as_str());
            qb.push(")");
        }
        qb.push(")");

        let r = qb
            .build()
            .execute(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected())
    }

    pub async fn set_download_task_priority(&self, id: &str, priority: i64) -> StoreResult<bool> {
        let r = sqlx::query("UPDATE data_object_download_task SET priority = ?1 WHERE id = ?2")
            .bind(priority)
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    /// Record transfer progress. While the task is claimed this also refreshes
    /// `processed`, which keeps the claim from being expired as stale.
    pub async fn update_download_progress(
        &self,
        id: &str,
        percent_complete: i64,
        staging_percent_complete: Option<i64>,
    ) -> StoreResult<bool> {
        let r = sqlx::query(
            r#"
            UPDATE data_object_download_task
            SET percent_complete = ?1,
                staging_percent_complete = COALESCE(?2, staging_percent_complete),
                processed = CASE WHEN in_process = 1 THEN ?3 ELSE processed END
            WHERE id = ?4
            "#,
        )
        .bind(percent_complete.clamp(0, 100))
        .bind(staging_percent_complete.map(|p| p.clamp(0, 100)))
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    pub async fn set_download_size(&self, id: &str, size: i64) -> StoreResult<bool> {
        let r = sqlx::query("UPDATE data_object_download_task SET size = ?1 WHERE id = ?2")
            .bind(size)
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }
}
