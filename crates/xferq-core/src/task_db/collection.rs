//! Collection (bulk) download tasks.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{assign_id, decode_rows, now_millis, parse_column, TaskDb};
use super::items::{decode_items, decode_paths, encode_items, encode_paths};
use super::types::{
    CollectionDownloadItem, CollectionDownloadTask, CollectionStatus, TaskId, TaskType,
};
use crate::destination::StoredDestination;
use crate::error::{StorageContext, StoreResult, Subsystem};
use crate::state::check_transition;

const SUBSYSTEM: Subsystem = Subsystem::CollectionDownload;

const COLLECTION_COLUMNS: &str = r#"
    id, user_id, path, configuration_id,
    destination_type, dest_container_id, dest_file_id, s3_access_key, s3_secret_key,
    s3_region, s3_endpoint_url, s3_path_style, access_token,
    status, task_type, items, data_object_paths, collection_paths,
    created, processed, in_process, owner_id, cancellation_requested,
    retry_task_id, completion_event, all_or_nothing, total_bytes_transferred, priority
"#;

impl TaskDb {
    fn collection_from_row(&self, row: &SqliteRow) -> StoreResult<CollectionDownloadTask> {
        let status = parse_column(row, "status", CollectionStatus::parse)?;
        let task_type = parse_column(row, "task_type", TaskType::parse)?;
        let destination = StoredDestination::from_row(row).open(&self.vault)?;
        let items: Option<String> = row.get("items");
        let data_object_paths: Option<String> = row.get("data_object_paths");
        let collection_paths: Option<String> = row.get("collection_paths");
        Ok(CollectionDownloadTask {
            id: row.get("id"),
            user_id: row.get("user_id"),
            path: row.get("path"),
            configuration_id: row.get("configuration_id"),
            destination: Some(destination),
            status,
            task_type,
            items: decode_items(items.as_deref())?,
            data_object_paths: decode_paths(data_object_paths.as_deref())?,
            collection_paths: decode_paths(collection_paths.as_deref())?,
            created: row.get("created"),
            processed: row.get("processed"),
            in_process: row.get("in_process"),
            owner_id: row.get("owner_id"),
            cancellation_requested: row.get("cancellation_requested"),
            retry_task_id: row.get("retry_task_id"),
            completion_event: row.get("completion_event"),
            all_or_nothing: row.get("all_or_nothing"),
            total_bytes_transferred: row.get("total_bytes_transferred"),
            priority: Some(row.get("priority")),
        })
    }

    /// Insert or replace a collection task by id. Id, priority and created are
    /// assigned as for data-object downloads and written back into `task`.
    pub async fn upsert_collection_task(&self, task: &mut CollectionDownloadTask) -> StoreResult<TaskId> {
        let dest = StoredDestination::seal(task.destination.as_ref(), &self.vault)?;
        let items = encode_items(&task.items)?;
        let data_object_paths = encode_paths(&task.data_object_paths)?;
        let collection_paths = encode_paths(&task.collection_paths)?;
        assign_id(&mut task.id);
        if task.created == 0 {
            task.created = now_millis();
        }

        let query = sqlx::query(
            r#"
            INSERT INTO collection_download_task (
                id, user_id, path, configuration_id,
                destination_type, dest_container_id, dest_file_id, s3_access_key, s3_secret_key,
                s3_region, s3_endpoint_url, s3_path_style, access_token,
                status, task_type, items, data_object_paths, collection_paths,
                created, processed, cancellation_requested, retry_task_id,
                completion_event, all_or_nothing, total_bytes_transferred, priority
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25,
                COALESCE(?26, (
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
                destination_type = excluded.destination_type,
                dest_container_id = excluded.dest_container_id,
                dest_file_id = excluded.dest_file_id,
                s3_access_key = excluded.s3_access_key,
                s3_secret_key = excluded.s3_secret_key,
                s3_region = excluded.s3_region,
                s3_endpoint_url = excluded.s3_endpoint_url,
                s3_path_style = excluded.s3_path_style,
                access_token = excluded.access_token,
                status = excluded.status,
                task_type = excluded.task_type,
                items = excluded.items,
                data_object_paths = excluded.data_object_paths,
                collection_paths = excluded.collection_paths,
                cancellation_requested = excluded.cancellation_requested,
                retry_task_id = excluded.retry_task_id,
                completion_event = excluded.completion_event,
                all_or_nothing = excluded.all_or_nothing,
                total_bytes_transferred = excluded.total_bytes_transferred,
                priority = COALESCE(?26, collection_download_task.priority)
            RETURNING priority, created
            "#,
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.path)
        .bind(&task.configuration_id);
        let row = dest
            .bind(query)
            .bind(task.status.as_str())
            .bind(task.task_type.as_str())
            .bind(items)
            .bind(data_object_paths)
            .bind(collection_paths)
            .bind(task.created)
            .bind(task.processed)
            .bind(task.cancellation_requested)
            .bind(&task.retry_task_id)
            .bind(task.completion_event)
            .bind(task.all_or_nothing)
            .bind(task.total_bytes_transferred)
            .bind(task.priority)
            .fetch_one(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;

        task.priority = Some(row.get("priority"));
        task.created = row.get("created");
        Ok(task.id.clone())
    }

    pub async fn get_collection_task(&self, id: &str) -> StoreResult<Option<CollectionDownloadTask>> {
        let sql = format!(
            "SELECT {} FROM collection_download_task WHERE id = ?1",
            COLLECTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        row.map(|r| self.collection_from_row(&r)).transpose()
    }

    pub async fn delete_collection_task(&self, id: &str) -> StoreResult<bool> {
        let r = sqlx::query("DELETE FROM collection_download_task WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    /// Collections in `status`; `in_process` narrows to claimed or unclaimed ones.
    pub async fn list_collections_by_status(
        &self,
        status: CollectionStatus,
        in_process: Option<bool>,
    ) -> StoreResult<Vec<CollectionDownloadTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM collection_download_task
            WHERE status = ?1 AND (?2 IS NULL OR in_process = ?2)
            ORDER BY priority ASC, created ASC
            "#,
            COLLECTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(in_process)
            .fetch_all(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(decode_rows(SUBSYSTEM, &rows, |r| self.collection_from_row(r)))
    }

    /// Same selection rule as `next_ready_download`.
    pub async fn next_ready_collection(
        &self,
        status: CollectionStatus,
        older_than: i64,
    ) -> StoreResult<Option<CollectionDownloadTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM collection_download_task
            WHERE status = ?1
              AND in_process = 0
              AND (processed IS NULL OR processed < ?2)
            ORDER BY priority ASC, created ASC
            LIMIT 8
            "#,
            COLLECTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(older_than)
            .fetch_all(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(decode_rows(SUBSYSTEM, &rows, |r| self.collection_from_row(r))
            .into_iter()
            .next())
    }

    pub async fn update_collection_status(
        &self,
        id: &str,
        from: CollectionStatus,
        to: CollectionStatus,
    ) -> StoreResult<bool> {
        check_transition(from, to)?;
        let r = sqlx::query(
            "UPDATE collection_download_task SET status = ?1 WHERE id = ?2 AND status = ?3",
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    /// Store the fanned-out items and move a `RECEIVED` parent to `ACTIVE`.
    ///
    /// Only those columns are written, so a cancellation or byte count
    /// recorded while paths were being resolved survives. A parent that went
    /// `CANCELING` meanwhile keeps that status. Returns the status now stored,
    /// or `None` if the parent is gone or already past fan-out.
    pub async fn record_collection_fan_out(
        &self,
        id: &str,
        items: &[CollectionDownloadItem],
        data_object_paths: &[String],
    ) -> StoreResult<Option<CollectionStatus>> {
        check_transition(CollectionStatus::Received, CollectionStatus::Active)?;
        let row = sqlx::query(
            r#"
            UPDATE collection_download_task
            SET items = ?1,
                data_object_paths = ?2,
                status = CASE WHEN status = 'RECEIVED' THEN 'ACTIVE' ELSE status END
            WHERE id = ?3 AND status IN ('RECEIVED', 'CANCELING')
            RETURNING status
            "#,
        )
        .bind(encode_items(items)?)
        .bind(encode_paths(data_object_paths)?)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        match row {
            Some(r) => Ok(Some(parse_column(&r, "status", CollectionStatus::parse)?)),
            None => Ok(None),
        }
    }

    pub async fn set_collection_cancellation_requested(&self, id: &str, requested: bool) -> StoreResult<bool> {
        let r = sqlx::query(
            "UPDATE collection_download_task SET cancellation_requested = ?1 WHERE id = ?2",
        )
        .bind(requested)
        .bind(id)
        .execute(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }

    /// Cooperative cancellation flag; a missing collection reads as not requested.
    pub async fn collection_cancellation_requested(&self, id: &str) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT cancellation_requested FROM collection_download_task WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(row.map(|r| r.get::<bool, _>("cancellation_requested")).unwrap_or(false))
    }

    /// Reprioritize a collection and every one of its queued children.
    pub async fn set_collection_priority(&self, id: &str, priority: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.in_subsystem(SUBSYSTEM)?;
        let r = sqlx::query("UPDATE collection_download_task SET priority = ?1 WHERE id = ?2")
            .bind(priority)
            .bind(id)
            .execute(&mut *tx)
            .await
            .in_subsystem(SUBSYSTEM)?;
        if r.rows_affected() == 0 {
            tx.rollback().await.in_subsystem(SUBSYSTEM)?;
            return Ok(false);
        }
        sqlx::query(
            "UPDATE data_object_download_task SET priority = ?1 WHERE collection_task_id = ?2",
        )
        .bind(priority)
        .bind(id)
        .execute(&mut *tx)
        .await
        .in_subsystem(Subsystem::DataObjectDownload)?;
        tx.commit().await.in_subsystem(SUBSYSTEM)?;
        Ok(true)
    }

    /// Atomically add to the running byte total; ignored once the collection is terminal.
    pub async fn add_collection_bytes_transferred(&self, id: &str, bytes: i64) -> StoreResult<bool> {
        let r = sqlx::query(
            r#"
            UPDATE collection_download_task
            SET total_bytes_transferred = total_bytes_transferred + ?1
            WHERE id = ?2 AND status NOT IN ('COMPLETED', 'FAILED', 'CANCELED')
            "#,
        )
        .bind(bytes)
        .bind(id)
        .execute(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(r.rows_affected() > 0)
    }
}
