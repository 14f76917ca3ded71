//! Result store: immutable terminal records for downloads and migrations.
//!
//! A result is written once. Large blobs (items, path lists) go in a second
//! write that touches only those columns, so replaying either write is harmless.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{decode_rows, parse_column, TaskDb};
use super::items::{decode_items, decode_paths, encode_items, encode_paths};
use super::migration::{location_columns, location_from_columns};
use super::types::{
    CollectionDownloadItem, DataMigrationTaskResult, DownloadResultKind, DownloadTaskResult,
    MigrationResultKind, ResultCounts, TaskType,
};
use crate::destination::StoredDestination;
use crate::error::{StorageContext, StoreResult, Subsystem};

const DOWNLOAD_RESULT_COLUMNS: &str = r#"
    id, user_id, path, task_type,
    destination_type, dest_container_id, dest_file_id, s3_access_key, s3_secret_key,
    s3_region, s3_endpoint_url, s3_path_style, access_token,
    result, message, items, data_object_paths, collection_paths,
    effective_transfer_speed, size, created, completed, retry_task_id,
    first_hop_retried, collection_task_id, completion_event
"#;

const MIGRATION_RESULT_COLUMNS: &str = r#"
    id, parent_id, user_id, path, configuration_id,
    from_archive_configuration_id, to_archive_configuration_id, task_type, result, message,
    from_container_id, from_file_id, to_container_id, to_file_id,
    data_object_paths, collection_paths, size, created, completed
"#;

impl TaskDb {
    fn download_result_from_row(&self, row: &SqliteRow) -> StoreResult<DownloadTaskResult> {
        let result = parse_column(row, "result", DownloadResultKind::parse)?;
        let task_type = parse_column(row, "task_type", TaskType::parse)?;
        let stored = StoredDestination::from_row(row);
        let destination = if stored == StoredDestination::default() {
            None
        } else {
            Some(stored.open(&self.vault)?)
        };
        let items: Option<String> = row.get("items");
        let data_object_paths: Option<String> = row.get("data_object_paths");
        let collection_paths: Option<String> = row.get("collection_paths");
        Ok(DownloadTaskResult {
            id: row.get("id"),
            user_id: row.get("user_id"),
            path: row.get("path"),
            task_type,
            destination,
            result,
            message: row.get("message"),
            items: decode_items(items.as_deref())?,
            data_object_paths: decode_paths(data_object_paths.as_deref())?,
            collection_paths: decode_paths(collection_paths.as_deref())?,
            effective_transfer_speed: row.get("effective_transfer_speed"),
            size: row.get("size"),
            created: row.get("created"),
            completed: row.get("completed"),
            retry_task_id: row.get("retry_task_id"),
            first_hop_retried: row.get("first_hop_retried"),
            collection_task_id: row.get("collection_task_id"),
            completion_event: row.get("completion_event"),
        })
    }

    /// Write a download result, then its blobs (if any) in a second write.
    pub async fn upsert_download_result(&self, result: &DownloadTaskResult) -> StoreResult<()> {
        let dest = match &result.destination {
            Some(d) => StoredDestination::seal(Some(d), &self.vault)?,
            None => StoredDestination::default(),
        };
        let query = sqlx::query(
            r#"
            INSERT INTO download_task_result (
                id, user_id, path, task_type,
                destination_type, dest_container_id, dest_file_id, s3_access_key, s3_secret_key,
                s3_region, s3_endpoint_url, s3_path_style, access_token,
                result, message, effective_transfer_speed, size, created, completed,
                retry_task_id, first_hop_retried, collection_task_id, completion_event
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
            )
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                path = excluded.path,
                task_type = excluded.task_type,
                destination_type = excluded.destination_type,
                dest_container_id = excluded.dest_container_id,
                dest_file_id = excluded.dest_file_id,
                s3_access_key = excluded.s3_access_key,
                s3_secret_key = excluded.s3_secret_key,
                s3_region = excluded.s3_region,
                s3_endpoint_url = excluded.s3_endpoint_url,
                s3_path_style = excluded.s3_path_style,
                access_token = excluded.access_token,
                result = excluded.result,
                message = excluded.message,
                effective_transfer_speed = excluded.effective_transfer_speed,
                size = excluded.size,
                created = excluded.created,
                completed = excluded.completed,
                retry_task_id = excluded.retry_task_id,
                first_hop_retried = excluded.first_hop_retried,
                collection_task_id = excluded.collection_task_id,
                completion_event = excluded.completion_event
            "#,
        )
        .bind(&result.id)
        .bind(&result.user_id)
        .bind(&result.path)
        .bind(result.task_type.as_str());
        dest.bind(query)
            .bind(result.result.as_str())
            .bind(&result.message)
            .bind(result.effective_transfer_speed)
            .bind(result.size)
            .bind(result.created)
            .bind(result.completed)
            .bind(&result.retry_task_id)
            .bind(result.first_hop_retried)
            .bind(&result.collection_task_id)
            .bind(result.completion_event)
            .execute(&self.pool)
            .await
            .in_subsystem(Subsystem::DownloadResult)?;

        if !result.items.is_empty()
            || !result.data_object_paths.is_empty()
            || !result.collection_paths.is_empty()
        {
            self.update_download_result_blobs(
                &result.id,
                &result.items,
                &result.data_object_paths,
                &result.collection_paths,
            )
            .await?;
        }
        tracing::info!(
            task_id = %result.id,
            collection_task_id = result.collection_task_id.as_deref().unwrap_or(""),
            "download result {} recorded",
            result.result
        );
        Ok(())
    }

    /// Second write for a result: items and path lists only.
    pub async fn update_download_result_blobs(
        &self,
        id: &str,
        items: &[CollectionDownloadItem],
        data_object_paths: &[String],
        collection_paths: &[String],
    ) -> StoreResult<bool> {
        let r = sqlx::query(
            r#"
            UPDATE download_task_result
            SET items = ?1, data_object_paths = ?2, collection_paths = ?3
            WHERE id = ?4
            "#,
        )
        .bind(encode_items(items)?)
        .bind(encode_paths(data_object_paths)?)
        .bind(encode_paths(collection_paths)?)
        .bind(id)
        .execute(&self.pool)
        .await
        .in_subsystem(Subsystem::DownloadResult)?;
        Ok(r.rows_affected() > 0)
    }

    pub async fn get_download_result(&self, id: &str) -> StoreResult<Option<DownloadTaskResult>> {
        let sql = format!(
            "SELECT {} FROM download_task_result WHERE id = ?1",
            DOWNLOAD_RESULT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .in_subsystem(Subsystem::DownloadResult)?;
        row.map(|r| self.download_result_from_row(&r)).transpose()
    }

    /// Every result recorded for children of a collection, retried ones included.
    pub async fn list_download_results_by_collection(
        &self,
        collection_task_id: &str,
    ) -> StoreResult<Vec<DownloadTaskResult>> {
        let sql = format!(
            "SELECT {} FROM download_task_result WHERE collection_task_id = ?1 ORDER BY completed ASC, id ASC",
            DOWNLOAD_RESULT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(collection_task_id)
            .fetch_all(&self.pool)
            .await
            .in_subsystem(Subsystem::DownloadResult)?;
        Ok(decode_rows(Subsystem::DownloadResult, &rows, |r| {
            self.download_result_from_row(r)
        }))
    }

    pub async fn delete_download_result(&self, id: &str) -> StoreResult<bool> {
        let r = sqlx::query("DELETE FROM download_task_result WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(Subsystem::DownloadResult)?;
        Ok(r.rows_affected() > 0)
    }

    /// Final child outcomes of a collection, grouped by kind. Results that
    /// were superseded by a retry task are not counted.
    pub async fn aggregate_download_result_count(
        &self,
        collection_task_id: &str,
    ) -> StoreResult<ResultCounts<DownloadResultKind>> {
        let rows = sqlx::query(
            r#"
            SELECT result, COUNT(*) AS n FROM download_task_result
            WHERE collection_task_id = ?1 AND retry_task_id IS NULL
            GROUP BY result
            "#,
        )
        .bind(collection_task_id)
        .fetch_all(&self.pool)
        .await
        .in_subsystem(Subsystem::DownloadResult)?;
        Ok(ResultCounts::from_pairs(decode_rows(
            Subsystem::DownloadResult,
            &rows,
            |r| Ok((parse_column(r, "result", DownloadResultKind::parse)?, r.get("n"))),
        )))
    }

    /// Drop stored cloud access tokens from results completed before `completed_before`.
    pub async fn purge_result_access_tokens(&self, completed_before: i64) -> StoreResult<u64> {
        let r = sqlx::query(
            r#"
            UPDATE download_task_result SET access_token = NULL
            WHERE access_token IS NOT NULL AND completed < ?1
            "#,
        )
        .bind(completed_before)
        .execute(&self.pool)
        .await
        .in_subsystem(Subsystem::DownloadResult)?;
        Ok(r.rows_affected())
    }

    fn migration_result_from_row(&self, row: &SqliteRow) -> StoreResult<DataMigrationTaskResult> {
        let result = parse_column(row, "result", MigrationResultKind::parse)?;
        let task_type = parse_column(row, "task_type", TaskType::parse)?;
        let data_object_paths: Option<String> = row.get("data_object_paths");
        let collection_paths: Option<String> = row.get("collection_paths");
        Ok(DataMigrationTaskResult {
            id: row.get("id"),
            parent_id: row.get("parent_id"),
            user_id: row.get("user_id"),
            path: row.get("path"),
            configuration_id: row.get("configuration_id"),
            from_archive_configuration_id: row.get("from_archive_configuration_id"),
            to_archive_configuration_id: row.get("to_archive_configuration_id"),
            task_type,
            result,
            message: row.get("message"),
            from_location: location_from_columns(row.get("from_container_id"), row.get("from_file_id")),
            to_location: location_from_columns(row.get("to_container_id"), row.get("to_file_id")),
            data_object_paths: decode_paths(data_object_paths.as_deref())?,
            collection_paths: decode_paths(collection_paths.as_deref())?,
            size: row.get("size"),
            created: row.get("created"),
            completed: row.get("completed"),
        })
    }

    pub async fn upsert_migration_result(&self, result: &DataMigrationTaskResult) -> StoreResult<()> {
        let (from_container, from_file) = location_columns(result.from_location.as_ref());
        let (to_container, to_file) = location_columns(result.to_location.as_ref());
        sqlx::query(
            r#"
            INSERT INTO data_migration_task_result (
                id, parent_id, user_id, path, configuration_id,
                from_archive_configuration_id, to_archive_configuration_id, task_type,
                result, message, from_container_id, from_file_id, to_container_id, to_file_id,
                data_object_paths, collection_paths, size, created, completed
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19
            )
            ON CONFLICT(id) DO UPDATE SET
                parent_id = excluded.parent_id,
                user_id = excluded.user_id,
                path = excluded.path,
                configuration_id = excluded.configuration_id,
                from_archive_configuration_id = excluded.from_archive_configuration_id,
                to_archive_configuration_id = excluded.to_archive_configuration_id,
                task_type = excluded.task_type,
                result = excluded.result,
                message = excluded.message,
                from_container_id = excluded.from_container_id,
                from_file_id = excluded.from_file_id,
                to_container_id = excluded.to_container_id,
                to_file_id = excluded.to_file_id,
                data_object_paths = excluded.data_object_paths,
                collection_paths = excluded.collection_paths,
                size = excluded.size,
                created = excluded.created,
                completed = excluded.completed
            "#,
        )
        .bind(&result.id)
        .bind(&result.parent_id)
        .bind(&result.user_id)
        .bind(&result.path)
        .bind(&result.configuration_id)
        .bind(&result.from_archive_configuration_id)
        .bind(&result.to_archive_configuration_id)
        .bind(result.task_type.as_str())
        .bind(result.result.as_str())
        .bind(&result.message)
        .bind(from_container)
        .bind(from_file)
        .bind(to_container)
        .bind(to_file)
        .bind(encode_paths(&result.data_object_paths)?)
        .bind(encode_paths(&result.collection_paths)?)
        .bind(result.size)
        .bind(result.created)
        .bind(result.completed)
        .execute(&self.pool)
        .await
        .in_subsystem(Subsystem::MigrationResult)?;
        tracing::info!(task_id = %result.id, "migration result {} recorded", result.result);
        Ok(())
    }

    pub async fn get_migration_result(&self, id: &str) -> StoreResult<Option<DataMigrationTaskResult>> {
        let sql = format!(
            "SELECT {} FROM data_migration_task_result WHERE id = ?1",
            MIGRATION_RESULT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .in_subsystem(Subsystem::MigrationResult)?;
        row.map(|r| self.migration_result_from_row(&r)).transpose()
    }

    /// Child outcomes of a bulk migration, grouped by kind.
    pub async fn aggregate_migration_result_count(
        &self,
        parent_id: &str,
    ) -> StoreResult<ResultCounts<MigrationResultKind>> {
        let rows = sqlx::query(
            r#"
            SELECT result, COUNT(*) AS n FROM data_migration_task_result
            WHERE parent_id = ?1
            GROUP BY result
            "#,
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .in_subsystem(Subsystem::MigrationResult)?;
        Ok(ResultCounts::from_pairs(decode_rows(
            Subsystem::MigrationResult,
            &rows,
            |r| Ok((parse_column(r, "result", MigrationResultKind::parse)?, r.get("n"))),
        )))
    }
}
