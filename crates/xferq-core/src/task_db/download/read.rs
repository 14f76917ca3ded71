//! Data-object download reads: point lookup, scans and queue selection.

use sqlx::Row;

use super::super::db::{decode_rows, TaskDb};
use super::super::types::{DataObjectDownloadTask, DownloadStatus};
use super::DOWNLOAD_COLUMNS;
use crate::destination::DestinationType;
use crate::error::{StorageContext, StoreResult, Subsystem};

const SUBSYSTEM: Subsystem = Subsystem::DataObjectDownload;

impl TaskDb {
    /// Fetch one task by id; `Ok(None)` when it does not exist.
    pub async fn get_download_task(&self, id: &str) -> StoreResult<Option<DataObjectDownloadTask>> {
        let sql = format!(
            "SELECT {} FROM data_object_download_task WHERE id = ?1",
            DOWNLOAD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        row.map(|r| self.download_from_row(&r)).transpose()
    }

    /// All tasks in `status`, optionally only those bound for one destination type.
    pub async fn list_download_tasks_by_status(
        &self,
        status: DownloadStatus,
        destination_type: Option<DestinationType>,
    ) -> StoreResult<Vec<DataObjectDownloadTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM data_object_download_task
            WHERE status = ?1 AND (?2 IS NULL OR destination_type = ?2)
            ORDER BY priority ASC, created ASC
            "#,
            DOWNLOAD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(destination_type.map(DestinationType::as_str))
            .fetch_all(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(decode_rows(SUBSYSTEM, &rows, |r| self.download_from_row(r)))
    }

    /// Active children of a collection download.
    pub async fn list_download_tasks_by_collection(
        &self,
        collection_task_id: &str,
    ) -> StoreResult<Vec<DataObjectDownloadTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM data_object_download_task
            WHERE collection_task_id = ?1
            ORDER BY created ASC, id ASC
            "#,
            DOWNLOAD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(collection_task_id)
            .fetch_all(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(decode_rows(SUBSYSTEM, &rows, |r| self.download_from_row(r)))
    }

    pub async fn count_download_tasks_by_collection(&self, collection_task_id: &str) -> StoreResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM data_object_download_task WHERE collection_task_id = ?1",
        )
        .bind(collection_task_id)
        .fetch_one(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(row.get("n"))
    }

    /// The next unclaimed task in `status` by priority then age, skipping any
    /// whose last attempt (`processed`) is not older than `older_than`.
    ///
    /// Selection does not claim; callers follow up with `try_claim`.
    pub async fn next_ready_download(
        &self,
        status: DownloadStatus,
        destination_type: Option<DestinationType>,
        older_than: i64,
    ) -> StoreResult<Option<DataObjectDownloadTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM data_object_download_task
            WHERE status = ?1
              AND in_process = 0
              AND (processed IS NULL OR processed < ?2)
              AND (?3 IS NULL OR destination_type = ?3)
            ORDER BY priority ASC, created ASC
            LIMIT 8
            "#,
            DOWNLOAD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(older_than)
            .bind(destination_type.map(DestinationType::as_str))
            .fetch_all(&self.pool)
            .await
            .in_subsystem(SUBSYSTEM)?;
        Ok(decode_rows(SUBSYSTEM, &rows, |r| self.download_from_row(r))
            .into_iter()
            .next())
    }

    /// Tasks `owner_id` is currently transferring, optionally per destination type.
    pub async fn count_download_tasks_in_progress(
        &self,
        owner_id: &str,
        destination_type: Option<DestinationType>,
    ) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM data_object_download_task
            WHERE status = ?1 AND owner_id = ?2
              AND (?3 IS NULL OR destination_type = ?3)
            "#,
        )
        .bind(DownloadStatus::InProgress.as_str())
        .bind(owner_id)
        .bind(destination_type.map(DestinationType::as_str))
        .fetch_one(&self.pool)
        .await
        .in_subsystem(SUBSYSTEM)?;
        Ok(row.get("n"))
    }
}
