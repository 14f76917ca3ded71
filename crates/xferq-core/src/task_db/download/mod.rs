//! Data-object download tasks: row mapping shared by reads and writes.

mod read;
mod write;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{parse_column, TaskDb};
use super::types::{DataObjectDownloadTask, DownloadStatus};
use crate::destination::StoredDestination;
use crate::error::StoreResult;

pub(crate) const DOWNLOAD_COLUMNS: &str = r#"
    id, user_id, path, configuration_id, archive_configuration_id,
    transfer_request_id, transfer_type, status,
    destination_type, dest_container_id, dest_file_id, s3_access_key, s3_secret_key,
    s3_region, s3_endpoint_url, s3_path_style, access_token,
    download_file_path, collection_task_id, percent_complete, staging_percent_complete,
    size, created, processed, in_process, owner_id, restore_requested,
    first_hop_retried, completion_event, priority
"#;

impl TaskDb {
    pub(crate) fn download_from_row(&self, row: &SqliteRow) -> StoreResult<DataObjectDownloadTask> {
        let status = parse_column(row, "status", DownloadStatus::parse)?;
        let destination = StoredDestination::from_row(row).open(&self.vault)?;
        Ok(DataObjectDownloadTask {
            id: row.get("id"),
            user_id: row.get("user_id"),
            path: row.get("path"),
            configuration_id: row.get("configuration_id"),
            archive_configuration_id: row.get("archive_configuration_id"),
            transfer_request_id: row.get("transfer_request_id"),
            transfer_type: row.get("transfer_type"),
            status,
            destination: Some(destination),
            download_file_path: row.get("download_file_path"),
            collection_task_id: row.get("collection_task_id"),
            percent_complete: row.get("percent_complete"),
            staging_percent_complete: row.get("staging_percent_complete"),
            size: row.get("size"),
            created: row.get("created"),
            processed: row.get("processed"),
            in_process: row.get("in_process"),
            owner_id: row.get("owner_id"),
            restore_requested: row.get("restore_requested"),
            first_hop_retried: row.get("first_hop_retried"),
            completion_event: row.get("completion_event"),
            priority: Some(row.get("priority")),
        })
    }
}
