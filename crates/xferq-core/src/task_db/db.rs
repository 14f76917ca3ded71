//! SQLite-backed task database implementation.
//!
//! Handles connection, schema, timestamps and row-decoding helpers. The
//! per-family operations live in sibling modules.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::XferqConfig;
use crate::error::{StorageContext, StoreError, StoreResult, Subsystem};
use crate::vault::CredentialVault;

/// Handle to the task store: the connection pool plus the process-wide vault.
///
/// Cheap to clone; every worker holds its own clone.
#[derive(Clone)]
pub struct TaskDb {
    pub(crate) pool: Pool<Sqlite>,
    pub(crate) vault: Arc<CredentialVault>,
}

/// Default database location: `$XDG_STATE_HOME/xferq/tasks.db`.
pub fn default_db_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("xferq")?;
    xdg_dirs
        .place_state_file("tasks.db")
        .context("creating xferq state directory")
}

impl TaskDb {
    /// Open the database named by `[store]` (or the default location) with
    /// the vault built from `[vault]`, and run migrations.
    pub async fn open_configured(cfg: &XferqConfig) -> Result<Self> {
        let vault = Arc::new(cfg.build_vault()?);
        let path = match &cfg.store.path {
            Some(p) => p.clone(),
            None => default_db_path()?,
        };
        Self::open_at(path, cfg.store.max_connections, vault).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(
        path: impl AsRef<Path>,
        max_connections: u32,
        vault: Arc<CredentialVault>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("opening task database {}", path.display()))?;

        let db = TaskDb { pool, vault };
        db.migrate().await?;
        Ok(db)
    }

    pub(crate) async fn migrate(&self) -> StoreResult<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .in_subsystem(Subsystem::Schema)?;
        }
        Ok(())
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Destination columns (nine, in `StoredDestination::bind` order) repeat in
// every table that stores a destination.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS data_object_download_task (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        path TEXT NOT NULL,
        configuration_id TEXT NOT NULL,
        archive_configuration_id TEXT,
        transfer_request_id TEXT,
        transfer_type TEXT,
        status TEXT NOT NULL,
        destination_type TEXT,
        dest_container_id TEXT,
        dest_file_id TEXT,
        s3_access_key BLOB,
        s3_secret_key BLOB,
        s3_region TEXT,
        s3_endpoint_url TEXT,
        s3_path_style INTEGER,
        access_token BLOB,
        download_file_path TEXT,
        collection_task_id TEXT,
        percent_complete INTEGER,
        staging_percent_complete INTEGER,
        size INTEGER,
        created INTEGER NOT NULL,
        processed INTEGER,
        in_process INTEGER NOT NULL DEFAULT 0,
        owner_id TEXT,
        restore_requested INTEGER NOT NULL DEFAULT 0,
        first_hop_retried INTEGER NOT NULL DEFAULT 0,
        completion_event INTEGER NOT NULL DEFAULT 0,
        priority INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS data_object_download_task_ready \
     ON data_object_download_task (status, priority, created)",
    "CREATE INDEX IF NOT EXISTS data_object_download_task_collection \
     ON data_object_download_task (collection_task_id)",
    r#"
    CREATE TABLE IF NOT EXISTS collection_download_task (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        path TEXT NOT NULL,
        configuration_id TEXT NOT NULL,
        destination_type TEXT,
        dest_container_id TEXT,
        dest_file_id TEXT,
        s3_access_key BLOB,
        s3_secret_key BLOB,
        s3_region TEXT,
        s3_endpoint_url TEXT,
        s3_path_style INTEGER,
        access_token BLOB,
        status TEXT NOT NULL,
        task_type TEXT NOT NULL,
        items TEXT,
        data_object_paths TEXT,
        collection_paths TEXT,
        created INTEGER NOT NULL,
        processed INTEGER,
        in_process INTEGER NOT NULL DEFAULT 0,
        owner_id TEXT,
        cancellation_requested INTEGER NOT NULL DEFAULT 0,
        retry_task_id TEXT,
        completion_event INTEGER NOT NULL DEFAULT 0,
        all_or_nothing INTEGER NOT NULL DEFAULT 0,
        total_bytes_transferred INTEGER NOT NULL DEFAULT 0,
        priority INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS download_task_result (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        path TEXT NOT NULL,
        task_type TEXT NOT NULL,
        destination_type TEXT,
        dest_container_id TEXT,
        dest_file_id TEXT,
        s3_access_key BLOB,
        s3_secret_key BLOB,
        s3_region TEXT,
        s3_endpoint_url TEXT,
        s3_path_style INTEGER,
        access_token BLOB,
        result TEXT NOT NULL,
        message TEXT,
        items TEXT,
        data_object_paths TEXT,
        collection_paths TEXT,
        effective_transfer_speed INTEGER,
        size INTEGER,
        created INTEGER NOT NULL,
        completed INTEGER NOT NULL,
        retry_task_id TEXT,
        first_hop_retried INTEGER NOT NULL DEFAULT 0,
        collection_task_id TEXT,
        completion_event INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS download_task_result_collection \
     ON download_task_result (collection_task_id)",
    r#"
    CREATE TABLE IF NOT EXISTS data_migration_task (
        id TEXT PRIMARY KEY,
        parent_id TEXT,
        user_id TEXT NOT NULL,
        path TEXT NOT NULL,
        configuration_id TEXT NOT NULL,
        from_archive_configuration_id TEXT NOT NULL,
        to_archive_configuration_id TEXT NOT NULL,
        task_type TEXT NOT NULL,
        status TEXT NOT NULL,
        align_archive_path INTEGER NOT NULL DEFAULT 0,
        size INTEGER,
        percent_complete INTEGER,
        data_object_paths TEXT,
        collection_paths TEXT,
        from_container_id TEXT,
        from_file_id TEXT,
        to_container_id TEXT,
        to_file_id TEXT,
        created INTEGER NOT NULL,
        processed INTEGER,
        in_process INTEGER NOT NULL DEFAULT 0,
        owner_id TEXT,
        priority INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS data_migration_task_ready \
     ON data_migration_task (status, task_type, priority, created)",
    "CREATE INDEX IF NOT EXISTS data_migration_task_parent \
     ON data_migration_task (parent_id)",
    r#"
    CREATE TABLE IF NOT EXISTS data_migration_task_result (
        id TEXT PRIMARY KEY,
        parent_id TEXT,
        user_id TEXT NOT NULL,
        path TEXT NOT NULL,
        configuration_id TEXT NOT NULL,
        from_archive_configuration_id TEXT NOT NULL,
        to_archive_configuration_id TEXT NOT NULL,
        task_type TEXT NOT NULL,
        result TEXT NOT NULL,
        message TEXT,
        from_container_id TEXT,
        from_file_id TEXT,
        to_container_id TEXT,
        to_file_id TEXT,
        data_object_paths TEXT,
        collection_paths TEXT,
        size INTEGER,
        created INTEGER NOT NULL,
        completed INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS data_migration_task_result_parent \
     ON data_migration_task_result (parent_id)",
];

/// Current time as Unix milliseconds (for DB timestamps).
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Fresh task id when the caller left it blank.
pub(crate) fn assign_id(id: &mut String) {
    if id.is_empty() {
        *id = uuid::Uuid::new_v4().to_string();
    }
}

/// Parse a stored enumeration column.
pub(crate) fn parse_column<T>(
    row: &SqliteRow,
    column: &'static str,
    parse: fn(&str) -> Option<T>,
) -> StoreResult<T> {
    let value: String = row.get(column);
    parse(&value).ok_or(StoreError::UnknownValue { column, value })
}

/// Decode every row of a scan, logging and skipping rows that do not decode
/// (unknown status strings, rows with no usable destination).
pub(crate) fn decode_rows<T>(
    subsystem: Subsystem,
    rows: &[SqliteRow],
    mut decode: impl FnMut(&SqliteRow) -> StoreResult<T>,
) -> Vec<T> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match decode(row) {
            Ok(v) => out.push(v),
            Err(e) => {
                let id: Option<String> = row.try_get("id").ok();
                tracing::warn!(
                    task_id = id.as_deref().unwrap_or("?"),
                    "skipping undecodable row in {}: {}",
                    subsystem,
                    e
                );
            }
        }
    }
    out
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<TaskDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let vault = Arc::new(CredentialVault::from_key_material("unit-test-key")?);
    let db = TaskDb { pool, vault };
    db.migrate().await?;
    Ok(db)
}
