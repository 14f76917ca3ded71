//! Types used by the task database.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::destination::{Destination, DestinationType, FileLocation};
use crate::error::Subsystem;

pub use super::items::CollectionDownloadItem;

/// Opaque task identifier (UUID v4 text). Empty means "not yet assigned".
pub type TaskId = String;

/// Enumerations persisted as upper-case strings.
macro_rules! stored_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

stored_enum! {
    /// Lifecycle of a single data-object download.
    DownloadStatus {
        Received => "RECEIVED",
        RestoreRequested => "RESTORE_REQUESTED",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Canceled => "CANCELED",
    }
}

stored_enum! {
    /// Lifecycle of a bulk (collection / list) download. `Active` means the
    /// children have been fanned out.
    CollectionStatus {
        Received => "RECEIVED",
        Active => "ACTIVE",
        Canceling => "CANCELING",
        Canceled => "CANCELED",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

stored_enum! {
    MigrationStatus {
        Received => "RECEIVED",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

stored_enum! {
    /// Terminal outcome recorded on a download result (and per collection item).
    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    DownloadResultKind {
        Completed => "COMPLETED",
        Failed => "FAILED",
        Canceled => "CANCELED",
        FailedPermissionDenied => "FAILED_PERMISSION_DENIED",
        FailedCredentialsNeeded => "FAILED_CREDENTIALS_NEEDED",
        CompletedWithFailures => "COMPLETED_WITH_FAILURES",
    }
}

stored_enum! {
    MigrationResultKind {
        Completed => "COMPLETED",
        Failed => "FAILED",
        Ignored => "IGNORED",
        CompletedIgnoredItems => "COMPLETED_IGNORED_ITEMS",
    }
}

stored_enum! {
    TaskType {
        DataObject => "DATA_OBJECT",
        Collection => "COLLECTION",
        DataObjectList => "DATA_OBJECT_LIST",
        CollectionList => "COLLECTION_LIST",
    }
}

impl DownloadResultKind {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            DownloadResultKind::Completed | DownloadResultKind::CompletedWithFailures
        )
    }
}

/// The three active-task tables. The claim protocol works the same on each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFamily {
    DataObjectDownload,
    CollectionDownload,
    DataMigration,
}

impl TaskFamily {
    pub const ALL: [TaskFamily; 3] = [
        TaskFamily::DataObjectDownload,
        TaskFamily::CollectionDownload,
        TaskFamily::DataMigration,
    ];

    pub(crate) fn table(self) -> &'static str {
        match self {
            TaskFamily::DataObjectDownload => "data_object_download_task",
            TaskFamily::CollectionDownload => "collection_download_task",
            TaskFamily::DataMigration => "data_migration_task",
        }
    }

    pub fn subsystem(self) -> Subsystem {
        match self {
            TaskFamily::DataObjectDownload => Subsystem::DataObjectDownload,
            TaskFamily::CollectionDownload => Subsystem::CollectionDownload,
            TaskFamily::DataMigration => Subsystem::DataMigration,
        }
    }
}

impl fmt::Display for TaskFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.subsystem(), f)
    }
}

/// One `(status, destination type)` pair a conditional status update may move from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFilter {
    pub status: DownloadStatus,
    pub destination_type: DestinationType,
}

impl StatusFilter {
    /// One filter per destination type for `status`.
    pub fn any_destination(status: DownloadStatus) -> Vec<StatusFilter> {
        DestinationType::ALL
            .iter()
            .map(|&destination_type| StatusFilter {
                status,
                destination_type,
            })
            .collect()
    }
}

/// Count of results per kind, produced by the aggregate queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCounts<K: Ord> {
    counts: BTreeMap<K, i64>,
}

impl<K: Ord + Copy> ResultCounts<K> {
    pub(crate) fn from_pairs(pairs: impl IntoIterator<Item = (K, i64)>) -> Self {
        let mut counts = BTreeMap::new();
        for (k, n) in pairs {
            *counts.entry(k).or_insert(0) += n;
        }
        Self { counts }
    }

    pub fn get(&self, kind: K) -> i64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, i64)> + '_ {
        self.counts.iter().map(|(k, n)| (*k, *n))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// A single data-object download, possibly a child of a collection download.
#[derive(Debug, Clone, PartialEq)]
pub struct DataObjectDownloadTask {
    pub id: TaskId,
    pub user_id: String,
    pub path: String,
    pub configuration_id: String,
    pub archive_configuration_id: Option<String>,
    pub transfer_request_id: Option<String>,
    pub transfer_type: Option<String>,
    pub status: DownloadStatus,
    pub destination: Option<Destination>,
    pub download_file_path: Option<String>,
    pub collection_task_id: Option<TaskId>,
    pub percent_complete: Option<i64>,
    pub staging_percent_complete: Option<i64>,
    pub size: Option<i64>,
    /// Unix millis; `0` on a new task means "now".
    pub created: i64,
    pub processed: Option<i64>,
    pub in_process: bool,
    pub owner_id: Option<String>,
    pub restore_requested: bool,
    pub first_hop_retried: bool,
    pub completion_event: bool,
    /// `None` on a new task means "back of the queue for this configuration".
    pub priority: Option<i64>,
}

impl DataObjectDownloadTask {
    pub fn new(
        user_id: impl Into<String>,
        path: impl Into<String>,
        configuration_id: impl Into<String>,
        destination: Destination,
    ) -> Self {
        Self {
            id: TaskId::new(),
            user_id: user_id.into(),
            path: path.into(),
            configuration_id: configuration_id.into(),
            archive_configuration_id: None,
            transfer_request_id: None,
            transfer_type: None,
            status: DownloadStatus::Received,
            destination: Some(destination),
            download_file_path: None,
            collection_task_id: None,
            percent_complete: None,
            staging_percent_complete: None,
            size: None,
            created: 0,
            processed: None,
            in_process: false,
            owner_id: None,
            restore_requested: false,
            first_hop_retried: false,
            completion_event: false,
            priority: None,
        }
    }

    pub fn destination_type(&self) -> Option<DestinationType> {
        self.destination.as_ref().map(Destination::destination_type)
    }
}

/// Bulk download request: one collection, or a list of objects/collections.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDownloadTask {
    pub id: TaskId,
    pub user_id: String,
    pub path: String,
    pub configuration_id: String,
    pub destination: Option<Destination>,
    pub status: CollectionStatus,
    pub task_type: TaskType,
    pub items: Vec<CollectionDownloadItem>,
    pub data_object_paths: Vec<String>,
    pub collection_paths: Vec<String>,
    pub created: i64,
    pub processed: Option<i64>,
    pub in_process: bool,
    pub owner_id: Option<String>,
    pub cancellation_requested: bool,
    pub retry_task_id: Option<TaskId>,
    pub completion_event: bool,
    /// Any failed child fails the whole request.
    pub all_or_nothing: bool,
    pub total_bytes_transferred: i64,
    pub priority: Option<i64>,
}

impl CollectionDownloadTask {
    pub fn new(
        user_id: impl Into<String>,
        path: impl Into<String>,
        configuration_id: impl Into<String>,
        task_type: TaskType,
        destination: Destination,
    ) -> Self {
        Self {
            id: TaskId::new(),
            user_id: user_id.into(),
            path: path.into(),
            configuration_id: configuration_id.into(),
            destination: Some(destination),
            status: CollectionStatus::Received,
            task_type,
            items: Vec::new(),
            data_object_paths: Vec::new(),
            collection_paths: Vec::new(),
            created: 0,
            processed: None,
            in_process: false,
            owner_id: None,
            cancellation_requested: false,
            retry_task_id: None,
            completion_event: false,
            all_or_nothing: false,
            total_bytes_transferred: 0,
            priority: None,
        }
    }
}

/// Immutable terminal record for a data-object or collection download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTaskResult {
    pub id: TaskId,
    pub user_id: String,
    pub path: String,
    pub task_type: TaskType,
    pub destination: Option<Destination>,
    pub result: DownloadResultKind,
    pub message: Option<String>,
    pub items: Vec<CollectionDownloadItem>,
    pub data_object_paths: Vec<String>,
    pub collection_paths: Vec<String>,
    pub effective_transfer_speed: Option<i64>,
    pub size: Option<i64>,
    pub created: i64,
    pub completed: i64,
    pub retry_task_id: Option<TaskId>,
    pub first_hop_retried: bool,
    pub collection_task_id: Option<TaskId>,
    pub completion_event: bool,
}

impl DownloadTaskResult {
    /// Result for a resolved data-object task.
    pub fn for_task(
        task: &DataObjectDownloadTask,
        result: DownloadResultKind,
        message: Option<String>,
        completed: i64,
    ) -> Self {
        Self {
            id: task.id.clone(),
            user_id: task.user_id.clone(),
            path: task.path.clone(),
            task_type: TaskType::DataObject,
            destination: task.destination.clone(),
            result,
            message,
            items: Vec::new(),
            data_object_paths: Vec::new(),
            collection_paths: Vec::new(),
            effective_transfer_speed: None,
            size: task.size,
            created: task.created,
            completed,
            retry_task_id: None,
            first_hop_retried: task.first_hop_retried,
            collection_task_id: task.collection_task_id.clone(),
            completion_event: task.completion_event,
        }
    }

    /// Result for a resolved collection task (items/paths go in the blob write).
    pub fn for_collection(
        task: &CollectionDownloadTask,
        result: DownloadResultKind,
        message: Option<String>,
        completed: i64,
    ) -> Self {
        Self {
            id: task.id.clone(),
            user_id: task.user_id.clone(),
            path: task.path.clone(),
            task_type: task.task_type,
            destination: task.destination.clone(),
            result,
            message,
            items: task.items.clone(),
            data_object_paths: task.data_object_paths.clone(),
            collection_paths: task.collection_paths.clone(),
            effective_transfer_speed: None,
            size: Some(task.total_bytes_transferred),
            created: task.created,
            completed,
            retry_task_id: task.retry_task_id.clone(),
            first_hop_retried: false,
            collection_task_id: None,
            completion_event: task.completion_event,
        }
    }
}

/// Storage-tier to storage-tier migration of a data object, or a bulk parent.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMigrationTask {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    pub user_id: String,
    pub path: String,
    pub configuration_id: String,
    pub from_archive_configuration_id: String,
    pub to_archive_configuration_id: String,
    pub task_type: TaskType,
    pub status: MigrationStatus,
    pub align_archive_path: bool,
    pub size: Option<i64>,
    pub percent_complete: Option<i64>,
    pub data_object_paths: Vec<String>,
    pub collection_paths: Vec<String>,
    pub from_location: Option<FileLocation>,
    pub to_location: Option<FileLocation>,
    pub created: i64,
    pub processed: Option<i64>,
    pub in_process: bool,
    pub owner_id: Option<String>,
    pub priority: Option<i64>,
}

impl DataMigrationTask {
    pub fn new(
        user_id: impl Into<String>,
        path: impl Into<String>,
        configuration_id: impl Into<String>,
        from_archive_configuration_id: impl Into<String>,
        to_archive_configuration_id: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        Self {
            id: TaskId::new(),
            parent_id: None,
            user_id: user_id.into(),
            path: path.into(),
            configuration_id: configuration_id.into(),
            from_archive_configuration_id: from_archive_configuration_id.into(),
            to_archive_configuration_id: to_archive_configuration_id.into(),
            task_type,
            status: MigrationStatus::Received,
            align_archive_path: false,
            size: None,
            percent_complete: None,
            data_object_paths: Vec::new(),
            collection_paths: Vec::new(),
            from_location: None,
            to_location: None,
            created: 0,
            processed: None,
            in_process: false,
            owner_id: None,
            priority: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataMigrationTaskResult {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    pub user_id: String,
    pub path: String,
    pub configuration_id: String,
    pub from_archive_configuration_id: String,
    pub to_archive_configuration_id: String,
    pub task_type: TaskType,
    pub result: MigrationResultKind,
    pub message: Option<String>,
    pub from_location: Option<FileLocation>,
    pub to_location: Option<FileLocation>,
    pub data_object_paths: Vec<String>,
    pub collection_paths: Vec<String>,
    pub size: Option<i64>,
    pub created: i64,
    pub completed: i64,
}

impl DataMigrationTaskResult {
    pub fn for_task(
        task: &DataMigrationTask,
        result: MigrationResultKind,
        message: Option<String>,
        completed: i64,
    ) -> Self {
        Self {
            id: task.id.clone(),
            parent_id: task.parent_id.clone(),
            user_id: task.user_id.clone(),
            path: task.path.clone(),
            configuration_id: task.configuration_id.clone(),
            from_archive_configuration_id: task.from_archive_configuration_id.clone(),
            to_archive_configuration_id: task.to_archive_configuration_id.clone(),
            task_type: task.task_type,
            result,
            message,
            from_location: task.from_location.clone(),
            to_location: task.to_location.clone(),
            data_object_paths: task.data_object_paths.clone(),
            collection_paths: task.collection_paths.clone(),
            size: task.size,
            created: task.created,
            completed,
        }
    }
}
