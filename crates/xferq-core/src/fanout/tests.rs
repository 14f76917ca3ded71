use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::*;
use crate::destination::{Destination, FileLocation};
use crate::task_db::db::open_memory;
use crate::task_db::{
    now_millis, CollectionDownloadTask, CollectionStatus, DataMigrationTask,
    DataMigrationTaskResult, DataObjectDownloadTask, DownloadStatus, DownloadTaskResult,
    MigrationResultKind, MigrationStatus, TaskFamily,
};

struct Tree(HashMap<String, Vec<String>>);

#[async_trait]
impl PathResolver for Tree {
    async fn data_object_paths(&self, collection_path: &str) -> Result<Vec<String>, CollaboratorError> {
        self.0
            .get(collection_path)
            .cloned()
            .ok_or_else(|| format!("no collection at {}", collection_path).into())
    }
}

fn tree() -> Tree {
    let mut m = HashMap::new();
    m.insert(
        "/proj/run1".to_string(),
        vec![
            "/proj/run1/a.dat".to_string(),
            "/proj/run1/b.dat".to_string(),
            "/proj/run1/sub/c.dat".to_string(),
        ],
    );
    m.insert("/proj/run2".to_string(), vec!["/proj/run2/a.dat".to_string()]);
    Tree(m)
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

#[async_trait]
impl Notifier for Recorder {
    async fn download_completed(&self, result: &DownloadTaskResult) {
        self.0.lock().unwrap().push(format!("{}:{}", result.id, result.result));
    }
}

fn grid(folder: &str) -> Destination {
    Destination::GridEndpoint {
        location: FileLocation::new("endpoint-1", folder),
    }
}

async fn coordinator() -> (Coordinator, Arc<Recorder>) {
    let db = open_memory().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    (Coordinator::new(db, "node-a", recorder.clone()), recorder)
}

fn collection(path: &str) -> CollectionDownloadTask {
    CollectionDownloadTask::new("alice", path, "cfg-1", TaskType::Collection, grid("/dest"))
}

/// Finish every child of `parent` with the given outcome per path.
async fn finish_children(c: &Coordinator, parent: &str, outcome: &[(&str, DownloadResultKind)]) {
    for child in c.db().list_download_tasks_by_collection(parent).await.unwrap() {
        let kind = outcome
            .iter()
            .find(|(p, _)| *p == child.path)
            .map(|(_, k)| *k)
            .unwrap_or(DownloadResultKind::Completed);
        let r = DownloadTaskResult::for_task(&child, kind, None, now_millis());
        c.db().upsert_download_result(&r).await.unwrap();
        c.db().delete_download_task(&child.id).await.unwrap();
    }
}

#[test]
fn relative_paths() {
    assert_eq!(relative_to("/proj/run1/sub/c.dat", "/proj/run1"), "sub/c.dat");
    assert_eq!(relative_to("/proj/run1/a.dat", "/proj/run1/"), "a.dat");
    assert_eq!(relative_to("/proj/run10/a.dat", "/proj/run1"), "a.dat");
    assert_eq!(parent_of("/proj/run1"), "/proj");
    assert_eq!(file_name("/proj/run1/a.dat"), "a.dat");
    assert_eq!(failure_message(1), "completed with 1 failure");
    assert_eq!(failure_message(2), "completed with 2 failures");
}

#[tokio::test]
async fn collection_list_keeps_collection_names() {
    let targets = expand_targets(
        TaskType::CollectionList,
        "",
        &[],
        &["/proj/run1".to_string(), "/proj/run2".to_string()],
        &tree(),
    )
    .await
    .unwrap();
    let rel: Vec<_> = targets.iter().map(|t| t.relative.as_str()).collect();
    assert_eq!(rel, ["run1/a.dat", "run1/b.dat", "run1/sub/c.dat", "run2/a.dat"]);
    assert_eq!(targets[3].collection_path.as_deref(), Some("/proj/run2"));
}

#[tokio::test]
async fn unresolvable_collection_is_an_error() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/missing");
    let err = c.create_collection_task(&mut task, &tree()).await.unwrap_err();
    assert!(matches!(err, FanOutError::Resolve { ref path, .. } if path == "/proj/missing"));
    let stored = c.db().get_collection_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CollectionStatus::Received);
    assert!(!stored.in_process);
}

#[tokio::test]
async fn fan_out_creates_children_with_inherited_priority() {
    let (c, _) = coordinator().await;
    let mut earlier = DataObjectDownloadTask::new("bob", "/proj/x.dat", "cfg-1", grid("/b"));
    earlier.priority = Some(4);
    c.db().upsert_download_task(&mut earlier).await.unwrap();

    let mut task = collection("/proj/run1");
    let ids = c.create_collection_task(&mut task, &tree()).await.unwrap();
    assert_eq!(ids.len(), 3);

    let children = c.db().list_download_tasks_by_collection(&task.id).await.unwrap();
    assert_eq!(children.len(), 3);
    for child in &children {
        assert_eq!(child.status, DownloadStatus::Received);
        assert_eq!(child.collection_task_id.as_deref(), Some(task.id.as_str()));
        assert_eq!(child.priority, Some(5));
    }
    let nested = children.iter().find(|t| t.path.ends_with("c.dat")).unwrap();
    assert_eq!(
        nested.destination.as_ref().unwrap().location().file_id,
        "/dest/sub/c.dat"
    );

    let parent = c.db().get_collection_task(&task.id).await.unwrap().unwrap();
    assert_eq!(parent.status, CollectionStatus::Active);
    assert!(!parent.in_process);
    assert_eq!(parent.items.len(), 3);
    assert_eq!(parent.data_object_paths.len(), 3);
}

#[tokio::test]
async fn repeated_fan_out_does_not_duplicate_children() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/run1");
    let first = c.create_collection_task(&mut task, &tree()).await.unwrap();
    let second = c.fan_out(&mut task, &tree()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(c.db().count_download_tasks_by_collection(&task.id).await.unwrap(), 3);
}

#[tokio::test]
async fn fan_out_skips_children_that_already_finished() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/run1");
    c.submit_collection(&mut task).await.unwrap();
    c.fan_out(&mut task, &tree()).await.unwrap();
    finish_children(&c, &task.id, &[]).await;

    // A crash before the parent was saved as ACTIVE leaves it RECEIVED.
    task.status = CollectionStatus::Received;
    c.db().upsert_collection_task(&mut task).await.unwrap();
    let ids = c.fan_out(&mut task, &tree()).await.unwrap();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], child_task_id(&task.id, "/proj/run1/a.dat"));
    assert_eq!(c.db().count_download_tasks_by_collection(&task.id).await.unwrap(), 0);
}

#[tokio::test]
async fn resolves_with_partial_failures() {
    let (c, recorder) = coordinator().await;
    let mut task = collection("/proj/run1");
    task.completion_event = true;
    c.create_collection_task(&mut task, &tree()).await.unwrap();

    assert!(c.try_resolve_collection(&task.id).await.unwrap().is_none());

    finish_children(&c, &task.id, &[("/proj/run1/b.dat", DownloadResultKind::Failed)]).await;
    let outcome = c.try_resolve_collection(&task.id).await.unwrap().unwrap();
    assert_eq!(outcome.result.result, DownloadResultKind::CompletedWithFailures);
    assert_eq!(outcome.result.message.as_deref(), Some("completed with 1 failure"));
    assert_eq!(outcome.counts.get(DownloadResultKind::Failed), 1);
    assert_eq!(outcome.counts.get(DownloadResultKind::Completed), 2);
    assert_eq!(outcome.failures(), 1);

    assert!(c.db().get_collection_task(&task.id).await.unwrap().is_none());
    let stored = c.db().get_download_result(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.items.len(), 3);
    let failed = stored
        .items
        .iter()
        .find(|i| i.path.as_deref() == Some("/proj/run1/b.dat"))
        .unwrap();
    assert_eq!(failed.result, Some(DownloadResultKind::Failed));
    assert_eq!(recorder.0.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn all_or_nothing_fails_the_parent() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/run1");
    task.all_or_nothing = true;
    c.create_collection_task(&mut task, &tree()).await.unwrap();
    finish_children(&c, &task.id, &[("/proj/run1/a.dat", DownloadResultKind::Failed)]).await;

    let outcome = c.try_resolve_collection(&task.id).await.unwrap().unwrap();
    assert_eq!(outcome.result.result, DownloadResultKind::Failed);
}

#[tokio::test]
async fn missing_result_keeps_parent_open() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/run1");
    c.create_collection_task(&mut task, &tree()).await.unwrap();
    finish_children(&c, &task.id, &[]).await;

    let children = c.db().list_download_results_by_collection(&task.id).await.unwrap();
    c.db().delete_download_result(&children[0].id).await.unwrap();

    assert!(c.try_resolve_collection(&task.id).await.unwrap().is_none());
    let parent = c.db().get_collection_task(&task.id).await.unwrap().unwrap();
    assert_eq!(parent.status, CollectionStatus::Active);
    assert!(!parent.in_process);
}

#[tokio::test]
async fn follows_retry_pointers() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/run2");
    c.create_collection_task(&mut task, &tree()).await.unwrap();
    let child = c.db().list_download_tasks_by_collection(&task.id).await.unwrap().remove(0);

    let mut first = DownloadTaskResult::for_task(&child, DownloadResultKind::Failed, None, now_millis());
    first.retry_task_id = Some(format!("{}-retry", child.id));
    c.db().upsert_download_result(&first).await.unwrap();
    c.db().delete_download_task(&child.id).await.unwrap();

    // The retry attempt has not reported yet.
    assert!(c.try_resolve_collection(&task.id).await.unwrap().is_none());

    let mut retry = child.clone();
    retry.id = format!("{}-retry", child.id);
    retry.first_hop_retried = true;
    let second = DownloadTaskResult::for_task(&retry, DownloadResultKind::Completed, None, now_millis());
    c.db().upsert_download_result(&second).await.unwrap();

    let outcome = c.try_resolve_collection(&task.id).await.unwrap().unwrap();
    assert_eq!(outcome.result.result, DownloadResultKind::Completed);
    assert_eq!(outcome.counts.total(), 1);
}

#[tokio::test]
async fn cancellation_drains_queued_children() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/run1");
    c.create_collection_task(&mut task, &tree()).await.unwrap();

    // One child is already being transferred elsewhere.
    let children = c.db().list_download_tasks_by_collection(&task.id).await.unwrap();
    let running = &children[0];
    assert!(c
        .db()
        .try_claim(TaskFamily::DataObjectDownload, &running.id, "node-b")
        .await
        .unwrap());
    c.db()
        .update_download_status(&running.id, DownloadStatus::Received, DownloadStatus::InProgress)
        .await
        .unwrap();

    assert!(c.request_cancellation(&task.id).await.unwrap());
    assert!(c.db().collection_cancellation_requested(&task.id).await.unwrap());

    let left = c.db().list_download_tasks_by_collection(&task.id).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].status, DownloadStatus::InProgress);
    let parent = c.db().get_collection_task(&task.id).await.unwrap().unwrap();
    assert_eq!(parent.status, CollectionStatus::Canceling);

    finish_children(&c, &task.id, &[]).await;
    let outcome = c.try_resolve_collection(&task.id).await.unwrap().unwrap();
    assert_eq!(outcome.result.result, DownloadResultKind::Canceled);
    assert_eq!(outcome.counts.get(DownloadResultKind::Canceled), 2);
}

/// Resolver that cancels the collection (and records some transferred bytes)
/// while its paths are being listed.
struct CancelingTree {
    inner: Tree,
    canceler: Coordinator,
    collection_id: String,
}

#[async_trait]
impl PathResolver for CancelingTree {
    async fn data_object_paths(&self, collection_path: &str) -> Result<Vec<String>, CollaboratorError> {
        assert!(self.canceler.request_cancellation(&self.collection_id).await?);
        self.canceler
            .db()
            .add_collection_bytes_transferred(&self.collection_id, 42)
            .await?;
        self.inner.data_object_paths(collection_path).await
    }
}

#[tokio::test]
async fn cancellation_during_fan_out_is_kept() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/run1");
    task.id = "bulk-1".to_string();
    let resolver = CancelingTree {
        inner: tree(),
        canceler: Coordinator::new(c.db().clone(), "node-b", Arc::new(Recorder::default())),
        collection_id: task.id.clone(),
    };

    let ids = c.create_collection_task(&mut task, &resolver).await.unwrap();
    assert_eq!(ids.len(), 3);

    let parent = c.db().get_collection_task(&task.id).await.unwrap().unwrap();
    assert_eq!(parent.status, CollectionStatus::Canceling);
    assert!(parent.cancellation_requested);
    assert_eq!(parent.total_bytes_transferred, 42);
    assert_eq!(parent.items.len(), 3);
    assert!(c
        .db()
        .list_download_tasks_by_collection(&task.id)
        .await
        .unwrap()
        .is_empty());

    let outcome = c.try_resolve_collection(&task.id).await.unwrap().unwrap();
    assert_eq!(outcome.result.result, DownloadResultKind::Canceled);
    assert_eq!(outcome.counts.get(DownloadResultKind::Canceled), 3);
}

#[tokio::test]
async fn resolution_attempt_refreshes_parent_heartbeat() {
    let (c, _) = coordinator().await;
    let mut task = collection("/proj/run1");
    c.create_collection_task(&mut task, &tree()).await.unwrap();
    c.db()
        .mark_processed(TaskFamily::CollectionDownload, &task.id, 1)
        .await
        .unwrap();

    let before = now_millis();
    assert!(c.try_resolve_collection(&task.id).await.unwrap().is_none());
    let parent = c.db().get_collection_task(&task.id).await.unwrap().unwrap();
    assert!(parent.processed.unwrap() >= before);

    let mut bulk = DataMigrationTask::new("alice", "", "cfg-1", "arch-a", "arch-b", TaskType::DataObjectList);
    bulk.data_object_paths = vec!["/proj/a.dat".into()];
    c.fan_out_migration(&mut bulk, &tree()).await.unwrap();
    c.db()
        .mark_processed(TaskFamily::DataMigration, &bulk.id, 1)
        .await
        .unwrap();
    assert!(c.complete_bulk_migration(&bulk.id).await.unwrap().is_none());
    let bulk = c.db().get_migration_task(&bulk.id).await.unwrap().unwrap();
    assert!(bulk.processed.unwrap() >= before);
    assert!(!bulk.in_process);
}

#[tokio::test]
async fn canceling_unknown_collection() {
    let (c, _) = coordinator().await;
    assert!(!c.request_cancellation("nope").await.unwrap());
}

#[tokio::test]
async fn bulk_migration_lifecycle() {
    let (c, _) = coordinator().await;
    let mut parent = DataMigrationTask::new("alice", "", "cfg-1", "arch-a", "arch-b", TaskType::DataObjectList);
    parent.data_object_paths = vec!["/proj/a.dat".into(), "/proj/b.dat".into()];
    let ids = c.fan_out_migration(&mut parent, &tree()).await.unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(parent.status, MigrationStatus::InProgress);

    assert!(c.complete_bulk_migration(&parent.id).await.unwrap().is_none());

    let children = c.db().list_migration_children(&parent.id).await.unwrap();
    for (child, kind) in children.iter().zip([MigrationResultKind::Completed, MigrationResultKind::Ignored]) {
        let r = DataMigrationTaskResult::for_task(child, kind, None, now_millis());
        c.db().upsert_migration_result(&r).await.unwrap();
        c.db().delete_migration_task(&child.id).await.unwrap();
    }

    let result = c.complete_bulk_migration(&parent.id).await.unwrap().unwrap();
    assert_eq!(result.result, MigrationResultKind::CompletedIgnoredItems);
    assert!(c.db().get_migration_task(&parent.id).await.unwrap().is_none());
    assert!(c.db().get_migration_result(&parent.id).await.unwrap().is_some());
}
