//! In-process stand-ins for the transfer, migration and metadata services.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use xferq_core::config::{WorkerConfig, XferqConfig};
use xferq_core::destination::{Destination, FileLocation};
use xferq_core::retry::ErrorKind;
use xferq_core::task_db::{
    DataMigrationTask, DataMigrationTaskResult, DataObjectDownloadTask, DownloadResultKind,
    DownloadTaskResult, TaskDb,
};
use xferq_core::vault::CredentialVault;
use xferq_core::worker::{
    CollaboratorError, Collaborators, MigrationError, MigrationExecutor, MigrationReport,
    Notifier, PathResolver, ProgressSink, Staging, TransferError, TransferExecutor,
    TransferReport, Worker,
};

pub async fn open_db(dir: &Path) -> TaskDb {
    let vault = CredentialVault::from_key_material("integration-test-key").unwrap();
    TaskDb::open_at(dir.join("tasks.db"), 4, Arc::new(vault)).await.unwrap()
}

pub fn grid(folder: &str) -> Destination {
    Destination::GridEndpoint {
        location: FileLocation::new("endpoint-1", folder),
    }
}

/// What the fake transfer does the next time it sees a path.
#[derive(Debug, Clone)]
pub enum Plan {
    Complete(i64),
    Fail(DownloadResultKind, ErrorKind),
    Restore,
}

#[derive(Default)]
pub struct FakeTransfer {
    plans: Mutex<HashMap<String, VecDeque<Plan>>>,
    transferred: Mutex<Vec<String>>,
}

impl FakeTransfer {
    pub fn plan(&self, path: &str, plan: Plan) {
        self.plans
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(plan);
    }

    fn peek_restore(&self, path: &str) -> bool {
        let mut plans = self.plans.lock().unwrap();
        match plans.get_mut(path) {
            Some(q) if matches!(q.front(), Some(Plan::Restore)) => {
                q.pop_front();
                true
            }
            _ => false,
        }
    }

    fn next(&self, path: &str) -> Option<Plan> {
        self.plans.lock().unwrap().get_mut(path).and_then(|q| q.pop_front())
    }

    pub fn transferred(&self) -> Vec<String> {
        self.transferred.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferExecutor for FakeTransfer {
    async fn stage(&self, task: &DataObjectDownloadTask) -> Result<Staging, TransferError> {
        if self.peek_restore(&task.path) {
            Ok(Staging::RestoreRequested)
        } else {
            Ok(Staging::Ready)
        }
    }

    async fn transfer(
        &self,
        task: &DataObjectDownloadTask,
        progress: &dyn ProgressSink,
    ) -> Result<TransferReport, TransferError> {
        self.transferred.lock().unwrap().push(task.path.clone());
        progress.progress(50, None).await;
        match self.next(&task.path) {
            Some(Plan::Fail(result, kind)) => {
                Err(TransferError::new(result, kind, format!("simulated failure for {}", task.path)))
            }
            Some(Plan::Complete(size)) => Ok(TransferReport {
                size: Some(size),
                effective_transfer_speed: Some(1_000),
            }),
            Some(Plan::Restore) | None => Ok(TransferReport {
                size: Some(100),
                effective_transfer_speed: Some(1_000),
            }),
        }
    }
}

#[derive(Default)]
pub struct FakeMigration {
    pub migrated: Mutex<Vec<String>>,
}

#[async_trait]
impl MigrationExecutor for FakeMigration {
    async fn migrate(&self, task: &DataMigrationTask) -> Result<MigrationReport, MigrationError> {
        self.migrated.lock().unwrap().push(task.path.clone());
        Ok(MigrationReport {
            from_location: Some(FileLocation::new(task.from_archive_configuration_id.clone(), task.path.clone())),
            to_location: Some(FileLocation::new(task.to_archive_configuration_id.clone(), task.path.clone())),
            size: Some(10),
        })
    }
}

pub struct Tree(pub HashMap<String, Vec<String>>);

impl Tree {
    pub fn with(collection: &str, files: &[&str]) -> Self {
        let mut m = HashMap::new();
        m.insert(
            collection.to_string(),
            files.iter().map(|f| format!("{}/{}", collection, f)).collect(),
        );
        Tree(m)
    }
}

#[async_trait]
impl PathResolver for Tree {
    async fn data_object_paths(&self, collection_path: &str) -> Result<Vec<String>, CollaboratorError> {
        self.0
            .get(collection_path)
            .cloned()
            .ok_or_else(|| format!("no collection at {}", collection_path).into())
    }
}

#[derive(Default)]
pub struct Recorder {
    pub downloads: Mutex<Vec<DownloadTaskResult>>,
    pub migrations: Mutex<Vec<DataMigrationTaskResult>>,
}

#[async_trait]
impl Notifier for Recorder {
    async fn download_completed(&self, result: &DownloadTaskResult) {
        self.downloads.lock().unwrap().push(result.clone());
    }

    async fn migration_completed(&self, result: &DataMigrationTaskResult) {
        self.migrations.lock().unwrap().push(result.clone());
    }
}

pub struct Harness {
    pub worker: Worker,
    pub transfers: Arc<FakeTransfer>,
    pub migrations: Arc<FakeMigration>,
    pub notifier: Arc<Recorder>,
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 10,
        claim_staleness_secs: 60,
        max_concurrent_tasks: 4,
        destination_filter: None,
        token_retention_days: 30,
    }
}

pub fn harness(db: TaskDb, resolver: Tree, config: WorkerConfig) -> Harness {
    build(resolver, |collaborators| Worker::new(db, "node-a", config, collaborators))
}

/// Worker built the way a deployment builds it, from a full config.
pub fn configured_harness(db: TaskDb, resolver: Tree, cfg: &XferqConfig) -> Harness {
    build(resolver, |collaborators| Worker::from_config(db, cfg, collaborators))
}

fn build(resolver: Tree, make: impl FnOnce(Collaborators) -> Worker) -> Harness {
    let transfers = Arc::new(FakeTransfer::default());
    let migrations = Arc::new(FakeMigration::default());
    let notifier = Arc::new(Recorder::default());
    let collaborators = Collaborators {
        transfers: transfers.clone(),
        migrations: migrations.clone(),
        resolver: Arc::new(resolver),
        notifier: notifier.clone(),
    };
    Harness {
        worker: make(collaborators),
        transfers,
        migrations,
        notifier,
    }
}
