//! Startup recovery sweep.
//!
//! Clears claims left behind by this instance or by instances known to be
//! dead, so their tasks become selectable again. Execution is therefore
//! at-least-once: a task may be picked up again from a partially applied state.

use sqlx::{QueryBuilder, Sqlite};

use crate::error::{StorageContext, StoreResult};
use crate::task_db::{MigrationStatus, TaskDb, TaskFamily};

/// Claims released per table by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub data_object_downloads: u64,
    pub collection_downloads: u64,
    pub data_migrations: u64,
    /// Migrations moved back from `IN_PROGRESS` to `RECEIVED`.
    pub migrations_requeued: u64,
}

impl RecoveryReport {
    pub fn total(&self) -> u64 {
        self.data_object_downloads + self.collection_downloads + self.data_migrations
    }
}

impl TaskDb {
    /// Reset every claim held by one of `owner_ids`, plus any claim with no
    /// owner recorded. In-progress downloads and migrations of those owners are
    /// put back to `RECEIVED`, and the attempt back-off is cleared so the next
    /// poll can select them. Running it again changes nothing.
    pub async fn recover_claims(&self, owner_ids: &[String]) -> StoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for owner in owner_ids {
            report.migrations_requeued += self
                .set_migration_status(MigrationStatus::InProgress, owner, MigrationStatus::Received)
                .await?;
        }

        for family in TaskFamily::ALL {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ");
            qb.push(family.table());
            qb.push(
                " SET in_process = 0, owner_id = NULL, processed = NULL, \
                 status = CASE WHEN status = 'IN_PROGRESS' THEN 'RECEIVED' ELSE status END \
                 WHERE in_process = 1 AND (owner_id IS NULL",
            );
            if !owner_ids.is_empty() {
                qb.push(" OR owner_id IN (");
                let mut sep = qb.separated(", ");
                for owner in owner_ids {
                    sep.push_bind(owner.as_str());
                }
                sep.push_unseparated(")");
            }
            qb.push(")");

            let released = qb
                .build()
                .execute(&self.pool)
                .await
                .in_subsystem(family.subsystem())?
                .rows_affected();
            match family {
                TaskFamily::DataObjectDownload => report.data_object_downloads = released,
                TaskFamily::CollectionDownload => report.collection_downloads = released,
                TaskFamily::DataMigration => report.data_migrations = released,
            }
        }

        tracing::info!(
            owners = owner_ids.len(),
            downloads = report.data_object_downloads,
            collections = report.collection_downloads,
            migrations = report.data_migrations,
            requeued = report.migrations_requeued,
            "recovery sweep finished"
        );
        Ok(report)
    }
}
