//! Claim protocol: a compare-and-set on `in_process`, shared by every task table.
//!
//! No in-memory locks are involved; workers in different processes contend
//! only through these conditional updates, and losing a race is `Ok(false)`.

use super::db::TaskDb;
use super::types::TaskFamily;
use crate::error::{StorageContext, StoreResult};

impl TaskDb {
    /// Claim a task for `owner_id`. Succeeds only if nobody holds it; the flag
    /// and the owner are set in the same statement.
    pub async fn try_claim(&self, family: TaskFamily, id: &str, owner_id: &str) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE {} SET in_process = 1, owner_id = ?1 WHERE id = ?2 AND in_process != 1",
            family.table()
        );
        let r = sqlx::query(&sql)
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(family.subsystem())?;
        let claimed = r.rows_affected() > 0;
        if claimed {
            tracing::debug!(task_id = id, owner_id, "claimed {} task", family);
        }
        Ok(claimed)
    }

    /// Drop the claim without touching status.
    pub async fn release(&self, family: TaskFamily, id: &str) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE {} SET in_process = 0, owner_id = NULL WHERE id = ?1",
            family.table()
        );
        let r = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(family.subsystem())?;
        Ok(r.rows_affected() > 0)
    }

    /// Record an attempt so queue selection backs off from this task.
    pub async fn mark_processed(&self, family: TaskFamily, id: &str, timestamp: i64) -> StoreResult<bool> {
        let sql = format!("UPDATE {} SET processed = ?1 WHERE id = ?2", family.table());
        let r = sqlx::query(&sql)
            .bind(timestamp)
            .bind(id)
            .execute(&self.pool)
            .await
            .in_subsystem(family.subsystem())?;
        Ok(r.rows_affected() > 0)
    }

    /// Expire claims whose `processed` heartbeat is older than `older_than`.
    /// In-progress downloads and migrations go back to `RECEIVED` so they are
    /// selected again. Returns the number of claims released.
    pub async fn release_stale_claims(&self, family: TaskFamily, older_than: i64) -> StoreResult<u64> {
        let sql = format!(
            r#"
            UPDATE {}
            SET in_process = 0,
                owner_id = NULL,
                status = CASE WHEN status = 'IN_PROGRESS' THEN 'RECEIVED' ELSE status END
            WHERE in_process = 1 AND processed IS NOT NULL AND processed < ?1
            "#,
            family.table()
        );
        let r = sqlx::query(&sql)
            .bind(older_than)
            .execute(&self.pool)
            .await
            .in_subsystem(family.subsystem())?;
        if r.rows_affected() > 0 {
            tracing::info!("released {} stale {} claim(s)", r.rows_affected(), family);
        }
        Ok(r.rows_affected())
    }
}
