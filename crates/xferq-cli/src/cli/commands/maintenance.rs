//! `xferqctl expire-claims` and `xferqctl purge-tokens`.

use std::time::Duration;

use anyhow::Result;
use xferq_core::task_db::{now_millis, TaskDb, TaskFamily};

pub async fn run_expire_claims(db: &TaskDb, older_than_secs: u64) -> Result<()> {
    let cutoff = cutoff_millis(Duration::from_secs(older_than_secs));
    let mut released = 0;
    for family in TaskFamily::ALL {
        released += db.release_stale_claims(family, cutoff).await?;
    }
    println!("Released {released} claim(s) idle for more than {older_than_secs}s");
    Ok(())
}

pub async fn run_purge_tokens(db: &TaskDb, days: u64) -> Result<()> {
    let age = Duration::from_secs(days.saturating_mul(24 * 60 * 60));
    let purged = db.purge_result_access_tokens(cutoff_millis(age)).await?;
    println!("Purged access tokens from {purged} result(s) older than {days} day(s)");
    Ok(())
}

fn cutoff_millis(age: Duration) -> i64 {
    now_millis().saturating_sub(i64::try_from(age.as_millis()).unwrap_or(i64::MAX))
}
