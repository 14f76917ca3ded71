//! `xferqctl recover` – startup recovery sweep, run by hand.

use anyhow::Result;
use xferq_core::config::XferqConfig;
use xferq_core::task_db::TaskDb;

pub async fn run_recover(db: &TaskDb, cfg: &XferqConfig, extra_owners: &[String]) -> Result<()> {
    let mut owners = cfg.recovery_owners();
    for id in extra_owners {
        if !owners.contains(id) {
            owners.push(id.clone());
        }
    }

    let report = db.recover_claims(&owners).await?;
    println!(
        "Released {} claim(s): {} download(s), {} collection(s), {} migration(s); {} migration(s) requeued",
        report.total(),
        report.data_object_downloads,
        report.collection_downloads,
        report.data_migrations,
        report.migrations_requeued
    );
    Ok(())
}
