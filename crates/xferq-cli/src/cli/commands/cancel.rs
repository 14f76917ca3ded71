//! `xferqctl cancel <id>` – cancel a collection download.

use std::sync::Arc;

use anyhow::{bail, Result};
use xferq_core::config::XferqConfig;
use xferq_core::fanout::Coordinator;
use xferq_core::task_db::TaskDb;
use xferq_core::worker::LogNotifier;

/// Queued children are canceled right away; running ones finish and the
/// worker that finishes the last one resolves the collection.
pub async fn run_cancel(db: &TaskDb, cfg: &XferqConfig, id: &str) -> Result<()> {
    let coordinator = Coordinator::new(db.clone(), cfg.owner_id.clone(), Arc::new(LogNotifier));
    if !coordinator.request_cancellation(id).await? {
        bail!("no collection download task with id {}", id);
    }

    match db.get_download_result(id).await? {
        Some(result) => println!("Collection {} resolved: {}", id, result.result),
        None => {
            let running = db.count_download_tasks_by_collection(id).await?;
            println!("Cancellation requested for {id}; {running} child task(s) still finishing");
        }
    }
    Ok(())
}
