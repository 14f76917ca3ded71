//! `xferqctl priority <id> <n>` – reorder the queue.

use anyhow::{bail, Result};
use xferq_core::task_db::TaskDb;

/// A collection id also moves its queued children; otherwise the id is
/// taken to be a single download.
pub async fn run_priority(db: &TaskDb, id: &str, priority: i64) -> Result<()> {
    if db.set_collection_priority(id, priority).await? {
        println!("Collection {id} and its children set to priority {priority}");
    } else if db.set_download_task_priority(id, priority).await? {
        println!("Download {id} set to priority {priority}");
    } else {
        bail!("no queued download or collection with id {}", id);
    }
    Ok(())
}
