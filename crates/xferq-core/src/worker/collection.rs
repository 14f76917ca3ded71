use tracing::{debug, warn};

use super::{Step, Worker, WorkerResult};
use crate::fanout::CollectionOutcome;
use crate::task_db::{now_millis, CollectionStatus, TaskFamily, TaskId};

impl Worker {
    /// Fan out the next received bulk download.
    pub async fn run_once_collection(&self) -> WorkerResult<Step<Vec<TaskId>>> {
        let Some(mut task) = self
            .db
            .next_ready_collection(CollectionStatus::Received, self.attempt_cutoff())
            .await?
        else {
            return Ok(Step::Idle);
        };
        if !self
            .db
            .try_claim(TaskFamily::CollectionDownload, &task.id, &self.owner_id)
            .await?
        {
            return Ok(Step::Contended);
        }
        self.db
            .mark_processed(TaskFamily::CollectionDownload, &task.id, now_millis())
            .await?;

        let fanned = self
            .coordinator
            .fan_out(&mut task, self.collaborators.resolver.as_ref())
            .await;
        self.db.release(TaskFamily::CollectionDownload, &task.id).await?;
        Ok(Step::Done(fanned?))
    }

    /// Resolve every fanned-out bulk download whose children are all done.
    /// Canceling parents first get their queued children drained.
    pub async fn resolve_collections(&self) -> WorkerResult<Vec<CollectionOutcome>> {
        let mut resolved = Vec::new();
        for status in [CollectionStatus::Canceling, CollectionStatus::Active] {
            for parent in self.db.list_collections_by_status(status, Some(false)).await? {
                if status == CollectionStatus::Canceling {
                    self.coordinator.drain_canceled_children(&parent.id).await?;
                }
                match self.coordinator.try_resolve_collection(&parent.id).await {
                    Ok(Some(outcome)) => resolved.push(outcome),
                    Ok(None) => debug!(task_id = %parent.id, "collection not ready to resolve"),
                    Err(e) => warn!(task_id = %parent.id, "resolving collection failed: {}", e),
                }
            }
        }
        Ok(resolved)
    }
}
