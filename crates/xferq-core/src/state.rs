//! Legal status transitions per task family.
//!
//! The schema stores statuses as plain text, so every status write goes
//! through [`check_transition`] first. Staying in the same status is always
//! allowed; leaving a terminal status never is.

use crate::error::{StoreError, StoreResult};
use crate::task_db::{CollectionStatus, DownloadStatus, MigrationStatus};

pub trait TaskStatus: Copy + Eq + std::fmt::Debug {
    const FAMILY: &'static str;

    fn as_str(self) -> &'static str;

    fn is_terminal(self) -> bool;

    /// Whether `self -> next` is a legal move (`self != next`).
    fn allows(self, next: Self) -> bool;
}

pub fn check_transition<S: TaskStatus>(from: S, to: S) -> StoreResult<()> {
    if from == to || (!from.is_terminal() && from.allows(to)) {
        return Ok(());
    }
    Err(StoreError::InvalidTransition {
        family: S::FAMILY,
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
    })
}

impl TaskStatus for DownloadStatus {
    const FAMILY: &'static str = "data-object download";

    fn as_str(self) -> &'static str {
        DownloadStatus::as_str(self)
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Canceled
        )
    }

    fn allows(self, next: Self) -> bool {
        use DownloadStatus::*;
        match self {
            Received => matches!(next, RestoreRequested | InProgress | Failed | Canceled),
            RestoreRequested => matches!(next, Received | InProgress | Failed | Canceled),
            // Back to Received when a stale claim is expired.
            InProgress => matches!(next, Received | Completed | Failed | Canceled),
            Completed | Failed | Canceled => false,
        }
    }
}

impl TaskStatus for CollectionStatus {
    const FAMILY: &'static str = "collection download";

    fn as_str(self) -> &'static str {
        CollectionStatus::as_str(self)
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            CollectionStatus::Canceled | CollectionStatus::Completed | CollectionStatus::Failed
        )
    }

    fn allows(self, next: Self) -> bool {
        use CollectionStatus::*;
        match self {
            Received => matches!(next, Active | Canceling | Canceled | Completed | Failed),
            Active => matches!(next, Canceling | Completed | Failed),
            Canceling => matches!(next, Canceled | Failed),
            Canceled | Completed | Failed => false,
        }
    }
}

impl TaskStatus for MigrationStatus {
    const FAMILY: &'static str = "data migration";

    fn as_str(self) -> &'static str {
        MigrationStatus::as_str(self)
    }

    fn is_terminal(self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Failed)
    }

    fn allows(self, next: Self) -> bool {
        use MigrationStatus::*;
        match self {
            Received => matches!(next, InProgress | Completed | Failed),
            InProgress => matches!(next, Received | Completed | Failed),
            Completed | Failed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn download_happy_path() {
        assert!(check_transition(DownloadStatus::Received, DownloadStatus::InProgress).is_ok());
        assert!(check_transition(DownloadStatus::InProgress, DownloadStatus::Completed).is_ok());
        assert!(
            check_transition(DownloadStatus::RestoreRequested, DownloadStatus::InProgress).is_ok()
        );
    }

    #[test]
    fn terminal_states_are_final() {
        for to in DownloadStatus::ALL {
            if *to == DownloadStatus::Completed {
                continue;
            }
            let err = check_transition(DownloadStatus::Completed, *to).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        }
        assert!(check_transition(MigrationStatus::Failed, MigrationStatus::Received).is_err());
        assert!(check_transition(CollectionStatus::Canceled, CollectionStatus::Active).is_err());
    }

    #[test]
    fn same_status_is_a_no_op() {
        assert!(check_transition(CollectionStatus::Completed, CollectionStatus::Completed).is_ok());
    }

    #[test]
    fn collection_cancel_goes_through_canceling() {
        assert!(check_transition(CollectionStatus::Active, CollectionStatus::Canceling).is_ok());
        assert!(check_transition(CollectionStatus::Active, CollectionStatus::Canceled).is_err());
        assert!(check_transition(CollectionStatus::Canceling, CollectionStatus::Canceled).is_ok());
    }

    #[test]
    fn error_message_names_family() {
        let err = check_transition(MigrationStatus::Completed, MigrationStatus::InProgress)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "illegal data migration status transition COMPLETED -> IN_PROGRESS"
        );
    }
}
