//! Map store errors and transfer outcomes onto retry kinds.

use crate::error::{self, StoreError};
use crate::task_db::DownloadResultKind;

use super::policy::ErrorKind;

/// Storage failures are transient from the worker loop's point of view;
/// everything else (bad destination, illegal transition, encoding, vault)
/// will fail the same way again.
pub fn classify_store_error(e: &StoreError) -> ErrorKind {
    match e.kind() {
        error::ErrorKind::Storage => ErrorKind::Storage,
        error::ErrorKind::InvalidDestination
        | error::ErrorKind::InvalidTransition
        | error::ErrorKind::Encoding
        | error::ErrorKind::Vault => ErrorKind::Other,
    }
}

/// Permission and credential failures are never worth a second hop.
pub fn retryable_result(kind: DownloadResultKind) -> bool {
    !matches!(
        kind,
        DownloadResultKind::FailedPermissionDenied | DownloadResultKind::FailedCredentialsNeeded
    )
}
