//! Typed errors for the task store and the credential vault.
//!
//! Callers branch on [`StoreError::kind`] rather than on message text. Claim
//! conflicts and missing rows are not errors (`Ok(false)` / `Ok(None)`).

use std::fmt;

use thiserror::Error;

/// Table family a storage error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    DataObjectDownload,
    CollectionDownload,
    DownloadResult,
    DataMigration,
    MigrationResult,
    Schema,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Subsystem::DataObjectDownload => "data-object download tasks",
            Subsystem::CollectionDownload => "collection download tasks",
            Subsystem::DownloadResult => "download results",
            Subsystem::DataMigration => "data migration tasks",
            Subsystem::MigrationResult => "data migration results",
            Subsystem::Schema => "schema",
        };
        f.write_str(s)
    }
}

/// Coarse error classification exposed to callers and to the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Storage,
    InvalidDestination,
    InvalidTransition,
    Encoding,
    Vault,
}

/// Failure inside the credential vault.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault key is not configured")]
    MissingKey,
    #[error("ciphertext is too short ({0} bytes)")]
    Truncated(usize),
    #[error("cipher operation failed")]
    Cipher,
    #[error("decrypted credential is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Error returned by every task store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure in {subsystem}: {source}")]
    Storage {
        subsystem: Subsystem,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("illegal {family} status transition {from} -> {to}")]
    InvalidTransition {
        family: &'static str,
        from: String,
        to: String,
    },

    #[error("blob encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("unrecognized {column} value {value:?}")]
    UnknownValue { column: &'static str, value: String },

    #[error("credential vault: {0}")]
    Vault(#[from] VaultError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Storage { .. } => ErrorKind::Storage,
            StoreError::InvalidDestination(_) => ErrorKind::InvalidDestination,
            StoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            StoreError::Encoding(_) | StoreError::UnknownValue { .. } => ErrorKind::Encoding,
            StoreError::Vault(_) => ErrorKind::Vault,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Attach the originating subsystem to a sqlx failure.
pub(crate) trait StorageContext<T> {
    fn in_subsystem(self, subsystem: Subsystem) -> StoreResult<T>;
}

impl<T> StorageContext<T> for Result<T, sqlx::Error> {
    fn in_subsystem(self, subsystem: Subsystem) -> StoreResult<T> {
        self.map_err(|source| StoreError::Storage { subsystem, source })
    }
}
