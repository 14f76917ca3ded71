//! Destination model: where a download or migration delivers its bytes.
//!
//! Each task carries exactly one [`Destination`] variant. Credentials are
//! sealed by the [`CredentialVault`] in [`StoredDestination::seal`] before any
//! column is written and opened again on read.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use crate::error::{StoreError, StoreResult};
use crate::vault::CredentialVault;

/// Container + file id pair identifying a target (endpoint/bucket/drive folder and path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub container_id: String,
    pub file_id: String,
}

impl FileLocation {
    pub fn new(container_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            file_id: file_id.into(),
        }
    }

    /// Location of `relative` underneath this one.
    pub fn join(&self, relative: &str) -> Self {
        let base = self.file_id.trim_end_matches('/');
        let rel = relative.trim_start_matches('/');
        Self {
            container_id: self.container_id.clone(),
            file_id: format!("{}/{}", base, rel),
        }
    }
}

/// Object-storage account; `access_key` and `secret_key` are plaintext in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectStorageAccount {
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub path_style: bool,
}

impl fmt::Debug for ObjectStorageAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorageAccount")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("path_style", &self.path_style)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    GridEndpoint {
        location: FileLocation,
    },
    ObjectStorage {
        location: FileLocation,
        account: ObjectStorageAccount,
    },
    CloudDrive {
        location: FileLocation,
        access_token: String,
    },
    CloudBucket {
        location: FileLocation,
        access_token: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationType {
    GridEndpoint,
    ObjectStorage,
    CloudDrive,
    CloudBucket,
}

impl DestinationType {
    pub const ALL: [DestinationType; 4] = [
        DestinationType::GridEndpoint,
        DestinationType::ObjectStorage,
        DestinationType::CloudDrive,
        DestinationType::CloudBucket,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DestinationType::GridEndpoint => "GRID_ENDPOINT",
            DestinationType::ObjectStorage => "OBJECT_STORAGE",
            DestinationType::CloudDrive => "CLOUD_DRIVE",
            DestinationType::CloudBucket => "CLOUD_BUCKET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GRID_ENDPOINT" => Some(DestinationType::GridEndpoint),
            "OBJECT_STORAGE" => Some(DestinationType::ObjectStorage),
            "CLOUD_DRIVE" => Some(DestinationType::CloudDrive),
            "CLOUD_BUCKET" => Some(DestinationType::CloudBucket),
            _ => None,
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Destination {
    pub fn destination_type(&self) -> DestinationType {
        match self {
            Destination::GridEndpoint { .. } => DestinationType::GridEndpoint,
            Destination::ObjectStorage { .. } => DestinationType::ObjectStorage,
            Destination::CloudDrive { .. } => DestinationType::CloudDrive,
            Destination::CloudBucket { .. } => DestinationType::CloudBucket,
        }
    }

    pub fn location(&self) -> &FileLocation {
        match self {
            Destination::GridEndpoint { location }
            | Destination::ObjectStorage { location, .. }
            | Destination::CloudDrive { location, .. }
            | Destination::CloudBucket { location, .. } => location,
        }
    }

    /// Same destination and credentials, different location.
    pub fn with_location(&self, location: FileLocation) -> Self {
        match self {
            Destination::GridEndpoint { .. } => Destination::GridEndpoint { location },
            Destination::ObjectStorage { account, .. } => Destination::ObjectStorage {
                location,
                account: account.clone(),
            },
            Destination::CloudDrive { access_token, .. } => Destination::CloudDrive {
                location,
                access_token: access_token.clone(),
            },
            Destination::CloudBucket { access_token, .. } => Destination::CloudBucket {
                location,
                access_token: access_token.clone(),
            },
        }
    }
}

/// A destination as it sits in the database: credentials sealed, type explicit
/// (or absent for rows written before the type column existed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StoredDestination {
    pub destination_type: Option<String>,
    pub container_id: Option<String>,
    pub file_id: Option<String>,
    pub access_key: Option<Vec<u8>>,
    pub secret_key: Option<Vec<u8>>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub path_style: Option<bool>,
    pub access_token: Option<Vec<u8>>,
}

impl StoredDestination {
    /// Validate and encrypt a destination for writing.
    pub fn seal(dest: Option<&Destination>, vault: &CredentialVault) -> StoreResult<Self> {
        let Some(dest) = dest else {
            return Err(StoreError::InvalidDestination(
                "task has no destination".to_string(),
            ));
        };
        let location = dest.location();
        if location.container_id.trim().is_empty() || location.file_id.trim().is_empty() {
            return Err(StoreError::InvalidDestination(format!(
                "{} destination has an empty location",
                dest.destination_type()
            )));
        }

        let mut stored = StoredDestination {
            destination_type: Some(dest.destination_type().as_str().to_string()),
            container_id: Some(location.container_id.clone()),
            file_id: Some(location.file_id.clone()),
            ..Default::default()
        };
        match dest {
            Destination::GridEndpoint { .. } => {}
            Destination::ObjectStorage { account, .. } => {
                stored.access_key = Some(vault.encrypt(&account.access_key)?);
                stored.secret_key = Some(vault.encrypt(&account.secret_key)?);
                stored.region = account.region.clone();
                stored.endpoint_url = account.endpoint_url.clone();
                stored.path_style = Some(account.path_style);
            }
            Destination::CloudDrive { access_token, .. }
            | Destination::CloudBucket { access_token, .. } => {
                stored.access_token = Some(vault.encrypt(access_token)?);
            }
        }
        Ok(stored)
    }

    /// Decrypt and rebuild the destination. Decrypt failures yield empty
    /// credentials; a missing location is an invalid destination.
    pub fn open(self, vault: &CredentialVault) -> StoreResult<Destination> {
        let dest_type = match self.destination_type.as_deref() {
            Some(s) => DestinationType::parse(s).ok_or_else(|| StoreError::UnknownValue {
                column: "destination_type",
                value: s.to_string(),
            })?,
            None => self.infer_legacy_type()?,
        };
        let location = match (self.container_id, self.file_id) {
            (Some(container_id), Some(file_id)) => FileLocation {
                container_id,
                file_id,
            },
            _ => {
                return Err(StoreError::InvalidDestination(format!(
                    "{} destination has no stored location",
                    dest_type
                )))
            }
        };
        let open = |field: &str, bytes: Option<Vec<u8>>| match bytes {
            Some(b) => vault.decrypt_or_empty(field, &b),
            None => String::new(),
        };

        Ok(match dest_type {
            DestinationType::GridEndpoint => Destination::GridEndpoint { location },
            DestinationType::ObjectStorage => Destination::ObjectStorage {
                location,
                account: ObjectStorageAccount {
                    access_key: open("s3_access_key", self.access_key),
                    secret_key: open("s3_secret_key", self.secret_key),
                    region: self.region,
                    endpoint_url: self.endpoint_url,
                    path_style: self.path_style.unwrap_or(false),
                },
            },
            DestinationType::CloudDrive => Destination::CloudDrive {
                location,
                access_token: open("access_token", self.access_token),
            },
            DestinationType::CloudBucket => Destination::CloudBucket {
                location,
                access_token: open("access_token", self.access_token),
            },
        })
    }

    /// Rows written before `destination_type` existed: derive the variant from
    /// which credential columns are populated.
    fn infer_legacy_type(&self) -> StoreResult<DestinationType> {
        if self.access_key.is_some() || self.secret_key.is_some() {
            Ok(DestinationType::ObjectStorage)
        } else if self.access_token.is_some() {
            Ok(DestinationType::CloudDrive)
        } else if self.container_id.is_some() {
            Ok(DestinationType::GridEndpoint)
        } else {
            Err(StoreError::InvalidDestination(
                "row has no destination columns populated".to_string(),
            ))
        }
    }

    pub fn from_row(row: &SqliteRow) -> Self {
        StoredDestination {
            destination_type: row.get("destination_type"),
            container_id: row.get("dest_container_id"),
            file_id: row.get("dest_file_id"),
            access_key: row.get("s3_access_key"),
            secret_key: row.get("s3_secret_key"),
            region: row.get("s3_region"),
            endpoint_url: row.get("s3_endpoint_url"),
            path_style: row.get("s3_path_style"),
            access_token: row.get("access_token"),
        }
    }

    /// Bind the nine destination columns in table order: `destination_type`,
    /// `dest_container_id`, `dest_file_id`, `s3_access_key`, `s3_secret_key`,
    /// `s3_region`, `s3_endpoint_url`, `s3_path_style`, `access_token`.
    pub fn bind<'q>(
        self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.destination_type)
            .bind(self.container_id)
            .bind(self.file_id)
            .bind(self.access_key)
            .bind(self.secret_key)
            .bind(self.region)
            .bind(self.endpoint_url)
            .bind(self.path_style)
            .bind(self.access_token)
    }
}
