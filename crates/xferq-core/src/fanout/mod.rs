//! Bulk requests: fan-out into child tasks and fan-in of their results.
//!
//! A bulk download owns one data-object child per resolved path. The parent
//! only resolves once no child task is left and every item's child (following
//! retry pointers) has a final result. Bulk migrations follow the same shape
//! with `parent_id` links.

mod collection;
mod migration;

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::StoreError;
use crate::task_db::{DownloadResultKind, ResultCounts, TaskDb, TaskType};
use crate::worker::{CollaboratorError, Notifier, PathResolver};

pub use collection::CollectionOutcome;

#[derive(Debug, Error)]
pub enum FanOutError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("resolving collection {path}: {source}")]
    Resolve {
        path: String,
        #[source]
        source: CollaboratorError,
    },
}

/// Drives fan-out, fan-in and cancellation under one claim owner.
#[derive(Clone)]
pub struct Coordinator {
    db: TaskDb,
    owner_id: String,
    notifier: Arc<dyn Notifier>,
}

impl Coordinator {
    pub fn new(db: TaskDb, owner_id: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            owner_id: owner_id.into(),
            notifier,
        }
    }

    pub fn db(&self) -> &TaskDb {
        &self.db
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

/// One data object a bulk request expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub path: String,
    /// Collection the object was found under, if it came from one.
    pub collection_path: Option<String>,
    /// Path below the request's destination folder.
    pub relative: String,
}

/// Expand a bulk request into data-object targets, in request order,
/// without duplicates.
pub(crate) async fn expand_targets(
    task_type: TaskType,
    path: &str,
    data_object_paths: &[String],
    collection_paths: &[String],
    resolver: &dyn PathResolver,
) -> Result<Vec<Target>, FanOutError> {
    let mut targets = Vec::new();
    match task_type {
        TaskType::DataObject => targets.push(object_target(path)),
        TaskType::DataObjectList => {
            targets.extend(data_object_paths.iter().map(|p| object_target(p)));
        }
        TaskType::Collection => {
            // Contents land directly under the destination folder.
            for p in resolve(resolver, path).await? {
                let relative = relative_to(&p, path);
                targets.push(Target {
                    path: p,
                    collection_path: Some(path.to_string()),
                    relative,
                });
            }
        }
        TaskType::CollectionList => {
            // Each collection keeps its own name under the destination.
            for c in collection_paths {
                let base = parent_of(c);
                for p in resolve(resolver, c).await? {
                    let relative = relative_to(&p, base);
                    targets.push(Target {
                        path: p,
                        collection_path: Some(c.clone()),
                        relative,
                    });
                }
            }
        }
    }

    let mut seen = HashSet::new();
    targets.retain(|t| seen.insert(t.path.clone()));
    Ok(targets)
}

async fn resolve(resolver: &dyn PathResolver, path: &str) -> Result<Vec<String>, FanOutError> {
    resolver
        .data_object_paths(path)
        .await
        .map_err(|source| FanOutError::Resolve {
            path: path.to_string(),
            source,
        })
}

fn object_target(path: &str) -> Target {
    Target {
        path: path.to_string(),
        collection_path: None,
        relative: file_name(path).to_string(),
    }
}

fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

fn parent_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[..i],
        None => "",
    }
}

fn relative_to(path: &str, base: &str) -> String {
    let base = base.trim_end_matches('/');
    match path.strip_prefix(base) {
        Some(rest) if base.is_empty() || rest.starts_with('/') => {
            rest.trim_start_matches('/').to_string()
        }
        _ => file_name(path).to_string(),
    }
}

/// Child ids are derived from the parent and the path, so a repeated
/// fan-out finds the children (or their results) it already created.
pub(crate) fn child_task_id(parent_id: &str, path: &str) -> String {
    let digest = hex::encode(Sha256::digest(path.as_bytes()));
    format!("{}-{}", parent_id, &digest[..16])
}

/// `"completed with 1 failure"`, `"completed with 3 failures"`.
pub(crate) fn failure_message(failures: usize) -> String {
    let noun = if failures == 1 { "failure" } else { "failures" };
    format!("completed with {} {}", failures, noun)
}

/// Number of non-successful outcomes in a fan-in count.
pub(crate) fn failure_count(counts: &ResultCounts<DownloadResultKind>) -> i64 {
    counts
        .iter()
        .filter(|(k, _)| !k.is_success())
        .map(|(_, n)| n)
        .sum()
}

#[cfg(test)]
mod tests;
