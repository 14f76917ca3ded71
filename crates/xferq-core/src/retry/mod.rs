//! Retry and backoff policy.
//!
//! Shared by the worker loop (backing off after store failures) and by
//! download resolution (whether a failed transfer earns a retry task).

mod classify;
mod policy;

pub use classify::{classify_store_error, retryable_result};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
