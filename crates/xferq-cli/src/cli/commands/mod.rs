//! CLI command handlers, one file per command.

mod cancel;
mod counts;
mod maintenance;
mod priority;
mod recover;
mod status;

pub use cancel::run_cancel;
pub use counts::run_counts;
pub use maintenance::{run_expire_claims, run_purge_tokens};
pub use priority::run_priority;
pub use recover::run_recover;
pub use status::run_status;
