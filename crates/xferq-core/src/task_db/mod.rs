//! Persistent task database (SQLite via sqlx).
//!
//! Three active-task tables (data-object downloads, collection downloads,
//! migrations) and two result tables. Active rows are deleted once a result
//! supersedes them.

pub mod types;
pub mod db;

mod claim;
mod collection;
mod download;
mod items;
mod migration;
mod results;


pub use types::*;
pub use db::*;
