pub mod config;
pub mod logging;

pub mod destination;
pub mod error;
pub mod fanout;
pub mod recovery;
pub mod retry;
pub mod state;
pub mod task_db;
pub mod vault;
pub mod worker;
