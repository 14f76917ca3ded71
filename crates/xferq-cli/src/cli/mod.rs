use anyhow::Result;
use clap::{Parser, Subcommand};
use xferq_core::config;
use xferq_core::task_db::TaskDb;

mod commands;

use commands::{
    run_cancel, run_counts, run_expire_claims, run_priority, run_purge_tokens, run_recover,
    run_status,
};

/// Operator tooling for the xferq task queue.
#[derive(Debug, Parser)]
#[command(name = "xferqctl")]
#[command(about = "xferq: inspect and maintain the transfer task queue", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Release claims held by this instance and by configured dead instances.
    Recover {
        /// Additional owner ids to treat as dead for this run.
        #[arg(long = "owner", value_name = "OWNER_ID")]
        owners: Vec<String>,
    },

    /// Show queued tasks per family and status.
    Status {
        /// List every task instead of per-status totals.
        #[arg(long, short)]
        verbose: bool,
    },

    /// Request cancellation of a collection download.
    Cancel {
        /// Collection download task id.
        id: String,
    },

    /// Show child result counts of a bulk download or bulk migration.
    Counts {
        /// Parent task id.
        id: String,

        /// Count bulk migration children instead of collection downloads.
        #[arg(long)]
        migration: bool,
    },

    /// Change the priority of a queued download or collection (lower runs first).
    Priority {
        /// Task id.
        id: String,

        #[arg(allow_negative_numbers = true)]
        priority: i64,
    },

    /// Release claims whose heartbeat is older than the staleness window.
    ExpireClaims {
        /// Override `[worker].claim_staleness_secs`.
        #[arg(long, value_name = "SECS")]
        older_than_secs: Option<u64>,
    },

    /// Drop stored cloud access tokens from old results.
    PurgeTokens {
        /// Override `[worker].token_retention_days`.
        #[arg(long, value_name = "DAYS")]
        days: Option<u64>,
    },
}

impl CliCommand {
    /// Parse args, load config, open the task database and dispatch.
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!(owner_id = %cfg.owner_id, "loaded config");

        let db = TaskDb::open_configured(&cfg).await?;

        let outcome = match cli.command {
            CliCommand::Recover { owners } => run_recover(&db, &cfg, &owners).await,
            CliCommand::Status { verbose } => run_status(&db, verbose).await,
            CliCommand::Cancel { id } => run_cancel(&db, &cfg, &id).await,
            CliCommand::Counts { id, migration } => run_counts(&db, &id, migration).await,
            CliCommand::Priority { id, priority } => run_priority(&db, &id, priority).await,
            CliCommand::ExpireClaims { older_than_secs } => {
                let secs = older_than_secs.unwrap_or(cfg.worker.claim_staleness_secs);
                run_expire_claims(&db, secs).await
            }
            CliCommand::PurgeTokens { days } => {
                let days = days.unwrap_or(cfg.worker.token_retention_days);
                run_purge_tokens(&db, days).await
            }
        };

        db.close().await;
        outcome
    }
}

#[cfg(test)]
mod tests;
