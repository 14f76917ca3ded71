//! `xferqctl counts <id>` – per-outcome tally of a parent's finished children.

use anyhow::Result;
use xferq_core::task_db::TaskDb;

pub async fn run_counts(db: &TaskDb, id: &str, migration: bool) -> Result<()> {
    let rows: Vec<(&'static str, i64)> = if migration {
        db.aggregate_migration_result_count(id)
            .await?
            .iter()
            .map(|(k, n)| (k.as_str(), n))
            .collect()
    } else {
        db.aggregate_download_result_count(id)
            .await?
            .iter()
            .map(|(k, n)| (k.as_str(), n))
            .collect()
    };

    if rows.is_empty() {
        println!("No finished children for {id}.");
        return Ok(());
    }
    let total: i64 = rows.iter().map(|(_, n)| n).sum();
    for (kind, n) in rows {
        println!("{:<26} {}", kind, n);
    }
    println!("{:<26} {}", "TOTAL", total);
    Ok(())
}
