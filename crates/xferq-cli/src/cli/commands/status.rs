//! `xferqctl status` – what is queued, per family and status.

use anyhow::Result;
use xferq_core::task_db::{CollectionStatus, DownloadStatus, MigrationStatus, TaskDb};

pub async fn run_status(db: &TaskDb, verbose: bool) -> Result<()> {
    let mut empty = true;

    for &status in DownloadStatus::ALL {
        let tasks = db.list_download_tasks_by_status(status, None).await?;
        if tasks.is_empty() {
            continue;
        }
        empty = false;
        println!("downloads   {:<18} {}", status.as_str(), tasks.len());
        if verbose {
            for t in tasks {
                println!(
                    "  {:<40} {:<6} {:<4} {}",
                    t.id,
                    owner_label(t.in_process, t.owner_id.as_deref()),
                    t.priority.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                    t.path
                );
            }
        }
    }

    for &status in CollectionStatus::ALL {
        let tasks = db.list_collections_by_status(status, None).await?;
        if tasks.is_empty() {
            continue;
        }
        empty = false;
        println!("collections {:<18} {}", status.as_str(), tasks.len());
        if verbose {
            for t in tasks {
                println!(
                    "  {:<40} {:<6} {:>5} item(s) {}",
                    t.id,
                    owner_label(t.in_process, t.owner_id.as_deref()),
                    t.items.len(),
                    t.path
                );
            }
        }
    }

    for &status in MigrationStatus::ALL {
        let tasks = db.list_migrations(status, None).await?;
        if tasks.is_empty() {
            continue;
        }
        empty = false;
        println!("migrations  {:<18} {}", status.as_str(), tasks.len());
        if verbose {
            for t in tasks {
                println!(
                    "  {:<40} {:<6} {:<16} {} -> {} {}",
                    t.id,
                    owner_label(t.in_process, t.owner_id.as_deref()),
                    t.task_type.as_str(),
                    t.from_archive_configuration_id,
                    t.to_archive_configuration_id,
                    t.path
                );
            }
        }
    }

    if empty {
        println!("No tasks in database.");
    }
    Ok(())
}

fn owner_label<'a>(in_process: bool, owner: Option<&'a str>) -> &'a str {
    match (in_process, owner) {
        (true, Some(o)) => o,
        (true, None) => "?",
        (false, _) => "-",
    }
}
