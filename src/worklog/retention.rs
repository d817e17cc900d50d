use std::{io::ErrorKind, path::Path};

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::utils::time::parse_worklog_file_name;

/// Deletes per-day work logs strictly older than `retention_days` days.
/// Zero disables pruning. Only files following the work log naming scheme
/// are candidates; foreign files and directories are left alone. Returns
/// the number of files removed.
pub async fn prune_expired_logs(
    log_dir: &Path,
    retention_days: u32,
    today: NaiveDate,
) -> Result<usize> {
    if retention_days == 0 {
        return Ok(0);
    }
    let cutoff = today - Duration::days(i64::from(retention_days));

    let mut removed = 0usize;
    let mut years = match tokio::fs::read_dir(log_dir).await {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    while let Some(year) = years.next_entry().await? {
        if !year.file_type().await?.is_dir() {
            continue;
        }
        let mut months = tokio::fs::read_dir(year.path()).await?;
        while let Some(month) = months.next_entry().await? {
            if !month.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(month.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some(date) = parse_worklog_file_name(name) else {
                    continue;
                };
                if date < cutoff {
                    match tokio::fs::remove_file(file.path()).await {
                        Ok(_) => {
                            debug!("Removed expired work log {:?}", file.path());
                            removed += 1;
                        }
                        Err(e) => warn!("Failed to remove expired log {:?}: {e}", file.path()),
                    }
                }
            }
        }
    }
    Ok(removed)
}
