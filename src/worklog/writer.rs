use std::{collections::BTreeMap, future::Future, path::Path};

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use fs4::tokio::AsyncFileExt;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, error, warn};

use crate::{config::Settings, engine::entry::TimeEntry, utils::time::worklog_relative_path};

pub const CSV_HEADER: &str = "Date,StartTime,EndTime,DurationSeconds,AppName,WindowTitle,ProjectTag";

/// Persistence contract for completed entry batches.
pub trait EntryLogWriter: Send + Sync + 'static {
    fn write_entries(
        &self,
        entries: &[TimeEntry],
        settings: &Settings,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// The main realization of [EntryLogWriter]: per-day CSV files under the
/// configured log directory.
#[derive(Clone, Default)]
pub struct CsvEntryLog;

impl EntryLogWriter for CsvEntryLog {
    /// Appends a batch, grouped by the calendar date of each entry's start
    /// time (a batch may span midnight). A failing date group is logged and
    /// skipped so the remaining groups still get written; the first error is
    /// re-raised at the end so the caller knows the batch only partially
    /// succeeded.
    async fn write_entries(&self, entries: &[TimeEntry], settings: &Settings) -> Result<()> {
        if entries.is_empty() {
            debug!("No entries to write");
            return Ok(());
        }

        let mut groups: BTreeMap<NaiveDate, Vec<&TimeEntry>> = BTreeMap::new();
        for entry in entries {
            groups
                .entry(entry.start_time.date_naive())
                .or_default()
                .push(entry);
        }

        let mut first_error = None;
        for (date, group) in groups {
            // Formatting is pure and completes before any I/O, so a failure
            // can never leave a partially formatted row in the file.
            let rows = match format_rows(&group) {
                Ok(v) => v,
                Err(e) => {
                    error!("Failed to format entries for {date}: {e:?}");
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            if rows.is_empty() {
                continue;
            }

            let path = settings.log_directory.join(worklog_relative_path(date));
            match append_rows(&path, &rows).await {
                Ok(_) => debug!("Wrote {} entries to {:?}", group.len(), path),
                Err(e) => {
                    error!("Failed to write work log {path:?}: {e:?}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Renders one CSV row per closed entry. Fields containing the delimiter,
/// quotes or line breaks are quote-wrapped with embedded quotes doubled.
/// Entries still missing an end time are skipped individually.
fn format_rows(entries: &[&TimeEntry]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for entry in entries {
        let Some(end_time) = entry.end_time else {
            warn!(
                "Skipping open entry for {} started at {}",
                entry.app_name, entry.start_time
            );
            continue;
        };
        let duration_seconds = (end_time - entry.start_time).num_seconds();
        writer.write_record([
            entry.start_time.format("%Y-%m-%d").to_string(),
            entry.start_time.format("%H:%M:%S").to_string(),
            end_time.format("%H:%M:%S").to_string(),
            duration_seconds.to_string(),
            entry.app_name.to_string(),
            entry.window_title.to_string(),
            entry.project_tag.as_deref().unwrap_or("").to_string(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush csv rows: {e}"))
}

async fn append_rows(path: &Path, rows: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = File::options().append(true).create(true).open(path).await?;

    // Semi-safe acquire-release for the file. The lock covers exactly one
    // append, so external readers are never blocked for long.
    file.lock_exclusive()?;
    let result = append_with_file(&mut file, rows).await;
    file.unlock_async().await?;
    result
}

async fn append_with_file(file: &mut File, rows: &[u8]) -> Result<()> {
    if file.metadata().await?.len() == 0 {
        file.write_all(CSV_HEADER.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    file.write_all(rows).await?;
    file.flush().await?;
    Ok(())
}
