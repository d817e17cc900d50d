use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};

/// File name of the work log for a day: `YYYY-MM-DD-worklog.csv`.
pub fn worklog_file_name(date: NaiveDate) -> String {
    format!("{}-worklog.csv", date.format("%Y-%m-%d"))
}

/// Path of a day's work log relative to the log directory:
/// `{YYYY}/{MM}/{YYYY-MM-DD}-worklog.csv`.
pub fn worklog_relative_path(date: NaiveDate) -> PathBuf {
    PathBuf::from(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(worklog_file_name(date))
}

/// Parses the date back out of a work log file name. Returns [None] for
/// files that don't follow the naming scheme.
pub fn parse_worklog_file_name(name: &str) -> Option<NaiveDate> {
    let date_part = name.strip_suffix("-worklog.csv")?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
