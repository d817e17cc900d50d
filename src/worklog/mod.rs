//! Durable persistence of completed time entries.
//!
//! The layout on disk is one append-only CSV per day:
//! `{log_directory}/{YYYY}/{MM}/{YYYY-MM-DD}-worklog.csv`. Files are never
//! rewritten or compacted here; [retention] deletes whole files once they
//! age out.

pub mod retention;
pub mod writer;
