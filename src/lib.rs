//! Work time tracker for people who want to know where their hours went.
//! Attributes running time to the foreground application/window, reminds
//! about breaks, and appends completed segments to daily CSV work logs.
//!

pub mod cli;
pub mod config;
pub mod engine;
pub mod notify;
pub mod probe;
pub mod utils;
pub mod worklog;
