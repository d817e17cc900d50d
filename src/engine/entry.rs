use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Timer lifecycle. Idle means never started or fully stopped (elapsed
/// reset); Paused keeps the elapsed time but stops accumulating. Transitions
/// happen only inside the engine, nothing mutates the state from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    Idle,
    Running,
    Paused,
}

/// A contiguous interval attributed to one foreground window. Open while
/// `end_time` is unset; owned by the session tracker until closed, then
/// handed off to persistence as part of an immutable batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub app_name: Arc<str>,
    pub window_title: Arc<str>,
    pub project_tag: Option<Arc<str>>,
}

impl TimeEntry {
    /// Derived span of the entry. Undefined (None) while the entry is open.
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}
