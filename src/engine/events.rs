use chrono::Duration;

use super::entry::{TimeEntry, TimerState};

/// Notifications the engine pushes to whoever composed it. The engine knows
/// nothing about the subscribers beyond this channel.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Fired only on actual transitions.
    StateChanged(TimerState),
    /// Fired every second while running, carrying cumulative elapsed time.
    /// Reset additionally fires a zero tick so observers repaint.
    Tick(Duration),
    /// Fired after a flush persisted a batch of completed entries.
    EntriesLogged(Vec<TimeEntry>),
}
