use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::{
    probe::{ActiveWindowProbe, ActiveWindowSample},
    utils::clock::Clock,
};

use super::entry::TimeEntry;

pub const UNKNOWN_APP: &str = "Unknown";
pub const NO_ACTIVE_WINDOW: &str = "No active window";

/// Segments shorter than this are dropped instead of logged. Total logged
/// time is therefore a lower bound on true running time.
const MIN_ENTRY_SECONDS: i64 = 1;

/// Turns raw foreground-window samples into discrete [TimeEntry] segments.
/// Holds the single open entry plus the closed entries awaiting flush.
pub struct SessionTracker {
    probe: Box<dyn ActiveWindowProbe>,
    clock: Box<dyn Clock>,
    completed: Vec<TimeEntry>,
    open_entry: Option<TimeEntry>,
    last_sample: Option<ActiveWindowSample>,
    project_tag: Option<Arc<str>>,
    tracking: bool,
}

impl SessionTracker {
    pub fn new(probe: Box<dyn ActiveWindowProbe>, clock: Box<dyn Clock>) -> Self {
        Self {
            probe,
            clock,
            completed: Vec::new(),
            open_entry: None,
            last_sample: None,
            project_tag: None,
            tracking: false,
        }
    }

    /// Begins a session and opens the first entry from an initial probe
    /// sample. Idempotent: a second call while already tracking is a no-op.
    pub async fn start(&mut self, project_tag: Option<Arc<str>>) {
        if self.tracking {
            debug!("Already tracking, ignoring start");
            return;
        }
        self.project_tag = project_tag;
        self.tracking = true;

        let sample = match self.probe.sample().await {
            Ok(v) => v,
            Err(e) => {
                // Open a fallback entry anyway; the session has begun.
                warn!("Failed to sample window at session start: {e:?}");
                None
            }
        };
        let now = self.clock.now();
        self.open_new_entry(sample, now);
    }

    /// Re-samples the probe and cuts a new segment when the window changed.
    /// Two absent samples compare as unchanged, so idle periods don't
    /// fragment into many zero-content entries.
    pub async fn on_tick(&mut self) {
        if !self.tracking {
            return;
        }

        let sample = match self.probe.sample().await {
            Ok(v) => v,
            Err(e) => {
                // No data this round; the open segment keeps its last known window.
                warn!("Failed to sample window: {e:?}");
                return;
            }
        };

        if sample == self.last_sample {
            return;
        }

        let now = self.clock.now();
        self.close_open_entry(now);
        self.open_new_entry(sample, now);
    }

    /// Applies the tag to the currently open entry and to entries opened
    /// from now on. Already-closed entries are never altered.
    pub fn update_project_tag(&mut self, project_tag: Option<Arc<str>>) {
        self.project_tag = project_tag.clone();
        if let Some(entry) = self.open_entry.as_mut() {
            entry.project_tag = project_tag;
        }
    }

    /// Ends the session: closes the open entry and hands over every
    /// completed segment, leaving the tracker inactive and empty. Safe to
    /// call when not tracking; that's a clean no-op returning nothing.
    pub fn collect_and_reset(&mut self) -> Vec<TimeEntry> {
        self.tracking = false;
        let now = self.clock.now();
        self.close_open_entry(now);
        self.last_sample = None;
        std::mem::take(&mut self.completed)
    }

    fn close_open_entry(&mut self, end_time: DateTime<Utc>) {
        let Some(mut entry) = self.open_entry.take() else {
            return;
        };
        entry.end_time = Some(end_time);
        match entry.duration() {
            Some(d) if d.num_seconds() >= MIN_ENTRY_SECONDS => self.completed.push(entry),
            _ => debug!("Discarding sub-second segment for {}", entry.app_name),
        }
    }

    fn open_new_entry(&mut self, sample: Option<ActiveWindowSample>, start_time: DateTime<Utc>) {
        let entry = match &sample {
            Some(s) => TimeEntry {
                start_time,
                end_time: None,
                app_name: s.process_name.clone(),
                window_title: s.window_title.clone(),
                project_tag: self.project_tag.clone(),
            },
            None => TimeEntry {
                start_time,
                end_time: None,
                app_name: UNKNOWN_APP.into(),
                window_title: NO_ACTIVE_WINDOW.into(),
                project_tag: self.project_tag.clone(),
            },
        };
        self.last_sample = sample;
        self.open_entry = Some(entry);
    }
}

/// Requests marshaled onto the tracker's own task. The timer drops `Sample`
/// requests instead of queueing them when the tracker lags behind, so a slow
/// probe never stalls the tick cadence.
#[derive(Debug)]
pub enum TrackerRequest {
    Start { project_tag: Option<Arc<str>> },
    Sample,
    SetProjectTag { project_tag: Option<Arc<str>> },
    Flush { reply: oneshot::Sender<Vec<TimeEntry>> },
}

/// Runs a [SessionTracker] on its own task, processing requests in order.
/// Request ordering is what guarantees a flush observes every sample sent
/// before it.
pub struct TrackingModule {
    requests: mpsc::Receiver<TrackerRequest>,
    tracker: SessionTracker,
}

impl TrackingModule {
    pub fn new(requests: mpsc::Receiver<TrackerRequest>, tracker: SessionTracker) -> Self {
        Self { requests, tracker }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(request) = self.requests.recv().await {
            match request {
                TrackerRequest::Start { project_tag } => self.tracker.start(project_tag).await,
                TrackerRequest::Sample => self.tracker.on_tick().await,
                TrackerRequest::SetProjectTag { project_tag } => {
                    self.tracker.update_project_tag(project_tag)
                }
                TrackerRequest::Flush { reply } => {
                    let entries = self.tracker.collect_and_reset();
                    if reply.send(entries).is_err() {
                        error!("Flush requester went away, dropping collected entries");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use anyhow::anyhow;
    use chrono::Duration;
    use tokio::time::advance;

    use crate::{
        probe::{ActiveWindowSample, MockActiveWindowProbe},
        utils::{
            logging::TEST_LOGGING,
            testing::{test_start, TestClock},
        },
    };

    use super::SessionTracker;

    fn sample(process: &str, title: &str) -> ActiveWindowSample {
        ActiveWindowSample {
            process_name: process.into(),
            window_title: title.into(),
        }
    }

    fn tracker_with(probe: MockActiveWindowProbe) -> SessionTracker {
        SessionTracker::new(Box::new(probe), Box::new(TestClock::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn window_change_cuts_ordered_segments() {
        *TEST_LOGGING;
        let mut probe = MockActiveWindowProbe::new();
        let mut calls = 0u32;
        probe.expect_sample().returning(move || {
            calls += 1;
            if calls <= 5 {
                Ok(Some(sample("A", "Title1")))
            } else {
                Ok(Some(sample("B", "Title2")))
            }
        });
        let mut tracker = tracker_with(probe);
        let t0 = test_start();

        tracker.start(None).await;
        for _ in 0..12 {
            advance(StdDuration::from_secs(1)).await;
            tracker.on_tick().await;
        }

        let entries = tracker.collect_and_reset();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].app_name.as_ref(), "A");
        assert_eq!(entries[0].start_time, t0);
        assert_eq!(entries[0].end_time, Some(t0 + Duration::seconds(5)));
        assert_eq!(entries[1].app_name.as_ref(), "B");
        assert_eq!(entries[1].start_time, t0 + Duration::seconds(5));
        assert_eq!(entries[1].end_time, Some(t0 + Duration::seconds(12)));
        assert!(entries[0].end_time.unwrap() <= entries[1].start_time);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_blip_is_discarded() {
        *TEST_LOGGING;
        let mut probe = MockActiveWindowProbe::new();
        let mut calls = 0u32;
        probe.expect_sample().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(Some(sample("A", "Title1")))
            } else {
                Ok(Some(sample("B", "Title2")))
            }
        });
        let mut tracker = tracker_with(probe);

        tracker.start(None).await;
        advance(StdDuration::from_millis(300)).await;
        tracker.on_tick().await;
        advance(StdDuration::from_secs(2)).await;
        tracker.on_tick().await;

        let entries = tracker.collect_and_reset();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].app_name.as_ref(), "B");
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_opens_a_single_entry() {
        *TEST_LOGGING;
        let mut probe = MockActiveWindowProbe::new();
        probe
            .expect_sample()
            .times(1)
            .returning(|| Ok(Some(sample("A", "Title1"))));
        let mut tracker = tracker_with(probe);

        tracker.start(None).await;
        tracker.start(None).await;
        advance(StdDuration::from_secs(2)).await;

        let entries = tracker.collect_and_reset();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn absence_periods_merge_into_one_segment() {
        *TEST_LOGGING;
        let mut probe = MockActiveWindowProbe::new();
        let mut calls = 0u32;
        probe.expect_sample().returning(move || {
            calls += 1;
            if calls <= 2 {
                Ok(None)
            } else {
                Ok(Some(sample("A", "Title1")))
            }
        });
        let mut tracker = tracker_with(probe);
        let t0 = test_start();

        tracker.start(None).await;
        advance(StdDuration::from_secs(2)).await;
        tracker.on_tick().await;
        advance(StdDuration::from_secs(2)).await;
        tracker.on_tick().await;
        advance(StdDuration::from_secs(1)).await;

        let entries = tracker.collect_and_reset();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].app_name.as_ref(), super::UNKNOWN_APP);
        assert_eq!(entries[0].window_title.as_ref(), super::NO_ACTIVE_WINDOW);
        assert_eq!(entries[0].end_time, Some(t0 + Duration::seconds(4)));
        assert_eq!(entries[1].app_name.as_ref(), "A");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_never_cut_the_segment() {
        *TEST_LOGGING;
        let mut probe = MockActiveWindowProbe::new();
        let mut calls = 0u32;
        probe.expect_sample().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(Some(sample("A", "Title1")))
            } else {
                Err(anyhow!("probe broke"))
            }
        });
        let mut tracker = tracker_with(probe);
        let t0 = test_start();

        tracker.start(None).await;
        for _ in 0..10 {
            advance(StdDuration::from_secs(1)).await;
            tracker.on_tick().await;
        }

        let entries = tracker.collect_and_reset();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].app_name.as_ref(), "A");
        assert_eq!(entries[0].end_time, Some(t0 + Duration::seconds(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn start_probe_failure_opens_fallback_entry() {
        *TEST_LOGGING;
        let mut probe = MockActiveWindowProbe::new();
        probe.expect_sample().returning(|| Err(anyhow!("probe broke")));
        let mut tracker = tracker_with(probe);

        tracker.start(None).await;
        advance(StdDuration::from_secs(3)).await;

        let entries = tracker.collect_and_reset();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].app_name.as_ref(), super::UNKNOWN_APP);
    }

    #[tokio::test(start_paused = true)]
    async fn project_tag_reaches_open_but_not_closed_entries() {
        *TEST_LOGGING;
        let mut probe = MockActiveWindowProbe::new();
        let mut calls = 0u32;
        probe.expect_sample().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(Some(sample("A", "Title1")))
            } else {
                Ok(Some(sample("B", "Title2")))
            }
        });
        let mut tracker = tracker_with(probe);

        tracker.start(None).await;
        advance(StdDuration::from_secs(2)).await;
        tracker.on_tick().await;
        tracker.update_project_tag(Some("acme".into()));
        advance(StdDuration::from_secs(2)).await;

        let entries = tracker.collect_and_reset();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].project_tag, None);
        assert_eq!(entries[1].project_tag.as_deref(), Some("acme"));
    }

    #[tokio::test(start_paused = true)]
    async fn collect_without_session_is_a_clean_noop() {
        *TEST_LOGGING;
        let probe = MockActiveWindowProbe::new();
        let mut tracker = tracker_with(probe);

        assert!(tracker.collect_and_reset().is_empty());
        assert!(tracker.collect_and_reset().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_tag_is_applied_to_entries() {
        *TEST_LOGGING;
        let mut probe = MockActiveWindowProbe::new();
        probe
            .expect_sample()
            .returning(|| Ok(Some(sample("A", "Title1"))));
        let mut tracker = tracker_with(probe);

        tracker.start(Some("client".into())).await;
        advance(StdDuration::from_secs(2)).await;

        let entries = tracker.collect_and_reset();
        assert_eq!(entries[0].project_tag.as_deref(), Some("client"));
    }
}
