use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{Settings, SettingsStore},
    utils::clock::Clock,
    worklog::{retention::prune_expired_logs, writer::EntryLogWriter},
};

use super::{
    break_reminder::BreakReminderScheduler,
    entry::TimerState,
    events::EngineEvent,
    session::TrackerRequest,
};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on the final flush when the engine is torn down while
/// running. Past it the open segment is abandoned instead of hanging
/// shutdown.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum TimerCommand {
    Start { project_tag: Option<Arc<str>> },
    Pause,
    Stop,
    Reset,
    SetProjectTag { project_tag: Option<Arc<str>> },
}

/// Cloneable handle marshaling commands onto the engine's task. Any thread
/// may hold one; the engine state itself is only ever touched by its own
/// event loop.
#[derive(Clone)]
pub struct TimerHandle {
    commands: mpsc::Sender<TimerCommand>,
}

impl TimerHandle {
    pub fn new(commands: mpsc::Sender<TimerCommand>) -> Self {
        Self { commands }
    }

    pub async fn start(&self, project_tag: Option<Arc<str>>) -> Result<()> {
        Ok(self.commands.send(TimerCommand::Start { project_tag }).await?)
    }

    pub async fn pause(&self) -> Result<()> {
        Ok(self.commands.send(TimerCommand::Pause).await?)
    }

    pub async fn stop(&self) -> Result<()> {
        Ok(self.commands.send(TimerCommand::Stop).await?)
    }

    pub async fn reset(&self) -> Result<()> {
        Ok(self.commands.send(TimerCommand::Reset).await?)
    }

    pub async fn set_project_tag(&self, project_tag: Option<Arc<str>>) -> Result<()> {
        Ok(self
            .commands
            .send(TimerCommand::SetProjectTag { project_tag })
            .await?)
    }
}

enum Wake {
    Command(TimerCommand),
    Tick,
    Shutdown,
    Closed,
}

/// The timer state machine. Owns elapsed-time bookkeeping and coordinates
/// session tracking, break reminders and persistence around its transitions.
///
/// Elapsed time is always recomputed as `accumulated + (now - started_at)`,
/// never incremented per tick, so late or missed ticks cannot make it drift.
pub struct TimerEngine<W> {
    commands: mpsc::Receiver<TimerCommand>,
    events: mpsc::Sender<EngineEvent>,
    tracker: mpsc::Sender<TrackerRequest>,
    reminders: BreakReminderScheduler,
    writer: W,
    settings: Arc<dyn SettingsStore>,
    clock: Box<dyn Clock>,
    shutdown: CancellationToken,
    state: TimerState,
    accumulated: TimeDelta,
    started_at: Option<DateTime<Utc>>,
    next_tick: Option<Instant>,
    /// Tag applied to sessions until changed; survives pause and stop so a
    /// resume doesn't silently drop it.
    project_tag: Option<Arc<str>>,
    /// Last successfully loaded settings, used when a flush-time reload
    /// fails so the batch is not lost to a transient settings error.
    fallback_settings: Option<Settings>,
    last_prune_date: Option<NaiveDate>,
}

impl<W: EntryLogWriter> TimerEngine<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        commands: mpsc::Receiver<TimerCommand>,
        events: mpsc::Sender<EngineEvent>,
        tracker: mpsc::Sender<TrackerRequest>,
        reminders: BreakReminderScheduler,
        writer: W,
        settings: Arc<dyn SettingsStore>,
        clock: Box<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            commands,
            events,
            tracker,
            reminders,
            writer,
            settings,
            clock,
            shutdown,
            state: TimerState::Idle,
            accumulated: TimeDelta::zero(),
            started_at: None,
            next_tick: None,
            project_tag: None,
            fallback_settings: None,
            last_prune_date: None,
        }
    }

    /// Executes the engine event loop until shutdown is requested or every
    /// command handle is gone.
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.next_wake().await {
                Wake::Command(command) => self.handle_command(command).await,
                Wake::Tick => self.handle_tick().await,
                Wake::Shutdown | Wake::Closed => {
                    self.handle_shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    async fn next_wake(&mut self) -> Wake {
        match self.next_tick {
            Some(deadline) => tokio::select! {
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                command = self.commands.recv() => command.map_or(Wake::Closed, Wake::Command),
                _ = self.clock.sleep_until(deadline) => Wake::Tick,
            },
            None => tokio::select! {
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                command = self.commands.recv() => command.map_or(Wake::Closed, Wake::Command),
            },
        }
    }

    async fn handle_command(&mut self, command: TimerCommand) {
        match command {
            TimerCommand::Start { project_tag } => self.handle_start(project_tag).await,
            TimerCommand::Pause => self.handle_pause().await,
            TimerCommand::Stop => self.handle_stop().await,
            TimerCommand::Reset => self.handle_reset().await,
            TimerCommand::SetProjectTag { project_tag } => {
                self.project_tag = project_tag.clone();
                self.send_tracker(TrackerRequest::SetProjectTag { project_tag })
                    .await;
            }
        }
    }

    async fn handle_start(&mut self, project_tag: Option<Arc<str>>) {
        match self.state {
            TimerState::Running => debug!("Start while running is a no-op"),
            TimerState::Idle | TimerState::Paused => {
                if project_tag.is_some() {
                    self.project_tag = project_tag;
                }
                // After a pause-flush the tracker is inactive again, so it is
                // re-engaged on resume as well; its own idempotency keeps a
                // still-open session from being duplicated.
                self.send_tracker(TrackerRequest::Start {
                    project_tag: self.project_tag.clone(),
                })
                .await;
                self.started_at = Some(self.clock.now());
                self.next_tick = Some(self.clock.instant() + TICK_INTERVAL);
                self.set_state(TimerState::Running).await;
                self.reminders.on_timer_started().await;
            }
        }
    }

    async fn handle_tick(&mut self) {
        let Some(started_at) = self.started_at else {
            self.next_tick = None;
            return;
        };
        let elapsed = self.accumulated + (self.clock.now() - started_at);
        self.emit(EngineEvent::Tick(elapsed)).await;

        // Sampling must not hold up the cadence: the tracker runs on its own
        // task, and when it lags behind a slow probe this round's sample is
        // dropped rather than queued.
        if let Err(e) = self.tracker.try_send(TrackerRequest::Sample) {
            warn!("Tracker not keeping up, dropping sample request: {e}");
        }

        self.next_tick = self.next_tick.map(|deadline| deadline + TICK_INTERVAL);
    }

    async fn handle_pause(&mut self) {
        if self.state != TimerState::Running {
            debug!("Pause while not running is a no-op");
            return;
        }
        self.halt_clock();
        self.set_state(TimerState::Paused).await;
        self.reminders.on_timer_paused();
        if let Err(e) = self.flush_session().await {
            error!("Failed to flush session on pause: {e:?}");
        }
    }

    async fn handle_stop(&mut self) {
        if self.state == TimerState::Idle {
            debug!("Stop while idle is a no-op");
            return;
        }
        self.halt_clock();
        self.set_state(TimerState::Idle).await;
        self.reminders.on_timer_paused();
        if let Err(e) = self.flush_session().await {
            error!("Failed to flush session on stop: {e:?}");
        }
        self.accumulated = TimeDelta::zero();
    }

    async fn handle_reset(&mut self) {
        self.handle_stop().await;
        self.accumulated = TimeDelta::zero();
        self.emit(EngineEvent::Tick(TimeDelta::zero())).await;
    }

    fn halt_clock(&mut self) {
        if let Some(started_at) = self.started_at.take() {
            self.accumulated += self.clock.now() - started_at;
        }
        self.next_tick = None;
    }

    async fn set_state(&mut self, state: TimerState) {
        if self.state != state {
            self.state = state;
            self.emit(EngineEvent::StateChanged(state)).await;
        }
    }

    /// Closes the open segment and persists every completed segment. The
    /// caller's state transition has already happened; failures here are
    /// reported, never fatal to the state machine.
    async fn flush_session(&mut self) -> Result<()> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.tracker
            .send(TrackerRequest::Flush {
                reply: reply_sender,
            })
            .await?;
        let entries = reply_receiver.await?;
        if entries.is_empty() {
            debug!("No time entries to log");
            return Ok(());
        }

        let settings = self.current_settings().await?;
        self.writer.write_entries(&entries, &settings).await?;
        info!(
            "Logged {} time entries to {:?}",
            entries.len(),
            settings.log_directory
        );
        self.prune_if_date_changed(&settings);
        self.emit(EngineEvent::EntriesLogged(entries)).await;
        Ok(())
    }

    /// Settings are reloaded at every flush boundary; only when the reload
    /// fails does the last successfully loaded snapshot step in.
    async fn current_settings(&mut self) -> Result<Settings> {
        match self.settings.load().await {
            Ok(settings) => {
                self.fallback_settings = Some(settings.clone());
                Ok(settings)
            }
            Err(e) => {
                warn!("Failed to reload settings, using last known: {e:?}");
                match &self.fallback_settings {
                    Some(settings) => Ok(settings.clone()),
                    None => Err(e),
                }
            }
        }
    }

    fn prune_if_date_changed(&mut self, settings: &Settings) {
        let today = self.clock.now().date_naive();
        if self.last_prune_date == Some(today) {
            return;
        }
        self.last_prune_date = Some(today);
        let log_directory = settings.log_directory.clone();
        let retention_days = settings.data_retention_days;
        tokio::spawn(async move {
            match prune_expired_logs(&log_directory, retention_days, today).await {
                Ok(0) => {}
                Ok(n) => info!("Pruned {n} expired work logs"),
                Err(e) => warn!("Failed to prune expired work logs: {e:?}"),
            }
        });
    }

    /// Best-effort teardown: a final flush gets a bounded window, then the
    /// open segment is dropped rather than hanging shutdown.
    async fn handle_shutdown(&mut self) {
        self.reminders.on_timer_paused();
        if self.state == TimerState::Idle {
            return;
        }
        self.halt_clock();
        self.set_state(TimerState::Idle).await;
        match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, self.flush_session()).await {
            Ok(Ok(())) => info!("Final flush completed"),
            Ok(Err(e)) => error!("Final flush failed: {e:?}"),
            Err(_) => warn!("Final flush timed out, dropping the open segment"),
        }
        self.accumulated = TimeDelta::zero();
    }

    async fn emit(&mut self, event: EngineEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event listener is gone");
        }
    }

    async fn send_tracker(&mut self, request: TrackerRequest) {
        if self.tracker.send(request).await.is_err() {
            error!("Session tracker is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration as StdDuration};

    use chrono::Duration;
    use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
    use tokio_util::sync::CancellationToken;

    use crate::{
        config::Settings,
        engine::{
            assemble_engine,
            entry::{TimeEntry, TimerState},
            events::EngineEvent,
        },
        notify::ConsoleNotificationSink,
        probe::{ActiveWindowSample, MockActiveWindowProbe},
        utils::{
            logging::TEST_LOGGING,
            testing::{test_start, FailingWriter, RecordingWriter, TestClock, TestSettingsStore},
        },
        worklog::writer::EntryLogWriter,
    };

    use super::TimerHandle;

    fn sample(process: &str, title: &str) -> ActiveWindowSample {
        ActiveWindowSample {
            process_name: process.into(),
            window_title: title.into(),
        }
    }

    /// Probe serving window "A" for the first `a_samples` queries, then "B".
    fn switching_probe(a_samples: u32) -> MockActiveWindowProbe {
        let mut probe = MockActiveWindowProbe::new();
        let mut calls = 0u32;
        probe.expect_sample().returning(move || {
            calls += 1;
            if calls <= a_samples {
                Ok(Some(sample("A", "Title1")))
            } else {
                Ok(Some(sample("B", "Title2")))
            }
        });
        probe
    }

    fn quiet_settings() -> Settings {
        Settings {
            break_reminders_enabled: false,
            ..Default::default()
        }
    }

    struct Harness {
        handle: TimerHandle,
        events: mpsc::Receiver<EngineEvent>,
        shutdown: CancellationToken,
        engine_task: JoinHandle<anyhow::Result<()>>,
        tracking_task: JoinHandle<anyhow::Result<()>>,
    }

    impl Harness {
        fn spawn<W: EntryLogWriter>(
            probe: MockActiveWindowProbe,
            writer: W,
            store: Arc<TestSettingsStore>,
        ) -> Self {
            *TEST_LOGGING;
            let (event_sender, events) = mpsc::channel(1024);
            let shutdown = CancellationToken::new();
            let (engine, handle, tracking) = assemble_engine(
                event_sender,
                probe,
                store,
                writer,
                Arc::new(ConsoleNotificationSink),
                &shutdown,
                TestClock::default(),
            );
            Self {
                handle,
                events,
                shutdown,
                engine_task: tokio::spawn(engine.run()),
                tracking_task: tokio::spawn(tracking.run()),
            }
        }

        /// Receives events until the predicate matches, returning the match.
        async fn wait_for(&mut self, mut matches: impl FnMut(&EngineEvent) -> bool) -> EngineEvent {
            loop {
                let event = self.events.recv().await.expect("engine hung up");
                if matches(&event) {
                    return event;
                }
            }
        }

        async fn wait_for_logged(&mut self) -> Vec<TimeEntry> {
            match self
                .wait_for(|e| matches!(e, EngineEvent::EntriesLogged(_)))
                .await
            {
                EngineEvent::EntriesLogged(entries) => entries,
                _ => unreachable!(),
            }
        }

        async fn finish(mut self) {
            self.shutdown.cancel();
            self.events.close();
            self.engine_task.await.unwrap().unwrap();
            self.tracking_task.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_flushes_ordered_window_segments() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(5), writer.clone(), store);
        let t0 = test_start();

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(12500)).await;
        harness.handle.pause().await.unwrap();

        let logged = harness.wait_for_logged().await;
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].app_name.as_ref(), "A");
        assert_eq!(logged[0].start_time, t0);
        assert_eq!(logged[0].end_time, Some(t0 + Duration::seconds(5)));
        assert_eq!(logged[1].app_name.as_ref(), "B");
        assert_eq!(logged[1].start_time, t0 + Duration::seconds(5));
        assert_eq!(
            logged[1].end_time,
            Some(t0 + Duration::milliseconds(12500))
        );
        assert_eq!(writer.batches(), vec![logged]);

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_stop_logs_nothing_and_resets() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store);

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(300)).await;
        harness.handle.stop().await.unwrap();
        harness
            .wait_for(|e| matches!(e, EngineEvent::StateChanged(TimerState::Idle)))
            .await;

        assert!(writer.batches().is_empty());

        // Elapsed was reset: the first tick of a fresh session reads 1s, not 1.3s.
        harness.handle.start(None).await.unwrap();
        let tick = harness
            .wait_for(|e| matches!(e, EngineEvent::Tick(_)))
            .await;
        match tick {
            EngineEvent::Tick(elapsed) => assert_eq!(elapsed, Duration::seconds(1)),
            _ => unreachable!(),
        }

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_one_transition_and_one_segment() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store);

        harness.handle.start(None).await.unwrap();
        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        harness.handle.pause().await.unwrap();

        let mut running_transitions = 0;
        let logged = loop {
            match harness.events.recv().await.expect("engine hung up") {
                EngineEvent::StateChanged(TimerState::Running) => running_transitions += 1,
                EngineEvent::EntriesLogged(entries) => break entries,
                _ => {}
            }
        };

        assert_eq!(running_transitions, 1);
        assert_eq!(logged.len(), 1);

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_is_recomputed_across_pause_and_resume() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store);

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(3700)).await;
        harness.handle.pause().await.unwrap();
        harness
            .wait_for(|e| matches!(e, EngineEvent::StateChanged(TimerState::Paused)))
            .await;

        harness.handle.start(None).await.unwrap();
        let tick = harness
            .wait_for(|e| matches!(e, EngineEvent::Tick(_)))
            .await;
        match tick {
            // 3.7s accumulated before the pause, plus one fresh second.
            EngineEvent::Tick(elapsed) => {
                assert_eq!(elapsed, Duration::milliseconds(4700));
            }
            _ => unreachable!(),
        }

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_keeps_tracking_new_segments() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store);

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(3500)).await;
        harness.handle.pause().await.unwrap();
        let first = harness.wait_for_logged().await;

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        harness.handle.stop().await.unwrap();
        let second = harness.wait_for_logged().await;

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(first[0].end_time.unwrap() <= second[0].start_time);

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn project_tag_survives_pause_and_resume() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store);

        harness.handle.start(Some("acme".into())).await.unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        harness.handle.pause().await.unwrap();
        let first = harness.wait_for_logged().await;

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        harness.handle.stop().await.unwrap();
        let second = harness.wait_for_logged().await;

        assert_eq!(first[0].project_tag.as_deref(), Some("acme"));
        assert_eq!(second[0].project_tag.as_deref(), Some("acme"));

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn set_project_tag_reaches_the_open_entry() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store);

        harness.handle.start(None).await.unwrap();
        harness
            .handle
            .set_project_tag(Some("billing".into()))
            .await
            .unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        harness.handle.stop().await.unwrap();

        let logged = harness.wait_for_logged().await;
        assert_eq!(logged[0].project_tag.as_deref(), Some("billing"));

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_while_idle_changes_nothing() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store);

        harness.handle.pause().await.unwrap();
        harness.handle.stop().await.unwrap();
        sleep(StdDuration::from_secs(1)).await;

        assert!(harness.events.try_recv().is_err());
        assert!(writer.batches().is_empty());

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_flushes_and_emits_zero_tick() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store);

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        harness.handle.reset().await.unwrap();

        harness
            .wait_for(|e| matches!(e, EngineEvent::StateChanged(TimerState::Idle)))
            .await;
        let tick = harness
            .wait_for(|e| matches!(e, EngineEvent::Tick(_)))
            .await;
        match tick {
            EngineEvent::Tick(elapsed) => assert_eq!(elapsed, Duration::zero()),
            _ => unreachable!(),
        }
        assert_eq!(writer.batches().len(), 1);

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_failure_still_completes_the_transition() {
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), FailingWriter, store);

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        harness.handle.pause().await.unwrap();
        harness
            .wait_for(|e| matches!(e, EngineEvent::StateChanged(TimerState::Paused)))
            .await;

        // The engine keeps working after the failed flush.
        harness.handle.start(None).await.unwrap();
        harness
            .wait_for(|e| matches!(e, EngineEvent::StateChanged(TimerState::Running)))
            .await;

        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_survives_settings_reload_failure() {
        let writer = RecordingWriter::default();
        let store = Arc::new(TestSettingsStore::new(quiet_settings()));
        let mut harness = Harness::spawn(switching_probe(u32::MAX), writer.clone(), store.clone());

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        harness.handle.pause().await.unwrap();
        harness.wait_for_logged().await;

        harness.handle.start(None).await.unwrap();
        sleep(StdDuration::from_millis(2500)).await;
        store.set_failing(true);
        harness.handle.pause().await.unwrap();
        let second = harness.wait_for_logged().await;

        assert_eq!(second.len(), 1);
        assert_eq!(writer.batches().len(), 2);

        harness.finish().await;
    }
}
