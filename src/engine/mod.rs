use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{JsonSettingsStore, SettingsStore},
    notify::{ConsoleNotificationSink, NotificationSink},
    probe::{ActiveWindowProbe, GenericProbe},
    utils::clock::{Clock, DefaultClock},
    worklog::{
        retention::prune_expired_logs,
        writer::{CsvEntryLog, EntryLogWriter},
    },
};

use break_reminder::BreakReminderScheduler;
use events::EngineEvent;
use session::{SessionTracker, TrackingModule};
use timer::{TimerEngine, TimerHandle};

pub mod break_reminder;
pub mod entry;
pub mod events;
pub mod session;
pub mod shutdown;
pub mod timer;

const COMMAND_CHANNEL_CAPACITY: usize = 10;
const TRACKER_CHANNEL_CAPACITY: usize = 10;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Represents the starting point for a tracking session: wires the engine
/// together, starts the timer with the given project tag and runs until a
/// shutdown signal arrives.
pub async fn start_engine(dir: PathBuf, project_tag: Option<String>) -> Result<()> {
    let settings_store: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(&dir));
    let probe = GenericProbe::new()?;
    let shutdown_token = CancellationToken::new();

    let (event_sender, event_receiver) = mpsc::channel::<EngineEvent>(EVENT_CHANNEL_CAPACITY);

    let (engine, handle, tracking) = assemble_engine(
        event_sender,
        probe,
        settings_store.clone(),
        CsvEntryLog,
        Arc::new(ConsoleNotificationSink),
        &shutdown_token,
        DefaultClock,
    );

    // Expired logs go before the session begins; the default project tag
    // comes from the same settings snapshot.
    let project_tag = match settings_store.load().await {
        Ok(settings) => {
            match prune_expired_logs(
                &settings.log_directory,
                settings.data_retention_days,
                DefaultClock.now().date_naive(),
            )
            .await
            {
                Ok(0) => {}
                Ok(n) => info!("Pruned {n} expired work logs"),
                Err(e) => warn!("Failed to prune expired work logs: {e:?}"),
            }
            project_tag.or(settings.project_tag)
        }
        Err(e) => {
            warn!("Failed to load settings at startup: {e:?}");
            project_tag
        }
    };

    handle.start(project_tag.map(Arc::from)).await?;

    let (_, engine_result, tracking_result, _) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        engine.run(),
        tracking.run(),
        forward_events(event_receiver),
    );

    if let Err(engine_result) = engine_result {
        error!("Timer engine got an error {:?}", engine_result);
    }

    if let Err(tracking_result) = tracking_result {
        error!("Tracking module got an error {:?}", tracking_result);
    }

    Ok(())
}

/// Builds the engine actor, its command handle and the tracker task from the
/// injected collaborators.
fn assemble_engine<W: EntryLogWriter>(
    events: mpsc::Sender<EngineEvent>,
    probe: impl ActiveWindowProbe,
    settings: Arc<dyn SettingsStore>,
    writer: W,
    notifier: Arc<dyn NotificationSink>,
    shutdown: &CancellationToken,
    clock: impl Clock + Clone,
) -> (TimerEngine<W>, TimerHandle, TrackingModule) {
    let (command_sender, command_receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (tracker_sender, tracker_receiver) = mpsc::channel(TRACKER_CHANNEL_CAPACITY);

    let tracker = SessionTracker::new(Box::new(probe), Box::new(clock.clone()));
    let tracking = TrackingModule::new(tracker_receiver, tracker);

    let reminders =
        BreakReminderScheduler::new(settings.clone(), notifier, Arc::new(clock.clone()));

    let engine = TimerEngine::new(
        command_receiver,
        events,
        tracker_sender,
        reminders,
        writer,
        settings,
        Box::new(clock),
        shutdown.clone(),
    );

    (engine, TimerHandle::new(command_sender), tracking)
}

/// Stand-in for presentation collaborators: surfaces engine events in the
/// terminal and the structured log.
async fn forward_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::StateChanged(state) => info!("Timer state: {state:?}"),
            EngineEvent::Tick(elapsed) => debug!("Elapsed {}s", elapsed.num_seconds()),
            EngineEvent::EntriesLogged(entries) => {
                info!("Logged {} time entries", entries.len())
            }
        }
    }
}
