use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{config::SettingsStore, notify::NotificationSink, utils::clock::Clock};

/// Follow-up delay applied after a reminder fires while reminders remain
/// enabled, independent of the configured interval.
const SNOOZE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Single pending-reminder slot riding on top of the timer's running state.
/// The pending reminder is a spawned task guarded by a cancellation token;
/// re-arming always cancels the previous one first, so only one timer is
/// ever live.
pub struct BreakReminderScheduler {
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    pending: Option<CancellationToken>,
}

impl BreakReminderScheduler {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            notifier,
            clock,
            pending: None,
        }
    }

    /// Arms a single-shot reminder for the configured interval. Settings are
    /// loaded fresh; when reminders are disabled or the interval is zero
    /// nothing is armed.
    pub async fn on_timer_started(&mut self) {
        self.on_timer_paused();

        let settings = match self.settings.load().await {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to load settings for break reminder: {e:?}");
                return;
            }
        };
        if !settings.break_reminders_enabled || settings.break_interval_minutes == 0 {
            debug!("Break reminders disabled, not arming");
            return;
        }

        let token = CancellationToken::new();
        self.pending = Some(token.clone());
        tokio::spawn(run_reminder(
            settings.break_interval_minutes,
            self.settings.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            token,
        ));
    }

    /// Cancels the pending reminder. Safe to call in any state, any number
    /// of times; a cancelled reminder never fires afterwards.
    pub fn on_timer_paused(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}

async fn run_reminder(
    interval_minutes: u32,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    token: CancellationToken,
) {
    let mut delay = Duration::from_secs(u64::from(interval_minutes) * 60);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = clock.sleep(delay) => {}
        }
        if token.is_cancelled() {
            return;
        }

        let message =
            format!("You've been working for {interval_minutes} minutes. Time to take a break!");
        if let Err(e) = notifier.show_break_reminder(&message).await {
            error!("Break reminder notification failed: {e:?}");
        }

        // Auto-snooze while reminders remain enabled at fire time.
        match settings.load().await {
            Ok(s) if s.break_reminders_enabled => delay = SNOOZE_INTERVAL,
            Ok(_) => return,
            Err(e) => {
                warn!("Failed to reload settings after reminder: {e:?}");
                return;
            }
        }
    }
}
