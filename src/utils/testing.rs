//! Shared doubles for the engine test suites.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use tokio::time::Instant;

use crate::{
    config::{Settings, SettingsStore},
    engine::entry::TimeEntry,
    utils::clock::Clock,
    worklog::writer::EntryLogWriter,
};

pub fn test_start() -> DateTime<Utc> {
    let date = NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);
    Utc.from_utc_datetime(&date)
}

/// Clock pinned to [test_start] and advanced by tokio's (virtual) time.
#[derive(Clone)]
pub struct TestClock {
    start_time: DateTime<Utc>,
    reference: Instant,
}

impl Default for TestClock {
    fn default() -> Self {
        Self {
            start_time: test_start(),
            reference: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        self.start_time + self.reference.elapsed()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn sleep_until(&self, instant: tokio::time::Instant) {
        tokio::time::sleep_until(instant).await;
    }
}

/// Settings store living in memory, with a switchable failure mode.
pub struct TestSettingsStore {
    steady: Mutex<Settings>,
    fail: AtomicBool,
}

impl TestSettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            steady: Mutex::new(settings),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set(&self, settings: Settings) {
        *self.steady.lock().unwrap() = settings;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettingsStore for TestSettingsStore {
    async fn load(&self) -> Result<Settings> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("settings store unavailable"));
        }
        Ok(self.steady.lock().unwrap().clone())
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        *self.steady.lock().unwrap() = settings.clone();
        Ok(())
    }
}

/// [EntryLogWriter] capturing every batch it is handed.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    batches: Arc<Mutex<Vec<Vec<TimeEntry>>>>,
}

impl RecordingWriter {
    pub fn batches(&self) -> Vec<Vec<TimeEntry>> {
        self.batches.lock().unwrap().clone()
    }
}

impl EntryLogWriter for RecordingWriter {
    async fn write_entries(&self, entries: &[TimeEntry], _settings: &Settings) -> Result<()> {
        self.batches.lock().unwrap().push(entries.to_vec());
        Ok(())
    }
}

/// [EntryLogWriter] that always fails.
#[derive(Clone, Default)]
pub struct FailingWriter;

impl EntryLogWriter for FailingWriter {
    async fn write_entries(&self, _entries: &[TimeEntry], _settings: &Settings) -> Result<()> {
        Err(anyhow!("log target unavailable"))
    }
}
