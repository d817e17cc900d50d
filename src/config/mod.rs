//! Settings live in a single `settings.json` inside the application
//! directory. The engine never caches them across a flush or reminder-arming
//! boundary; it reloads through [SettingsStore] every time.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// User preferences consumed by the engine.
///
/// Unknown fields in the file are ignored and missing fields take their
/// defaults, so the file survives both older and newer writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub break_interval_minutes: u32,
    pub break_reminders_enabled: bool,
    /// Root of the per-day work log tree. Empty means "not configured yet";
    /// [JsonSettingsStore] fills it with `{app_dir}/worklogs` on load.
    pub log_directory: PathBuf,
    pub data_retention_days: u32,
    /// Default project tag applied when a session starts without one.
    pub project_tag: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            break_interval_minutes: 50,
            break_reminders_enabled: true,
            log_directory: PathBuf::new(),
            data_retention_days: 90,
            project_tag: None,
        }
    }
}

impl Settings {
    fn normalized(mut self, app_dir: &Path) -> Self {
        if self.log_directory.as_os_str().is_empty() {
            self.log_directory = app_dir.join("worklogs");
        }
        self
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
    async fn load(&self) -> Result<Settings>;

    async fn save(&self, settings: &Settings) -> Result<()>;
}

/// [SettingsStore] backed by `{app_dir}/settings.json`.
pub struct JsonSettingsStore {
    app_dir: PathBuf,
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        let path = app_dir.join(SETTINGS_FILE_NAME);
        Self { app_dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    /// Loads settings, falling back to defaults when the file is missing or
    /// unparsable. A corrupt file is not an error to the caller, only a
    /// logged warning, since every consumer can run on defaults.
    async fn load(&self) -> Result<Settings> {
        let settings = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Settings file {:?} is unparsable, using defaults: {e}", self.path);
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(settings.normalized(&self.app_dir))
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        tokio::fs::create_dir_all(&self.app_dir).await?;
        let content = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}
