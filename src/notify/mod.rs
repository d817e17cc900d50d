use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Outbound notification contract. The engine fires and forgets; failures
/// are logged by the caller, never propagated.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn show_break_reminder(&self, message: &str) -> Result<()>;
}

/// Default sink: the console (visible under `focuslog serve`) plus the
/// structured log. Desktop toast integration is the host's concern.
pub struct ConsoleNotificationSink;

#[async_trait]
impl NotificationSink for ConsoleNotificationSink {
    async fn show_break_reminder(&self, message: &str) -> Result<()> {
        info!("Break reminder: {message}");
        println!("{message}");
        Ok(())
    }
}
