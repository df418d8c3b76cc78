use async_trait::async_trait;

use crate::models::IngestDelta;

/// Pluggable delivery channel for new-item deltas.
///
/// The scheduler hands over the delta after every successful ingest;
/// delivery failure is the channel's problem and never fails the run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, delta: &IngestDelta) -> anyhow::Result<()>;
}

/// Default channel: log the delta.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, delta: &IngestDelta) -> anyhow::Result<()> {
        if delta.new_items.is_empty() {
            tracing::debug!(watch_id = delta.watch_id, "No new items");
            return Ok(());
        }
        tracing::info!(
            watch_id = delta.watch_id,
            new = delta.new_items.len(),
            total = delta.total_count,
            "New items found"
        );
        for item in &delta.new_items {
            tracing::info!(
                watch_id = delta.watch_id,
                source = %item.source,
                price = item.price.as_deref().unwrap_or("-"),
                "{}: {}",
                item.title,
                item.link
            );
        }
        Ok(())
    }
}

/// Discards every delta. Used in tests.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _delta: &IngestDelta) -> anyhow::Result<()> {
        Ok(())
    }
}
