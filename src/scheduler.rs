use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{IngestDelta, Watch};
use crate::notify::Notifier;
use crate::sources::Aggregator;

const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Drives watch runs: picks due watches on every tick, fans each one out
/// through the aggregator and ingests the batch.
///
/// A watch never runs concurrently with itself (the `running` set guards
/// the Idle -> Running transition); distinct watches run in parallel,
/// optionally capped by a global semaphore.
pub struct Scheduler {
    repo: Arc<Repository>,
    aggregator: Arc<Aggregator>,
    notifier: Arc<dyn Notifier>,
    refresh_interval: chrono::Duration,
    running: Arc<Mutex<HashSet<i64>>>,
    limit: Option<Arc<Semaphore>>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<Repository>,
        aggregator: Arc<Aggregator>,
        notifier: Arc<dyn Notifier>,
        refresh_interval: Duration,
        max_concurrent_watches: Option<usize>,
    ) -> Self {
        Self {
            repo,
            aggregator,
            notifier,
            refresh_interval: chrono::Duration::from_std(refresh_interval)
                .unwrap_or(chrono::Duration::MAX),
            running: Arc::new(Mutex::new(HashSet::new())),
            limit: max_concurrent_watches.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Tick until ctrl-c, then wait for in-flight runs to finish.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        let mut tasks: JoinSet<(i64, Result<()>)> = JoinSet::new();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.spawn_due(&mut tasks).await {
                        tracing::error!("Failed to schedule watches: {}", e);
                    }
                }
                Some(joined) = tasks.join_next() => reap(joined),
                _ = &mut shutdown => {
                    tracing::info!("Shutting down, draining {} in-flight runs", tasks.len());
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }
        Ok(())
    }

    /// Run every active watch once, regardless of due time, and wait.
    pub async fn run_once(&self) -> Result<()> {
        let mut tasks: JoinSet<(i64, Result<()>)> = JoinSet::new();
        for watch in self.repo.get_active_watches().await? {
            self.spawn_watch(&mut tasks, watch);
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }
        Ok(())
    }

    async fn spawn_due(&self, tasks: &mut JoinSet<(i64, Result<()>)>) -> Result<()> {
        for watch in self.repo.get_active_watches().await? {
            if self.is_due(&watch) {
                self.spawn_watch(tasks, watch);
            }
        }
        Ok(())
    }

    fn is_due(&self, watch: &Watch) -> bool {
        if !watch.active {
            return false;
        }
        if self.running.lock().unwrap().contains(&watch.id) {
            return false;
        }
        match watch.last_run {
            None => true,
            Some(last_run) => Utc::now() - last_run >= self.refresh_interval,
        }
    }

    fn spawn_watch(&self, tasks: &mut JoinSet<(i64, Result<()>)>, watch: Watch) {
        let watch_id = watch.id;
        if !self.running.lock().unwrap().insert(watch_id) {
            return;
        }

        let repo = Arc::clone(&self.repo);
        let aggregator = Arc::clone(&self.aggregator);
        let notifier = Arc::clone(&self.notifier);
        let running = Arc::clone(&self.running);
        let limit = self.limit.clone();

        tasks.spawn(async move {
            let _permit = match limit {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            let result = run_watch(&repo, &aggregator, notifier.as_ref(), &watch).await;
            running.lock().unwrap().remove(&watch_id);
            (watch_id, result)
        });
    }
}

/// One full run of a watch: collect, ingest, stamp, notify.
///
/// The batch is ingested even when every source failed, but `last_run`
/// is only stamped on a non-total-failure run so the watch stays due and
/// the next tick retries. Store errors propagate with the same effect.
async fn run_watch(
    repo: &Repository,
    aggregator: &Aggregator,
    notifier: &dyn Notifier,
    watch: &Watch,
) -> Result<()> {
    let collection = aggregator.collect(watch).await;
    for (source, error) in &collection.errors {
        tracing::warn!(watch_id = watch.id, source = %source, "Source failed: {}", error);
    }
    let total_failure = collection.total_failure();

    let outcome = repo.ingest(watch.id, collection.items).await?;

    if total_failure {
        tracing::warn!(watch_id = watch.id, "All sources failed, retrying next tick");
        return Ok(());
    }

    repo.update_watch_last_run(watch.id).await?;

    let delta = IngestDelta {
        watch_id: watch.id,
        new_items: outcome.new_items,
        total_count: outcome.total_count,
    };
    if let Err(e) = notifier.notify(&delta).await {
        tracing::warn!(watch_id = watch.id, "Notifier failed: {}", e);
    }
    Ok(())
}

fn reap(joined: std::result::Result<(i64, Result<()>), tokio::task::JoinError>) {
    match joined {
        Ok((watch_id, Ok(()))) => tracing::debug!(watch_id, "Run finished"),
        Ok((watch_id, Err(e))) => tracing::error!(watch_id, "Run failed: {}", e),
        Err(e) => tracing::error!("Run task panicked: {}", e),
    }
}
