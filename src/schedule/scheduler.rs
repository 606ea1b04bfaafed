use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::FeedConfig;

use super::trigger::{generate_trigger, TriggerExpression};

/// Work performed each time a feed's trigger fires.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Returns the number of newly archived items.
    async fn run(&self, config: &FeedConfig) -> Result<usize>;
}

struct ScheduledJob {
    trigger: TriggerExpression,
    running: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One recurring trigger per feed id.
pub struct Scheduler {
    handler: Arc<dyn JobHandler>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl Scheduler {
    pub fn new(handler: Arc<dyn JobHandler>) -> Self {
        Self {
            handler,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule `config` on its cadence. The job is created stopped when the
    /// feed is disabled. Must be called from within a tokio runtime.
    pub fn add_job(&self, config: &FeedConfig) -> Result<TriggerExpression> {
        let mut jobs = self.lock();
        if jobs.contains_key(&config.id) {
            return Err(AppError::DuplicateJobId(config.id.clone()));
        }

        let trigger = generate_trigger(&config.cadence);
        let (running, running_rx) = watch::channel(config.enabled);
        let handle = tokio::spawn(run_trigger(
            config.clone(),
            trigger,
            running_rx,
            Arc::clone(&self.handler),
        ));
        jobs.insert(
            config.id.clone(),
            ScheduledJob {
                trigger,
                running,
                handle,
            },
        );

        tracing::info!(
            "Scheduled feed {} with trigger '{}' ({})",
            config.id,
            trigger,
            if config.enabled { "running" } else { "stopped" }
        );
        Ok(trigger)
    }

    pub fn start(&self, id: &str) -> Result<()> {
        self.set_running(id, true)
    }

    pub fn stop(&self, id: &str) -> Result<()> {
        self.set_running(id, false)
    }

    /// Tear the trigger down for good and forget the job.
    pub fn delete(&self, id: &str) -> Result<()> {
        let job = self
            .lock()
            .remove(id)
            .ok_or_else(|| AppError::UnknownJobId(id.to_string()))?;
        job.handle.abort();
        tracing::info!("Removed schedule for feed {}", id);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_running(&self, id: &str) -> Option<bool> {
        self.lock().get(id).map(|job| *job.running.borrow())
    }

    pub fn trigger(&self, id: &str) -> Option<TriggerExpression> {
        self.lock().get(id).map(|job| job.trigger)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Abort every job. Collections already in flight are not waited for.
    pub fn shutdown(&self) {
        let mut jobs = self.lock();
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }

    fn set_running(&self, id: &str, running: bool) -> Result<()> {
        let jobs = self.lock();
        let job = jobs
            .get(id)
            .ok_or_else(|| AppError::UnknownJobId(id.to_string()))?;
        job.running.send_replace(running);
        tracing::info!(
            "{} schedule for feed {}",
            if running { "Started" } else { "Stopped" },
            id
        );
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_trigger(
    config: FeedConfig,
    trigger: TriggerExpression,
    running: watch::Receiver<bool>,
    handler: Arc<dyn JobHandler>,
) {
    let mut cursor = Utc::now();
    let mut deadline = Instant::now();

    loop {
        let Some(next) = trigger.next_after(cursor) else {
            tracing::warn!("Trigger '{}' for feed {} never fires again", trigger, config.id);
            return;
        };
        let wait = (next - cursor).to_std().unwrap_or_default();
        deadline += wait;
        tokio::time::sleep_until(deadline).await;
        cursor = next;

        // Skip firings missed while the process was suspended.
        let now = Instant::now();
        if now.saturating_duration_since(deadline) > wait {
            cursor = Utc::now();
            deadline = now;
        }

        if !*running.borrow() {
            continue;
        }

        tracing::debug!("Trigger fired for feed {}", config.id);
        let handler = Arc::clone(&handler);
        let config = config.clone();
        tokio::spawn(async move {
            match handler.run(&config).await {
                Ok(added) => {
                    tracing::debug!("Collected feed {}: {} new items", config.id, added)
                }
                Err(e) => tracing::warn!("Failed to collect feed {}: {}", config.id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::models::Period;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingHandler {
        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn run(&self, _config: &FeedConfig) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow::anyhow!("feed unreachable").into());
            }
            Ok(0)
        }
    }

    fn feed(id: &str, enabled: bool) -> FeedConfig {
        FeedConfig {
            id: id.to_string(),
            category_id: "root".to_string(),
            name: id.to_string(),
            url: format!("https://{}.example/rss", id),
            cadence: Period::seconds(1),
            icon_url: None,
            enabled,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn running_job_fires_on_cadence() {
        let handler = Arc::new(CountingHandler::default());
        let scheduler = Scheduler::new(handler.clone());

        let trigger = scheduler.add_job(&feed("a", true)).unwrap();
        assert_eq!(trigger.to_string(), "*/1 * * * * *");
        assert_eq!(scheduler.is_running("a"), Some(true));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handler.calls() >= 3, "calls = {}", handler.calls());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_job_exists_but_does_not_fire() {
        let handler = Arc::new(CountingHandler::default());
        let scheduler = Scheduler::new(handler.clone());

        scheduler.add_job(&feed("a", false)).unwrap();
        assert_eq!(scheduler.count(), 1);
        assert_eq!(scheduler.is_running("a"), Some(false));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handler.calls(), 0);

        scheduler.start("a").unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handler.calls() >= 1);

        scheduler.stop("a").unwrap();
        let after_stop = handler.calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handler.calls(), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_collections_do_not_stop_the_job() {
        let handler = Arc::new(CountingHandler::failing());
        let scheduler = Scheduler::new(handler.clone());

        scheduler.add_job(&feed("a", true)).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(handler.calls() >= 3);
        assert_eq!(scheduler.is_running("a"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_job_never_fires_again() {
        let handler = Arc::new(CountingHandler::default());
        let scheduler = Scheduler::new(handler.clone());

        scheduler.add_job(&feed("a", true)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.delete("a").unwrap();
        let after_delete = handler.calls();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handler.calls(), after_delete);
        assert_eq!(scheduler.count(), 0);
    }

    #[tokio::test]
    async fn job_ids_are_unique_and_must_exist() {
        let scheduler = Scheduler::new(Arc::new(CountingHandler::default()));
        scheduler.add_job(&feed("a", true)).unwrap();

        assert!(matches!(
            scheduler.add_job(&feed("a", false)),
            Err(AppError::DuplicateJobId(_))
        ));
        assert!(matches!(scheduler.start("b"), Err(AppError::UnknownJobId(_))));
        assert!(matches!(scheduler.stop("b"), Err(AppError::UnknownJobId(_))));
        assert!(matches!(scheduler.delete("b"), Err(AppError::UnknownJobId(_))));

        scheduler.delete("a").unwrap();
        scheduler.add_job(&feed("a", false)).unwrap();
        assert_eq!(scheduler.ids(), vec!["a".to_string()]);

        scheduler.shutdown();
        assert_eq!(scheduler.count(), 0);
    }
}
