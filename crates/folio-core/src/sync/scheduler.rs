//! Background sync scheduling
//!
//! Runs one task per trigger:
//!
//! - poll: sync every `poll_interval`, measured from the end of the previous
//!   cycle so a slow pass never overlaps the next one
//! - debounce: sync once local edits have been quiet for `debounce`
//! - credentials: re-check the remote token every `credential_refresh`
//! - resume: on foreground signals (and a fallback interval), re-check
//!   credentials, reset a stuck pass and sync
//!
//! Automatic triggers only start a pass when the engine is idle. A pending
//! conflict or expired credentials therefore pause them until the user acts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::engine::{SyncEngine, SyncStatus};
use crate::config::Config;
use crate::store::StoreEvent;

/// Timing of the background triggers
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub debounce: Duration,
    /// `None` disables the periodic credential check
    pub credential_refresh: Option<Duration>,
    /// Fallback interval for the resume check
    pub resume_check: Duration,
    /// How long a pass may stay in flight before it is considered stuck
    pub stuck_threshold: Duration,
    /// Upper bound for the final sync on exit
    pub exit_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            debounce: Duration::from_secs(10),
            credential_refresh: Some(Duration::from_secs(600)),
            resume_check: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(120),
            exit_timeout: Duration::from_secs(15),
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            debounce: config.debounce(),
            credential_refresh: config.credential_refresh(),
            resume_check: config.resume_check(),
            ..Self::default()
        }
    }
}

/// Handle to the running background tasks
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    config: SchedulerConfig,
    shutdown_tx: watch::Sender<bool>,
    resume_tx: mpsc::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(engine: Arc<SyncEngine>, config: SchedulerConfig) -> Self {
        let events = engine.store().lock().await.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (resume_tx, resume_rx) = mpsc::channel(4);

        let mut tasks = vec![
            tokio::spawn(poll_loop(
                Arc::clone(&engine),
                config.poll_interval,
                shutdown_rx.clone(),
            )),
            tokio::spawn(debounce_loop(
                Arc::clone(&engine),
                config.debounce,
                events,
                shutdown_rx.clone(),
            )),
            tokio::spawn(resume_loop(
                Arc::clone(&engine),
                config.resume_check,
                config.stuck_threshold,
                resume_rx,
                shutdown_rx.clone(),
            )),
        ];
        if let Some(every) = config.credential_refresh {
            tasks.push(tokio::spawn(credential_loop(
                Arc::clone(&engine),
                every,
                shutdown_rx,
            )));
        }

        info!(
            "Sync scheduler started (poll every {:?}, debounce {:?})",
            config.poll_interval, config.debounce
        );

        Self {
            engine,
            config,
            shutdown_tx,
            resume_tx,
            tasks,
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// The app came back to the foreground
    pub fn on_resume_foreground(&self) {
        // A full queue already holds a pending resume check
        let _ = self.resume_tx.try_send(());
    }

    /// The process is about to exit
    ///
    /// Runs one forced sync, bounded by the exit timeout, when local changes
    /// are still unsynced. Returns whether everything reached the remote.
    ///
    /// The pass runs on its own task. When the timeout fires it keeps going
    /// in the background and still settles the engine status.
    pub async fn on_process_exit_intent(&self) -> bool {
        if !self.engine.store().lock().await.has_unsynced_changes() {
            return true;
        }

        info!("Unsynced changes on exit, running a final sync");
        let engine = Arc::clone(&self.engine);
        let pass = tokio::spawn(async move { engine.sync(true).await });
        match tokio::time::timeout(self.config.exit_timeout, pass).await {
            Ok(Ok(Ok(_))) => !self.engine.store().lock().await.has_unsynced_changes(),
            Ok(Ok(Err(e))) => {
                warn!("Final sync failed: {}", e);
                false
            }
            Ok(Err(e)) => {
                warn!("Final sync task ended abnormally: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    "Final sync did not finish within {:?}",
                    self.config.exit_timeout
                );
                false
            }
        }
    }

    /// Stop all tasks, letting an in-flight pass finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
        debug!("Sync scheduler stopped");
    }
}

/// Start a pass if the engine is idle, logging the outcome
async fn sync_if_idle(engine: &SyncEngine, trigger: &str) {
    if engine.status() != SyncStatus::Idle {
        debug!("Skipping {} sync, status is {}", trigger, engine.status());
        return;
    }
    match engine.sync(false).await {
        Ok(report) if report.ran() => debug!("{} sync: {:?}", trigger, report.outcome),
        Ok(_) => {}
        Err(e) if e.is_transient() => debug!("{} sync will retry: {}", trigger, e),
        Err(e) => warn!("{} sync failed: {}", trigger, e),
    }
}

async fn poll_loop(engine: Arc<SyncEngine>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        sync_if_idle(&engine, "poll").await;
    }
}

async fn debounce_loop(
    engine: Arc<SyncEngine>,
    debounce: Duration,
    mut events: broadcast::Receiver<StoreEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let wait = deadline;
        let quiet = async move {
            match wait {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.is_local_mutation() => {
                    deadline = Some(Instant::now() + debounce);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    debug!("Debounce lagged by {} events", missed);
                    deadline = Some(Instant::now() + debounce);
                }
                Err(RecvError::Closed) => break,
            },
            _ = quiet => {
                deadline = None;
                sync_if_idle(&engine, "debounced").await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn credential_loop(engine: Arc<SyncEngine>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = shutdown.changed() => break,
        }
        match engine.check_credentials().await {
            Ok(true) => debug!("Remote credentials still valid"),
            Ok(false) => {}
            Err(e) => debug!("Credential check failed: {}", e),
        }
    }
}

async fn resume_loop(
    engine: Arc<SyncEngine>,
    fallback: Duration,
    stuck_threshold: Duration,
    mut signals: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            signal = signals.recv() => {
                if signal.is_none() {
                    break;
                }
            }
            _ = tokio::time::sleep(fallback) => {}
            _ = shutdown.changed() => break,
        }

        match engine.check_credentials().await {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => debug!("Credential check on resume failed: {}", e),
        }
        if engine.recover_if_stuck(stuck_threshold) {
            info!("Recovered a stuck sync on resume");
        }
        sync_if_idle(&engine, "resume").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientId;
    use crate::store::EntityStore;
    use crate::sync::remote::MemoryRemote;

    const CONTAINER: &str = "folio";
    const LONG: Duration = Duration::from_secs(3600);

    fn quiet_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: LONG,
            debounce: LONG,
            credential_refresh: None,
            resume_check: LONG,
            stuck_threshold: LONG,
            exit_timeout: Duration::from_secs(5),
        }
    }

    fn engine(remote: &Arc<MemoryRemote>) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(
            EntityStore::in_memory(ClientId::from("client-a")),
            remote.clone(),
            CONTAINER,
        ))
    }

    #[tokio::test]
    async fn test_poll_triggers_sync() {
        let remote = Arc::new(MemoryRemote::new());
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            ..quiet_config()
        };
        let scheduler = Scheduler::start(engine(&remote), config).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.shutdown().await;

        assert!(remote.fetch_count() >= 2);
    }

    #[tokio::test]
    async fn test_debounce_coalesces_edits() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(&remote);
        let config = SchedulerConfig {
            debounce: Duration::from_millis(60),
            ..quiet_config()
        };
        let scheduler = Scheduler::start(Arc::clone(&engine), config).await;

        let store = engine.store();
        let notebook = store.lock().await.create_notebook("Draft").unwrap();
        for name in ["One", "Two", "Three"] {
            tokio::time::sleep(Duration::from_millis(15)).await;
            store.lock().await.rename(&notebook.id, name).unwrap();
        }
        assert_eq!(remote.fetch_count(), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        scheduler.shutdown().await;

        assert_eq!(remote.fetch_count(), 1);
        let uploaded = remote.snapshot(CONTAINER).unwrap();
        assert_eq!(uploaded.notebook(&notebook.id).unwrap().name, "Three");
    }

    #[tokio::test]
    async fn test_no_automatic_sync_while_conflict_pending() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(&remote);
        engine.force_status(SyncStatus::Conflict);
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(10),
            ..quiet_config()
        };
        let scheduler = Scheduler::start(Arc::clone(&engine), config).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.shutdown().await;

        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_recovers_stuck_sync() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(&remote);
        let config = SchedulerConfig {
            stuck_threshold: Duration::ZERO,
            ..quiet_config()
        };
        let scheduler = Scheduler::start(Arc::clone(&engine), config).await;
        engine.force_status(SyncStatus::Syncing);

        scheduler.on_resume_foreground();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_resume_with_expired_token_suspends() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_token_valid(false);
        let engine = engine(&remote);
        let scheduler = Scheduler::start(Arc::clone(&engine), quiet_config()).await;

        scheduler.on_resume_foreground();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        assert_eq!(engine.status(), SyncStatus::Error);
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_exit_intent_flushes_dirty_state() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(&remote);
        let scheduler = Scheduler::start(Arc::clone(&engine), quiet_config()).await;
        let notebook = engine.store().lock().await.create_notebook("Last words").unwrap();

        assert!(scheduler.on_process_exit_intent().await);
        scheduler.shutdown().await;

        assert!(remote.snapshot(CONTAINER).unwrap().notebook(&notebook.id).is_some());
        assert!(!engine.store().lock().await.has_unsynced_changes());
    }

    #[tokio::test]
    async fn test_slow_exit_sync_still_settles_status() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Duration::from_millis(300));
        let engine = engine(&remote);
        let config = SchedulerConfig {
            exit_timeout: Duration::from_millis(100),
            ..quiet_config()
        };
        let scheduler = Scheduler::start(Arc::clone(&engine), config).await;
        let notebook = engine.store().lock().await.create_notebook("Late").unwrap();

        assert!(!scheduler.on_process_exit_intent().await);
        assert_eq!(engine.status(), SyncStatus::Syncing);

        // Lookup and write each take the full latency
        tokio::time::sleep(Duration::from_millis(700)).await;
        scheduler.shutdown().await;

        assert_eq!(engine.status(), SyncStatus::Idle);
        assert!(remote.snapshot(CONTAINER).unwrap().notebook(&notebook.id).is_some());
        assert!(!engine.store().lock().await.has_unsynced_changes());
    }

    #[tokio::test]
    async fn test_resume_recovers_from_error_once_token_is_valid() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_token_valid(false);
        let engine = engine(&remote);
        let scheduler = Scheduler::start(Arc::clone(&engine), quiet_config()).await;

        scheduler.on_resume_foreground();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status(), SyncStatus::Error);

        remote.set_token_valid(true);
        scheduler.on_resume_foreground();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        assert_eq!(engine.status(), SyncStatus::Idle);
        assert!(engine.last_error().is_none());
        assert_eq!(remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_exit_intent_without_changes_skips_sync() {
        let remote = Arc::new(MemoryRemote::new());
        let scheduler = Scheduler::start(engine(&remote), quiet_config()).await;

        assert!(scheduler.on_process_exit_intent().await);
        scheduler.shutdown().await;

        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let remote = Arc::new(MemoryRemote::new());
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(10),
            ..quiet_config()
        };
        let scheduler = Scheduler::start(engine(&remote), config).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await;

        let after_shutdown = remote.fetch_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.fetch_count(), after_shutdown);
    }
}
