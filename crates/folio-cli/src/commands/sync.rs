//! Sync command handlers
//!
//! Conflicts live in the engine's memory, so a fresh process first runs a
//! pass to detect them again before listing or resolving.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use folio_core::sync::{ConflictChoice, Scheduler, SchedulerConfig, SyncEngine, SyncError};
use folio_core::Config;

use crate::output::Output;

fn explain(err: SyncError) -> anyhow::Error {
    match err {
        SyncError::AuthExpired => anyhow::anyhow!(
            "{}\nUpdate the token with:\n  folio config set remote_token <token>",
            err
        ),
        other => other.into(),
    }
}

/// Run one sync pass now
pub async fn sync(engine: &SyncEngine, force: bool, output: &Output) -> Result<()> {
    if !engine.is_enabled() {
        bail!("Sync is disabled. Enable it with:\n  folio config set sync_enabled true");
    }

    output.message("Syncing...");
    let report = engine.sync(force).await.map_err(explain)?;
    output.print_sync_report(&report);
    Ok(())
}

/// List conflicting changes
pub async fn conflicts(engine: &SyncEngine, output: &Output) -> Result<()> {
    engine.sync(true).await.map_err(explain)?;
    let pending = engine.pending_conflict().await;
    output.print_conflicts(pending.as_ref());
    Ok(())
}

/// Resolve all conflicts by keeping one side
pub async fn resolve(engine: &SyncEngine, choice: ConflictChoice, output: &Output) -> Result<()> {
    engine.sync(true).await.map_err(explain)?;
    if engine.pending_conflict().await.is_none() {
        output.message("No conflicts to resolve.");
        return Ok(());
    }

    let report = engine.resolve_conflict(choice).await.map_err(explain)?;
    output.success(&format!("Kept {} copies", choice));
    output.print_sync_report(&report);
    Ok(())
}

/// Disconnect from the remote store
///
/// Clears the stored token and disables sync. With `purge` the remote
/// snapshot is deleted too.
pub async fn logout(engine: &SyncEngine, purge: bool, output: &Output) -> Result<()> {
    engine.logout(purge).await.map_err(explain)?;

    let mut config = Config::load().context("Failed to load configuration")?;
    config.sync_enabled = false;
    config.remote_token = None;
    config.save().context("Failed to save configuration")?;

    if purge {
        output.success("Logged out and removed remote data");
    } else {
        output.success("Logged out; local data kept");
    }
    Ok(())
}

/// Keep syncing in the background until Ctrl-C
///
/// Ctrl-C counts as the intent to exit: unsynced changes get one last
/// forced sync before the scheduler stops.
pub async fn watch(engine: Arc<SyncEngine>, config: &Config, output: &Output) -> Result<()> {
    if !engine.is_enabled() {
        bail!("Sync is disabled. Enable it with:\n  folio config set sync_enabled true");
    }

    let scheduler = Scheduler::start(Arc::clone(&engine), SchedulerConfig::from_config(config)).await;
    let mut status = engine.subscribe_status();
    output.message(&format!(
        "Watching for changes (every {}s). Press Ctrl-C to stop.",
        config.poll_interval_secs
    ));

    // First pass right away instead of waiting for the poll interval
    scheduler.on_resume_foreground();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                output.print_status_change(current);
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    info!("Exit requested, flushing unsynced changes");
    let flushed = scheduler.on_process_exit_intent().await;
    scheduler.shutdown().await;

    if flushed {
        output.success("All changes synced");
    } else {
        output.message("Some changes are still unsynced; they will go out on the next sync.");
    }
    Ok(())
}
