//! Status command handler

use anyhow::Result;

use super::Session;
use crate::output::{Output, OutputFormat};

/// Show local store and sync status
pub async fn show(session: &Session, output: &Output) -> Result<()> {
    let config = &session.config;
    let store = session.store.lock().await;
    let snapshot = store.snapshot();

    let sync_status = session.engine.as_ref().map(|e| e.status());
    let last_error = session.engine.as_ref().and_then(|e| e.last_error());
    let remote = config
        .remote_url
        .clone()
        .or_else(|| config.remote_dir.as_ref().map(|d| d.display().to_string()));

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "client_id": store.client_id(),
                    "data_dir": config.data_dir,
                    "sync": {
                        "enabled": config.sync_enabled,
                        "remote": remote,
                        "container_id": config.container_id,
                        "status": sync_status,
                        "last_error": last_error,
                    },
                    "counts": {
                        "notebooks": snapshot.notebooks.len(),
                        "folders": snapshot.folders.len(),
                        "pages": snapshot.pages.len(),
                        "deleted": snapshot.deleted_item_ids.len(),
                        "unsynced": store.dirty_count(),
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", store.client_id());
        }
        OutputFormat::Human => {
            println!("Folio Status");
            println!("============");
            println!();
            println!("Client ID: {}", store.client_id());
            println!();
            println!("Sync:");
            println!(
                "  Enabled:   {}",
                if config.sync_enabled { "yes" } else { "no" }
            );
            println!("  Remote:    {}", remote.as_deref().unwrap_or("(not set)"));
            println!("  Container: {}", config.container_id);
            if let Some(status) = sync_status {
                println!("  Status:    {}", status);
            }
            if let Some(ref err) = last_error {
                println!("  Error:     {}", err);
            }
            println!();
            println!("Storage:");
            println!("  Location: {}", config.store_path().display());
            println!();
            println!("Contents:");
            println!("  Notebooks: {}", snapshot.notebooks.len());
            println!("  Folders:   {}", snapshot.folders.len());
            println!("  Pages:     {}", snapshot.pages.len());
            println!("  Unsynced:  {}", store.dirty_count());
        }
    }

    Ok(())
}
