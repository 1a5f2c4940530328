//! Folder command handlers

use anyhow::{Context, Result};

use folio_core::{EntityKind, EntityStore};

use super::{placement, resolve_id};
use crate::editor::confirm;
use crate::output::{short_id, Output};

/// Create a folder in a notebook or inside another folder
pub fn add(
    store: &mut EntityStore,
    name: String,
    notebook: Option<String>,
    parent: Option<String>,
    output: &Output,
) -> Result<()> {
    let placement = placement(store, notebook.as_deref(), parent.as_deref())?;
    let folder = store
        .create_folder(&name, placement)
        .context("Failed to create folder")?;

    if output.is_quiet() {
        println!("{}", folder.id);
    } else {
        output.success(&format!("Created folder {} ({})", folder.name, short_id(&folder.id)));
    }
    Ok(())
}

/// Move a folder (and everything under it)
pub fn mv(
    store: &mut EntityStore,
    id: String,
    notebook: Option<String>,
    parent: Option<String>,
    output: &Output,
) -> Result<()> {
    let id = resolve_id(store, &id, Some(EntityKind::Folder))?;
    let placement = placement(store, notebook.as_deref(), parent.as_deref())?;
    store
        .move_entity(&id, placement)
        .context("Failed to move folder")?;
    output.success(&format!("Moved folder {}", short_id(&id)));
    Ok(())
}

/// Delete a folder with its nested folders and pages
pub fn delete(store: &mut EntityStore, id: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, Some(EntityKind::Folder))?;
    let folder = store
        .folder(&id)
        .ok_or_else(|| anyhow::anyhow!("Folder not found: {}", id))?;

    if output.should_prompt() {
        println!("Delete folder: {} - {}", short_id(&folder.id), folder.name);
        if !confirm("Delete it with everything inside?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = store.delete(&id).context("Failed to delete folder")?;
    output.success(&format!(
        "Deleted folder {} ({} item(s) removed)",
        short_id(&id),
        removed.len()
    ));
    Ok(())
}
