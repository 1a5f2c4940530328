//! Notebook command handlers

use anyhow::{bail, Context, Result};

use folio_core::{EntityKind, EntityStore};

use super::resolve_id;
use crate::editor::confirm;
use crate::output::{short_id, Output};

/// Create a new notebook at the end of the list
pub fn add(store: &mut EntityStore, name: String, color: Option<String>, output: &Output) -> Result<()> {
    let notebook = store
        .create_notebook(&name)
        .context("Failed to create notebook")?;
    if color.is_some() {
        store.set_color(&notebook.id, color)?;
    }

    if output.is_quiet() {
        println!("{}", notebook.id);
    } else {
        output.success(&format!(
            "Created notebook {} ({})",
            notebook.name,
            short_id(&notebook.id)
        ));
    }
    Ok(())
}

/// List all notebooks
pub fn list(store: &EntityStore, output: &Output) -> Result<()> {
    let notebooks = store.notebooks();
    output.print_notebooks(store, &notebooks);
    Ok(())
}

/// Show a notebook's folder tree
pub fn show(store: &EntityStore, id: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, Some(EntityKind::Notebook))?;
    let notebook = store
        .notebook(&id)
        .ok_or_else(|| anyhow::anyhow!("Notebook not found: {}", id))?;
    output.print_tree(store, notebook);
    Ok(())
}

/// Rename any notebook, folder or page
pub fn rename(store: &mut EntityStore, id: String, name: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, None)?;
    store.rename(&id, &name).context("Failed to rename")?;
    output.success(&format!("Renamed {} to {}", short_id(&id), name));
    Ok(())
}

/// Set or clear the color of a notebook, folder or page
pub fn color(store: &mut EntityStore, id: String, color: Option<String>, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, None)?;
    store.set_color(&id, color.clone())?;
    match color {
        Some(c) => output.success(&format!("Set color of {} to {}", short_id(&id), c)),
        None => output.success(&format!("{} now inherits its color", short_id(&id))),
    }
    Ok(())
}

/// Move a notebook to a new position in the list
///
/// Positions past the end move the notebook to the end.
pub fn reorder(store: &mut EntityStore, id: String, position: i64, output: &Output) -> Result<()> {
    let Ok(index) = usize::try_from(position) else {
        bail!("Position must be 0 or greater, got {}", position);
    };
    let id = resolve_id(store, &id, Some(EntityKind::Notebook))?;
    let mut ids: Vec<String> = store
        .notebooks()
        .into_iter()
        .map(|n| n.id.clone())
        .filter(|n| *n != id)
        .collect();
    let index = index.min(ids.len());
    ids.insert(index, id.clone());

    // Only renumber notebooks whose key actually changes
    for (order, notebook_id) in (0_i64..).zip(&ids) {
        if store.notebook(notebook_id).map(|n| n.order) != Some(order) {
            store.set_order(notebook_id, order)?;
        }
    }

    output.success(&format!("Moved notebook {} to position {}", short_id(&id), index));
    Ok(())
}

/// Delete a notebook and everything in it
pub fn delete(store: &mut EntityStore, id: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, Some(EntityKind::Notebook))?;
    let notebook = store
        .notebook(&id)
        .ok_or_else(|| anyhow::anyhow!("Notebook not found: {}", id))?;

    if output.should_prompt() {
        println!(
            "Delete notebook: {} - {} ({} folder(s), {} page(s))",
            short_id(&notebook.id),
            notebook.name,
            store.folders_in(&id).len(),
            store.pages_in(&id).len()
        );
        if !confirm("Are you sure? This cannot be undone on any device.")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = store.delete(&id).context("Failed to delete notebook")?;
    output.success(&format!(
        "Deleted notebook {} ({} item(s) removed)",
        short_id(&id),
        removed.len()
    ));
    Ok(())
}
