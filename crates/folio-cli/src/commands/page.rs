//! Page command handlers
//!
//! Page content is an opaque JSON value owned by the canvas. From the
//! command line it is edited either as plain text (stored as
//! `{"text": ...}`) or as raw JSON in the editor.

use anyhow::{bail, Context, Result};
use serde_json::Value;

use folio_core::{EntityKind, EntityStore, Page};

use super::{placement, resolve_id};
use crate::editor::{confirm, edit_text};
use crate::output::{short_id, Output};

/// Create an empty page
pub fn add(
    store: &mut EntityStore,
    name: String,
    notebook: Option<String>,
    folder: Option<String>,
    output: &Output,
) -> Result<()> {
    let placement = placement(store, notebook.as_deref(), folder.as_deref())?;
    let page = store
        .create_page(&name, placement)
        .context("Failed to create page")?;

    if output.is_quiet() {
        println!("{}", page.id);
    } else {
        output.success(&format!("Created page {} ({})", page.name, short_id(&page.id)));
    }
    Ok(())
}

/// List pages, optionally limited to one notebook
pub fn list(store: &EntityStore, notebook: Option<String>, output: &Output) -> Result<()> {
    let mut pages: Vec<&Page> = match notebook {
        Some(notebook) => {
            let id = resolve_id(store, &notebook, Some(EntityKind::Notebook))?;
            store.pages_in(&id)
        }
        None => store.snapshot().pages.values().collect(),
    };
    pages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    output.print_pages(&pages);
    Ok(())
}

/// Show a page with its content
pub fn show(store: &EntityStore, id: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, Some(EntityKind::Page))?;
    let page = store
        .page(&id)
        .ok_or_else(|| anyhow::anyhow!("Page not found: {}", id))?;
    let color = store.resolved_color(&id);
    output.print_page(page, color.as_deref());
    Ok(())
}

/// Replace a page's content
///
/// With `text` the content becomes `{"text": text}`. Without it the content
/// opens in the editor: as plain text when it is a text page, as JSON
/// otherwise.
pub fn edit(store: &mut EntityStore, id: String, text: Option<String>, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, Some(EntityKind::Page))?;
    let current = store
        .page(&id)
        .ok_or_else(|| anyhow::anyhow!("Page not found: {}", id))?
        .content
        .clone();

    let content = match text {
        Some(text) => text_content(&text),
        None => edit_content(&current)?,
    };

    if content == current {
        output.message("No changes made.");
        return Ok(());
    }

    store
        .set_page_content(&id, content)
        .context("Failed to save page")?;
    output.success(&format!("Updated page {}", short_id(&id)));
    Ok(())
}

fn text_content(text: &str) -> Value {
    serde_json::json!({ "text": text })
}

fn as_text(content: &Value) -> Option<&str> {
    match content {
        Value::Null => Some(""),
        Value::Object(map) if map.len() == 1 => map.get("text").and_then(Value::as_str),
        _ => None,
    }
}

fn edit_content(current: &Value) -> Result<Value> {
    if let Some(text) = as_text(current) {
        let edited = edit_text(text, "md").context("Failed to edit page")?;
        return Ok(text_content(edited.trim_end()));
    }

    let initial = serde_json::to_string_pretty(current)?;
    let edited = edit_text(&initial, "json").context("Failed to edit page")?;
    serde_json::from_str(&edited).context("Edited content is not valid JSON")
}

/// Move a page to a notebook or folder
pub fn mv(
    store: &mut EntityStore,
    id: String,
    notebook: Option<String>,
    folder: Option<String>,
    output: &Output,
) -> Result<()> {
    if notebook.is_none() && folder.is_none() {
        bail!("Pass --notebook <id> or --folder <id> to choose the destination");
    }
    let id = resolve_id(store, &id, Some(EntityKind::Page))?;
    let placement = placement(store, notebook.as_deref(), folder.as_deref())?;
    store.move_entity(&id, placement).context("Failed to move page")?;
    output.success(&format!("Moved page {}", short_id(&id)));
    Ok(())
}

/// Make a notebook or page the active one
///
/// Opening a page also makes its notebook active.
pub fn open(store: &mut EntityStore, id: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, None)?;
    let (notebook_id, page_id) = match store.page(&id) {
        Some(page) => (page.notebook_id.clone(), Some(page.id.clone())),
        None if store.notebook(&id).is_some() => (id.clone(), None),
        None => bail!("Only notebooks and pages can be opened"),
    };

    store.set_active(Some(notebook_id), page_id)?;
    output.success(&format!("Opened {}", short_id(&id)));
    Ok(())
}

/// Delete a page
pub fn delete(store: &mut EntityStore, id: String, output: &Output) -> Result<()> {
    let id = resolve_id(store, &id, Some(EntityKind::Page))?;
    let page = store
        .page(&id)
        .ok_or_else(|| anyhow::anyhow!("Page not found: {}", id))?;

    if output.should_prompt() {
        println!("Delete page: {} - {}", short_id(&page.id), page.name);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.delete(&id).context("Failed to delete page")?;
    output.success(&format!("Deleted page {}", short_id(&id)));
    Ok(())
}
