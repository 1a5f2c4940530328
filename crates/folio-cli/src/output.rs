//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use folio_core::sync::{PendingConflict, SyncReport, SyncStatus};
use folio_core::{EntityStore, Folder, Notebook, Page};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize output: {}", e),
        }
    }

    /// Print the notebook list
    pub fn print_notebooks(&self, store: &EntityStore, notebooks: &[&Notebook]) {
        match self.format {
            OutputFormat::Human => {
                if notebooks.is_empty() {
                    println!("No notebooks yet. Create one with `folio notebook add <name>`.");
                    return;
                }
                for notebook in notebooks {
                    println!(
                        "{}{} | {} | {} folder(s), {} page(s){}",
                        short_id(&notebook.id),
                        dirty_marker(notebook.dirty),
                        truncate(&notebook.name, 35),
                        store.folders_in(&notebook.id).len(),
                        store.pages_in(&notebook.id).len(),
                        color_suffix(notebook.color.as_deref())
                    );
                }
                println!("\n{} notebook(s)", notebooks.len());
            }
            OutputFormat::Json => self.json(notebooks),
            OutputFormat::Quiet => {
                for notebook in notebooks {
                    println!("{}", notebook.id);
                }
            }
        }
    }

    /// Print one notebook with its folder tree and pages
    pub fn print_tree(&self, store: &EntityStore, notebook: &Notebook) {
        let folders = store.folders_in(&notebook.id);
        let mut pages = store.pages_in(&notebook.id);
        pages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        match self.format {
            OutputFormat::Human => {
                println!(
                    "{}{} {}",
                    short_id(&notebook.id),
                    dirty_marker(notebook.dirty),
                    notebook.name
                );
                print_level(&folders, &pages, None, 1);
            }
            OutputFormat::Json => self.json(&serde_json::json!({
                "notebook": notebook,
                "folders": folders,
                "pages": pages,
            })),
            OutputFormat::Quiet => {
                for folder in &folders {
                    println!("{}", folder.id);
                }
                for page in &pages {
                    println!("{}", page.id);
                }
            }
        }
    }

    /// Print a flat list of pages
    pub fn print_pages(&self, pages: &[&Page]) {
        match self.format {
            OutputFormat::Human => {
                if pages.is_empty() {
                    println!("No pages found.");
                    return;
                }
                for page in pages {
                    println!(
                        "{}{} | {} | v{}",
                        short_id(&page.id),
                        dirty_marker(page.dirty),
                        truncate(&page.name, 45),
                        page.version
                    );
                }
                println!("\n{} page(s)", pages.len());
            }
            OutputFormat::Json => self.json(pages),
            OutputFormat::Quiet => {
                for page in pages {
                    println!("{}", page.id);
                }
            }
        }
    }

    /// Print a single page with its content
    pub fn print_page(&self, page: &Page, color: Option<&str>) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", page.id);
                println!("Name:     {}", page.name);
                println!("Notebook: {}", page.notebook_id);
                if let Some(ref parent) = page.parent_id {
                    println!("Folder:   {}", parent);
                }
                println!("Color:    {}", color.unwrap_or("(none)"));
                println!(
                    "Version:  {}{}",
                    page.version,
                    if page.dirty { " (unsynced changes)" } else { "" }
                );
                println!("Modified: {}", page.last_modifier);
                if !page.content.is_null() {
                    println!();
                    println!("{}", content_preview(&page.content));
                }
            }
            OutputFormat::Json => self.json(page),
            OutputFormat::Quiet => println!("{}", page.id),
        }
    }

    /// Print the outcome of a sync pass
    pub fn print_sync_report(&self, report: &SyncReport) {
        match self.format {
            OutputFormat::Human => {
                if !report.ran() {
                    println!("Sync already in progress or paused; nothing done.");
                    return;
                }
                if report.adopted.is_empty()
                    && report.pushed.is_empty()
                    && report.deleted.is_empty()
                    && report.conflicts.is_empty()
                {
                    println!("✓ Already up to date");
                    return;
                }
                println!("✓ Sync complete");
                println!("  Received: {}", report.adopted.len());
                println!("  Sent:     {}", report.pushed.len());
                println!("  Deleted:  {}", report.deleted.len());
                if !report.conflicts.is_empty() {
                    println!();
                    println!(
                        "⚠ {} conflicting change(s). Review with `folio conflicts`.",
                        report.conflicts.len()
                    );
                }
            }
            OutputFormat::Json => self.json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print both sides of a held conflict
    pub fn print_conflicts(&self, conflict: Option<&PendingConflict>) {
        let entries = conflict.map(|c| c.entries()).unwrap_or_default();
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("No conflicts.");
                    return;
                }
                for entry in &entries {
                    println!("{} {} ({})", entry.kind, short_id(&entry.id), entry.id);
                    println!(
                        "  local:  {} (v{})",
                        entry.local.name(),
                        entry.local.version()
                    );
                    println!(
                        "  remote: {} (v{}, by {})",
                        entry.remote.name(),
                        entry.remote.version(),
                        entry.remote.last_modifier()
                    );
                }
                println!();
                println!("Keep one side for all of them with `folio resolve local` or `folio resolve remote`.");
            }
            OutputFormat::Json => {
                let json: Vec<_> = entries
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "id": e.id,
                            "kind": e.kind.to_string(),
                            "local": { "name": e.local.name(), "version": e.local.version() },
                            "remote": {
                                "name": e.remote.name(),
                                "version": e.remote.version(),
                                "lastModifier": e.remote.last_modifier(),
                            },
                        })
                    })
                    .collect();
                self.json(&json);
            }
            OutputFormat::Quiet => {
                for entry in &entries {
                    println!("{}", entry.id);
                }
            }
        }
    }

    /// Print a sync status transition (watch mode)
    pub fn print_status_change(&self, status: SyncStatus) {
        match self.format {
            OutputFormat::Human => println!("sync: {}", status),
            OutputFormat::Json => println!("{}", serde_json::json!({ "status": status })),
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_level(folders: &[&Folder], pages: &[&Page], parent: Option<&str>, depth: usize) {
    let indent = "  ".repeat(depth);
    for folder in folders.iter().filter(|f| f.parent_id.as_deref() == parent) {
        println!(
            "{}{}{} {}/",
            indent,
            short_id(&folder.id),
            dirty_marker(folder.dirty),
            folder.name
        );
        print_level(folders, pages, Some(&folder.id), depth + 1);
    }
    for page in pages.iter().filter(|p| p.parent_id.as_deref() == parent) {
        println!(
            "{}{}{} {}",
            indent,
            short_id(&page.id),
            dirty_marker(page.dirty),
            page.name
        );
    }
}

/// First 8 characters of an id
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn dirty_marker(dirty: bool) -> &'static str {
    if dirty {
        "*"
    } else {
        " "
    }
}

fn color_suffix(color: Option<&str>) -> String {
    match color {
        Some(c) => format!(" [{}]", c),
        None => String::new(),
    }
}

/// Readable form of page content: plain text when it is a `{"text": ...}` object
fn content_preview(content: &serde_json::Value) -> String {
    match content.get("text").and_then(|t| t.as_str()) {
        Some(text) => text.to_string(),
        None => serde_json::to_string_pretty(content).unwrap_or_default(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
