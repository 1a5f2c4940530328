//! Interactive helpers: editing page content in $EDITOR and asking before
//! destructive commands.

use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::process::Command;

const FALLBACK_EDITORS: [&str; 4] = ["nano", "vim", "vi", "notepad"];

/// Edit `initial` in the user's editor and return the saved text
///
/// `extension` is the temp file suffix, so editors pick the right syntax.
/// Editor commands with arguments (`code --wait`) are supported.
pub fn edit_text(initial: &str, extension: &str) -> Result<String> {
    let command = find_editor()?;
    let mut parts = command.split_whitespace();
    let program = parts.next().context("Editor command is empty")?;

    let mut file = tempfile::Builder::new()
        .prefix("folio-page-")
        .suffix(&format!(".{}", extension))
        .tempfile()
        .context("Failed to create temp file for editing")?;
    file.write_all(initial.as_bytes())?;
    file.flush()?;

    let status = Command::new(program)
        .args(parts)
        .arg(file.path())
        .status()
        .with_context(|| format!("Failed to run editor: {}", command))?;

    if !status.success() {
        bail!(
            "Editor '{}' exited with {}. Nothing was saved.",
            command,
            status
        );
    }

    // The editor may have replaced the file, so read it back by path
    fs::read_to_string(file.path()).context("Failed to read edited content")
}

fn find_editor() -> Result<String> {
    if let Some(editor) = editor_from_env(|key| env::var(key).ok()) {
        return Ok(editor);
    }

    match FALLBACK_EDITORS.iter().find(|e| command_exists(e)) {
        Some(editor) => Ok(editor.to_string()),
        None => bail!(
            "No editor found. Set $EDITOR, e.g.\n  export EDITOR=nano\n\
             or pass the content directly with --text."
        ),
    }
}

/// First non-blank of $VISUAL and $EDITOR
fn editor_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ["VISUAL", "EDITOR"]
        .into_iter()
        .filter_map(lookup)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Ask a yes/no question; anything but yes is a no
///
/// Without a terminal on stdin nobody can answer, so the answer is no.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
