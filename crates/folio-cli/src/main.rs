//! Folio CLI
//!
//! Command-line interface for Folio - local-first notebooks with
//! snapshot sync.

use std::fs::File;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use folio_core::sync::ConflictChoice;
use folio_core::{Config, EntityStore, Identity};

mod commands;
mod editor;
mod output;

use commands::Session;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Folio - Local-first notebooks with sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug output to stderr (or the configured log file)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Folio (generate this client's id)
    Init,
    /// Show status (client id, counts, sync state)
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage notebooks
    Notebook {
        #[command(subcommand)]
        command: NotebookCommands,
    },
    /// Manage folders
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// Manage pages
    Page {
        #[command(subcommand)]
        command: PageCommands,
    },
    /// Make a notebook or page the active one
    Open {
        /// Notebook or page ID (full or prefix)
        id: String,
    },
    /// Sync with the remote store
    Sync {
        /// Run even if a pass looks like it is already running
        #[arg(short, long)]
        force: bool,
    },
    /// List unresolved conflicts
    Conflicts,
    /// Resolve all conflicts by keeping one side
    Resolve {
        /// Which copies to keep: local or remote
        choice: ConflictChoice,
    },
    /// Keep syncing in the background until Ctrl-C
    Watch,
    /// Disconnect from the remote store
    Logout {
        /// Also delete the remote snapshot
        #[arg(long)]
        purge: bool,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (see `folio config show`)
        key: String,
        /// Configuration value ("none" clears optional values)
        value: String,
    },
}

#[derive(Subcommand)]
enum NotebookCommands {
    /// Create a notebook
    #[command(alias = "create")]
    Add {
        /// Notebook name
        name: String,
        /// Color (any CSS color string)
        #[arg(short, long)]
        color: Option<String>,
    },
    /// List notebooks in order
    #[command(alias = "ls")]
    List,
    /// Show a notebook's folders and pages
    Show {
        /// Notebook ID (full or prefix)
        id: String,
    },
    /// Rename a notebook, folder or page
    Rename {
        /// ID (full or prefix)
        id: String,
        /// New name
        name: String,
    },
    /// Set or clear a color ("none" clears)
    Color {
        /// Notebook, folder or page ID (full or prefix)
        id: String,
        /// Color value
        color: String,
    },
    /// Move a notebook to a position (0-based)
    Reorder {
        /// Notebook ID (full or prefix)
        id: String,
        /// New position
        #[arg(value_parser = clap::value_parser!(i64).range(0..))]
        position: i64,
    },
    /// Delete a notebook with everything in it
    #[command(alias = "rm")]
    Delete {
        /// Notebook ID (full or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum FolderCommands {
    /// Create a folder
    #[command(alias = "create")]
    Add {
        /// Folder name
        name: String,
        /// Notebook to create it in (defaults to the active notebook)
        #[arg(short, long)]
        notebook: Option<String>,
        /// Parent folder
        #[arg(long = "in")]
        parent: Option<String>,
    },
    /// Move a folder
    Mv {
        /// Folder ID (full or prefix)
        id: String,
        /// Destination notebook
        #[arg(short, long)]
        notebook: Option<String>,
        /// Destination parent folder
        #[arg(long = "in")]
        parent: Option<String>,
    },
    /// Delete a folder with everything in it
    #[command(alias = "rm")]
    Delete {
        /// Folder ID (full or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum PageCommands {
    /// Create a page
    #[command(alias = "create")]
    Add {
        /// Page name
        name: String,
        /// Notebook to create it in (defaults to the active notebook)
        #[arg(short, long)]
        notebook: Option<String>,
        /// Folder to create it in
        #[arg(short, long)]
        folder: Option<String>,
    },
    /// List pages
    #[command(alias = "ls")]
    List {
        /// Only pages in this notebook
        #[arg(short, long)]
        notebook: Option<String>,
    },
    /// Show a page with its content
    Show {
        /// Page ID (full or prefix)
        id: String,
    },
    /// Edit page content
    Edit {
        /// Page ID (full or prefix)
        id: String,
        /// New text (opens editor if not provided)
        #[arg(short, long)]
        text: Option<String>,
    },
    /// Move a page
    Mv {
        /// Page ID (full or prefix)
        id: String,
        /// Destination notebook
        #[arg(short, long)]
        notebook: Option<String>,
        /// Destination folder
        #[arg(short, long)]
        folder: Option<String>,
    },
    /// Delete a page
    #[command(alias = "rm")]
    Delete {
        /// Page ID (full or prefix)
        id: String,
    },
}

impl Commands {
    /// Commands that change the store push their changes afterwards
    fn is_write(&self) -> bool {
        match self {
            Commands::Notebook { command } => !matches!(
                command,
                NotebookCommands::List | NotebookCommands::Show { .. }
            ),
            Commands::Folder { .. } | Commands::Open { .. } => true,
            Commands::Page { command } => !matches!(
                command,
                PageCommands::List { .. } | PageCommands::Show { .. }
            ),
            _ => false,
        }
    }

    /// Commands that run sync themselves
    fn is_sync(&self) -> bool {
        matches!(
            self,
            Commands::Sync { .. }
                | Commands::Conflicts
                | Commands::Resolve { .. }
                | Commands::Watch
                | Commands::Logout { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Commands that don't need the store
    match &cli.command {
        Commands::Config { command } => {
            return handle_config_command(command.clone(), &output);
        }
        Commands::Init => return handle_init_command(&output),
        _ => {}
    }

    let config = Config::load()?;
    init_logging(&config, cli.verbose);

    let session = Session::open(config)?;
    let command = cli.command;

    // Sync before read commands (to get latest data)
    if !command.is_write() && !command.is_sync() {
        session.auto_sync(&output).await;
    }

    let is_write = command.is_write();
    let result = match command {
        Commands::Init | Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Status => commands::status::show(&session, &output).await,
        Commands::Sync { force } => commands::sync::sync(session.engine()?, force, &output).await,
        Commands::Conflicts => commands::sync::conflicts(session.engine()?, &output).await,
        Commands::Resolve { choice } => {
            commands::sync::resolve(session.engine()?, choice, &output).await
        }
        Commands::Watch => {
            let engine = Arc::clone(session.engine()?);
            commands::sync::watch(engine, &session.config, &output).await
        }
        Commands::Logout { purge } => {
            commands::sync::logout(session.engine()?, purge, &output).await
        }
        other => {
            let mut store = session.store.lock().await;
            handle_store_command(other, &mut store, &output)
        }
    };

    // Sync after write commands (to push changes)
    if is_write && result.is_ok() {
        session.auto_sync(&output).await;
    }

    result
}

fn handle_store_command(command: Commands, store: &mut EntityStore, output: &Output) -> Result<()> {
    match command {
        Commands::Notebook { command } => handle_notebook_command(command, store, output),
        Commands::Folder { command } => handle_folder_command(command, store, output),
        Commands::Page { command } => handle_page_command(command, store, output),
        Commands::Open { id } => commands::page::open(store, id, output),
        _ => unreachable!(), // Dispatched in main
    }
}

fn handle_notebook_command(
    command: NotebookCommands,
    store: &mut EntityStore,
    output: &Output,
) -> Result<()> {
    match command {
        NotebookCommands::Add { name, color } => {
            commands::notebook::add(store, name, color, output)
        }
        NotebookCommands::List => commands::notebook::list(store, output),
        NotebookCommands::Show { id } => commands::notebook::show(store, id, output),
        NotebookCommands::Rename { id, name } => {
            commands::notebook::rename(store, id, name, output)
        }
        NotebookCommands::Color { id, color } => {
            let color = (color != "none" && !color.is_empty()).then_some(color);
            commands::notebook::color(store, id, color, output)
        }
        NotebookCommands::Reorder { id, position } => {
            commands::notebook::reorder(store, id, position, output)
        }
        NotebookCommands::Delete { id } => commands::notebook::delete(store, id, output),
    }
}

fn handle_folder_command(
    command: FolderCommands,
    store: &mut EntityStore,
    output: &Output,
) -> Result<()> {
    match command {
        FolderCommands::Add {
            name,
            notebook,
            parent,
        } => commands::folder::add(store, name, notebook, parent, output),
        FolderCommands::Mv {
            id,
            notebook,
            parent,
        } => commands::folder::mv(store, id, notebook, parent, output),
        FolderCommands::Delete { id } => commands::folder::delete(store, id, output),
    }
}

fn handle_page_command(command: PageCommands, store: &mut EntityStore, output: &Output) -> Result<()> {
    match command {
        PageCommands::Add {
            name,
            notebook,
            folder,
        } => commands::page::add(store, name, notebook, folder, output),
        PageCommands::List { notebook } => commands::page::list(store, notebook, output),
        PageCommands::Show { id } => commands::page::show(store, id, output),
        PageCommands::Edit { id, text } => commands::page::edit(store, id, text, output),
        PageCommands::Mv {
            id,
            notebook,
            folder,
        } => commands::page::mv(store, id, notebook, folder, output),
        PageCommands::Delete { id } => commands::page::delete(store, id, output),
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

fn handle_init_command(output: &Output) -> Result<()> {
    let identity = Identity::new()?;

    if let Some(client_id) = identity.client_id()? {
        if output.is_json() {
            println!(
                "{}",
                serde_json::json!({ "client_id": client_id, "is_new": false })
            );
        } else if output.is_quiet() {
            println!("{}", client_id);
        } else {
            println!();
            println!("Already initialized.");
            println!("Client ID: {}", client_id);
            println!();
            println!("To start fresh, remove:");
            println!("  {}", identity.data_dir().display());
        }
        return Ok(());
    }

    let result = identity.initialize()?;

    if output.is_json() {
        println!(
            "{}",
            serde_json::json!({ "client_id": result.client_id, "is_new": result.is_new })
        );
    } else if output.is_quiet() {
        println!("{}", result.client_id);
    } else {
        println!();
        println!("Initialized Folio.");
        println!();
        println!("Client ID: {}", result.client_id);
        println!("Data is stored in: {}", identity.data_dir().display());
        println!();
        let config = Config::load()?;
        if !config.has_remote() {
            println!("No remote store configured. Your data stays local until you set one:");
            println!("  folio config set remote_dir /path/to/shared/folder");
            println!("  folio config set sync_enabled true");
        }
    }

    Ok(())
}

/// Set up logging
///
/// Enabled by `FOLIO_LOG=<level>` or `--verbose`. Logs go to the configured
/// `log_file` when set, otherwise to stderr.
fn init_logging(config: &Config, verbose: bool) {
    let log_level = match std::env::var("FOLIO_LOG") {
        Ok(level) => level,
        Err(_) if verbose => "debug".to_string(),
        Err(_) => return,
    };

    let env_filter = EnvFilter::new(format!("folio_core={},folio_cli={}", log_level, log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore the error if a subscriber is already installed
    match &config.log_file {
        Some(path) => match File::create(path) {
            Ok(file) => {
                let _ = builder.with_ansi(false).with_writer(file).try_init();
            }
            Err(e) => {
                eprintln!("Warning: Could not create log file {:?}: {}", path, e);
            }
        },
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
