use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use dynamic_search::{
    extract_blocks, insert_default_block, on_config_block, FsVault, HostContext, NoteCreator,
    Settings, Vault, WidgetView,
};

#[derive(Parser)]
#[command(name = "dynamic-search", version, about = "Search and create notes from dynamicsearch blocks")]
struct Cli {
    /// JSON file with default title, sort policy and categories
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the first block of a note and print its results
    Search {
        #[arg(long)]
        vault: PathBuf,
        /// Vault-relative path of the note hosting the block
        #[arg(long)]
        note: String,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// Keep running and print the list again whenever the vault changes
        #[arg(long)]
        watch: bool,
        #[arg(long)]
        json: bool,
    },
    /// Create a note through one of the block's buttons
    Create {
        #[arg(long)]
        vault: PathBuf,
        #[arg(long)]
        note: String,
        /// Zero-based index of the category (button)
        #[arg(long, default_value_t = 0)]
        category: usize,
        #[arg(long)]
        name: String,
    },
    /// Print a block built from the default settings
    InsertBlock,
}

fn print_view(view: &WidgetView, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(view)?);
        return Ok(());
    }

    println!("{}  [{}]", view.title, view.counter);
    for button in &view.buttons {
        println!("  ({}) {}", button.index, button.label);
    }
    if !view.tags.is_empty() {
        println!("  tags: {}", view.tags.join(" "));
    }
    for item in &view.items {
        let marker = if item.is_backlink { " 🔗" } else { "" };
        println!("- {}{}  ({})", item.basename, marker, item.path);
        if let Some(preview) = &item.preview {
            println!("    {}", preview);
        }
    }
    if let Some(message) = &view.empty_message {
        println!("  {}", message);
    }
    Ok(())
}

async fn host_for(vault: &FsVault, note: &str, settings: Settings) -> Result<(String, HostContext)> {
    let Some(doc) = vault.document(note).await else {
        bail!("Note not found: {}", note);
    };
    let content = vault
        .read(&doc)
        .await
        .with_context(|| format!("Failed to read {}", note))?;
    let source = extract_blocks(&content).into_iter().next().unwrap_or_default();

    let host = HostContext {
        source_path: Some(doc.path.clone()),
        active: Some(doc),
        settings,
    };
    Ok((source, host))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dynamic_search=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli
        .settings
        .as_deref()
        .map(Settings::load)
        .unwrap_or_default();

    match cli.command {
        Command::Search {
            vault,
            note,
            query,
            tag,
            watch,
            json,
        } => {
            let vault = Arc::new(FsVault::open(vault)?);
            let (source, host) = host_for(&vault, &note, settings).await?;
            let widget = on_config_block(Arc::clone(&vault), &source, host).await;

            if tag.is_some() {
                widget.select_tag(tag).await;
            }
            if let Some(query) = query {
                widget.run_search(query).await;
            }
            print_view(&widget.snapshot(), json)?;

            if watch {
                vault.watch()?;
                let mut updates = widget.view();
                loop {
                    tokio::select! {
                        changed = updates.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let view = updates.borrow_and_update().clone();
                            if view.counter != "Searching..." {
                                print_view(&view, json)?;
                            }
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            }
        }
        Command::Create {
            vault,
            note,
            category,
            name,
        } => {
            let vault = Arc::new(FsVault::open(vault)?);
            let (source, host) = host_for(&vault, &note, settings).await?;
            let config = dynamic_search::parse_block(&source, host.source_path.as_deref(), &host.settings);
            let Some(target) = config.categories.get(category) else {
                bail!("Block has no category #{}", category);
            };

            let created = NoteCreator::new(vault)
                .create(&name, target)
                .await
                .context("Error creating note")?;
            println!("{} (cursor at line {})", created.document.path, created.cursor_line);
        }
        Command::InsertBlock => {
            let (text, _) = insert_default_block(&settings, 0);
            print!("{}", text);
        }
    }

    Ok(())
}
