//! # inkdraft CLI
//!
//! Local front end for the inkdraft core: seed documents into a SQLite
//! content store, inspect them, and run an interactive refinement session
//! with rollback.
//!
//! ```bash
//! inkdraft --db ./inkdraft.db seed welcome --title "Welcome" --text "First paragraph."
//! inkdraft --db ./inkdraft.db show welcome
//! inkdraft --db ./inkdraft.db --log-dir /tmp/inkdraft-logs session welcome
//! ```

mod refiner;
mod session;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use inkdraft_core::{
    default_log_level, init_logging, ContentBlock, CoreConfig, Document, DocumentBody,
    DocumentVersionStore, OperationTracker, RefinementTracker, RefinementWorkflow,
    SqliteContentBackend,
};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "inkdraft", about = "Versioned document refinement", version)]
struct Cli {
    /// SQLite database holding documents and revisions.
    #[arg(long, global = true, default_value = "inkdraft.db")]
    db: PathBuf,

    /// Optional TOML config; a missing file means defaults.
    #[arg(long, global = true, default_value = "inkdraft.toml")]
    config: PathBuf,

    /// Absolute directory for rolling log files. Overrides the config.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error. Overrides the config.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a new document made of paragraphs.
    Seed {
        id: String,
        #[arg(long)]
        title: String,
        /// One paragraph per flag.
        #[arg(long = "text", required = true)]
        paragraphs: Vec<String>,
    },
    /// Print a stored document as JSON.
    Show { id: String },
    /// Refine a document interactively.
    Session {
        id: String,
        /// Make the first N refinements fail, to try `retry`.
        #[arg(long, default_value_t = 0)]
        fail_first: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CoreConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    start_logging(&cli, &config)?;

    let backend = Arc::new(
        SqliteContentBackend::open(&cli.db)
            .with_context(|| format!("opening database {}", cli.db.display()))?,
    );

    match cli.command {
        Commands::Seed {
            id,
            title,
            paragraphs,
        } => {
            let blocks = paragraphs
                .iter()
                .enumerate()
                .map(|(index, text)| ContentBlock::paragraph(format!("p{index}"), text.as_str()))
                .collect();
            let document = Document::new(id, title, DocumentBody::new(blocks));
            backend
                .insert_document(&document)
                .with_context(|| format!("seeding document `{}`", document.id))?;
            println!("seeded `{}` with {} blocks", document.id, document.body.block_count());
        }
        Commands::Show { id } => {
            let Some(document) = backend.fetch_document(&id)? else {
                bail!("document `{id}` not found");
            };
            println!("{}", serde_json::to_string_pretty(&document)?);
            let revisions = backend.latest_revision(&id)?;
            println!("revisions: {revisions}");
        }
        Commands::Session { id, fail_first } => {
            let store = Arc::new(DocumentVersionStore::from_config(backend.clone(), &config));
            let refiner = Arc::new(refiner::LocalRefiner::new(store.clone(), fail_first));
            let workflow = RefinementWorkflow::new(
                store.clone(),
                Arc::new(RefinementTracker::from_config(&config)),
                OperationTracker::new(),
                refiner,
            )
            .with_operation_timeout(config.default_operation_timeout());

            store
                .load(&id)
                .await
                .with_context(|| format!("loading document `{id}`"))?;
            info!("event=session_start module=core status=ok document_id={id}");
            session::run(&workflow).await?;
        }
    }
    Ok(())
}

/// File logging runs only when a log directory is configured.
fn start_logging(cli: &Cli, config: &CoreConfig) -> Result<()> {
    let Some(dir) = cli.log_dir.as_deref().or(config.logging.dir.as_deref()) else {
        return Ok(());
    };
    let level = cli
        .log_level
        .as_deref()
        .or(config.logging.level.as_deref())
        .unwrap_or(default_log_level());
    init_logging(level, &path_arg(dir)?).context("starting logging")?;
    Ok(())
}

fn path_arg(path: &Path) -> Result<String> {
    match path.to_str() {
        Some(path) => Ok(path.to_string()),
        None => bail!("log dir `{}` is not valid UTF-8", path.display()),
    }
}
