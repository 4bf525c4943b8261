//! Docschema command line tool.

mod commands;
mod config;
mod error;
mod fixture;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use docschema_core::DataSource;
use log::info;

use crate::commands::{AppContext, ExportFormat, ExportOptions};
use crate::config::{load_config, resolve_store_config};
use crate::error::ToolError;
use crate::fixture::{load_fixture, load_schemas, seed};
use crate::store::{AnyStore, StoreType};

#[derive(Parser)]
#[command(name = "dsx")]
#[command(about = "Schema-checked access to document stores", long_about = None)]
struct Cli {
    /// Store type: memory or rocks
    #[arg(long, global = true)]
    store_type: Option<StoreType>,

    /// Path to the store
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Schema file (TOML or JSON)
    #[arg(long, global = true)]
    schemas: Option<PathBuf>,

    /// Fixture to write into the store before running the command
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the initial values of a new entity
    Init {
        /// Collection path
        collection: String,
    },

    /// Print one entity
    Get {
        /// Collection path
        collection: String,

        /// Entity id
        id: String,
    },

    /// Export a collection as flat rows
    Export {
        /// Collection path
        collection: String,

        /// Output format: json or jsonl
        #[arg(long, default_value = "json")]
        format: ExportFormat,

        /// Maximum number of entities
        #[arg(long)]
        limit: Option<usize>,

        /// Add a preview column for every reference property
        #[arg(long)]
        expand_references: bool,
    },

    /// Write a fixture file into the store
    Import {
        /// Fixture file (JSON)
        file: PathBuf,
    },

    /// Check stored entities against their schemas
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = load_config();
    let (store_type, store_path) = resolve_store_config(&config, cli.store_type, cli.store);
    let schemas = cli
        .schemas
        .or_else(|| config.schemas.clone())
        .ok_or(ToolError::NoSchemas)?;

    let registry = load_schemas(&schemas)?;
    let store = AnyStore::open(store_type, &store_path, config.memory)?;
    info!("opened {store_type} store");
    let source = DataSource::with_options(Arc::new(store), config.data_source);
    let ctx = AppContext::new(source, registry);

    if let Some(data) = &cli.data {
        let written = seed(&ctx.source, &ctx.registry, &load_fixture(data)?).await?;
        info!("seeded {written} documents from {}", data.display());
    }

    let content = match cli.command {
        Command::Init { collection } => commands::init(&ctx, &collection)?,
        Command::Get { collection, id } => commands::get(&ctx, &collection, &id).await?,
        Command::Export {
            collection,
            format,
            limit,
            expand_references,
        } => {
            let options = ExportOptions {
                format,
                limit,
                expand_references,
            };
            commands::export(&ctx, &collection, &options).await?
        }
        Command::Import { file } => commands::import(&ctx, &file).await?,
        Command::Check => {
            let report = commands::check(&ctx).await?;
            if !report.problems.is_empty() {
                anyhow::bail!("{report}");
            }
            report.to_string()
        }
    };

    let content = content.trim_end();
    match cli.output {
        Some(path) => std::fs::write(path, format!("{content}\n"))?,
        None => println!("{}", content),
    }

    Ok(())
}
