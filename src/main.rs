//! CLI entry point for the vector store.
//!
//! Thin wrapper over [`semdex::CollectionManager`]: every command opens the
//! configured data directory, runs one operation and prints plain text or a
//! JSON envelope.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use semdex::io::{ExitCode, JsonResponse, OutputFormat};
use semdex::{
    AccuracyLevel, CollectionManager, HashEmbeddingGenerator, PayloadValue, SearchFilter,
    SearchResult, Settings, StoreError, VectorDimension, VectorRecord,
};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Filesystem vector store for semantic code search
#[derive(Parser)]
#[command(
    name = "semdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Filesystem vector store for semantic code search",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Per-command override of `staleness.defer_rebuild`
#[derive(Args, Debug, Clone, Copy, Default)]
struct DeferArgs {
    /// Mark the index stale instead of updating it now
    #[arg(long)]
    defer: bool,
    /// Update the index now even when the config defers
    #[arg(long, conflicts_with = "defer")]
    no_defer: bool,
}

impl DeferArgs {
    fn resolve(self, configured: bool) -> bool {
        match (self.defer, self.no_defer) {
            (true, _) => true,
            (_, true) => false,
            _ => configured,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .semdex directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Create an empty collection
    Create {
        name: String,
        /// Embedding dimension (overrides collection.vector_dim)
        #[arg(long)]
        dim: Option<usize>,
    },

    /// List collections
    List,

    /// Delete a collection and everything in it
    Drop { name: String },

    /// Remove every record but keep the collection
    Clear { name: String },

    /// Write records from a JSON Lines file, one record per line
    #[command(after_help = "Line format:\n  {\"id\": \"src/lib.rs#12\", \"vector\": [0.1, ...], \"payload\": {\"file_path\": \"src/lib.rs\"}}")]
    Upsert {
        name: String,
        file: PathBuf,
        #[command(flatten)]
        defer: DeferArgs,
    },

    /// Delete records by id, or every record of a source file
    Delete {
        name: String,
        ids: Vec<String>,
        /// Delete records whose payload file_path matches
        #[arg(long, conflicts_with = "ids")]
        file: Option<String>,
        #[command(flatten)]
        defer: DeferArgs,
    },

    /// Nearest records to a vector or a text
    Search {
        name: String,
        /// Comma-separated query vector
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, conflicts_with = "text")]
        vector: Option<Vec<f32>>,
        /// Text embedded with the bundled hashing embedder
        #[arg(long)]
        text: Option<String>,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long, value_enum)]
        accuracy: Option<AccuracyLevel>,
        /// Payload condition, key=value (repeatable)
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,
    },

    /// Record count and index state
    Health { name: String },

    /// Source files named by record payloads
    Files { name: String },

    /// Rebuild the ANN index from every record
    Rebuild { name: String },
}

fn main() {
    let cli = Cli::parse();
    let format = OutputFormat::from_json_flag(cli.json);

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(ExitCode::ConfigError.into());
        }
    };
    init_tracing(&settings);

    let code = match run(cli.command, &settings, format) {
        Ok(code) => code,
        Err(e) => report_error(&e, format),
    };
    std::process::exit(code.into());
}

fn init_tracing(settings: &Settings) {
    let level = if settings.debug {
        "debug"
    } else {
        settings.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report_error(error: &anyhow::Error, format: OutputFormat) -> ExitCode {
    let Some(store_error) = error.downcast_ref::<StoreError>() else {
        eprintln!("Error: {error:#}");
        return ExitCode::GeneralError;
    };
    if format.is_json() {
        let response = JsonResponse::from_error(store_error);
        match serde_json::to_string_pretty(&response) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error: {store_error} ({e})"),
        }
    } else {
        eprintln!("Error: {error:#}");
        for suggestion in store_error.recovery_suggestions() {
            eprintln!("  - {suggestion}");
        }
    }
    ExitCode::from_error(store_error)
}

fn print_json<T: Serialize>(data: T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&JsonResponse::success(data))?);
    Ok(())
}

fn run(command: Commands, settings: &Settings, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let manager = CollectionManager::from_settings(settings);

    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force).map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(settings)?);
        }

        Commands::Create { name, dim } => {
            let mut params = settings.collection_params()?;
            if let Some(dim) = dim {
                params.vector_dim = VectorDimension::new(dim).map_err(StoreError::from)?;
            }
            let collection = manager.create(&name, &params)?;
            if format.is_json() {
                print_json(collection.metadata())?;
            } else {
                println!(
                    "Created collection '{name}' ({} dimensions) at {}",
                    params.vector_dim,
                    collection.root().display()
                );
            }
        }

        Commands::List => {
            let names = manager.list()?;
            if format.is_json() {
                print_json(&names)?;
            } else if names.is_empty() {
                println!("No collections in {}", manager.data_dir().display());
            } else {
                for name in &names {
                    println!("{name}");
                }
            }
        }

        Commands::Drop { name } => {
            manager.delete(&name)?;
            println!("Deleted collection '{name}'");
        }

        Commands::Clear { name } => {
            let removed = manager.clear(&name)?;
            if format.is_json() {
                print_json(serde_json::json!({ "removed": removed }))?;
            } else {
                println!("Removed {removed} records from '{name}'");
            }
        }

        Commands::Upsert { name, file, defer } => {
            let collection = manager.open(&name)?;
            let records = read_jsonl(&file)?;
            let mut session = collection.begin_write_session();
            session.upsert_batch(&records)?;
            let summary = session.end(defer.resolve(settings.staleness.defer_rebuild))?;
            if format.is_json() {
                print_json(&summary)?;
            } else {
                println!(
                    "Wrote {} records ({} added, {} updated){}",
                    records.len(),
                    summary.added,
                    summary.updated,
                    if summary.deferred { ", index marked stale" } else { "" }
                );
            }
        }

        Commands::Delete {
            name,
            ids,
            file,
            defer,
        } => {
            let collection = manager.open(&name)?;
            let mut session = collection.begin_write_session();
            let deleted = match &file {
                Some(file) => session.delete_by_file(file)?,
                None => {
                    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                    session.delete(&ids)?
                }
            };
            session.end(defer.resolve(settings.staleness.defer_rebuild))?;
            if format.is_json() {
                print_json(serde_json::json!({ "deleted": deleted }))?;
            } else {
                println!("Deleted {deleted} records");
            }
        }

        Commands::Search {
            name,
            vector,
            text,
            k,
            accuracy,
            filters,
        } => {
            let collection = manager.open(&name)?;
            let query = match (vector, text) {
                (Some(vector), _) => vector,
                (None, Some(text)) => {
                    use semdex::EmbeddingGenerator;
                    let generator = HashEmbeddingGenerator::new(collection.metadata().vector_dim);
                    generator.embed(&text).map_err(StoreError::from)?
                }
                (None, None) => anyhow::bail!("search needs --vector or --text"),
            };
            let filter = parse_filters(&filters)?;
            let outcome = collection.search_filtered(
                &query,
                k.unwrap_or(settings.search.default_k),
                accuracy.unwrap_or(settings.search.default_accuracy),
                &filter,
            )?;

            if format.is_json() {
                print_json(&outcome)?;
            } else {
                print_results(&outcome.results);
            }
            return Ok(ExitCode::from_results(&outcome.results));
        }

        Commands::Health { name } => {
            let health = manager.open(&name)?.health()?;
            if format.is_json() {
                print_json(&health)?;
            } else {
                println!("Collection:      {}", health.name);
                println!("Dimensions:      {}", health.vector_dim);
                println!("Records:         {}", health.record_count);
                println!("Index present:   {}", health.index_present);
                println!("Index state:     {}", health.state);
                println!("Stale:           {}", health.is_stale);
                println!("Soft-deleted:    {}", health.soft_deleted_labels);
                println!("Corrupt records: {}", health.corrupt_records);
                println!("Index size:      {} bytes", health.index_file_size);
                println!(
                    "ANN params:      M={} ef_construction={} ef_search={}",
                    health.ann_params.m, health.ann_params.ef_construction, health.ann_params.ef_search
                );
            }
        }

        Commands::Files { name } => {
            let files = manager.open(&name)?.list_files();
            if format.is_json() {
                print_json(&files)?;
            } else {
                for file in &files {
                    println!("{file}");
                }
            }
        }

        Commands::Rebuild { name } => {
            let state = manager.open(&name)?.rebuild()?;
            if format.is_json() {
                print_json(&state)?;
            } else {
                println!(
                    "Rebuilt index: {} vectors, {} corrupt records skipped",
                    state.live_labels, state.corrupt_records
                );
            }
        }
    }
    Ok(ExitCode::Success)
}

fn read_jsonl(path: &Path) -> anyhow::Result<Vec<VectorRecord>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: VectorRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), number + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn parse_filters(filters: &[String]) -> anyhow::Result<SearchFilter> {
    let mut filter = SearchFilter::new();
    for condition in filters {
        let (key, value) = condition
            .split_once('=')
            .with_context(|| format!("filter '{condition}' is not KEY=VALUE"))?;
        let value = if let Ok(int) = value.parse::<i64>() {
            PayloadValue::Int(int)
        } else if let Ok(flag) = value.parse::<bool>() {
            PayloadValue::Bool(flag)
        } else {
            PayloadValue::from(value)
        };
        filter = filter.with(key, value);
    }
    Ok(filter)
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results");
        return;
    }
    for (rank, result) in results.iter().enumerate() {
        let location = match (
            result.payload.get("file_path").and_then(PayloadValue::as_text),
            result.payload.get("line_start").and_then(PayloadValue::as_int),
        ) {
            (Some(file), Some(line)) => format!("  {file}:{line}"),
            (Some(file), None) => format!("  {file}"),
            _ => String::new(),
        };
        println!(
            "{:>3}. {:.4}  {}{location}",
            rank + 1,
            result.score.get(),
            result.id
        );
    }
}
