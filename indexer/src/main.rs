use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use textsearch_core::persist::IndexPaths;
use textsearch_core::registry::validate_index_id;
use textsearch_core::source::{extract_records, read_rows};
use textsearch_core::{DocId, FlatVectorIndex, IndexConfig, RecordQuery, TextIndex};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and maintain persisted text search indexes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Data directory holding index snapshots
    #[arg(long, default_value = "./data")]
    data_dir: String,
    /// Index id
    #[arg(long)]
    index: String,
}

#[derive(Args)]
struct Input {
    /// Input path (JSON/JSONL file or a directory of them)
    #[arg(long)]
    input: String,
    /// Field holding the document id
    #[arg(long, default_value = "id")]
    id_field: String,
    /// Comma-separated fields concatenated into the indexed text
    #[arg(long, default_value = "body", value_delimiter = ',')]
    text_fields: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the index contents with the records found under --input
    Build {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        input: Input,
    },
    /// Add (or replace) records without clearing the index
    Add {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        input: Input,
    },
    /// Remove documents by id
    Remove {
        #[command(flatten)]
        target: Target,
        /// Document ids to remove
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print index statistics as JSON
    Stats {
        #[command(flatten)]
        target: Target,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { target, input } => ingest(&target, &input, true),
        Commands::Add { target, input } => ingest(&target, &input, false),
        Commands::Remove { target, ids } => remove(&target, &ids),
        Commands::Stats { target } => stats(&target),
    }
}

fn open_index(target: &Target) -> Result<TextIndex> {
    validate_index_id(&target.index)?;
    Ok(TextIndex::open(IndexPaths::new(&target.data_dir, &target.index), IndexConfig::default()))
}

/// Stored embeddings of the index. The indexer cannot embed, so it only ever
/// drops vectors whose text it changed; the server re-embeds on the next add.
fn open_vectors(index: &TextIndex) -> FlatVectorIndex {
    FlatVectorIndex::open(index.paths().vectors())
}

fn ingest(target: &Target, input: &Input, replace: bool) -> Result<()> {
    let index = open_index(target)?;
    let query = RecordQuery {
        table: input.input.clone(),
        text_columns: input.text_fields.clone(),
        id_column: input.id_field.clone(),
        ..Default::default()
    };
    let files = input_files(Path::new(&input.input));
    if files.is_empty() {
        anyhow::bail!("no .json or .jsonl files found at {}", input.input);
    }

    let mut records: Vec<(DocId, String)> = Vec::new();
    for file in &files {
        let rows = read_rows(file)?;
        let extracted = extract_records(&rows, &query).with_context(|| format!("extracting records from {}", file.display()))?;
        tracing::debug!(file = %file.display(), rows = rows.len(), records = extracted.len(), "read input file");
        records.extend(extracted);
    }
    tracing::info!(files = files.len(), records = records.len(), "ingested input");

    let vectors = open_vectors(&index);
    let stale = if replace {
        index.clear()?;
        vectors.clear()?
    } else {
        vectors.remove_many(records.iter().map(|(id, _)| id))?
    };
    let added = index.add_documents(records)?;
    let stats = index.stats();
    tracing::info!(
        index = %target.index, added, documents = stats.documents, terms = stats.terms, stale_vectors = stale,
        "index build complete"
    );
    Ok(())
}

fn input_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && is_record_file(p) {
                files.push(p.to_path_buf());
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }
    files
}

fn is_record_file(p: &Path) -> bool {
    matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl"))
}

fn remove(target: &Target, ids: &[String]) -> Result<()> {
    let index = open_index(target)?;
    let mut removed = 0usize;
    for id in ids {
        match index.remove_document(id) {
            Ok(()) => removed += 1,
            Err(textsearch_core::Error::NotFound(_)) => tracing::warn!(doc_id = %id, "document not in index"),
            Err(err) => return Err(err.into()),
        }
    }
    let vectors_removed = open_vectors(&index).remove_many(ids)?;
    tracing::info!(index = %target.index, removed, vectors_removed, "documents removed");
    Ok(())
}

fn stats(target: &Target) -> Result<()> {
    let index = open_index(target)?;
    println!("{}", serde_json::to_string_pretty(&index.stats())?);
    Ok(())
}
