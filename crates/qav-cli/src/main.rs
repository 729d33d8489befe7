//! qav CLI - Command-line interface for the retrieval service.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use qav_core::{content_id, QavConfig};
use qav_server::{FacetFilter, QavService, ToolResult};

/// qav - Hybrid vector and full-text retrieval over chunked documents
#[derive(Parser)]
#[command(name = "qav")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/qav/config.toml, then ./qav.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a collection for passages
    Search {
        /// Index to search
        collection: String,

        /// Search query
        query: String,

        /// Restrict to these document ids (repeatable)
        #[arg(short = 'd', long = "doc")]
        filter_ids: Vec<String>,

        /// Retrieval method: full, dense, full-text, hibrid_no_ner
        #[arg(short, long, default_value = "full")]
        method: String,

        /// Restrict to a collection id
        #[arg(long)]
        collection_id: Option<String>,

        /// Always answer with passages
        #[arg(long)]
        force_rag: bool,
    },

    /// Manage indices
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Manage documents
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Faceted query over an index
    Query {
        /// Index to query
        index: String,

        /// Query-string text (empty matches everything)
        #[arg(default_value = "")]
        text: String,

        /// Page number
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Documents per page
        #[arg(long, default_value = "20")]
        per_page: usize,

        /// Values per facet group
        #[arg(long, default_value = "20")]
        facets: usize,

        /// Restrict to a collection id
        #[arg(long)]
        collection_id: Option<String>,

        /// Metadata filter TYPE=VALUE (repeatable)
        #[arg(long = "metadata")]
        metadata: Vec<String>,

        /// Annotation filter TYPE=ENTITY_ID (repeatable)
        #[arg(long = "annotation")]
        annotations: Vec<String>,
    },

    /// Process and index every JSON document in a directory
    Ingest {
        /// Target index
        index: String,

        /// Directory of *.json documents
        path: PathBuf,

        /// Collection id for documents that carry none
        #[arg(long)]
        collection_id: Option<String>,

        /// Recursively process directories
        #[arg(short, long)]
        recursive: bool,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create an index, or describe it if it exists
    Create {
        /// Index name
        name: String,
    },

    /// Delete an index
    Delete {
        /// Index name
        name: String,
    },

    /// Show an index mapping
    Mapping {
        /// Index name
        name: String,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Store a JSON document
    Index {
        /// Target index
        index: String,

        /// JSON file
        file: PathBuf,

        /// The file holds a Mongo-shaped record
        #[arg(long, conflicts_with = "process")]
        mongo: bool,

        /// Annotate, chunk and embed before storing
        #[arg(long)]
        process: bool,
    },

    /// Delete a document by id
    Delete {
        /// Index name
        index: String,

        /// Document id
        doc_id: String,
    },

    /// Replace a document's annotations with mentions from a JSON file
    Annotate {
        /// Index name
        index: String,

        /// Document id or mongo id
        doc_id: String,

        /// JSON file holding an array of mentions
        file: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(path: Option<&Path>) -> Result<QavConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = QavConfig::load(path)?;
            config.apply_env_overrides();
            config
        }
        None => QavConfig::load_default()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    debug!("Loaded configuration: {:?}", config);
    let service = QavService::from_config(config)?;

    let (tool, params) = match cli.command {
        Commands::Search {
            collection,
            query,
            filter_ids,
            method,
            collection_id,
            force_rag,
        } => (
            "search",
            json!({
                "collection": collection,
                "query": query,
                "filter_ids": filter_ids,
                "retrievalMethod": method,
                "collectionId": collection_id,
                "force_rag": force_rag,
            }),
        ),
        Commands::Index { action } => match action {
            IndexAction::Create { name } => ("create_index", json!({ "index": name })),
            IndexAction::Delete { name } => ("delete_index", json!({ "index": name })),
            IndexAction::Mapping { name } => ("get_mapping", json!({ "index": name })),
        },
        Commands::Doc { action } => match action {
            DocAction::Index {
                index,
                file,
                mongo,
                process,
            } => {
                let doc = read_json(&file)?;
                if process {
                    ("index_document_with_processing", with_index(doc, &index)?)
                } else if mongo {
                    ("index_mongo_document", json!({ "index": index, "doc": doc }))
                } else {
                    ("index_document", json!({ "index": index, "doc": doc }))
                }
            }
            DocAction::Delete { index, doc_id } => (
                "delete_document",
                json!({ "index": index, "doc_id": doc_id }),
            ),
            DocAction::Annotate {
                index,
                doc_id,
                file,
            } => (
                "add_annotations",
                json!({ "index": index, "document_id": doc_id, "mentions": read_json(&file)? }),
            ),
        },
        Commands::Query {
            index,
            text,
            page,
            per_page,
            facets,
            collection_id,
            metadata,
            annotations,
        } => (
            "query_index",
            json!({
                "index": index,
                "text": text,
                "page": page,
                "documents_per_page": per_page,
                "n_facets": facets,
                "collection_id": collection_id,
                "metadata": parse_filters(&metadata)?,
                "annotations": parse_filters(&annotations)?,
            }),
        ),
        Commands::Ingest {
            index,
            path,
            collection_id,
            recursive,
        } => {
            return ingest(&service, &index, &path, collection_id.as_deref(), recursive).await;
        }
    };

    report(service.call(tool, params).await);
    Ok(())
}

fn report(result: ToolResult) {
    if result.success {
        println!("{}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
        std::process::exit(1);
    }
}

async fn ingest<B, E>(
    service: &QavService<B, E>,
    index: &str,
    path: &Path,
    collection_id: Option<&str>,
    recursive: bool,
) -> Result<(), Box<dyn std::error::Error>>
where
    B: qav_core::SearchBackend + qav_core::IndexAdmin,
    E: qav_core::Embedder,
{
    let files = collect_files(path, recursive)?;

    if files.is_empty() {
        println!("No JSON documents found at: {}", path.display());
        return Ok(());
    }

    println!("Ingesting {} document(s) into index '{}'...", files.len(), index);

    let mut success_count = 0;
    let mut error_count = 0;

    for file_path in files {
        let params = read_json(&file_path)
            .and_then(|doc| prepare_document(doc, collection_id))
            .and_then(|doc| with_index(doc, index));

        let params = match params {
            Ok(p) => p,
            Err(e) => {
                eprintln!("  {} - Error: {}", file_path.display(), e);
                error_count += 1;
                continue;
            }
        };

        let result = service.call("index_document_with_processing", params).await;
        if result.success {
            println!("  {} - OK", file_path.display());
            success_count += 1;
        } else {
            eprintln!("  {} - Error: {}", file_path.display(), result.message);
            error_count += 1;
        }
    }

    info!("Ingestion into {} finished", index);
    println!(
        "\nComplete: {} succeeded, {} failed",
        success_count, error_count
    );

    Ok(())
}

fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();

    if path.is_file() {
        if is_json(path) {
            files.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        for entry in fs::read_dir(path)? {
            let entry_path = entry?.path();

            if entry_path.is_file() && is_json(&entry_path) {
                files.push(entry_path);
            } else if entry_path.is_dir() && recursive {
                files.extend(collect_files(&entry_path, recursive)?);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

fn read_json(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Fill in a content-hash `id` and the default collection id when missing.
fn prepare_document(doc: Value, collection_id: Option<&str>) -> Result<Value, Box<dyn std::error::Error>> {
    let Value::Object(mut doc) = doc else {
        return Err("document must be a JSON object".into());
    };

    let text = doc
        .get("text")
        .and_then(Value::as_str)
        .ok_or("document has no text")?
        .to_string();

    if !doc.get("id").is_some_and(|id| id.is_string()) {
        doc.insert("id".to_string(), json!(content_id(&text)));
    }

    if !doc.contains_key("collectionId") {
        let cid = collection_id.ok_or("document has no collectionId; pass --collection-id")?;
        doc.insert("collectionId".to_string(), json!(cid));
    }

    Ok(Value::Object(doc))
}

fn with_index(doc: Value, index: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let Value::Object(doc) = doc else {
        return Err("document must be a JSON object".into());
    };
    let mut params = Map::new();
    params.insert("index".to_string(), json!(index));
    params.extend(doc);
    Ok(Value::Object(params))
}

fn parse_filters(raw: &[String]) -> Result<Vec<FacetFilter>, Box<dyn std::error::Error>> {
    raw.iter()
        .map(|f| -> Result<FacetFilter, Box<dyn std::error::Error>> {
            let (kind, value) = f
                .split_once('=')
                .ok_or_else(|| format!("filter '{}' is not TYPE=VALUE", f))?;
            Ok(FacetFilter::new(kind, value))
        })
        .collect()
}
