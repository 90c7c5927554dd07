//! # Quire CLI (`quire`)
//!
//! The `quire` binary drives the versioned document store: ingestion,
//! re-chunking, targeted chunk edits, hybrid search, version history, and
//! index repair.
//!
//! ## Usage
//!
//! ```bash
//! quire --config ./config/quire.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quire init` | Create the SQLite database, schema, and archive root |
//! | `quire ingest <path>` | Ingest a file or directory |
//! | `quire rechunk <document-id>` | Re-chunk a document from its archived source |
//! | `quire edit <chunk-id>` | Create a new version of one chunk |
//! | `quire search "<query>"` | Search current document versions |
//! | `quire get <document-id>` | Show a document in element order |
//! | `quire versions <document-id>` | Document version history |
//! | `quire diff <old-version-id> <new-version-id>` | Changed chunks between two versions |
//! | `quire history <chunk-id>` | Chunk version history |
//! | `quire repair` | Re-index chunks flagged stale |
//! | `quire rebuild <document-id>` | Rebuild a document's index from its artifact |
//! | `quire delete <document-id>` | Soft-delete a document |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use quire::app::App;
use quire::config;
use quire::ingest::IngestOutcome;
use quire::reconcile::{merge_document_order, DocumentItem};
use quire::search::{QueryOptions, SearchMode};

/// Quire — a local-first versioned document store with hybrid retrieval.
#[derive(Parser)]
#[command(
    name = "quire",
    about = "Quire — a local-first versioned document store with hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/quire.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and archive root.
    ///
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Ingest a file or directory.
    ///
    /// Directories are walked recursively; files whose modification time
    /// has not moved since the last sync are skipped, and byte-identical
    /// content never produces a new version.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,
    },

    /// Re-chunk a document from its archived source bytes.
    ///
    /// Produces a new document version under the configured chunking
    /// profile. Chunks whose content is unchanged keep their identity,
    /// version history, and embedding.
    Rechunk {
        /// Document UUID.
        document_id: String,

        /// Version comment.
        #[arg(long)]
        comment: Option<String>,
    },

    /// Create a new version of a single chunk.
    ///
    /// The document's version history is untouched; only the chunk's own
    /// version counter advances.
    Edit {
        /// Chunk UUID.
        chunk_id: String,

        /// Replacement text.
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,

        /// Read replacement text from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Author recorded on the new chunk version.
        #[arg(long)]
        author: Option<String>,

        /// Version comment.
        #[arg(long)]
        comment: Option<String>,
    },

    /// Search current document versions.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `lexical` (FTS5), `semantic` (vector), or `hybrid`
        /// (weighted fusion).
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Restrict results to one document.
        #[arg(long)]
        document: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show a document's current content in original element order,
    /// chunks and images interleaved.
    Get {
        /// Document UUID.
        document_id: String,
    },

    /// List a document's versions.
    Versions {
        /// Document UUID.
        document_id: String,

        /// Include versions archived by retention.
        #[arg(long)]
        all: bool,
    },

    /// List the chunks whose content changed between two document versions.
    ///
    /// Comparison is by content hash; a chunk that only moved is not
    /// reported.
    Diff {
        /// Older document-version UUID.
        old_version_id: String,

        /// Newer document-version UUID.
        new_version_id: String,
    },

    /// Show the version history of one chunk.
    History {
        /// Chunk UUID.
        chunk_id: String,
    },

    /// Re-index every chunk whose search-index entry is flagged stale.
    Repair,

    /// Rebuild a document's index entries from its archived artifact.
    Rebuild {
        /// Document UUID.
        document_id: String,
    },

    /// Soft-delete a document. Versions and archived content remain.
    Delete {
        /// Document UUID.
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let app = App::open(&cfg).await?;

    match cli.command {
        Commands::Init => {
            // App::open already ran migrations.
            std::fs::create_dir_all(&cfg.archive.root)?;
            println!("Database and archive initialized successfully.");
        }

        Commands::Ingest { path } => {
            if path.is_dir() {
                let count = app.ingestor.ingest_dir(&path).await?;
                println!("Ingested {} file(s).", count);
            } else {
                match app.ingestor.ingest_file(&path).await? {
                    IngestOutcome::Unchanged { document_id } => {
                        println!("Unchanged: {} ({})", path.display(), document_id);
                    }
                    IngestOutcome::Published {
                        document_id,
                        outcome,
                    } => {
                        println!(
                            "Published {} as version {} ({} chunks, {} new, {} dropped)",
                            document_id,
                            outcome.version_number,
                            outcome.chunks_total,
                            outcome.chunks_new,
                            outcome.chunks_dropped
                        );
                        if outcome.index_degraded {
                            println!("Warning: search index is stale; run `quire repair`.");
                        }
                    }
                }
            }
        }

        Commands::Rechunk {
            document_id,
            comment,
        } => {
            let outcome = app.ingestor.rechunk(&document_id, comment).await?;
            println!(
                "Re-chunked as version {} ({} chunks, {} new, {} dropped)",
                outcome.version_number,
                outcome.chunks_total,
                outcome.chunks_new,
                outcome.chunks_dropped
            );
        }

        Commands::Edit {
            chunk_id,
            text,
            file,
            author,
            comment,
        } => {
            let text = match (text, file) {
                (Some(text), None) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                _ => anyhow::bail!("exactly one of --text or --file is required"),
            };
            let version = app.writer.edit_chunk(&chunk_id, &text, author, comment).await?;
            println!(
                "Chunk {} is now at version {} ({})",
                chunk_id, version.version_number, version.id
            );
        }

        Commands::Search {
            query,
            mode,
            document,
            limit,
        } => {
            let mode = SearchMode::parse(&mode).ok_or_else(|| {
                anyhow::anyhow!("Unknown search mode: {}. Use lexical, semantic, or hybrid.", mode)
            })?;
            let options = QueryOptions {
                document_id: document,
                limit,
            };
            let result = app.search.run_query(&query, mode, &options).await?;

            if result.degraded {
                println!("(vector channel unavailable; lexical-only results)");
            }
            if result.hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in result.hits.iter().enumerate() {
                let title = hit.document_title.as_deref().unwrap_or("(untitled)");
                println!("{}. [{:.2}] {}", i + 1, hit.score, title);
                println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
                println!("    chunk: {}", hit.id);
                println!("    document: {}", hit.document_id);
                println!();
            }
        }

        Commands::Get { document_id } => {
            let document = app
                .metadata
                .get_document(&document_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No document with id {}", document_id))?;

            let title = document.title.as_deref().unwrap_or("(untitled)");
            println!("{} — {}", document.id, title);
            println!("source: {}", document.source_name);
            println!("status: {}", document.status.as_str());
            println!();

            let chunks = app.metadata.list_current_chunks(&document_id).await?;
            let mut pairs = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let version = app
                    .metadata
                    .get_chunk_version(&chunk.current_version_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("dangling version for chunk {}", chunk.id))?;
                pairs.push((chunk, version));
            }
            let images = app.metadata.list_image_associations(&document_id).await?;

            for item in merge_document_order(pairs, images) {
                match item {
                    DocumentItem::Chunk { chunk, version } => {
                        println!(
                            "--- chunk {} (v{}, {}) ---",
                            chunk.id,
                            version.version_number,
                            chunk.chunk_type.as_str()
                        );
                        println!("{}", version.text);
                    }
                    DocumentItem::Image { association } => {
                        println!(
                            "--- image {} (association {}) ---",
                            association.image_hash, association.id
                        );
                    }
                }
                println!();
            }
        }

        Commands::Versions { document_id, all } => {
            let versions = app
                .metadata
                .list_document_versions(&document_id, all)
                .await?;
            if versions.is_empty() {
                println!("No versions.");
            }
            let document = app.metadata.get_document(&document_id).await?;
            let current = document.and_then(|d| d.current_version_id);
            for version in versions {
                let marker = if current.as_deref() == Some(version.id.as_str()) {
                    " *"
                } else {
                    ""
                };
                let date = chrono::DateTime::from_timestamp(version.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "v{}{} {} {} {}",
                    version.version_number,
                    marker,
                    date,
                    version.id,
                    version.comment.as_deref().unwrap_or("")
                );
            }
        }

        Commands::Diff {
            old_version_id,
            new_version_id,
        } => {
            let changed = quire::ledger::diff_chunks(
                app.metadata.as_ref(),
                &old_version_id,
                &new_version_id,
            )
            .await?;
            if changed.is_empty() {
                println!("No content changes.");
            }
            for chunk_id in changed {
                println!("{}", chunk_id);
            }
        }

        Commands::History { chunk_id } => {
            let versions = app.metadata.list_chunk_versions(&chunk_id).await?;
            if versions.is_empty() {
                println!("No versions.");
            }
            for version in versions {
                let date = chrono::DateTime::from_timestamp(version.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "v{} {} {} by {} {}",
                    version.version_number,
                    date,
                    version.id,
                    version.author.as_deref().unwrap_or("(unknown)"),
                    version.comment.as_deref().unwrap_or("")
                );
            }
        }

        Commands::Repair => {
            let repaired = app.writer.repair_stale_chunks().await?;
            println!("Repaired {} stale index entr(ies).", repaired);
        }

        Commands::Rebuild { document_id } => {
            let entries = app.writer.rebuild_document_index(&document_id).await?;
            println!("Rebuilt {} index entr(ies).", entries);
        }

        Commands::Delete { document_id } => {
            app.metadata.soft_delete_document(&document_id).await?;
            println!("Deleted {}.", document_id);
        }
    }

    app.close().await;
    Ok(())
}
