//! Upload-and-ingest boundary.
//!
//! | Extension | Destination |
//! |-----------|-------------|
//! | `pdf`, `txt` | extract → chunk → embed → vector index, then Document Store reload |
//! | `csv` | employee master source, then full table reload |
//! | `xlsx` | leave records source, then full table reload |
//! | `json` | attendance logs source, then full table reload |
//!
//! The extension is checked before anything is read. A rejected or
//! unparseable file leaves the index, the table sources, and the loaded
//! tables exactly as they were.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::chunk::chunk_page;
use crate::config::{ChunkingConfig, TablesConfig};
use crate::documents::DocumentStore;
use crate::embedding::embed_batched;
use crate::extract::{self, ExtractError};
use crate::models::DocumentChunk;
use crate::tables::{TableKind, TableLoadError};
use crate::tabular::TabularStore;

pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["pdf", "txt", "csv", "json", "xlsx"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("no text could be extracted from {0}")]
    Empty(String),
    #[error(transparent)]
    Table(#[from] TableLoadError),
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("storage failed: {0:#}")]
    Storage(anyhow::Error),
}

/// What an ingestion changed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IngestReport {
    Document {
        source: String,
        pages: usize,
        chunks: usize,
        /// Chunks searchable in the collection after the reload.
        collection_chunks: usize,
    },
    Table {
        source: String,
        table: &'static str,
        rows: usize,
    },
}

enum Destination {
    Documents,
    Table(TableKind),
}

fn destination(path: &Path) -> Result<Destination, IngestError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" | "txt" => Ok(Destination::Documents),
        other => match TableKind::from_extension(other) {
            Some(kind) => Ok(Destination::Table(kind)),
            None if other.is_empty() => Err(IngestError::UnsupportedFormat(
                "(no extension)".to_string(),
            )),
            None => Err(IngestError::UnsupportedFormat(format!(".{}", other))),
        },
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct Ingestor {
    documents: Arc<DocumentStore>,
    tables: Arc<TabularStore>,
    chunking: ChunkingConfig,
    sources: TablesConfig,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        documents: Arc<DocumentStore>,
        tables: Arc<TabularStore>,
        chunking: ChunkingConfig,
        sources: TablesConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            documents,
            tables,
            chunking,
            sources,
            batch_size,
        }
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport, IngestError> {
        let destination = destination(path)?;
        if !path.is_file() {
            return Err(IngestError::NotFound(path.to_path_buf()));
        }

        let report = match destination {
            Destination::Documents => self.ingest_document(path).await?,
            Destination::Table(kind) => self.ingest_table(path, kind).await?,
        };
        tracing::info!(path = %path.display(), ?report, "ingested");
        Ok(report)
    }

    async fn ingest_document(&self, path: &Path) -> Result<IngestReport, IngestError> {
        let source = source_name(path);
        let pages = extract::extract_file(path)?;

        let chunks: Vec<DocumentChunk> = pages
            .iter()
            .flat_map(|p| chunk_page(&source, p.page, &p.text, &self.chunking))
            .collect();
        if chunks.is_empty() {
            return Err(IngestError::Empty(source));
        }

        let embedder = self.documents.embedder();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embed_batched(embedder.as_ref(), &texts, self.batch_size)
            .await
            .map_err(IngestError::Embedding)?;

        self.documents
            .index()
            .replace_source(
                self.documents.collection(),
                &source,
                &chunks,
                &vectors,
                embedder.model_name(),
            )
            .await
            .map_err(IngestError::Storage)?;
        let collection_chunks = self
            .documents
            .reload()
            .await
            .map_err(IngestError::Storage)?;

        Ok(IngestReport::Document {
            source,
            pages: pages.len(),
            chunks: chunks.len(),
            collection_chunks,
        })
    }

    async fn ingest_table(&self, path: &Path, kind: TableKind) -> Result<IngestReport, IngestError> {
        // Parse before touching the configured source.
        let table = kind.load(path)?;
        let rows = table.row_count();

        let target = kind.source_path(&self.sources);
        self.tables
            .replace_table(&self.sources, kind, table, || {
                if same_file(path, target) {
                    return Ok(());
                }
                replace_file(path, target).map_err(IngestError::Storage)
            })
            .await?;

        Ok(IngestReport::Table {
            source: source_name(path),
            table: kind.name(),
            rows,
        })
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copy `from` over `to` via a sibling temp file and a rename.
fn replace_file(from: &Path, to: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut tmp = to.as_os_str().to_owned();
    tmp.push(".upload");
    let tmp = PathBuf::from(tmp);
    std::fs::copy(from, &tmp)
        .with_context(|| format!("failed to copy {} to {}", from.display(), tmp.display()))?;
    std::fs::rename(&tmp, to)
        .with_context(|| format!("failed to replace {}", to.display()))?;
    Ok(())
}
