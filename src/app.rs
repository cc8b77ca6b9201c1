//! Application wiring.
//!
//! [`App::from_config`] builds every long-lived component once and hands
//! out shared references; nothing below it reaches for globals.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::agent::ReactAgentFactory;
use crate::config::Config;
use crate::documents::DocumentStore;
use crate::embedding::{create_embedder, Embedder};
use crate::index::SqliteIndex;
use crate::ingest::Ingestor;
use crate::llm::{create_completion, TextCompletion};
use crate::orchestrator::OrchestratorCell;
use crate::tables::TableSet;
use crate::tabular::TabularStore;

pub struct App {
    pub config: Config,
    pub documents: Arc<DocumentStore>,
    pub tables: Arc<TabularStore>,
    pub llm: Arc<dyn TextCompletion>,
    pub orchestrator: Arc<OrchestratorCell>,
    pub ingestor: Arc<Ingestor>,
}

impl App {
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let llm = create_completion(&config.llm)?;
        Self::with_components(config, embedder, llm).await
    }

    /// Wire the app around an existing embedder and completion client.
    pub async fn with_components(
        config: Config,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn TextCompletion>,
    ) -> Result<Self> {
        let index = Arc::new(SqliteIndex::new(&config.index));
        let documents =
            Arc::new(DocumentStore::open(index, embedder, &config.index.collection).await);

        let (tables, missing) = TableSet::load_available(&config.tables)
            .context("failed to load HR data files")?;
        for kind in missing {
            tracing::warn!(
                table = kind.name(),
                path = %kind.source_path(&config.tables).display(),
                "data file missing, serving an empty table"
            );
        }
        let factory = Arc::new(ReactAgentFactory::new(
            Arc::clone(&llm),
            config.analysis.head_rows,
        ));
        let tables = Arc::new(TabularStore::new(
            tables,
            factory,
            config.analysis.max_iterations,
        ));

        let orchestrator = Arc::new(OrchestratorCell::new(
            Arc::clone(&documents),
            Arc::clone(&tables),
            Arc::clone(&llm),
            config.retrieval.top_k,
        ));
        let ingestor = Arc::new(Ingestor::new(
            Arc::clone(&documents),
            Arc::clone(&tables),
            config.chunking.clone(),
            config.tables.clone(),
            config.embedding.batch_size,
        ));

        Ok(Self {
            config,
            documents,
            tables,
            llm,
            orchestrator,
            ingestor,
        })
    }

    /// Reload the document snapshot and all three tables.
    pub async fn reload(&self) -> Result<ReloadSummary> {
        let chunks = self.documents.reload().await?;
        self.tables
            .reload_from_sources(&self.config.tables)
            .await
            .context("failed to reload HR data files")?;
        let tables = self.tables.tables();
        Ok(ReloadSummary {
            chunks,
            employees: tables.employees.row_count(),
            leave_records: tables.leave_records.row_count(),
            attendance_logs: tables.attendance_logs.row_count(),
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReloadSummary {
    pub chunks: usize,
    pub employees: usize,
    pub leave_records: usize,
    pub attendance_logs: usize,
}
