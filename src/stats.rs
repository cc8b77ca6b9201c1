//! Status overview.
//!
//! A quick summary of what the assistant can currently answer from: the
//! model in use, the vector index and its sources, and the row counts of
//! the three HR tables. Printed by `hrh status`; the health endpoint
//! reports a subset.

use anyhow::Result;
use serde::Serialize;

use crate::app::App;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub model: String,
    pub embedding_model: String,
    pub collection: String,
    /// Whether the index directory exists.
    pub vector_store_active: bool,
    pub index_bytes: u64,
    pub chunks: i64,
    pub sources: Vec<String>,
    pub employees: usize,
    pub leave_records: usize,
    pub attendance_logs: usize,
}

impl StatusReport {
    pub async fn collect(app: &App) -> Result<Self> {
        let index = app.documents.index();
        let collection = app.documents.collection();
        let tables = app.tables.tables();

        Ok(Self {
            model: app.llm.model_name().to_string(),
            embedding_model: app.documents.embedder().model_name().to_string(),
            collection: collection.to_string(),
            vector_store_active: app.config.index.is_active(),
            index_bytes: std::fs::metadata(app.config.index.db_path())
                .map(|m| m.len())
                .unwrap_or(0),
            chunks: index.count(collection).await?,
            sources: index.sources(collection).await?,
            employees: tables.employees.row_count(),
            leave_records: tables.leave_records.row_count(),
            attendance_logs: tables.attendance_logs.row_count(),
        })
    }

    pub fn print(&self) {
        println!("HR Harness Status");
        println!("=================");
        println!();
        println!("  Model:        {}", self.model);
        println!("  Embeddings:   {}", self.embedding_model);
        println!("  Collection:   {}", self.collection);
        println!(
            "  Vector store: {}",
            if self.vector_store_active {
                format!("active ({})", format_bytes(self.index_bytes))
            } else {
                "not created".to_string()
            }
        );
        println!("  Chunks:       {}", self.chunks);

        if !self.sources.is_empty() {
            println!();
            println!("  Indexed sources:");
            for source in &self.sources {
                println!("    {}", source);
            }
        }

        println!();
        println!("  {:<18} {:>8}", "TABLE", "ROWS");
        println!("  {}", "-".repeat(27));
        println!("  {:<18} {:>8}", "employees", self.employees);
        println!("  {:<18} {:>8}", "leave_records", self.leave_records);
        println!("  {:<18} {:>8}", "attendance_logs", self.attendance_logs);
        println!();
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
