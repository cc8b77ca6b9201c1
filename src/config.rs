//! TOML configuration.
//!
//! Every section has defaults, so `hrh` runs without a config file. Values
//! are resolved in three layers: serde defaults, then the TOML file (if it
//! exists), then the `LLM_MODEL` / `COLLECTION_NAME` environment variables.
//!
//! ```toml
//! [index]
//! dir = "./vector_index"
//! collection = "policy_documents"
//!
//! [llm]
//! provider = "ollama"
//! model = "llama3.2:3b"
//!
//! [tables]
//! employee_master = "./data/employee_master.csv"
//! leave_records = "./data/leave_intelligence.xlsx"
//! attendance_logs = "./data/attendance_logs_detailed.json"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Largest number of reasoning iterations the analysis agent may run.
pub const MAX_AGENT_ITERATIONS: usize = 30;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            collection: default_collection(),
        }
    }
}

impl IndexConfig {
    /// Path of the SQLite file inside the index directory.
    pub fn db_path(&self) -> PathBuf {
        self.dir.join("index.sqlite")
    }

    /// The vector store counts as active once its directory exists.
    pub fn is_active(&self) -> bool {
        self.dir.is_dir()
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./vector_index")
}
fn default_collection() -> String {
    "policy_documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Base URL; falls back to the provider's usual endpoint when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn base_url(&self) -> String {
        match (&self.url, self.provider.as_str()) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, "openai") => "https://api.openai.com/v1".to_string(),
            (None, _) => "http://localhost:11434".to_string(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3.2:3b".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct TablesConfig {
    #[serde(default = "default_employee_master")]
    pub employee_master: PathBuf,
    #[serde(default = "default_leave_records")]
    pub leave_records: PathBuf,
    #[serde(default = "default_attendance_logs")]
    pub attendance_logs: PathBuf,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            employee_master: default_employee_master(),
            leave_records: default_leave_records(),
            attendance_logs: default_attendance_logs(),
        }
    }
}

fn default_employee_master() -> PathBuf {
    PathBuf::from("employee_master.csv")
}
fn default_leave_records() -> PathBuf {
    PathBuf::from("leave_intelligence.xlsx")
}
fn default_attendance_logs() -> PathBuf {
    PathBuf::from("attendance_logs_detailed.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_head_rows")]
    pub head_rows: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            head_rows: default_head_rows(),
        }
    }
}

fn default_max_iterations() -> usize {
    MAX_AGENT_ITERATIONS
}
fn default_head_rows() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist, then apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Apply `LLM_MODEL` and `COLLECTION_NAME` overrides. Empty values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(model) = lookup("LLM_MODEL").filter(|v| !v.trim().is_empty()) {
        config.llm.model = model.trim().to_string();
    }
    if let Some(collection) = lookup("COLLECTION_NAME").filter(|v| !v.trim().is_empty()) {
        config.index.collection = collection.trim().to_string();
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.index.collection.trim().is_empty() {
        anyhow::bail!("index.collection must not be empty");
    }

    if !(1..=MAX_AGENT_ITERATIONS).contains(&config.analysis.max_iterations) {
        anyhow::bail!(
            "analysis.max_iterations must be in [1, {}]",
            MAX_AGENT_ITERATIONS
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, local, ollama, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
