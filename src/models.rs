//! Core data models used throughout the assistant.
//!
//! These types represent the chunks, evidence, routes, and conversation
//! turns that flow between ingestion, retrieval, and answering.

use serde::Serialize;
use std::fmt;

/// Number of characters of a chunk shown as evidence.
pub const EXCERPT_CHARS: usize = 300;

/// A contiguous excerpt of a policy document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChunk {
    pub id: String,
    pub source: String,
    /// 1-based page number; `None` for formats without pages.
    pub page: Option<u32>,
    /// Byte offset of the chunk's first character within its page text.
    pub start_index: usize,
    pub content: String,
    pub hash: String,
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Citation attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub source: String,
    pub page: Option<u32>,
    pub excerpt: String,
    pub score: f32,
}

impl EvidenceItem {
    /// Page label for display, `"N/A"` when the source has no pages.
    pub fn page_label(&self) -> String {
        match self.page {
            Some(page) => page.to_string(),
            None => "N/A".to_string(),
        }
    }
}

impl From<&ScoredChunk> for EvidenceItem {
    fn from(scored: &ScoredChunk) -> Self {
        Self {
            source: scored.chunk.source.clone(),
            page: scored.chunk.page,
            excerpt: excerpt(&scored.chunk.content, EXCERPT_CHARS),
            score: scored.score,
        }
    }
}

/// Truncate to at most `max_chars` characters, marking the cut with `...`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Retrieval strategy chosen for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Document,
    Tabular,
    Hybrid,
    Unknown,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Document => "document",
            Route::Tabular => "tabular",
            Route::Hybrid => "hybrid",
            Route::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Final answer to one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub route: Route,
    /// Policy chunks consulted; empty for tabular-only and fallback answers.
    pub evidence: Vec<EvidenceItem>,
}
