//! Answer synthesizer: turns retrieved policy context into an answer.

use anyhow::Result;

use crate::llm::TextCompletion;
use crate::models::ScoredChunk;

/// Returned verbatim whenever the context cannot answer the question.
pub const REFUSAL: &str = "I don't have enough information in the policy documents to answer this.";

const RAG_PROMPT: &str = "You are an expert HR Bot for Helix Corporation.
Answer the question using the guidelines below.

Guidelines:
1. Use ONLY the provided context to answer.
2. If the answer concerns specific policy details, cite the source section.
3. CRITICAL: If the context does not contain enough information to answer, reply exactly with: \"{refusal}\"
4. Do not hallucinate facts, numbers, or policy names.

Context:
{context}

Question: {question}

Answer:";

pub fn rag_prompt(context: &str, question: &str) -> String {
    RAG_PROMPT
        .replace("{refusal}", REFUSAL)
        .replace("{context}", context)
        .replace("{question}", question)
}

/// Join chunk contents in rank order, separated by blank lines.
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One completion call per question; no retries.
///
/// Blank context short-circuits to [`REFUSAL`] without calling the model,
/// and a reply that contains the refusal sentence is normalized to it.
pub async fn synthesize(llm: &dyn TextCompletion, context: &str, question: &str) -> Result<String> {
    if context.trim().is_empty() {
        return Ok(REFUSAL.to_string());
    }

    let reply = llm.complete(&rag_prompt(context, question)).await?;
    if reply.contains(REFUSAL) {
        return Ok(REFUSAL.to_string());
    }
    Ok(reply.trim().to_string())
}
