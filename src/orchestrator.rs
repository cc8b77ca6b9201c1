//! Routing state machine.
//!
//! ```text
//!  question ──► classify ──┬── document ──► search ──► synthesize ──► answer + chunks
//!                          ├── tabular ───► analyze ───────────────► answer
//!                          ├── hybrid ────► search ──► analyze(policy + question) ──► answer + chunks
//!                          └── unknown ───► fallback message
//! ```
//!
//! Each call is independent; the orchestrator keeps no state between
//! questions. Retrieval and analysis failures are turned into answer text
//! by the stores. Classification and synthesis failures are returned as
//! errors for the top-level handler in [`crate::session`].

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::classifier;
use crate::documents::{DocumentStore, SearchOutcome};
use crate::llm::TextCompletion;
use crate::models::{Answer, EvidenceItem, Route, ScoredChunk};
use crate::synthesizer;
use crate::tabular::TabularStore;

pub const UNKNOWN_ROUTE_MESSAGE: &str = "I couldn't determine the best way to answer that. Try rephrasing it as a policy question or an employee data question.";

pub fn hybrid_instruction(policy_context: &str, question: &str) -> String {
    format!(
        "Context from Corporate Policy:\n{}\n\nUser Question: {}\n\nTask: Use the data (checking employee records, leave, etc.) to answer the User Question, considering the Policy Context provided above.",
        policy_context, question
    )
}

fn evidence(chunks: &[ScoredChunk]) -> Vec<EvidenceItem> {
    chunks.iter().map(EvidenceItem::from).collect()
}

pub struct Orchestrator {
    documents: Arc<DocumentStore>,
    tables: Arc<TabularStore>,
    llm: Arc<dyn TextCompletion>,
    top_k: usize,
}

impl Orchestrator {
    pub fn new(
        documents: Arc<DocumentStore>,
        tables: Arc<TabularStore>,
        llm: Arc<dyn TextCompletion>,
        top_k: usize,
    ) -> Self {
        Self {
            documents,
            tables,
            llm,
            top_k,
        }
    }

    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let route = classifier::classify(self.llm.as_ref(), question)
            .await
            .context("failed to classify question")?;

        match route {
            Route::Document => self.answer_from_documents(question).await,
            Route::Tabular => {
                let result = self.tables.analyze(question).await;
                Ok(Answer {
                    text: result.text,
                    route,
                    evidence: Vec::new(),
                })
            }
            Route::Hybrid => self.answer_hybrid(question).await,
            Route::Unknown => Ok(Answer {
                text: UNKNOWN_ROUTE_MESSAGE.to_string(),
                route,
                evidence: Vec::new(),
            }),
        }
    }

    async fn answer_from_documents(&self, question: &str) -> Result<Answer> {
        let chunks = match self.documents.search(question, self.top_k).await {
            SearchOutcome::Found(chunks) => chunks,
            SearchOutcome::Failed(signal) => {
                return Ok(Answer {
                    text: format!("Error: {}", signal),
                    route: Route::Document,
                    evidence: Vec::new(),
                })
            }
        };

        let context = synthesizer::format_context(&chunks);
        let text = synthesizer::synthesize(self.llm.as_ref(), &context, question)
            .await
            .context("failed to synthesize answer")?;

        Ok(Answer {
            text,
            route: Route::Document,
            evidence: evidence(&chunks),
        })
    }

    async fn answer_hybrid(&self, question: &str) -> Result<Answer> {
        let chunks = match self.documents.search(question, self.top_k).await {
            SearchOutcome::Found(chunks) => chunks,
            SearchOutcome::Failed(signal) => {
                tracing::warn!(error = %signal, "policy retrieval failed, continuing without context");
                Vec::new()
            }
        };

        let policy_context = synthesizer::format_context(&chunks);
        let result = self
            .tables
            .analyze(&hybrid_instruction(&policy_context, question))
            .await;

        Ok(Answer {
            text: result.text,
            route: Route::Hybrid,
            evidence: evidence(&chunks),
        })
    }
}

/// Holds the process's single orchestrator, built on first use.
///
/// Concurrent first callers wait on one construction. A failed
/// construction is returned to its caller and retried by the next one.
pub struct OrchestratorCell {
    documents: Arc<DocumentStore>,
    tables: Arc<TabularStore>,
    llm: Arc<dyn TextCompletion>,
    top_k: usize,
    cell: OnceCell<Orchestrator>,
}

impl OrchestratorCell {
    pub fn new(
        documents: Arc<DocumentStore>,
        tables: Arc<TabularStore>,
        llm: Arc<dyn TextCompletion>,
        top_k: usize,
    ) -> Self {
        Self {
            documents,
            tables,
            llm,
            top_k,
            cell: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<&Orchestrator> {
        self.cell
            .get_or_try_init(|| async {
                tracing::debug!(model = self.llm.model_name(), "building orchestrator");
                self.llm.ping().await.with_context(|| {
                    format!(
                        "text-completion service unavailable (model '{}')",
                        self.llm.model_name()
                    )
                })?;
                Ok::<_, anyhow::Error>(Orchestrator::new(
                    Arc::clone(&self.documents),
                    Arc::clone(&self.tables),
                    Arc::clone(&self.llm),
                    self.top_k,
                ))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AnalysisAgent, AnalysisAgentFactory};
    use crate::embedding::HashEmbedder;
    use crate::index::{ChunkIndex, MemoryIndex};
    use crate::models::DocumentChunk;
    use crate::tables::TableSet;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies to router prompts with `route` and to everything else with
    /// a fixed answer. Counts pings.
    struct Scripted {
        route: &'static str,
        pings_fail: AtomicUsize,
        pings: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(route: &'static str) -> Self {
            Self {
                route,
                pings_fail: AtomicUsize::new(0),
                pings: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextCompletion for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.ends_with("Category:") {
                Ok(self.route.to_string())
            } else {
                Ok("Maternity leave is 26 weeks (Leave Policy, Section 3).".to_string())
            }
        }
        async fn ping(&self) -> Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.pings_fail.load(Ordering::SeqCst) > 0 {
                self.pings_fail.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("connection refused");
            }
            Ok(())
        }
    }

    struct Recorder {
        inputs: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AnalysisAgent for Recorder {
        async fn invoke(&self, input: &str, _max_iterations: usize) -> Result<Value> {
            self.inputs.lock().unwrap().push(input.to_string());
            Ok(json!({"output": "E1001 has 12 leave days left."}))
        }
    }

    struct RecorderFactory {
        inputs: Arc<Mutex<Vec<String>>>,
    }

    impl AnalysisAgentFactory for RecorderFactory {
        fn build(&self, _tables: Arc<TableSet>) -> Arc<dyn AnalysisAgent> {
            Arc::new(Recorder {
                inputs: Arc::clone(&self.inputs),
            })
        }
    }

    async fn documents(texts: &[&str]) -> Arc<DocumentStore> {
        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(HashEmbedder::new(128));
        let chunks: Vec<DocumentChunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| DocumentChunk {
                id: i.to_string(),
                source: "leave_policy.pdf".to_string(),
                page: Some(i as u32 + 1),
                start_index: 0,
                content: t.to_string(),
                hash: String::new(),
            })
            .collect();
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| embedder.embed_one(t)).collect();
        index
            .replace_source("policies", "leave_policy.pdf", &chunks, &vectors, "hash")
            .await
            .unwrap();
        Arc::new(DocumentStore::open(index, embedder, "policies").await)
    }

    struct Fixture {
        orchestrator: Orchestrator,
        llm: Arc<Scripted>,
        inputs: Arc<Mutex<Vec<String>>>,
    }

    async fn fixture(route: &'static str, texts: &[&str]) -> Fixture {
        let llm = Arc::new(Scripted::new(route));
        let inputs = Arc::new(Mutex::new(Vec::new()));
        let tables = Arc::new(TabularStore::new(
            TableSet::default(),
            Arc::new(RecorderFactory {
                inputs: Arc::clone(&inputs),
            }),
            30,
        ));
        let orchestrator = Orchestrator::new(documents(texts).await, tables, llm.clone(), 3);
        Fixture {
            orchestrator,
            llm,
            inputs,
        }
    }

    const POLICY: [&str; 4] = [
        "Maternity leave is 26 weeks of paid leave.",
        "Maternity leave must be requested 8 weeks ahead.",
        "Paternity leave is 2 weeks.",
        "Laptops are company property.",
    ];

    #[tokio::test]
    async fn document_route_synthesizes_with_evidence() {
        let f = fixture("policy", &POLICY).await;
        let answer = f
            .orchestrator
            .answer("What is the maternity leave policy?")
            .await
            .unwrap();
        assert_eq!(answer.route, Route::Document);
        assert_eq!(answer.evidence.len(), 3);
        assert!(answer.text.contains("26 weeks"));
        assert!(f.inputs.lock().unwrap().is_empty());

        let prompts = f.llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains(&answer.evidence[0].excerpt));
    }

    #[tokio::test]
    async fn tabular_route_has_no_evidence() {
        let f = fixture("data", &POLICY).await;
        let answer = f
            .orchestrator
            .answer("How many leave days does employee E1001 have left?")
            .await
            .unwrap();
        assert_eq!(answer.route, Route::Tabular);
        assert!(answer.evidence.is_empty());
        assert_eq!(answer.text, "E1001 has 12 leave days left.");

        let inputs = f.inputs.lock().unwrap();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].starts_with("How many leave days does employee E1001 have left?"));
        assert!(inputs[0].contains("Do NOT return raw JSON"));
    }

    #[tokio::test]
    async fn hybrid_route_feeds_policy_into_analysis() {
        let f = fixture("hybrid", &POLICY).await;
        let answer = f
            .orchestrator
            .answer("Is E1001's maternity leave valid according to policy?")
            .await
            .unwrap();
        assert_eq!(answer.route, Route::Hybrid);
        assert_eq!(answer.evidence.len(), 3);

        let inputs = f.inputs.lock().unwrap();
        assert!(inputs[0].starts_with("Context from Corporate Policy:\n"));
        assert!(inputs[0].contains("User Question: Is E1001's maternity leave valid"));
        // The synthesizer is skipped: only the router prompt reached the model.
        assert_eq!(f.llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_route_is_a_fallback_not_an_error() {
        let f = fixture("weather", &POLICY).await;
        let answer = f.orchestrator.answer("Will it rain?").await.unwrap();
        assert_eq!(answer.route, Route::Unknown);
        assert_eq!(answer.text, UNKNOWN_ROUTE_MESSAGE);
        assert!(answer.evidence.is_empty());
    }

    #[tokio::test]
    async fn empty_index_yields_refusal() {
        let f = fixture("policy", &[]).await;
        let answer = f.orchestrator.answer("What is the sabbatical policy?").await.unwrap();
        assert_eq!(answer.text, synthesizer::REFUSAL);
        assert!(answer.evidence.is_empty());
    }

    #[tokio::test]
    async fn cell_does_not_cache_failed_construction() {
        let llm = Arc::new(Scripted::new("policy"));
        llm.pings_fail.store(1, Ordering::SeqCst);
        let tables = Arc::new(TabularStore::new(
            TableSet::default(),
            Arc::new(RecorderFactory {
                inputs: Arc::new(Mutex::new(Vec::new())),
            }),
            30,
        ));
        let cell = OrchestratorCell::new(documents(&POLICY).await, tables, llm.clone(), 3);

        let err = cell.get().await.err().expect("first build should fail");
        assert!(format!("{:#}", err).contains("connection refused"));
        assert!(!cell.is_initialized());

        cell.get().await.unwrap();
        cell.get().await.unwrap();
        assert!(cell.is_initialized());
        assert_eq!(llm.pings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_construction() {
        let llm = Arc::new(Scripted::new("policy"));
        let tables = Arc::new(TabularStore::new(
            TableSet::default(),
            Arc::new(RecorderFactory {
                inputs: Arc::new(Mutex::new(Vec::new())),
            }),
            30,
        ));
        let cell = OrchestratorCell::new(documents(&POLICY).await, tables, llm.clone(), 3);

        let (a, b) = tokio::join!(cell.get(), cell.get());
        assert!(std::ptr::eq(a.unwrap(), b.unwrap()));
        assert_eq!(llm.pings.load(Ordering::SeqCst), 1);
    }
}
