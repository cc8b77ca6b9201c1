//! Top-level query handling and chat history.
//!
//! [`handle_question`] is the one place where an error that survived the
//! orchestrator becomes text for the user. Everything above it (CLI, HTTP,
//! chat) receives a [`Reply`] and never an error.

use serde::Serialize;

use crate::models::{ConversationTurn, EvidenceItem, Role, Route};
use crate::orchestrator::OrchestratorCell;

pub const GREETING: &str =
    "Hello! I'm the Helix HR Bot. Ask me about company policies, employee data, or leave records.";

pub const FAILURE_PREFIX: &str = "I encountered an issue while processing your request.";

/// What the user sees for one question.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub text: String,
    pub evidence: Vec<EvidenceItem>,
    /// `None` when the question failed before it was routed.
    pub route: Option<Route>,
    pub failed: bool,
}

pub async fn handle_question(cell: &OrchestratorCell, question: &str) -> Reply {
    let outcome = match cell.get().await {
        Ok(orchestrator) => orchestrator.answer(question).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(answer) => Reply {
            text: answer.text,
            evidence: answer.evidence,
            route: Some(answer.route),
            failed: false,
        },
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "question failed");
            Reply {
                text: format!("{}\n\n{:#}", FAILURE_PREFIX, e),
                evidence: Vec::new(),
                route: None,
                failed: true,
            }
        }
    }
}

/// Append-only chat history for one session.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            turns: vec![ConversationTurn {
                role: Role::Assistant,
                content: GREETING.to_string(),
            }],
        }
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// A conversation bound to the app's orchestrator.
pub struct ChatSession<'a> {
    cell: &'a OrchestratorCell,
    conversation: Conversation,
}

impl<'a> ChatSession<'a> {
    pub fn new(cell: &'a OrchestratorCell) -> Self {
        Self {
            cell,
            conversation: Conversation::new(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Record the question, answer it, and record the answer.
    pub async fn ask(&mut self, question: &str) -> Reply {
        self.conversation.push(Role::User, question);
        let reply = handle_question(self.cell, question).await;
        self.conversation.push(Role::Assistant, reply.text.clone());
        reply
    }
}
