//! # HR Harness
//!
//! A local-first HR assistant that answers questions from two kinds of
//! data: policy documents (PDF/text, searched semantically) and HR tables
//! (employee master, leave records, attendance logs, queried by an analysis
//! agent).
//!
//! Each question is classified as a policy lookup, a data lookup, or both,
//! and dispatched to the matching store. The answer comes back with the
//! policy chunks that support it.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!   question ───────▶│ Orchestrator │◀── classifier (LLM)
//!                    └──┬────────┬──┘
//!              document │        │ tabular / hybrid
//!                       ▼        ▼
//!               ┌──────────┐  ┌──────────────┐
//!               │ Document │  │ Tabular Store│
//!               │  Store   │  │ + ReAct agent│
//!               └────┬─────┘  └──────┬───────┘
//!                    │               │
//!               ┌────▼─────┐  ┌──────▼───────┐
//!               │  SQLite  │  │ CSV/XLSX/JSON│
//!               │  vectors │  │   sources    │
//!               └──────────┘  └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hrh init                                  # create the vector index
//! hrh ingest ./docs/leave_policy.pdf        # index a policy document
//! hrh ingest ./data/employee_master.csv     # replace the employee table
//! hrh ask "What is the maternity leave policy?"
//! hrh serve                                 # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Chunks, evidence, routes, conversation turns |
//! | [`chunk`] | Recursive character splitting |
//! | [`extract`] | PDF and plain-text extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted chunk index (SQLite) |
//! | [`documents`] | Document Store: snapshot similarity search |
//! | [`xlsx`] | Minimal XLSX reader |
//! | [`tables`] | HR table loaders and the table bundle |
//! | [`tools`] | Table tools for the analysis agent |
//! | [`agent`] | ReAct analysis agent |
//! | [`tabular`] | Tabular Store |
//! | [`llm`] | Text-completion clients |
//! | [`classifier`] | Intent classification |
//! | [`synthesizer`] | Answer synthesis from policy context |
//! | [`orchestrator`] | Routing state machine and lazy construction |
//! | [`ingest`] | Upload-and-ingest boundary |
//! | [`session`] | Top-level query handler and chat history |
//! | [`app`] | Component wiring |
//! | [`stats`] | Status summary |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agent;
pub mod app;
pub mod chunk;
pub mod classifier;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod session;
pub mod stats;
pub mod synthesizer;
pub mod tables;
pub mod tabular;
pub mod tools;
pub mod xlsx;
