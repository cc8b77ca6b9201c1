//! # HR Harness CLI (`hrh`)
//!
//! ## Usage
//!
//! ```bash
//! hrh --config ./config/hrh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrh init` | Create the vector index directory and schema |
//! | `hrh status` | Show the model, index, and table row counts |
//! | `hrh ingest <file>` | Ingest a pdf/txt policy or a csv/xlsx/json data file |
//! | `hrh search "<query>"` | Similarity search over policy chunks |
//! | `hrh ask "<question>"` | Answer one question with evidence |
//! | `hrh chat` | Interactive question loop |
//! | `hrh reload` | Reload the vector snapshot and all tables |
//! | `hrh serve` | Start the HTTP API |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use hr_harness::app::App;
use hr_harness::config::{self, Config};
use hr_harness::documents::SearchOutcome;
use hr_harness::index::SqliteIndex;
use hr_harness::models::{excerpt, EvidenceItem, EXCERPT_CHARS};
use hr_harness::server;
use hr_harness::session::{handle_question, ChatSession, Reply, GREETING};
use hr_harness::stats::StatusReport;

/// HR Harness: answers HR policy and employee-data questions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "hrh",
    about = "HR Harness: answers HR policy and employee-data questions with evidence",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hrh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector index directory and schema. Idempotent.
    Init,

    /// Show the model, vector index, and HR table status.
    Status,

    /// Ingest one file.
    ///
    /// `pdf` and `txt` files are chunked, embedded, and added to the
    /// vector index. `csv`, `xlsx`, and `json` files replace the employee
    /// master, leave records, and attendance logs respectively.
    Ingest {
        /// Path to the file.
        path: PathBuf,
    },

    /// Search policy chunks by similarity.
    Search {
        query: String,

        /// Number of chunks to return.
        #[arg(long, short)]
        k: Option<usize>,
    },

    /// Answer a single question.
    Ask { question: String },

    /// Ask questions interactively. `exit` or `quit` ends the session.
    Chat,

    /// Reload the vector snapshot and all three tables.
    Reload,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let index = SqliteIndex::open(&cfg.index).await?;
            index.close().await;
            println!(
                "Vector index initialized at {}",
                cfg.index.db_path().display()
            );
        }
        Commands::Status => {
            let app = App::from_config(cfg).await?;
            StatusReport::collect(&app).await?.print();
        }
        Commands::Ingest { path } => {
            let app = App::from_config(cfg).await?;
            let report = app.ingestor.ingest_file(&path).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Search { query, k } => run_search(cfg, &query, k).await?,
        Commands::Ask { question } => {
            let app = App::from_config(cfg).await?;
            let reply = handle_question(&app.orchestrator, &question).await;
            print_reply(&reply);
            if reply.failed {
                std::process::exit(1);
            }
        }
        Commands::Chat => run_chat(cfg).await?,
        Commands::Reload => {
            let app = App::from_config(cfg).await?;
            let summary = app.reload().await?;
            println!("reload");
            println!("  chunks:          {}", summary.chunks);
            println!("  employees:       {}", summary.employees);
            println!("  leave_records:   {}", summary.leave_records);
            println!("  attendance_logs: {}", summary.attendance_logs);
            println!("ok");
        }
        Commands::Serve => {
            let app = Arc::new(App::from_config(cfg).await?);
            server::run_server(app).await?;
        }
    }

    Ok(())
}

async fn run_search(cfg: Config, query: &str, k: Option<usize>) -> Result<()> {
    let k = k.unwrap_or(cfg.retrieval.top_k);
    let app = App::from_config(cfg).await?;
    match app.documents.search(query, k).await {
        SearchOutcome::Found(hits) if hits.is_empty() => println!("No results."),
        SearchOutcome::Found(hits) => {
            for (i, hit) in hits.iter().enumerate() {
                let item = EvidenceItem::from(hit);
                println!(
                    "{}. [{:.3}] {} (Page {})",
                    i + 1,
                    hit.score,
                    item.source,
                    item.page_label()
                );
                println!("    {}", excerpt(&hit.chunk.content, EXCERPT_CHARS).replace('\n', " "));
            }
        }
        SearchOutcome::Failed(message) => anyhow::bail!("search failed: {}", message),
    }
    Ok(())
}

fn print_reply(reply: &Reply) {
    println!("{}", reply.text);
    if reply.evidence.is_empty() {
        return;
    }
    println!();
    println!("Evidence:");
    for (i, item) in reply.evidence.iter().enumerate() {
        println!("Source {}: `{}` (Page {})", i + 1, item.source, item.page_label());
        println!("> {}", item.excerpt.replace('\n', " "));
    }
}

async fn run_chat(cfg: Config) -> Result<()> {
    let app = App::from_config(cfg).await?;
    let mut session = ChatSession::new(&app.orchestrator);
    println!("{}", GREETING);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }
        let reply = session.ask(question).await;
        println!();
        print_reply(&reply);
    }
    Ok(())
}
