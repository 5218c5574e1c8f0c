//! # sheet-rag CLI (`srag`)
//!
//! Ask natural-language questions about a CSV or spreadsheet file.
//!
//! ## Usage
//!
//! ```bash
//! srag --config ./config/srag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srag files` | List supported files in the data directory |
//! | `srag show <file>` | Print a loaded table |
//! | `srag ingest <file>` | Build the vector index for a file, or reuse it if unchanged |
//! | `srag ask "<question>"` | Answer one question and record it in history |
//! | `srag chat` | Ask questions interactively from stdin |
//! | `srag status` | Summarize the persisted index |
//! | `srag history <action>` | Browse, export, or prune a user's chat history |
//!
//! ## Examples
//!
//! ```bash
//! export EMBEDDING_API_KEY=...   # Cohere
//! export GROQ_API_KEY=...
//!
//! srag ingest scores.csv
//! srag ask "Who scored 20?" --user alice
//! srag history list --user alice --order oldest
//! srag history export --user alice --output alice.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use sheet_rag::config::{self, Config};
use sheet_rag::embedding;
use sheet_rag::generation;
use sheet_rag::history::{self, HistoryStore, SortOrder};
use sheet_rag::loader;
use sheet_rag::models::{ChatEntry, Table};
use sheet_rag::pipeline::Answer;
use sheet_rag::session::{IngestOutcome, Session};
use sheet_rag::stats;

/// sheet-rag: retrieval-augmented question answering over tabular data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/srag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "srag",
    about = "Ask natural-language questions about CSV and spreadsheet data",
    version,
    long_about = "sheet-rag turns each row of a CSV or Excel file into text chunks, embeds them \
    into a persisted vector index (rebuilt only when the file content changes), and answers \
    questions with a hosted language model grounded in the most relevant rows. \
    Questions and answers are kept in a per-user history."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/srag.toml`. A missing file means built-in defaults.
    #[arg(long, global = true, default_value = "./config/srag.toml")]
    config: PathBuf,

    /// Log debug output to stderr. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported files in the data directory.
    ///
    /// The directory (`[data] dir`, default `./data`) is created if missing.
    Files,

    /// Load a file and print it as a table.
    Show {
        /// File path, or a name inside the data directory.
        file: PathBuf,

        /// Maximum number of rows to print.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Index a file. The existing index is reused when the content is unchanged.
    Ingest {
        /// File path, or a name inside the data directory.
        file: PathBuf,
    },

    /// Answer a question from the indexed data.
    Ask {
        /// The question.
        question: String,

        /// Index this file first (reused if unchanged).
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        user: UserArg,

        /// Also print the retrieved rows the answer was based on.
        #[arg(long)]
        show_context: bool,
    },

    /// Ask questions interactively, one per line, until EOF or `exit`.
    Chat {
        /// Index this file first (reused if unchanged).
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        user: UserArg,
    },

    /// Show what the persisted index contains.
    Status,

    /// Browse and manage chat history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Args)]
struct UserArg {
    /// History owner. Defaults to `[history] default_user`.
    #[arg(long)]
    user: Option<String>,
}

#[derive(Args)]
struct ListArgs {
    #[command(flatten)]
    user: UserArg,

    #[arg(long, value_enum, default_value = "newest")]
    order: Order,

    /// 1-based page number.
    #[arg(long, default_value = "1")]
    page: usize,

    #[arg(long, default_value = "10")]
    per_page: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    Newest,
    Oldest,
}

impl From<Order> for SortOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Newest => SortOrder::NewestFirst,
            Order::Oldest => SortOrder::OldestFirst,
        }
    }
}

/// History subcommands. Entry numbers are 1-based, oldest first.
#[derive(Subcommand)]
enum HistoryAction {
    /// List conversations.
    List {
        #[command(flatten)]
        list: ListArgs,
    },
    /// List conversations whose question or answer contains a term.
    Search {
        /// Case-insensitive search term.
        term: String,

        #[command(flatten)]
        list: ListArgs,
    },
    /// Print one conversation in full.
    Show {
        /// Entry number as shown by `list`.
        number: usize,

        #[command(flatten)]
        user: UserArg,
    },
    /// Delete one conversation.
    Delete {
        /// Entry number as shown by `list`.
        number: usize,

        #[command(flatten)]
        user: UserArg,
    },
    /// Delete every conversation of a user.
    Clear {
        #[command(flatten)]
        user: UserArg,
    },
    /// Export history as JSON.
    Export {
        #[command(flatten)]
        user: UserArg,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Conversation count and date range.
    Stats {
        #[command(flatten)]
        user: UserArg,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    match cli.command {
        Commands::Files => run_files(&cfg)?,
        Commands::Show { file, limit } => {
            let path = resolve_data_file(&cfg, &file);
            let table = loader::load_table(&path)?;
            println!("{}", path.display());
            print_table(&table, limit);
        }
        Commands::Ingest { file } => {
            let mut session = open_session(&cfg, &user_or_default(&cfg, None)).await?;
            let path = resolve_data_file(&cfg, &file);
            let outcome = session
                .use_file(&path)
                .await
                .with_context(|| format!("ingesting {}", path.display()))?;
            print_ingest(&path, &outcome);
        }
        Commands::Ask {
            question,
            file,
            user,
            show_context,
        } => {
            let mut session = open_session(&cfg, &user_or_default(&cfg, user.user)).await?;
            if let Some(file) = file {
                let path = resolve_data_file(&cfg, &file);
                let outcome = session
                    .use_file(&path)
                    .await
                    .with_context(|| format!("ingesting {}", path.display()))?;
                if outcome.rebuilt {
                    eprintln!("Indexed {} ({} chunks)", path.display(), outcome.chunk_count);
                }
            }
            let answer = session.ask(&question).await?;
            print_answer(&answer, show_context);
        }
        Commands::Chat { file, user } => {
            let mut session = open_session(&cfg, &user_or_default(&cfg, user.user)).await?;
            if let Some(file) = file {
                let path = resolve_data_file(&cfg, &file);
                let outcome = session
                    .use_file(&path)
                    .await
                    .with_context(|| format!("ingesting {}", path.display()))?;
                print_ingest(&path, &outcome);
            }
            run_chat(&mut session).await?;
        }
        Commands::Status => stats::run_status(&cfg).await?,
        Commands::History { action } => run_history(&cfg, action)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "sheet_rag=debug,info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn open_session(cfg: &Config, user: &str) -> Result<Session> {
    let embedder = embedding::create_provider(&cfg.embedding)?;
    let generator = generation::create_generator(&cfg.generation)?;
    let session = Session::open(cfg.clone(), user, embedder, generator)
        .await
        .context("opening session")?;
    Ok(session)
}

fn user_or_default(cfg: &Config, user: Option<String>) -> String {
    user.unwrap_or_else(|| cfg.history.default_user.clone())
}

/// A path that exists is used as given; otherwise it is looked up in the
/// data directory.
fn resolve_data_file(cfg: &Config, file: &Path) -> PathBuf {
    if file.exists() || file.is_absolute() {
        return file.to_path_buf();
    }
    let in_data_dir = cfg.data.dir.join(file);
    if in_data_dir.exists() {
        in_data_dir
    } else {
        file.to_path_buf()
    }
}

fn run_files(cfg: &Config) -> Result<()> {
    let files = loader::list_data_files(&cfg.data.dir)?;
    if files.is_empty() {
        println!(
            "No data files found in {}. Supported: {}",
            cfg.data.dir.display(),
            loader::SUPPORTED_EXTENSIONS
                .iter()
                .map(|e| format!(".{}", e))
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Ok(());
    }
    for file in files {
        println!("{}", file.display());
    }
    Ok(())
}

fn print_table(table: &Table, limit: usize) {
    println!("  {} rows x {} columns", table.row_count(), table.column_count());
    println!();
    println!("  {}", table.columns.join(" | "));
    println!("  {}", "-".repeat(table.columns.join(" | ").chars().count()));
    for row in table.rows.iter().take(limit) {
        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        println!("  {}", cells.join(" | "));
    }
    if table.row_count() > limit {
        println!("  ... {} more rows", table.row_count() - limit);
    }
}

fn print_ingest(path: &Path, outcome: &IngestOutcome) {
    println!("ingest {}", path.display());
    println!(
        "  rows: {}, columns: {}",
        outcome.table.row_count(),
        outcome.table.column_count()
    );
    println!("  fingerprint: {}", outcome.fingerprint.short());
    if outcome.rebuilt {
        println!("  index: rebuilt ({} chunks)", outcome.chunk_count);
    } else {
        println!("  index: unchanged, reused ({} chunks)", outcome.chunk_count);
    }
}

fn print_answer(answer: &Answer, show_context: bool) {
    println!("{}", answer.answer);
    if show_context {
        println!();
        println!("Context:");
        for (i, hit) in answer.context.iter().enumerate() {
            println!(
                "  {}. [row {}, score {:.3}]",
                i + 1,
                hit.chunk.row_index + 1,
                hit.score
            );
            for line in hit.chunk.text.lines() {
                println!("     {}", line);
            }
        }
    }
}

async fn run_chat(session: &mut Session) -> Result<()> {
    let interactive = atty::is(atty::Stream::Stdin);
    if interactive {
        eprintln!("Asking as '{}'. Type `exit` to quit.", session.user());
    }

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if interactive {
            eprint!("> ");
            std::io::stderr().flush().ok();
        }
        let Some(line) = lines.next() else { break };
        let line = line.context("reading stdin")?;
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        match session.ask(question).await {
            Ok(answer) => {
                println!("{}", answer.answer);
                println!();
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    Ok(())
}

fn run_history(cfg: &Config, action: HistoryAction) -> Result<()> {
    let store = HistoryStore::new(&cfg.history.dir);

    match action {
        HistoryAction::List { list } => {
            let history = store.load(&user_or_default(cfg, list.user.user))?;
            let entries = history.sorted(list.order.into());
            print_listing(history.user(), entries, list.page, list.per_page, None);
        }
        HistoryAction::Search { term, list } => {
            let history = store.load(&user_or_default(cfg, list.user.user))?;
            let mut hits = history.search(&term);
            if SortOrder::from(list.order) == SortOrder::NewestFirst {
                hits.reverse();
            }
            print_listing(history.user(), hits, list.page, list.per_page, Some(&term));
        }
        HistoryAction::Show { number, user } => {
            let history = store.load(&user_or_default(cfg, user.user))?;
            let index = entry_index(number)?;
            let entry = history
                .entries()
                .get(index)
                .with_context(|| format!("no conversation #{} ({} total)", number, history.len()))?;
            println!("#{}  {}", number, entry.timestamp);
            println!();
            println!("Q: {}", entry.question);
            println!();
            println!("A: {}", entry.answer);
        }
        HistoryAction::Delete { number, user } => {
            let mut history = store.load(&user_or_default(cfg, user.user))?;
            let removed = history.delete(entry_index(number)?)?;
            println!("Deleted #{}: {}", number, removed.question);
        }
        HistoryAction::Clear { user } => {
            let mut history = store.load(&user_or_default(cfg, user.user))?;
            let count = history.len();
            history.clear()?;
            println!("Cleared {} conversations for '{}'", count, history.user());
        }
        HistoryAction::Export { user, output } => {
            let history = store.load(&user_or_default(cfg, user.user))?;
            let json = history.export_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!(
                        "Exported {} conversations to {}",
                        history.len(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
        }
        HistoryAction::Stats { user } => {
            let history = store.load(&user_or_default(cfg, user.user))?;
            let stats = history.stats();
            println!("History for '{}'", history.user());
            println!("  Total conversations: {}", stats.total);
            if let (Some(first), Some(latest)) = (stats.first_chat, stats.latest_chat) {
                println!("  First chat:  {}", first);
                println!("  Latest chat: {}", latest);
            }
        }
    }

    Ok(())
}

fn entry_index(number: usize) -> Result<usize> {
    if number == 0 {
        bail!("entry numbers start at 1");
    }
    Ok(number - 1)
}

fn print_listing(
    user: &str,
    entries: Vec<(usize, &ChatEntry)>,
    page: usize,
    per_page: usize,
    term: Option<&str>,
) {
    if entries.is_empty() {
        match term {
            Some(term) => println!("No conversations matching '{}' for '{}'", term, user),
            None => println!("No chat history for '{}'", user),
        }
        return;
    }

    let page = history::paginate(entries, page, per_page);
    match term {
        Some(term) => println!(
            "Found {} conversations matching '{}'",
            page.total_items, term
        ),
        None => println!("{} conversations for '{}'", page.total_items, user),
    }
    if page.total_pages > 1 {
        println!(
            "Showing {}-{} of {} (page {}/{})",
            page.start + 1,
            page.start + page.items.len(),
            page.total_items,
            page.page,
            page.total_pages
        );
    }
    println!();

    for (index, entry) in page.items {
        println!("#{:<4} {}  {}", index + 1, entry.timestamp, preview(&entry.question, 60));
        println!("      {}", preview(&entry.answer, 72));
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
