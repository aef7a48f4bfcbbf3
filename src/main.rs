//! # repochat CLI
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repochat index <dir> [--name <repo>] [--description <text>]` | Chunk, embed and save an index for a checked-out repository |
//! | `repochat list` | List repositories with a saved index |
//! | `repochat ask <repo> <question>` | Ask a single question |
//! | `repochat chat <repo>` | Interactive conversation (`clear` resets it, `quit` ends it) |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter); answers go to stdout.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use repochat::config::{Config, EmbeddingConfig, GenerationConfig};
use repochat::embedder::Embedder;
use repochat::embedder::http::HttpEmbedder;
use repochat::embedder::mock::MockEmbedder;
use repochat::indexer::core::Indexer;
use repochat::indexer::source::FsSource;
use repochat::llm::AnswerGenerator;
use repochat::llm::mock::MockGenerator;
use repochat::llm::openai::OpenAiGenerator;
use repochat::session::SessionCommand;
use repochat::{Answer, IndexCatalog, Session, SessionError};

#[derive(Parser)]
#[command(name = "repochat", version, about = "Ask questions about a code repository")]
struct Cli {
    /// Path to the JSON configuration file. Missing file means defaults.
    #[arg(long, global = true, default_value = "repochat.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a local repository checkout, replacing any previous index.
    Index {
        path: PathBuf,

        /// Repository name; defaults to the directory name.
        #[arg(long)]
        name: Option<String>,

        /// Short summary of the repository, included in every prompt.
        #[arg(long)]
        description: Option<String>,
    },

    /// List indexed repositories.
    List,

    /// Ask one question.
    Ask {
        repo: String,

        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Start an interactive conversation.
    Chat { repo: String },
}

fn build_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    match config.provider.as_str() {
        "openai" => Arc::new(HttpEmbedder::from_config(config)),
        _ => Arc::new(MockEmbedder::new(config.dimensions)),
    }
}

fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    Ok(match config.provider.as_str() {
        "openai" => Arc::new(OpenAiGenerator::from_config(config)?),
        _ => Arc::new(MockGenerator::default()),
    })
}

fn repository_name(path: &Path, name: Option<String>) -> Result<String> {
    if let Some(name) = name {
        return Ok(name);
    }
    let canonical = path
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    match canonical.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_string()),
        None => bail!("cannot derive a repository name from {}, pass --name", path.display()),
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template("  {bar:40.cyan/blue} {pos}/{len} units {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
    pb.set_style(style);
    pb
}

async fn index(
    config: &Config,
    path: &Path,
    name: Option<String>,
    description: Option<String>,
) -> Result<()> {
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    let repository_id = repository_name(path, name)?;
    let embedder = build_embedder(&config.embedding);
    let mut indexer = Indexer::new(config, embedder.as_ref())?.with_progress(progress_bar());
    if let Some(description) = description {
        indexer = indexer.with_description(description);
    }
    let catalog = IndexCatalog::new(&config.index.store_dir);

    let mut source = FsSource::new(path);
    let (_, stats) = indexer
        .index_into(&repository_id, &mut source, &catalog)
        .await
        .with_context(|| format!("indexing {repository_id} failed"))?;

    println!(
        "Indexed {repository_id}: {} files ({} empty), {} units, {} dims",
        stats.documents, stats.empty_documents, stats.units, stats.dimensions
    );
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let catalog = IndexCatalog::new(&config.index.store_dir);
    let names = catalog.list()?;
    if names.is_empty() {
        println!("No indexed repositories in {}", catalog.root().display());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn open_session(config: &Config, repo: &str) -> Result<Session> {
    let catalog = IndexCatalog::new(&config.index.store_dir);
    let index = catalog
        .open(repo)
        .with_context(|| format!("cannot open index for {repo}"))?;
    let embedder = build_embedder(&config.embedding);
    let generator = build_generator(&config.generation)?;
    Ok(Session::new(Arc::new(index), embedder, generator, config)?)
}

fn print_answer(answer: &Answer) {
    println!("\n{}\n", answer.text);
    let files = answer.source_files();
    if !files.is_empty() {
        println!("Source files:");
        for file in files {
            println!("  • {file}");
        }
    }
    println!();
}

async fn chat(session: &Session) -> Result<()> {
    println!(
        "Chatting about {}. Type 'clear' to reset the conversation, 'quit' to exit.",
        session.repository().name
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match SessionCommand::parse(&line) {
            SessionCommand::Ask(question) if question.is_empty() => continue,
            SessionCommand::Ask(question) => {
                let cancel = CancellationToken::new();
                let watcher = tokio::spawn({
                    let cancel = cancel.clone();
                    async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            cancel.cancel();
                        }
                    }
                });
                let result = session.ask_with_cancel(&question, cancel).await;
                watcher.abort();
                match result {
                    Ok(answer) => print_answer(&answer),
                    Err(SessionError::Cancelled) => println!("(cancelled)"),
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            SessionCommand::Clear => {
                session.clear()?;
                println!("Conversation cleared.");
            }
            SessionCommand::Quit => break,
        }
    }
    session.quit();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;
    info!("Store dir: {}", config.index.store_dir.display());

    match cli.command {
        Commands::Index {
            path,
            name,
            description,
        } => index(&config, &path, name, description).await,
        Commands::List => list(&config),
        Commands::Ask { repo, question } => {
            let session = open_session(&config, &repo)?;
            let answer = session.ask(&question.join(" ")).await?;
            print_answer(&answer);
            Ok(())
        }
        Commands::Chat { repo } => {
            let session = open_session(&config, &repo)?;
            chat(&session).await
        }
    }
}
