//! # Anime Chat CLI (`anime-chat`)
//!
//! Loads (or builds, on first run) the semantic index, then starts an
//! interactive recommendation session on stdin/stdout.
//!
//! ## Usage
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! anime-chat                                   # defaults or ./config/anime-chat.toml
//! anime-chat --config ./config/anime-chat.toml
//! ```
//!
//! Type `exit` to leave. Answers are printed to stdout as `answer: <text>`;
//! logs go to stderr and follow `RUST_LOG` (default `info`).

use anime_chat::catalog::JikanCatalog;
use anime_chat::completion::create_completion_model;
use anime_chat::config::{self, Config, Credentials};
use anime_chat::conversation::{Conversation, ConversationSettings, StdinInput};
use anime_chat::embedding::create_embedder;
use anime_chat::index::{get_or_build_index, BuildSettings, IndexOrigin};
use anime_chat::store::SqliteIndexStorage;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "./config/anime-chat.toml";

/// Conversational anime recommendations grounded in a top-anime catalog.
#[derive(Parser)]
#[command(name = "anime-chat", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When omitted, `./config/anime-chat.toml` is used if present and the
    /// built-in defaults otherwise.
    #[arg(long, env = "ANIME_CHAT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;
    let credentials = Credentials::from_env();
    if !cfg.embedding.is_enabled() {
        anyhow::bail!("embedding.provider is 'disabled'; the semantic index needs an embedding provider");
    }

    let embedder = create_embedder(&cfg.embedding, &credentials)?;
    let model = create_completion_model(&cfg.completion, &credentials)?;
    let catalog = JikanCatalog::new(&cfg.catalog)?;
    let storage = SqliteIndexStorage::new(&cfg.index.path);

    let loaded = get_or_build_index(
        &storage,
        &catalog,
        embedder.as_ref(),
        &BuildSettings::from_config(&cfg),
    )
    .await?;

    if let IndexOrigin::BuiltUnpersisted(err) = &loaded.origin {
        warn!(error = %err, "semantic index could not be saved; it will be rebuilt next run");
    }
    info!(
        documents = loaded.index.len(),
        model = model.model_name(),
        "ready"
    );

    let conversation = Conversation::new(
        &loaded.index,
        embedder.as_ref(),
        model.as_ref(),
        ConversationSettings::from_config(&cfg),
    );
    let mut input = StdinInput::stdin();
    let mut stdout = std::io::stdout();
    conversation.run(&mut input, &mut stdout).await?;

    Ok(())
}

fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        return config::load_config(path);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        return config::load_config(default_path);
    }

    let cfg = Config::default();
    config::validate(&cfg)?;
    Ok(cfg)
}
