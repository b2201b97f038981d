//! CLI command definitions, routing, and tracing setup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tracing::{info, warn};

use pagebrief_core::{RateLimiter, SessionPipeline, SsrfGuard};
use pagebrief_extractor::Extractor;
use pagebrief_generator::{OpenAiCompatibleModel, SummaryGenerator};
use pagebrief_shared::{
    AppConfig, PageBriefError, SessionId, expand_home, init_config, load_config,
    validate_api_key,
};
use pagebrief_storage::{SessionStore, Storage};

use crate::routes::{self, AppState};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PageBrief: summarize any web page, token by token.
#[derive(Parser)]
#[command(
    name = "pagebrief",
    version,
    about = "Summarize web pages with an LLM and keep a searchable history.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the HTTP API.
    Serve {
        /// Bind address (overrides `server.host`).
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides `server.port`).
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides `storage.db_path`).
        #[arg(long)]
        db: Option<String>,
    },

    /// List stored sessions, newest first.
    List {
        /// Only sessions whose URL, title or summary contains this text.
        #[arg(short, long)]
        q: Option<String>,

        /// Database path (overrides `storage.db_path`).
        #[arg(long)]
        db: Option<String>,
    },

    /// Print one session as JSON.
    Show {
        /// Session id.
        id: String,

        #[arg(long)]
        db: Option<String>,
    },

    /// Permanently delete a session.
    Delete {
        /// Session id.
        id: String,

        #[arg(long)]
        db: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pagebrief=info,tower_http=info",
        1 => "pagebrief=debug,tower_http=debug",
        _ => "pagebrief=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { host, port, db } => cmd_serve(host, port, db).await,
        Command::List { q, db } => cmd_list(q.as_deref(), db.as_deref()).await,
        Command::Show { id, db } => cmd_show(&id, db.as_deref()).await,
        Command::Delete { id, db } => cmd_delete(&id, db.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

fn db_path(config: &AppConfig, db: Option<&str>) -> PathBuf {
    expand_home(db.unwrap_or(&config.storage.db_path))
}

fn parse_id(id: &str) -> Result<SessionId> {
    id.parse()
        .map_err(|e| eyre!("invalid session id '{id}': {e}"))
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(host: Option<String>, port: Option<u16>, db: Option<String>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(db) = db {
        config.storage.db_path = db;
    }

    // A missing API key is fatal before binding.
    let api_key = validate_api_key(&config)?;

    let path = db_path(&config, None);
    let storage = Storage::open(&path).await?;
    // Sessions left mid-flight by a previous process can never finish.
    storage.recover_interrupted().await?;
    let store: Arc<dyn SessionStore> = Arc::new(storage);

    let guard = SsrfGuard::new(&config.guard);
    let extractor = Arc::new(Extractor::with_redirect_policy(
        config.extractor.clone(),
        guard.redirect_policy(),
    )?);
    let model = OpenAiCompatibleModel::new(&config.llm, api_key)?;
    let generation_timeout = config.llm.generation_timeout();
    let generator = SummaryGenerator::new(Arc::new(model), generation_timeout);

    let pipeline = SessionPipeline::new(
        store,
        extractor,
        generator,
        guard,
        Arc::new(RateLimiter::new(&config.rate_limit)),
    );
    let state = Arc::new(AppState {
        pipeline,
        trust_forwarded_for: config.server.trust_forwarded_for,
    });
    if config.server.trust_forwarded_for {
        warn!("trusting X-Forwarded-For; rate limits can be bypassed unless a proxy sets it");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| eyre!("cannot bind {addr}: {e}"))?;

    info!(
        %addr,
        db = %path.display(),
        model = %config.llm.model,
        "PageBrief API listening"
    );

    axum::serve(
        listener,
        routes::router(Arc::clone(&state)).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Clients may be gone, but their summaries are still being written.
    state
        .pipeline
        .drain(generation_timeout + Duration::from_secs(5))
        .await;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ---------------------------------------------------------------------------
// Session admin
// ---------------------------------------------------------------------------

async fn cmd_list(q: Option<&str>, db: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&db_path(&config, db)).await?;

    let filter = q.map(str::trim).filter(|q| !q.is_empty());
    let sessions = storage.list(filter).await?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    for s in &sessions {
        println!(
            "{}  {:<9}  {}  {}",
            s.id,
            s.status,
            s.created_at.format("%Y-%m-%d %H:%M"),
            s.title.as_deref().unwrap_or(&s.url),
        );
    }
    println!("\n{} session(s)", sessions.len());
    Ok(())
}

async fn cmd_show(id: &str, db: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&db_path(&config, db)).await?;

    let session = storage.get(parse_id(id)?).await?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

async fn cmd_delete(id: &str, db: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open(&db_path(&config, db)).await?;

    match storage.delete(parse_id(id)?).await {
        Ok(()) => {
            println!("Deleted session {id}");
            Ok(())
        }
        Err(PageBriefError::NotFound { .. }) => Err(eyre!("no session with id {id}")),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
