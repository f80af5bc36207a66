//! CLI entry point for semdex.
//!
//! Provides commands for indexing, searching, watching and serving a workspace.
//! Logs go to stderr; stdout carries results and protocol responses only.

use anyhow::{Context, Result, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use console::{Term, style};
use semdex::config::{INDEX_DIR_NAME, SETTINGS_FILE_NAME};
use semdex::{Engine, IndexReport, ProtocolServer, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Offline semantic search for markdown and text documents
#[derive(Parser)]
#[command(
    name = "semdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Offline semantic search for markdown and text documents",
    long_about = "Index a workspace's documents with a local embedding model and search them by meaning.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root (defaults to the nearest directory containing .semdex)
    #[arg(long, global = true, env = "SEMDEX_ROOT")]
    root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .semdex directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Index documents (the whole workspace when no paths are given)
    Index {
        /// Files or directories to index
        paths: Vec<PathBuf>,
    },

    /// Search indexed documents by meaning
    #[command(after_help = "Examples:\n  semdex search \"how are errors retried\"\n  semdex search ownership --prefix notes/ --limit 3 --json")]
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only return documents under this workspace-relative prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index the workspace, then follow file changes until Ctrl-C
    Watch,

    /// Answer JSON-lines requests on stdin while watching the workspace
    Serve,

    /// Drop all indexed vectors and cached embeddings
    Clear,

    /// Show index and model status
    Status {
        /// Output status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display active settings
    Config,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "semdex=warn",
        1 => "semdex=info",
        2 => "semdex=debug",
        _ => "semdex=trace",
    };
    let filter = EnvFilter::try_from_env("SEMDEX_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match (&cli.config, &cli.root) {
        (Some(path), _) => Settings::load_from(path)
            .with_context(|| format!("Configuration error loading from {}", path.display()))?,
        (None, Some(root)) => Settings::load_for_root(root).context("Configuration error")?,
        (None, None) => Settings::load().context("Configuration error")?,
    };
    if let Some(root) = &cli.root {
        settings.workspace_root = Some(root.clone());
    }
    settings.validate()?;
    Ok(settings)
}

/// Open the engine and load the model.
async fn open_engine(mut settings: Settings) -> Result<Engine> {
    settings.embedding.show_download_progress = Term::stderr().is_term();
    let engine = Engine::open(settings)?;
    engine.init().await.context("Failed to load embedding model")?;
    Ok(engine)
}

fn print_report(report: &IndexReport) {
    eprintln!(
        "{} {} embedded, {} reused, {} unchanged, {} removed, {} failed",
        style("Indexed:").green().bold(),
        report.embedded,
        report.reused,
        report.unchanged,
        report.removed,
        report.failed
    );
}

/// Expand directories into the documents they contain.
fn expand_paths(engine: &Engine, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir()?;
    let mut files = Vec::new();
    for path in paths {
        let absolute = cwd.join(path);
        let absolute = std::fs::canonicalize(&absolute).unwrap_or(absolute);
        if absolute.is_dir() {
            files.extend(
                engine
                    .coordinator()
                    .walker()
                    .walk()
                    .filter(|file| file.starts_with(&absolute)),
            );
        } else {
            files.push(absolute);
        }
    }
    Ok(files)
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn run_index(settings: Settings, paths: &[PathBuf]) -> Result<()> {
    let engine = open_engine(settings).await?;
    let report = if paths.is_empty() {
        engine.reindex_all().await
    } else {
        let files = expand_paths(&engine, paths)?;
        engine.index_paths(&files).await
    };
    engine.shutdown().await?;
    print_report(&report);
    if report.failed > 0 {
        bail!("{} document(s) failed to index", report.failed);
    }
    Ok(())
}

async fn run_search(
    settings: Settings,
    query: &str,
    limit: Option<usize>,
    prefix: Option<&str>,
    json: bool,
) -> Result<()> {
    let engine = open_engine(settings).await?;
    let results = engine.search(query, limit, prefix).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No matching documents.");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. {} {} {}",
            rank + 1,
            style(&result.file_path).cyan().bold(),
            style(format!("[{}..{}]", result.range.0, result.range.1)).dim(),
            style(format!("{:.3}", result.score)).green()
        );
        if !result.snippet.is_empty() {
            println!("   {}", result.snippet);
        }
    }
    Ok(())
}

async fn run_watch(settings: Settings) -> Result<()> {
    let engine = open_engine(settings).await?;
    print_report(&engine.reindex_all().await);

    let shutdown = CancellationToken::new();
    let watcher = engine.watcher()?;
    let watch_task = tokio::spawn(watcher.run(engine.coordinator().clone(), shutdown.clone()));
    eprintln!(
        "{} {} (Ctrl-C to stop)",
        style("Watching").green().bold(),
        engine.root().display()
    );

    wait_for_ctrl_c().await;
    shutdown.cancel();
    let _ = watch_task.await;
    engine.shutdown().await?;
    Ok(())
}

async fn start_serving(
    server: Arc<ProtocolServer>,
    settings: Settings,
    shutdown: CancellationToken,
) {
    let watch_enabled = settings.watch.enabled;
    let started = async {
        let engine = Arc::new(Engine::open(settings)?);
        server.attach(Arc::clone(&engine));
        engine.init().await?;
        let report = engine.reindex_all().await;
        info!(?report, "initial index complete");

        if watch_enabled {
            let watcher = engine.watcher()?;
            tokio::spawn(watcher.run(engine.coordinator().clone(), shutdown));
        }
        Ok::<_, semdex::EngineError>(())
    };

    if let Err(e) = started.await {
        error!(error = %e, "engine failed to start");
    }
}

async fn run_serve(settings: Settings) -> Result<()> {
    let server = Arc::new(ProtocolServer::new());
    let shutdown = CancellationToken::new();

    // Requests are accepted while the engine starts; they get INDEX_UNAVAILABLE
    let startup = tokio::spawn(start_serving(
        Arc::clone(&server),
        settings,
        shutdown.clone(),
    ));

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    tokio::select! {
        served = server.serve(stdin, stdout) => served.context("protocol I/O failed")?,
        _ = wait_for_ctrl_c() => info!("interrupted"),
    }

    shutdown.cancel();
    startup.abort();
    if let Some(engine) = server.engine() {
        engine.shutdown().await?;
    }
    Ok(())
}

async fn run_clear(settings: Settings) -> Result<()> {
    let engine = Engine::open(settings)?;
    engine.clear_index()?;
    engine.shutdown().await?;
    eprintln!("{} index and embedding cache", style("Cleared").green().bold());
    Ok(())
}

fn run_status(settings: Settings, json: bool) -> Result<()> {
    let engine = Engine::open(settings)?;
    let status = engine.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("{}", style("Index Status").cyan().bold());
    println!("  Workspace:  {}", status.workspace_root.display());
    println!("  Model:      {}", status.model_id);
    println!("  Documents:  {}", status.documents);
    println!("  Chunks:     {}", status.chunks);
    Ok(())
}

fn run_init(root: &Path, force: bool) -> Result<()> {
    let config_path = root.join(INDEX_DIR_NAME).join(SETTINGS_FILE_NAME);
    if config_path.exists() && !force {
        bail!(
            "Configuration file already exists at: {}\nUse --force to overwrite",
            config_path.display()
        );
    }

    let path = Settings::init_config_file(root, force)?;
    println!("Created configuration file at: {}", path.display());
    println!("Edit this file to customize your settings.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Init { force } = cli.command {
        let root = match &cli.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        };
        return run_init(&root, force);
    }

    let settings = load_settings(&cli)?;
    if !settings.index_dir_path().is_dir() {
        eprintln!(
            "{} no {INDEX_DIR_NAME} directory found; using default configuration (run 'semdex init' to customize)",
            style("Note:").yellow()
        );
    }

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Index { paths } => run_index(settings, &paths).await,
        Commands::Search {
            query,
            limit,
            prefix,
            json,
        } => run_search(settings, &query, limit, prefix.as_deref(), json).await,
        Commands::Watch => run_watch(settings).await,
        Commands::Serve => run_serve(settings).await,
        Commands::Clear => run_clear(settings).await,
        Commands::Status { json } => run_status(settings, json),
        Commands::Config => {
            println!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}
