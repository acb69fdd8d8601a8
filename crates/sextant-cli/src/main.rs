mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use sextant_core::config::Config;
use sextant_core::error::QueryError;
use sextant_query::Engine;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "sextant",
    version,
    about = "Ask questions about a codebase and get ranked, provenance-tagged answers",
    long_about = "Sextant fuses a precise index snapshot, a language server and a syntax-level\n\
        fallback into one answer per question, tagging every response with the repository\n\
        state it was computed against and how complete it is.\n\n\
        Quick start:\n  \
        sextant status\n  \
        sextant search \"Engine\"\n  \
        sextant refs \"src/engine/Engine#search()\"\n  \
        sextant impact search --depth 3"
)]
struct Cli {
    /// Enable verbose logging (set log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (default: .sextant/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Path to the repository root (default: current directory)
    #[arg(short, long, global = true)]
    path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search symbols by name
    ///
    /// Examples:
    ///   sextant search "Engine"
    ///   sextant search run --scope src/cli --kind function --limit 5
    Search {
        query: String,

        /// Restrict results to a repository-relative directory
        #[arg(long)]
        scope: Option<String>,

        /// Filter by symbol kind (repeatable)
        #[arg(long = "kind")]
        kinds: Vec<String>,

        /// Maximum number of results to return
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Describe one symbol by stable id, backend id or bare name
    Symbol {
        symbol_id: String,

        /// Repository state to report against (head or full)
        #[arg(long, default_value = "head")]
        mode: String,
    },
    /// List references to a symbol
    ///
    /// Example: sextant refs "src/engine/Engine#search()" --include-tests --merge union
    Refs {
        symbol_id: String,

        #[arg(long)]
        scope: Option<String>,

        #[arg(long)]
        include_tests: bool,

        #[arg(long, default_value = "100")]
        limit: usize,

        /// How backend answers combine: prefer-first or union
        #[arg(long)]
        merge: Option<String>,
    },
    /// Estimate the blast radius of changing a symbol
    Impact {
        symbol_id: String,

        /// Transitive caller depth (1-4)
        #[arg(long, default_value = "2")]
        depth: u32,

        #[arg(long)]
        include_tests: bool,
    },
    /// Walk callers and callees around a symbol
    Callgraph {
        symbol_id: String,

        /// callers, callees or both
        #[arg(long, default_value = "both")]
        direction: String,

        #[arg(long, default_value = "2")]
        depth: u32,

        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Summarize modules and the dependencies between them
    Arch {
        /// Drop cached views and recompute
        #[arg(long)]
        refresh: bool,

        /// Attribute edges to symbols outside the repository to external modules
        #[arg(long)]
        include_external: bool,

        /// Collapse module ids to this many path segments
        #[arg(long)]
        depth: Option<usize>,

        /// Only show this module and its submodules
        #[arg(long)]
        module: Option<String>,
    },
    /// Show repository state, backend availability, cache and job statistics
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let prepared = prepare(&cli);

    // Logs go to stderr; stdout carries the JSON response.
    let level = match (&prepared, cli.verbose) {
        (_, true) => "debug".to_string(),
        (Ok((_, config)), false) => config.logging.level.clone(),
        (Err(_), false) => "warn".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let outcome = prepared.and_then(|(repo_root, config)| run(cli.command, &repo_root, config));
    match outcome.and_then(|value| Ok(serde_json::to_string_pretty(&value)?)) {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", error_json(&e));
            ExitCode::FAILURE
        }
    }
}

fn prepare(cli: &Cli) -> Result<(PathBuf, Config)> {
    let repo_root = resolve_path(cli.path.as_deref())?;
    let config_file = cli.config.as_deref().map(Path::new);
    let config = Config::load_with_file(Some(&repo_root), config_file)
        .context("Failed to load configuration")?;
    Ok((repo_root, config))
}

fn run(command: Commands, repo_root: &Path, config: Config) -> Result<Value> {
    let engine = Engine::open(repo_root, config)?;

    let result = match command {
        Commands::Search {
            query,
            scope,
            kinds,
            limit,
        } => commands::search::run(&engine, query, scope, kinds, limit),
        Commands::Symbol { symbol_id, mode } => commands::symbol::run(&engine, symbol_id, &mode),
        Commands::Refs {
            symbol_id,
            scope,
            include_tests,
            limit,
            merge,
        } => commands::refs::run(&engine, symbol_id, scope, include_tests, limit, merge),
        Commands::Impact {
            symbol_id,
            depth,
            include_tests,
        } => commands::impact::run(&engine, symbol_id, depth, include_tests),
        Commands::Callgraph {
            symbol_id,
            direction,
            depth,
            limit,
        } => commands::callgraph::run(&engine, symbol_id, direction, depth, limit),
        Commands::Arch {
            refresh,
            include_external,
            depth,
            module,
        } => commands::arch::run(&engine, refresh, include_external, depth, module),
        Commands::Status => commands::status::run(&engine),
    };

    if !engine.shutdown(SHUTDOWN_TIMEOUT) {
        tracing::warn!("Background jobs did not finish before exit");
    }
    result
}

fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir()?,
    };
    std::fs::canonicalize(&path)
        .with_context(|| format!("Failed to resolve repository path {}", path.display()))
}

/// `{code, message, ...}` for query failures; anything else is an internal error.
fn error_json(err: &anyhow::Error) -> String {
    let value = match err.downcast_ref::<QueryError>() {
        Some(query_error) => serde_json::to_value(query_error).unwrap_or_else(
            |_| json!({ "code": query_error.code, "message": query_error.message }),
        ),
        None => json!({
            "code": "internal_error",
            "message": format!("{err:#}"),
        }),
    };
    value.to_string()
}
