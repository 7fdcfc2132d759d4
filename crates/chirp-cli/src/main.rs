//! chirp - command line client for the chirp social API.
//!
//! Signs in, keeps the token pair in the configured credential store and
//! sends authenticated requests. Expired access tokens are refreshed
//! transparently by the core client.

mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chirp_core::{Config, SessionController};

#[derive(Parser)]
#[command(name = "chirp")]
#[command(about = "Command line client for the chirp social API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// API base URL (overrides config and CHIRP_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Credential store: file, keyring or memory (overrides config and CHIRP_STORE)
    #[arg(long, global = true)]
    store: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email (defaults to the last one used)
        #[arg(long, short = 'e')]
        email: Option<String>,

        /// Password; prompted for when not given
        #[arg(long, env = "CHIRP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and sign in to it
    Register {
        #[arg(long, short = 'u')]
        username: String,

        #[arg(long, short = 'e')]
        email: String,

        #[arg(long)]
        full_name: Option<String>,

        /// Password; prompted for when not given
        #[arg(long, env = "CHIRP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami {
        /// Print the profile as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the session state
    Status {
        /// Print the session as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send an authenticated request to an API path
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the API URL, e.g. /posts/
        path: String,

        /// JSON request body
        #[arg(long, short = 'd', conflicts_with = "form")]
        data: Option<String>,

        /// Form field as key=value (repeatable)
        #[arg(long, short = 'f', value_parser = commands::request::parse_key_val)]
        form: Vec<(String, String)>,

        /// Extra header as "Name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; `--log-file` adds a plain-text copy. The returned
/// guard flushes the file writer and must live until exit.
fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("--log-file must name a file"))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env()?;
    if let Some(ref url) = cli.api_url {
        config.api_url = Some(url.clone());
    }
    if let Some(ref store) = cli.store {
        config.store = store.parse()?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.debug, cli.log_file.as_deref())?;

    let config = load_config(&cli)?;
    debug!(api_url = config.api_url(), store = ?config.store, "Configuration loaded");

    let client = Arc::new(config.build_client()?);
    let controller = SessionController::init(client);
    let config_path = cli.config.as_deref();

    info!("chirp starting");
    match cli.command {
        Commands::Login { email, password } => {
            commands::auth::login(&controller, &config, config_path, email, password).await
        }
        Commands::Register {
            username,
            email,
            full_name,
            password,
        } => {
            commands::auth::register(&controller, config_path, username, email, full_name, password)
                .await
        }
        Commands::Logout => commands::auth::logout(&controller).await,
        Commands::Whoami { json } => commands::auth::whoami(&controller, json).await,
        Commands::Status { json } => commands::auth::status(&controller, json).await,
        Commands::Request {
            method,
            path,
            data,
            form,
            headers,
        } => commands::request::run(&controller, &method, &path, data, form, &headers).await,
    }
}
