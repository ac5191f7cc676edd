//! Nubra CLI: convert broker trading code to the Nubra SDK, and ask about it.
//!
//! `nubra chat` opens the interactive assistant; `nubra serve` runs the
//! backend relay it talks to.

mod chat;
mod setup;
mod ui;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use nubra_core::AssistantCommand;
use nubra_core::config::NubraConfig;
use nubra_core::protocol::AssistantBackend;
use nubra_core::session::Mode;
use nubra_hub::HttpBackend;
use nubra_hub::api::{ApiState, start_server};
use nubra_hub::providers::build_provider;

// ─── CLI Definition ────────────────────────────────────────

/// Nubra Assistant: broker code to Nubra SDK 🦀⚡
#[derive(Parser)]
#[command(name = "nubra", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 💬 Start the interactive assistant
    Chat {
        /// Start in this mode (chat or convert)
        #[arg(short, long)]
        mode: Option<Mode>,

        /// Backend URL (overrides the configured list)
        #[arg(short, long, env = "NUBRA_BACKEND_URL")]
        backend: Option<String>,
    },

    /// 🔁 Convert one source file and print the result
    Convert {
        /// File with broker-specific code
        file: PathBuf,

        /// Write converted code blocks into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Backend URL (overrides the configured list)
        #[arg(short, long, env = "NUBRA_BACKEND_URL")]
        backend: Option<String>,
    },

    /// 🗂  List saved sessions
    History {
        /// Only sessions whose title, category or broker match
        #[arg(short, long)]
        search: Option<String>,
    },

    /// 🌐 Start the backend relay server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Provider (chatbase, openai, ollama, openrouter, groq, gemini)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model to use
        #[arg(short, long)]
        model: Option<String>,

        /// API key
        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },

    /// 🩺 Check which backends answer
    Health {
        /// Check only this backend URL
        #[arg(short, long)]
        backend: Option<String>,
    },

    /// ⚙️  Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Dotted key (e.g. server.port, provider.model, client.backend_urls)
        key: String,
        /// Value to set (comma-separated for lists)
        value: String,
    },
    /// Print the config file location
    Path,
}

// ─── Logging ───────────────────────────────────────────────

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nubra_core=debug,nubra_hub=debug"))
}

/// Interactive commands log to a daily file so output stays readable.
fn init_file_logging(config: &NubraConfig) -> Option<WorkerGuard> {
    let log_dir = config.client.data_dir().join("logs");
    std::fs::create_dir_all(&log_dir).ok()?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "nubra.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    Some(guard)
}

fn init_stdout_logging() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

// ─── Main ──────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = setup::load_config()?;

    match cli.command {
        Commands::Chat { mode, backend } => {
            let _guard = init_file_logging(&config);
            let assistant = chat::open_assistant(&config, backend).await?;
            chat::run_chat(assistant, mode).await?;
        }

        Commands::Convert { file, out, backend } => {
            let _guard = init_file_logging(&config);
            run_convert(&config, file, out, backend).await?;
        }

        Commands::History { search } => {
            let _guard = init_file_logging(&config);
            run_history(&config, search.as_deref()).await?;
        }

        Commands::Serve {
            host,
            port,
            provider,
            model,
            api_key,
        } => {
            init_stdout_logging();
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(provider) = provider {
                config.provider.provider = provider;
            }
            if let Some(model) = model {
                config.provider.model = model;
            }
            if let Some(key) = api_key {
                config.provider.api_key = Some(key);
            }
            run_serve(&config).await?;
        }

        Commands::Health { backend } => {
            init_stdout_logging();
            run_health(&config, backend).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => setup::run_config_show()?,
            ConfigAction::Set { key, value } => setup::run_config_set(&key, &value)?,
            ConfigAction::Path => {
                println!("{}", NubraConfig::default_path().display());
            }
        },
    }

    Ok(())
}

// ─── Command Handlers ──────────────────────────────────────

async fn run_convert(
    config: &NubraConfig,
    file: PathBuf,
    out: Option<PathBuf>,
    backend: Option<String>,
) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(&file)?;
    let assistant = chat::open_assistant(config, backend).await?;
    let printer = chat::spawn_event_printer(assistant.bus());

    assistant.dispatch(AssistantCommand::NewSession).await?;
    let reply = assistant.controller().submit(Mode::Convert, &code).await?;
    let blocks = assistant.render(&reply).await;
    ui::print_reply(&blocks, reply.is_error());

    if let Some(dir) = out {
        for path in chat::save_code_blocks(&blocks, &dir)? {
            println!("  {} {}", "💾".green(), path.display());
        }
    }

    assistant.shutdown().await;
    printer.abort();
    if reply.is_error() {
        anyhow::bail!("conversion of {} failed", file.display());
    }
    Ok(())
}

async fn run_history(config: &NubraConfig, search: Option<&str>) -> anyhow::Result<()> {
    let assistant = chat::open_assistant(config, None).await?;
    let store = assistant.store();
    let store = store.lock().await;
    ui::print_session_list(&store.search(search.unwrap_or("")), store.active_id());
    Ok(())
}

async fn run_serve(config: &NubraConfig) -> anyhow::Result<()> {
    ui::print_banner();
    let provider = build_provider(&config.provider)?;
    println!(
        "  {} {} {} {} {}",
        "Provider:".dimmed(),
        provider.name().green(),
        "│".dimmed(),
        "Model:".dimmed(),
        provider.default_model().green()
    );
    println!(
        "  {} http://{}:{}\n",
        "Listening:".dimmed(),
        config.server.host,
        config.server.port
    );

    let state = ApiState {
        provider,
        max_body_bytes: config.server.max_body_bytes,
    };
    start_server(state, &config.server).await
}

async fn run_health(config: &NubraConfig, backend: Option<String>) -> anyhow::Result<()> {
    let urls = match backend {
        Some(url) => vec![url],
        None => config.client.backend_urls.clone(),
    };

    println!();
    let mut any_up = false;
    for url in urls {
        let probe = HttpBackend::new(vec![url.clone()], Duration::from_secs(5))?;
        match probe.health().await {
            Ok(health) => {
                any_up = true;
                println!("  {} {} {}", "✅".green(), url.cyan(), health.status.dimmed());
            }
            Err(e) => println!("  {} {} {}", "❌".red(), url.cyan(), e.user_message().dimmed()),
        }
    }
    println!();

    if !any_up {
        anyhow::bail!("no backend is reachable");
    }
    Ok(())
}
