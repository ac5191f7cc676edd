//! Interactive chat / convert REPL and the helpers the one-shot commands share.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use nubra_core::bus::{AssistantEvent, EventBus};
use nubra_core::config::NubraConfig;
use nubra_core::message::Message;
use nubra_core::protocol::AssistantBackend;
use nubra_core::renderer::Block;
use nubra_core::session::Mode;
use nubra_core::store::{MemoryStorage, StorageArea};
use nubra_core::{Assistant, AssistantCommand, NubraError};
use nubra_hub::{HttpBackend, SqliteStorage};

use crate::ui;

/// How often the session database is checked for writes by other processes.
const EXTERNAL_CHANGE_POLL: Duration = Duration::from_millis(500);

/// What the REPL does after a slash command.
enum Flow {
    Continue,
    Submit(String),
    Quit,
}

/// Build an assistant over the on-disk session database.
///
/// Falls back to an in-memory area (with a warning) when the database cannot
/// be opened, so the REPL still works for this run.
pub async fn open_assistant(
    config: &NubraConfig,
    backend_url: Option<String>,
) -> anyhow::Result<Assistant> {
    let db_path = config.client.data_dir().join("sessions.db");
    let storage: Arc<dyn StorageArea> = match SqliteStorage::open(&db_path) {
        Ok(storage) => {
            let storage = Arc::new(storage);
            // Other `nubra` processes may share this database
            storage.watch(EXTERNAL_CHANGE_POLL);
            storage
        }
        Err(e) => {
            tracing::warn!("Session database unavailable at {}: {}", db_path.display(), e);
            println!(
                "  {}",
                "⚠ Session storage is unavailable; this session will not be saved.".yellow()
            );
            Arc::new(MemoryStorage::new())
        }
    };

    let mut client = config.client.clone();
    if let Some(url) = backend_url {
        client.backend_urls = vec![url];
    }
    let backend: Arc<dyn AssistantBackend> = Arc::new(HttpBackend::from_settings(&client)?);

    Ok(Assistant::start(storage, backend, config.memory.clone()).await)
}

fn new_spinner(label: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    spinner.set_message(label.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Mirror typing indicators as a spinner and print notices as they arrive.
pub fn spawn_event_printer(bus: Arc<EventBus>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let mut spinner: Option<ProgressBar> = None;
        loop {
            match rx.recv().await {
                Ok(AssistantEvent::Typing { label }) => {
                    if let Some(old) = spinner.take() {
                        old.finish_and_clear();
                    }
                    spinner = Some(new_spinner(&label));
                }
                Ok(AssistantEvent::TypingDone) => {
                    if let Some(s) = spinner.take() {
                        s.finish_and_clear();
                    }
                }
                Ok(event) => {
                    if let Some(line) = ui::notice_line(&event) {
                        match &spinner {
                            Some(s) => s.println(line),
                            None => println!("{}", line),
                        }
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Write every code block to `dir`, returning the written paths.
pub fn save_code_blocks(blocks: &[Block], dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for block in blocks {
        if let Block::Code(code) = block {
            let path = dir.join(code.download_name());
            std::fs::write(&path, format!("{}\n", code.code))?;
            written.push(path);
        }
    }
    Ok(written)
}

async fn show_reply(assistant: &Assistant, message: &Message) {
    let blocks = assistant.render(message).await;
    ui::print_reply(&blocks, message.is_error());
}

async fn run_turn(assistant: &Assistant, command: AssistantCommand) {
    match assistant.dispatch(command).await {
        Ok(Some(reply)) => show_reply(assistant, &reply).await,
        Ok(None) => {}
        // Rejections were already announced as notices
        Err(e) => tracing::debug!("Turn rejected: {}", e),
    }
}

async fn last_reply(assistant: &Assistant) -> Option<Message> {
    let store = assistant.store();
    let store = store.lock().await;
    store.current().last_assistant_message().cloned()
}

/// `None` means the active session; a number indexes the `/history` order.
async fn resolve_session(assistant: &Assistant, arg: Option<&str>) -> Option<String> {
    let store = assistant.store();
    let store = store.lock().await;
    match arg.map(str::trim).filter(|a| !a.is_empty()) {
        None => Some(store.active_id().to_string()),
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => store.ordered().get(n - 1).map(|s| s.id.clone()),
            _ => store.session(arg).map(|s| s.id.clone()),
        },
    }
}

async fn print_current(assistant: &Assistant) {
    let store = assistant.store();
    let store = store.lock().await;
    ui::print_session_info(store.current(), store.ui_state().mode);
}

fn read_line(rl: &mut DefaultEditor, prompt: &str) -> Result<String, ReadlineError> {
    tokio::task::block_in_place(|| rl.readline(prompt))
}

async fn handle_command(
    assistant: &Assistant,
    rl: &mut DefaultEditor,
    input: &str,
) -> anyhow::Result<Flow> {
    let (cmd, arg) = match input.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, Some(arg.trim())),
        None => (input, None),
    };

    match cmd {
        "/quit" | "/exit" | "/q" => return Ok(Flow::Quit),
        "/help" => ui::print_help(),
        "/mode" => match arg.map(str::parse::<Mode>) {
            Some(Ok(mode)) => {
                assistant.dispatch(AssistantCommand::SetMode(mode)).await?;
                println!("  {} {}", "Mode ›".dimmed(), ui::badge(&mode.to_string()));
            }
            Some(Err(e)) => println!("  {}", e.yellow()),
            None => println!("  {}", "Usage: /mode chat|convert".yellow()),
        },
        "/paste" => {
            println!("  {}", "Paste your input, then /end on its own line.".dimmed());
            let mut lines = Vec::new();
            loop {
                match read_line(rl, "… ") {
                    Ok(line) if line.trim() == "/end" => break,
                    Ok(line) => lines.push(line),
                    Err(ReadlineError::Interrupted) => return Ok(Flow::Continue),
                    Err(ReadlineError::Eof) => break,
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(Flow::Submit(lines.join("\n")));
        }
        "/regen" => run_turn(assistant, AssistantCommand::Regenerate).await,
        "/copy" => match last_reply(assistant).await {
            Some(reply) => {
                let blocks = assistant.render(&reply).await;
                let text = blocks
                    .iter()
                    .find_map(|b| match b {
                        Block::Code(code) => Some(code.code.clone()),
                        Block::Prose(_) => None,
                    })
                    .unwrap_or_else(|| reply.content.clone());
                let mut clipboard = arboard::Clipboard::new()?;
                clipboard.set_text(text)?;
                println!("  {}", "📋 Copied to clipboard.".green());
            }
            None => println!("  {}", "Nothing to copy yet.".yellow()),
        },
        "/save" => match last_reply(assistant).await {
            Some(reply) => {
                let blocks = assistant.render(&reply).await;
                let dir = PathBuf::from(arg.unwrap_or("."));
                let written = save_code_blocks(&blocks, &dir)?;
                if written.is_empty() {
                    println!("  {}", "The last reply has no code blocks.".yellow());
                }
                for path in written {
                    println!("  {} {}", "💾".green(), path.display());
                }
            }
            None => println!("  {}", "Nothing to save yet.".yellow()),
        },
        "/expand" => match last_reply(assistant).await {
            Some(reply) => ui::print_expanded(&assistant.render(&reply).await),
            None => println!("  {}", "Nothing to expand yet.".yellow()),
        },
        "/new" => {
            assistant.dispatch(AssistantCommand::NewSession).await?;
            print_current(assistant).await;
        }
        "/history" => {
            let store = assistant.store();
            let store = store.lock().await;
            ui::print_session_list(&store.search(arg.unwrap_or("")), store.active_id());
        }
        "/load" => match resolve_session(assistant, arg).await {
            Some(id) if arg.is_some() => {
                assistant.dispatch(AssistantCommand::LoadSession(id)).await?;
                print_current(assistant).await;
                if let Some(reply) = last_reply(assistant).await {
                    show_reply(assistant, &reply).await;
                }
            }
            _ => println!("  {}", "Usage: /load <n> (see /history)".yellow()),
        },
        "/rename" => {
            let id = assistant.store().lock().await.active_id().to_string();
            let name = arg.unwrap_or("").to_string();
            assistant
                .dispatch(AssistantCommand::RenameSession { id, name })
                .await?;
        }
        "/pin" => match resolve_session(assistant, arg).await {
            Some(id) => assistant.dispatch(AssistantCommand::TogglePin(id)).await.map(|_| ())?,
            None => println!("  {}", "No such session.".yellow()),
        },
        "/delete" => match resolve_session(assistant, arg).await {
            Some(id) => {
                let name = assistant
                    .store()
                    .lock()
                    .await
                    .session(&id)
                    .map(|s| s.display_name.clone())
                    .unwrap_or_default();
                let confirmed = tokio::task::block_in_place(|| {
                    dialoguer::Confirm::new()
                        .with_prompt(format!("Delete session '{}'?", name))
                        .default(false)
                        .interact()
                })?;
                if confirmed {
                    assistant.dispatch(AssistantCommand::DeleteSession(id)).await?;
                    print_current(assistant).await;
                }
            }
            None => println!("  {}", "No such session.".yellow()),
        },
        "/theme" => {
            let theme = assistant.store().lock().await.theme().toggled();
            assistant.dispatch(AssistantCommand::SetTheme(theme)).await?;
            println!("  {} {:?}", "Theme ›".dimmed(), theme);
        }
        other => println!(
            "  {} {} {}",
            "Unknown command".yellow(),
            other.bold(),
            "(try /help)".dimmed()
        ),
    }
    Ok(Flow::Continue)
}

/// Run the interactive REPL until `/quit` or end of input.
pub async fn run_chat(assistant: Assistant, mode: Option<Mode>) -> anyhow::Result<()> {
    if let Some(mode) = mode {
        assistant.dispatch(AssistantCommand::SetMode(mode)).await?;
    }

    ui::print_banner();
    print_current(&assistant).await;
    let printer = spawn_event_printer(assistant.bus());
    let mut rl = DefaultEditor::new()?;

    loop {
        let mode = assistant.store().lock().await.ui_state().mode;
        let prompt = format!("{} ", format!("You [{}] ›", mode).green().bold());

        let line = match read_line(&mut rl, &prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        if input.starts_with('/') {
            match handle_command(&assistant, &mut rl, input).await {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Ok(Flow::Submit(text)) => {
                    run_turn(&assistant, AssistantCommand::Submit { text }).await
                }
                // Assistant errors were already announced as notices
                Err(e) if e.downcast_ref::<NubraError>().is_some() => {
                    tracing::debug!("Command rejected: {}", e)
                }
                Err(e) => println!("  {} {}", "❌".red(), e),
            }
            continue;
        }

        run_turn(
            &assistant,
            AssistantCommand::Submit {
                text: input.to_string(),
            },
        )
        .await;
    }

    println!("{}", "👋 Goodbye!".cyan());
    assistant.shutdown().await;
    printer.abort();
    Ok(())
}
