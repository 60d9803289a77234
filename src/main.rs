use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use ollama_chat::{
    logging, ChatSession, Config, FileStore, OllamaClient, Preferences, RequestState, SessionEvent,
    TurnEvent,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::{AppEvent, EventHandler};

#[derive(Parser)]
#[command(name = "ollama-chat", version)]
#[command(about = "Chat with local Ollama models from the terminal")]
struct Cli {
    /// Base URL of the Ollama API
    #[arg(long, env = "OLLAMA_CHAT_BASE_URL")]
    base_url: Option<String>,
    /// Model to use (remembered for next time)
    #[arg(short, long)]
    model: Option<String>,
    /// System prompt sent with every request
    #[arg(short, long)]
    system: Option<String>,
    /// Directory for chat history and logs
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available Ollama models
    Models,
    /// Send one message and stream the reply to stdout
    Ask {
        /// Your message
        prompt: String,
    },
    /// Delete the saved conversation
    Clear,
    /// Show the config file path, writing a default one if there is none
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load();
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::new(),
    };
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(system) = cli.system {
        config.system_prompt = Some(system);
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }

    let data_dir = config.data_dir()?;
    let _log_guard = logging::init(&data_dir, cli.verbose)?;
    if let Err(e) = &loaded {
        tracing::warn!(error = %e, "could not load config file, using defaults");
    }
    tracing::info!(base_url = %config.base_url, data_dir = %data_dir.display(), "starting");

    let store = FileStore::open(data_dir.join("storage.json"));
    tracing::debug!(path = %store.path().display(), "opened storage");
    let backend = Arc::new(OllamaClient::new(&config.base_url));
    let (chat_tx, chat_rx) = mpsc::unbounded_channel();

    let mut session = ChatSession::new(backend, store, chat_tx);
    if let Some(prompt) = &config.system_prompt {
        session.set_system_prompt(prompt.clone());
    }
    if let Some(model) = &cli.model {
        session.set_model(model);
    } else if session.model().is_none() {
        if let Some(model) = &config.default_model {
            session.set_model(model);
        }
    }

    match cli.command {
        None => run_tui(session, chat_rx).await,
        Some(Commands::Models) => list_models(&mut session).await,
        Some(Commands::Ask { prompt }) => ask(&mut session, chat_rx, &prompt).await,
        Some(Commands::Clear) => {
            session.clear();
            println!("Chat history cleared.");
            Ok(())
        }
        Some(Commands::Config) => write_default_config(),
    }
}

async fn run_tui(session: ChatSession<FileStore>, chat_rx: UnboundedReceiver<SessionEvent>) -> Result<()> {
    let mut app = App::new(session);
    app.load_models().await;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(chat_rx);

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event).await?,
                None => break,
            }
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    // A reply still streaming is recorded as stopped
    app.stop_generating();
    while app.session.is_generating() {
        match events.next().await {
            Some(AppEvent::Chat(update)) => app.apply_chat_event(update),
            Some(_) => {}
            None => break,
        }
    }

    tui::restore()?;
    result
}

async fn list_models(session: &mut ChatSession<FileStore>) -> Result<()> {
    let remembered = session.store().selected_model();

    match session.refresh_models().await {
        Ok(models) if models.is_empty() => {
            println!("No models found. Pull a model with: ollama pull llama3.2");
        }
        Ok(models) => {
            for model in models {
                let marker = if Some(&model) == remembered.as_ref() { "*" } else { " " };
                println!("{} {}", marker, model);
            }
        }
        Err(e) => {
            eprintln!("Error connecting to Ollama: {}", e);
            eprintln!("Make sure Ollama is running: ollama serve");
            bail!("could not list models");
        }
    }
    Ok(())
}

fn write_default_config() -> Result<()> {
    let path = Config::get_config_path()?;
    if path.exists() {
        println!("{}", path.display());
    } else {
        Config::new().save()?;
        tracing::info!(path = %path.display(), "wrote default config");
        println!("Wrote default config to {}", path.display());
    }
    Ok(())
}

/// Write the part of `text` not shown yet. Snapshots normally only grow; if
/// one does not extend what is on screen, start over on a new line.
fn print_progress(out: &mut impl Write, printed: &mut String, text: &str) -> std::io::Result<()> {
    match text.strip_prefix(printed.as_str()) {
        Some(new) => write!(out, "{}", new)?,
        None => write!(out, "\n{}", text)?,
    }
    out.flush()?;
    *printed = text.to_string();
    Ok(())
}

async fn ask(
    session: &mut ChatSession<FileStore>,
    mut chat_rx: UnboundedReceiver<SessionEvent>,
    prompt: &str,
) -> Result<()> {
    // A remembered model the server no longer has is replaced here
    session.refresh_models().await?;
    let handle = session.submit(prompt)?;

    // Ctrl-C stops the reply instead of killing the process
    let stopper = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let mut printed = String::new();
    while let Some(update) = chat_rx.recv().await {
        let finished = update.id == handle.id() && matches!(update.event, TurnEvent::Finished(_));
        session.apply(update);

        if finished {
            break;
        }
        if let Some(text) = session.streaming_text() {
            print_progress(&mut stdout, &mut printed, text)?;
        }
    }

    let final_text = session
        .conversation()
        .last()
        .map(|m| m.text.clone())
        .unwrap_or_default();
    if session.state() == RequestState::Failed {
        bail!("{}", final_text);
    }
    print_progress(&mut stdout, &mut printed, &final_text)?;
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_progress_appends_growth() {
        let mut out = Vec::new();
        let mut printed = String::new();
        print_progress(&mut out, &mut printed, "Hel").unwrap();
        print_progress(&mut out, &mut printed, "Hello").unwrap();
        print_progress(&mut out, &mut printed, "Hello world").unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Hello world");
    }

    #[test]
    fn test_print_progress_restarts_on_rewrite() {
        let mut out = Vec::new();
        let mut printed = String::new();
        print_progress(&mut out, &mut printed, "a <b").unwrap();
        print_progress(&mut out, &mut printed, "a b").unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "a <b\na b");
    }

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::try_parse_from(["ollama-chat", "-vv", "--model", "qwen3:8b", "ask", "hello"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.model.as_deref(), Some("qwen3:8b"));
        assert!(matches!(cli.command, Some(Commands::Ask { ref prompt }) if prompt == "hello"));
    }

    #[test]
    fn test_cli_parses_config() {
        let cli = Cli::try_parse_from(["ollama-chat", "config"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Config)));
    }
}
