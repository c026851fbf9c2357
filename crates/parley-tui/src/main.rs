use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use parley_core::{Config, ModelService, OllamaService};
use tokio::sync::Notify;

mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

#[derive(Parser)]
#[command(name = "parley")]
#[command(version, about = "Chat with a local language model in the terminal")]
struct Cli {
    /// Ollama model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Ollama server URL
    #[arg(short, long)]
    url: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file (RUST_LOG controls the level)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = match cli.log_file {
        Some(path) => path,
        None => Config::config_dir()?.join("parley.log"),
    };
    let _log_guard = logging::init(&log_path)?;

    let (mut config, intact) = load_config(cli.config.as_deref());
    config.apply_env();
    config.apply_overrides(cli.url, cli.model);

    if cli.save {
        save_config(&config, cli.config.as_deref(), intact)?;
    }

    let service: Arc<dyn ModelService> = Arc::new(OllamaService::new(&config)?);
    let mut app = App::new(service, config.title.clone(), config.model.clone());
    app.refresh_availability();

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();

    let result = run(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    result
}

/// Load the config file, falling back to defaults when it can't be read.
///
/// The flag is false when the fallback was taken: the file on disk is
/// something the user wrote, and it must not be overwritten with defaults.
fn load_config(path: Option<&Path>) -> (Config, bool) {
    let loaded = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    match loaded {
        Ok(config) => (config, true),
        Err(e) => {
            tracing::warn!("Failed to load config: {:#}, using defaults", e);
            (Config::new(), false)
        }
    }
}

fn save_config(config: &Config, path: Option<&Path>, intact: bool) -> Result<()> {
    if !intact {
        bail!("refusing to --save: the existing config file could not be read; fix or remove it first");
    }

    match path {
        Some(path) => config.save_to(path)?,
        None => config.save()?,
    }
    tracing::info!("Saved config");
    Ok(())
}

async fn run(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        let completion = app.completion();
        tokio::select! {
            event = events.next() => match event {
                Some(event) => handler::handle_event(app, event),
                None => break,
            },
            () = completed(completion) => app.on_completion(),
        }
    }

    tracing::info!("Exiting");
    Ok(())
}

/// Resolves when the chat's in-flight request finishes; never, if there is no chat yet.
async fn completed(completion: Option<Arc<Notify>>) {
    match completion {
        Some(completion) => completion.notified().await,
        None => std::future::pending().await,
    }
}
