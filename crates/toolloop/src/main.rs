//! Asks questions about a SQLite database from the terminal.
//!
//! Runs the query given as arguments, or reads queries line by line when
//! there is none.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use toolloop::core::AgentEvent;
use toolloop::{CliConfig, Session, SessionBuilder};
use toolloop_openai_model::OpenAIProvider;

enum SessionEvent {
    ToolsLoaded(Vec<String>),
    ToolCall(String),
    ToolFailed(String),
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match CliConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    debug!("using model `{}`", config.openai.model());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let session =
        SessionBuilder::with_model_provider(OpenAIProvider::new(
            config.openai.clone(),
        ))
        .with_tool_server(config.server.clone())
        .with_config(config.agent.clone())
        .on_event(move |event| {
            let event = match event {
                AgentEvent::ToolsDiscovered(tools) => SessionEvent::ToolsLoaded(
                    tools.iter().map(|tool| tool.name.clone()).collect(),
                ),
                AgentEvent::ToolCallStarted(req) => {
                    SessionEvent::ToolCall(req.name.clone())
                }
                AgentEvent::ToolCallFinished(result) if result.is_error => {
                    SessionEvent::ToolFailed(result.name.clone())
                }
                _ => return,
            };
            event_tx.send(event).ok();
        })
        .build();

    println!("Connecting to database: {}\n", config.db_path.display());

    if let Some(path) = &config.checkpoint_path {
        load_checkpoint(&session, path).await;
    }

    let query = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if !query.trim().is_empty() {
        return if ask(&session, &config, &mut event_rx, query.trim()).await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        ask(&session, &config, &mut event_rx, line).await;
    }
    ExitCode::SUCCESS
}

/// Asks one query, printing progress until the answer arrives.
async fn ask(
    session: &Session,
    config: &CliConfig,
    event_rx: &mut UnboundedReceiver<SessionEvent>,
    query: &str,
) -> bool {
    let progress_bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {wide_msg}") {
        progress_bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    progress_bar.set_message("🤔 Thinking...");
    progress_bar.enable_steady_tick(Duration::from_millis(100));

    let answer = session.ask(&config.thread_id, query);
    tokio::pin!(answer);
    let result = loop {
        select! {
            biased;
            Some(event) = event_rx.recv() => {
                progress_bar.suspend(|| print_event(event));
            }
            result = &mut answer => break result,
        }
    };
    progress_bar.finish_and_clear();
    while let Ok(event) = event_rx.try_recv() {
        print_event(event);
    }

    let answer = match result {
        Ok(answer) => answer,
        Err(err) => {
            eprintln!("{} {err}\n", "error:".bright_red().bold());
            return false;
        }
    };
    println!("\n{}", "Response:".bold());
    println!("{}🤖 {}\n", BAR_CHAR.bright_cyan(), answer.bright_white());

    if let Some(path) = &config.checkpoint_path {
        save_checkpoint(session, &config.thread_id, path).await;
    }
    true
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::ToolsLoaded(names) => {
            println!("Loaded {} database tools\n", names.len());
            for name in names {
                println!("  - {name}");
            }
            println!();
        }
        SessionEvent::ToolCall(name) => {
            println!("{}🔧 {}", BAR_CHAR.bright_yellow(), name.bright_white());
        }
        SessionEvent::ToolFailed(name) => {
            println!("{}⚠️  {name} failed", BAR_CHAR.bright_red());
        }
    }
}

async fn load_checkpoint(session: &Session, path: &Path) {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
        Err(err) => {
            eprintln!("cannot read {}: {err}", path.display());
            return;
        }
    };
    match session.load_checkpoint(raw) {
        Ok(count) => {
            println!("Restored {count} messages from {}\n", path.display());
        }
        Err(err) => eprintln!("ignoring {}: {err}", path.display()),
    }
}

async fn save_checkpoint(session: &Session, thread_id: &str, path: &Path) {
    let raw = match session.save_checkpoint(thread_id) {
        Ok(raw) => raw,
        Err(err) => {
            error!("cannot serialize thread `{thread_id}`: {err}");
            return;
        }
    };
    if let Err(err) = tokio::fs::write(path, raw).await {
        eprintln!("cannot write {}: {err}", path.display());
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
