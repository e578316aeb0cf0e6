//! Terminal chat client for Nostr rooms and encrypted DMs.

mod app;
mod ui;

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{Event as TermEvent, EventStream},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use nostr_chat::{ChatEvent, ChatMode, ChatState, parse_pubkey};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{App, ConnectionStatus, KeyAction, handle_key_event};

/// Minimal Nostr chat: public rooms and NIP-44 encrypted DMs over one relay.
#[derive(Debug, Parser)]
#[command(name = "nostr-chat-tui", version, about)]
struct Cli {
    /// Relay websocket URL
    #[arg(long, default_value = "wss://relay.damus.io")]
    relay: String,

    /// Room to enter on startup
    #[arg(long, default_value = "lobby")]
    room: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The terminal owns stdout, so logs go to a file.
    let log_file = std::fs::File::create("nostr-chat.log").context("failed to open log file")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    info!("starting nostr-chat-tui, relay={}, room={}", cli.relay, cli.room);

    let mut terminal = init_terminal()?;
    let result = run(&mut terminal, cli).await;
    restore_terminal(&mut terminal)?;
    result
}

/// Initialize the terminal for TUI mode.
fn init_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("failed to create terminal")
}

/// Restore the terminal to normal mode.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

/// Main event loop.
async fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, cli: Cli) -> Result<()> {
    let chat = ChatState::new();
    let mut chat_events = chat.subscribe();
    let mut term_events = EventStream::new();

    let mut app = App::new(cli.relay.clone(), &cli.room);

    // Connect and enter the startup room right away.
    app.status = ConnectionStatus::Connecting;
    match chat.connect(&cli.relay).await {
        Ok(()) => {
            if let Err(e) = chat.enter(ChatMode::Room(cli.room.clone())).await {
                app.set_notice(format!("failed to enter room: {}", e));
            }
        }
        Err(e) => {
            app.status = ConnectionStatus::Disconnected;
            app.set_notice(format!("connect failed: {}", e));
        }
    }

    loop {
        terminal.draw(|frame| ui::render(frame, &app))?;

        tokio::select! {
            maybe_event = term_events.next() => {
                match maybe_event {
                    Some(Ok(TermEvent::Key(key))) => {
                        match handle_key_event(&mut app, key) {
                            KeyAction::Quit => break,
                            KeyAction::Submit(line) => {
                                handle_input_line(&mut app, &chat, &line).await;
                                if app.should_quit {
                                    break;
                                }
                            }
                            KeyAction::None => {}
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("terminal event error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            chat_event = chat_events.recv() => {
                match chat_event {
                    Ok(event) => apply_chat_event(&mut app, &chat, event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("dropped {} chat events", skipped);
                        app.set_messages(chat.messages().await);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    chat.disconnect().await;
    Ok(())
}

/// Apply one chat event to the UI state.
async fn apply_chat_event(app: &mut App, chat: &ChatState, event: ChatEvent) {
    match event {
        ChatEvent::Message(_) => {
            app.set_messages(chat.messages().await);
        }
        ChatEvent::Connected { url } => {
            app.status = ConnectionStatus::Connected;
            app.set_notice(format!("connected to {}", url));
        }
        ChatEvent::Disconnected => {
            app.status = ConnectionStatus::Disconnected;
            app.set_notice("disconnected");
        }
        ChatEvent::Backlog => {
            app.set_notice("backlog loaded");
        }
        ChatEvent::Notice(message) => {
            app.set_notice(format!("relay: {}", message));
        }
        ChatEvent::PublishAck {
            event_id,
            accepted,
            message,
        } => {
            if !accepted {
                warn!("relay rejected event {}: {}", event_id, message);
                app.set_notice(format!("relay rejected message: {}", message));
            }
        }
        ChatEvent::Error(message) => {
            app.set_notice(format!("error: {}", message));
        }
    }
}

/// Handle a submitted input line: either a /command or a chat message.
async fn handle_input_line(app: &mut App, chat: &ChatState, line: &str) {
    if !line.starts_with('/') {
        match chat.send(line).await {
            Ok(event_id) => info!("sent event {}", event_id),
            Err(e) => app.set_notice(format!("send failed: {}", e)),
        }
        return;
    }

    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let arg = parts.next();

    match command {
        "/quit" | "/q" => {
            app.should_quit = true;
        }
        "/help" | "/h" => {
            app.show_help = !app.show_help;
        }
        "/generate" => {
            let pubkey = chat.generate_identity().await;
            app.pubkey = Some(pubkey.clone());
            app.set_messages(chat.messages().await);
            app.set_notice(format!("identity generated: {}", pubkey));
        }
        "/import" => match arg {
            Some(secret_hex) => match chat.import_identity(secret_hex).await {
                Ok(pubkey) => {
                    app.pubkey = Some(pubkey.clone());
                    app.set_messages(chat.messages().await);
                    app.set_notice(format!("identity imported: {}", pubkey));
                }
                Err(e) => app.set_notice(format!("import failed: {}", e)),
            },
            None => app.set_notice("usage: /import <64-char hex secret key>"),
        },
        "/clearkey" => {
            chat.clear_identity().await;
            app.pubkey = None;
            app.set_messages(chat.messages().await);
            app.set_notice("identity cleared");
        }
        "/connect" => {
            let url = arg.map(str::to_string).unwrap_or_else(|| app.relay_url.clone());
            app.status = ConnectionStatus::Connecting;
            match chat.connect(&url).await {
                Ok(()) => {
                    app.relay_url = url;
                    let mode = chat.mode().await;
                    if let Err(e) = chat.enter(mode).await {
                        app.set_notice(format!("failed to re-enter conversation: {}", e));
                    }
                    app.set_messages(chat.messages().await);
                }
                Err(e) => {
                    app.status = ConnectionStatus::Disconnected;
                    app.set_notice(format!("connect failed: {}", e));
                }
            }
        }
        "/disconnect" => {
            chat.disconnect().await;
        }
        "/room" => match arg {
            Some(room) => {
                let mode = ChatMode::Room(room.to_string());
                match chat.enter(mode.clone()).await {
                    Ok(()) => {
                        app.set_mode(&mode);
                        app.set_messages(chat.messages().await);
                        app.set_notice(format!("entered #{}", room));
                    }
                    Err(e) => app.set_notice(format!("failed to enter room: {}", e)),
                }
            }
            None => app.set_notice("usage: /room <name>"),
        },
        "/dm" => match arg {
            Some(peer_hex) => match parse_pubkey(peer_hex) {
                Ok(peer) => {
                    let mode = ChatMode::Direct(peer);
                    match chat.enter(mode.clone()).await {
                        Ok(()) => {
                            app.set_mode(&mode);
                            app.set_messages(chat.messages().await);
                            app.set_notice(format!("DM with {}", &peer_hex[..8]));
                        }
                        Err(e) => app.set_notice(format!("failed to open DM: {}", e)),
                    }
                }
                Err(e) => app.set_notice(format!("invalid pubkey: {}", e)),
            },
            None => app.set_notice("usage: /dm <64-char hex pubkey>"),
        },
        other => {
            app.set_notice(format!("unknown command: {} (/help for commands)", other));
        }
    }
}
