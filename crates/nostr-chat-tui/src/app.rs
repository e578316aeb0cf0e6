//! Application state for the TUI.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use nostr_chat::{ChatMessage, ChatMode};

/// Connection status shown in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected.
    Disconnected,
    /// Connection in progress.
    Connecting,
    /// Connected and ready to chat.
    Connected,
}

impl ConnectionStatus {
    /// Get a display string for the status.
    pub fn display(&self) -> &str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
        }
    }
}

/// Result of handling a key event.
#[derive(Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// No action needed.
    None,
    /// Quit the application.
    Quit,
    /// Submit the current input line (message or /command).
    Submit(String),
}

/// Application state for the chat TUI.
pub struct App {
    /// Relay URL shown in the header.
    pub relay_url: String,
    /// Current input text.
    pub input: String,
    /// Cursor position in the input (chars).
    pub cursor_position: usize,
    /// Messages for the active conversation, newest first.
    pub messages: Vec<ChatMessage>,
    /// Label for the active conversation.
    pub mode_label: String,
    /// Current connection status.
    pub status: ConnectionStatus,
    /// Our public key, if an identity is set.
    pub pubkey: Option<String>,
    /// Last notice/error line, shown in the status bar.
    pub notice: Option<String>,
    /// Whether the help screen is visible.
    pub show_help: bool,
    /// Whether the app should quit.
    pub should_quit: bool,
    /// Scroll offset for message history (0 = bottom).
    pub scroll_offset: usize,
}

impl App {
    /// Create a new App instance.
    pub fn new(relay_url: impl Into<String>, room: &str) -> Self {
        Self {
            relay_url: relay_url.into(),
            input: String::new(),
            cursor_position: 0,
            messages: Vec::new(),
            mode_label: format!("#{}", room),
            status: ConnectionStatus::Disconnected,
            pubkey: None,
            notice: None,
            show_help: false,
            should_quit: false,
            scroll_offset: 0,
        }
    }

    /// Replace the message list and reset scrolling.
    pub fn set_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.scroll_offset = 0;
    }

    /// Set the conversation label from a chat mode.
    pub fn set_mode(&mut self, mode: &ChatMode) {
        self.mode_label = match mode {
            ChatMode::Room(room) => format!("#{}", room),
            ChatMode::Direct(peer) => {
                let hex = hex_prefix(peer);
                format!("@{}", hex)
            }
        };
    }

    /// Set the status bar notice.
    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Move cursor left.
    pub fn move_cursor_left(&mut self) {
        self.cursor_position = self.clamp_cursor(self.cursor_position.saturating_sub(1));
    }

    /// Move cursor right.
    pub fn move_cursor_right(&mut self) {
        self.cursor_position = self.clamp_cursor(self.cursor_position.saturating_add(1));
    }

    /// Move cursor to start of input.
    pub fn move_cursor_home(&mut self) {
        self.cursor_position = 0;
    }

    /// Move cursor to end of input.
    pub fn move_cursor_end(&mut self) {
        self.cursor_position = self.input.chars().count();
    }

    /// Insert a character at cursor position.
    pub fn enter_char(&mut self, c: char) {
        let index = self.byte_index();
        self.input.insert(index, c);
        self.move_cursor_right();
    }

    /// Delete character before cursor.
    pub fn delete_char(&mut self) {
        if self.cursor_position == 0 {
            return;
        }

        let current_index = self.cursor_position;
        let before = self.input.chars().take(current_index - 1);
        let after = self.input.chars().skip(current_index);
        self.input = before.chain(after).collect();
        self.move_cursor_left();
    }

    /// Delete character after cursor.
    pub fn delete_char_forward(&mut self) {
        if self.cursor_position >= self.input.chars().count() {
            return;
        }

        let current_index = self.cursor_position;
        let before = self.input.chars().take(current_index);
        let after = self.input.chars().skip(current_index + 1);
        self.input = before.chain(after).collect();
    }

    /// Take the current input and clear it.
    pub fn take_input(&mut self) -> String {
        self.cursor_position = 0;
        std::mem::take(&mut self.input)
    }

    /// Scroll up by n lines.
    pub fn scroll_up(&mut self, n: usize) {
        let max_scroll = self.messages.len().saturating_sub(1);
        self.scroll_offset = self.scroll_offset.saturating_add(n).min(max_scroll);
    }

    /// Scroll down by n lines.
    pub fn scroll_down(&mut self, n: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(n);
    }

    fn clamp_cursor(&self, new_cursor_pos: usize) -> usize {
        new_cursor_pos.clamp(0, self.input.chars().count())
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .map(|(i, _)| i)
            .nth(self.cursor_position)
            .unwrap_or(self.input.len())
    }
}

/// Short hex prefix of an x-only pubkey for display.
pub fn hex_prefix(key: &[u8; 32]) -> String {
    key[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Handle a key event and update app state.
pub fn handle_key_event(app: &mut App, key: KeyEvent) -> KeyAction {
    // Any key dismisses the help screen first
    if app.show_help {
        app.show_help = false;
        return KeyAction::None;
    }

    match key.code {
        // Quit on Ctrl+C or Ctrl+Q
        KeyCode::Char('c') | KeyCode::Char('q')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            app.should_quit = true;
            KeyAction::Quit
        }

        KeyCode::Esc => {
            app.should_quit = true;
            KeyAction::Quit
        }

        KeyCode::Enter => {
            if app.input.trim().is_empty() {
                KeyAction::None
            } else {
                KeyAction::Submit(app.take_input())
            }
        }

        KeyCode::Backspace => {
            app.delete_char();
            KeyAction::None
        }
        KeyCode::Delete => {
            app.delete_char_forward();
            KeyAction::None
        }

        KeyCode::Left => {
            app.move_cursor_left();
            KeyAction::None
        }
        KeyCode::Right => {
            app.move_cursor_right();
            KeyAction::None
        }
        KeyCode::Home => {
            app.move_cursor_home();
            KeyAction::None
        }
        KeyCode::End => {
            app.move_cursor_end();
            KeyAction::None
        }

        KeyCode::PageUp => {
            app.scroll_up(5);
            KeyAction::None
        }
        KeyCode::PageDown => {
            app.scroll_down(5);
            KeyAction::None
        }
        KeyCode::Up if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_up(1);
            KeyAction::None
        }
        KeyCode::Down if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_down(1);
            KeyAction::None
        }

        KeyCode::Char(c) => {
            app.enter_char(c);
            KeyAction::None
        }

        _ => KeyAction::None,
    }
}
