//! UI rendering for the TUI.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

use crate::app::{App, ConnectionStatus};

/// Main render function.
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(5),    // Messages area
            Constraint::Length(1), // Status bar
            Constraint::Length(3), // Input area
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    if app.show_help {
        render_help(frame, chunks[1]);
    } else {
        render_messages(frame, app, chunks[1]);
    }
    render_status_bar(frame, app, chunks[2]);
    render_input(frame, app, chunks[3]);
}

/// Render the header with relay, conversation, and identity.
fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let status_color = match app.status {
        ConnectionStatus::Connected => Color::Green,
        ConnectionStatus::Connecting => Color::Yellow,
        ConnectionStatus::Disconnected => Color::DarkGray,
    };

    let identity = match &app.pubkey {
        Some(pubkey) => format!("{}…", &pubkey[..pubkey.len().min(8)]),
        None => "no identity".to_string(),
    };

    let spans = vec![
        Span::styled(
            format!(" {} ", app.status.display()),
            Style::default().fg(status_color).add_modifier(Modifier::BOLD),
        ),
        Span::raw("| "),
        Span::styled(app.relay_url.clone(), Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
        Span::styled(
            app.mode_label.clone(),
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(identity, Style::default().fg(Color::DarkGray)),
    ];

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" nostr-chat ")
            .border_style(Style::default().fg(Color::Cyan)),
    );

    frame.render_widget(header, area);
}

/// Render the messages area, oldest at the top, newest at the bottom.
fn render_messages(frame: &mut Frame, app: &App, area: Rect) {
    let inner_height = area.height.saturating_sub(2) as usize;
    let inner_width = area.width.saturating_sub(2) as usize;

    let mut all_lines: Vec<Line> = Vec::new();

    // App messages are newest first; display oldest first.
    for msg in app.messages.iter().rev() {
        let (author, style) = if msg.mine {
            (
                "you".to_string(),
                Style::default().fg(Color::Green),
            )
        } else {
            (
                msg.author_short().to_string(),
                Style::default().fg(Color::Blue),
            )
        };

        let prefix = format!("[{}] {}: ", formatted_time(msg.created_at), author);
        let prefix_len = prefix.chars().count();
        let content_width = inner_width.saturating_sub(prefix_len);

        let wrapped = wrap_text(&msg.content, content_width.max(1));
        for (i, part) in wrapped.into_iter().enumerate() {
            if i == 0 {
                all_lines.push(Line::from(vec![
                    Span::styled(prefix.clone(), style),
                    Span::raw(part),
                ]));
            } else {
                all_lines.push(Line::from(vec![
                    Span::raw(" ".repeat(prefix_len)),
                    Span::raw(part),
                ]));
            }
        }
    }

    // Pin to the bottom, offset by scrolling
    let total_lines = all_lines.len();
    let start_index = if total_lines > inner_height {
        total_lines
            .saturating_sub(inner_height)
            .saturating_sub(app.scroll_offset)
    } else {
        0
    };
    let end_index = start_index.saturating_add(inner_height).min(total_lines);

    let items: Vec<ListItem> = all_lines[start_index..end_index]
        .iter()
        .map(|line| ListItem::new(line.clone()))
        .collect();

    let scroll_indicator = if app.scroll_offset > 0 {
        format!(" [↑{}]", app.scroll_offset)
    } else {
        String::new()
    };

    let messages_list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {}{} ", app.mode_label, scroll_indicator)),
    );

    frame.render_widget(messages_list, area);
}

/// Render the help screen in place of the messages area.
fn render_help(frame: &mut Frame, area: Rect) {
    let lines = vec![
        Line::from(""),
        Line::from("  /generate            create a fresh identity"),
        Line::from("  /import <hex>        import a 64-char hex secret key"),
        Line::from("  /clearkey            forget the identity"),
        Line::from("  /connect [url]       connect to a relay"),
        Line::from("  /disconnect          drop the relay connection"),
        Line::from("  /room <name>         enter a public room"),
        Line::from("  /dm <pubkey>         open an encrypted DM thread"),
        Line::from("  /help                toggle this help"),
        Line::from("  /quit                exit"),
        Line::from(""),
        Line::from(Span::styled(
            "  press any key to close",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let help = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Help ")
            .border_style(Style::default().fg(Color::Yellow)),
    );

    frame.render_widget(help, area);
}

/// Render the one-line status bar.
fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let text = app.notice.clone().unwrap_or_default();
    let status = Paragraph::new(Line::from(Span::styled(
        format!(" {}", text),
        Style::default().fg(Color::Yellow),
    )));
    frame.render_widget(status, area);
}

/// Render the input area.
fn render_input(frame: &mut Frame, app: &App, area: Rect) {
    let inner_width = area.width.saturating_sub(2) as usize;

    let placeholder = if app.is_connected() {
        "Type a message or /command (/help for commands)"
    } else {
        "Not connected. /connect to start, /help for commands"
    };

    // Keep the cursor visible when the input is wider than the area
    let input_len = app.input.chars().count();
    let start = if app.cursor_position >= inner_width && inner_width > 0 {
        app.cursor_position.saturating_sub(inner_width - 1)
    } else {
        0
    };

    let display_text = if app.input.is_empty() {
        placeholder.to_string()
    } else {
        let end = (start + inner_width).min(input_len);
        app.input
            .chars()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect()
    };

    let text_style = if app.input.is_empty() {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::White)
    };

    let border_style = if app.is_connected() {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let input = Paragraph::new(display_text).style(text_style).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Input ")
            .border_style(border_style),
    );

    frame.render_widget(input, area);

    let visible_cursor = (app.cursor_position - start) as u16;
    let cursor_x = (area.x + 1 + visible_cursor).min(area.x + area.width.saturating_sub(2));
    frame.set_cursor_position((cursor_x, area.y + 1));
}

/// Format a unix timestamp as HH:MM (UTC).
fn formatted_time(timestamp: u64) -> String {
    let secs = timestamp % 86400;
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    format!("{:02}:{:02}", hours, minutes)
}

/// Wrap text to fit within a given width (word-aware).
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_width = 0;

    for word in text.split_inclusive(|c: char| c.is_whitespace()) {
        let word_len = word.chars().count();

        if current_width + word_len <= max_width {
            current_line.push_str(word);
            current_width += word_len;
        } else if word_len > max_width {
            // Word is too long for any line, break it
            if !current_line.is_empty() {
                lines.push(current_line);
                current_line = String::new();
                current_width = 0;
            }
            for ch in word.chars() {
                if current_width >= max_width {
                    lines.push(current_line);
                    current_line = String::new();
                    current_width = 0;
                }
                current_line.push(ch);
                current_width += 1;
            }
        } else {
            if !current_line.is_empty() {
                lines.push(current_line);
            }
            current_line = word.to_string();
            current_width = word_len;
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_time() {
        assert_eq!(formatted_time(0), "00:00");
        // 1700000000 is 22:13:20 UTC
        assert_eq!(formatted_time(1700000000), "22:13");
    }

    #[test]
    fn test_wrap_text_short() {
        assert_eq!(wrap_text("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_wrap_text_words() {
        let lines = wrap_text("one two three", 8);
        assert!(lines.len() >= 2);
        assert!(lines.iter().all(|l| l.chars().count() <= 8));
    }

    #[test]
    fn test_wrap_text_long_word() {
        let lines = wrap_text("abcdefghij", 4);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "abcd");
    }

    #[test]
    fn test_wrap_text_empty() {
        assert_eq!(wrap_text("", 10), vec![String::new()]);
    }
}
