use crate::app::App;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),      // Title
            Constraint::Min(5),         // Last note
            Constraint::Length(3),      // Keyboard status
            Constraint::Length(10),     // Log
            Constraint::Length(1),      // Help
        ])
        .split(f.area());

    render_title(f, chunks[0], app);
    render_note(f, chunks[1], app);
    render_status(f, chunks[2], app);
    render_log(f, chunks[3], app);
    render_help(f, chunks[4], app);
}

fn render_title(f: &mut Frame, area: Rect, app: &App) {
    let title = Paragraph::new(format!("MIDI Session - Show Notes  {}", app.devices))
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, area);
}

fn render_note(f: &mut Frame, area: Rect, app: &App) {
    let note = app.last_note.as_deref().unwrap_or("-");

    // Center the note vertically inside the bordered block.
    let padding = area.height.saturating_sub(3) / 2;
    let mut lines: Vec<Line> = (0..padding).map(|_| Line::from("")).collect();
    lines.push(Line::from(Span::styled(
        note.to_string(),
        Style::default()
            .fg(Color::LightGreen)
            .add_modifier(Modifier::BOLD),
    )));

    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("NOTE"));
    f.render_widget(paragraph, area);
}

fn render_status(f: &mut Frame, area: Rect, app: &App) {
    let text = if app.use_keyboard {
        let held: Vec<String> = app
            .held_notes()
            .into_iter()
            .map(midi_session::note_name)
            .collect();
        format!(
            "Octave: {}  Velocity: {}  Held: {}",
            app.octave,
            app.velocity,
            if held.is_empty() { "-".to_string() } else { held.join(" ") }
        )
    } else {
        "Computer keyboard off".to_string()
    };

    let paragraph = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title("KEYBOARD"),
    );
    f.render_widget(paragraph, area);
}

fn render_log(f: &mut Frame, area: Rect, app: &App) {
    // Show the newest entries that fit.
    let visible = area.height.saturating_sub(2) as usize;
    let skip = app.log_messages.len().saturating_sub(visible);
    let log_lines: Vec<Line> = app
        .log_messages
        .iter()
        .skip(skip)
        .map(|msg| Line::from(msg.clone()))
        .collect();

    let paragraph = Paragraph::new(log_lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("EVENTS"),
    );

    f.render_widget(paragraph, area);
}

fn render_help(f: &mut Frame, area: Rect, app: &App) {
    let help_text = match (app.use_keyboard, app.uses_release_events()) {
        (true, true) => {
            "[a w s e d f t g z h u j k] Play | [y/x] Octave | [c/v] Velocity | [q] Quit"
        }
        (true, false) => {
            "[a w s e d f t g z h u j k] Play/Release | [y/x] Octave | [c/v] Velocity | [q] Quit"
        }
        (false, _) => "[q] Quit",
    };

    let paragraph = Paragraph::new(help_text)
        .style(Style::default().fg(Color::DarkGray));

    f.render_widget(paragraph, area);
}
