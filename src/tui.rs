use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::actions::Actions;
use crate::models::{SessionDetail, SessionListItem};

const WRAP_WIDTH: usize = 70;

struct Toast {
    message: String,
    is_error: bool,
}

struct AppState {
    sessions: Vec<SessionListItem>,
    selected: usize,
    scroll_offset: u16,
    detail: Option<SessionDetail>,
    toast: Option<Toast>,
}

impl AppState {
    fn new(sessions: Vec<SessionListItem>) -> Self {
        Self {
            sessions,
            selected: 0,
            scroll_offset: 0,
            detail: None,
            toast: None,
        }
    }

    fn current(&self) -> Option<&SessionListItem> {
        self.sessions.get(self.selected)
    }

    fn load_detail(&mut self, actions: &Actions) {
        let Some(item) = self.current() else {
            self.detail = None;
            return;
        };
        match actions.get_session(item.session.id).into_result() {
            Ok(detail) => self.detail = Some(detail),
            Err(e) => {
                self.detail = None;
                self.error(e);
            }
        }
    }

    /// Re-fetch the list after a mutation, keeping the selection on the same session.
    fn reload(&mut self, actions: &Actions) {
        let current_id = self.current().map(|item| item.session.id);
        match actions.get_sessions().into_result() {
            Ok(sessions) => {
                self.sessions = sessions;
                self.selected = current_id
                    .and_then(|id| self.sessions.iter().position(|s| s.session.id == id))
                    .unwrap_or(0);
            }
            Err(e) => self.error(e),
        }
        self.load_detail(actions);
    }

    fn info(&mut self, message: impl Into<String>) {
        self.toast = Some(Toast {
            message: message.into(),
            is_error: false,
        });
    }

    fn error(&mut self, message: impl Into<String>) {
        self.toast = Some(Toast {
            message: message.into(),
            is_error: true,
        });
    }

    fn next(&mut self) {
        if !self.sessions.is_empty() && self.selected < self.sessions.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }
}

pub fn run_browse(actions: &Actions) -> Result<()> {
    let sessions = actions
        .get_sessions()
        .into_result()
        .map_err(anyhow::Error::msg)?;
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    let mut state = AppState::new(sessions);
    state.load_detail(actions);

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, actions);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    actions: &Actions,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(state.selected));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let prev_selected = state.selected;
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('r') => {
                    state.reload(actions);
                    state.info("Reloaded");
                }
                KeyCode::Char(c @ ('a' | 'A')) => {
                    let Some(id) = state.current().map(|item| item.session.id) else {
                        continue;
                    };
                    state.info("Analyzing session...");
                    terminal.draw(|frame| draw(frame, state, &mut list_state))?;

                    let result = if c == 'A' {
                        actions.reanalyze_session(id)
                    } else {
                        actions.analyze_session(id)
                    };
                    match result.into_result() {
                        Ok(outcome) => {
                            state.reload(actions);
                            state.info(format!(
                                "Analysis complete: {} tag(s), {} resource(s)",
                                outcome.tags.len(),
                                outcome.resources.len()
                            ));
                        }
                        Err(e) => state.error(e),
                    }
                }
                _ => {}
            }
            if state.selected != prev_selected {
                state.load_detail(actions);
            }
            list_state.select(Some(state.selected));
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[0]);

    // Left panel: session list
    let items: Vec<ListItem> = state
        .sessions
        .iter()
        .map(|item| {
            let analyzed = if item.session.summary.is_some() { "*" } else { " " };
            let date = item
                .session
                .date
                .as_deref()
                .map(|d| d.get(..10).unwrap_or(d))
                .unwrap_or("----------");
            ListItem::new(format!(
                "{} {} {} | {}",
                analyzed,
                date,
                truncate_chars(&item.session.title, 28),
                item.client_name
            ))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Sessions ({}) ",
            state.sessions.len()
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: session detail
    let detail_widget = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));
    frame.render_widget(detail_widget, chunks[1]);

    if let Some(toast) = &state.toast {
        let style = if toast.is_error {
            Style::default().fg(Color::Red)
        } else {
            Style::default().fg(Color::Green)
        };
        frame.render_widget(Paragraph::new(format!(" {}", toast.message)).style(style), rows[1]);
    }

    let help = Paragraph::new(" j/k:navigate  J/K:scroll  a:analyze  A:re-analyze  r:reload  q:quit")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[2]);
}

fn heading(title: &str) -> Line<'static> {
    Line::from(Span::styled(
        title.to_string(),
        Style::default().add_modifier(Modifier::BOLD),
    ))
}

fn push_section(lines: &mut Vec<Line<'static>>, title: &str, body: Option<&str>) {
    let Some(body) = body.filter(|b| !b.trim().is_empty()) else {
        return;
    };
    lines.push(heading(title));
    for line in textwrap::fill(body, WRAP_WIDTH).lines() {
        lines.push(Line::from(format!("  {}", line)));
    }
    lines.push(Line::from(""));
}

fn build_detail(state: &AppState) -> Text<'static> {
    let Some(detail) = &state.detail else {
        return Text::raw("No session selected");
    };
    let session = &detail.session;

    let mut lines: Vec<Line<'static>> = Vec::new();

    lines.push(heading(&session.title));
    lines.push(Line::from(format!("with {}", detail.client.name)));
    if let Some(date) = &session.date {
        lines.push(Line::from(format!("Date: {}", date)));
    }
    if !detail.tags.is_empty() {
        let names: Vec<&str> = detail.tags.iter().map(|t| t.name.as_str()).collect();
        lines.push(Line::from(Span::styled(
            format!("Tags: {}", names.join(", ")),
            Style::default().fg(Color::Cyan),
        )));
    }
    lines.push(Line::from(""));

    if session.summary.is_none() && session.transcript.is_some() {
        lines.push(Line::from(Span::styled(
            "(Not analyzed yet. Press 'a' to analyze.)",
            Style::default().fg(Color::DarkGray),
        )));
        lines.push(Line::from(""));
    }

    push_section(&mut lines, "SUMMARY", session.summary.as_deref());
    push_section(&mut lines, "FOLLOW-UP EMAIL", session.follow_up_email.as_deref());
    push_section(&mut lines, "ANALYSIS", session.analysis.as_deref());
    push_section(&mut lines, "PREPARATION NOTES", session.preparation_notes.as_deref());

    if !detail.resources.is_empty() {
        lines.push(heading("RESOURCES"));
        for link in &detail.resources {
            lines.push(Line::from(format!(
                "  [{}] {}",
                link.resource.resource_type, link.resource.title
            )));
            if let Some(url) = &link.resource.url {
                lines.push(Line::from(Span::styled(
                    format!("      {}", url),
                    Style::default().fg(Color::Blue),
                )));
            }
        }
        lines.push(Line::from(""));
    }

    match session.transcript.as_deref() {
        Some(transcript) => {
            lines.push(heading("TRANSCRIPT"));
            for line in transcript.lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
        None => lines.push(Line::from(Span::styled(
            "(No transcript)",
            Style::default().fg(Color::DarkGray),
        ))),
    }

    Text::from(lines)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
