//! TUI module for browsing captured traffic
//!
//! A network table of every finalized exchange with a detail pane for the
//! selected one.

use crate::capture::ExchangeRecord;
use crate::codegen::{generate, CodeTarget};
use crate::display::{format_duration, format_size, format_status, status_description};
use crate::records::{SharedRecord, SharedRecordLog};
use crate::storage::{auto_name, RequestStore};
use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::io;
use std::net::SocketAddr;
use tokio::time::Duration;

/// TUI Application state
pub struct TuiApp {
    listen: SocketAddr,
    target: Option<String>,
    records: SharedRecordLog,
    store: RequestStore,
    table_state: TableState,
    /// Generated code shown in place of the details, if any
    code_target: Option<CodeTarget>,
    should_quit: bool,
    status_message: String,
}

impl TuiApp {
    /// Create a new TUI application
    pub fn new(
        listen: SocketAddr,
        target: Option<String>,
        records: SharedRecordLog,
        store: RequestStore,
    ) -> Self {
        Self {
            listen,
            target,
            records,
            store,
            table_state: TableState::default(),
            code_target: None,
            should_quit: false,
            status_message: "Press 'h' for help, 'q' to quit".to_string(),
        }
    }

    /// Run the TUI application
    pub async fn run(&mut self) -> Result<()> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            let records = self.records.get_all();
            self.clamp_selection(records.len());

            terminal.draw(|f| self.ui(f, &records))?;

            // Handle input with timeout so new records show up
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code, &records);
                    }
                }
            }

            if self.should_quit {
                break;
            }

            tokio::task::yield_now().await;
        }

        Ok(())
    }

    fn handle_key(&mut self, code: KeyCode, records: &[SharedRecord]) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Char('h') => {
                self.status_message =
                    "↑/↓ select, s=save, c=code preview, x=clear, q=quit".to_string();
            }
            KeyCode::Up | KeyCode::Char('k') => self.select_offset(-1, records.len()),
            KeyCode::Down | KeyCode::Char('j') => self.select_offset(1, records.len()),
            KeyCode::Char('s') => {
                self.status_message = match self.selected(records) {
                    Some(record) => {
                        let name = auto_name(record);
                        match self.store.save(&name, record) {
                            Ok(_) => format!("Saved as \"{}\"", name),
                            Err(e) => format!("Save failed: {}", e),
                        }
                    }
                    None => "Nothing selected".to_string(),
                };
            }
            KeyCode::Char('c') => {
                self.code_target = match self.code_target {
                    None => Some(CodeTarget::Curl),
                    Some(CodeTarget::VitestTest) => None,
                    Some(target) => Some(target.next()),
                };
                self.status_message = match self.code_target {
                    Some(target) => format!("Code preview: {}", target),
                    None => "Showing details".to_string(),
                };
            }
            KeyCode::Char('x') => {
                self.records.clear();
                self.table_state.select(None);
                self.status_message = "Records cleared".to_string();
            }
            _ => {}
        }
    }

    fn clamp_selection(&mut self, len: usize) {
        let selected = match (self.table_state.selected(), len) {
            (_, 0) => None,
            (None, _) => Some(0),
            (Some(i), len) => Some(i.min(len - 1)),
        };
        self.table_state.select(selected);
    }

    fn select_offset(&mut self, offset: isize, len: usize) {
        if len == 0 {
            return;
        }
        let current = self.table_state.selected().unwrap_or(0) as isize;
        let next = (current + offset).clamp(0, len as isize - 1);
        self.table_state.select(Some(next as usize));
    }

    fn selected<'a>(&self, records: &'a [SharedRecord]) -> Option<&'a ExchangeRecord> {
        self.table_state
            .selected()
            .and_then(|i| records.get(i))
            .map(|r| &**r)
    }

    /// Draw the UI
    fn ui(&mut self, f: &mut Frame, records: &[SharedRecord]) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(10),   // Table and details
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(chunks[1]);

        self.draw_header(f, chunks[0], records.len());
        self.draw_table(f, body[0], records);
        self.draw_details(f, body[1], records);
        self.draw_status_bar(f, chunks[2]);
    }

    fn draw_header(&self, f: &mut Frame, area: Rect, count: usize) {
        let target = self.target.as_deref().unwrap_or("(no target)");
        let title = format!(
            " API DevTools - listening on {} -> {} | {} requests ",
            self.listen, target, count
        );

        let header = Paragraph::new(title)
            .style(
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(header, area);
    }

    fn draw_table(&mut self, f: &mut Frame, area: Rect, records: &[SharedRecord]) {
        let header = Row::new(["Method", "URL", "Status", "Size", "Time"])
            .style(Style::default().add_modifier(Modifier::BOLD));

        let rows: Vec<Row> = records
            .iter()
            .map(|record| {
                let (status, color) = match (&record.response, &record.error) {
                    (Some(response), _) => {
                        (format_status(response.status), status_color(response.status))
                    }
                    (None, Some(_)) => ("error".to_string(), Color::Red),
                    (None, None) => ("pending".to_string(), Color::Gray),
                };
                let size = record
                    .response
                    .as_ref()
                    .map_or("-".to_string(), |r| format_size(r.size));

                Row::new(vec![
                    Cell::from(record.request.method.clone()),
                    Cell::from(record.request.url.clone()),
                    Cell::from(status).style(Style::default().fg(color)),
                    Cell::from(size),
                    Cell::from(format_duration(record.timing.total)),
                ])
            })
            .collect();

        let widths = [
            Constraint::Length(8),
            Constraint::Min(20),
            Constraint::Length(8),
            Constraint::Length(9),
            Constraint::Length(9),
        ];

        let table = Table::new(rows)
            .header(header)
            .widths(&widths)
            .block(Block::default().borders(Borders::ALL).title("Network"))
            .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .highlight_symbol("> ");
        f.render_stateful_widget(table, area, &mut self.table_state);
    }

    fn draw_details(&self, f: &mut Frame, area: Rect, records: &[SharedRecord]) {
        let (title, lines) = match (self.selected(records), self.code_target) {
            (None, _) => (
                "Details".to_string(),
                vec![Line::from("No requests captured yet")],
            ),
            (Some(record), Some(target)) => (
                format!("Code ({})", target),
                generate(record, target)
                    .lines()
                    .map(|l| Line::from(l.to_string()))
                    .collect(),
            ),
            (Some(record), None) => ("Details".to_string(), detail_lines(record)),
        };

        let details = Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(details, area);
    }

    fn draw_status_bar(&self, f: &mut Frame, area: Rect) {
        let status = Paragraph::new(self.status_message.clone())
            .style(Style::default().fg(Color::White))
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, area);
    }
}

fn status_color(status: u16) -> Color {
    match status {
        200..=299 => Color::Green,
        300..=399 => Color::Yellow,
        400..=499 => Color::Red,
        500..=599 => Color::Magenta,
        _ => Color::Gray,
    }
}

fn section(title: &str) -> Line<'static> {
    Line::from(Span::styled(
        title.to_string(),
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    ))
}

fn detail_lines(record: &ExchangeRecord) -> Vec<Line<'static>> {
    let request = &record.request;
    let mut lines = vec![
        section("General"),
        Line::from(format!("URL: {}", request.url)),
        Line::from(format!("Method: {}", request.method)),
    ];

    if let Some(response) = &record.response {
        lines.push(Line::from(format!(
            "Status: {} {}",
            response.status, response.status_text
        )));
        if let Some(description) = status_description(response.status) {
            lines.push(Line::from(Span::styled(
                description.to_string(),
                Style::default().fg(Color::Cyan),
            )));
        }
        lines.push(Line::from(format!("Response time: {}", format_duration(response.duration))));
        lines.push(Line::from(format!("Size: {}", format_size(response.size))));
    }

    if let Some(error) = &record.error {
        lines.push(Line::from(Span::styled(
            format!("Error: {}", error),
            Style::default().fg(Color::Red),
        )));
    }

    lines.push(Line::from(""));
    lines.push(section("Request Headers"));
    for (key, value) in &request.headers {
        lines.push(Line::from(format!("{}: {}", key, value)));
    }

    if let Some(body) = &request.body {
        lines.push(Line::from(""));
        lines.push(section("Request Payload"));
        lines.extend(body.lines().map(|l| Line::from(l.to_string())));
    }

    if let Some(response) = &record.response {
        lines.push(Line::from(""));
        lines.push(section("Response"));
        lines.extend(response.body.lines().take(50).map(|l| Line::from(l.to_string())));
    }

    let timing = &record.timing;
    lines.push(Line::from(""));
    lines.push(section("Timing"));
    lines.push(Line::from(format!("Waiting (TTFB, approx.): {:.1}ms", timing.waiting)));
    lines.push(Line::from(format!("Content download: {:.1}ms", timing.content_download)));
    lines.push(Line::from(format!("Total: {:.1}ms", timing.total)));

    lines
}
