use anyhow::Result;
use chrono::Utc;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use std::io;
use tracing::warn;

use seller_queue::{
    history, queue, stats, DailyOverviewRow, HistoryEntry, MonthlyTotal, QueueAction, Seller,
    SellerStatus, TenantContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Queue,
    History,
    Stats,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Queue => Page::History,
            Page::History => Page::Stats,
            Page::Stats => Page::Queue,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Queue => Page::Stats,
            Page::History => Page::Queue,
            Page::Stats => Page::History,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Queue => "Queue",
            Page::History => "History",
            Page::Stats => "Stats",
        }
    }
}

/// Pending action waiting for its description to be typed
#[derive(Debug, Clone)]
pub struct DescriptionPrompt {
    pub action: QueueAction,
    pub seller: String,
    pub input: String,
}

pub struct App {
    conn: Connection,
    pub tenant: TenantContext,
    pub sellers: Vec<Seller>,
    pub history: Vec<HistoryEntry>,
    pub today: Vec<DailyOverviewRow>,
    pub month: Vec<MonthlyTotal>,
    pub state: TableState,
    pub history_state: TableState,
    pub current_page: Page,
    pub prompt: Option<DescriptionPrompt>,
    pub message: Option<(String, bool)>,
}

fn needs_description(action: QueueAction) -> bool {
    matches!(
        action,
        QueueAction::ReturnLast
            | QueueAction::ReturnFirst
            | QueueAction::Out
            | QueueAction::Leave
            | QueueAction::Budget
    )
}

impl App {
    pub fn new(conn: Connection, tenant: TenantContext) -> Result<Self> {
        let mut app = Self {
            conn,
            tenant,
            sellers: Vec::new(),
            history: Vec::new(),
            today: Vec::new(),
            month: Vec::new(),
            state: TableState::default(),
            history_state: TableState::default(),
            current_page: Page::Queue,
            prompt: None,
            message: None,
        };
        app.reload()?;
        if !app.sellers.is_empty() {
            app.state.select(Some(0));
        }
        Ok(app)
    }

    /// Full refetch of every list shown on screen
    pub fn reload(&mut self) -> Result<()> {
        let today = Utc::now().date_naive();
        let (year, month) = stats::year_month(today);

        self.sellers = seller_queue::list_sellers(&self.conn, &self.tenant)?;
        self.history = history::list(&self.conn, &self.tenant)?;
        self.today = stats::daily_overview(&self.conn, &self.tenant, today)?;
        self.month = stats::monthly_report(&self.conn, &self.tenant, year, month)?;

        if let Some(i) = self.state.selected() {
            if i >= self.sellers.len() {
                self.state.select(self.sellers.len().checked_sub(1));
            }
        }
        Ok(())
    }

    pub fn selected_seller(&self) -> Option<&Seller> {
        self.state.selected().and_then(|i| self.sellers.get(i))
    }

    /// Start `action` on the selected seller, asking for a note first when
    /// the action carries one
    pub fn begin_action(&mut self, action: QueueAction) {
        let Some(seller) = self.selected_seller() else {
            return;
        };

        if seller.status != action.allowed_from() {
            self.message = Some((
                format!(
                    "{} is {}; '{}' needs {}",
                    seller.name,
                    seller.status.label(),
                    action.as_str(),
                    action.allowed_from().label()
                ),
                true,
            ));
            return;
        }

        let seller = seller.name.clone();
        if needs_description(action) {
            self.prompt = Some(DescriptionPrompt {
                action,
                seller,
                input: String::new(),
            });
        } else {
            self.run_action(action, &seller, None);
        }
    }

    pub fn submit_prompt(&mut self) {
        if let Some(prompt) = self.prompt.take() {
            self.run_action(prompt.action, &prompt.seller, Some(&prompt.input));
        }
    }

    fn run_action(&mut self, action: QueueAction, seller: &str, description: Option<&str>) {
        match queue::perform(&mut self.conn, &self.tenant, action, seller, description) {
            Ok(transition) => {
                self.message = Some((
                    format!("{}: {}", transition.action.label(), transition.seller.name),
                    false,
                ));
            }
            Err(e) => {
                warn!(error = %e, action = action.as_str(), seller, "dashboard action failed");
                self.message = Some((e.to_string(), true));
            }
        }

        if let Err(e) = self.reload() {
            self.message = Some((format!("Reload failed: {}", e), true));
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    fn active_list(&mut self) -> (usize, &mut TableState) {
        match self.current_page {
            Page::History => (self.history.len(), &mut self.history_state),
            _ => (self.sellers.len(), &mut self.state),
        }
    }

    pub fn next(&mut self) {
        let (len, state) = self.active_list();
        if len == 0 {
            return;
        }
        let i = match state.selected() {
            Some(i) => {
                if i >= len - 1 {
                    0
                } else {
                    i + 1
                }
            }
            None => 0,
        };
        state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let (len, state) = self.active_list();
        if len == 0 {
            return;
        }
        let i = match state.selected() {
            Some(i) => {
                if i == 0 {
                    len - 1
                } else {
                    i - 1
                }
            }
            None => 0,
        };
        state.select(Some(i));
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let mut queued = 0;
        let mut in_service = 0;
        let mut out = 0;
        for seller in &self.sellers {
            match seller.status {
                SellerStatus::Queued => queued += 1,
                SellerStatus::InService => in_service += 1,
                SellerStatus::OutOfQueue => out += 1,
            }
        }
        (queued, in_service, out)
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };

        // Typing a description
        if let Some(prompt) = app.prompt.as_mut() {
            match key.code {
                KeyCode::Enter => app.submit_prompt(),
                KeyCode::Esc => app.prompt = None,
                KeyCode::Backspace => {
                    prompt.input.pop();
                }
                KeyCode::Char(c) => prompt.input.push(c),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Tab => {
                if key.modifiers.contains(KeyModifiers::SHIFT) {
                    app.previous_page();
                } else {
                    app.next_page();
                }
            }
            KeyCode::BackTab => app.previous_page(),
            KeyCode::Down | KeyCode::Char('j') => app.next(),
            KeyCode::Up | KeyCode::Char('k') => app.previous(),
            KeyCode::Char('g') => {
                if let Err(e) = app.reload() {
                    app.message = Some((format!("Reload failed: {}", e), true));
                }
            }
            KeyCode::Char(c) if app.current_page == Page::Queue => {
                let action = match c {
                    'a' => QueueAction::Add,
                    's' => QueueAction::Serve,
                    'l' => QueueAction::ReturnLast,
                    'f' => QueueAction::ReturnFirst,
                    'b' => QueueAction::Budget,
                    'o' => QueueAction::Out,
                    'r' => QueueAction::Reenter,
                    'x' => QueueAction::Leave,
                    _ => continue,
                };
                app.begin_action(action);
            }
            _ => {}
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar / prompt
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Queue => render_queue(f, chunks[1], app),
        Page::History => render_history(f, chunks[1], app),
        Page::Stats => render_stats(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let (queued, in_service, out) = app.counts();

    let mut tab_spans = vec![];
    for (i, page) in [Page::Queue, Page::History, Page::Stats].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Store: {}", app.tenant.store_id()),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(format!("queue {}", queued), Style::default().fg(Color::Green)));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("service {}", in_service),
        Style::default().fg(Color::Magenta),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(format!("out {}", out), Style::default().fg(Color::DarkGray)));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn status_color(status: SellerStatus) -> Color {
    match status {
        SellerStatus::Queued => Color::Green,
        SellerStatus::InService => Color::Magenta,
        SellerStatus::OutOfQueue => Color::DarkGray,
    }
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn render_queue(f: &mut Frame, area: Rect, app: &mut App) {
    let today: std::collections::HashMap<&str, i64> = app
        .today
        .iter()
        .map(|r| (r.seller_name.as_str(), r.service_count))
        .collect();

    let rows: Vec<Row> = app
        .sellers
        .iter()
        .map(|seller| {
            let color = status_color(seller.status);
            let position = seller
                .queue_position
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            Row::new(vec![
                Cell::from(position),
                Cell::from(truncate(&seller.name, 28)),
                Cell::from(seller.status.label()).style(Style::default().fg(color)),
                Cell::from(today.get(seller.name.as_str()).copied().unwrap_or(0).to_string()),
                Cell::from(seller.service_count.to_string()),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(30),
            Constraint::Length(14),
            Constraint::Length(8),
            Constraint::Length(8),
        ],
    )
    .header(header_row(&["#", "Seller", "Status", "Today", "Total"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Sellers "),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_history(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .history
        .iter()
        .map(|entry| {
            Row::new(vec![
                Cell::from(entry.timestamp.format("%d/%m/%Y %H:%M:%S").to_string()),
                Cell::from(truncate(&entry.seller_name, 22)),
                Cell::from(entry.action.label()),
                Cell::from(entry.description.clone().unwrap_or_default()),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(24),
            Constraint::Length(20),
            Constraint::Min(10),
        ],
    )
    .header(header_row(&["When", "Seller", "Action", "Description"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" History "),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.history_state);
}

fn render_stats(f: &mut Frame, area: Rect, app: &App) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let today_rows: Vec<Row> = app
        .today
        .iter()
        .map(|row| {
            Row::new(vec![
                Cell::from(truncate(&row.seller_name, 24)),
                Cell::from(row.service_count.to_string()),
                Cell::from(row.status.label()).style(Style::default().fg(status_color(row.status))),
            ])
        })
        .collect();

    let today = Table::new(
        today_rows,
        [Constraint::Length(26), Constraint::Length(8), Constraint::Length(14)],
    )
    .header(header_row(&["Seller", "Services", "Status"]))
    .block(Block::default().borders(Borders::ALL).title(" Today "));
    f.render_widget(today, columns[0]);

    let month_rows: Vec<Row> = app
        .month
        .iter()
        .map(|total| {
            Row::new(vec![
                Cell::from(truncate(&total.seller_name, 24)),
                Cell::from(total.total.to_string()),
            ])
        })
        .collect();

    let month = Table::new(month_rows, [Constraint::Length(26), Constraint::Length(10)])
        .header(header_row(&["Seller", "Services"]))
        .block(Block::default().borders(Borders::ALL).title(" This month "));
    f.render_widget(month, columns[1]);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let line = if let Some(prompt) = &app.prompt {
        Line::from(vec![
            Span::styled(
                format!(" {} {} ", prompt.action.as_str(), prompt.seller),
                Style::default().fg(Color::Yellow),
            ),
            Span::raw("description: "),
            Span::styled(format!("{}_", prompt.input), Style::default().fg(Color::White)),
            Span::raw("  (Enter confirm, Esc cancel)"),
        ])
    } else {
        let mut spans = vec![];
        if let Some((text, is_error)) = &app.message {
            let color = if *is_error { Color::Red } else { Color::Green };
            spans.push(Span::styled(format!(" {} ", text), Style::default().fg(color)));
            spans.push(Span::raw("| "));
        }
        for (key, label) in [
            ("a", "add"),
            ("s", "serve"),
            ("l", "last"),
            ("f", "first"),
            ("b", "budget"),
            ("o", "out"),
            ("r", "reenter"),
            ("x", "leave"),
            ("Tab", "page"),
            ("g", "reload"),
        ] {
            spans.push(Span::styled(key, Style::default().fg(Color::Yellow)));
            spans.push(Span::raw(format!(" {} ", label)));
        }
        spans.push(Span::styled("q", Style::default().fg(Color::Red)));
        spans.push(Span::raw(" quit"));
        Line::from(spans)
    };

    let status_bar = Paragraph::new(vec![line]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len - 3).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seller_queue::{add_seller, setup_database};

    fn app_with(names: &[&str]) -> App {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let tenant = TenantContext::new("maracaju").unwrap();
        for name in names {
            add_seller(&conn, &tenant, name).unwrap();
        }
        App::new(conn, tenant).unwrap()
    }

    #[test]
    fn test_action_without_description_runs_immediately() {
        let mut app = app_with(&["Ana", "Bruno"]);

        app.begin_action(QueueAction::Add);

        assert!(app.prompt.is_none());
        assert_eq!(app.counts(), (1, 0, 1));
        assert_eq!(app.history.len(), 1);
    }

    #[test]
    fn test_description_prompt_then_submit() {
        let mut app = app_with(&["Ana"]);
        app.begin_action(QueueAction::Add);
        app.begin_action(QueueAction::Serve);

        app.begin_action(QueueAction::Budget);
        let prompt = app.prompt.as_mut().unwrap();
        prompt.input.push_str("painel de TV");
        app.submit_prompt();

        assert!(app.prompt.is_none());
        assert_eq!(app.sellers[0].queue_position, Some(1));
        assert_eq!(app.today[0].service_count, 1);
        assert_eq!(app.month[0].total, 1);
        assert!(matches!(app.message, Some((_, false))));
    }

    #[test]
    fn test_wrong_status_shows_message() {
        let mut app = app_with(&["Ana"]);

        app.begin_action(QueueAction::Serve);

        assert!(app.prompt.is_none());
        assert!(matches!(app.message, Some((_, true))));
        assert!(app.history.is_empty());
    }

    #[test]
    fn test_page_cycle() {
        assert_eq!(Page::Queue.next(), Page::History);
        assert_eq!(Page::Stats.next(), Page::Queue);
        assert_eq!(Page::Queue.previous(), Page::Stats);
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("Ana", 10), "Ana");
        assert_eq!(truncate("João Gonçalves da Silva", 10), "João Go...");
    }
}
