use std::io::{self, Stdout};
use std::thread;
use std::time::Duration;

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event as InputEvent, KeyCode, KeyEvent,
    KeyEventKind, KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use sqlnav_core::events::Event;
use sqlnav_core::ids::TabId;
use sqlnav_core::schema::SchemaSnapshot;
use sqlnav_core::tab::{Tab, TabResults};
use sqlnav_core::{Orchestrator, Update};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info};

const TICK_RATE: Duration = Duration::from_millis(120);
const INPUT_POLL: Duration = Duration::from_millis(50);
const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Where `Ctrl+O` connects to. The DSN is never rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub name: String,
    pub adapter: String,
    pub dsn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    SchemaTree,
    QueryEditor,
    Results,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Self::SchemaTree => Self::QueryEditor,
            Self::QueryEditor => Self::Results,
            Self::Results => Self::SchemaTree,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::SchemaTree => "Schema",
            Self::QueryEditor => "Query Editor",
            Self::Results => "Results",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    Run,
    Cancel,
    NewTab,
    CloseTab,
    PrevTab,
    NextTab,
    NextPage,
    PrevPage,
    Reconnect,
    RefreshSchema,
    Navigate(DirectionKey),
    Input(char),
    Backspace,
    Enter,
    Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TableEntry {
    database: String,
    schema: String,
    table: String,
}

impl TableEntry {
    fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

struct TuiApp {
    orchestrator: Orchestrator,
    target: Option<ConnectTarget>,
    active_tab: TabId,
    opened_tabs: usize,
    pane: Pane,
    tables: Vec<TableEntry>,
    selected_table: usize,
    result_cursor: usize,
    show_help: bool,
    should_quit: bool,
    ticks: usize,
    status_line: String,
}

impl TuiApp {
    fn new(mut orchestrator: Orchestrator, target: Option<ConnectTarget>) -> Self {
        let active_tab = orchestrator.open_tab("Query 1");
        let mut app = Self {
            orchestrator,
            target,
            active_tab,
            opened_tabs: 1,
            pane: Pane::QueryEditor,
            tables: Vec::new(),
            selected_table: 0,
            result_cursor: 0,
            show_help: false,
            should_quit: false,
            ticks: 0,
            status_line: "Press Ctrl+O to connect, F1 for help".to_string(),
        };
        if app.target.is_some() {
            app.reconnect();
        }
        app
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextPane => {
                self.pane = self.pane.next();
                self.status_line = format!("Switched pane to {}", self.pane.name());
            }
            Msg::Run => self.run_active_tab(),
            Msg::Cancel => {
                self.status_line = if self.orchestrator.cancel() {
                    "Cancel requested".to_string()
                } else {
                    "No query running".to_string()
                };
            }
            Msg::NewTab => self.new_tab(),
            Msg::CloseTab => self.close_active_tab(),
            Msg::PrevTab => self.switch_tab(false),
            Msg::NextTab => self.switch_tab(true),
            Msg::NextPage => {
                if !self.orchestrator.next_page(self.active_tab) {
                    self.status_line = "No further page".to_string();
                }
            }
            Msg::PrevPage => {
                if !self.orchestrator.prev_page(self.active_tab) {
                    self.status_line = "Already at the first page".to_string();
                }
            }
            Msg::Reconnect => self.reconnect(),
            Msg::RefreshSchema => {
                self.status_line = if self.orchestrator.refresh_schema() {
                    "Refreshing schema...".to_string()
                } else {
                    "Not connected".to_string()
                };
            }
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Input(ch) => self.input(ch),
            Msg::Backspace => {
                if self.pane == Pane::QueryEditor {
                    self.edit_query(|query| {
                        query.pop();
                    });
                }
            }
            Msg::Enter => match self.pane {
                Pane::QueryEditor => self.edit_query(|query| query.push('\n')),
                Pane::SchemaTree => self.preview_selected_table(),
                Pane::Results => self.status_line = "Nothing to submit in this view".to_string(),
            },
            Msg::Tick => self.ticks = self.ticks.wrapping_add(1),
        }
    }

    fn apply(&mut self, event: Event) {
        let update = self.orchestrator.apply(event);
        if update == Update::Schema {
            self.tables = self
                .orchestrator
                .schema()
                .map(table_entries)
                .unwrap_or_default();
            self.selected_table = self.selected_table.min(self.tables.len().saturating_sub(1));
        }
        if matches!(update, Update::Connected) {
            self.tables.clear();
            self.selected_table = 0;
        }
        if update == Update::Tab(self.active_tab) {
            self.result_cursor = 0;
        }
        if let Some(status) = status_for(&self.orchestrator, update, self.active_tab) {
            self.status_line = status;
        }
    }

    fn reconnect(&mut self) {
        let Some(target) = &self.target else {
            self.status_line =
                "No connection configured; start with --connection or --adapter/--dsn".to_string();
            return;
        };
        if let Some(attempt) = self.orchestrator.connect(&target.adapter, &target.dsn) {
            info!(connection = %target.name, adapter = %target.adapter, %attempt, "connecting");
        }
        self.status_line = format!("Connecting to `{}`...", target.name);
    }

    fn run_active_tab(&mut self) {
        match self.orchestrator.execute_tab(self.active_tab) {
            Some(stamp) => {
                debug!(%stamp, "run requested");
                self.pane = Pane::Results;
                self.status_line = "Running query...".to_string();
            }
            None => self.status_line = "Nothing to run".to_string(),
        }
    }

    fn new_tab(&mut self) {
        self.opened_tabs += 1;
        self.active_tab = self
            .orchestrator
            .open_tab(format!("Query {}", self.opened_tabs));
        self.pane = Pane::QueryEditor;
        self.result_cursor = 0;
        self.status_line = format!("Opened tab {}", self.opened_tabs);
    }

    fn close_active_tab(&mut self) {
        let index = self.active_index();
        self.orchestrator.close_tab(self.active_tab);

        let tabs = self.orchestrator.tabs();
        if let Some(tab) = tabs.get(index.saturating_sub(1).min(tabs.len().saturating_sub(1))) {
            self.active_tab = tab.id;
            self.status_line = format!("Closed tab, now on `{}`", tab.title);
        } else {
            self.new_tab();
        }
        self.result_cursor = 0;
    }

    fn switch_tab(&mut self, forward: bool) {
        let tabs = self.orchestrator.tabs();
        if tabs.len() < 2 {
            return;
        }
        let index = self.active_index();
        let next = if forward {
            (index + 1) % tabs.len()
        } else {
            (index + tabs.len() - 1) % tabs.len()
        };
        self.active_tab = tabs[next].id;
        self.result_cursor = 0;
        self.status_line = format!("Switched to `{}`", tabs[next].title);
    }

    fn active_index(&self) -> usize {
        self.orchestrator
            .tabs()
            .iter()
            .position(|tab| tab.id == self.active_tab)
            .unwrap_or(0)
    }

    fn active(&self) -> Option<&Tab> {
        self.orchestrator.tab(self.active_tab)
    }

    fn input(&mut self, ch: char) {
        match self.pane {
            Pane::QueryEditor => self.edit_query(|query| query.push(ch)),
            Pane::SchemaTree | Pane::Results => match ch {
                'k' => self.navigate(DirectionKey::Up),
                'j' => self.navigate(DirectionKey::Down),
                'h' => self.navigate(DirectionKey::Left),
                'l' => self.navigate(DirectionKey::Right),
                _ => {}
            },
        }
    }

    fn edit_query(&mut self, edit: impl FnOnce(&mut String)) {
        let Some(tab) = self.active() else {
            return;
        };
        let mut query = tab.query.clone();
        edit(&mut query);
        self.orchestrator.set_query(self.active_tab, query);
    }

    fn navigate(&mut self, direction: DirectionKey) {
        match self.pane {
            Pane::SchemaTree => self.navigate_schema(direction),
            Pane::Results => self.navigate_results(direction),
            Pane::QueryEditor => {}
        }
    }

    fn navigate_schema(&mut self, direction: DirectionKey) {
        if self.tables.is_empty() {
            self.status_line = "No tables loaded".to_string();
            return;
        }

        match direction {
            DirectionKey::Up | DirectionKey::Left => {
                self.selected_table = self.selected_table.saturating_sub(1);
            }
            DirectionKey::Down | DirectionKey::Right => {
                self.selected_table = (self.selected_table + 1).min(self.tables.len() - 1);
            }
        }

        if let Some(entry) = self.tables.get(self.selected_table) {
            let related = self.orchestrator.schema().map_or(0, |schema| {
                schema
                    .related_tables(&entry.database, &entry.schema, &entry.table)
                    .len()
            });
            self.status_line = format!(
                "Selected `{}` ({related} relationships)",
                entry.qualified()
            );
        }
    }

    fn navigate_results(&mut self, direction: DirectionKey) {
        let row_count = self.active().map_or(0, |tab| visible_rows(tab).len());
        if row_count == 0 {
            self.status_line = "No rows on this page".to_string();
            return;
        }

        match direction {
            DirectionKey::Up | DirectionKey::Left => {
                self.result_cursor = self.result_cursor.saturating_sub(1);
            }
            DirectionKey::Down | DirectionKey::Right => {
                self.result_cursor = (self.result_cursor + 1).min(row_count - 1);
            }
        }
        self.status_line = format!("Row {} / {}", self.result_cursor + 1, row_count);
    }

    fn preview_selected_table(&mut self) {
        let Some(entry) = self.tables.get(self.selected_table) else {
            self.status_line = "No table selected".to_string();
            return;
        };
        let query = format!("SELECT * FROM {}", entry.qualified());
        self.orchestrator.set_query(self.active_tab, query);
        self.pane = Pane::QueryEditor;
        self.status_line = "Preview query ready, press Ctrl+R to run".to_string();
    }
}

/// Status line text for an applied update, if it warrants one.
fn status_for(orchestrator: &Orchestrator, update: Update, active: TabId) -> Option<String> {
    match update {
        Update::Stale | Update::Completions => None,
        Update::Connected => orchestrator.connection_info().map(|info| {
            format!(
                "Connected to {} `{}` in {} ms",
                info.adapter,
                info.dsn,
                info.latency.as_millis()
            )
        }),
        Update::ConnectFailed => orchestrator
            .connect_error()
            .map(|error| format!("Connection failed: {error}")),
        Update::Schema => Some(match (orchestrator.schema(), orchestrator.schema_error()) {
            (_, Some(error)) => format!("Schema unavailable: {error}"),
            (Some(schema), None) if schema.warnings().is_empty() => {
                format!("Schema loaded: {} tables", schema.table_count())
            }
            (Some(schema), None) => format!(
                "Schema loaded: {} tables, {} warnings",
                schema.table_count(),
                schema.warnings().len()
            ),
            (None, None) => "Schema cleared".to_string(),
        }),
        Update::Tab(id) if id == active => orchestrator.tab(id).map(tab_status),
        Update::Tab(_) => None,
    }
}

fn tab_status(tab: &Tab) -> String {
    if let Some(error) = tab.error() {
        return if error.is_cancellation() {
            "Query cancelled".to_string()
        } else {
            format!("Query failed: {error}")
        };
    }
    if tab.is_loading() {
        return "Running query...".to_string();
    }
    match tab.results() {
        TabResults::Empty => "No results".to_string(),
        TabResults::Buffered(view) => format!(
            "{} rows in {} ms",
            view.result.row_count,
            view.duration.as_millis()
        ),
        TabResults::Streaming(view) => match (view.page(), view.at_end()) {
            (None, _) if view.is_fetching() => "Stream open, fetching first page...".to_string(),
            (_, _) if view.is_fetching() => "Fetching page...".to_string(),
            (None, true) => "Query returned no rows".to_string(),
            (Some(page), true) => format!("Page {} (end of results)", page + 1),
            (Some(page), false) => format!("Page {}", page + 1),
            (None, false) => "Stream open".to_string(),
        },
    }
}

fn table_entries(snapshot: &SchemaSnapshot) -> Vec<TableEntry> {
    snapshot
        .databases()
        .iter()
        .flat_map(|database| {
            database.schemas.iter().flat_map(move |schema| {
                schema.tables.iter().map(move |table| TableEntry {
                    database: database.name.clone(),
                    schema: schema.name.clone(),
                    table: table.name.clone(),
                })
            })
        })
        .collect()
}

fn visible_rows(tab: &Tab) -> Vec<&[String]> {
    match tab.results() {
        TabResults::Empty => Vec::new(),
        TabResults::Buffered(view) => view
            .result
            .rows
            .iter()
            .map(|row| row.values.as_slice())
            .collect(),
        TabResults::Streaming(view) => view.rows().iter().map(|row| row.values.as_slice()).collect(),
    }
}

fn column_names(tab: &Tab) -> Vec<&str> {
    let columns = match tab.results() {
        TabResults::Empty => return Vec::new(),
        TabResults::Buffered(view) => &view.result.columns,
        TabResults::Streaming(view) => view.columns(),
    };
    columns.iter().map(|column| column.name.as_str()).collect()
}

/// Runs the terminal UI until the user quits, then shuts the orchestrator
/// down so every cursor and the connection are closed before returning.
pub async fn run(
    orchestrator: Orchestrator,
    events: UnboundedReceiver<Event>,
    target: Option<ConnectTarget>,
) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    let mut app = TuiApp::new(orchestrator, target);
    let run_result = run_loop(&mut terminal, &mut app, events).await;
    app.orchestrator.shutdown().await;
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Reads terminal input on a dedicated thread. The thread exits once the
/// receiving side is dropped.
fn spawn_input_reader() -> Result<UnboundedReceiver<io::Result<InputEvent>>, TuiError> {
    let (sender, receiver) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("sqlnav-input".to_string())
        .spawn(move || {
            while !sender.is_closed() {
                match event::poll(INPUT_POLL) {
                    Ok(false) => {}
                    Ok(true) => {
                        if sender.send(event::read()).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        let _ = sender.send(Err(error));
                        break;
                    }
                }
            }
        })?;
    Ok(receiver)
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
    mut events: UnboundedReceiver<Event>,
) -> Result<(), TuiError> {
    let mut input = spawn_input_reader()?;
    let mut ticker = tokio::time::interval(TICK_RATE);

    loop {
        terminal.draw(|frame| render(frame, app))?;

        tokio::select! {
            Some(received) = input.recv() => {
                if let InputEvent::Key(key) = received? {
                    if key.kind == KeyEventKind::Press {
                        if let Some(message) = map_key_event(key) {
                            app.handle(message);
                        }
                    }
                }
            }
            Some(event) = events.recv() => app.apply(event),
            _ = ticker.tick() => app.handle(Msg::Tick),
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(chunks[1]);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(8), Constraint::Min(4)])
        .split(body[1]);

    render_schema(frame, app, body[0]);
    render_editor(frame, app, right[0]);
    render_results(frame, app, right[1]);

    let footer = Paragraph::new(vec![
        Line::from("Ctrl+R run | Ctrl+C cancel | Ctrl+T/W tab | PgUp/PgDn page | F1 help"),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(footer, chunks[2]);

    if app.show_help {
        render_help_popup(frame);
    }
}

fn pane_block(app: &TuiApp, pane: Pane) -> Block<'static> {
    let style = if app.pane == pane {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(style)
        .title(pane.name())
}

fn render_header(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let orchestrator = &app.orchestrator;
    let connection = match orchestrator.connection_info() {
        Some(info) => format!("{}:{}", info.adapter, info.database),
        None if orchestrator.is_connecting() => "connecting...".to_string(),
        None => "not connected".to_string(),
    };
    let activity = if orchestrator.is_executing() {
        format!("running {}", SPINNER[app.ticks % SPINNER.len()])
    } else if orchestrator.is_loading_schema() {
        format!("loading schema {}", SPINNER[app.ticks % SPINNER.len()])
    } else {
        "idle".to_string()
    };

    let mut spans = vec![
        Span::styled(
            format!(" {connection} "),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("| {activity} |")),
    ];
    for tab in orchestrator.tabs() {
        let style = if tab.id == app.active_tab {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };
        spans.push(Span::raw(" "));
        spans.push(Span::styled(format!(" {} ", tab.title), style));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("sqlnav"));
    frame.render_widget(header, area);
}

fn render_schema(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let mut lines = Vec::new();
    let mut previous: Option<(&str, &str)> = None;
    for (index, entry) in app.tables.iter().enumerate() {
        if previous != Some((entry.database.as_str(), entry.schema.as_str())) {
            if previous.map(|(database, _)| database) != Some(entry.database.as_str()) {
                lines.push(Line::from(entry.database.clone()));
            }
            lines.push(Line::from(format!("  {}", entry.schema)));
            previous = Some((entry.database.as_str(), entry.schema.as_str()));
        }
        let marker = if index == app.selected_table { ">" } else { " " };
        lines.push(Line::from(format!("{marker}   {}", entry.table)));
    }
    if lines.is_empty() {
        lines.push(Line::from(if app.orchestrator.is_loading_schema() {
            "Loading..."
        } else {
            "No schema loaded"
        }));
    }

    let skip = app
        .selected_table
        .saturating_sub(usize::from(area.height.saturating_sub(4)));
    let visible: Vec<Line<'_>> = lines.into_iter().skip(skip).collect();
    let schema = Paragraph::new(visible).block(pane_block(app, Pane::SchemaTree));
    frame.render_widget(schema, area);
}

fn render_editor(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let query = app.active().map_or("", |tab| tab.query.as_str());
    let mut lines: Vec<Line<'_>> = query.lines().map(Line::from).collect();
    if app.pane == Pane::QueryEditor {
        match lines.last_mut() {
            Some(last) if !query.ends_with('\n') => last.push_span(Span::raw("_")),
            _ => lines.push(Line::from("_")),
        }
    }
    let editor = Paragraph::new(lines).block(pane_block(app, Pane::QueryEditor));
    frame.render_widget(editor, area);
}

fn render_results(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let mut lines = Vec::new();
    if let Some(tab) = app.active() {
        if let Some(error) = tab.error() {
            lines.push(Line::from(Span::styled(
                error.to_string(),
                Style::default().fg(Color::Red),
            )));
        }
        if tab.is_loading() {
            lines.push(Line::from("Running..."));
        }

        let columns = column_names(tab);
        if !columns.is_empty() {
            lines.push(Line::from(Span::styled(
                columns.join(" | "),
                Style::default().add_modifier(Modifier::BOLD),
            )));
        }

        let rows = visible_rows(tab);
        let visible_limit = usize::from(area.height.saturating_sub(3)).max(1);
        let window_start = app.result_cursor.saturating_sub(visible_limit / 2);
        for (offset, values) in rows.iter().enumerate().skip(window_start).take(visible_limit) {
            let cursor = if offset == app.result_cursor { ">" } else { " " };
            lines.push(Line::from(format!("{cursor} {}", values.join(" | "))));
        }

        if let Some(stream) = tab.stream() {
            let page = stream.page().map_or(0, |page| page + 1);
            let end = if stream.at_end() { ", end" } else { "" };
            lines.push(Line::from(format!("-- page {page}{end} --")));
        }
    }
    if lines.is_empty() {
        lines.push(Line::from("No results"));
    }

    let results = Paragraph::new(lines)
        .block(pane_block(app, Pane::Results))
        .alignment(Alignment::Left);
    frame.render_widget(results, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("Ctrl+Q: quit"),
        Line::from("F1: toggle help"),
        Line::from("Tab: cycle panes"),
        Line::from("Ctrl+R or F5: run the tab's query"),
        Line::from("Ctrl+C: cancel the running query"),
        Line::from("Ctrl+T / Ctrl+W: new tab / close tab"),
        Line::from("Alt+Left/Right or F2/F3: switch tab"),
        Line::from("PageUp / PageDown: page through results"),
        Line::from("Ctrl+O: reconnect"),
        Line::from("F6: refresh schema"),
        Line::from("Enter in schema: preview the selected table"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('r')) | (_, KeyCode::F(5)) => Some(Msg::Run),
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => Some(Msg::Cancel),
        (KeyModifiers::CONTROL, KeyCode::Char('t')) => Some(Msg::NewTab),
        (KeyModifiers::CONTROL, KeyCode::Char('w')) => Some(Msg::CloseTab),
        (KeyModifiers::CONTROL, KeyCode::Char('o')) => Some(Msg::Reconnect),
        (KeyModifiers::ALT, KeyCode::Left) | (_, KeyCode::F(2)) => Some(Msg::PrevTab),
        (KeyModifiers::ALT, KeyCode::Right) | (_, KeyCode::F(3)) => Some(Msg::NextTab),
        (_, KeyCode::F(1)) => Some(Msg::ToggleHelp),
        (_, KeyCode::F(6)) => Some(Msg::RefreshSchema),
        (_, KeyCode::PageDown) => Some(Msg::NextPage),
        (_, KeyCode::PageUp) => Some(Msg::PrevPage),
        (_, KeyCode::Tab) => Some(Msg::NextPane),
        (_, KeyCode::Enter) => Some(Msg::Enter),
        (_, KeyCode::Backspace) => Some(Msg::Backspace),
        (_, KeyCode::Up) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right) => Some(Msg::Navigate(DirectionKey::Right)),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(ch)) => Some(Msg::Input(ch)),
        _ => None,
    }
}
