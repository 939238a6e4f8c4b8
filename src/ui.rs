use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ibsg::{default_output, Bounds, Config, Granularity, NamedFilter, OutputFormat, Selections};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Counties,
    Filters,
    Output,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Counties => Page::Filters,
            Page::Filters => Page::Output,
            Page::Output => Page::Counties,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Counties => Page::Output,
            Page::Filters => Page::Counties,
            Page::Output => Page::Filters,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Counties => "Counties",
            Page::Filters => "Filters",
            Page::Output => "Output",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lower,
    Upper,
}

/// Typing a new bound for the highlighted filter
#[derive(Debug, Clone, PartialEq)]
pub struct BoundEdit {
    pub filter: NamedFilter,
    pub side: Side,
    pub buffer: String,
}

/// What the event loop should do after a key press
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Continue,
    Cancel,
    Submit(Selections),
}

pub struct App {
    pub counties: Vec<String>,
    pub county_selected: Vec<bool>,
    pub county_state: TableState,
    pub filter_selected: Vec<bool>,
    pub filter_state: TableState,
    pub bounds: std::collections::BTreeMap<String, Bounds>,
    pub granularity: Granularity,
    pub census: bool,
    pub format: OutputFormat,
    pub current_page: Page,
    pub editing: Option<BoundEdit>,
    pub message: Option<String>,
    base: Selections,
    postcode_output: PathBuf,
    census_output: PathBuf,
}

impl App {
    pub fn new(config: &Config) -> Self {
        let base = Selections::from_config(config);

        let mut county_state = TableState::default();
        if !config.countyname.is_empty() {
            county_state.select(Some(0));
        }
        let mut filter_state = TableState::default();
        filter_state.select(Some(0));

        let format = OutputFormat::from_path(&base.output).unwrap_or(OutputFormat::CsvGz);

        Self {
            counties: config.countyname.clone(),
            county_selected: vec![true; config.countyname.len()],
            county_state,
            filter_selected: NamedFilter::ALL.iter().map(|f| base.filters.contains(f)).collect(),
            filter_state,
            bounds: base.bounds.clone(),
            granularity: base.granularity,
            census: base.census,
            format,
            current_page: Page::Counties,
            editing: None,
            message: None,
            postcode_output: default_output(config, false),
            census_output: default_output(config, true),
            base,
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    fn rows(&self) -> usize {
        match self.current_page {
            Page::Counties => self.counties.len(),
            Page::Filters => NamedFilter::ALL.len(),
            Page::Output => 0,
        }
    }

    fn state_mut(&mut self) -> Option<&mut TableState> {
        match self.current_page {
            Page::Counties => Some(&mut self.county_state),
            Page::Filters => Some(&mut self.filter_state),
            Page::Output => None,
        }
    }

    pub fn next(&mut self) {
        let len = self.rows();
        if len == 0 {
            return;
        }
        if let Some(state) = self.state_mut() {
            let i = match state.selected() {
                Some(i) if i >= len - 1 => 0,
                Some(i) => i + 1,
                None => 0,
            };
            state.select(Some(i));
        }
    }

    pub fn previous(&mut self) {
        let len = self.rows();
        if len == 0 {
            return;
        }
        if let Some(state) = self.state_mut() {
            let i = match state.selected() {
                Some(0) | None => len - 1,
                Some(i) => i - 1,
            };
            state.select(Some(i));
        }
    }

    /// Space on the current row
    pub fn toggle(&mut self) {
        match self.current_page {
            Page::Counties => {
                if let Some(i) = self.county_state.selected() {
                    if let Some(v) = self.county_selected.get_mut(i) {
                        *v = !*v;
                    }
                }
            }
            Page::Filters => {
                if let Some(i) = self.filter_state.selected() {
                    if let Some(v) = self.filter_selected.get_mut(i) {
                        *v = !*v;
                    }
                }
            }
            Page::Output => {}
        }
    }

    /// Select everything on the page, or nothing if everything already is
    pub fn toggle_all(&mut self) {
        let flags = match self.current_page {
            Page::Counties => &mut self.county_selected,
            Page::Filters => &mut self.filter_selected,
            Page::Output => return,
        };
        let all = flags.iter().all(|v| *v);
        flags.iter_mut().for_each(|v| *v = !all);
    }

    pub fn highlighted_filter(&self) -> Option<NamedFilter> {
        self.filter_state
            .selected()
            .and_then(|i| NamedFilter::ALL.get(i).copied())
    }

    pub fn bounds_of(&self, filter: NamedFilter) -> Bounds {
        filter
            .attribute()
            .and_then(|a| self.bounds.get(a.column()).copied())
            .unwrap_or_default()
    }

    pub fn start_edit(&mut self, side: Side) {
        let Some(filter) = self.highlighted_filter() else {
            return;
        };
        if filter.attribute().is_none() {
            self.message = Some(format!("{} has no bounds", filter.label()));
            return;
        }
        let current = self.bounds_of(filter);
        let value = match side {
            Side::Lower => current.lb,
            Side::Upper => current.ub,
        };
        self.editing = Some(BoundEdit {
            filter,
            side,
            buffer: value.map(|v| v.to_string()).unwrap_or_default(),
        });
    }

    /// Store the edited bound; an empty buffer clears it
    pub fn commit_edit(&mut self) {
        let Some(edit) = self.editing.take() else {
            return;
        };
        let Some(attribute) = edit.filter.attribute() else {
            return;
        };

        let text = edit.buffer.trim();
        let value = if text.is_empty() {
            None
        } else {
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ => {
                    self.message = Some(format!("{:?} is not a number", text));
                    return;
                }
            }
        };

        let bounds = self.bounds.entry(attribute.column().to_string()).or_default();
        match edit.side {
            Side::Lower => bounds.lb = value,
            Side::Upper => bounds.ub = value,
        }
        self.message = None;
    }

    pub fn output_path(&self) -> PathBuf {
        let base = if self.census {
            &self.census_output
        } else {
            &self.postcode_output
        };
        self.format.apply_to(base)
    }

    pub fn cycle_format(&mut self) {
        let i = OutputFormat::ALL
            .iter()
            .position(|f| *f == self.format)
            .unwrap_or(0);
        self.format = OutputFormat::ALL[(i + 1) % OutputFormat::ALL.len()];
    }

    /// The form as pipeline input; fails on an empty county list or bad bounds
    pub fn selections(&self) -> Result<Selections> {
        let countyname: Vec<String> = self
            .counties
            .iter()
            .zip(&self.county_selected)
            .filter(|(_, on)| **on)
            .map(|(c, _)| c.clone())
            .collect();
        if countyname.is_empty() {
            anyhow::bail!("Select at least one county");
        }

        let filters = NamedFilter::ALL
            .iter()
            .zip(&self.filter_selected)
            .filter(|(_, on)| **on)
            .map(|(f, _)| *f)
            .collect();

        let selections = Selections {
            granularity: self.granularity,
            countyname,
            filters,
            bounds: self.bounds.clone(),
            census: self.census,
            output: self.output_path(),
            ..self.base.clone()
        };
        selections.validate()?;
        Ok(selections)
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if let Some(edit) = self.editing.as_mut() {
            match key.code {
                KeyCode::Enter => self.commit_edit(),
                KeyCode::Esc => self.editing = None,
                KeyCode::Backspace => {
                    edit.buffer.pop();
                }
                KeyCode::Char(c) if c.is_ascii_digit() || c == '.' || c == '-' => edit.buffer.push(c),
                _ => {}
            }
            return Action::Continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Action::Cancel,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Action::Cancel,
            KeyCode::Tab | KeyCode::Right => self.next_page(),
            KeyCode::BackTab | KeyCode::Left => self.previous_page(),
            KeyCode::Down | KeyCode::Char('j') => self.next(),
            KeyCode::Up | KeyCode::Char('k') => self.previous(),
            KeyCode::Char(' ') => self.toggle(),
            KeyCode::Char('a') => self.toggle_all(),
            KeyCode::Char('l') if self.current_page == Page::Filters => self.start_edit(Side::Lower),
            KeyCode::Char('u') if self.current_page == Page::Filters => self.start_edit(Side::Upper),
            KeyCode::Char('g') => self.granularity = self.granularity.toggle(),
            KeyCode::Char('m') => self.census = !self.census,
            KeyCode::Char('f') => self.cycle_format(),
            KeyCode::Enter if self.current_page == Page::Output => match self.selections() {
                Ok(selections) => return Action::Submit(selections),
                Err(e) => self.message = Some(e.to_string()),
            },
            KeyCode::Enter => self.next_page(),
            _ => {}
        }
        Action::Continue
    }
}

/// Show the form; `None` when the user backs out
pub fn run_ui(config: &Config) -> Result<Option<Selections>> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config);
    let res = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(res?)
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<Option<Selections>> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match app.handle_key(key) {
                Action::Continue => {}
                Action::Cancel => return Ok(None),
                Action::Submit(selections) => return Ok(Some(selections)),
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Page tabs
            Constraint::Min(0),
            Constraint::Length(3), // Key help / messages
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Counties => render_counties(f, chunks[1], app),
        Page::Filters => render_filters(f, chunks[1], app),
        Page::Output => render_output(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Counties, Page::Filters, Page::Output].iter().enumerate() {
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

    let counties = app.county_selected.iter().filter(|v| **v).count();
    let filters = app.filter_selected.iter().filter(|v| **v).count();
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("{}/{} counties", counties, app.counties.len()),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("{} filters", filters),
        Style::default().fg(Color::Green),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Irish Building Stock Generator "),
    );

    f.render_widget(header, area);
}

fn checkbox(on: bool) -> Cell<'static> {
    if on {
        Cell::from("[x]").style(Style::default().fg(Color::Green))
    } else {
        Cell::from("[ ]").style(Style::default().fg(Color::DarkGray))
    }
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn highlight() -> Style {
    Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD)
}

fn render_counties(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app
        .counties
        .iter()
        .zip(&app.county_selected)
        .map(|(county, on)| Row::new(vec![checkbox(*on), Cell::from(county.clone())]));

    let table = Table::new(rows, [Constraint::Length(5), Constraint::Min(20)])
        .header(header_row(&["", "Postcode / county"]))
        .block(Block::default().borders(Borders::ALL).title(" Counties "))
        .highlight_style(highlight())
        .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.county_state);
}

fn format_bound(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn render_filters(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = NamedFilter::ALL
        .iter()
        .zip(&app.filter_selected)
        .map(|(filter, on)| {
            let bounds = app.bounds_of(*filter);
            let (lb, ub) = if filter.attribute().is_some() {
                (format_bound(bounds.lb), format_bound(bounds.ub))
            } else {
                (String::new(), String::new())
            };
            Row::new(vec![
                checkbox(*on),
                Cell::from(filter.label()),
                Cell::from(lb),
                Cell::from(ub),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(36),
            Constraint::Length(10),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["", "Filter", "lb", "ub"]))
    .block(Block::default().borders(Borders::ALL).title(" Filters "))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.filter_state);
}

fn render_output(f: &mut Frame, area: Rect, app: &App) {
    let label = Style::default().fg(Color::Cyan);
    let value = Style::default().fg(Color::White).add_modifier(Modifier::BOLD);

    let lines = vec![
        Line::from(vec![
            Span::styled("Granularity:  ", label),
            Span::styled(app.granularity.to_string(), value),
            Span::raw("   (g)"),
        ]),
        Line::from(vec![
            Span::styled("Census merge: ", label),
            Span::styled(if app.census { "yes" } else { "no" }, value),
            Span::raw("   (m)"),
        ]),
        Line::from(vec![
            Span::styled("Format:       ", label),
            Span::styled(app.format.suffix(), value),
            Span::raw("   (f)"),
        ]),
        Line::from(vec![
            Span::styled("Output file:  ", label),
            Span::styled(app.output_path().display().to_string(), value),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "Press Enter to generate",
            Style::default().fg(Color::Green),
        )),
    ];

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Output "));
    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = Style::default().fg(Color::Yellow);

    let spans = if let Some(edit) = &app.editing {
        let side = match edit.side {
            Side::Lower => "lb",
            Side::Upper => "ub",
        };
        vec![
            Span::styled(format!(" {} {}: ", edit.filter.label(), side), Style::default().fg(Color::Cyan)),
            Span::styled(format!("{}_", edit.buffer), Style::default().fg(Color::White)),
            Span::raw(" | "),
            Span::styled("Enter", key),
            Span::raw(" Save | "),
            Span::styled("Esc", key),
            Span::raw(" Cancel"),
        ]
    } else if let Some(message) = &app.message {
        vec![Span::styled(format!(" {}", message), Style::default().fg(Color::Red))]
    } else {
        let mut spans = vec![
            Span::styled(" Space", key),
            Span::raw(" Toggle | "),
            Span::styled("a", key),
            Span::raw(" All | "),
        ];
        if app.current_page == Page::Filters {
            spans.push(Span::styled("l/u", key));
            spans.push(Span::raw(" Bounds | "));
        }
        spans.extend([
            Span::styled("Tab", key),
            Span::raw(" Page | "),
            Span::styled("q", Style::default().fg(Color::Red)),
            Span::raw(" Quit"),
        ]);
        spans
    };

    let status_bar = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(app: &mut App, code: KeyCode) -> Action {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn app() -> App {
        App::new(&Config::builtin().unwrap())
    }

    #[test]
    fn test_defaults_submit_everything() {
        let mut app = app();
        app.current_page = Page::Output;

        match press(&mut app, KeyCode::Enter) {
            Action::Submit(s) => {
                assert_eq!(s.countyname.len(), app.counties.len());
                assert_eq!(s.filters, NamedFilter::ALL.to_vec());
                assert_eq!(s.output, PathBuf::from("BERPublicsearch.csv.gz"));
            }
            other => panic!("expected submit, got {:?}", other),
        }
    }

    #[test]
    fn test_toggle_county_and_all() {
        let mut app = app();
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Char(' '));
        assert!(!app.county_selected[1]);

        press(&mut app, KeyCode::Char('a'));
        assert!(app.county_selected.iter().all(|v| *v));
        press(&mut app, KeyCode::Char('a'));
        assert!(app.county_selected.iter().all(|v| !*v));

        app.current_page = Page::Output;
        assert_eq!(press(&mut app, KeyCode::Enter), Action::Continue);
        assert_eq!(app.message.as_deref(), Some("Select at least one county"));
    }

    #[test]
    fn test_edit_upper_bound() {
        let mut app = app();
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.current_page, Page::Filters);
        press(&mut app, KeyCode::Down);
        assert_eq!(app.highlighted_filter(), Some(NamedFilter::GroundFloorArea));

        press(&mut app, KeyCode::Char('u'));
        assert_eq!(app.editing.as_ref().map(|e| e.buffer.as_str()), Some("1000"));
        for _ in 0..4 {
            press(&mut app, KeyCode::Backspace);
        }
        for c in "250.5".chars() {
            press(&mut app, KeyCode::Char(c));
        }
        press(&mut app, KeyCode::Enter);

        assert!(app.editing.is_none());
        assert_eq!(app.bounds_of(NamedFilter::GroundFloorArea), Bounds::new(Some(0.0), Some(250.5)));
    }

    #[test]
    fn test_provisional_has_no_bounds() {
        let mut app = app();
        app.current_page = Page::Filters;
        press(&mut app, KeyCode::Char('l'));
        assert!(app.editing.is_none());
        assert!(app.message.is_some());
    }

    #[test]
    fn test_inverted_bounds_block_submit() {
        let mut app = app();
        app.bounds.insert("GroundFloorArea".to_string(), Bounds::new(Some(10.0), Some(5.0)));
        app.current_page = Page::Output;
        assert_eq!(press(&mut app, KeyCode::Enter), Action::Continue);
        assert!(app.message.is_some());
    }

    #[test]
    fn test_output_options() {
        let mut app = app();
        press(&mut app, KeyCode::Char('m'));
        press(&mut app, KeyCode::Char('g'));
        press(&mut app, KeyCode::Char('f'));

        assert!(app.census);
        assert_eq!(app.granularity, Granularity::SmallArea);
        assert_eq!(app.format, OutputFormat::Csv);
        assert_eq!(app.output_path(), PathBuf::from("building_stock.csv"));

        press(&mut app, KeyCode::Char('f'));
        assert_eq!(app.output_path(), PathBuf::from("building_stock.parquet"));
    }

    #[test]
    fn test_quit() {
        let mut app = app();
        assert_eq!(press(&mut app, KeyCode::Char('q')), Action::Cancel);
    }
}
