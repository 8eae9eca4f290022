use crate::client::DashboardApi;
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::countdown::CountdownEngine;
use crate::location::{CitySelection, LocationResolver, LocationSelection};
use crate::models::{ActionResponse, LocationConfig, SCHEDULE_ITEMS};
use crate::settings::ItemConfig;
use crate::sync::SyncEngine;
use crate::view::{DashboardView, ItemPanel, NO_COUNTDOWN};
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

const VOLUME_STEP: f64 = 0.1;
const INPUT_POLL: Duration = Duration::from_millis(50);

/// Work the event loop must do on behalf of a key press.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Quit,
    /// Timed status read; served from the cache while it is fresh.
    Poll,
    Refresh,
    SaveItem(String, ItemConfig),
    SaveLocation(LocationConfig),
    TestPrimary(String, ItemConfig),
    TestSecondary(String, ItemConfig),
    StopAudio(Vec<String>),
}

/// A location being edited, with the selector state that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationDraft {
    pub config: LocationConfig,
    pub selection: LocationSelection,
}

/// Last action outcome shown in the footer.
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub message: String,
    pub success: bool,
}

impl From<ActionResponse> for Toast {
    fn from(response: ActionResponse) -> Self {
        Self { success: response.is_success(), message: response.message }
    }
}

/// Local edit state. Everything else is read from the view each frame.
pub struct DashboardState {
    pub item_list: ListState,
    pub drafts: BTreeMap<String, ItemConfig>,
    pub location_draft: Option<LocationDraft>,
    pub toast: Option<Toast>,
}

impl Default for DashboardState {
    fn default() -> Self {
        let mut item_list = ListState::default();
        item_list.select(Some(0));
        Self { item_list, drafts: BTreeMap::new(), location_draft: None, toast: None }
    }
}

impl DashboardState {
    pub fn selected_item(&self) -> &'static str {
        let index = self.item_list.selected().unwrap_or(0).min(SCHEDULE_ITEMS.len() - 1);
        SCHEDULE_ITEMS[index]
    }

    /// The item's settings with unsaved edits applied.
    pub fn draft_for(&self, panel: &ItemPanel) -> ItemConfig {
        self.drafts.get(&panel.name).cloned().unwrap_or_else(|| panel.config.clone())
    }

    pub fn is_dirty(&self, item: &str) -> bool {
        self.drafts.contains_key(item)
    }

    pub fn next(&mut self) {
        let i = match self.item_list.selected() {
            Some(i) if i + 1 < SCHEDULE_ITEMS.len() => i + 1,
            _ => 0,
        };
        self.item_list.select(Some(i));
    }

    pub fn previous(&mut self) {
        let i = match self.item_list.selected() {
            Some(0) | None => SCHEDULE_ITEMS.len() - 1,
            Some(i) => i - 1,
        };
        self.item_list.select(Some(i));
    }

    fn edit<F: FnOnce(&mut ItemConfig)>(&mut self, view: &DashboardView, apply: F) {
        let Some(panel) = view.panel(self.selected_item()) else {
            return;
        };
        let mut draft = self.draft_for(panel);
        apply(&mut draft);
        if draft == panel.config {
            self.drafts.remove(&panel.name);
        } else {
            self.drafts.insert(panel.name.clone(), draft);
        }
    }

    fn location_draft(&self, view: &DashboardView) -> LocationDraft {
        self.location_draft.clone().unwrap_or_else(|| LocationDraft {
            config: view.location.stored.clone().unwrap_or_else(|| LocationConfig::new(0.0, 0.0)),
            selection: view.location.selection.clone(),
        })
    }

    /// Moves to the next catalog country and pre-selects its first city.
    pub fn cycle_country(&mut self, view: &DashboardView, resolver: &LocationResolver) {
        let mut draft = self.location_draft(view);
        let countries: Vec<&str> = resolver.catalog().countries().collect();
        if countries.is_empty() {
            return;
        }
        let next = countries
            .iter()
            .position(|c| *c == draft.selection.country)
            .map(|i| (i + 1) % countries.len())
            .unwrap_or(0);
        let country = countries[next].to_string();
        let city = resolver.default_city(&country);
        let city = resolver.apply_selection(&mut draft.config, &country, &city);
        draft.selection = LocationSelection { country, city };
        self.location_draft = Some(draft);
    }

    /// Cycles through the country's cities, then the custom entry.
    pub fn cycle_city(&mut self, view: &DashboardView, resolver: &LocationResolver) {
        let mut draft = self.location_draft(view);
        let country = draft.selection.country.clone();
        let mut options: Vec<CitySelection> = resolver
            .catalog()
            .cities(&country)
            .unwrap_or_default()
            .iter()
            .map(|entry| CitySelection::Named(entry.name.clone()))
            .collect();
        options.push(CitySelection::Custom);

        let next = options
            .iter()
            .position(|option| *option == draft.selection.city)
            .map(|i| (i + 1) % options.len())
            .unwrap_or(0);
        let city = resolver.apply_selection(&mut draft.config, &country, &options[next]);
        draft.selection = LocationSelection { country, city };
        self.location_draft = Some(draft);
    }

    /// Applies a key press to local state, returning any remote work it needs.
    pub fn handle_key(
        &mut self,
        code: KeyCode,
        view: &DashboardView,
        resolver: &LocationResolver,
    ) -> Option<Command> {
        let item = self.selected_item().to_string();
        let current = view.panel(&item).map(|panel| self.draft_for(panel)).unwrap_or_default();

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Some(Command::Quit),
            KeyCode::Char('R') => return Some(Command::Refresh),
            KeyCode::Up => self.previous(),
            KeyCode::Down => self.next(),
            KeyCode::Char('e') => self.edit(view, |c| c.primary_enabled = !c.primary_enabled),
            KeyCode::Char('r') => self.edit(view, |c| c.secondary_enabled = !c.secondary_enabled),
            KeyCode::Char('+') => self.edit(view, |c| c.primary_volume = step_volume(c.primary_volume, VOLUME_STEP)),
            KeyCode::Char('-') => self.edit(view, |c| c.primary_volume = step_volume(c.primary_volume, -VOLUME_STEP)),
            KeyCode::Char(']') => {
                self.edit(view, |c| c.secondary_volume = step_volume(c.secondary_volume, VOLUME_STEP))
            }
            KeyCode::Char('[') => {
                self.edit(view, |c| c.secondary_volume = step_volume(c.secondary_volume, -VOLUME_STEP))
            }
            KeyCode::Char(digit @ '1'..='9') => {
                let index = digit as usize - '1' as usize;
                if let Some(device) = view.devices.get(index) {
                    let uuid = device.uuid.clone();
                    self.edit(view, |c| {
                        let enabled = !c.targets_device(&uuid);
                        c.set_device(&uuid, enabled);
                    });
                }
            }
            KeyCode::Char('s') => {
                if self.is_dirty(&item) {
                    return Some(Command::SaveItem(item, current));
                }
                self.toast = Some(Toast { message: format!("No changes to {}", item), success: true });
            }
            KeyCode::Char('p') => return Some(Command::TestPrimary(item, current)),
            KeyCode::Char('t') => return Some(Command::TestSecondary(item, current)),
            KeyCode::Char('x') => return Some(Command::StopAudio(current.target_device_list())),
            KeyCode::Char('c') => self.cycle_country(view, resolver),
            KeyCode::Char('l') => self.cycle_city(view, resolver),
            KeyCode::Char('w') => {
                if let Some(draft) = &self.location_draft {
                    return Some(Command::SaveLocation(draft.config.clone()));
                }
            }
            _ => {}
        }
        None
    }
}

/// Engine state copied out for the render loop, so it can draw while the
/// engine is busy with a request.
#[derive(Debug, Clone)]
pub struct EngineFrame {
    pub view: DashboardView,
    pub resolver: LocationResolver,
    pub target: Option<DateTime<Utc>>,
}

impl EngineFrame {
    pub fn capture<A: DashboardApi, C: Clock + Clone>(engine: &SyncEngine<A, C>) -> Self {
        Self {
            view: engine.view(),
            resolver: engine.resolver().clone(),
            target: engine.countdown_target(),
        }
    }
}

/// A command the sync worker has finished, with the engine state it left.
#[derive(Debug, Clone)]
pub struct Completion {
    pub command: Command,
    pub toast: Option<Toast>,
    pub frame: EngineFrame,
}

/// Render-side state. Owns its own countdown so ticks never wait on the engine.
pub struct Dashboard<C: Clock> {
    pub state: DashboardState,
    frame: EngineFrame,
    countdown: CountdownEngine<C>,
    poll_pending: bool,
}

impl<C: Clock> Dashboard<C> {
    pub fn new(clock: C, frame: EngineFrame) -> Self {
        let mut countdown = CountdownEngine::new(clock);
        countdown.set_target(frame.target);
        Self { state: DashboardState::default(), frame, countdown, poll_pending: false }
    }

    pub fn tick(&mut self) -> Option<&str> {
        self.countdown.tick()
    }

    /// The latest engine view with the live countdown.
    pub fn view(&self) -> DashboardView {
        let mut view = self.frame.view.clone();
        view.countdown = self.countdown.display().unwrap_or(NO_COUNTDOWN).to_string();
        view
    }

    pub fn handle_key(&mut self, code: KeyCode) -> Option<Command> {
        let command = self.state.handle_key(code, &self.frame.view, &self.frame.resolver);
        if command.as_ref().is_some_and(|c| *c != Command::Quit) {
            self.state.toast = None;
        }
        command
    }

    /// Claims the single poll slot. False while a poll is still queued or running.
    pub fn begin_poll(&mut self) -> bool {
        !std::mem::replace(&mut self.poll_pending, true)
    }

    pub fn apply(&mut self, done: Completion) {
        let succeeded = done.toast.as_ref().is_some_and(|toast| toast.success);
        match &done.command {
            Command::Poll => self.poll_pending = false,
            // Edits made while the save was in flight stay as drafts.
            Command::SaveItem(item, saved) if succeeded => {
                if self.state.drafts.get(item) == Some(saved) {
                    self.state.drafts.remove(item);
                }
            }
            Command::SaveLocation(saved) if succeeded => {
                if self.state.location_draft.as_ref().is_some_and(|draft| draft.config == *saved) {
                    self.state.location_draft = None;
                }
            }
            _ => {}
        }
        if let Some(toast) = done.toast {
            self.state.toast = Some(toast);
        }
        self.countdown.set_target(done.frame.target);
        self.frame = done.frame;
    }
}

fn step_volume(volume: f64, step: f64) -> f64 {
    let stepped = ((volume + step) * 10.0).round() / 10.0;
    stepped.clamp(crate::settings::MIN_VOLUME, crate::settings::MAX_VOLUME)
}

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%H:%M").to_string()
}

/// Render the dashboard
pub fn render_dashboard(f: &mut Frame, view: &DashboardView, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(12),   // Schedule and item detail
            Constraint::Length(3), // Location
            Constraint::Length(3), // Toast / instructions
        ])
        .split(f.area());

    render_header(f, chunks[0], view);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[1]);
    render_schedule(f, body[0], view, state);
    render_item_panel(f, body[1], view, state);

    render_location(f, chunks[2], view, state);
    render_footer(f, chunks[3], view, state);
}

fn render_header(f: &mut Frame, area: Rect, view: &DashboardView) {
    let next = match (&view.next_event, view.next_event_time) {
        (Some(name), Some(time)) => format!("Next: {} at {}", name, local_time(time)),
        (Some(name), None) => format!("Next: {}", name),
        _ => "Next: --".to_string(),
    };
    let mut spans = vec![
        Span::styled(next, Style::default().fg(Color::LightBlue).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(view.countdown.clone(), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
    ];
    if let Some(hijri) = &view.hijri_date {
        spans.push(Span::raw(format!("  | {}", hijri)));
    }
    if let Some(moon) = view.astronomy.as_ref().and_then(|a| a.nearest_phase.as_ref()) {
        spans.push(Span::raw(format!("  | {}", moon.name)));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("Athan"))
        .alignment(Alignment::Center);
    f.render_widget(header, area);
}

fn render_schedule(f: &mut Frame, area: Rect, view: &DashboardView, state: &DashboardState) {
    let items: Vec<ListItem> = SCHEDULE_ITEMS
        .iter()
        .map(|name| {
            let row = view.schedule.iter().find(|row| row.name == *name);
            let time = row.map(|r| local_time(r.time)).unwrap_or_else(|| "--:--".to_string());
            let active = row.is_some_and(|r| r.active);
            let dirty = if state.is_dirty(name) { " *" } else { "" };
            let style = if active {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<8} {}", name, time), style),
                Span::styled(dirty, Style::default().fg(Color::Yellow)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Schedule"))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED));

    f.render_stateful_widget(list, area, &mut state.item_list.clone());
}

fn render_item_panel(f: &mut Frame, area: Rect, view: &DashboardView, state: &DashboardState) {
    let Some(panel) = view.panel(state.selected_item()) else {
        return;
    };
    let config = state.draft_for(panel);
    let dim = Style::default().fg(Color::DarkGray);
    let on_off = |enabled: bool| if enabled { "on" } else { "off" };
    let audio = |file: &Option<String>| file.clone().unwrap_or_else(|| "default".to_string());

    let mut lines = Vec::new();
    if panel.show_primary {
        lines.push(Line::from(format!("Athan [e]: {}", on_off(config.primary_enabled))));
        let style = if config.primary_editable() { Style::default() } else { dim };
        lines.push(Line::styled(
            format!(
                "  audio {} | volume {:.1} [-/+] | {} min {}",
                audio(&config.primary_audio_file),
                config.primary_volume,
                config.primary_offset_minutes,
                config.primary_timing
            ),
            style,
        ));
    }
    lines.push(Line::from(format!("Reminder [r]: {}", on_off(config.secondary_enabled))));
    let style = if config.secondary_editable() { Style::default() } else { dim };
    lines.push(Line::styled(
        format!(
            "  audio {} | volume {:.1} [[/]] | {} min {}",
            audio(&config.secondary_audio_file),
            config.secondary_volume,
            config.secondary_offset_minutes,
            config.secondary_timing
        ),
        style,
    ));
    lines.push(Line::from(""));
    lines.push(Line::from("Devices:"));
    if view.devices.is_empty() {
        lines.push(Line::styled("  none reported", dim));
    }
    for (i, device) in view.devices.iter().enumerate() {
        let mark = if config.targets_device(&device.uuid) { "[✓]" } else { "[ ]" };
        let status = device.status.as_deref().unwrap_or("unknown");
        lines.push(Line::from(format!("  {} {} {} ({})", i + 1, mark, device.name, status)));
    }

    let paragraph = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(panel.name.clone()));
    f.render_widget(paragraph, area);
}

fn render_location(f: &mut Frame, area: Rect, view: &DashboardView, state: &DashboardState) {
    let (selection, config, edited) = match &state.location_draft {
        Some(draft) => (&draft.selection, Some(&draft.config), true),
        None => (&view.location.selection, view.location.stored.as_ref(), false),
    };
    let city = selection.city.name().unwrap_or("Custom");
    let coords = config
        .map(|c| format!("{:.4}, {:.4}", c.latitude, c.longitude))
        .unwrap_or_else(|| "--".to_string());
    let title = if edited { "Location (unsaved, [w] to save)" } else { "Location" };

    let paragraph = Paragraph::new(format!("{} / {} ({})  [c] country [l] city", selection.country, city, coords))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, area: Rect, view: &DashboardView, state: &DashboardState) {
    let (text, style) = if let Some(toast) = &state.toast {
        let color = if toast.success { Color::Green } else { Color::Red };
        (toast.message.clone(), Style::default().fg(color))
    } else if let Some(error) = &view.status_error {
        (format!("Status unavailable: {}", error), Style::default().fg(Color::Red))
    } else {
        (
            "↑↓: Item | 1-9: Device | s: Save | p/t: Test | x: Stop | R: Refresh | q: Quit".to_string(),
            Style::default().fg(Color::White),
        )
    };

    let footer = Paragraph::new(text)
        .style(style)
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left);
    f.render_widget(footer, area);
}

async fn execute<A: DashboardApi, C: Clock + Clone>(
    engine: &mut SyncEngine<A, C>,
    command: &Command,
) -> Option<Toast> {
    let toast = match command {
        Command::Quit => return None,
        Command::Poll => {
            engine.status(false).await;
            return None;
        }
        Command::Refresh => {
            let config = engine.refresh_config().await;
            let status = engine.status(true).await;
            match (config, status.error()) {
                (Ok(_), None) => Toast { message: "Refreshed".to_string(), success: true },
                (Err(e), _) => Toast { message: e.user_message(), success: false },
                (_, Some(e)) => Toast { message: e.user_message(), success: false },
            }
        }
        Command::SaveItem(item, config) => match engine.save_items([(item.clone(), config.clone())]).await {
            Ok(report) => Toast { message: report.message, success: true },
            Err(e) => Toast { message: e.to_string(), success: false },
        },
        Command::SaveLocation(location) => match engine.save_location(location.clone()).await {
            Ok(report) => Toast { message: report.message, success: true },
            Err(e) => Toast { message: e.to_string(), success: false },
        },
        Command::TestPrimary(item, config) => engine.trigger_primary(item, config).await.into(),
        Command::TestSecondary(item, config) => engine.trigger_secondary(item, config).await.into(),
        Command::StopAudio(devices) => engine.stop_audio(devices.clone()).await.into(),
    };
    Some(toast)
}

/// Runs commands against the engine one at a time and reports each one back.
/// Returns when either channel closes.
pub async fn sync_worker<A: DashboardApi, C: Clock + Clone>(
    engine: &mut SyncEngine<A, C>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedSender<Completion>,
) {
    while let Some(command) = commands.recv().await {
        tracing::debug!("Running {:?}", command);
        let toast = execute(engine, &command).await;
        let frame = EngineFrame::capture(engine);
        if completions.send(Completion { command, toast, frame }).is_err() {
            break;
        }
    }
}

/// Runs its closure when dropped, so setup failures still undo earlier steps.
struct OnDrop<F: FnMut()>(F);

impl<F: FnMut()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        (self.0)()
    }
}

fn restore_terminal() {
    let _ = crossterm::execute!(io::stdout(), crossterm::terminal::LeaveAlternateScreen);
    let _ = crossterm::terminal::disable_raw_mode();
}

/// Run the dashboard until the user quits.
///
/// Status is polled on `status_poll_interval`, the countdown ticks on
/// `countdown_tick`, and terminal input is drained between them. Requests run
/// in a worker beside the render loop, so a slow service never stalls the
/// countdown or the keyboard. Quitting drops any request still in flight.
pub async fn run_dashboard<A: DashboardApi, C: Clock + Clone>(
    engine: &mut SyncEngine<A, C>,
    config: &ClientConfig,
) -> Result<()> {
    let dashboard = Dashboard::new(engine.clock(), EngineFrame::capture(engine));
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();

    // Setup terminal
    crossterm::terminal::enable_raw_mode()?;
    let _restore = OnDrop(restore_terminal);
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    tokio::select! {
        result = event_loop(&mut terminal, dashboard, command_tx, completion_rx, config) => result,
        () = sync_worker(engine, command_rx, completion_tx) => Ok(()),
    }
}

async fn event_loop<C: Clock>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut dashboard: Dashboard<C>,
    commands: mpsc::UnboundedSender<Command>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
    config: &ClientConfig,
) -> Result<()> {
    let mut status_poll = tokio::time::interval(config.status_poll_interval);
    let mut countdown = tokio::time::interval(config.countdown_tick);
    let mut input = tokio::time::interval(INPUT_POLL);
    for timer in [&mut status_poll, &mut countdown, &mut input] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    }

    loop {
        let view = dashboard.view();
        terminal.draw(|f| render_dashboard(f, &view, &dashboard.state))?;

        tokio::select! {
            _ = status_poll.tick() => {
                if dashboard.begin_poll() {
                    commands.send(Command::Poll)?;
                }
            }
            _ = countdown.tick() => {
                dashboard.tick();
            }
            Some(done) = completions.recv() => {
                dashboard.apply(done);
            }
            _ = input.tick() => {
                while event::poll(Duration::ZERO)? {
                    let Event::Key(key) = event::read()? else {
                        continue;
                    };
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match dashboard.handle_key(key.code) {
                        Some(Command::Quit) => return Ok(()),
                        Some(command) => commands.send(command)?,
                        None => {}
                    }
                }
            }
        }
    }
}
