use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::config::AppConfig;
use crate::storage::{PolicyStatus, StorageHandle};
use crate::ui;

mod actions;
pub mod state;

pub use state::{AppState, FocusPane, OverlayState, Register, RowSummary};

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    ToggleFocus,
    Refresh,
    StartSearch,
    ClearSearch,
    CycleStatusFilter,
    CycleSort,
    SwitchRegister(Register),
    ToggleTaskState,
    OpenAssign,
    Unassign,
    DeletePolicy,
    ActivatePolicy,
}

pub struct App {
    pub config: Arc<AppConfig>,
    pub storage: StorageHandle,
    state: AppState,
    list_state: ListState,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>, storage: StorageHandle) -> Result<Self> {
        let state = AppState::load(
            &storage,
            config.page_size,
            config.preview_lines as usize,
            config.default_sort.sort_key(),
        )
        .context("loading register rows for initial state")?;
        let mut list_state = ListState::default();
        if !state.is_empty() {
            list_state.select(Some(state.selected));
        }
        Ok(Self {
            config,
            storage,
            state,
            list_state,
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| {
                    if !self.state.is_empty() {
                        self.list_state.select(Some(self.state.selected));
                    } else {
                        self.list_state.select(None);
                    }
                    ui::draw_app(frame, &self.config.theme, &self.state, &mut self.list_state);
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                match event::read().context("reading terminal event")? {
                    Event::Key(key) => self.handle_key(key),
                    Event::Resize(_, _) => {
                        // no-op: next draw will naturally adapt to the new size
                    }
                    _ => {}
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if self.handle_overlay_key(key) {
            return;
        }

        if self.state.search.active {
            match key.code {
                KeyCode::Esc => {
                    self.state.cancel_search();
                    return;
                }
                KeyCode::Enter => {
                    self.state.finish_search();
                    return;
                }
                KeyCode::Backspace => {
                    self.state.pop_search_char();
                    return;
                }
                KeyCode::Char(ch)
                    if !key.modifiers.intersects(
                        KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                    ) =>
                {
                    self.state.push_search_char(ch);
                    return;
                }
                _ => {}
            }
        }

        let plain = !key.modifiers.intersects(
            KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
        );
        let action = match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Quit)
            }
            KeyCode::Char('j') | KeyCode::Down => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::SelectPrevious),
            KeyCode::Tab => Some(Action::ToggleFocus),
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Refresh)
            }
            KeyCode::Char('/') if plain => Some(Action::StartSearch),
            KeyCode::Esc => Some(Action::ClearSearch),
            KeyCode::Char('f') if plain => Some(Action::CycleStatusFilter),
            KeyCode::Char('s') if plain => Some(Action::CycleSort),
            KeyCode::Char('1') if plain => Some(Action::SwitchRegister(Register::Policies)),
            KeyCode::Char('2') if plain => Some(Action::SwitchRegister(Register::Tasks)),
            KeyCode::Char('3') if plain => Some(Action::SwitchRegister(Register::Vendors)),
            KeyCode::Char('4') if plain => Some(Action::SwitchRegister(Register::People)),
            KeyCode::Char('x') if plain => Some(Action::ToggleTaskState),
            KeyCode::Char('a') if plain => Some(Action::OpenAssign),
            KeyCode::Char('u') if plain => Some(Action::Unassign),
            KeyCode::Char('d') if plain => Some(Action::DeletePolicy),
            KeyCode::Char('A') => Some(Action::ActivatePolicy),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => self.state.move_selection(1),
            Action::SelectPrevious => self.state.move_selection(-1),
            Action::ToggleFocus => self.state.toggle_focus(),
            Action::Refresh => {
                if let Err(err) = self.state.refresh(&self.storage) {
                    tracing::error!(?err, "failed to refresh register");
                    self.state.set_status_message(Some("Refresh failed"));
                } else {
                    self.state.set_status_message(Some("Refreshed"));
                }
            }
            Action::StartSearch => self.state.begin_search(),
            Action::ClearSearch => {
                if !self.state.search.query.is_empty() {
                    self.state.cancel_search();
                    self.state.set_status_message(Some("Search cleared"));
                }
            }
            Action::CycleStatusFilter => {
                let filter = self.state.cycle_status_filter().to_string();
                self.state
                    .set_status_message(Some(format!("Status filter: {filter}")));
            }
            Action::CycleSort => {
                let sort = self.state.cycle_sort();
                self.state
                    .set_status_message(Some(format!("Sorted by {}", sort.label())));
            }
            Action::SwitchRegister(register) => self.handle_switch_register(register),
            Action::ToggleTaskState => self.handle_toggle_task(),
            Action::OpenAssign => self.handle_open_assign(),
            Action::Unassign => self.handle_unassign(),
            Action::DeletePolicy => self.handle_delete_policy(),
            Action::ActivatePolicy => self.handle_activate_policy(),
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        match self.state.overlay() {
            Some(OverlayState::ConfirmDelete(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Delete canceled"));
                    }
                    KeyCode::Enter => self.submit_delete_policy(),
                    _ => {}
                }
                true
            }
            Some(OverlayState::AssignPerson(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Assignment canceled"));
                    }
                    KeyCode::Enter => self.submit_assignment(),
                    KeyCode::Backspace => {
                        if let Some(overlay) = self.state.assign_overlay_mut() {
                            overlay.pop_char();
                        }
                    }
                    KeyCode::Down => {
                        if let Some(overlay) = self.state.assign_overlay_mut() {
                            overlay.move_selection(1);
                        }
                    }
                    KeyCode::Up => {
                        if let Some(overlay) = self.state.assign_overlay_mut() {
                            overlay.move_selection(-1);
                        }
                    }
                    KeyCode::Char(ch)
                        if !key.modifiers.intersects(
                            KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                        ) =>
                    {
                        if let Some(overlay) = self.state.assign_overlay_mut() {
                            overlay.push_char(ch);
                        }
                    }
                    _ => {}
                }
                true
            }
            None => false,
        }
    }

    fn handle_switch_register(&mut self, register: Register) {
        match self.state.set_register(register, &self.storage) {
            Ok(()) => {
                self.state
                    .set_status_message(Some(format!("Viewing {}", register.title())));
            }
            Err(err) => {
                tracing::error!(?err, "failed to switch register");
                self.state
                    .set_status_message(Some("Failed to load register"));
            }
        }
    }

    fn handle_toggle_task(&mut self) {
        if self.state.register != Register::Tasks {
            self.state
                .set_status_message(Some("Task toggling lives in the Tasks register (2)"));
            return;
        }
        let Some(task_id) = self.state.selected_id() else {
            self.state.set_status_message(Some("No task selected"));
            return;
        };
        let dispatcher = actions::ActionDispatcher::new(&self.storage);
        match dispatcher.toggle_task(task_id) {
            Ok(next) => {
                if let Err(err) = self.state.refresh(&self.storage) {
                    tracing::error!(?err, "failed to refresh after task toggle");
                }
                self.state.select_row_by_id(task_id);
                let message = match next {
                    crate::storage::TaskState::Done => "Task completed",
                    crate::storage::TaskState::Todo => "Task reopened",
                };
                self.state.set_status_message(Some(message));
            }
            Err(err) => {
                tracing::error!(?err, task_id, "failed to toggle task state");
                self.state
                    .set_status_message(Some(format!("Could not update task: {err}")));
            }
        }
    }

    fn handle_open_assign(&mut self) {
        if self.state.register != Register::Tasks {
            self.state
                .set_status_message(Some("Assignment lives in the Tasks register (2)"));
            return;
        }
        if self.state.selected_id().is_none() {
            self.state.set_status_message(Some("No task selected"));
            return;
        }
        match self.state.open_assign_overlay(&self.storage) {
            Ok(()) => {
                self.state.set_status_message(Some(
                    "Assign: type to search • ↑/↓ choose • Enter assign • Esc cancel",
                ));
            }
            Err(err) => {
                tracing::error!(?err, "failed to open assignment overlay");
                self.state
                    .set_status_message(Some("Failed to load people register"));
            }
        }
    }

    fn submit_assignment(&mut self) {
        let Some((task_id, person)) = self
            .state
            .assign_overlay()
            .and_then(|overlay| {
                overlay
                    .selected_person()
                    .map(|person| (overlay.task_id, person.clone()))
            })
        else {
            self.state
                .set_status_message(Some("No person matches the search"));
            return;
        };

        let dispatcher = actions::ActionDispatcher::new(&self.storage);
        match dispatcher.assign_person(task_id, person.id) {
            Ok(()) => {
                self.state.close_overlay();
                if let Err(err) = self.state.refresh(&self.storage) {
                    tracing::error!(?err, "failed to refresh after assignment");
                }
                self.state.select_row_by_id(task_id);
                self.state
                    .set_status_message(Some(format!("Assigned to {}", person.full_name)));
            }
            Err(err) => {
                tracing::error!(?err, task_id, "failed to assign task");
                self.state.set_status_message(Some("Assignment failed"));
            }
        }
    }

    fn handle_unassign(&mut self) {
        if self.state.register != Register::Tasks {
            return;
        }
        let Some(task_id) = self.state.selected_id() else {
            self.state.set_status_message(Some("No task selected"));
            return;
        };
        let dispatcher = actions::ActionDispatcher::new(&self.storage);
        match dispatcher.unassign_person(task_id) {
            Ok(()) => {
                if let Err(err) = self.state.refresh(&self.storage) {
                    tracing::error!(?err, "failed to refresh after unassign");
                }
                self.state.select_row_by_id(task_id);
                self.state.set_status_message(Some("Task unassigned"));
            }
            Err(err) => {
                tracing::error!(?err, task_id, "failed to unassign task");
                self.state.set_status_message(Some("Unassign failed"));
            }
        }
    }

    fn handle_delete_policy(&mut self) {
        if self.state.register != Register::Policies {
            self.state
                .set_status_message(Some("Deletion lives in the Policies register (1)"));
            return;
        }
        if self.state.selected_id().is_none() {
            self.state.set_status_message(Some("No policy selected"));
            return;
        }
        self.state.open_confirm_delete();
        self.state
            .set_status_message(Some("Delete policy: Enter confirm • Esc cancel"));
    }

    fn submit_delete_policy(&mut self) {
        let Some(overlay) = self.state.confirm_delete_overlay().cloned() else {
            return;
        };
        let dispatcher = actions::ActionDispatcher::new(&self.storage);
        match dispatcher.delete_policy(overlay.policy_id) {
            Ok(()) => {
                self.state.close_overlay();
                if let Err(err) = self.state.refresh(&self.storage) {
                    tracing::error!(?err, "failed to refresh after policy delete");
                }
                self.state
                    .set_status_message(Some(format!("Deleted '{}'", overlay.name)));
            }
            Err(err) => {
                tracing::error!(?err, policy_id = overlay.policy_id, "failed to delete policy");
                self.state.close_overlay();
                self.state.set_status_message(Some("Delete failed"));
            }
        }
    }

    fn handle_activate_policy(&mut self) {
        if self.state.register != Register::Policies {
            return;
        }
        let Some(row) = self.state.selected() else {
            self.state.set_status_message(Some("No policy selected"));
            return;
        };
        let (policy_id, next) = if row.status == "ACTIVE" {
            (row.id, PolicyStatus::Draft)
        } else {
            (row.id, PolicyStatus::Active)
        };
        let dispatcher = actions::ActionDispatcher::new(&self.storage);
        match dispatcher.set_policy_status(policy_id, next) {
            Ok(()) => {
                if let Err(err) = self.state.refresh(&self.storage) {
                    tracing::error!(?err, "failed to refresh after status change");
                }
                self.state.select_row_by_id(policy_id);
                let message = match next {
                    PolicyStatus::Active => "Policy activated",
                    PolicyStatus::Draft => "Policy moved back to draft",
                };
                self.state.set_status_message(Some(message));
            }
            Err(err) => {
                tracing::error!(?err, policy_id, "failed to change policy status");
                self.state
                    .set_status_message(Some("Status change failed"));
            }
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}
