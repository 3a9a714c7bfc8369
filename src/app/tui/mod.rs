mod actions;
mod render;
mod session;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::widgets::TableState;
use tracing::info;

use crate::db::Database;

use super::player::{
    PhaseKind, PlaybackRegistry, PlayerController, PlayerFactory, PlayerStdio,
    ProcessPlayerFactory, resolve_player_bin,
};
use super::playlist::{Action, PlaylistStore, Video};
use super::schedule::now_ms;

use self::actions::{
    describe_outcome, persist, persist_progress, reset_schedule, status_error, status_info,
    step_history, stop_playback, toggle_pause,
};
use self::render::{Screen, draw_tui};
use self::session::TuiSession;

pub(super) use self::actions::{
    mark_reviewed, play_next_due, play_video, refresh_rows, remove_video,
};
#[cfg(test)]
pub(super) use self::render::interval_gauge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TuiCommand {
    Quit,
    Up,
    Down,
    PlaySelected,
    PlayNextDue,
    TogglePause,
    Stop,
    MarkReviewed,
    ResetSchedule,
    Remove,
    Undo,
    Redo,
}

pub(crate) fn key_command(key: KeyEvent) -> Option<TuiCommand> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let command = match key.code {
        KeyCode::Char('c') if ctrl => TuiCommand::Quit,
        KeyCode::Char('z') if ctrl => TuiCommand::Undo,
        KeyCode::Char('y') if ctrl => TuiCommand::Redo,
        KeyCode::Char('q') | KeyCode::Esc => TuiCommand::Quit,
        KeyCode::Up | KeyCode::Char('k') => TuiCommand::Up,
        KeyCode::Down | KeyCode::Char('j') => TuiCommand::Down,
        KeyCode::Enter | KeyCode::Char('p') => TuiCommand::PlaySelected,
        KeyCode::Char('n') => TuiCommand::PlayNextDue,
        KeyCode::Char(' ') => TuiCommand::TogglePause,
        KeyCode::Char('s') => TuiCommand::Stop,
        KeyCode::Char('r') => TuiCommand::MarkReviewed,
        KeyCode::Char('x') => TuiCommand::ResetSchedule,
        KeyCode::Char('d') | KeyCode::Delete => TuiCommand::Remove,
        KeyCode::Char('u') => TuiCommand::Undo,
        KeyCode::Char('U') => TuiCommand::Redo,
        _ => return None,
    };
    Some(command)
}

#[derive(Debug, Clone)]
pub(super) struct PendingDelete {
    pub(super) video_id: String,
    pub(super) title: String,
}

/// What the dashboard shows about the player.
#[derive(Debug, Clone)]
pub(super) struct PlayerView {
    pub(super) phase: PhaseKind,
    pub(super) playing_id: Option<String>,
    pub(super) playing_title: Option<String>,
    pub(super) paused: bool,
}

struct TuiView {
    rows: Vec<Video>,
    table_state: TableState,
    status: String,
    paused: bool,
    pending_delete: Option<PendingDelete>,
}

impl TuiView {
    fn new(list: &[Video]) -> Self {
        let mut view = Self {
            rows: Vec::new(),
            table_state: TableState::default(),
            status: if list.is_empty() {
                status_info("No videos yet. Run `looptube add <URL>` first.")
            } else {
                status_info("Ready. Press n to play the next due video.")
            },
            paused: false,
            pending_delete: None,
        };
        refresh_rows(list, &mut view.rows, &mut view.table_state, None);
        view
    }

    fn selected(&self) -> Option<&Video> {
        self.table_state
            .selected()
            .and_then(|idx| self.rows.get(idx))
    }

    fn refresh(&mut self, list: &[Video]) {
        let preferred = self.selected().map(|video| video.id.clone());
        refresh_rows(
            list,
            &mut self.rows,
            &mut self.table_state,
            preferred.as_deref(),
        );
    }
}

pub(crate) fn run_tui(db: &mut Database, store: &mut PlaylistStore) -> Result<()> {
    let factory = ProcessPlayerFactory::new(resolve_player_bin(), PlayerStdio::Null);
    let controller = Rc::new(RefCell::new(PlayerController::new(factory)));
    controller
        .borrow_mut()
        .set_resume_positions(super::resume_positions(db)?);
    let registry = PlaybackRegistry::new();
    let registration = registry.attach(&controller);
    info!(len = store.list().len(), "starting tui");

    let mut session = TuiSession::enter()?;
    let result = event_loop(&mut session, db, store, &controller, &registry);

    drop(registration);
    controller.borrow_mut().dispose();
    let progress = controller.borrow_mut().take_progress();
    let saved = db
        .save_state(store.state())
        .and_then(|()| db.record_progress(&progress));
    session.leave()?;
    result.and(saved)
}

fn event_loop<F: PlayerFactory>(
    session: &mut TuiSession,
    db: &mut Database,
    store: &mut PlaylistStore,
    controller: &RefCell<PlayerController<F>>,
    registry: &PlaybackRegistry,
) -> Result<()> {
    let mut view = TuiView::new(store.list());

    loop {
        let now = now_ms();
        let outcomes = controller.borrow_mut().pump(store, now);
        if !outcomes.is_empty() {
            view.paused = false;
            for outcome in &outcomes {
                view.status = describe_outcome(store, outcome);
            }
            persist(db, store, &mut view.status);
            view.refresh(store.list());
        }
        let progress = controller.borrow_mut().take_progress();
        if !progress.is_empty() {
            persist_progress(db, &progress, &mut view.status);
        }

        let player = player_view(&controller.borrow(), store, view.paused);
        let resume_seconds = view.selected().map_or(0, |video| {
            controller
                .borrow()
                .resume_position(&video.external_media_id)
        });
        let screen = Screen {
            list: store.list(),
            rows: &view.rows,
            player: &player,
            status: &view.status,
            pending_delete: view.pending_delete.as_ref(),
            resume_seconds,
            now,
        };
        session
            .terminal()
            .draw(|frame| draw_tui(frame, &screen, &mut view.table_state))?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if let Some(dialog) = view.pending_delete.take() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    view.status = remove_video(registry, controller, store, &dialog.video_id);
                    persist(db, store, &mut view.status);
                    view.refresh(store.list());
                }
                KeyCode::Esc | KeyCode::Char('n') => {
                    view.status = status_info("Remove canceled.");
                }
                _ => view.pending_delete = Some(dialog),
            }
            continue;
        }

        let Some(command) = key_command(key) else {
            continue;
        };
        let now = now_ms();
        let selected = view.selected().cloned();

        match command {
            TuiCommand::Quit => break,
            TuiCommand::Up => {
                if let Some(selected) = view.table_state.selected() {
                    view.table_state.select(Some(selected.saturating_sub(1)));
                }
            }
            TuiCommand::Down => {
                if let Some(selected) = view.table_state.selected()
                    && !view.rows.is_empty()
                {
                    let next = (selected + 1).min(view.rows.len().saturating_sub(1));
                    view.table_state.select(Some(next));
                }
            }
            TuiCommand::PlaySelected => {
                let Some(video) = selected else {
                    view.status = status_error("Nothing selected.");
                    continue;
                };
                view.paused = false;
                view.status = play_video(controller, &video);
            }
            TuiCommand::PlayNextDue => {
                view.paused = false;
                view.status = play_next_due(controller, store, now);
            }
            TuiCommand::TogglePause => {
                view.status = toggle_pause(controller, &mut view.paused);
            }
            TuiCommand::Stop => {
                view.paused = false;
                view.status = stop_playback(controller);
            }
            TuiCommand::MarkReviewed | TuiCommand::ResetSchedule | TuiCommand::Remove => {
                let Some(video) = selected else {
                    view.status = status_error("Nothing selected.");
                    continue;
                };
                match command {
                    TuiCommand::MarkReviewed => {
                        view.status = mark_reviewed(registry, controller, store, &video.id, now);
                    }
                    TuiCommand::ResetSchedule => {
                        view.status = reset_schedule(store, &video.id, now);
                    }
                    _ => {
                        view.pending_delete = Some(PendingDelete {
                            video_id: video.id.clone(),
                            title: video.title.clone(),
                        });
                        view.status =
                            status_info("Confirm remove: y/Enter to remove, n/Esc to cancel.");
                        continue;
                    }
                }
                persist(db, store, &mut view.status);
                view.refresh(store.list());
            }
            TuiCommand::Undo | TuiCommand::Redo => {
                let action = if command == TuiCommand::Undo {
                    Action::Undo
                } else {
                    Action::Redo
                };
                view.status = step_history(store, action);
                persist(db, store, &mut view.status);
                view.refresh(store.list());
            }
        }

        if controller.borrow().playing_id().is_none() {
            view.paused = false;
        }
    }

    Ok(())
}

fn player_view<F: PlayerFactory>(
    controller: &PlayerController<F>,
    store: &PlaylistStore,
    paused: bool,
) -> PlayerView {
    let playing_id = controller.playing_id().map(str::to_string);
    let playing_title = playing_id
        .as_deref()
        .and_then(|id| store.find(id))
        .map(|video| video.title.clone());
    PlayerView {
        phase: controller.phase(),
        playing_id,
        playing_title,
        paused,
    }
}
