use std::cell::RefCell;

use ratatui::widgets::TableState;
use tracing::warn;

use crate::db::Database;

use super::super::player::{
    PhaseKind, PlaybackOutcome, PlaybackRegistry, PlayerController, PlayerFactory, ProgressChange,
};
use super::super::playlist::{Action, PlaylistStore, Video};
use super::super::schedule::{EpochMs, format_due_display};
use super::super::selector::{select_next, sorted_by_next_review};
use super::super::truncate;

/// Rebuilds the table rows from the live list, keeping the selection on
/// `preferred_id` when it is still present.
pub(crate) fn refresh_rows(
    list: &[Video],
    rows: &mut Vec<Video>,
    table_state: &mut TableState,
    preferred_id: Option<&str>,
) {
    *rows = sorted_by_next_review(list);
    if rows.is_empty() {
        table_state.select(None);
        return;
    }

    if let Some(id) = preferred_id
        && let Some(idx) = rows.iter().position(|video| video.id == id)
    {
        table_state.select(Some(idx));
        return;
    }

    match table_state.selected() {
        Some(selected) => table_state.select(Some(selected.min(rows.len() - 1))),
        None => table_state.select(Some(0)),
    }
}

pub(super) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(super) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}

/// Writes the store through; a failed write only costs the status line.
pub(super) fn persist(db: &mut Database, store: &PlaylistStore, status: &mut String) {
    if let Err(err) = db.save_state(store.state()) {
        warn!(error = %err, "failed to persist playlist");
        *status = status_error(&format!("Save failed: {err}"));
    }
}

pub(super) fn persist_progress(db: &Database, progress: &[ProgressChange], status: &mut String) {
    if let Err(err) = db.record_progress(progress) {
        warn!(error = %err, "failed to persist watch progress");
        *status = status_error(&format!("Save failed: {err}"));
    }
}

pub(crate) fn play_video<F: PlayerFactory>(
    controller: &RefCell<PlayerController<F>>,
    video: &Video,
) -> String {
    let mut controller = controller.borrow_mut();
    controller.play_video(video);
    if controller.phase() == PhaseKind::NoPlayer {
        controller.set_playing_id(None);
        return status_error(&format!(
            "Could not start the player for {}.",
            truncate(&video.title, 40)
        ));
    }
    status_info(&format!("Playing: {}", truncate(&video.title, 60)))
}

pub(crate) fn play_next_due<F: PlayerFactory>(
    controller: &RefCell<PlayerController<F>>,
    store: &PlaylistStore,
    now: EpochMs,
) -> String {
    match select_next(store.list(), None, now) {
        Some(video) => play_video(controller, video),
        None => status_info("Nothing due for review. All caught up."),
    }
}

pub(super) fn toggle_pause<F: PlayerFactory>(
    controller: &RefCell<PlayerController<F>>,
    paused: &mut bool,
) -> String {
    let controller = controller.borrow();
    if controller.playing_id().is_none() {
        return status_info("Nothing is playing.");
    }
    if *paused {
        controller.resume();
        *paused = false;
        status_info("Resumed.")
    } else {
        controller.pause();
        *paused = true;
        status_info("Paused.")
    }
}

pub(super) fn stop_playback<F: PlayerFactory>(controller: &RefCell<PlayerController<F>>) -> String {
    let mut controller = controller.borrow_mut();
    if controller.playing_id().is_none() {
        return status_info("Nothing is playing.");
    }
    controller.stop();
    status_info("Stopped.")
}

/// Marks `id` reviewed, stopping it first when it is the video on screen.
pub(crate) fn mark_reviewed<F: PlayerFactory>(
    registry: &PlaybackRegistry,
    controller: &RefCell<PlayerController<F>>,
    store: &mut PlaylistStore,
    id: &str,
    now: EpochMs,
) -> String {
    let Some(video) = store.find(id).cloned() else {
        return status_error("Video no longer exists.");
    };
    if registry.stop_if_playing(&video.id) {
        controller.borrow_mut().set_playing_id(None);
    }
    store.mark_reviewed(&video.id, now);
    let next = store
        .find(&video.id)
        .map(|updated| format_due_display(updated.next_review, now))
        .unwrap_or_default();
    status_info(&format!(
        "Reviewed: {} (next {next})",
        truncate(&video.title, 40)
    ))
}

pub(super) fn reset_schedule(store: &mut PlaylistStore, id: &str, now: EpochMs) -> String {
    let Some(video) = store.find(id).cloned() else {
        return status_error("Video no longer exists.");
    };
    if !store.reset_schedule(&video.id, now) {
        return status_info(&format!(
            "{} is already on the first interval.",
            truncate(&video.title, 40)
        ));
    }
    status_info(&format!("Schedule reset: {}", truncate(&video.title, 40)))
}

pub(crate) fn remove_video<F: PlayerFactory>(
    registry: &PlaybackRegistry,
    controller: &RefCell<PlayerController<F>>,
    store: &mut PlaylistStore,
    id: &str,
) -> String {
    let Some(video) = store.find(id).cloned() else {
        return status_error("Delete failed: video no longer exists.");
    };
    if registry.stop_if_playing(&video.id) {
        controller.borrow_mut().set_playing_id(None);
    }
    store.dispatch(Action::Remove {
        id: video.id.clone(),
    });
    status_info(&format!(
        "Removed: {}. Press u to undo.",
        truncate(&video.title, 40)
    ))
}

pub(super) fn step_history(store: &mut PlaylistStore, action: Action) -> String {
    let redo = matches!(action, Action::Redo);
    let available = if redo {
        store.can_redo()
    } else {
        store.can_undo()
    };
    if !available {
        return status_info(if redo {
            "Nothing to redo."
        } else {
            "Nothing to undo."
        });
    }
    store.dispatch(action);
    status_info(if redo { "Redone." } else { "Undone." })
}

pub(super) fn describe_outcome(store: &PlaylistStore, outcome: &PlaybackOutcome) -> String {
    let title_of = |id: &str| {
        store
            .find(id)
            .map(|video| truncate(&video.title, 32))
            .unwrap_or_else(|| id.to_string())
    };
    match outcome {
        PlaybackOutcome::Advanced { ended_id, next_id } => status_info(&format!(
            "Reviewed {}. Playing next: {}",
            title_of(ended_id),
            title_of(next_id)
        )),
        PlaybackOutcome::Finished { ended_id } => status_info(&format!(
            "Reviewed {}. All caught up.",
            title_of(ended_id)
        )),
        PlaybackOutcome::Failed { message } => {
            status_error(&format!("Playback stopped: {message}"))
        }
    }
}
