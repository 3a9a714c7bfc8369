use std::cell::{Cell, RefCell};
use std::ffi::OsString;
use std::path::PathBuf;
use std::rc::Rc;
#[cfg(unix)]
use std::sync::mpsc;
#[cfg(unix)]
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::widgets::TableState;

use crate::db::{Database, PERSISTED_HISTORY_LIMIT, storage_key};
use crate::paths::database_file_path_from_env;

use super::player::*;
use super::playlist::*;
use super::schedule::*;
use super::selector::*;
use super::truncate;
use super::youtube::{extract_video_id, watch_url};
use super::tui::{
    TuiCommand, interval_gauge, key_command, mark_reviewed, play_next_due, play_video,
    refresh_rows, remove_video,
};

const NOW: EpochMs = 1_700_000_000_000;

fn video(id: &str, media_id: &str, review_count: u32, next_review: EpochMs) -> Video {
    Video {
        id: id.to_string(),
        external_media_id: media_id.to_string(),
        title: format!("Title {id}"),
        url: watch_url(media_id),
        created_at: NOW,
        review_count,
        next_review,
    }
}

fn ids(list: &[Video]) -> Vec<&str> {
    list.iter().map(|video| video.id.as_str()).collect()
}

type CallLog = Rc<RefCell<Vec<String>>>;

struct FakePlayer {
    calls: CallLog,
    current: RefCell<Option<String>>,
    position: Rc<Cell<Option<u32>>>,
    reports_current: bool,
    fail_play: bool,
}

impl MediaPlayer for FakePlayer {
    fn load_by_id(&self, media_id: &str, start_seconds: u32) -> Result<(), PlayerError> {
        let call = match start_seconds {
            0 => format!("load:{media_id}"),
            start => format!("load:{media_id}@{start}"),
        };
        self.calls.borrow_mut().push(call);
        *self.current.borrow_mut() = Some(media_id.to_string());
        Ok(())
    }

    fn play(&self) -> Result<(), PlayerError> {
        self.calls.borrow_mut().push("play".to_string());
        if self.fail_play {
            return Err(PlayerError::NothingLoaded);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), PlayerError> {
        self.calls.borrow_mut().push("stop".to_string());
        Ok(())
    }

    fn current_id(&self) -> Result<Option<String>, PlayerError> {
        if self.reports_current {
            Ok(self.current.borrow().clone())
        } else {
            Err(PlayerError::Unsupported("current_id"))
        }
    }

    fn position_seconds(&self) -> Result<u32, PlayerError> {
        self.position
            .get()
            .ok_or(PlayerError::Unsupported("position_seconds"))
    }

    fn destroy(&self) -> Result<(), PlayerError> {
        self.calls.borrow_mut().push("destroy".to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    calls: CallLog,
    sinks: Rc<RefCell<Vec<EventSink>>>,
    position: Rc<Cell<Option<u32>>>,
    reports_current: bool,
    fail_play: bool,
    fail_create: bool,
}

impl FakeFactory {
    fn reporting() -> Self {
        Self {
            reports_current: true,
            ..Self::default()
        }
    }
}

impl PlayerFactory for FakeFactory {
    type Player = FakePlayer;

    fn create(&mut self, request: CreateRequest<'_>) -> Result<FakePlayer, PlayerError> {
        self.calls.borrow_mut().push(format!(
            "create:{}:{}",
            request.container, request.requested_id
        ));
        if self.fail_create {
            return Err(PlayerError::Create("container missing".to_string()));
        }
        self.sinks.borrow_mut().push(request.events);
        Ok(FakePlayer {
            calls: Rc::clone(&self.calls),
            current: RefCell::new(None),
            position: Rc::clone(&self.position),
            reports_current: self.reports_current,
            fail_play: self.fail_play,
        })
    }
}

struct Harness {
    controller: PlayerController<FakeFactory>,
    calls: CallLog,
    sinks: Rc<RefCell<Vec<EventSink>>>,
    position: Rc<Cell<Option<u32>>>,
}

impl Harness {
    fn new(factory: FakeFactory) -> Self {
        let calls = Rc::clone(&factory.calls);
        let sinks = Rc::clone(&factory.sinks);
        let position = Rc::clone(&factory.position);
        Self {
            controller: PlayerController::new(factory),
            calls,
            sinks,
            position,
        }
    }

    fn sink(&self) -> EventSink {
        self.sinks
            .borrow()
            .last()
            .cloned()
            .expect("player should have been created")
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == call).count()
    }
}

#[test]
fn interval_policy_uses_first_rung_for_new_records() {
    assert_eq!(compute_next_review(0, NOW), NOW + DAY_MS);
    assert_eq!(compute_next_review(1, NOW), NOW + 3 * DAY_MS);
    assert_eq!(compute_next_review(2, NOW), NOW + 7 * DAY_MS);
}

#[test]
fn interval_policy_saturates_at_last_rung() {
    for count in [4, 5, 12, u32::MAX] {
        assert_eq!(compute_next_review(count, NOW), NOW + 30 * DAY_MS);
    }
}

#[test]
fn format_due_display_reports_overdue_as_due_now() {
    assert_eq!(format_due_display(NOW - 5, NOW), "due now");
    assert!(format_due_display(NOW + 2 * 3_600_000, NOW).ends_with("(in 2h)"));
    assert!(format_due_display(NOW + 3 * DAY_MS, NOW).ends_with("(in 3d)"));
}

#[test]
fn new_video_id_is_time_prefix_plus_random_suffix() {
    let id = new_video_id(NOW);
    let prefix = to_base36(NOW as u64);
    assert!(id.starts_with(&prefix));
    assert_eq!(id.len(), prefix.len() + 6);
    assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
}

#[test]
fn to_base36_matches_known_values() {
    assert_eq!(to_base36(0), "0");
    assert_eq!(to_base36(35), "z");
    assert_eq!(to_base36(36), "10");
}

#[test]
fn add_prepends_and_pushes_history() {
    let state = PlaylistState {
        list: vec![video("a", "m-a", 0, NOW)],
        ..PlaylistState::default()
    };
    let next = reduce(&state, Action::Add(video("b", "m-b", 0, NOW)));
    assert_eq!(ids(&next.list), ["b", "a"]);
    assert_eq!(next.past, vec![state.list.clone()]);
    assert!(next.future.is_empty());
}

#[test]
fn add_accepts_duplicate_media_ids() {
    let state = PlaylistState {
        list: vec![video("a", "same", 0, NOW)],
        ..PlaylistState::default()
    };
    let next = reduce(&state, Action::Add(video("b", "same", 0, NOW)));
    assert_eq!(next.list.len(), 2);
}

#[test]
fn remove_filters_every_match_and_ignores_unknown_ids() {
    let state = PlaylistState {
        list: vec![video("a", "m-a", 0, NOW), video("b", "m-b", 0, NOW)],
        ..PlaylistState::default()
    };
    let removed = reduce(&state, Action::Remove { id: "a".into() });
    assert_eq!(ids(&removed.list), ["b"]);
    assert_eq!(removed.past.len(), 1);

    let untouched = reduce(&state, Action::Remove { id: "zzz".into() });
    assert_eq!(untouched, state);
}

#[test]
fn reviewed_increments_count_and_sets_supplied_time() {
    let state = PlaylistState {
        list: vec![video("a", "m-a", 2, NOW)],
        ..PlaylistState::default()
    };
    let next = reduce(
        &state,
        Action::Reviewed {
            id: "a".into(),
            next_review: NOW + 42,
        },
    );
    assert_eq!(next.list[0].review_count, 3);
    assert_eq!(next.list[0].next_review, NOW + 42);
    assert_eq!(next.past.len(), 1);
}

#[test]
fn reset_restores_first_rung_interval() {
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![video("a", "m-a", 5, NOW + 30 * DAY_MS)],
        ..PlaylistState::default()
    });
    assert!(store.reset_schedule("a", NOW));
    let reset = store.find("a").expect("record");
    assert_eq!(reset.review_count, 0);
    assert_eq!(reset.next_review, NOW + DAY_MS);
}

#[test]
fn mark_reviewed_routes_through_interval_policy() {
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![video("a", "m-a", 1, NOW)],
        ..PlaylistState::default()
    });
    assert!(store.mark_reviewed("a", NOW));
    let reviewed = store.find("a").expect("record");
    assert_eq!(reviewed.review_count, 2);
    assert_eq!(reviewed.next_review, compute_next_review(2, NOW));
    assert!(!store.mark_reviewed("missing", NOW));
}

#[test]
fn undo_then_redo_restores_state() {
    let mut store = PlaylistStore::default();
    store.dispatch(Action::Add(video("a", "m-a", 0, NOW)));
    store.dispatch(Action::Add(video("b", "m-b", 0, NOW)));
    let before = store.state().clone();

    store.dispatch(Action::Undo);
    assert_eq!(ids(store.list()), ["a"]);
    assert_eq!(store.state().future, vec![before.list.clone()]);

    store.dispatch(Action::Redo);
    assert_eq!(store.state(), &before);
}

#[test]
fn undo_and_redo_walk_a_mixed_history_exactly() {
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![video("seed", "m-seed", 2, NOW + DAY_MS)],
        ..PlaylistState::default()
    });
    let mut snapshots = vec![store.list().to_vec()];

    let steps = [
        Action::Add(video("a", "m-a", 0, NOW)),
        Action::Add(video("b", "m-b", 0, NOW)),
        Action::Reviewed {
            id: "a".into(),
            next_review: NOW + 3 * DAY_MS,
        },
        Action::Reset {
            id: "seed".into(),
            next_review: NOW + DAY_MS / 2,
        },
        Action::Remove { id: "b".into() },
        Action::Set(vec![video("c", "m-c", 1, NOW), video("a", "m-a", 1, NOW)]),
        Action::Reviewed {
            id: "c".into(),
            next_review: NOW + 7 * DAY_MS,
        },
    ];
    for step in steps {
        assert!(store.dispatch(step));
        snapshots.push(store.list().to_vec());
    }
    let last = store.state().clone();
    let n = snapshots.len() - 1;

    for expected in snapshots.iter().rev().skip(1) {
        store.dispatch(Action::Undo);
        assert_eq!(store.list(), expected.as_slice());
    }
    assert!(!store.can_undo());
    assert_eq!(store.state().future.len(), n);

    for expected in snapshots.iter().skip(1) {
        store.dispatch(Action::Redo);
        assert_eq!(store.list(), expected.as_slice());
    }
    assert!(!store.can_redo());
    assert_eq!(store.state(), &last);
}

#[test]
fn redo_is_discarded_by_a_new_mutation() {
    let mut store = PlaylistStore::default();
    store.dispatch(Action::Add(video("a", "m-a", 0, NOW)));
    store.dispatch(Action::Undo);
    assert!(store.can_redo());

    store.dispatch(Action::Add(video("b", "m-b", 0, NOW)));
    assert!(!store.can_redo());
    store.dispatch(Action::Redo);
    assert_eq!(ids(store.list()), ["b"]);
}

#[test]
fn undo_and_redo_without_history_are_noops() {
    let state = PlaylistState {
        list: vec![video("a", "m-a", 0, NOW)],
        ..PlaylistState::default()
    };
    assert_eq!(reduce(&state, Action::Undo), state);
    assert_eq!(reduce(&state, Action::Redo), state);
}

#[test]
fn set_replaces_list_and_is_undoable() {
    let mut store = PlaylistStore::default();
    store.dispatch(Action::Add(video("a", "m-a", 0, NOW)));
    assert!(store.dispatch(Action::Set(vec![
        video("x", "m-x", 0, NOW),
        video("y", "m-y", 0, NOW),
    ])));
    assert_eq!(ids(store.list()), ["x", "y"]);
    store.dispatch(Action::Undo);
    assert_eq!(ids(store.list()), ["a"]);
}

#[test]
fn update_patches_metadata_without_touching_history() {
    let mut store = PlaylistStore::default();
    store.dispatch(Action::Add(video("a", "m-a", 3, NOW + 5)));
    store.dispatch(Action::Undo);
    store.dispatch(Action::Redo);
    let history = (store.state().past.clone(), store.state().future.clone());

    let changed = store.dispatch(Action::Update(VideoPatch {
        external_media_id: Some("m-a".into()),
        title: Some("Renamed".into()),
        ..VideoPatch::default()
    }));
    assert!(changed);
    let updated = store.find("a").expect("record");
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.review_count, 3);
    assert_eq!(updated.next_review, NOW + 5);
    assert_eq!(
        (store.state().past.clone(), store.state().future.clone()),
        history
    );
}

#[test]
fn find_prefers_local_id_over_media_id() {
    let store = PlaylistStore::new(PlaylistState {
        list: vec![video("x", "a", 0, NOW), video("a", "m-a", 0, NOW)],
        ..PlaylistState::default()
    });
    assert_eq!(store.find("a").map(|v| v.id.as_str()), Some("a"));
    assert_eq!(store.find("m-a").map(|v| v.id.as_str()), Some("a"));
    assert!(store.find("nope").is_none());
}

#[test]
fn select_next_orders_by_next_review_not_newness() {
    let list = vec![
        video("A", "m-a", 0, NOW + 100_000),
        video("B", "m-b", 2, NOW - 100_000),
        video("C", "m-c", 1, NOW + DAY_MS),
    ];
    assert_eq!(select_next(&list, None, NOW).map(|v| v.id.as_str()), Some("B"));
    assert_eq!(
        select_next(&list, Some("B"), NOW).map(|v| v.id.as_str()),
        Some("A")
    );
}

#[test]
fn select_next_keeps_list_order_on_ties() {
    let list = vec![
        video("first", "m-1", 0, NOW + 10),
        video("second", "m-2", 0, NOW + 10),
    ];
    assert_eq!(
        select_next(&list, None, NOW).map(|v| v.id.as_str()),
        Some("first")
    );
}

#[test]
fn select_next_returns_none_when_nothing_is_due() {
    let list = vec![video("a", "m-a", 1, NOW + 1), video("b", "m-b", 4, NOW + DAY_MS)];
    assert!(select_next(&list, None, NOW).is_none());
    assert!(!any_needs_review(&list, NOW));
    assert_eq!(due_count(&list, NOW), 0);

    let only = vec![video("a", "m-a", 0, NOW + DAY_MS)];
    assert!(select_next(&only, Some("a"), NOW).is_none());
    assert!(any_needs_review(&only, NOW));
}

#[test]
fn sorted_by_next_review_is_stable() {
    let list = vec![
        video("late", "m-1", 1, NOW + 50),
        video("tie-1", "m-2", 0, NOW + 10),
        video("tie-2", "m-3", 0, NOW + 10),
    ];
    assert_eq!(
        ids(&sorted_by_next_review(&list)),
        ["tie-1", "tie-2", "late"]
    );
}

#[test]
fn first_request_creates_player_and_queues_load() {
    let mut h = Harness::new(FakeFactory::default());
    h.controller.request_load("m-a", true);

    assert_eq!(h.controller.phase(), PhaseKind::Creating);
    assert_eq!(h.calls(), ["create:main:m-a"]);
    assert_eq!(
        h.controller.pending(),
        Some(&PendingLoad {
            media_id: "m-a".into(),
            autoplay: true
        })
    );
}

#[test]
fn only_latest_pending_load_is_serviced_on_ready() {
    let mut h = Harness::new(FakeFactory::default());
    let mut store = PlaylistStore::default();
    h.controller.request_load("m-a", true);
    h.controller.request_load("m-b", false);
    h.controller.request_load("m-c", true);
    assert_eq!(h.count("create:main:m-a"), 1);
    assert!(!h.calls().iter().any(|c| c.starts_with("load:")));

    h.sink().ready();
    h.controller.pump(&mut store, NOW);

    assert_eq!(h.calls(), ["create:main:m-a", "load:m-c", "play"]);
    assert_eq!(h.controller.phase(), PhaseKind::Loading);
    assert_eq!(h.controller.last_loaded_id(), Some("m-c"));
}

#[test]
fn repeated_load_of_same_id_is_idempotent() {
    let mut h = Harness::new(FakeFactory::reporting());
    let mut store = PlaylistStore::default();
    h.controller.request_load("m-a", false);
    h.sink().ready();
    h.sink().playing();
    h.controller.pump(&mut store, NOW);
    assert_eq!(h.controller.phase(), PhaseKind::Ready);

    h.controller.request_load("m-a", false);
    h.controller.request_load("m-a", true);
    assert_eq!(h.count("load:m-a"), 1);
    assert_eq!(h.count("play"), 1);
}

#[test]
fn ready_outside_creation_is_ignored() {
    let mut h = Harness::new(FakeFactory::default());
    let mut store = PlaylistStore::default();
    h.controller.request_load("m-a", false);
    h.sink().ready();
    h.sink().ready();
    h.controller.pump(&mut store, NOW);
    assert_eq!(h.count("load:m-a"), 1);
}

#[test]
fn ended_advances_to_next_due_video() {
    let first = video("first", "m-first", 0, NOW + DAY_MS);
    let second = video("second", "m-second", 0, NOW + DAY_MS + 60_000);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![first.clone(), second.clone()],
        ..PlaylistState::default()
    });
    let mut h = Harness::new(FakeFactory::reporting());

    h.controller.play_video(&first);
    h.sink().ready();
    h.sink().playing();
    h.sink().ended();
    let outcomes = h.controller.pump(&mut store, NOW);

    assert_eq!(
        outcomes,
        [PlaybackOutcome::Advanced {
            ended_id: "first".into(),
            next_id: "second".into()
        }]
    );
    let reviewed = store.find("first").expect("record");
    assert_eq!(reviewed.review_count, 1);
    assert_eq!(reviewed.next_review, compute_next_review(1, NOW));
    assert_eq!(h.count("load:m-second"), 1);
    assert_eq!(h.controller.playing_id(), Some("second"));
}

#[test]
fn ended_falls_back_to_last_loaded_id() {
    let only = video("only", "m-only", 0, NOW + DAY_MS);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![only.clone()],
        ..PlaylistState::default()
    });
    let mut h = Harness::new(FakeFactory::default());

    h.controller.play_video(&only);
    h.sink().ready();
    h.sink().ended();
    let outcomes = h.controller.pump(&mut store, NOW);

    assert_eq!(
        outcomes,
        [PlaybackOutcome::Finished {
            ended_id: "only".into()
        }]
    );
    assert_eq!(store.find("only").map(|v| v.review_count), Some(1));
    assert_eq!(h.controller.playing_id(), None);
}

#[test]
fn ended_for_unknown_video_changes_nothing_and_stops_waiting() {
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![video("a", "m-a", 0, NOW)],
        ..PlaylistState::default()
    });
    let before = store.state().clone();
    let mut h = Harness::new(FakeFactory::reporting());

    h.controller
        .play_video(&video("stranger", "m-stranger", 0, NOW));
    h.sink().ready();
    h.sink().ended();
    assert!(h.controller.pump(&mut store, NOW).is_empty());
    assert_eq!(store.state(), &before);
    assert_eq!(h.controller.playing_id(), None);
}

#[test]
fn ended_for_a_video_that_was_replaced_is_dropped() {
    let x = video("x", "m-x", 0, NOW - 30);
    let y = video("y", "m-y", 0, NOW - 20);
    let z = video("z", "m-z", 0, NOW - 10);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![x.clone(), y.clone(), z.clone()],
        ..PlaylistState::default()
    });
    let mut h = Harness::new(FakeFactory::reporting());

    h.controller.play_video(&x);
    h.sink().ready();
    h.sink().playing();
    h.controller.pump(&mut store, NOW);

    // x finishes, but the user starts y before the signal is handled.
    h.sink().ended_with("m-x");
    h.controller.play_video(&y);
    assert!(h.controller.pump(&mut store, NOW).is_empty());
    assert_eq!(store.find("x").map(|v| v.review_count), Some(0));
    assert_eq!(store.find("y").map(|v| v.review_count), Some(0));
    assert_eq!(h.controller.playing_id(), Some("y"));
    assert_eq!(h.count("load:m-x"), 1);

    h.sink().ended_with("m-y");
    let outcomes = h.controller.pump(&mut store, NOW);
    assert_eq!(
        outcomes,
        [PlaybackOutcome::Advanced {
            ended_id: "y".into(),
            next_id: "x".into()
        }]
    );
    assert_eq!(store.find("y").map(|v| v.review_count), Some(1));
}

#[test]
fn stamped_ended_preempts_the_matching_load() {
    let only = video("only", "m-only", 0, NOW);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![only.clone()],
        ..PlaylistState::default()
    });
    let mut h = Harness::new(FakeFactory::default());

    h.controller.play_video(&only);
    h.sink().ready();
    h.sink().ended_with("m-only");
    let outcomes = h.controller.pump(&mut store, NOW);
    assert_eq!(
        outcomes,
        [PlaybackOutcome::Finished {
            ended_id: "only".into()
        }]
    );
}

#[test]
fn replaying_after_an_outside_stop_restarts_the_video() {
    let a = video("a", "m-a", 0, NOW);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![a.clone()],
        ..PlaylistState::default()
    });
    let factory = FakeFactory::default();
    let calls = Rc::clone(&factory.calls);
    let sinks = Rc::clone(&factory.sinks);
    let controller = Rc::new(RefCell::new(PlayerController::new(factory)));
    let registry = PlaybackRegistry::new();
    let _registration = registry.attach(&controller);

    play_video(&controller, &a);
    sinks.borrow()[0].ready();
    controller.borrow_mut().pump(&mut store, NOW);
    assert_eq!(controller.borrow().phase(), PhaseKind::Loading);

    mark_reviewed(&registry, &controller, &mut store, "a", NOW);
    calls.borrow_mut().clear();
    play_video(&controller, &a);

    assert_eq!(*calls.borrow(), ["play"]);
    assert_eq!(controller.borrow().playing_id(), Some("a"));
}

#[test]
fn load_starts_at_the_saved_resume_position() {
    let mut store = PlaylistStore::default();
    let mut h = Harness::new(FakeFactory::default());
    h.controller
        .set_resume_positions([("m-a".to_string(), 45), ("m-b".to_string(), 0)]);
    assert_eq!(h.controller.resume_position("m-a"), 45);
    assert_eq!(h.controller.resume_position("m-b"), 0);

    h.controller.request_load("m-a", true);
    h.sink().ready();
    h.controller.pump(&mut store, NOW);
    assert_eq!(h.calls(), ["create:main:m-a", "load:m-a@45", "play"]);
}

#[test]
fn switching_videos_saves_where_the_old_one_stopped() {
    let a = video("a", "m-a", 0, NOW);
    let b = video("b", "m-b", 0, NOW);
    let mut store = PlaylistStore::default();
    let mut h = Harness::new(FakeFactory::default());

    h.controller.play_video(&a);
    h.sink().ready();
    h.sink().playing();
    h.controller.pump(&mut store, NOW);
    h.position.set(Some(30));
    h.controller.play_video(&b);

    assert_eq!(
        h.controller.take_progress(),
        [ProgressChange::Saved {
            media_id: "m-a".into(),
            seconds: 30
        }]
    );
    assert!(h.controller.take_progress().is_empty());
    assert_eq!(h.controller.resume_position("m-a"), 30);
    assert_eq!(h.count("load:m-b"), 1);
}

#[test]
fn ended_video_forgets_its_resume_position() {
    let a = video("a", "m-a", 0, NOW);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![a.clone()],
        ..PlaylistState::default()
    });
    let mut h = Harness::new(FakeFactory::default());
    h.controller.set_resume_positions([("m-a".to_string(), 45)]);

    h.controller.play_video(&a);
    h.sink().ready();
    h.sink().ended_with("m-a");
    h.controller.pump(&mut store, NOW);

    assert_eq!(
        h.controller.take_progress(),
        [ProgressChange::Cleared {
            media_id: "m-a".into()
        }]
    );
    assert_eq!(h.controller.resume_position("m-a"), 0);
}

#[test]
fn stop_and_dispose_record_the_position() {
    let a = video("a", "m-a", 0, NOW);
    let mut store = PlaylistStore::default();
    let mut h = Harness::new(FakeFactory::default());

    h.controller.play_video(&a);
    h.sink().ready();
    h.controller.pump(&mut store, NOW);
    h.position.set(Some(12));
    h.controller.stop();
    h.position.set(Some(20));
    h.controller.dispose();

    assert_eq!(
        h.controller.take_progress(),
        [
            ProgressChange::Saved {
                media_id: "m-a".into(),
                seconds: 12
            },
            ProgressChange::Saved {
                media_id: "m-a".into(),
                seconds: 20
            },
        ]
    );
}

#[test]
fn signals_from_disposed_player_are_discarded() {
    let a = video("a", "m-a", 0, NOW);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![a.clone()],
        ..PlaylistState::default()
    });
    let mut h = Harness::new(FakeFactory::reporting());
    h.controller.play_video(&a);
    let stale = h.sink();
    h.controller.dispose();
    assert_eq!(h.count("destroy"), 1);

    stale.ready();
    stale.ended();
    assert!(h.controller.pump(&mut store, NOW).is_empty());
    assert_eq!(store.find("a").map(|v| v.review_count), Some(0));
    assert_eq!(h.controller.phase(), PhaseKind::NoPlayer);
}

#[test]
fn dispose_destroys_a_created_player() {
    let mut h = Harness::new(FakeFactory::default());
    let mut store = PlaylistStore::default();
    h.controller.request_load("m-a", false);
    h.sink().ready();
    h.controller.pump(&mut store, NOW);
    h.controller.dispose();
    assert_eq!(h.count("destroy"), 1);
    assert!(h.controller.handle().is_none());
}

#[test]
fn failing_and_missing_capabilities_are_swallowed() {
    let mut h = Harness::new(FakeFactory {
        fail_play: true,
        ..FakeFactory::default()
    });
    let mut store = PlaylistStore::default();
    h.controller.request_load("m-a", true);
    h.sink().ready();
    h.controller.pump(&mut store, NOW);
    h.controller.pause();
    h.controller.resume();

    assert_eq!(h.count("play"), 2);
    assert_eq!(h.controller.phase(), PhaseKind::Loading);
}

#[test]
fn failed_creation_leaves_no_player() {
    let mut h = Harness::new(FakeFactory {
        fail_create: true,
        ..FakeFactory::default()
    });
    h.controller.request_load("m-a", true);
    assert_eq!(h.controller.phase(), PhaseKind::NoPlayer);
    assert!(h.sinks.borrow().is_empty());
}

#[test]
fn error_event_clears_playing_id() {
    let a = video("a", "m-a", 0, NOW);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![a.clone()],
        ..PlaylistState::default()
    });
    let mut h = Harness::new(FakeFactory::default());
    h.controller.play_video(&a);
    h.sink().ready();
    h.sink().error("decoder exploded");
    let outcomes = h.controller.pump(&mut store, NOW);
    assert_eq!(
        outcomes,
        [PlaybackOutcome::Failed {
            message: "decoder exploded".into()
        }]
    );
    assert_eq!(h.controller.playing_id(), None);
    assert_eq!(store.find("a").map(|v| v.review_count), Some(0));
}

#[test]
fn registry_stops_only_the_playing_video() {
    let a = video("a", "m-a", 0, NOW);
    let factory = FakeFactory::default();
    let calls = Rc::clone(&factory.calls);
    let controller = Rc::new(RefCell::new(PlayerController::new(factory)));
    let registry = PlaybackRegistry::new();
    let _registration = registry.attach(&controller);

    controller.borrow_mut().play_video(&a);
    assert!(!registry.stop_if_playing("b"));
    assert!(registry.stop_if_playing("a"));
    assert_eq!(calls.borrow().iter().filter(|c| *c == "stop").count(), 1);
}

#[test]
fn registry_is_inert_after_registration_drops() {
    let a = video("a", "m-a", 0, NOW);
    let controller = Rc::new(RefCell::new(PlayerController::new(FakeFactory::default())));
    let registry = PlaybackRegistry::new();
    let registration = registry.attach(&controller);
    controller.borrow_mut().play_video(&a);

    drop(registration);
    assert!(!registry.stop_if_playing("a"));
}

#[test]
fn registry_without_registration_never_stops() {
    assert!(!PlaybackRegistry::new().stop_if_playing("a"));
}

#[test]
fn tui_mark_reviewed_stops_playing_video_first() {
    let a = video("a", "m-a", 0, NOW);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![a.clone()],
        ..PlaylistState::default()
    });
    let factory = FakeFactory::default();
    let calls = Rc::clone(&factory.calls);
    let controller = Rc::new(RefCell::new(PlayerController::new(factory)));
    let registry = PlaybackRegistry::new();
    let _registration = registry.attach(&controller);

    let status = play_video(&controller, &a);
    assert!(status.starts_with("INFO: Playing"));
    let status = mark_reviewed(&registry, &controller, &mut store, "a", NOW);

    assert!(status.starts_with("INFO: Reviewed"));
    assert!(calls.borrow().contains(&"stop".to_string()));
    assert_eq!(controller.borrow().playing_id(), None);
    assert_eq!(store.find("a").map(|v| v.review_count), Some(1));
}

#[test]
fn tui_remove_is_undoable_and_stops_playback() {
    let a = video("a", "m-a", 0, NOW);
    let mut store = PlaylistStore::new(PlaylistState {
        list: vec![a.clone(), video("b", "m-b", 0, NOW)],
        ..PlaylistState::default()
    });
    let controller = Rc::new(RefCell::new(PlayerController::new(FakeFactory::default())));
    let registry = PlaybackRegistry::new();
    let _registration = registry.attach(&controller);

    play_video(&controller, &a);
    remove_video(&registry, &controller, &mut store, "a");
    assert_eq!(ids(store.list()), ["b"]);
    assert_eq!(controller.borrow().playing_id(), None);
    assert!(store.can_undo());
}

#[test]
fn tui_play_next_due_reports_when_caught_up() {
    let store = PlaylistStore::new(PlaylistState {
        list: vec![video("a", "m-a", 2, NOW + DAY_MS)],
        ..PlaylistState::default()
    });
    let controller = RefCell::new(PlayerController::new(FakeFactory::default()));
    let status = play_next_due(&controller, &store, NOW);
    assert!(status.contains("All caught up"));
    assert_eq!(controller.borrow().phase(), PhaseKind::NoPlayer);
}

#[test]
fn tui_play_reports_player_creation_failure() {
    let a = video("a", "m-a", 0, NOW);
    let controller = RefCell::new(PlayerController::new(FakeFactory {
        fail_create: true,
        ..FakeFactory::default()
    }));
    let status = play_video(&controller, &a);
    assert!(status.starts_with("ERROR:"));
    assert_eq!(controller.borrow().playing_id(), None);
}

#[test]
fn refresh_rows_keeps_selection_on_the_same_video() {
    let mut list = vec![video("a", "m-a", 0, NOW + 10), video("b", "m-b", 0, NOW + 20)];
    let mut rows = Vec::new();
    let mut table_state = TableState::default();
    refresh_rows(&list, &mut rows, &mut table_state, None);
    assert_eq!(table_state.selected(), Some(0));

    list[0].next_review = NOW + 30;
    refresh_rows(&list, &mut rows, &mut table_state, Some("a"));
    assert_eq!(ids(&rows), ["b", "a"]);
    assert_eq!(table_state.selected(), Some(1));

    refresh_rows(&[], &mut rows, &mut table_state, Some("a"));
    assert_eq!(table_state.selected(), None);
}

#[test]
fn key_command_maps_history_shortcuts() {
    let ctrl = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL);
    let plain = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE);
    assert_eq!(key_command(ctrl('z')), Some(TuiCommand::Undo));
    assert_eq!(key_command(ctrl('y')), Some(TuiCommand::Redo));
    assert_eq!(key_command(ctrl('c')), Some(TuiCommand::Quit));
    assert_eq!(key_command(plain('u')), Some(TuiCommand::Undo));
    assert_eq!(
        key_command(KeyEvent::new(KeyCode::Char('U'), KeyModifiers::SHIFT)),
        Some(TuiCommand::Redo)
    );
    assert_eq!(key_command(plain('y')), None);
}

#[test]
fn interval_gauge_tracks_ladder_position() {
    let (ratio, label) = interval_gauge(0);
    assert_eq!(ratio, 0.0);
    assert_eq!(label, "0/5 · next gap 1 day");

    let (ratio, label) = interval_gauge(9);
    assert_eq!(ratio, 1.0);
    assert_eq!(label, "5/5 · next gap 30 days");
}

#[test]
fn database_round_trips_state() {
    let mut db = Database::open_in_memory().expect("db");
    db.migrate().expect("migrate");
    let mut store = PlaylistStore::default();
    store.dispatch(Action::Add(video("a", "m-a", 0, NOW)));
    store.dispatch(Action::Add(video("b", "m-b", 1, NOW + 5)));
    store.dispatch(Action::Undo);
    db.save_state(store.state()).expect("save");

    let loaded = db.load_state().expect("load");
    assert!(loaded.warnings.is_empty());
    assert_eq!(&loaded.state, store.state());
}

#[test]
fn database_trims_persisted_history() {
    let mut db = Database::open_in_memory().expect("db");
    db.migrate().expect("migrate");
    let mut store = PlaylistStore::default();
    for i in 0..(PERSISTED_HISTORY_LIMIT + 5) {
        store.dispatch(Action::Add(video(&format!("v{i}"), &format!("m{i}"), 0, NOW)));
    }
    db.save_state(store.state()).expect("save");

    let loaded = db.load_state().expect("load").state;
    assert_eq!(loaded.past.len(), PERSISTED_HISTORY_LIMIT);
    assert_eq!(loaded.past.last(), store.state().past.last());
    assert_eq!(loaded.list, store.state().list);
}

#[test]
fn database_warns_and_defaults_on_malformed_values() {
    let db = Database::open_in_memory().expect("db");
    db.migrate().expect("migrate");
    db.write_raw("list", "{not json").expect("write");
    db.write_raw("past", "[]").expect("write");

    let loaded = db.load_state().expect("load");
    assert!(loaded.state.list.is_empty());
    assert_eq!(loaded.warnings.len(), 1);
    assert!(loaded.warnings[0].contains(&storage_key("list")));
}

#[test]
fn database_uses_camel_case_json() {
    let mut db = Database::open_in_memory().expect("db");
    db.migrate().expect("migrate");
    db.write_raw(
        "list",
        r#"[{"id":"a","externalMediaId":"m-a","title":"T","url":"u","createdAt":1,"reviewCount":2,"nextReview":3}]"#,
    )
    .expect("write");
    let loaded = db.load_state().expect("load").state;
    assert_eq!(loaded.list[0].external_media_id, "m-a");
    assert_eq!(loaded.list[0].review_count, 2);
    assert_eq!(loaded.list[0].next_review, 3);

    db.save_state(&loaded).expect("save");
    assert!(db.clear_state().expect("clear") >= 3);
    assert_eq!(db.load_state().expect("load").state, PlaylistState::default());
}

#[test]
fn watch_records_round_trip_and_list() {
    let db = Database::open_in_memory().expect("db");
    db.migrate().expect("migrate");
    assert_eq!(db.watch_record("abc").expect("read"), None);

    let saved = db.save_watch_record("abc", 45).expect("save");
    assert_eq!(saved.video_id, "abc");
    assert_eq!(db.watch_record("abc").expect("read"), Some(saved.clone()));

    db.save_watch_record("def", 7).expect("save");
    db.save_watch_record("abc", 50).expect("save");
    let listed: Vec<(String, u32)> = db
        .watch_records()
        .expect("list")
        .into_iter()
        .map(|record| (record.video_id, record.last_position_seconds))
        .collect();
    assert_eq!(listed, [("abc".to_string(), 50), ("def".to_string(), 7)]);

    assert!(db.remove_watch_record("abc").expect("remove"));
    assert!(!db.remove_watch_record("abc").expect("remove"));
    assert_eq!(db.watch_record("abc").expect("read"), None);
}

#[test]
fn watch_records_keep_the_stored_json_shape() {
    let db = Database::open_in_memory().expect("db");
    db.migrate().expect("migrate");
    db.write_raw(
        "watch:dQw4w9WgXcQ",
        r#"{"videoId":"dQw4w9WgXcQ","last_position_seconds":45,"last_watched_at":"2024-01-01T00:00:00Z"}"#,
    )
    .expect("write");
    db.write_raw("watch:broken", "{nope").expect("write");

    let record = db
        .watch_record("dQw4w9WgXcQ")
        .expect("read")
        .expect("record");
    assert_eq!(record.last_position_seconds, 45);
    assert_eq!(record.last_watched_at, "2024-01-01T00:00:00Z");
    assert_eq!(db.watch_record("broken").expect("read"), None);
    assert_eq!(db.watch_records().expect("list"), [record]);
}

#[test]
fn record_progress_applies_saves_and_clears() {
    let db = Database::open_in_memory().expect("db");
    db.migrate().expect("migrate");
    db.save_watch_record("old", 10).expect("save");
    db.record_progress(&[
        ProgressChange::Saved {
            media_id: "new".into(),
            seconds: 99,
        },
        ProgressChange::Cleared {
            media_id: "old".into(),
        },
    ])
    .expect("record");

    assert_eq!(db.watch_record("old").expect("read"), None);
    assert_eq!(
        db.watch_record("new")
            .expect("read")
            .map(|record| record.last_position_seconds),
        Some(99)
    );
}

#[test]
fn clear_state_also_drops_watch_records() {
    let mut db = Database::open_in_memory().expect("db");
    db.migrate().expect("migrate");
    db.save_state(&PlaylistState::default()).expect("save");
    db.save_watch_record("abc", 5).expect("save");
    assert_eq!(db.clear_state().expect("clear"), 4);
    assert!(db.watch_records().expect("list").is_empty());
}

#[test]
fn format_position_uses_clock_notation() {
    assert_eq!(format_position(0), "0:00");
    assert_eq!(format_position(75), "1:15");
    assert_eq!(format_position(3_725), "1:02:05");
}

#[test]
fn storage_key_is_namespaced_and_versioned() {
    assert_eq!(storage_key("list"), "ltl:v1:list");
}

#[test]
fn database_path_prefers_env_override() {
    let path = database_file_path_from_env(Some(OsString::from("/tmp/custom.db")))
        .expect("path should resolve");
    assert_eq!(path, PathBuf::from("/tmp/custom.db"));
}

#[test]
fn player_bin_prefers_env_override() {
    assert_eq!(
        resolve_player_bin_from_env(Some(OsString::from("/opt/mpv"))),
        PathBuf::from("/opt/mpv")
    );
    assert_eq!(
        resolve_player_bin_from_env(Some(OsString::new())),
        PathBuf::from(DEFAULT_PLAYER_BIN)
    );
    assert_eq!(
        resolve_player_bin_from_env(None),
        PathBuf::from(DEFAULT_PLAYER_BIN)
    );
}

#[test]
fn watch_url_targets_youtube() {
    assert_eq!(watch_url("abc"), "https://www.youtube.com/watch?v=abc");
}

#[test]
fn extract_video_id_understands_common_link_shapes() {
    let expected = Some("dQw4w9WgXcQ".to_string());
    for input in [
        "dQw4w9WgXcQ",
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "https://www.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ&t=42",
        "youtube.com/watch?v=dQw4w9WgXcQ#comments",
        "http://youtu.be/dQw4w9WgXcQ",
        "https://youtu.be/dQw4w9WgXcQ?si=abc",
        "https://m.youtube.com/shorts/dQw4w9WgXcQ",
        "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ",
        "  https://www.youtube.com/v/dQw4w9WgXcQ/  ",
    ] {
        assert_eq!(extract_video_id(input), expected, "input: {input}");
    }
}

#[test]
fn extract_video_id_rejects_non_video_links() {
    for input in [
        "",
        "https://www.youtube.com/",
        "https://www.youtube.com/channel/UC123",
        "https://www.youtube.com/watch?list=PL1",
        "https://vimeo.com/12345",
        "https://youtu.be/",
    ] {
        assert_eq!(extract_video_id(input), None, "input: {input}");
    }
}

#[test]
fn truncate_adds_ellipsis_only_when_needed() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("exactly-10", 10), "exactly-10");
    assert_eq!(truncate("this is too long", 10), "this is...");
}

#[cfg(unix)]
fn process_player(bin: &str) -> (ProcessPlayer, mpsc::Receiver<PlayerSignal>) {
    let (tx, rx) = mpsc::channel();
    let mut factory = ProcessPlayerFactory::new(PathBuf::from(bin), PlayerStdio::Null);
    let player = factory
        .create(CreateRequest {
            container: MAIN_CONTAINER,
            requested_id: "abc",
            events: EventSink::new(7, tx),
        })
        .expect("process player should be created");
    assert_eq!(next_event(&rx), PlayerEvent::Ready);
    (player, rx)
}

#[cfg(unix)]
fn next_event(rx: &mpsc::Receiver<PlayerSignal>) -> PlayerEvent {
    let signal = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("player should report an event");
    assert_eq!(signal.session, 7);
    signal.event
}

#[cfg(unix)]
fn assert_quiet(rx: &mpsc::Receiver<PlayerSignal>) {
    if let Ok(signal) = rx.recv_timeout(Duration::from_millis(300)) {
        panic!("unexpected player event: {:?}", signal.event);
    }
}

#[cfg(unix)]
#[test]
fn process_player_reports_ended_with_the_video_it_ran() {
    let (player, rx) = process_player("true");
    player.load_by_id("abc", 0).expect("load");
    assert_eq!(player.current_id().expect("current"), Some("abc".to_string()));
    player.play().expect("play");

    assert_eq!(next_event(&rx), PlayerEvent::Playing);
    assert_eq!(
        next_event(&rx),
        PlayerEvent::Ended {
            media_id: Some("abc".to_string())
        }
    );
    assert_eq!(player.position_seconds().expect("position"), 0);
}

#[cfg(unix)]
#[test]
fn process_player_turns_failed_exit_into_error() {
    let (player, rx) = process_player("false");
    player.load_by_id("abc", 0).expect("load");
    player.play().expect("play");

    assert_eq!(next_event(&rx), PlayerEvent::Playing);
    match next_event(&rx) {
        PlayerEvent::Error(message) => assert!(message.contains("exited"), "{message}"),
        other => panic!("expected an error, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn process_player_reports_launch_failure() {
    let (player, rx) = process_player("/nonexistent/looptube-player");
    player.load_by_id("abc", 0).expect("load");

    let err = player.play().expect_err("launch should fail");
    assert!(matches!(err, PlayerError::Launch { .. }), "{err}");
    match next_event(&rx) {
        PlayerEvent::Error(message) => assert!(message.contains("failed to launch")),
        other => panic!("expected an error, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn process_player_needs_a_loaded_video() {
    let (player, _rx) = process_player("true");
    assert!(matches!(player.play(), Err(PlayerError::NothingLoaded)));
}

#[cfg(unix)]
#[test]
fn process_player_starts_at_the_loaded_position_and_rewinds_when_done() {
    let (player, rx) = process_player("true");
    player.load_by_id("abc", 40).expect("load");
    assert_eq!(player.position_seconds().expect("position"), 40);
    player.play().expect("play");

    assert_eq!(next_event(&rx), PlayerEvent::Playing);
    assert!(matches!(next_event(&rx), PlayerEvent::Ended { .. }));
    assert_eq!(player.position_seconds().expect("position"), 0);
}

#[cfg(unix)]
#[test]
fn process_player_stop_and_reload_stay_silent() {
    let (player, rx) = process_player("yes");
    player.load_by_id("abc", 0).expect("load");
    player.play().expect("play");
    assert_eq!(next_event(&rx), PlayerEvent::Playing);

    player.load_by_id("def", 0).expect("reload");
    assert_quiet(&rx);
    assert_eq!(player.current_id().expect("current"), Some("def".to_string()));
    assert_eq!(player.position_seconds().expect("position"), 0);

    player.play().expect("play def");
    assert_eq!(next_event(&rx), PlayerEvent::Playing);
    player.pause().expect("pause");
    player.play().expect("resume");
    player.stop().expect("stop");
    assert_quiet(&rx);
    player.destroy().expect("destroy");
}
