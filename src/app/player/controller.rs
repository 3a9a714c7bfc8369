use std::collections::BTreeMap;
use std::mem;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::super::playlist::{PlaylistStore, Video};
use super::super::schedule::EpochMs;
use super::super::selector::select_next;
use super::{
    CreateRequest, EventSink, MediaPlayer, PlayerError, PlayerEvent, PlayerFactory, PlayerSignal,
};

pub(crate) const MAIN_CONTAINER: &str = "main";

/// Load requested before the player signalled readiness. Only the latest
/// request is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingLoad {
    pub(crate) media_id: String,
    pub(crate) autoplay: bool,
}

enum Phase<P> {
    NoPlayer,
    Creating {
        handle: Rc<P>,
        pending: PendingLoad,
    },
    Ready {
        handle: Rc<P>,
        last_loaded: Option<String>,
    },
    Loading {
        handle: Rc<P>,
        media_id: String,
    },
}

impl<P> Phase<P> {
    fn handle(&self) -> Option<&Rc<P>> {
        match self {
            Self::NoPlayer => None,
            Self::Creating { handle, .. }
            | Self::Ready { handle, .. }
            | Self::Loading { handle, .. } => Some(handle),
        }
    }

    fn kind(&self) -> PhaseKind {
        match self {
            Self::NoPlayer => PhaseKind::NoPlayer,
            Self::Creating { .. } => PhaseKind::Creating,
            Self::Ready { .. } => PhaseKind::Ready,
            Self::Loading { .. } => PhaseKind::Loading,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseKind {
    NoPlayer,
    Creating,
    Ready,
    Loading,
}

impl PhaseKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::NoPlayer => "no player",
            Self::Creating => "starting",
            Self::Ready => "ready",
            Self::Loading => "loading",
        }
    }
}

/// A change to the saved resume position of one video, for the caller to
/// write through to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProgressChange {
    Saved { media_id: String, seconds: u32 },
    Cleared { media_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaybackOutcome {
    Advanced { ended_id: String, next_id: String },
    Finished { ended_id: String },
    Failed { message: String },
}

/// Owns the single external player and drives it from discrete, ordered
/// inputs: load requests from the UI and signals from the player.
pub(crate) struct PlayerController<F: PlayerFactory> {
    factory: F,
    phase: Phase<F::Player>,
    playing_id: Option<String>,
    resume: BTreeMap<String, u32>,
    progress: Vec<ProgressChange>,
    session: u64,
    tx: mpsc::Sender<PlayerSignal>,
    rx: mpsc::Receiver<PlayerSignal>,
}

impl<F: PlayerFactory> PlayerController<F> {
    pub(crate) fn new(factory: F) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            factory,
            phase: Phase::NoPlayer,
            playing_id: None,
            resume: BTreeMap::new(),
            progress: Vec::new(),
            session: 0,
            tx,
            rx,
        }
    }

    pub(crate) fn phase(&self) -> PhaseKind {
        self.phase.kind()
    }

    pub(crate) fn playing_id(&self) -> Option<&str> {
        self.playing_id.as_deref()
    }

    pub(crate) fn set_playing_id(&mut self, id: Option<String>) {
        self.playing_id = id;
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> Option<&PendingLoad> {
        match &self.phase {
            Phase::Creating { pending, .. } => Some(pending),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn last_loaded_id(&self) -> Option<&str> {
        match &self.phase {
            Phase::Ready { last_loaded, .. } => last_loaded.as_deref(),
            Phase::Loading { media_id, .. } => Some(media_id),
            Phase::NoPlayer | Phase::Creating { .. } => None,
        }
    }

    pub(crate) fn handle(&self) -> Option<Rc<F::Player>> {
        self.phase.handle().cloned()
    }

    /// Seeds the resume positions, keyed by external media id.
    pub(crate) fn set_resume_positions<I>(&mut self, positions: I)
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        self.resume = positions
            .into_iter()
            .filter(|(_, seconds)| *seconds > 0)
            .collect();
    }

    pub(crate) fn resume_position(&self, media_id: &str) -> u32 {
        self.resume.get(media_id).copied().unwrap_or(0)
    }

    /// Drains resume-position changes recorded since the last call.
    pub(crate) fn take_progress(&mut self) -> Vec<ProgressChange> {
        mem::take(&mut self.progress)
    }

    pub(crate) fn play_video(&mut self, video: &Video) {
        self.capture_position();
        self.playing_id = Some(video.id.clone());
        self.request_load(&video.external_media_id, true);
    }

    pub(crate) fn request_load(&mut self, media_id: &str, autoplay: bool) {
        let start_seconds = self.resume_position(media_id);
        let next = match mem::replace(&mut self.phase, Phase::NoPlayer) {
            Phase::NoPlayer => self.create_player(media_id, autoplay),
            Phase::Creating { handle, pending } => {
                if pending.media_id != media_id {
                    debug!(
                        media_id,
                        superseded = %pending.media_id,
                        "player not ready; replacing queued load"
                    );
                }
                Phase::Creating {
                    handle,
                    pending: PendingLoad {
                        media_id: media_id.to_string(),
                        autoplay,
                    },
                }
            }
            Phase::Ready {
                handle,
                last_loaded,
            } => load_on(handle, last_loaded, media_id, start_seconds, autoplay),
            Phase::Loading {
                handle,
                media_id: loading,
            } if loading == media_id => {
                debug!(media_id, autoplay, "load already in flight");
                // A stop issued behind the controller's back leaves the load
                // unacknowledged; play() restarts it.
                if autoplay {
                    best_effort("play", handle.play());
                }
                Phase::Loading {
                    handle,
                    media_id: loading,
                }
            }
            Phase::Loading {
                handle,
                media_id: loading,
            } => load_on(handle, Some(loading), media_id, start_seconds, autoplay),
        };
        self.phase = next;
    }

    fn create_player(&mut self, media_id: &str, autoplay: bool) -> Phase<F::Player> {
        let request = CreateRequest {
            container: MAIN_CONTAINER,
            requested_id: media_id,
            events: EventSink::new(self.session, self.tx.clone()),
        };
        match self.factory.create(request) {
            Ok(player) => {
                info!(session = self.session, media_id, "player created; waiting for ready");
                Phase::Creating {
                    handle: Rc::new(player),
                    pending: PendingLoad {
                        media_id: media_id.to_string(),
                        autoplay,
                    },
                }
            }
            Err(err) => {
                warn!(%err, media_id, "player creation failed");
                Phase::NoPlayer
            }
        }
    }

    pub(crate) fn pause(&self) {
        if let Some(handle) = self.phase.handle() {
            best_effort("pause", handle.pause());
        }
    }

    pub(crate) fn resume(&self) {
        if let Some(handle) = self.phase.handle() {
            best_effort("play", handle.play());
        }
    }

    pub(crate) fn stop(&mut self) {
        self.capture_position();
        if let Some(handle) = self.phase.handle() {
            best_effort("stop", handle.stop());
        }
        self.settle_loading();
        self.playing_id = None;
    }

    pub(crate) fn poll_signal(&self) -> Option<PlayerSignal> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn wait_signal(&self, timeout: Duration) -> Option<PlayerSignal> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Handles every signal queued so far, in arrival order.
    pub(crate) fn pump(&mut self, store: &mut PlaylistStore, now: EpochMs) -> Vec<PlaybackOutcome> {
        let mut outcomes = Vec::new();
        while let Some(signal) = self.poll_signal() {
            outcomes.extend(self.handle_signal(signal, store, now));
        }
        outcomes
    }

    pub(crate) fn handle_signal(
        &mut self,
        signal: PlayerSignal,
        store: &mut PlaylistStore,
        now: EpochMs,
    ) -> Option<PlaybackOutcome> {
        if signal.session != self.session {
            debug!(
                signal_session = signal.session,
                session = self.session,
                event = ?signal.event,
                "discarding signal from a disposed player"
            );
            return None;
        }

        match signal.event {
            PlayerEvent::Ready => {
                self.on_ready();
                None
            }
            PlayerEvent::Playing => {
                self.settle_loading();
                None
            }
            PlayerEvent::Ended { media_id } => self.on_ended(media_id, store, now),
            PlayerEvent::Error(message) => {
                warn!(%message, "player reported an error");
                self.settle_loading();
                self.playing_id = None;
                Some(PlaybackOutcome::Failed { message })
            }
        }
    }

    fn on_ready(&mut self) {
        let next = match mem::replace(&mut self.phase, Phase::NoPlayer) {
            Phase::Creating { handle, pending } => {
                info!(
                    session = self.session,
                    media_id = %pending.media_id,
                    "player ready; servicing queued load"
                );
                let start_seconds = self.resume_position(&pending.media_id);
                load_on(
                    handle,
                    None,
                    &pending.media_id,
                    start_seconds,
                    pending.autoplay,
                )
            }
            other => {
                debug!(phase = ?other.kind(), "ready signal outside creation; ignoring");
                other
            }
        };
        self.phase = next;
    }

    fn settle_loading(&mut self) {
        let next = match mem::replace(&mut self.phase, Phase::NoPlayer) {
            Phase::Loading { handle, media_id } => Phase::Ready {
                handle,
                last_loaded: Some(media_id),
            },
            other => other,
        };
        self.phase = next;
    }

    fn loaded_media(&self) -> Option<&str> {
        match &self.phase {
            Phase::Ready { last_loaded, .. } => last_loaded.as_deref(),
            Phase::Loading { media_id, .. } => Some(media_id),
            Phase::NoPlayer | Phase::Creating { .. } => None,
        }
    }

    /// Remembers where the loaded video was left so a later load resumes there.
    fn capture_position(&mut self) {
        let (Some(handle), Some(media_id)) = (self.handle(), self.loaded_media()) else {
            return;
        };
        let media_id = media_id.to_string();
        let Some(seconds) = best_effort("position_seconds", handle.position_seconds()) else {
            return;
        };
        if seconds == 0 {
            self.forget_position(&media_id);
            return;
        }
        if self.resume.insert(media_id.clone(), seconds) != Some(seconds) {
            debug!(%media_id, seconds, "saved resume position");
            self.progress
                .push(ProgressChange::Saved { media_id, seconds });
        }
    }

    fn forget_position(&mut self, media_id: &str) {
        if self.resume.remove(media_id).is_some() {
            debug!(media_id, "cleared resume position");
            self.progress.push(ProgressChange::Cleared {
                media_id: media_id.to_string(),
            });
        }
    }

    fn on_ended(
        &mut self,
        ended_media: Option<String>,
        store: &mut PlaylistStore,
        now: EpochMs,
    ) -> Option<PlaybackOutcome> {
        if let (Some(ended), Some(loaded)) = (ended_media.as_deref(), self.loaded_media())
            && ended != loaded
        {
            debug!(ended, loaded, "ended signal for a video that is no longer loaded; ignoring");
            return None;
        }

        self.settle_loading();
        let Phase::Ready {
            handle,
            last_loaded,
        } = &self.phase
        else {
            debug!(phase = ?self.phase.kind(), "ended signal without a ready player; ignoring");
            return None;
        };

        let media_id = ended_media
            .or_else(|| best_effort("current_id", handle.current_id()).flatten())
            .or_else(|| last_loaded.clone());
        let Some(media_id) = media_id else {
            debug!("player cannot tell which video ended");
            self.playing_id = None;
            return None;
        };
        self.forget_position(&media_id);
        let Some(ended) = store.find_by_media_id(&media_id).cloned() else {
            debug!(%media_id, "ended video is not in the playlist");
            self.playing_id = None;
            return None;
        };

        // Pick the successor before the review lands so the ended video can
        // never be chosen again in the same turn.
        let next = select_next(store.list(), Some(&ended.id), now).cloned();
        store.mark_reviewed(&ended.id, now);

        match next {
            Some(next) => {
                info!(ended = %ended.id, next = %next.id, "advancing to next due video");
                self.playing_id = Some(next.id.clone());
                self.request_load(&next.external_media_id, true);
                Some(PlaybackOutcome::Advanced {
                    ended_id: ended.id,
                    next_id: next.id,
                })
            }
            None => {
                info!(ended = %ended.id, "no due videos left");
                self.playing_id = None;
                Some(PlaybackOutcome::Finished { ended_id: ended.id })
            }
        }
    }

    /// Releases the player and invalidates every signal it may still send.
    pub(crate) fn dispose(&mut self) {
        self.capture_position();
        if let Some(handle) = mem::replace(&mut self.phase, Phase::NoPlayer).handle() {
            best_effort("destroy", handle.destroy());
        }
        self.session = self.session.wrapping_add(1);
        self.playing_id = None;
    }
}

impl<F: PlayerFactory> Drop for PlayerController<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn load_on<P: MediaPlayer>(
    handle: Rc<P>,
    last_loaded: Option<String>,
    media_id: &str,
    start_seconds: u32,
    autoplay: bool,
) -> Phase<P> {
    let already_loaded = last_loaded.as_deref() == Some(media_id)
        || best_effort("current_id", handle.current_id())
            .flatten()
            .is_some_and(|current| current == media_id);
    if already_loaded {
        debug!(media_id, autoplay, "video already loaded; skipping load");
        if autoplay {
            best_effort("play", handle.play());
        }
        return Phase::Ready {
            handle,
            last_loaded: Some(media_id.to_string()),
        };
    }

    match handle.load_by_id(media_id, start_seconds) {
        Ok(()) => {
            debug!(media_id, start_seconds, autoplay, "load issued");
            if autoplay {
                best_effort("play", handle.play());
            }
            Phase::Loading {
                handle,
                media_id: media_id.to_string(),
            }
        }
        Err(err) => {
            best_effort::<()>("load_by_id", Err(err));
            Phase::Ready {
                handle,
                last_loaded,
            }
        }
    }
}

fn best_effort<T>(capability: &'static str, result: Result<T, PlayerError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(PlayerError::Unsupported(_)) => {
            debug!(capability, "player capability unavailable");
            None
        }
        Err(err) => {
            warn!(capability, %err, "player call failed; ignoring");
            None
        }
    }
}
