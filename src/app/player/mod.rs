mod controller;
mod process;
mod registry;

use std::io;
use std::sync::mpsc;

pub(crate) use controller::*;
pub(crate) use process::*;
pub(crate) use registry::*;

#[derive(Debug, thiserror::Error)]
pub(crate) enum PlayerError {
    #[error("player does not support `{0}`")]
    Unsupported(&'static str),
    #[error("nothing is loaded")]
    NothingLoaded,
    #[error("failed to launch {bin}: {source}")]
    Launch {
        bin: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to signal player process: {0}")]
    Signal(#[source] io::Error),
    #[error("failed to create player: {0}")]
    Create(String),
}

/// Control surface of an external media player.
///
/// Every capability is optional: the defaults report `Unsupported`, which
/// the controller treats as a no-op. Methods take `&self` because handles
/// are shared with the playback registry.
pub(crate) trait MediaPlayer {
    /// Cues `media_id` to start `start_seconds` in.
    fn load_by_id(&self, media_id: &str, start_seconds: u32) -> Result<(), PlayerError> {
        let _ = (media_id, start_seconds);
        Err(PlayerError::Unsupported("load_by_id"))
    }

    fn play(&self) -> Result<(), PlayerError> {
        Err(PlayerError::Unsupported("play"))
    }

    fn pause(&self) -> Result<(), PlayerError> {
        Err(PlayerError::Unsupported("pause"))
    }

    fn stop(&self) -> Result<(), PlayerError> {
        Err(PlayerError::Unsupported("stop"))
    }

    fn current_id(&self) -> Result<Option<String>, PlayerError> {
        Err(PlayerError::Unsupported("current_id"))
    }

    /// Playback position of the loaded video, in whole seconds.
    fn position_seconds(&self) -> Result<u32, PlayerError> {
        Err(PlayerError::Unsupported("position_seconds"))
    }

    fn destroy(&self) -> Result<(), PlayerError> {
        Err(PlayerError::Unsupported("destroy"))
    }
}

pub(crate) struct CreateRequest<'a> {
    pub(crate) container: &'a str,
    pub(crate) requested_id: &'a str,
    pub(crate) events: EventSink,
}

pub(crate) trait PlayerFactory {
    type Player: MediaPlayer;

    fn create(&mut self, request: CreateRequest<'_>) -> Result<Self::Player, PlayerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlayerEvent {
    Ready,
    Playing,
    /// Playback reached the end. Providers that know which video they were
    /// playing say so; the controller drops the signal when it no longer
    /// matches the loaded video.
    Ended {
        media_id: Option<String>,
    },
    Error(String),
}

/// A player event stamped with the controller session that created the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlayerSignal {
    pub(crate) session: u64,
    pub(crate) event: PlayerEvent,
}

/// Handed to a player at creation so it can report events from any thread.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    session: u64,
    tx: mpsc::Sender<PlayerSignal>,
}

impl EventSink {
    pub(crate) fn new(session: u64, tx: mpsc::Sender<PlayerSignal>) -> Self {
        Self { session, tx }
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        // The controller may already be gone; nothing left to notify then.
        let _ = self.tx.send(PlayerSignal {
            session: self.session,
            event,
        });
    }

    pub(crate) fn ready(&self) {
        self.emit(PlayerEvent::Ready);
    }

    pub(crate) fn playing(&self) {
        self.emit(PlayerEvent::Playing);
    }

    #[cfg(test)]
    pub(crate) fn ended(&self) {
        self.emit(PlayerEvent::Ended { media_id: None });
    }

    pub(crate) fn ended_with(&self, media_id: &str) {
        self.emit(PlayerEvent::Ended {
            media_id: Some(media_id.to_string()),
        });
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.emit(PlayerEvent::Error(message.into()));
    }
}
