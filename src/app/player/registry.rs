use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::{MAIN_CONTAINER, MediaPlayer, PlayerController, PlayerError, PlayerFactory};

pub(crate) type PlayerHandles = BTreeMap<String, Rc<dyn MediaPlayer>>;

type GetPlayers = Box<dyn Fn() -> PlayerHandles>;
type GetPlayingId = Box<dyn Fn() -> Option<String>>;

struct Accessors {
    get_players: GetPlayers,
    get_playing_id: GetPlayingId,
}

impl Accessors {
    fn inert() -> Self {
        Self {
            get_players: Box::new(PlayerHandles::new),
            get_playing_id: Box::new(|| None),
        }
    }
}

/// Lets code that does not own the player controller stop playback of a
/// given video. Accessors are registered by whoever owns the controller and
/// fall back to inert stand-ins when that owner goes away.
#[derive(Clone)]
pub(crate) struct PlaybackRegistry {
    accessors: Rc<RefCell<Accessors>>,
}

impl Default for PlaybackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            accessors: Rc::new(RefCell::new(Accessors::inert())),
        }
    }

    pub(crate) fn register_get_players<G>(&self, get_players: G)
    where
        G: Fn() -> PlayerHandles + 'static,
    {
        self.accessors.borrow_mut().get_players = Box::new(get_players);
    }

    pub(crate) fn register_get_playing_id<G>(&self, get_playing_id: G)
    where
        G: Fn() -> Option<String> + 'static,
    {
        self.accessors.borrow_mut().get_playing_id = Box::new(get_playing_id);
    }

    pub(crate) fn clear(&self) {
        *self.accessors.borrow_mut() = Accessors::inert();
    }

    /// Registers accessors backed by `controller` until the returned
    /// registration is dropped. The registry never keeps the controller alive.
    pub(crate) fn attach<F>(&self, controller: &Rc<RefCell<PlayerController<F>>>) -> Registration
    where
        F: PlayerFactory + 'static,
        F::Player: 'static,
    {
        let players = Rc::downgrade(controller);
        self.register_get_players(move || {
            let mut handles = PlayerHandles::new();
            let Some(controller) = players.upgrade() else {
                return handles;
            };
            if let Ok(controller) = controller.try_borrow()
                && let Some(handle) = controller.handle()
            {
                let handle: Rc<dyn MediaPlayer> = handle;
                handles.insert(MAIN_CONTAINER.to_string(), handle);
            }
            handles
        });

        let playing = Rc::downgrade(controller);
        self.register_get_playing_id(move || {
            let controller = playing.upgrade()?;
            let playing_id = controller
                .try_borrow()
                .ok()
                .and_then(|controller| controller.playing_id().map(str::to_string));
            playing_id
        });

        Registration {
            registry: self.clone(),
        }
    }

    /// Stops the main player when `id` is the video currently playing.
    /// Returns whether a stop was issued successfully.
    pub(crate) fn stop_if_playing(&self, id: &str) -> bool {
        let Ok(accessors) = self.accessors.try_borrow() else {
            return false;
        };
        if (accessors.get_playing_id)().as_deref() != Some(id) {
            return false;
        }
        let players = (accessors.get_players)();
        let Some(main) = players.get(MAIN_CONTAINER) else {
            debug!(video_id = id, "playing video has no player to stop");
            return false;
        };
        match main.stop() {
            Ok(()) => {
                info!(video_id = id, "stopped playback");
                true
            }
            Err(PlayerError::Unsupported(_)) => {
                debug!(video_id = id, "player cannot stop");
                false
            }
            Err(err) => {
                warn!(video_id = id, %err, "stop failed; ignoring");
                false
            }
        }
    }
}

/// Live registration; dropping it restores the inert accessors.
#[must_use = "dropping the registration unregisters the accessors immediately"]
pub(crate) struct Registration {
    registry: PlaybackRegistry,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.clear();
    }
}
