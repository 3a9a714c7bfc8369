use serde::{Deserialize, Serialize};
use tracing::debug;

use super::schedule::{EpochMs, compute_next_review};

/// One watchlist entry.
///
/// `next_review` always holds the interval policy output for the current
/// `review_count`; only the `Reviewed` and `Reset` actions touch either field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Video {
    pub(crate) id: String,
    pub(crate) external_media_id: String,
    pub(crate) title: String,
    pub(crate) url: String,
    pub(crate) created_at: EpochMs,
    pub(crate) review_count: u32,
    pub(crate) next_review: EpochMs,
}

impl Video {
    pub(crate) fn new(
        id: String,
        external_media_id: String,
        title: String,
        url: String,
        now: EpochMs,
    ) -> Self {
        Self {
            id,
            external_media_id,
            title,
            url,
            created_at: now,
            review_count: 0,
            next_review: compute_next_review(0, now),
        }
    }
}

/// Live list plus undo (`past`, most recent last) and redo (`future`, most
/// recent first) snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PlaylistState {
    pub(crate) list: Vec<Video>,
    pub(crate) past: Vec<Vec<Video>>,
    pub(crate) future: Vec<Vec<Video>>,
}

/// Metadata refresh for a record matched by local id or external media id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct VideoPatch {
    pub(crate) id: Option<String>,
    pub(crate) external_media_id: Option<String>,
    pub(crate) title: Option<String>,
    pub(crate) url: Option<String>,
}

impl VideoPatch {
    fn matches(&self, video: &Video) -> bool {
        self.id.as_deref().is_some_and(|id| id == video.id)
            || self
                .external_media_id
                .as_deref()
                .is_some_and(|media_id| media_id == video.external_media_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Add(Video),
    Set(Vec<Video>),
    Update(VideoPatch),
    Remove { id: String },
    Reviewed { id: String, next_review: EpochMs },
    Reset { id: String, next_review: EpochMs },
    Undo,
    Redo,
}

impl Action {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Set(_) => "set",
            Self::Update(_) => "update",
            Self::Remove { .. } => "remove",
            Self::Reviewed { .. } => "reviewed",
            Self::Reset { .. } => "reset",
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

/// Applies `action` to `state` and returns the resulting state.
///
/// Mutating actions push the previous list onto `past` and clear `future`,
/// except when the list comes out unchanged (an unknown id, an empty patch):
/// then the input state is returned as is.
pub(crate) fn reduce(state: &PlaylistState, action: Action) -> PlaylistState {
    let next_list = match action {
        Action::Add(video) => {
            let mut list = Vec::with_capacity(state.list.len() + 1);
            list.push(video);
            list.extend(state.list.iter().cloned());
            list
        }
        Action::Set(list) => list,
        Action::Update(patch) => {
            let list = patch_list(&state.list, &patch);
            return PlaylistState {
                list,
                past: state.past.clone(),
                future: state.future.clone(),
            };
        }
        Action::Remove { id } => state
            .list
            .iter()
            .filter(|video| video.id != id)
            .cloned()
            .collect(),
        Action::Reviewed { id, next_review } => map_matching(&state.list, &id, |video| Video {
            review_count: video.review_count.saturating_add(1),
            next_review,
            ..video.clone()
        }),
        Action::Reset { id, next_review } => map_matching(&state.list, &id, |video| Video {
            review_count: 0,
            next_review,
            ..video.clone()
        }),
        Action::Undo => return undo(state),
        Action::Redo => return redo(state),
    };

    if next_list == state.list {
        return state.clone();
    }

    let mut past = state.past.clone();
    past.push(state.list.clone());
    PlaylistState {
        list: next_list,
        past,
        future: Vec::new(),
    }
}

fn map_matching<F>(list: &[Video], id: &str, update: F) -> Vec<Video>
where
    F: Fn(&Video) -> Video,
{
    list.iter()
        .map(|video| {
            if video.id == id {
                update(video)
            } else {
                video.clone()
            }
        })
        .collect()
}

fn patch_list(list: &[Video], patch: &VideoPatch) -> Vec<Video> {
    list.iter()
        .map(|video| {
            if !patch.matches(video) {
                return video.clone();
            }
            let mut patched = video.clone();
            if let Some(title) = &patch.title {
                patched.title = title.clone();
            }
            if let Some(url) = &patch.url {
                patched.url = url.clone();
            }
            patched
        })
        .collect()
}

fn undo(state: &PlaylistState) -> PlaylistState {
    let Some((previous, rest)) = state.past.split_last() else {
        return state.clone();
    };
    let mut future = Vec::with_capacity(state.future.len() + 1);
    future.push(state.list.clone());
    future.extend(state.future.iter().cloned());
    PlaylistState {
        list: previous.clone(),
        past: rest.to_vec(),
        future,
    }
}

fn redo(state: &PlaylistState) -> PlaylistState {
    let Some((next, rest)) = state.future.split_first() else {
        return state.clone();
    };
    let mut past = state.past.clone();
    past.push(state.list.clone());
    PlaylistState {
        list: next.clone(),
        past,
        future: rest.to_vec(),
    }
}

/// Owns the collection state and routes every change through [`reduce`].
#[derive(Debug, Default)]
pub(crate) struct PlaylistStore {
    state: PlaylistState,
}

impl PlaylistStore {
    pub(crate) fn new(initial: PlaylistState) -> Self {
        Self { state: initial }
    }

    pub(crate) fn state(&self) -> &PlaylistState {
        &self.state
    }

    pub(crate) fn list(&self) -> &[Video] {
        &self.state.list
    }

    pub(crate) fn can_undo(&self) -> bool {
        !self.state.past.is_empty()
    }

    pub(crate) fn can_redo(&self) -> bool {
        !self.state.future.is_empty()
    }

    /// Returns true when the live list changed.
    pub(crate) fn dispatch(&mut self, action: Action) -> bool {
        let name = action.name();
        let next = reduce(&self.state, action);
        let changed = next.list != self.state.list;
        self.state = next;
        debug!(
            action = name,
            changed,
            len = self.state.list.len(),
            past = self.state.past.len(),
            future = self.state.future.len(),
            "playlist action applied"
        );
        changed
    }

    pub(crate) fn mark_reviewed(&mut self, id: &str, now: EpochMs) -> bool {
        let Some(video) = self.state.list.iter().find(|video| video.id == id) else {
            return false;
        };
        let next_review = compute_next_review(video.review_count.saturating_add(1), now);
        self.dispatch(Action::Reviewed {
            id: id.to_string(),
            next_review,
        })
    }

    pub(crate) fn reset_schedule(&mut self, id: &str, now: EpochMs) -> bool {
        self.dispatch(Action::Reset {
            id: id.to_string(),
            next_review: compute_next_review(0, now),
        })
    }

    /// Resolves a record by local id first, then by external media id.
    pub(crate) fn find(&self, key: &str) -> Option<&Video> {
        self.state
            .list
            .iter()
            .find(|video| video.id == key)
            .or_else(|| {
                self.state
                    .list
                    .iter()
                    .find(|video| video.external_media_id == key)
            })
    }

    pub(crate) fn find_by_media_id(&self, media_id: &str) -> Option<&Video> {
        self.state
            .list
            .iter()
            .find(|video| video.external_media_id == media_id)
    }
}
