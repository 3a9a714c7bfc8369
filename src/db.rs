use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::player::ProgressChange;
use crate::app::playlist::{PlaylistState, Video};

pub const SCHEMA_VERSION: u32 = 1;
const KEY_PREFIX: &str = "ltl";

/// Snapshots kept per history stack when writing to disk.
pub const PERSISTED_HISTORY_LIMIT: usize = 50;

pub fn storage_key(name: &str) -> String {
    format!("{KEY_PREFIX}:v{SCHEMA_VERSION}:{name}")
}

fn watch_key(media_id: &str) -> String {
    storage_key(&format!("watch:{media_id}"))
}

/// Where a video was left off, keyed by its external media id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WatchRecord {
    #[serde(rename = "videoId")]
    pub(crate) video_id: String,
    #[serde(default)]
    pub(crate) last_position_seconds: u32,
    #[serde(default)]
    pub(crate) last_watched_at: String,
}

#[derive(Debug, Default)]
pub(crate) struct StateLoad {
    pub(crate) state: PlaylistState,
    pub(crate) warnings: Vec<String>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS app_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn load_state(&self) -> Result<StateLoad> {
        let mut warnings = Vec::new();
        let list: Vec<Video> = self.read_value("list", &mut warnings)?;
        let past: Vec<Vec<Video>> = self.read_value("past", &mut warnings)?;
        let future: Vec<Vec<Video>> = self.read_value("future", &mut warnings)?;
        debug!(
            len = list.len(),
            past = past.len(),
            future = future.len(),
            "loaded playlist state"
        );
        Ok(StateLoad {
            state: PlaylistState { list, past, future },
            warnings,
        })
    }

    pub(crate) fn save_state(&mut self, state: &PlaylistState) -> Result<()> {
        let past_start = state.past.len().saturating_sub(PERSISTED_HISTORY_LIMIT);
        let past = &state.past[past_start..];
        let future_end = state.future.len().min(PERSISTED_HISTORY_LIMIT);
        let future = &state.future[..future_end];

        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction()
            .context("failed to start state transaction")?;
        for (name, value) in [
            ("list", to_json(&state.list)?),
            ("past", to_json(past)?),
            ("future", to_json(future)?),
        ] {
            tx.execute(
                r#"
                INSERT INTO app_state (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![storage_key(name), value, now],
            )?;
        }
        tx.commit().context("failed to commit playlist state")?;
        debug!(len = state.list.len(), "saved playlist state");
        Ok(())
    }

    pub(crate) fn save_watch_record(&self, media_id: &str, seconds: u32) -> Result<WatchRecord> {
        let record = WatchRecord {
            video_id: media_id.to_string(),
            last_position_seconds: seconds,
            last_watched_at: Utc::now().to_rfc3339(),
        };
        self.conn.execute(
            r#"
            INSERT INTO app_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![watch_key(media_id), to_json(&record)?, record.last_watched_at],
        )?;
        debug!(media_id, seconds, "saved watch record");
        Ok(record)
    }

    /// Reads the watch record for `media_id`; an unreadable one counts as absent.
    pub(crate) fn watch_record(&self, media_id: &str) -> Result<Option<WatchRecord>> {
        let key = watch_key(media_id);
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|raw| parse_watch_record(&key, &raw)))
    }

    pub(crate) fn remove_watch_record(&self, media_id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM app_state WHERE key = ?1",
            params![watch_key(media_id)],
        )?;
        Ok(removed > 0)
    }

    pub(crate) fn watch_records(&self) -> Result<Vec<WatchRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM app_state WHERE key LIKE ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![format!("{}%", watch_key(""))], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (key, raw) = row?;
            records.extend(parse_watch_record(&key, &raw));
        }
        Ok(records)
    }

    /// Writes resume-position changes reported by the player controller.
    pub(crate) fn record_progress(&self, changes: &[ProgressChange]) -> Result<()> {
        for change in changes {
            match change {
                ProgressChange::Saved { media_id, seconds } => {
                    self.save_watch_record(media_id, *seconds)?;
                }
                ProgressChange::Cleared { media_id } => {
                    self.remove_watch_record(media_id)?;
                }
            }
        }
        Ok(())
    }

    /// Removes every key this application manages, across schema versions.
    pub fn clear_state(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM app_state WHERE key LIKE ?1",
            params![format!("{KEY_PREFIX}:v%")],
        )?;
        Ok(removed)
    }

    #[cfg(test)]
    pub fn write_raw(&self, name: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO app_state (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![storage_key(name), value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn read_value<T>(&self, name: &str, warnings: &mut Vec<String>) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let key = storage_key(name);
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(T::default());
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(err) => {
                warnings.push(format!("ignored malformed stored value for {key}: {err}"));
                Ok(T::default())
            }
        }
    }
}

fn parse_watch_record(key: &str, raw: &str) -> Option<WatchRecord> {
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(key, error = %err, "ignoring malformed watch record");
            None
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to encode stored value")
}
