pub(crate) mod player;
pub(crate) mod playlist;
pub(crate) mod schedule;
pub(crate) mod selector;
mod tui;
pub(crate) mod youtube;

#[cfg(test)]
mod tests;

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::{Cli, Command};
use crate::db::Database;
use crate::paths::database_file_path;

use self::player::{
    PlaybackOutcome, PlayerController, PlayerStdio, ProcessPlayerFactory, resolve_player_bin,
    with_sigint_ignored,
};
use self::playlist::{Action, PlaylistStore, Video, VideoPatch};
use self::schedule::{format_due_display, format_position, new_video_id, now_ms};
use self::selector::{is_due, select_next, sorted_by_next_review};
use self::youtube::{extract_video_id, watch_url};

pub fn run(cli: Cli) -> Result<()> {
    let mut db = open_db()?;
    let mut store = load_store(&db)?;

    match cli.command {
        Some(Command::Add { video, title, url }) => {
            run_add(&mut db, &mut store, &video, title, url)?
        }
        Some(Command::List) => run_list(&store),
        Some(Command::Next) => run_next(&db, &store)?,
        Some(Command::Reviewed { id }) => run_reviewed(&mut db, &mut store, &id)?,
        Some(Command::Reset { id }) => run_reset(&mut db, &mut store, &id)?,
        Some(Command::Remove { id }) => run_remove(&mut db, &mut store, &id)?,
        Some(Command::Edit { id, title, url }) => run_edit(&mut db, &mut store, &id, title, url)?,
        Some(Command::Import { path }) => run_import(&mut db, &mut store, &path)?,
        Some(Command::Export) => run_export(&store)?,
        Some(Command::Undo) => run_history(&mut db, &mut store, Action::Undo)?,
        Some(Command::Redo) => run_history(&mut db, &mut store, Action::Redo)?,
        Some(Command::Play { id }) => run_play(&mut db, &mut store, id.as_deref())?,
        Some(Command::Clear { yes }) => run_clear(&db, yes)?,
        Some(Command::Tui) | None => tui::run_tui(&mut db, &mut store)?,
    }

    Ok(())
}

fn open_db() -> Result<Database> {
    let db_path = database_file_path()?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}

fn load_store(db: &Database) -> Result<PlaylistStore> {
    let loaded = db.load_state()?;
    for warning in &loaded.warnings {
        eprintln!("Warning: {warning}");
    }
    Ok(PlaylistStore::new(loaded.state))
}

fn run_add(
    db: &mut Database,
    store: &mut PlaylistStore,
    input: &str,
    title: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let Some(media_id) = extract_video_id(input) else {
        println!("Not a YouTube video link or id: {input}");
        return Ok(());
    };
    // The store accepts duplicates; keeping one entry per video is our job.
    if store.find_by_media_id(&media_id).is_some() {
        println!("Video already in playlist.");
        return Ok(());
    }

    let url = url.unwrap_or_else(|| watch_url(&media_id));
    let title = title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| url.clone());
    let now = now_ms();
    let video = Video::new(new_video_id(now), media_id, title, url, now);
    println!("Added: {} [{}]", video.title, video.id);
    store.dispatch(Action::Add(video));
    db.save_state(store.state())
}

fn run_list(store: &PlaylistStore) {
    let videos = sorted_by_next_review(store.list());
    if videos.is_empty() {
        println!("No videos yet. Run `looptube add <URL>` first.");
        return;
    }

    let now = now_ms();
    println!(
        "{:<16} {:<14} {:<40} {:<8} {:<30}",
        "ID", "MEDIA ID", "TITLE", "REVIEWS", "NEXT REVIEW"
    );
    for video in videos {
        let marker = if is_due(&video, now) { "*" } else { " " };
        println!(
            "{:<16} {:<14} {:<40} {:<8} {}{:<29}",
            truncate(&video.id, 16),
            truncate(&video.external_media_id, 14),
            truncate(&video.title, 40),
            video.review_count,
            marker,
            format_due_display(video.next_review, now)
        );
    }
}

fn run_next(db: &Database, store: &PlaylistStore) -> Result<()> {
    let Some(video) = select_next(store.list(), None, now_ms()) else {
        println!("Nothing due for review.");
        return Ok(());
    };
    println!("Next due video:");
    println!("  Title: {}", video.title);
    println!("  Id: {}", video.id);
    println!("  Reviews: {}", video.review_count);
    println!("  Url: {}", video.url);
    if let Some(record) = db.watch_record(&video.external_media_id)?
        && record.last_position_seconds > 0
    {
        println!(
            "  Resume at: {}",
            format_position(record.last_position_seconds)
        );
    }
    Ok(())
}

fn run_reviewed(db: &mut Database, store: &mut PlaylistStore, key: &str) -> Result<()> {
    let Some(video) = store.find(key).cloned() else {
        println!("No video matches `{key}`.");
        return Ok(());
    };
    let now = now_ms();
    store.mark_reviewed(&video.id, now);
    db.save_state(store.state())?;
    if let Some(updated) = store.find(&video.id) {
        println!(
            "Reviewed: {} (reviews: {}, next {})",
            updated.title,
            updated.review_count,
            format_due_display(updated.next_review, now)
        );
    }
    Ok(())
}

fn run_reset(db: &mut Database, store: &mut PlaylistStore, key: &str) -> Result<()> {
    let Some(video) = store.find(key).cloned() else {
        println!("No video matches `{key}`.");
        return Ok(());
    };
    let now = now_ms();
    if store.reset_schedule(&video.id, now) {
        db.save_state(store.state())?;
    }
    println!(
        "Schedule reset: {} (next {})",
        video.title,
        store
            .find(&video.id)
            .map(|updated| format_due_display(updated.next_review, now))
            .unwrap_or_default()
    );
    Ok(())
}

fn run_remove(db: &mut Database, store: &mut PlaylistStore, key: &str) -> Result<()> {
    let Some(video) = store.find(key).cloned() else {
        println!("No video matches `{key}`.");
        return Ok(());
    };
    store.dispatch(Action::Remove {
        id: video.id.clone(),
    });
    db.save_state(store.state())?;
    println!("Removed: {}", video.title);
    Ok(())
}

fn run_edit(
    db: &mut Database,
    store: &mut PlaylistStore,
    key: &str,
    title: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let Some(video) = store.find(key).cloned() else {
        println!("No video matches `{key}`.");
        return Ok(());
    };
    if title.is_none() && url.is_none() {
        println!("Nothing to change. Pass --title and/or --url.");
        return Ok(());
    }
    store.dispatch(Action::Update(VideoPatch {
        id: Some(video.id.clone()),
        title,
        url,
        ..VideoPatch::default()
    }));
    db.save_state(store.state())?;
    if let Some(updated) = store.find(&video.id) {
        println!("Updated: {} <{}>", updated.title, updated.url);
    }
    Ok(())
}

fn run_import(db: &mut Database, store: &mut PlaylistStore, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read playlist file {}", path.display()))?;
    let videos: Vec<Video> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse playlist file {}", path.display()))?;
    let count = videos.len();
    if store.dispatch(Action::Set(videos)) {
        db.save_state(store.state())?;
        println!("Imported {count} video(s). Run `looptube undo` to restore the previous list.");
    } else {
        println!("Playlist already matches {}.", path.display());
    }
    Ok(())
}

fn run_export(store: &PlaylistStore) -> Result<()> {
    let json =
        serde_json::to_string_pretty(store.list()).context("failed to encode playlist")?;
    println!("{json}");
    Ok(())
}

fn run_history(db: &mut Database, store: &mut PlaylistStore, action: Action) -> Result<()> {
    let (available, done, empty) = match action {
        Action::Redo => (store.can_redo(), "Redone.", "Nothing to redo."),
        _ => (store.can_undo(), "Undone.", "Nothing to undo."),
    };
    if !available {
        println!("{empty}");
        return Ok(());
    }
    store.dispatch(action);
    db.save_state(store.state())?;
    println!("{done} {} video(s) in playlist.", store.list().len());
    Ok(())
}

fn run_play(db: &mut Database, store: &mut PlaylistStore, key: Option<&str>) -> Result<()> {
    let now = now_ms();
    let first = match key {
        Some(key) => store.find(key).cloned(),
        None => select_next(store.list(), None, now).cloned(),
    };
    let Some(first) = first else {
        match key {
            Some(key) => println!("No video matches `{key}`."),
            None => println!("Nothing due for review."),
        }
        return Ok(());
    };

    let factory = ProcessPlayerFactory::new(resolve_player_bin(), PlayerStdio::Inherit);
    let mut controller = PlayerController::new(factory);
    controller.set_resume_positions(resume_positions(db)?);
    match controller.resume_position(&first.external_media_id) {
        0 => println!("Playing: {}", first.title),
        seconds => println!(
            "Playing: {} (resuming at {})",
            first.title,
            format_position(seconds)
        ),
    }
    controller.play_video(&first);

    let result = with_sigint_ignored(|| {
        while controller.playing_id().is_some() {
            let Some(signal) = controller.wait_signal(Duration::from_millis(500)) else {
                continue;
            };
            let outcome = controller.handle_signal(signal, store, now_ms());
            if outcome.is_some() {
                db.save_state(store.state())?;
            }
            db.record_progress(&controller.take_progress())?;
            match outcome {
                Some(PlaybackOutcome::Advanced { next_id, .. }) => {
                    if let Some(next) = store.find(&next_id) {
                        println!("Playing next: {}", next.title);
                    }
                }
                Some(PlaybackOutcome::Finished { .. }) => {
                    println!("All caught up. Nothing else is due.");
                }
                Some(PlaybackOutcome::Failed { message }) => {
                    println!("Playback stopped: {message}");
                }
                None => {}
            }
        }
        Ok(())
    });
    controller.dispose();
    let progress = db.record_progress(&controller.take_progress());
    result.and(progress)
}

pub(crate) fn resume_positions(db: &Database) -> Result<Vec<(String, u32)>> {
    Ok(db
        .watch_records()?
        .into_iter()
        .map(|record| (record.video_id, record.last_position_seconds))
        .collect())
}

fn run_clear(db: &Database, yes: bool) -> Result<()> {
    if !yes {
        println!("This deletes the whole playlist and its history. Re-run with --yes to confirm.");
        return Ok(());
    }
    let removed = db.clear_state()?;
    println!("Cleared {removed} stored value(s).");
    Ok(())
}

pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max.saturating_sub(3)).collect::<String>() + "..."
}
