use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "looptube",
    version,
    about = "Spaced-repetition YouTube watchlist that loops through due videos"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a video from a YouTube link or bare video id
    Add {
        #[arg(value_name = "URL_OR_ID")]
        video: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// List videos ordered by next review
    List,
    /// Show the next video due for review
    Next,
    /// Mark a video reviewed and schedule its next review
    Reviewed { id: String },
    /// Put a video back on the first review interval
    Reset { id: String },
    /// Remove a video
    Remove { id: String },
    /// Change the title or url of a video
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Replace the playlist with the videos in a JSON file (undoable)
    Import { path: PathBuf },
    /// Print the playlist as JSON
    Export,
    Undo,
    Redo,
    /// Play due videos back to back until none are left
    Play { id: Option<String> },
    /// Delete all stored playlist data
    Clear {
        #[arg(long)]
        yes: bool,
    },
    Tui,
}
