//! Error types for the queue and playback core.
//!
//! Resolution, fetch and transport failures are per-track: the orchestrator
//! reports them through the notifier and moves on to the next track. Only
//! [`PlayerError::GuardViolation`] indicates a bug.

use std::time::Duration;

use serenity::model::id::GuildId;

/// Failure turning user input into track descriptors.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Empty query")]
    Empty,

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Links of this kind are not supported: {0}")]
    Unsupported(String),

    #[error("No results found for: {0}")]
    NoResults(String),

    #[error("Resolver backend error: {0}")]
    Backend(String),
}

/// Failure downloading or transcoding a track.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Download failed for '{query}': {reason}")]
    Download { query: String, reason: String },

    #[error("Download for '{query}' timed out after {}", human(.timeout))]
    Timeout { query: String, timeout: Duration },

    #[error("Downloader produced no file for '{0}'")]
    MissingOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure starting, controlling or streaming a playback.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected to a voice channel")]
    NotConnected,

    #[error("Could not start playback: {0}")]
    Start(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Playback control failed: {0}")]
    Control(String),

    #[error("Completion signal dropped before firing")]
    CompletionDropped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Index {index} out of range (queue has {len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("No previous song in history")]
    NoPrevious,
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Two advances observed concurrently for guild {session}")]
    GuardViolation { session: GuildId },
}

pub type Result<T> = std::result::Result<T, PlayerError>;

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}
