//! # Sources
//!
//! The two seams between the queue core and the outside world on the input
//! side:
//!
//! - [`Resolver`] turns what the user typed into track descriptors when the
//!   add-to-queue command runs.
//! - [`Fetcher`] turns one descriptor into a playable [`AudioResource`] when
//!   the advance loop reaches it.
//!
//! [`ytdlp::YtDlpClient`] implements both on top of the `yt-dlp` executable.

pub mod ytdlp;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::{
    audio::queue::TrackRequest,
    error::{FetchError, ResolutionError},
};

pub use ytdlp::YtDlpClient;

/// One entry produced by a [`Resolver`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub query: String,
    pub label: Option<String>,
}

impl ResolvedTrack {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            label: None,
        }
    }

    pub fn labelled(query: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            label: Some(label.into()),
        }
    }
}

/// Something the playback transport can open.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioResource {
    /// Audio downloaded to disk, owned by the fetcher until released.
    File(PathBuf),
    /// Remote stream read directly by the transport.
    Stream(String),
}

#[derive(Debug, Clone)]
pub struct FetchedTrack {
    pub resource: AudioResource,
    pub title: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves a search string or link into an ordered list of tracks.
    async fn resolve(&self, query: &str) -> Result<Vec<ResolvedTrack>, ResolutionError>;
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads a track. May take a long time; must fail with an error value.
    async fn fetch(&self, track: &TrackRequest) -> Result<FetchedTrack, FetchError>;

    /// Called once the resource is no longer needed.
    async fn release(&self, _resource: &AudioResource) {}
}
