use std::time::Duration;

use serenity::model::id::UserId;

/// One queued song. Tracks are never mutated once resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    /// Direct audio stream handed to the player.
    pub stream_url: String,
    pub thumbnail_url: String,
    /// Page the track was found on, used for links.
    pub source_page_url: String,
    pub duration: Option<Duration>,
    pub requester: UserId,
}

/// A candidate returned by a bulk search, not yet resolved to a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub uploader: String,
    pub thumbnail_url: Option<String>,
}
