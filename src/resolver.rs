//! Turns a search query or URL into tracks by shelling out to `yt-dlp` and
//! reading its JSON output.

use std::time::Duration;

use serde::Deserialize;
use serenity::async_trait;
use serenity::model::id::UserId;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{MusicError, MusicResult};
use crate::models::{SearchHit, Track};

const UNKNOWN_TRACK_TITLE: &str = "UNKNOWN TRACK";
const UNKNOWN_UPLOADER: &str = "Unknown";

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Best match for `query`, which may be a direct URL.
    async fn resolve(&self, query: &str, requester: UserId) -> MusicResult<Track>;
    /// Up to `limit` ranked candidates for `query`.
    async fn search(&self, query: &str, limit: usize) -> MusicResult<Vec<SearchHit>>;
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Deserialize)]
struct VideoInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct FlatEntry {
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

pub struct YtDlp {
    program: String,
}

impl Default for YtDlp {
    fn default() -> YtDlp {
        YtDlp { program: "yt-dlp".to_string() }
    }
}

impl YtDlp {
    async fn run(&self, args: &[&str], query: &str) -> MusicResult<String> {
        debug!("Running {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|why| {
                error!("{} failed to start: {}", self.program, why);
                MusicError::Resolution(query.to_string())
            })?;

        if !output.status.success() {
            warn!("{} exited with {}: {}", self.program, output.status, String::from_utf8_lossy(&output.stderr));
        }

        String::from_utf8(output.stdout).map_err(|_| MusicError::Resolution(query.to_string()))
    }
}

#[async_trait]
impl Resolver for YtDlp {
    async fn resolve(&self, query: &str, requester: UserId) -> MusicResult<Track> {
        let query = query.trim();

        if query.is_empty() {
            return Err(MusicError::Resolution(String::new()));
        }

        let target = if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{query}")
        };

        info!("Resolving {target}");

        let output = self
            .run(&["-j", "-f", "bestaudio/best", "--no-playlist", "--no-warnings", &target], query)
            .await?;

        parse_video(&output, requester).ok_or_else(|| MusicError::Resolution(query.to_string()))
    }

    async fn search(&self, query: &str, limit: usize) -> MusicResult<Vec<SearchHit>> {
        let query = query.trim();
        let target = format!("ytsearch{limit}:{query}");

        info!("Searching {target}");

        let output = self
            .run(&["-j", "--flat-playlist", "--no-warnings", &target], query)
            .await?;

        let mut hits = parse_search(&output);
        hits.truncate(limit);

        if hits.is_empty() {
            Err(MusicError::Resolution(query.to_string()))
        } else {
            Ok(hits)
        }
    }
}

pub fn is_url(query: &str) -> bool {
    query.starts_with("http://") || query.starts_with("https://")
}

fn duration_from_secs(seconds: Option<f64>) -> Option<Duration> {
    seconds
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
}

/// Reads the first video printed by `yt-dlp -j`.
fn parse_video(output: &str, requester: UserId) -> Option<Track> {
    let line = output.lines().find(|line| !line.trim().is_empty())?;
    let info: VideoInfo = serde_json::from_str(line)
        .map_err(|why| warn!("Could not parse yt-dlp output: {why}"))
        .ok()?;

    let stream_url = info.url?;
    let thumbnail_url = info
        .thumbnail
        .or_else(|| info.thumbnails.into_iter().next().map(|t| t.url))
        .unwrap_or_default();

    Some(Track {
        title: info.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
        source_page_url: info.webpage_url.unwrap_or_else(|| stream_url.clone()),
        stream_url,
        thumbnail_url,
        duration: duration_from_secs(info.duration),
        requester,
    })
}

/// Reads one flat entry per line, skipping lines that do not parse.
fn parse_search(output: &str) -> Vec<SearchHit> {
    let lines: Vec<&str> = output.lines().filter(|line| !line.trim().is_empty()).collect();

    let hits = lines
        .iter()
        .filter_map(|line| {
            let entry: FlatEntry = serde_json::from_str(line).ok()?;

            Some(SearchHit {
                title: entry.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
                url: entry.url?,
                duration: duration_from_secs(entry.duration),
                uploader: entry
                    .uploader
                    .or(entry.channel)
                    .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
                thumbnail_url: entry.thumbnails.into_iter().next().map(|t| t.url),
            })
        })
        .collect::<Vec<SearchHit>>();

    if hits.len() < lines.len() {
        warn!("Some search results have been skipped due to errors during parsing");
    }

    hits
}
