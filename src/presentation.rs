//! Embed and text rendering for command replies and notifications.

use std::time::Duration;

use serenity::builder::CreateEmbed;
use serenity::model::id::ChannelId;

use crate::models::{SearchHit, Track};
use crate::playback::QueueView;

pub const DEFAULT_COLOUR: u32 = 0x3498db;
pub const PAGE_SIZE: usize = 10;

pub const NOW_PLAYING: &str = "▶️ Now playing in";
pub const ADDED_TO_QUEUE: &str = "🎵 Added to queue in";
pub const CURRENTLY_PLAYING: &str = "🎧 Currently playing in";

pub const HELP: &str = r#"
**Commands:**
    **play [URL|Title]** - Plays (or adds to the queue) a track given a URL or a video title.
    **search [Title]** - Lists the top results; pick one with **pick [NUMBER]**.
    **skip** - Skips to the next track. The skipped track stays in the queue.
    **pause** - Pauses the current track.
    **resume** - Resumes the paused track.
    **stop** - Stops the current track and clears the queue.
    **queue [PAGE]** - Shows the current track and what is queued after it.
    **clearqueue** - Clears the queue, except the current track.
    **shuffle** - Reorders the upcoming tracks randomly.
    **playingnow** - Shows the current track.
    **here** - Moves the bot to your voice channel.
    **leave** - Disconnects the bot from voice.
    **ping** / **time** / **up** - Bot status.
    "#;

/// Plain description of an embed, applied to serenity's builder when sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbedView {
    pub title: String,
    pub url: Option<String>,
    pub description: String,
    pub thumbnail: Option<String>,
    /// Author line as (name, link).
    pub author: Option<(String, String)>,
    pub fields: Vec<(String, String)>,
    pub footer: Option<String>,
    pub colour: u32,
}

impl EmbedView {
    pub fn apply<'a>(&self, e: &'a mut CreateEmbed) -> &'a mut CreateEmbed {
        e.title(&self.title).description(&self.description).colour(self.colour);

        if let Some(url) = &self.url {
            e.url(url);
        }
        if let Some(thumbnail) = &self.thumbnail {
            e.thumbnail(thumbnail);
        }
        if let Some((name, link)) = &self.author {
            e.author(|a| a.name(name).url(link));
        }
        for (name, value) in &self.fields {
            e.field(name, value, true);
        }
        if let Some(footer) = &self.footer {
            e.footer(|f| f.text(footer));
        }

        e
    }
}

/// `HH:MM:SS`, or `Unknown` when the length is not known.
pub fn format_duration(duration: Option<Duration>) -> String {
    match duration.map(|d| d.as_secs()) {
        Some(seconds) if seconds > 0 => {
            let (hours, remainder) = (seconds / 3600, seconds % 3600);
            format!("{:02}:{:02}:{:02}", hours, remainder / 60, remainder % 60)
        }
        _ => "Unknown".to_string(),
    }
}

/// Uptime the way `timedelta` prints it: `2 days, 3:04:05`.
pub fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    let (days, remainder) = (seconds / 86_400, seconds % 86_400);
    let clock = format!("{}:{:02}:{:02}", remainder / 3600, remainder % 3600 / 60, remainder % 60);

    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        _ => format!("{days} days, {clock}"),
    }
}

pub fn track_embed(track: &Track, voice_channel: ChannelId, heading: &str) -> EmbedView {
    EmbedView {
        title: track.title.clone(),
        url: Some(track.source_page_url.clone()),
        description: format!("*{heading} <#{voice_channel}>*"),
        thumbnail: non_empty(&track.thumbnail_url),
        author: Some(("Music Stream Link".to_string(), track.stream_url.clone())),
        fields: vec![
            ("Duration".to_string(), format_duration(track.duration)),
            ("Added By".to_string(), format!("<@{}>", track.requester)),
        ],
        footer: None,
        colour: DEFAULT_COLOUR,
    }
}

pub fn queue_pages(view: &QueueView) -> Vec<EmbedView> {
    let entries: Vec<String> = view
        .tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let marker = if index == 0 { "▶️ " } else { "" };
            format!(
                "**{}.** {}{}\n{} | [Link]({}) | <@{}>",
                index + 1,
                marker,
                track.title,
                format_duration(track.duration),
                track.source_page_url,
                track.requester
            )
        })
        .collect();

    let thumbnail = view.tracks.first().and_then(|track| non_empty(&track.thumbnail_url));

    paginate(entries, "🎧 Current Queue", thumbnail, Some(view.voice_channel))
}

pub fn search_pages(hits: &[SearchHit]) -> Vec<EmbedView> {
    let entries: Vec<String> = hits
        .iter()
        .enumerate()
        .map(|(index, hit)| {
            format!(
                "**{}.** {}\n{} | [Link]({}) | {}",
                index + 1,
                hit.title,
                format_duration(hit.duration),
                hit.url,
                hit.uploader
            )
        })
        .collect();

    let thumbnail = hits.first().and_then(|hit| hit.thumbnail_url.clone());

    paginate(entries, "🔎 YouTube Search Results", thumbnail, None)
}

/// Picks a 1-based page, clamped to the available range.
pub fn page_index(requested: Option<usize>, pages: usize) -> usize {
    requested
        .unwrap_or(1)
        .clamp(1, pages.max(1))
        - 1
}

fn paginate(
    entries: Vec<String>,
    title: &str,
    thumbnail: Option<String>,
    voice_channel: Option<ChannelId>,
) -> Vec<EmbedView> {
    let total = (entries.len() + PAGE_SIZE - 1) / PAGE_SIZE;

    entries
        .chunks(PAGE_SIZE)
        .enumerate()
        .map(|(page, chunk)| {
            let mut description = chunk.join("\n\n");
            if let Some(channel) = voice_channel {
                description.push_str(&format!("\n\nChannel: <#{channel}>"));
            }

            EmbedView {
                title: title.to_string(),
                description,
                thumbnail: thumbnail.clone(),
                footer: Some(format!("Page {}/{}", page + 1, total)),
                colour: DEFAULT_COLOUR,
                ..EmbedView::default()
            }
        })
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
