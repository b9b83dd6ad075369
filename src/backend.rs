//! Songbird and serenity implementations of the playback collaborators.

use std::sync::Arc;
use std::time::Duration;

use serenity::async_trait;
use serenity::cache::Cache;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::id::{ChannelId, GuildId};
use serenity::Result as SerenityResult;
use songbird::error::JoinError;
use songbird::input::ffmpeg_optioned;
use songbird::tracks::{PlayMode, TrackError, TrackHandle};
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

use crate::error::{MusicError, MusicResult};
use crate::idle::IdleReason;
use crate::models::Track;
use crate::playback::{Notifier, Player};
use crate::presentation::{self, EmbedView};
use crate::voice::VoiceConnection;

// The stream host drops idle connections; reconnect instead of ending the track.
const FFMPEG_BEFORE_OPTIONS: &[&str] = &["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"];
const FFMPEG_OPTIONS: &[&str] = &["-vn", "-f", "s16le", "-ac", "2", "-ar", "48000", "-acodec", "pcm_f32le", "-"];

/// Checks that a message successfully sent; if not, then logs why.
pub fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

pub async fn send_embed(http: &Arc<Http>, channel: ChannelId, view: &EmbedView) -> SerenityResult<Message> {
    channel.send_message(http, |m| m.embed(|e| view.apply(e))).await
}

struct TrackEndNotifier {
    sender: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("End notifier triggered");

        if let Some(sender) = self.sender.lock().await.take() {
            let _ = sender.send(());
        }

        None
    }
}

pub struct SongbirdPlayer {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    track: Mutex<Option<TrackHandle>>,
}

impl SongbirdPlayer {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId) -> SongbirdPlayer {
        SongbirdPlayer { manager, guild_id, track: Mutex::new(None) }
    }

    async fn current(&self) -> Option<TrackHandle> {
        self.track.lock().await.clone()
    }

    async fn mode(&self) -> Option<PlayMode> {
        let handle = self.current().await?;
        handle.get_info().await.ok().map(|state| state.playing)
    }
}

#[async_trait]
impl Player for SongbirdPlayer {
    async fn play(&self, stream_url: &str) -> MusicResult<oneshot::Receiver<()>> {
        let call = self.manager.get(self.guild_id).ok_or(MusicError::NotConnected)?;
        let source = ffmpeg_optioned(stream_url, FFMPEG_BEFORE_OPTIONS, FFMPEG_OPTIONS).await?;

        let (sender, receiver) = oneshot::channel();

        let track_handle = {
            let mut handler = call.lock().await;
            handler.stop(); // Just in case something was playing before
            handler.play_source(source)
        };

        track_handle.add_event(
            Event::Track(TrackEvent::End),
            TrackEndNotifier { sender: Mutex::new(Some(sender)) },
        )?;

        *self.track.lock().await = Some(track_handle);

        Ok(receiver)
    }

    async fn pause(&self) -> MusicResult<()> {
        let handle = self.current().await.ok_or(MusicError::NothingPlaying)?;
        Ok(handle.pause()?)
    }

    async fn resume(&self) -> MusicResult<()> {
        let handle = self.current().await.ok_or(MusicError::NotPaused)?;
        Ok(handle.play()?)
    }

    async fn stop(&self) -> MusicResult<()> {
        match self.track.lock().await.take() {
            Some(handle) => match handle.stop() {
                Ok(()) | Err(TrackError::Finished) => Ok(()),
                Err(why) => Err(why.into()),
            },
            None => Ok(()),
        }
    }

    async fn is_playing(&self) -> bool {
        matches!(self.mode().await, Some(PlayMode::Play))
    }

    async fn is_paused(&self) -> bool {
        matches!(self.mode().await, Some(PlayMode::Pause))
    }
}

pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    cache: Arc<Cache>,
    guild_id: GuildId,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>, cache: Arc<Cache>, guild_id: GuildId) -> SongbirdVoice {
        SongbirdVoice { manager, cache, guild_id }
    }
}

#[async_trait]
impl VoiceConnection for SongbirdVoice {
    async fn connect(&self, channel: ChannelId) -> MusicResult<()> {
        let (call, result) = self.manager.join(self.guild_id, channel).await;
        result?;

        let mut handler = call.lock().await;

        if handler.is_deaf() {
            debug!("Already deafened");
        } else if let Err(why) = handler.deafen(true).await {
            info!("Deafen failed due to {why:?}");
        }

        Ok(())
    }

    async fn move_to(&self, channel: ChannelId) -> MusicResult<()> {
        self.connect(channel).await
    }

    async fn disconnect(&self) -> MusicResult<()> {
        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(why) => Err(why.into()),
        }
    }

    async fn is_connected(&self) -> bool {
        self.channel_id().await.is_some()
    }

    async fn channel_id(&self) -> Option<ChannelId> {
        let call = self.manager.get(self.guild_id)?;
        let channel = call.lock().await.current_channel()?;

        Some(ChannelId(channel.0))
    }

    async fn member_count(&self) -> usize {
        let channel = match self.channel_id().await {
            Some(channel) => channel,
            None => return 0,
        };

        self.cache
            .guild(self.guild_id)
            .map(|guild| {
                guild
                    .voice_states
                    .values()
                    .filter(|state| state.channel_id == Some(channel))
                    .count()
            })
            .unwrap_or(0)
    }
}

pub struct DiscordNotifier {
    http: Arc<Http>,
    idle_timeout: Duration,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, idle_timeout: Duration) -> DiscordNotifier {
        DiscordNotifier { http, idle_timeout }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn now_playing(&self, channel: ChannelId, voice_channel: ChannelId, track: &Track) {
        let view = presentation::track_embed(track, voice_channel, presentation::NOW_PLAYING);
        check_msg(send_embed(&self.http, channel, &view).await);
    }

    async fn queue_ended(&self, channel: ChannelId) {
        check_msg(channel.say(&self.http, "*Queue has ended* ✅").await);
    }

    async fn play_failed(&self, channel: ChannelId, track: &Track, error: &MusicError) {
        check_msg(channel.say(&self.http, format!("Could not play {} due to error: {}", track.title, error)).await);
    }

    async fn idle_disconnect(&self, channel: ChannelId, reason: IdleReason) {
        let text = match reason {
            IdleReason::Alone => "👋 *No one is in the channel. Disconnecting...*".to_string(),
            IdleReason::Inactive => format!(
                "🔇 *No activity detected for {} minutes. Disconnecting...*",
                self.idle_timeout.as_secs() / 60
            ),
        };

        check_msg(channel.say(&self.http, text).await);
    }
}
