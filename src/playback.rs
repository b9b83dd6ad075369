//! Drives playback for a session: starting the current track and advancing
//! the queue when the player reports the end of a track.

use std::sync::Arc;

use rand::thread_rng;
use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::error::{MusicError, MusicResult};
use crate::idle::IdleReason;
use crate::models::Track;
use crate::session::{Session, SessionHandle, SessionRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Audio output of one guild's voice connection.
#[async_trait]
pub trait Player: Send + Sync {
    /// Starts `stream_url`, replacing whatever was playing. The receiver
    /// resolves once when the track ends or is stopped; it errors if the track
    /// is dropped without ending.
    async fn play(&self, stream_url: &str) -> MusicResult<oneshot::Receiver<()>>;
    async fn pause(&self) -> MusicResult<()>;
    async fn resume(&self) -> MusicResult<()>;
    async fn stop(&self) -> MusicResult<()>;
    async fn is_playing(&self) -> bool;
    async fn is_paused(&self) -> bool;
}

/// Messages sent outside of a command reply.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn now_playing(&self, channel: ChannelId, voice_channel: ChannelId, track: &Track);
    async fn queue_ended(&self, channel: ChannelId);
    async fn play_failed(&self, channel: ChannelId, track: &Track, error: &MusicError);
    async fn idle_disconnect(&self, channel: ChannelId, reason: IdleReason);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NowPlaying {
    pub track: Track,
    pub voice_channel: ChannelId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Enqueued {
    Started(NowPlaying),
    /// `position` counts tracks ahead of the new one, the current included.
    Queued { track: Track, position: usize, voice_channel: ChannelId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueView {
    /// Current track first, then everything after it.
    pub tracks: Vec<Track>,
    pub voice_channel: ChannelId,
}

pub struct PlaybackController {
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn Notifier>,
}

/// What became of a track handed to the player.
enum StartOutcome {
    Started(Track),
    /// A stop or teardown invalidated the start while the player opened it.
    Superseded,
    Failed(Track, MusicError),
}

/// How a completion left the session.
enum Advance {
    Started(NowPlaying),
    Ended,
    Stale,
}

/// Claims the session's current track for a start: bumps the generation and
/// marks the session playing so nothing else starts or tears it down.
fn prepare_start(session: &mut Session) -> MusicResult<(Track, Arc<dyn Player>, u64)> {
    let track = session.queue.current().cloned().ok_or(MusicError::QueueEmpty)?;
    let player = session.player.clone().ok_or(MusicError::NotConnected)?;
    let generation = session.supersede();
    session.state = PlaybackState::Playing;

    Ok((track, player, generation))
}

/// Empties and closes the session, returning the player to silence.
fn shut(session: &mut Session) -> Option<Arc<dyn Player>> {
    session.supersede();
    session.queue.clear();
    session.state = PlaybackState::Idle;
    session.closed = true;

    session.player.clone()
}

impl PlaybackController {
    pub fn new(registry: Arc<SessionRegistry>, notifier: Arc<dyn Notifier>) -> Arc<PlaybackController> {
        Arc::new(PlaybackController { registry, notifier })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Queues `track` in the session for `requester_channel` and starts it
    /// right away when nothing is active.
    ///
    /// The session is looked up here, after the track has been resolved, so
    /// a session torn down in the meantime is replaced instead of revived.
    pub async fn enqueue(
        self: &Arc<Self>,
        guild_id: GuildId,
        requester_channel: ChannelId,
        bot_channel: Option<ChannelId>,
        track: Track,
        player: Arc<dyn Player>,
        announce: ChannelId,
    ) -> MusicResult<Enqueued> {
        loop {
            let handle = self.registry.get_for_command(guild_id, requester_channel, bot_channel).await?;
            let starting = handle.lock_starts().await;
            let mut session = handle.lock().await;

            if session.closed {
                drop(session);
                drop(starting);
                self.registry.remove(&handle).await;
                continue;
            }

            session.attach(Arc::clone(&player));
            session.announce_channel = Some(announce);
            session.queue.enqueue(track.clone());

            if session.state != PlaybackState::Idle {
                let position = session.queue.upcoming().len().saturating_sub(1);
                info!("Queued {} at position {} in guild {}", track.title, position, guild_id);

                return Ok(Enqueued::Queued { track, position, voice_channel: session.channel_id() });
            }

            session.queue.set_last_as_current();
            let (track, player, generation) = prepare_start(&mut session)?;
            let voice_channel = session.channel_id();
            drop(session);

            return match self.start(&handle, track, player, generation).await {
                StartOutcome::Started(track) => Ok(Enqueued::Started(NowPlaying { track, voice_channel })),
                StartOutcome::Superseded => Err(MusicError::NothingPlaying),
                StartOutcome::Failed(_, why) => Err(why),
            };
        }
    }

    /// Hands a prepared track to the player and watches for its completion.
    /// Runs under the start lock but not the session lock; a start whose
    /// generation was superseded meanwhile is silenced. Announcing it is left
    /// to the caller.
    async fn start(
        self: &Arc<Self>,
        handle: &Arc<SessionHandle>,
        track: Track,
        player: Arc<dyn Player>,
        generation: u64,
    ) -> StartOutcome {
        let played = player.play(&track.stream_url).await;
        let mut session = handle.lock().await;

        if session.closed || session.generation != generation {
            drop(session);
            debug!("Start of {} in guild {} was superseded", track.title, handle.guild_id());

            if played.is_ok() {
                if let Err(why) = player.stop().await {
                    debug!("Stop of superseded track failed: {}", why);
                }
            }

            return StartOutcome::Superseded;
        }

        match played {
            Ok(finished) => {
                info!("Playing {} in guild {}", track.title, handle.guild_id());
                self.watch(handle, generation, finished);
                StartOutcome::Started(track)
            }
            Err(why) => {
                session.state = PlaybackState::Idle;
                StartOutcome::Failed(track, why)
            }
        }
    }

    fn watch(self: &Arc<Self>, handle: &Arc<SessionHandle>, generation: u64, finished: oneshot::Receiver<()>) {
        let controller = Arc::clone(self);
        let handle = Arc::clone(handle);
        let span = info_span!("track_end", guild = %handle.guild_id(), generation);

        tokio::spawn(
            async move {
                match finished.await {
                    Ok(()) => controller.on_track_finished(&handle, generation).await,
                    Err(_) => debug!("Track dropped without ending"),
                }
            }
            .instrument(span),
        );
    }

    /// Advances to the next playable track, or tears the session down when
    /// the queue is exhausted. Completions from a superseded play are ignored.
    pub async fn on_track_finished(self: &Arc<Self>, handle: &Arc<SessionHandle>, generation: u64) {
        let starting = handle.lock_starts().await;
        let mut expected = generation;
        let mut announce = None;
        let mut failures = Vec::new();

        let mut advance = loop {
            let mut session = handle.lock().await;

            if session.closed || session.generation != expected {
                debug!("Ignoring stale completion {} (now {})", expected, session.generation);
                break Advance::Stale;
            }

            announce = session.announce_channel;

            match session.queue.advance() {
                Ok(true) => {}
                Ok(false) => break Advance::Ended,
                Err(why) => {
                    error!("Could not advance queue in guild {}: {}", handle.guild_id(), why);
                    break Advance::Ended;
                }
            }

            let (track, player, next) = match prepare_start(&mut session) {
                Ok(prepared) => prepared,
                Err(why) => {
                    warn!("Could not start next track in guild {}: {}", handle.guild_id(), why);
                    break Advance::Ended;
                }
            };
            let voice_channel = session.channel_id();
            drop(session);

            match self.start(handle, track, player, next).await {
                StartOutcome::Started(track) => break Advance::Started(NowPlaying { track, voice_channel }),
                StartOutcome::Superseded => break Advance::Stale,
                StartOutcome::Failed(track, why) => {
                    warn!("Could not start next track in guild {}: {}", handle.guild_id(), why);
                    let retry = matches!(why, MusicError::Player(_));
                    failures.push((track, why));
                    expected = next;

                    if !retry {
                        break Advance::Ended;
                    }
                }
            }
        };

        if let Advance::Ended = advance {
            let mut session = handle.lock().await;

            if session.closed || session.generation != expected {
                advance = Advance::Stale;
            } else {
                session.state = PlaybackState::Idle;
                session.closed = true;
            }
        }
        drop(starting);

        if let Some(channel) = announce {
            for (track, why) in &failures {
                self.notifier.play_failed(channel, track, why).await;
            }
        }

        match advance {
            Advance::Started(now_playing) => {
                if let Some(channel) = announce {
                    self.notifier.now_playing(channel, now_playing.voice_channel, &now_playing.track).await;
                }
            }
            Advance::Ended => {
                info!("Queue ended in guild {}", handle.guild_id());
                self.registry.remove(handle).await;

                if let Some(channel) = announce {
                    self.notifier.queue_ended(channel).await;
                }
            }
            Advance::Stale => {}
        }
    }

    /// Stops the current track; its completion advances the queue.
    pub async fn skip(&self, handle: &Arc<SessionHandle>) -> MusicResult<()> {
        let session = handle.lock().await;

        if !session.queue.has_next() {
            return Err(MusicError::NoMoreSongs);
        }

        if session.state == PlaybackState::Idle {
            return Err(MusicError::NothingPlaying);
        }

        let player = session.player.clone().ok_or(MusicError::NotConnected)?;
        player.stop().await
    }

    /// Stops playback and ends the session. The voice connection stays.
    pub async fn stop(&self, handle: &Arc<SessionHandle>) -> MusicResult<()> {
        let mut session = handle.lock().await;

        if session.state == PlaybackState::Idle {
            return Err(MusicError::NothingPlaying);
        }

        let player = shut(&mut session);
        drop(session);

        let stopped = match player {
            Some(player) => player.stop().await,
            None => Ok(()),
        };

        self.registry.remove(handle).await;

        stopped
    }

    pub async fn pause(&self, handle: &Arc<SessionHandle>) -> MusicResult<()> {
        let mut session = handle.lock().await;
        let player = session.player.clone().ok_or(MusicError::NothingPlaying)?;

        if !player.is_playing().await {
            return Err(MusicError::NothingPlaying);
        }

        player.pause().await?;
        session.state = PlaybackState::Paused;

        Ok(())
    }

    pub async fn resume(&self, handle: &Arc<SessionHandle>) -> MusicResult<()> {
        let mut session = handle.lock().await;
        let player = session.player.clone().ok_or(MusicError::NotPaused)?;

        if !player.is_paused().await {
            return Err(MusicError::NotPaused);
        }

        player.resume().await?;
        session.state = PlaybackState::Playing;

        Ok(())
    }

    /// Silences the session and removes it from the registry.
    pub async fn leave(&self, handle: &Arc<SessionHandle>) {
        let mut session = handle.lock().await;
        let player = shut(&mut session);
        drop(session);

        self.silence(handle, player).await;
    }

    /// Leaves only if nothing is playing, paused or starting. The check and
    /// the teardown happen under one session guard. Returns whether it left.
    pub async fn leave_if_idle(&self, handle: &Arc<SessionHandle>) -> bool {
        let mut session = handle.lock().await;

        if session.state != PlaybackState::Idle {
            return false;
        }

        if let Some(player) = &session.player {
            if player.is_playing().await || player.is_paused().await {
                return false;
            }
        }

        let player = shut(&mut session);
        drop(session);

        self.silence(handle, player).await;

        true
    }

    async fn silence(&self, handle: &Arc<SessionHandle>, player: Option<Arc<dyn Player>>) {
        if let Some(player) = player {
            if let Err(why) = player.stop().await {
                debug!("Stop on leave failed: {}", why);
            }
        }

        self.registry.remove(handle).await;
    }

    /// Keeps only the current track.
    pub async fn clear_upcoming(&self, handle: &Arc<SessionHandle>) -> MusicResult<()> {
        let mut session = handle.lock().await;

        match session.queue.size() {
            0 => Err(MusicError::QueueEmpty),
            1 => Err(MusicError::NothingElseQueued),
            _ => {
                session.queue.clear_except_current();
                Ok(())
            }
        }
    }

    pub async fn shuffle(&self, handle: &Arc<SessionHandle>) -> MusicResult<()> {
        let mut session = handle.lock().await;

        if session.queue.is_empty() {
            return Err(MusicError::QueueEmpty);
        }

        if !session.queue.has_next() {
            return Err(MusicError::NothingElseQueued);
        }

        session.queue.shuffle_upcoming(&mut thread_rng());

        Ok(())
    }

    pub async fn now_playing(&self, handle: &Arc<SessionHandle>) -> MusicResult<NowPlaying> {
        let session = handle.lock().await;

        if session.queue.is_empty() {
            return Err(MusicError::QueueEmpty);
        }

        let track = session.queue.current().cloned().ok_or(MusicError::NothingPlaying)?;

        Ok(NowPlaying { track, voice_channel: session.channel_id() })
    }

    pub async fn queue(&self, handle: &Arc<SessionHandle>) -> MusicResult<QueueView> {
        let session = handle.lock().await;

        if session.queue.is_empty() {
            return Err(MusicError::QueueEmpty);
        }

        Ok(QueueView { tracks: session.queue.upcoming().to_vec(), voice_channel: session.channel_id() })
    }
}
