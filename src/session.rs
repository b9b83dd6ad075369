use std::collections::HashMap;
use std::sync::Arc;

use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{MusicError, MusicResult};
use crate::playback::{PlaybackState, Player};
use crate::queue::Queue;

/// The live binding of a guild to a voice channel and its queue.
pub struct Session {
    guild_id: GuildId,
    channel_id: ChannelId,
    pub queue: Queue,
    /// Text channel that receives now-playing and queue-ended notices.
    pub announce_channel: Option<ChannelId>,
    pub(crate) player: Option<Arc<dyn Player>>,
    pub(crate) state: PlaybackState,
    pub(crate) generation: u64,
    /// Set once the session has been torn down; a closed session is never
    /// played again.
    pub(crate) closed: bool,
}

impl Session {
    fn new(guild_id: GuildId, channel_id: ChannelId) -> Session {
        Session {
            guild_id,
            channel_id,
            queue: Queue::new(),
            announce_channel: None,
            player: None,
            state: PlaybackState::Idle,
            generation: 0,
            closed: false,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn set_channel(&mut self, channel_id: ChannelId) {
        self.channel_id = channel_id;
    }

    #[cfg(test)]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Binds the player of the guild's voice connection.
    pub fn attach(&mut self, player: Arc<dyn Player>) {
        self.player = Some(player);
    }

    /// Invalidates the completion of whatever is playing right now.
    pub(crate) fn supersede(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn resync(&mut self, bot_channel: Option<ChannelId>) {
        if let Some(actual) = bot_channel {
            if actual != self.channel_id {
                info!("Bot was moved from {} to {} in guild {}", self.channel_id, actual, self.guild_id);
                self.channel_id = actual;
            }
        }
    }
}

/// A registered session. Its lock is the single writer for the queue and
/// playback state of one guild. It is never held across player I/O.
pub struct SessionHandle {
    guild_id: GuildId,
    session: Mutex<Session>,
    /// Serializes track starts, which run without the session lock.
    starting: Mutex<()>,
}

impl SessionHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// Taken before the session lock by anything that hands a track to the
    /// player.
    pub(crate) async fn lock_starts(&self) -> MutexGuard<'_, ()> {
        self.starting.lock().await
    }
}

/// Process-wide table of sessions, one per guild.
///
/// The table lock only guards lookups and insertions; it is released before
/// any session lock is taken, so a busy session never blocks other guilds.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<GuildId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    /// Session for a command issued from `requester_channel`, created there
    /// when the guild has none. A session bound to another channel yields
    /// `Conflict` and is left untouched, apart from resyncing it to the bot's
    /// live channel.
    pub async fn get_for_command(
        &self,
        guild_id: GuildId,
        requester_channel: ChannelId,
        bot_channel: Option<ChannelId>,
    ) -> MusicResult<Arc<SessionHandle>> {
        let handle = {
            let mut sessions = self.sessions.lock().await;

            match sessions.get(&guild_id) {
                Some(handle) => Arc::clone(handle),
                None => return Ok(Self::create(&mut sessions, guild_id, requester_channel)),
            }
        };

        Self::admit(handle, requester_channel, bot_channel).await
    }

    /// Like `get_for_command`, but never creates a session.
    pub async fn find_for_command(
        &self,
        guild_id: GuildId,
        requester_channel: ChannelId,
        bot_channel: Option<ChannelId>,
    ) -> MusicResult<Option<Arc<SessionHandle>>> {
        match self.get(guild_id).await {
            Some(handle) => Self::admit(handle, requester_channel, bot_channel).await.map(Some),
            None => Ok(None),
        }
    }

    /// Session for the guild regardless of who is asking. Created in `channel`
    /// when missing.
    pub async fn get_for_guild(&self, guild_id: GuildId, channel: ChannelId) -> Arc<SessionHandle> {
        let handle = {
            let mut sessions = self.sessions.lock().await;

            match sessions.get(&guild_id) {
                Some(handle) => Arc::clone(handle),
                None => return Self::create(&mut sessions, guild_id, channel),
            }
        };

        handle.lock().await.resync(Some(channel));

        handle
    }

    /// Existing session for the guild, if any.
    pub async fn get(&self, guild_id: GuildId) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().await.get(&guild_id).cloned()
    }

    /// Removes `handle` if it is still the guild's registered session.
    /// Returns whether anything was removed.
    pub async fn remove(&self, handle: &Arc<SessionHandle>) -> bool {
        let mut sessions = self.sessions.lock().await;

        match sessions.get(&handle.guild_id) {
            Some(registered) if Arc::ptr_eq(registered, handle) => {
                sessions.remove(&handle.guild_id);
                info!("Session for guild {} removed", handle.guild_id);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn admit(
        handle: Arc<SessionHandle>,
        requester_channel: ChannelId,
        bot_channel: Option<ChannelId>,
    ) -> MusicResult<Arc<SessionHandle>> {
        let bound = {
            let mut session = handle.lock().await;
            session.resync(bot_channel);
            session.channel_id
        };

        if bound == requester_channel {
            Ok(handle)
        } else {
            debug!(
                "Rejecting command from channel {} in guild {}, session is bound to {}",
                requester_channel, handle.guild_id, bound
            );
            Err(MusicError::Conflict)
        }
    }

    fn create(
        sessions: &mut HashMap<GuildId, Arc<SessionHandle>>,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Arc<SessionHandle> {
        info!("Creating session for guild {} in channel {}", guild_id, channel_id);

        let handle = Arc::new(SessionHandle {
            guild_id,
            session: Mutex::new(Session::new(guild_id, channel_id)),
            starting: Mutex::new(()),
        });

        sessions.insert(guild_id, Arc::clone(&handle));

        handle
    }
}
