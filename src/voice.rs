use std::collections::HashMap;
use std::sync::Arc;

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::MusicResult;
use crate::playback::Player;

/// The bot's voice connection in one guild.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    async fn connect(&self, channel: ChannelId) -> MusicResult<()>;
    async fn move_to(&self, channel: ChannelId) -> MusicResult<()>;
    async fn disconnect(&self) -> MusicResult<()>;
    async fn is_connected(&self) -> bool;
    async fn channel_id(&self) -> Option<ChannelId>;
    /// Members in the bot's channel, the bot included.
    async fn member_count(&self) -> usize;
}

/// A live voice connection together with its player and the token that
/// stops its idle monitor.
#[derive(Clone)]
pub struct VoiceLink {
    pub voice: Arc<dyn VoiceConnection>,
    pub player: Arc<dyn Player>,
    monitor: CancellationToken,
}

impl VoiceLink {
    pub fn new(voice: Arc<dyn VoiceConnection>, player: Arc<dyn Player>) -> VoiceLink {
        VoiceLink { voice, player, monitor: CancellationToken::new() }
    }

    pub fn monitor_token(&self) -> CancellationToken {
        self.monitor.clone()
    }
}

#[derive(Default)]
pub struct VoiceLinks {
    links: Mutex<HashMap<GuildId, VoiceLink>>,
}

impl VoiceLinks {
    pub fn new() -> VoiceLinks {
        VoiceLinks::default()
    }

    pub async fn get(&self, guild_id: GuildId) -> Option<VoiceLink> {
        self.links.lock().await.get(&guild_id).cloned()
    }

    /// The guild's link, if its connection is still up.
    pub async fn connected(&self, guild_id: GuildId) -> Option<VoiceLink> {
        let link = self.get(guild_id).await?;

        if link.voice.is_connected().await {
            Some(link)
        } else {
            None
        }
    }

    /// Registers `link`, stopping the monitor of any link it replaces.
    pub async fn insert(&self, guild_id: GuildId, link: VoiceLink) {
        if let Some(previous) = self.links.lock().await.insert(guild_id, link) {
            previous.monitor.cancel();
        }
    }

    /// Forgets the guild's link and stops its monitor.
    pub async fn remove(&self, guild_id: GuildId) -> Option<VoiceLink> {
        let link = self.links.lock().await.remove(&guild_id)?;
        link.monitor.cancel();
        info!("Voice link for guild {} dropped", guild_id);

        Some(link)
    }

    /// Removes the link watched by `token`, unless it was already replaced
    /// or torn down.
    pub async fn remove_watched(&self, guild_id: GuildId, token: &CancellationToken) -> Option<VoiceLink> {
        let mut links = self.links.lock().await;

        if token.is_cancelled() {
            return None;
        }

        let link = links.remove(&guild_id)?;
        link.monitor.cancel();

        Some(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakePlayer, FakeVoice};

    const GUILD: GuildId = GuildId(1);

    fn link(connected: bool) -> VoiceLink {
        let voice = FakeVoice::connected_to(ChannelId(10), 2);
        if !connected {
            voice.drop_connection();
        }

        VoiceLink::new(Arc::new(voice), Arc::new(FakePlayer::default()))
    }

    #[tokio::test]
    async fn replacing_a_link_cancels_its_monitor() {
        let links = VoiceLinks::new();
        let first = link(true);
        let token = first.monitor_token();

        links.insert(GUILD, first).await;
        links.insert(GUILD, link(true)).await;

        assert!(token.is_cancelled());
        assert!(links.remove_watched(GUILD, &token).await.is_none());
        assert!(links.get(GUILD).await.is_some());
    }

    #[tokio::test]
    async fn remove_cancels_and_is_idempotent() {
        let links = VoiceLinks::new();
        let first = link(true);
        let token = first.monitor_token();
        links.insert(GUILD, first).await;

        assert!(links.remove(GUILD).await.is_some());
        assert!(token.is_cancelled());
        assert!(links.remove(GUILD).await.is_none());
    }

    #[tokio::test]
    async fn disconnected_links_are_not_reported_as_connected() {
        let links = VoiceLinks::new();
        links.insert(GUILD, link(false)).await;

        assert!(links.get(GUILD).await.is_some());
        assert!(links.connected(GUILD).await.is_none());
    }
}
