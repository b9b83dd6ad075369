//! Background watcher that leaves voice when the bot is alone or has been
//! silent for too long.

use std::sync::Arc;
use std::time::Duration;

use serenity::model::id::{ChannelId, GuildId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use crate::playback::PlaybackController;
use crate::voice::{VoiceLink, VoiceLinks};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleReason {
    /// Nobody but the bot is left in the channel.
    Alone,
    /// Nothing has played for the whole inactivity window.
    Inactive,
}

pub struct IdleMonitor {
    guild_id: GuildId,
    link: VoiceLink,
    links: Arc<VoiceLinks>,
    controller: Arc<PlaybackController>,
    announce: ChannelId,
    poll: Duration,
    timeout: Duration,
    cancel: CancellationToken,
}

impl IdleMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guild_id: GuildId,
        link: &VoiceLink,
        links: Arc<VoiceLinks>,
        controller: Arc<PlaybackController>,
        announce: ChannelId,
        poll: Duration,
        timeout: Duration,
    ) -> IdleMonitor {
        IdleMonitor {
            guild_id,
            cancel: link.monitor_token(),
            link: link.clone(),
            links,
            controller,
            announce,
            poll,
            timeout,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let span = info_span!("idle_monitor", guild = %self.guild_id);
        tokio::spawn(self.run().instrument(span))
    }

    pub async fn run(self) {
        let mut idle_for = Duration::ZERO;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Voice link torn down elsewhere, monitor exiting");
                    return;
                }
                _ = tokio::time::sleep(self.poll) => {}
            }

            if !self.link.voice.is_connected().await {
                debug!("Voice connection is gone, monitor exiting");
                return;
            }

            if self.link.voice.member_count().await <= 1 {
                self.teardown(IdleReason::Alone).await;
                return;
            }

            if self.is_active().await {
                idle_for = Duration::ZERO;
                continue;
            }

            idle_for += self.poll;

            if idle_for >= self.timeout {
                if self.teardown(IdleReason::Inactive).await {
                    return;
                }
                idle_for = Duration::ZERO;
            }
        }
    }

    async fn is_active(&self) -> bool {
        self.link.player.is_playing().await || self.link.player.is_paused().await
    }

    /// Leaves voice and drops the guild's session. Returns false when a track
    /// started meanwhile and the teardown was called off.
    async fn teardown(&self, reason: IdleReason) -> bool {
        if let Some(handle) = self.controller.registry().get(self.guild_id).await {
            match reason {
                IdleReason::Alone => self.controller.leave(&handle).await,
                IdleReason::Inactive => {
                    if !self.controller.leave_if_idle(&handle).await {
                        debug!("Playback resumed before the idle teardown, keeping the session");
                        return false;
                    }
                }
            }
        }

        let link = match self.links.remove_watched(self.guild_id, &self.cancel).await {
            Some(link) => link,
            None => {
                debug!("Voice link already replaced, skipping disconnect");
                return true;
            }
        };

        info!("Leaving voice in guild {}: {:?}", self.guild_id, reason);
        self.controller.notifier().idle_disconnect(self.announce, reason).await;

        if let Err(why) = link.voice.disconnect().await {
            warn!("Idle disconnect failed in guild {}: {}", self.guild_id, why);
        }

        true
    }
}
