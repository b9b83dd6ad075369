use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{Args, CommandError, CommandResult};
use serenity::model::channel::Message;
use serenity::model::channel::ReactionType::Unicode;
use serenity::model::guild::Guild;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::prelude::TypeMapKey;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{check_msg, send_embed, SongbirdPlayer, SongbirdVoice};
use crate::config::Config;
use crate::error::{MusicError, MusicResult};
use crate::idle::IdleMonitor;
use crate::models::SearchHit;
use crate::playback::{Enqueued, PlaybackController};
use crate::presentation;
use crate::resolver::Resolver;
use crate::session::{SessionHandle, SessionRegistry};
use crate::voice::{VoiceConnection, VoiceLink, VoiceLinks};
use crate::BotDataMap;

const LOADING_EMOJI: &str = "⏳";

/// Everything the music commands share, stored in the client's data map.
pub struct Music {
    config: Config,
    registry: Arc<SessionRegistry>,
    controller: Arc<PlaybackController>,
    links: Arc<VoiceLinks>,
    resolver: Arc<dyn Resolver>,
    /// Last search results per (guild, user), consumed by `pick`.
    picks: Mutex<HashMap<(GuildId, UserId), Vec<SearchHit>>>,
    started: Instant,
}

impl Music {
    pub fn new(config: Config, controller: Arc<PlaybackController>, resolver: Arc<dyn Resolver>) -> Music {
        Music {
            config,
            registry: Arc::clone(controller.registry()),
            controller,
            links: Arc::new(VoiceLinks::new()),
            resolver,
            picks: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Forgets the guild's session and voice link after the bot left voice.
    pub async fn forget_guild(&self, guild_id: GuildId) {
        if let Some(handle) = self.registry.get(guild_id).await {
            self.controller.leave(&handle).await;
        }

        self.links.remove(guild_id).await;
    }
}

pub struct MusicKey;

impl TypeMapKey for MusicKey {
    type Value = Arc<Music>;
}

/// Who asked, and where everyone is, at the moment a command arrived.
struct Invocation {
    guild_id: GuildId,
    requester: Option<ChannelId>,
    bot: Option<ChannelId>,
}

#[group]
#[commands(
    play, search, pick, skip, pause, resume, stop, leave, queue, clearqueue, shuffle, here, playingnow, ping,
    time, up, help
)]
pub struct General;

#[command]
#[only_in(guilds)]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let query = args.message().trim();

    if query.is_empty() {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "*❌ Please provide a search query or YouTube URL when using the `play` command. Usage: `play <query>`*")
                .await,
        );

        return react(ctx, msg, "❌").await;
    }

    play_with_reaction(ctx, msg, query).await
}

#[command]
#[only_in(guilds)]
async fn search(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let query = args.message().trim();

    if query.is_empty() {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "*❌ Please provide a search query when using the `search` command. Usage: `search <query>`*")
                .await,
        );

        return react(ctx, msg, "❌").await;
    }

    let (music, inv) = invocation(ctx, msg).await?;

    let hits = match music.resolver.search(query, music.config.search_limit).await {
        Ok(hits) => hits,
        Err(why) => return report(ctx, msg, Err(why)).await,
    };

    for page in presentation::search_pages(&hits) {
        check_msg(send_embed(&ctx.http, msg.channel_id, &page).await);
    }

    check_msg(
        msg.channel_id
            .say(&ctx.http, format!("*Pick a result with* `{}pick <number>`", music.config.prefix))
            .await,
    );

    music.picks.lock().await.insert((inv.guild_id, msg.author.id), hits);

    react(ctx, msg, "🔍").await
}

#[command]
#[only_in(guilds)]
async fn pick(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let selection = args.single::<usize>().ok();
    let hit = {
        let picks = music.picks.lock().await;
        selection
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| picks.get(&(inv.guild_id, msg.author.id))?.get(index).cloned())
    };

    match hit {
        Some(hit) => {
            check_msg(msg.channel_id.say(&ctx.http, format!("*🎶 Selected:* ***{}***", hit.title)).await);
            play_with_reaction(ctx, msg, &hit.url).await
        }
        None => report(ctx, msg, Err(MusicError::InvalidSelection)).await,
    }
}

#[command]
#[aliases(next)]
#[only_in(guilds)]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let result = match session_for_command(&music, &inv, MusicError::NothingPlaying).await {
        Ok(handle) => music.controller.skip(&handle).await.map(|_| "⏭️"),
        Err(why) => Err(why),
    };

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let result = match session_for_command(&music, &inv, MusicError::NothingPlaying).await {
        Ok(handle) => music.controller.pause(&handle).await.map(|_| "⏸️"),
        Err(why) => Err(why),
    };

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let result = match session_for_command(&music, &inv, MusicError::NotPaused).await {
        Ok(handle) => music.controller.resume(&handle).await.map(|_| "▶️"),
        Err(why) => Err(why),
    };

    report(ctx, msg, result).await
}

#[command]
#[aliases(reset)]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let result = match session_for_command(&music, &inv, MusicError::NothingPlaying).await {
        Ok(handle) => music.controller.stop(&handle).await.map(|_| "⏹️"),
        Err(why) => Err(why),
    };

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn leave(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let result = match find_session(&music, &inv).await {
        Ok(session) => {
            if let Some(handle) = session {
                music.controller.leave(&handle).await;
            }

            if let Some(link) = music.links.remove(inv.guild_id).await {
                if let Err(why) = link.voice.disconnect().await {
                    warn!("Disconnect failed in guild {}: {}", inv.guild_id, why);
                }
            }

            Ok("👋")
        }
        Err(why) => Err(why),
    };

    report(ctx, msg, result).await
}

#[command]
#[aliases(q)]
#[only_in(guilds)]
async fn queue(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let view = match music.registry.get(inv.guild_id).await {
        Some(handle) => music.controller.queue(&handle).await,
        None => Err(MusicError::QueueEmpty),
    };

    let view = match view {
        Ok(view) => view,
        Err(why) => return report(ctx, msg, Err(why)).await,
    };

    let pages = presentation::queue_pages(&view);
    let index = presentation::page_index(args.single::<usize>().ok(), pages.len());

    if let Some(page) = pages.get(index) {
        check_msg(send_embed(&ctx.http, msg.channel_id, page).await);
    }

    react(ctx, msg, "📜").await
}

#[command]
#[aliases(cq, cn, clearnext, clear_queue)]
#[only_in(guilds)]
async fn clearqueue(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let result = match session_for_command(&music, &inv, MusicError::QueueEmpty).await {
        Ok(handle) => music.controller.clear_upcoming(&handle).await,
        Err(why) => Err(why),
    };

    if result.is_ok() {
        check_msg(msg.channel_id.say(&ctx.http, "*The queue has been cleared.*").await);
    }

    report(ctx, msg, result.map(|_| "🧹")).await
}

#[command]
#[only_in(guilds)]
async fn shuffle(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let result = match session_for_command(&music, &inv, MusicError::QueueEmpty).await {
        Ok(handle) => music.controller.shuffle(&handle).await.map(|_| "🔀"),
        Err(why) => Err(why),
    };

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn here(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let result = move_here(ctx, msg, &music, &inv).await;

    report(ctx, msg, result.map(|_| "🔄")).await
}

#[command]
#[aliases(np, now, nowplaying, playing)]
#[only_in(guilds)]
async fn playingnow(ctx: &Context, msg: &Message) -> CommandResult {
    let (music, inv) = invocation(ctx, msg).await?;

    let now_playing = match music.registry.get(inv.guild_id).await {
        Some(handle) => music.controller.now_playing(&handle).await,
        None => Err(MusicError::QueueEmpty),
    };

    match now_playing {
        Ok(now) => {
            let view = presentation::track_embed(&now.track, now.voice_channel, presentation::CURRENTLY_PLAYING);
            check_msg(send_embed(&ctx.http, msg.channel_id, &view).await);

            react(ctx, msg, "🎶").await
        }
        Err(why) => report(ctx, msg, Err(why)).await,
    }
}

#[command]
async fn ping(ctx: &Context, msg: &Message) -> CommandResult {
    info!("Pong");
    check_msg(msg.channel_id.say(&ctx.http, "Pong").await);

    Ok(())
}

#[command]
async fn time(ctx: &Context, msg: &Message) -> CommandResult {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
    check_msg(msg.channel_id.say(&ctx.http, format!("The current time is {now}")).await);

    Ok(())
}

#[command]
async fn up(ctx: &Context, msg: &Message) -> CommandResult {
    let music = music(ctx).await?;

    let host = tokio::fs::read_to_string("/etc/hostname")
        .await
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|_| "Unknown".to_string());
    let uptime = presentation::format_uptime(music.started.elapsed());

    check_msg(
        msg.channel_id
            .say(
                &ctx.http,
                format!(
                    "Discord Music Bot [`{host}`] | Version [`v{}`] | Uptime: [`{uptime}`]",
                    env!("CARGO_PKG_VERSION")
                ),
            )
            .await,
    );

    Ok(())
}

#[command]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    check_msg(msg.channel_id.say(&ctx.http, presentation::HELP).await);

    Ok(())
}

async fn play_with_reaction(ctx: &Context, msg: &Message, query: &str) -> CommandResult {
    let bot_id: Option<u64>;

    {
        let data = ctx.data.read().await;
        bot_id = data.get::<BotDataMap>().map(|data| data.id);
    }

    let (music, inv) = invocation(ctx, msg).await?;
    let loading_emoji = Unicode(LOADING_EMOJI.to_string());

    msg.react(&ctx.http, loading_emoji.clone()).await?;

    let play_result = play_query(ctx, msg, &music, &inv, query).await;

    if let Some(bot_id) = bot_id {
        if let Err(why) = msg
            .channel_id
            .delete_reaction(&ctx.http, msg.id, Some(UserId(bot_id)), loading_emoji)
            .await
        {
            info!("Error removing reaction: {why:?}");
        }
    }

    report(ctx, msg, play_result).await
}

async fn play_query(
    ctx: &Context,
    msg: &Message,
    music: &Arc<Music>,
    inv: &Invocation,
    query: &str,
) -> MusicResult<&'static str> {
    let requester = inv.requester.ok_or(MusicError::UserNotInVoice)?;

    // Refuse early instead of after a slow lookup; enqueue checks again.
    music.registry.find_for_command(inv.guild_id, requester, inv.bot).await?;

    info!("User input is {query}");

    let track = music.resolver.resolve(query, msg.author.id).await?;
    let link = ensure_link(ctx, music, inv.guild_id, requester, msg.channel_id).await?;
    let bot_channel = link.voice.channel_id().await;

    let enqueued = music
        .controller
        .enqueue(inv.guild_id, requester, bot_channel, track, Arc::clone(&link.player), msg.channel_id)
        .await?;

    let (view, emoji) = match enqueued {
        Enqueued::Started(now) => (
            presentation::track_embed(&now.track, now.voice_channel, presentation::NOW_PLAYING),
            "▶️",
        ),
        Enqueued::Queued { track, voice_channel, .. } => {
            (presentation::track_embed(&track, voice_channel, presentation::ADDED_TO_QUEUE), "✅")
        }
    };

    check_msg(send_embed(&ctx.http, msg.channel_id, &view).await);

    Ok(emoji)
}

async fn move_here(ctx: &Context, msg: &Message, music: &Arc<Music>, inv: &Invocation) -> MusicResult<()> {
    let requester = inv.requester.ok_or(MusicError::UserNotInVoice)?;

    let notice = match music.links.connected(inv.guild_id).await {
        Some(link) => {
            if inv.bot == Some(requester) {
                return Err(MusicError::AlreadyInChannel(requester));
            }

            link.voice.move_to(requester).await?;
            format!("*Moved to:* <#{requester}>")
        }
        None => {
            ensure_link(ctx, music, inv.guild_id, requester, msg.channel_id).await?;
            format!("*Joined:* <#{requester}>")
        }
    };

    let handle = music.registry.get_for_guild(inv.guild_id, requester).await;
    handle.lock().await.set_channel(requester);

    check_msg(msg.channel_id.say(&ctx.http, notice).await);

    Ok(())
}

/// The guild's live voice link, joining `channel` and starting its idle
/// monitor when there is none.
async fn ensure_link(
    ctx: &Context,
    music: &Arc<Music>,
    guild_id: GuildId,
    channel: ChannelId,
    announce: ChannelId,
) -> MusicResult<VoiceLink> {
    if let Some(link) = music.links.connected(guild_id).await {
        return Ok(link);
    }

    let manager = songbird::get(ctx).await.ok_or(MusicError::NotConnected)?;

    let voice = Arc::new(SongbirdVoice::new(Arc::clone(&manager), Arc::clone(&ctx.cache), guild_id));
    voice.connect(channel).await?;

    let link = VoiceLink::new(voice, Arc::new(SongbirdPlayer::new(manager, guild_id)));
    music.links.insert(guild_id, link.clone()).await;

    IdleMonitor::new(
        guild_id,
        &link,
        Arc::clone(&music.links),
        Arc::clone(&music.controller),
        announce,
        music.config.idle_poll,
        music.config.idle_timeout,
    )
    .spawn();

    info!("Joined channel {} in guild {}", channel, guild_id);

    Ok(link)
}

/// Existing session for a command that needs both the requester and the bot
/// in voice. Never creates one.
async fn find_session(music: &Music, inv: &Invocation) -> MusicResult<Option<Arc<SessionHandle>>> {
    let requester = inv.requester.ok_or(MusicError::UserNotInVoice)?;
    let bot = inv.bot.ok_or(MusicError::NotConnected)?;

    music.registry.find_for_command(inv.guild_id, requester, Some(bot)).await
}

/// Like `find_session`, answering `missing` when the guild has no session.
async fn session_for_command(
    music: &Music,
    inv: &Invocation,
    missing: MusicError,
) -> MusicResult<Arc<SessionHandle>> {
    find_session(music, inv).await?.ok_or(missing)
}

async fn invocation(ctx: &Context, msg: &Message) -> CommandResult<(Arc<Music>, Invocation)> {
    let music = music(ctx).await?;
    let guild = get_guild(ctx, msg)?;

    let requester = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id);

    let bot = match music.links.connected(guild.id).await {
        Some(link) => link.voice.channel_id().await,
        None => None,
    };

    Ok((music, Invocation { guild_id: guild.id, requester, bot }))
}

async fn music(ctx: &Context) -> CommandResult<Arc<Music>> {
    let data = ctx.data.read().await;

    data.get::<MusicKey>()
        .cloned()
        .ok_or_else(|| CommandError::from("Music state not initialised"))
}

fn get_guild(ctx: &Context, msg: &Message) -> CommandResult<Guild> {
    msg.guild(&ctx.cache).ok_or(CommandError::from("Guild not found"))
}

async fn react(ctx: &Context, msg: &Message, emoji: &str) -> CommandResult {
    msg.react(&ctx.http, Unicode(emoji.to_string())).await?;

    Ok(())
}

/// Replies with the error text, if any, and reacts with the outcome.
async fn report(ctx: &Context, msg: &Message, result: MusicResult<&str>) -> CommandResult {
    match result {
        Ok(emoji) => react(ctx, msg, emoji).await,
        Err(why) => {
            debug!("Command `{}` failed: {}", msg.content, why);
            check_msg(msg.channel_id.say(&ctx.http, format!("*{why}*")).await);

            react(ctx, msg, why.reaction()).await
        }
    }
}
