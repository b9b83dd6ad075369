use std::process::ExitCode;
use std::sync::Arc;

use dotenvy::dotenv;
use serenity::{
    async_trait,
    client::{Client, Context, EventHandler},
    framework::StandardFramework,
    model::{gateway::Ready, prelude::VoiceState},
    prelude::GatewayIntents,
};
use songbird::SerenityInit;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::DiscordNotifier;
use crate::commands::{Music, MusicKey, GENERAL_GROUP};
use crate::config::Config;
use crate::playback::PlaybackController;
use crate::resolver::YtDlp;
use crate::session::SessionRegistry;

mod backend;
mod commands;
mod config;
mod error;
#[cfg(test)]
mod fakes;
mod idle;
mod models;
mod playback;
mod presentation;
mod queue;
mod resolver;
mod session;
mod voice;

struct Handler;

pub struct BotDataMap;

pub struct BotData {
    pub id: u64,
}

impl serenity::prelude::TypeMapKey for BotDataMap {
    type Value = BotData;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        let bot_data = BotData { id: ready.user.id.0 };
        let data = &mut ctx.data.write().await;
        data.insert::<BotDataMap>(bot_data);
    }

    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        if new.channel_id.is_some() {
            return;
        }

        let bot_id: Option<u64>;
        let music: Option<Arc<Music>>;

        {
            let data = ctx.data.read().await;
            bot_id = data.get::<BotDataMap>().map(|data| data.id);
            music = data.get::<MusicKey>().cloned();
        }

        if let (Some(bot_id), Some(guild_id), Some(music)) = (bot_id, new.guild_id, music) {
            if bot_id == new.user_id.0 {
                info!("Bot left voice in guild {}, dropping its session", guild_id);
                music.forget_guild(guild_id).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_file = dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if env_file.is_err() {
        info!("No .env file found, reading configuration from the environment");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(why) => {
            error!("Invalid configuration: {why}");
            return ExitCode::FAILURE;
        }
    };

    let framework = StandardFramework::new()
        .configure(|c| c.prefix(&config.prefix))
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = match Client::builder(&config.token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird()
        .await
    {
        Ok(client) => client,
        Err(why) => {
            error!("Err creating client: {why:?}");
            return ExitCode::FAILURE;
        }
    };

    {
        let notifier = Arc::new(DiscordNotifier::new(
            Arc::clone(&client.cache_and_http.http),
            config.idle_timeout,
        ));
        let controller = PlaybackController::new(Arc::new(SessionRegistry::new()), notifier);
        let music = Music::new(config, controller, Arc::new(YtDlp::default()));

        let mut w = client.data.write().await;
        w.insert::<MusicKey>(Arc::new(music));
    }

    tokio::spawn(async move {
        let _ = client.start().await.map_err(|why| warn!("Client ended: {why:?}"));
    });

    if let Err(why) = tokio::signal::ctrl_c().await {
        error!("Control-C interruption failed: {why}");
        return ExitCode::FAILURE;
    }

    info!("Received Ctrl-C, shutting down.");

    ExitCode::SUCCESS
}
