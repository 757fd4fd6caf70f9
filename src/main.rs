#[macro_use]
extern crate diesel;
#[macro_use]
extern crate tracing;

pub mod config;
pub mod database;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod scheduled;
pub mod schema;

use std::sync::Arc;

use anyhow::Context;
use serenity::{model::gateway::GatewayIntents, Client};
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    database::Database,
    ingest::{
        gateway::{CachePresence, IngestHandler},
        pusher::IngestPusher,
    },
    jobs::{voice_heartbeat::VoiceHeartbeat, JobContext, SystemClock},
    scheduled::Scheduler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("GIT_HASH"), "starting activity ingest");

    let db = Arc::new(Database::new(&config.database_url, config.database_pool_size)?);
    let ctx = JobContext::new(db.clone(), Arc::new(SystemClock));

    let message_pusher = Arc::new(IngestPusher::new(db.clone(), config.ingest_buffer_size));
    let voice_pusher = Arc::new(IngestPusher::new(db.clone(), config.ingest_buffer_size));

    let mut scheduler = Scheduler::new(config.slow_job_warning);
    jobs::setup_jobs(&mut scheduler, &ctx, &config);
    ingest::schedule_flush(
        &mut scheduler,
        "flush_ingest_message_events",
        config.ingest_flush_interval,
        message_pusher.clone(),
    );
    ingest::schedule_flush(
        &mut scheduler,
        "flush_ingest_voice_channel_events",
        config.ingest_flush_interval,
        voice_pusher.clone(),
    );

    let shard_manager = match &config.discord_token {
        Some(token) => {
            let intents = GatewayIntents::GUILDS
                | GatewayIntents::GUILD_MESSAGES
                | GatewayIntents::GUILD_VOICE_STATES;
            let handler = IngestHandler::new(
                message_pusher.clone(),
                voice_pusher.clone(),
                ctx.clock.clone(),
            );
            let mut client = Client::builder(token, intents)
                .event_handler(handler)
                .await
                .context("error creating gateway client")?;

            let heartbeat = Arc::new(VoiceHeartbeat::new(
                Arc::new(CachePresence::new(client.cache_and_http.cache.clone())),
                voice_pusher.clone(),
                ctx.clock.clone(),
            ));
            scheduler.every(
                jobs::voice_heartbeat::JOB_NAME,
                config.voice_heartbeat_interval,
                move || {
                    let heartbeat = heartbeat.clone();
                    async move { heartbeat.run().await.map(drop) }
                },
            );

            let shard_manager = client.shard_manager.clone();
            tokio::spawn(async move {
                if let Err(e) = client.start_autosharded().await {
                    error!(error = ?e, "gateway client stopped");
                }
            });
            Some(shard_manager)
        }
        None => {
            warn!("DISCORD_TOKEN is not set, running aggregation jobs only");
            None
        }
    };

    shutdown_signal().await?;
    info!("shutting down");

    if let Some(shard_manager) = shard_manager {
        shard_manager.lock().await.shutdown_all().await;
    }
    scheduler.shutdown().await;

    let messages = message_pusher.flush().await;
    let voice = voice_pusher.flush().await;
    info!(messages, voice, "flushed remaining ingest events");

    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("could not register SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("could not register ctrl+c handler")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("could not register ctrl+c handler")?;
    Ok(())
}
