use std::{env, str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_pool_size: u32,
    pub discord_token: Option<String>,

    pub message_counts_interval: Duration,
    pub message_counts_backfill: chrono::Duration,

    pub voice_sessions_interval: Duration,
    pub voice_sessions_backfill: chrono::Duration,
    pub voice_max_session_gap: chrono::Duration,
    pub voice_min_session: chrono::Duration,
    pub voice_heartbeat_interval: Duration,

    pub ingest_buffer_size: usize,
    pub ingest_flush_interval: Duration,
    pub ingest_retention: chrono::Duration,
    pub retention_interval: Duration,

    pub slow_job_warning: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> anyhow::Result<Config>
    where
        L: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, default: u64| -> anyhow::Result<Duration> {
            parse_or(&lookup, key, default).map(Duration::from_secs)
        };
        let window_secs = |key: &str, secs: u64| -> anyhow::Result<chrono::Duration> {
            chrono::Duration::from_std(Duration::from_secs(secs))
                .with_context(|| format!("{} is out of range", key))
        };
        let window = |key: &str, default: u64| -> anyhow::Result<chrono::Duration> {
            window_secs(key, parse_or(&lookup, key, default)?)
        };
        let window_hours = |key: &str, default: u64| -> anyhow::Result<chrono::Duration> {
            let hours: u64 = parse_or(&lookup, key, default)?;
            let secs = hours
                .checked_mul(3600)
                .with_context(|| format!("{} is out of range", key))?;
            window_secs(key, secs)
        };

        Ok(Config {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_pool_size: parse_or(&lookup, "DATABASE_POOL_SIZE", 8)?,
            discord_token: lookup("DISCORD_TOKEN").filter(|t| !t.is_empty()),

            message_counts_interval: secs("MESSAGE_COUNTS_INTERVAL_SECS", 60)?,
            message_counts_backfill: window("MESSAGE_COUNTS_BACKFILL_SECS", 120)?,

            voice_sessions_interval: secs("VOICE_SESSIONS_INTERVAL_SECS", 60)?,
            voice_sessions_backfill: window("VOICE_SESSIONS_BACKFILL_SECS", 180)?,
            voice_max_session_gap: window("VOICE_MAX_SESSION_GAP_SECS", 120)?,
            voice_min_session: window("VOICE_MIN_SESSION_SECS", 0)?,
            voice_heartbeat_interval: secs("VOICE_HEARTBEAT_INTERVAL_SECS", 60)?,

            ingest_buffer_size: parse_or(&lookup, "INGEST_BUFFER_SIZE", 1024)?,
            ingest_flush_interval: secs("INGEST_FLUSH_INTERVAL_SECS", 60)?,
            ingest_retention: window_hours("INGEST_RETENTION_HOURS", 72)?,
            retention_interval: secs("RETENTION_INTERVAL_SECS", 3600)?,

            slow_job_warning: secs("SLOW_JOB_WARNING_SECS", 45)?,
        })
    }
}

fn parse_or<L, T>(lookup: &L, key: &str, default: T) -> anyhow::Result<T>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value {:?} for {}", raw, key)),
        None => Ok(default),
    }
}
