pub mod message_counts;
pub mod retention;
pub mod voice_heartbeat;
pub mod voice_sessions;

use std::{sync::Arc, time::UNIX_EPOCH};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{config::Config, database::IngestStore, scheduled::Scheduler};

use self::{
    message_counts::MessageCountAggregator, retention::IngestRetention,
    voice_sessions::VoiceSessionTracker,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Shared dependencies handed to every job.
pub struct JobContext<S> {
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock>,
}

impl<S> JobContext<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl<S> Clone for JobContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Checkpoint used by a job that has never completed a run.
pub fn zero_timestamp() -> NaiveDateTime {
    DateTime::<Utc>::from(UNIX_EPOCH).naive_utc()
}

/// Runs blocking store work on the blocking thread pool.
pub async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking job task failed")?
}

pub fn setup_jobs<S: IngestStore>(scheduler: &mut Scheduler, ctx: &JobContext<S>, config: &Config) {
    {
        let aggregator = Arc::new(MessageCountAggregator::new(
            ctx.clone(),
            config.message_counts_backfill,
        ));
        scheduler.every(
            message_counts::JOB_NAME,
            config.message_counts_interval,
            move || {
                let aggregator = aggregator.clone();
                async move { run_blocking(move || aggregator.run()).await.map(drop) }
            },
        );
    }
    {
        let tracker = Arc::new(VoiceSessionTracker::new(
            ctx.clone(),
            voice_sessions::TrackerSettings {
                backfill: config.voice_sessions_backfill,
                max_session_gap: config.voice_max_session_gap,
                min_session: config.voice_min_session,
            },
        ));
        scheduler.every(
            voice_sessions::JOB_NAME,
            config.voice_sessions_interval,
            move || {
                let tracker = tracker.clone();
                async move { run_blocking(move || tracker.run()).await.map(drop) }
            },
        );
    }
    {
        let retention = Arc::new(IngestRetention::new(ctx.clone(), config.ingest_retention));
        scheduler.every(retention::JOB_NAME, config.retention_interval, move || {
            let retention = retention.clone();
            async move { run_blocking(move || retention.run()).await.map(drop) }
        });
    }
}
