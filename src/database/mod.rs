use anyhow::Context;
use chrono::NaiveDateTime;
use diesel::{
    mysql::MysqlConnection,
    r2d2::{ConnectionManager, Pool},
    Connection,
};

use crate::models::*;

pub mod checkpoints;
pub mod ingest_events;
pub mod message_counts;
#[cfg(test)]
pub mod memory;
pub mod voice_sessions;

/// Rows removed by a retention pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub message_events: usize,
    pub voice_events: usize,
    pub open_sessions: usize,
}

/// Operations available to a job inside one transaction.
///
/// Every method runs on the same connection; nothing is visible to other
/// connections until the surrounding [`IngestStore::transaction`] commits.
pub trait IngestTx {
    fn get_checkpoint(&mut self, job_name: &str) -> anyhow::Result<Option<NaiveDateTime>>;
    fn set_checkpoint(&mut self, job_name: &str, ts: NaiveDateTime) -> anyhow::Result<()>;

    /// Groups message events with `occurred_at` in `(lower, upper]` by
    /// hour, guild, channel and user.
    fn group_message_counts(
        &mut self,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> anyhow::Result<Vec<MessageCountGroup>>;
    /// Replaces `message_count` and keeps the smaller `min_ts`.
    fn upsert_message_count(&mut self, row: &HourlyMessageCount) -> anyhow::Result<()>;

    /// Voice events with `occurred_at` in `(lower, upper]`, ordered by
    /// guild, user and then `occurred_at`.
    fn fetch_voice_events(
        &mut self,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> anyhow::Result<Vec<IngestVoiceEvent>>;
    fn get_open_session(
        &mut self,
        guild_id: u64,
        user_id: u64,
    ) -> anyhow::Result<Option<OpenVoiceSession>>;
    fn put_open_session(&mut self, session: &OpenVoiceSession) -> anyhow::Result<()>;
    fn delete_open_session(&mut self, guild_id: u64, user_id: u64) -> anyhow::Result<()>;
    fn list_open_sessions(&mut self) -> anyhow::Result<Vec<OpenVoiceSession>>;
    /// Returns false when the closed session was already recorded.
    fn insert_voice_stat(&mut self, stat: &NewVoiceSessionStat) -> anyhow::Result<bool>;

    fn insert_message_events(&mut self, rows: &[NewIngestMessageEvent]) -> anyhow::Result<usize>;
    fn insert_voice_events(&mut self, rows: &[NewIngestVoiceEvent]) -> anyhow::Result<usize>;
    fn purge_before(&mut self, cutoff: NaiveDateTime) -> anyhow::Result<PurgeCounts>;
}

pub trait IngestStore: Send + Sync + 'static {
    /// Runs `f` in a single transaction. Commits when `f` returns `Ok`,
    /// rolls back otherwise.
    fn transaction<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut dyn IngestTx) -> anyhow::Result<T>;
}

pub struct Database {
    pool: Pool<ConnectionManager<MysqlConnection>>,
}

impl Database {
    pub fn new(database_url: &str, pool_size: u32) -> anyhow::Result<Database> {
        let manager = ConnectionManager::<MysqlConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .context("error building database pool")?;
        Ok(Self { pool })
    }
}

impl IngestStore for Database {
    fn transaction<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut dyn IngestTx) -> anyhow::Result<T>,
    {
        let pooled = self.pool.get().context("error acquiring connection")?;
        let conn: &MysqlConnection = &pooled;
        conn.transaction::<T, anyhow::Error, _>(|| {
            let mut tx = MysqlTx { conn };
            f(&mut tx)
        })
    }
}

/// [`IngestTx`] over a connection with an open transaction.
pub struct MysqlTx<'a> {
    conn: &'a MysqlConnection,
}

impl IngestTx for MysqlTx<'_> {
    fn get_checkpoint(&mut self, job_name: &str) -> anyhow::Result<Option<NaiveDateTime>> {
        MysqlTx::get_checkpoint(self, job_name)
    }

    fn set_checkpoint(&mut self, job_name: &str, ts: NaiveDateTime) -> anyhow::Result<()> {
        MysqlTx::set_checkpoint(self, job_name, ts)
    }

    fn group_message_counts(
        &mut self,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> anyhow::Result<Vec<MessageCountGroup>> {
        MysqlTx::group_message_counts(self, lower, upper)
    }

    fn upsert_message_count(&mut self, row: &HourlyMessageCount) -> anyhow::Result<()> {
        MysqlTx::upsert_message_count(self, row)
    }

    fn fetch_voice_events(
        &mut self,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> anyhow::Result<Vec<IngestVoiceEvent>> {
        MysqlTx::fetch_voice_events(self, lower, upper)
    }

    fn get_open_session(
        &mut self,
        guild_id: u64,
        user_id: u64,
    ) -> anyhow::Result<Option<OpenVoiceSession>> {
        MysqlTx::get_open_session(self, guild_id, user_id)
    }

    fn put_open_session(&mut self, session: &OpenVoiceSession) -> anyhow::Result<()> {
        MysqlTx::put_open_session(self, session)
    }

    fn delete_open_session(&mut self, guild_id: u64, user_id: u64) -> anyhow::Result<()> {
        MysqlTx::delete_open_session(self, guild_id, user_id)
    }

    fn list_open_sessions(&mut self) -> anyhow::Result<Vec<OpenVoiceSession>> {
        MysqlTx::list_open_sessions(self)
    }

    fn insert_voice_stat(&mut self, stat: &NewVoiceSessionStat) -> anyhow::Result<bool> {
        MysqlTx::insert_voice_stat(self, stat)
    }

    fn insert_message_events(&mut self, rows: &[NewIngestMessageEvent]) -> anyhow::Result<usize> {
        MysqlTx::insert_message_events(self, rows)
    }

    fn insert_voice_events(&mut self, rows: &[NewIngestVoiceEvent]) -> anyhow::Result<usize> {
        MysqlTx::insert_voice_events(self, rows)
    }

    fn purge_before(&mut self, cutoff: NaiveDateTime) -> anyhow::Result<PurgeCounts> {
        MysqlTx::purge_before(self, cutoff)
    }
}
