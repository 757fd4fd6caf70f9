//! In-process [`IngestStore`] used by the job tests.
//!
//! A transaction works on a copy of the whole state and swaps it in on
//! commit, so a failed run leaves nothing behind.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use chrono::{NaiveDateTime, NaiveTime, Timelike};

use super::{IngestStore, IngestTx, PurgeCounts};
use crate::models::*;

#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    pub checkpoints: HashMap<String, NaiveDateTime>,
    pub message_events: Vec<NewIngestMessageEvent>,
    pub message_counts: BTreeMap<(NaiveDateTime, u64, u64, u64), HourlyMessageCount>,
    pub voice_events: Vec<IngestVoiceEvent>,
    pub open_sessions: BTreeMap<(u64, u64), OpenVoiceSession>,
    pub voice_stats: Vec<NewVoiceSessionStat>,
}

impl MemoryState {
    fn next_voice_event_id(&self) -> u64 {
        self.voice_events.iter().map(|e| e.id).max().unwrap_or(0) + 1
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_on: Mutex<Option<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MemoryState {
        self.state.lock().unwrap().clone()
    }

    /// Makes every call of the named [`IngestTx`] operation fail until
    /// cleared with `None`.
    pub fn fail_on(&self, operation: Option<&'static str>) {
        *self.fail_on.lock().unwrap() = operation;
    }

    pub fn push_message_event(
        &self,
        guild_id: u64,
        channel_id: u64,
        user_id: u64,
        event_type: MessageEventType,
        occurred_at: NaiveDateTime,
    ) {
        let mut state = self.state.lock().unwrap();
        let message_id = state.message_events.len() as u64 + 1;
        state.message_events.push(NewIngestMessageEvent {
            message_id,
            guild_id,
            channel_id,
            user_id,
            event_type: event_type.code(),
            occurred_at,
        });
    }

    pub fn push_voice_event(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_id: Option<u64>,
        event_type: i16,
        occurred_at: NaiveDateTime,
    ) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_voice_event_id();
        state.voice_events.push(IngestVoiceEvent {
            id,
            guild_id,
            user_id,
            channel_id,
            event_type,
            occurred_at,
        });
    }
}

impl IngestStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut dyn IngestTx) -> anyhow::Result<T>,
    {
        let mut state = self.state.lock().unwrap();
        let mut tx = MemoryTx {
            state: state.clone(),
            fail_on: *self.fail_on.lock().unwrap(),
        };
        let value = f(&mut tx)?;
        *state = tx.state;
        Ok(value)
    }
}

pub struct MemoryTx {
    state: MemoryState,
    fail_on: Option<&'static str>,
}

impl MemoryTx {
    fn check(&self, operation: &'static str) -> anyhow::Result<()> {
        if self.fail_on == Some(operation) {
            anyhow::bail!("injected failure in {}", operation);
        }
        Ok(())
    }
}

fn hour_bucket(ts: NaiveDateTime) -> NaiveDateTime {
    NaiveDateTime::new(ts.date(), NaiveTime::from_hms_opt(ts.hour(), 0, 0).unwrap())
}

impl IngestTx for MemoryTx {
    fn get_checkpoint(&mut self, job_name: &str) -> anyhow::Result<Option<NaiveDateTime>> {
        self.check("get_checkpoint")?;
        Ok(self.state.checkpoints.get(job_name).copied())
    }

    fn set_checkpoint(&mut self, job_name: &str, ts: NaiveDateTime) -> anyhow::Result<()> {
        self.check("set_checkpoint")?;
        self.state.checkpoints.insert(job_name.to_string(), ts);
        Ok(())
    }

    fn group_message_counts(
        &mut self,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> anyhow::Result<Vec<MessageCountGroup>> {
        self.check("group_message_counts")?;
        let counted: Vec<i16> = MessageEventType::COUNTED.iter().map(|t| t.code()).collect();
        let mut groups: BTreeMap<(NaiveDateTime, u64, u64, u64), MessageCountGroup> =
            BTreeMap::new();
        for event in self.state.message_events.iter().filter(|e| {
            e.occurred_at > lower && e.occurred_at <= upper && counted.contains(&e.event_type)
        }) {
            let hour_ts = hour_bucket(event.occurred_at);
            let key = (hour_ts, event.guild_id, event.channel_id, event.user_id);
            let group = groups.entry(key).or_insert(MessageCountGroup {
                hour_ts,
                guild_id: event.guild_id,
                channel_id: event.channel_id,
                user_id: event.user_id,
                message_count: 0,
                min_ts: event.occurred_at,
                max_ts: event.occurred_at,
            });
            group.message_count += 1;
            group.min_ts = group.min_ts.min(event.occurred_at);
            group.max_ts = group.max_ts.max(event.occurred_at);
        }
        Ok(groups.into_iter().map(|(_, group)| group).collect())
    }

    fn upsert_message_count(&mut self, row: &HourlyMessageCount) -> anyhow::Result<()> {
        self.check("upsert_message_count")?;
        let key = (row.hour_ts, row.guild_id, row.channel_id, row.user_id);
        let stored = self
            .state
            .message_counts
            .entry(key)
            .or_insert_with(|| row.clone());
        stored.message_count = row.message_count;
        stored.min_ts = stored.min_ts.min(row.min_ts);
        Ok(())
    }

    fn fetch_voice_events(
        &mut self,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> anyhow::Result<Vec<IngestVoiceEvent>> {
        self.check("fetch_voice_events")?;
        let mut events: Vec<IngestVoiceEvent> = self
            .state
            .voice_events
            .iter()
            .filter(|e| e.occurred_at > lower && e.occurred_at <= upper)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.guild_id, e.user_id, e.occurred_at, e.id));
        Ok(events)
    }

    fn get_open_session(
        &mut self,
        guild_id: u64,
        user_id: u64,
    ) -> anyhow::Result<Option<OpenVoiceSession>> {
        self.check("get_open_session")?;
        Ok(self.state.open_sessions.get(&(guild_id, user_id)).cloned())
    }

    fn put_open_session(&mut self, session: &OpenVoiceSession) -> anyhow::Result<()> {
        self.check("put_open_session")?;
        self.state
            .open_sessions
            .insert((session.guild_id, session.user_id), session.clone());
        Ok(())
    }

    fn delete_open_session(&mut self, guild_id: u64, user_id: u64) -> anyhow::Result<()> {
        self.check("delete_open_session")?;
        self.state.open_sessions.remove(&(guild_id, user_id));
        Ok(())
    }

    fn list_open_sessions(&mut self) -> anyhow::Result<Vec<OpenVoiceSession>> {
        self.check("list_open_sessions")?;
        Ok(self.state.open_sessions.values().cloned().collect())
    }

    fn insert_voice_stat(&mut self, stat: &NewVoiceSessionStat) -> anyhow::Result<bool> {
        self.check("insert_voice_stat")?;
        let duplicate = self.state.voice_stats.iter().any(|s| {
            s.guild_id == stat.guild_id
                && s.user_id == stat.user_id
                && s.channel_id == stat.channel_id
                && s.start_ts == stat.start_ts
        });
        if duplicate {
            return Ok(false);
        }
        self.state.voice_stats.push(stat.clone());
        Ok(true)
    }

    fn insert_message_events(&mut self, rows: &[NewIngestMessageEvent]) -> anyhow::Result<usize> {
        self.check("insert_message_events")?;
        self.state.message_events.extend_from_slice(rows);
        Ok(rows.len())
    }

    fn insert_voice_events(&mut self, rows: &[NewIngestVoiceEvent]) -> anyhow::Result<usize> {
        self.check("insert_voice_events")?;
        for row in rows {
            let id = self.state.next_voice_event_id();
            self.state.voice_events.push(IngestVoiceEvent {
                id,
                guild_id: row.guild_id,
                user_id: row.user_id,
                channel_id: row.channel_id,
                event_type: row.event_type,
                occurred_at: row.occurred_at,
            });
        }
        Ok(rows.len())
    }

    fn purge_before(&mut self, cutoff: NaiveDateTime) -> anyhow::Result<PurgeCounts> {
        self.check("purge_before")?;
        let state = &mut self.state;

        let before = state.message_events.len();
        state.message_events.retain(|e| e.occurred_at >= cutoff);
        let message_events = before - state.message_events.len();

        let before = state.voice_events.len();
        state.voice_events.retain(|e| e.occurred_at >= cutoff);
        let voice_events = before - state.voice_events.len();

        let before = state.open_sessions.len();
        state.open_sessions.retain(|_, s| s.last_seen_ts >= cutoff);
        let open_sessions = before - state.open_sessions.len();

        Ok(PurgeCounts {
            message_events,
            voice_events,
            open_sessions,
        })
    }
}
