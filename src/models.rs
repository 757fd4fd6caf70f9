use chrono::NaiveDateTime;
use diesel::sql_types::{Bigint, Datetime, Unsigned};

use crate::schema::{
    guild_message_counts_hour, guild_voice_channel_open_sessions, guild_voice_channel_stats,
    ingest_message_events, ingest_voice_channel_events, job_checkpoints,
};

#[derive(Queryable, Clone, Debug)]
pub struct JobCheckpoint {
    pub job_name: String,
    pub last_processed_ts: NaiveDateTime,
}

#[derive(Insertable)]
#[table_name = "job_checkpoints"]
pub struct NewJobCheckpoint<'a> {
    pub job_name: &'a str,
    pub last_processed_ts: NaiveDateTime,
}

/// Stored as `SMALLINT` in `ingest_message_events.event_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageEventType {
    Create = 1,
    Edit = 2,
}

impl MessageEventType {
    /// Event types that count towards hourly message totals.
    pub const COUNTED: [MessageEventType; 2] = [MessageEventType::Create, MessageEventType::Edit];

    pub fn code(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for MessageEventType {
    type Error = anyhow::Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageEventType::Create),
            2 => Ok(MessageEventType::Edit),
            other => Err(anyhow::anyhow!("unknown message event type {}", other)),
        }
    }
}

/// Stored as `SMALLINT` in `ingest_voice_channel_events.event_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoiceEventType {
    Join = 1,
    Leave = 2,
    Checkpoint = 3,
}

impl VoiceEventType {
    pub fn code(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for VoiceEventType {
    type Error = anyhow::Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoiceEventType::Join),
            2 => Ok(VoiceEventType::Leave),
            3 => Ok(VoiceEventType::Checkpoint),
            other => Err(anyhow::anyhow!("unknown voice event type {}", other)),
        }
    }
}

#[derive(Insertable, Clone, Debug, PartialEq, Eq)]
#[table_name = "ingest_message_events"]
pub struct NewIngestMessageEvent {
    pub message_id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub event_type: i16,
    pub occurred_at: NaiveDateTime,
}

#[derive(Insertable, Clone, Debug, PartialEq, Eq)]
#[table_name = "ingest_voice_channel_events"]
pub struct NewIngestVoiceEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub channel_id: Option<u64>,
    pub event_type: i16,
    pub occurred_at: NaiveDateTime,
}

#[derive(Queryable, Clone, Debug, PartialEq, Eq)]
pub struct IngestVoiceEvent {
    pub id: u64,
    pub guild_id: u64,
    pub user_id: u64,
    pub channel_id: Option<u64>,
    pub event_type: i16,
    pub occurred_at: NaiveDateTime,
}

/// One row of the hourly grouping over `ingest_message_events`.
#[derive(QueryableByName, Clone, Debug, PartialEq, Eq)]
pub struct MessageCountGroup {
    #[sql_type = "Datetime"]
    pub hour_ts: NaiveDateTime,
    #[sql_type = "Unsigned<Bigint>"]
    pub guild_id: u64,
    #[sql_type = "Unsigned<Bigint>"]
    pub channel_id: u64,
    #[sql_type = "Unsigned<Bigint>"]
    pub user_id: u64,
    #[sql_type = "Bigint"]
    pub message_count: i64,
    #[sql_type = "Datetime"]
    pub min_ts: NaiveDateTime,
    #[sql_type = "Datetime"]
    pub max_ts: NaiveDateTime,
}

#[derive(Queryable, Insertable, Clone, Debug, PartialEq, Eq)]
#[table_name = "guild_message_counts_hour"]
pub struct HourlyMessageCount {
    pub hour_ts: NaiveDateTime,
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub message_count: i64,
    pub min_ts: NaiveDateTime,
}

impl From<&MessageCountGroup> for HourlyMessageCount {
    fn from(group: &MessageCountGroup) -> Self {
        Self {
            hour_ts: group.hour_ts,
            guild_id: group.guild_id,
            channel_id: group.channel_id,
            user_id: group.user_id,
            message_count: group.message_count,
            min_ts: group.min_ts,
        }
    }
}

/// A user currently believed to be in a voice channel. At most one per
/// `(guild_id, user_id)`.
#[derive(Queryable, Insertable, Clone, Debug, PartialEq, Eq)]
#[table_name = "guild_voice_channel_open_sessions"]
pub struct OpenVoiceSession {
    pub guild_id: u64,
    pub user_id: u64,
    pub channel_id: u64,
    pub start_ts: NaiveDateTime,
    pub last_seen_ts: NaiveDateTime,
}

#[derive(Insertable, Clone, Debug, PartialEq, Eq)]
#[table_name = "guild_voice_channel_stats"]
pub struct NewVoiceSessionStat {
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    pub total_time_ms: i64,
    pub inferred: bool,
}
