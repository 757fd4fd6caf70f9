use anyhow::Context;
use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::{MysqlTx, PurgeCounts};
use crate::models::*;

impl MysqlTx<'_> {
    pub fn insert_message_events(&self, rows: &[NewIngestMessageEvent]) -> anyhow::Result<usize> {
        use crate::schema::ingest_message_events;

        if rows.is_empty() {
            return Ok(0);
        }
        diesel::insert_into(ingest_message_events::table)
            .values(rows)
            .execute(self.conn)
            .context("error inserting ingest message events")
    }

    pub fn insert_voice_events(&self, rows: &[NewIngestVoiceEvent]) -> anyhow::Result<usize> {
        use crate::schema::ingest_voice_channel_events;

        if rows.is_empty() {
            return Ok(0);
        }
        diesel::insert_into(ingest_voice_channel_events::table)
            .values(rows)
            .execute(self.conn)
            .context("error inserting ingest voice channel events")
    }

    pub fn purge_before(&self, cutoff: NaiveDateTime) -> anyhow::Result<PurgeCounts> {
        use crate::schema::{
            guild_voice_channel_open_sessions, ingest_message_events, ingest_voice_channel_events,
        };

        let message_events = diesel::delete(
            ingest_message_events::table.filter(ingest_message_events::occurred_at.lt(cutoff)),
        )
        .execute(self.conn)
        .context("error cleaning up ingest message events")?;

        let voice_events = diesel::delete(
            ingest_voice_channel_events::table
                .filter(ingest_voice_channel_events::occurred_at.lt(cutoff)),
        )
        .execute(self.conn)
        .context("error cleaning up ingest voice channel events")?;

        let open_sessions = diesel::delete(
            guild_voice_channel_open_sessions::table
                .filter(guild_voice_channel_open_sessions::last_seen_ts.lt(cutoff)),
        )
        .execute(self.conn)
        .context("error cleaning up open voice channel sessions")?;

        Ok(PurgeCounts {
            message_events,
            voice_events,
            open_sessions,
        })
    }
}
