use anyhow::Context;
use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::MysqlTx;
use crate::models::*;

impl MysqlTx<'_> {
    pub fn fetch_voice_events(
        &self,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> anyhow::Result<Vec<IngestVoiceEvent>> {
        use crate::schema::ingest_voice_channel_events::dsl::*;

        ingest_voice_channel_events
            .filter(occurred_at.gt(lower))
            .filter(occurred_at.le(upper))
            .order((guild_id.asc(), user_id.asc(), occurred_at.asc(), id.asc()))
            .load::<IngestVoiceEvent>(self.conn)
            .context("error querying voice channel events")
    }

    pub fn get_open_session(
        &self,
        guild: u64,
        user: u64,
    ) -> anyhow::Result<Option<OpenVoiceSession>> {
        use crate::schema::guild_voice_channel_open_sessions::dsl::*;

        guild_voice_channel_open_sessions
            .filter(guild_id.eq(guild))
            .filter(user_id.eq(user))
            .first::<OpenVoiceSession>(self.conn)
            .optional()
            .context("error getting open voice channel session")
    }

    pub fn put_open_session(&self, session: &OpenVoiceSession) -> anyhow::Result<()> {
        use crate::schema::guild_voice_channel_open_sessions;

        diesel::replace_into(guild_voice_channel_open_sessions::table)
            .values(session)
            .execute(self.conn)
            .context("error upserting open voice channel session")?;
        Ok(())
    }

    pub fn delete_open_session(&self, guild: u64, user: u64) -> anyhow::Result<()> {
        use crate::schema::guild_voice_channel_open_sessions::dsl::*;

        diesel::delete(
            guild_voice_channel_open_sessions
                .filter(guild_id.eq(guild))
                .filter(user_id.eq(user)),
        )
        .execute(self.conn)
        .context("error deleting open voice channel session")?;
        Ok(())
    }

    pub fn list_open_sessions(&self) -> anyhow::Result<Vec<OpenVoiceSession>> {
        use crate::schema::guild_voice_channel_open_sessions::dsl::*;

        guild_voice_channel_open_sessions
            .order((guild_id.asc(), user_id.asc()))
            .load::<OpenVoiceSession>(self.conn)
            .context("error fetching open voice channel sessions")
    }

    pub fn insert_voice_stat(&self, stat: &NewVoiceSessionStat) -> anyhow::Result<bool> {
        use crate::schema::guild_voice_channel_stats;

        let inserted = diesel::insert_or_ignore_into(guild_voice_channel_stats::table)
            .values(stat)
            .execute(self.conn)
            .context("error creating voice channel stat")?;
        Ok(inserted > 0)
    }
}
