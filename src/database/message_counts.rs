use anyhow::Context;
use chrono::NaiveDateTime;
use diesel::{
    prelude::*,
    sql_query,
    sql_types::{Bigint, Datetime, Smallint, Unsigned},
};

use super::MysqlTx;
use crate::models::*;

const GROUP_MESSAGE_COUNTS_SQL: &str = "\
SELECT TIMESTAMP(DATE_FORMAT(occurred_at, '%Y-%m-%d %H:00:00')) AS hour_ts,
    guild_id,
    channel_id,
    user_id,
    COUNT(message_id) AS message_count,
    MIN(occurred_at) AS min_ts,
    MAX(occurred_at) AS max_ts
FROM ingest_message_events
WHERE occurred_at > ? AND occurred_at <= ? AND event_type IN (?, ?)
GROUP BY 1, 2, 3, 4";

const UPSERT_MESSAGE_COUNT_SQL: &str = "\
INSERT INTO guild_message_counts_hour (hour_ts, guild_id, channel_id, user_id, message_count, min_ts)
VALUES (?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE
    message_count = VALUES(message_count),
    min_ts = LEAST(min_ts, VALUES(min_ts))";

impl MysqlTx<'_> {
    pub fn group_message_counts(
        &self,
        lower: NaiveDateTime,
        upper: NaiveDateTime,
    ) -> anyhow::Result<Vec<MessageCountGroup>> {
        let [first, second] = MessageEventType::COUNTED;
        sql_query(GROUP_MESSAGE_COUNTS_SQL)
            .bind::<Datetime, _>(lower)
            .bind::<Datetime, _>(upper)
            .bind::<Smallint, _>(first.code())
            .bind::<Smallint, _>(second.code())
            .load::<MessageCountGroup>(self.conn)
            .context("error querying aggregate message counts")
    }

    pub fn upsert_message_count(&self, row: &HourlyMessageCount) -> anyhow::Result<()> {
        sql_query(UPSERT_MESSAGE_COUNT_SQL)
            .bind::<Datetime, _>(row.hour_ts)
            .bind::<Unsigned<Bigint>, _>(row.guild_id)
            .bind::<Unsigned<Bigint>, _>(row.channel_id)
            .bind::<Unsigned<Bigint>, _>(row.user_id)
            .bind::<Bigint, _>(row.message_count)
            .bind::<Datetime, _>(row.min_ts)
            .execute(self.conn)
            .context("error upserting aggregate message counts")?;
        Ok(())
    }
}
