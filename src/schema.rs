table! {
    job_checkpoints (job_name) {
        job_name -> Varchar,
        last_processed_ts -> Datetime,
    }
}

table! {
    ingest_message_events (id) {
        id -> Unsigned<Bigint>,
        message_id -> Unsigned<Bigint>,
        guild_id -> Unsigned<Bigint>,
        channel_id -> Unsigned<Bigint>,
        user_id -> Unsigned<Bigint>,
        event_type -> Smallint,
        occurred_at -> Datetime,
    }
}

table! {
    guild_message_counts_hour (hour_ts, guild_id, channel_id, user_id) {
        hour_ts -> Datetime,
        guild_id -> Unsigned<Bigint>,
        channel_id -> Unsigned<Bigint>,
        user_id -> Unsigned<Bigint>,
        message_count -> Bigint,
        min_ts -> Datetime,
    }
}

table! {
    ingest_voice_channel_events (id) {
        id -> Unsigned<Bigint>,
        guild_id -> Unsigned<Bigint>,
        user_id -> Unsigned<Bigint>,
        channel_id -> Nullable<Unsigned<Bigint>>,
        event_type -> Smallint,
        occurred_at -> Datetime,
    }
}

table! {
    guild_voice_channel_open_sessions (guild_id, user_id) {
        guild_id -> Unsigned<Bigint>,
        user_id -> Unsigned<Bigint>,
        channel_id -> Unsigned<Bigint>,
        start_ts -> Datetime,
        last_seen_ts -> Datetime,
    }
}

table! {
    guild_voice_channel_stats (id) {
        id -> Unsigned<Bigint>,
        guild_id -> Unsigned<Bigint>,
        channel_id -> Unsigned<Bigint>,
        user_id -> Unsigned<Bigint>,
        start_ts -> Datetime,
        end_ts -> Datetime,
        total_time_ms -> Bigint,
        inferred -> Bool,
    }
}

allow_tables_to_appear_in_same_query!(
    job_checkpoints,
    ingest_message_events,
    guild_message_counts_hour,
    ingest_voice_channel_events,
    guild_voice_channel_open_sessions,
    guild_voice_channel_stats,
);
