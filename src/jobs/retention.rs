use anyhow::Context;
use chrono::Duration;

use super::JobContext;
use crate::database::{IngestStore, PurgeCounts};

pub const JOB_NAME: &str = "cleanup-ingest-tables";

/// Deletes raw ingest rows, and open sessions nobody has seen, once they are
/// older than the retention window.
pub struct IngestRetention<S> {
    ctx: JobContext<S>,
    retention: Duration,
}

impl<S: IngestStore> IngestRetention<S> {
    pub fn new(ctx: JobContext<S>, retention: Duration) -> Self {
        Self { ctx, retention }
    }

    pub fn run(&self) -> anyhow::Result<PurgeCounts> {
        let now = self.ctx.clock.now();
        let cutoff = now
            .checked_sub_signed(self.retention)
            .context("retention window is out of range")?;

        let purged = self.ctx.store.transaction(|tx| {
            let purged = tx.purge_before(cutoff)?;
            tx.set_checkpoint(JOB_NAME, now)?;
            Ok(purged)
        })?;

        info!(
            %cutoff,
            message_events = purged.message_events,
            voice_events = purged.voice_events,
            open_sessions = purged.open_sessions,
            "cleaned up ingest tables"
        );
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        database::memory::MemoryStore,
        jobs::testing::{at, ManualClock},
        models::{MessageEventType, OpenVoiceSession, VoiceEventType},
    };

    #[test]
    fn purges_rows_older_than_retention() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(at(12, 0, 0)));
        let retention = IngestRetention::new(
            JobContext::new(store.clone(), clock.clone()),
            Duration::hours(2),
        );

        store.push_message_event(1, 2, 3, MessageEventType::Create, at(9, 59, 59));
        store.push_message_event(1, 2, 3, MessageEventType::Create, at(10, 0, 0));
        store.push_voice_event(1, 3, Some(2), VoiceEventType::Join.code(), at(8, 0, 0));
        store.push_voice_event(1, 3, Some(2), VoiceEventType::Leave.code(), at(11, 0, 0));
        for (user_id, last_seen_ts) in [(3, at(9, 0, 0)), (4, at(11, 30, 0))] {
            let session = OpenVoiceSession {
                guild_id: 1,
                user_id,
                channel_id: 2,
                start_ts: at(8, 0, 0),
                last_seen_ts,
            };
            store.transaction(|tx| tx.put_open_session(&session)).unwrap();
        }

        let purged = retention.run().unwrap();
        assert_eq!(
            purged,
            PurgeCounts {
                message_events: 1,
                voice_events: 1,
                open_sessions: 1,
            }
        );

        let state = store.snapshot();
        assert_eq!(state.message_events[0].occurred_at, at(10, 0, 0));
        assert_eq!(state.voice_events[0].occurred_at, at(11, 0, 0));
        assert!(state.open_sessions.contains_key(&(1, 4)));
        assert_eq!(state.checkpoints.get(JOB_NAME), Some(&at(12, 0, 0)));
    }

    #[test]
    fn out_of_range_retention_fails_without_purging() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(at(12, 0, 0)));
        let retention = IngestRetention::new(
            JobContext::new(store.clone(), clock),
            Duration::days(1_000_000_000),
        );
        store.push_message_event(1, 2, 3, MessageEventType::Create, at(11, 0, 0));

        assert!(retention.run().is_err());

        let state = store.snapshot();
        assert_eq!(state.message_events.len(), 1);
        assert!(state.checkpoints.is_empty());
    }

    #[test]
    fn failed_purge_keeps_previous_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(at(12, 0, 0)));
        let retention = IngestRetention::new(
            JobContext::new(store.clone(), clock.clone()),
            Duration::hours(2),
        );
        retention.run().unwrap();

        clock.advance(Duration::hours(1));
        store.fail_on(Some("set_checkpoint"));
        assert!(retention.run().is_err());
        assert_eq!(
            store.snapshot().checkpoints.get(JOB_NAME),
            Some(&at(12, 0, 0))
        );
    }
}
