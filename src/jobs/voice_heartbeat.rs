//! Synthesizes `checkpoint` voice events for everyone currently in voice,
//! keeping their open sessions from being swept as stale.

use std::sync::Arc;

use serenity::async_trait;

use super::Clock;
use crate::{
    database::IngestStore,
    ingest::pusher::IngestPusher,
    models::{NewIngestVoiceEvent, VoiceEventType},
};

pub const JOB_NAME: &str = "checkpoint_voice_channels";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoicePresence {
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub is_bot: bool,
}

/// Live snapshot of who is sitting in a voice channel right now.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    async fn fetch_voice_states(&self) -> anyhow::Result<Vec<VoicePresence>>;
}

pub struct VoiceHeartbeat<S> {
    source: Arc<dyn PresenceSource>,
    pusher: Arc<IngestPusher<S, NewIngestVoiceEvent>>,
    clock: Arc<dyn Clock>,
}

impl<S: IngestStore> VoiceHeartbeat<S> {
    pub fn new(
        source: Arc<dyn PresenceSource>,
        pusher: Arc<IngestPusher<S, NewIngestVoiceEvent>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            pusher,
            clock,
        }
    }

    /// Returns the number of checkpoint events pushed.
    pub async fn run(&self) -> anyhow::Result<usize> {
        let states = self.source.fetch_voice_states().await?;
        let now = self.clock.now();

        let mut pushed = 0;
        for state in states.into_iter().filter(|s| !s.is_bot) {
            self.pusher
                .push(NewIngestVoiceEvent {
                    guild_id: state.guild_id,
                    user_id: state.user_id,
                    channel_id: Some(state.channel_id),
                    event_type: VoiceEventType::Checkpoint.code(),
                    occurred_at: now,
                })
                .await;
            pushed += 1;
        }
        self.pusher.flush().await;

        info!(pushed, "checkpointed voice channels");
        Ok(pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::memory::MemoryStore,
        jobs::testing::{at, ManualClock},
    };

    struct FixedPresence(Result<Vec<VoicePresence>, String>);

    #[async_trait]
    impl PresenceSource for FixedPresence {
        async fn fetch_voice_states(&self) -> anyhow::Result<Vec<VoicePresence>> {
            self.0.clone().map_err(anyhow::Error::msg)
        }
    }

    fn presence(user_id: u64, is_bot: bool) -> VoicePresence {
        VoicePresence {
            guild_id: 1,
            channel_id: 2,
            user_id,
            is_bot,
        }
    }

    fn heartbeat(source: FixedPresence) -> (Arc<MemoryStore>, VoiceHeartbeat<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pusher = Arc::new(IngestPusher::new(store.clone(), 1024));
        let clock = Arc::new(ManualClock::new(at(10, 0, 0)));
        (store, VoiceHeartbeat::new(Arc::new(source), pusher, clock))
    }

    #[tokio::test]
    async fn checkpoints_present_users_and_skips_bots() {
        let (store, heartbeat) = heartbeat(FixedPresence(Ok(vec![
            presence(10, false),
            presence(11, true),
            presence(12, false),
        ])));

        assert_eq!(heartbeat.run().await.unwrap(), 2);

        let events = store.snapshot().voice_events;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| {
            e.event_type == VoiceEventType::Checkpoint.code()
                && e.occurred_at == at(10, 0, 0)
                && e.channel_id == Some(2)
        }));
        assert_eq!(
            events.iter().map(|e| e.user_id).collect::<Vec<_>>(),
            vec![10, 12]
        );
    }

    #[tokio::test]
    async fn source_errors_fail_the_run() {
        let (store, heartbeat) = heartbeat(FixedPresence(Err("gateway unavailable".into())));

        assert!(heartbeat.run().await.is_err());
        assert!(store.snapshot().voice_events.is_empty());
    }
}
