use std::sync::Arc;

use serenity::{
    async_trait,
    cache::Cache,
    client::{Context, EventHandler},
    model::{
        channel::{Message, MessageType},
        event::MessageUpdateEvent,
        gateway::Ready,
        voice::VoiceState,
    },
};

use super::pusher::IngestPusher;
use crate::{
    database::IngestStore,
    jobs::{
        voice_heartbeat::{PresenceSource, VoicePresence},
        Clock,
    },
    models::{MessageEventType, NewIngestMessageEvent, NewIngestVoiceEvent, VoiceEventType},
};

/// Records gateway activity into the ingest tables.
pub struct IngestHandler<S> {
    messages: Arc<IngestPusher<S, NewIngestMessageEvent>>,
    voice: Arc<IngestPusher<S, NewIngestVoiceEvent>>,
    clock: Arc<dyn Clock>,
}

impl<S: IngestStore> IngestHandler<S> {
    pub fn new(
        messages: Arc<IngestPusher<S, NewIngestMessageEvent>>,
        voice: Arc<IngestPusher<S, NewIngestVoiceEvent>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages,
            voice,
            clock,
        }
    }
}

/// Voice event for a user moving from `before` to `after`. A move records
/// only the join; a leave sharing its timestamp would close the new session
/// when the window is replayed.
///
/// Without a cached previous state `before` is `None`, so a mute or deafen in
/// the current channel reads as a join and restarts the open session.
pub fn voice_transition(before: Option<u64>, after: Option<u64>) -> Option<(VoiceEventType, u64)> {
    match (before, after) {
        (before, after) if before == after => None,
        (_, Some(channel_id)) => Some((VoiceEventType::Join, channel_id)),
        (Some(channel_id), None) => Some((VoiceEventType::Leave, channel_id)),
        (None, None) => None,
    }
}

fn is_counted(msg: &Message) -> bool {
    !msg.author.bot && matches!(msg.kind, MessageType::Regular | MessageType::InlineReply)
}

#[async_trait]
impl<S: IngestStore> EventHandler for IngestHandler<S> {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "connected to gateway");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let guild_id = match msg.guild_id {
            Some(id) if is_counted(&msg) => id,
            _ => return,
        };
        self.messages
            .push(NewIngestMessageEvent {
                message_id: msg.id.0,
                guild_id: guild_id.0,
                channel_id: msg.channel_id.0,
                user_id: msg.author.id.0,
                event_type: MessageEventType::Create.code(),
                occurred_at: self.clock.now(),
            })
            .await;
    }

    async fn message_update(
        &self,
        _ctx: Context,
        _old_if_available: Option<Message>,
        _new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        let (guild_id, author) = match (event.guild_id, event.author) {
            (Some(guild_id), Some(author)) if !author.bot => (guild_id, author),
            _ => return,
        };
        self.messages
            .push(NewIngestMessageEvent {
                message_id: event.id.0,
                guild_id: guild_id.0,
                channel_id: event.channel_id.0,
                user_id: author.id.0,
                event_type: MessageEventType::Edit.code(),
                occurred_at: self.clock.now(),
            })
            .await;
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let guild_id = match new.guild_id.or_else(|| old.as_ref().and_then(|s| s.guild_id)) {
            Some(id) => id,
            None => return,
        };
        if new.member.as_ref().map_or(false, |m| m.user.bot) {
            return;
        }

        let before = old.and_then(|s| s.channel_id).map(|c| c.0);
        let after = new.channel_id.map(|c| c.0);

        let (event_type, channel_id) = match voice_transition(before, after) {
            Some(transition) => transition,
            None => return,
        };
        debug!(
            guild_id = guild_id.0,
            user_id = new.user_id.0,
            channel_id,
            event = ?event_type,
            "voice state changed"
        );
        self.voice
            .push(NewIngestVoiceEvent {
                guild_id: guild_id.0,
                user_id: new.user_id.0,
                channel_id: Some(channel_id),
                event_type: event_type.code(),
                occurred_at: self.clock.now(),
            })
            .await;
    }
}

/// Reads voice presence out of the gateway cache.
pub struct CachePresence {
    cache: Arc<Cache>,
}

impl CachePresence {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PresenceSource for CachePresence {
    async fn fetch_voice_states(&self) -> anyhow::Result<Vec<VoicePresence>> {
        let mut presences = Vec::new();
        for guild_id in self.cache.guilds() {
            let states = self.cache.guild_field(guild_id, |guild| {
                guild
                    .voice_states
                    .values()
                    .filter_map(|state| {
                        state.channel_id.map(|channel_id| VoicePresence {
                            guild_id: guild_id.0,
                            channel_id: channel_id.0,
                            user_id: state.user_id.0,
                            is_bot: state.member.as_ref().map_or(false, |m| m.user.bot),
                        })
                    })
                    .collect::<Vec<_>>()
            });
            presences.extend(states.unwrap_or_default());
        }
        Ok(presences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_transitions_cover_join_leave_and_move() {
        assert_eq!(voice_transition(None, Some(5)), Some((VoiceEventType::Join, 5)));
        assert_eq!(voice_transition(Some(5), None), Some((VoiceEventType::Leave, 5)));
        assert_eq!(voice_transition(Some(5), Some(6)), Some((VoiceEventType::Join, 6)));
    }

    #[test]
    fn mute_and_deafen_updates_are_ignored() {
        assert_eq!(voice_transition(Some(5), Some(5)), None);
        assert_eq!(voice_transition(None, None), None);
    }

    #[test]
    fn unknown_previous_state_records_a_join() {
        // A cache miss cannot be told apart from a fresh join.
        assert_eq!(voice_transition(None, Some(5)), Some((VoiceEventType::Join, 5)));
    }
}
