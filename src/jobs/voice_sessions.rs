//! Rebuilds voice channel sessions from `ingest_voice_channel_events`.
//!
//! Events are replayed per `(guild, user)` in `occurred_at` order against
//! the persisted open session, closed sessions become rows in
//! `guild_voice_channel_stats`, and sessions whose heartbeat went quiet are
//! swept at the end of every run.

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{Duration, NaiveDateTime};

use super::{zero_timestamp, JobContext};
use crate::{
    database::{IngestStore, IngestTx},
    models::{IngestVoiceEvent, NewVoiceSessionStat, OpenVoiceSession, VoiceEventType},
};

pub const JOB_NAME: &str = "guild_voice_channel_stats";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceEventKind {
    Join { channel_id: u64 },
    Leave,
    Checkpoint,
}

/// A decoded row of `ingest_voice_channel_events`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub kind: VoiceEventKind,
    pub occurred_at: NaiveDateTime,
}

impl TryFrom<IngestVoiceEvent> for VoiceEvent {
    type Error = anyhow::Error;

    fn try_from(row: IngestVoiceEvent) -> Result<Self, Self::Error> {
        let kind = match VoiceEventType::try_from(row.event_type)
            .with_context(|| format!("voice event {}", row.id))?
        {
            VoiceEventType::Join => VoiceEventKind::Join {
                channel_id: row
                    .channel_id
                    .with_context(|| format!("join event {} has no channel", row.id))?,
            },
            VoiceEventType::Leave => VoiceEventKind::Leave,
            VoiceEventType::Checkpoint => VoiceEventKind::Checkpoint,
        };
        Ok(VoiceEvent {
            guild_id: row.guild_id,
            user_id: row.user_id,
            kind,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedSession {
    pub session: OpenVoiceSession,
    pub end_ts: NaiveDateTime,
}

/// Effect of one event on a user's session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub closed: Option<ClosedSession>,
    pub next: Option<OpenVoiceSession>,
}

/// Applies `event` to the user's current session. Returns `None` when the
/// event changes nothing.
///
/// | current           | event            | closed      | next          |
/// |-------------------|------------------|-------------|---------------|
/// | none              | join(c, t)       |             | open(c, t, t) |
/// | open(c, ..)       | join(c, t)       |             | open(c, t, t) |
/// | open(c1, s, ..)   | join(c2, t)      | (s, t)      | open(c2, t, t)|
/// | open(c, s, ..)    | leave(t)         | (s, t)      |               |
/// | open(c, s, ..)    | checkpoint(t)    |             | open(c, s, t) |
/// | none              | leave/checkpoint | ignored                     |
///
/// Events older than the open session's `last_seen_ts` were already applied
/// by an earlier run and are ignored.
pub fn apply(current: Option<&OpenVoiceSession>, event: &VoiceEvent) -> Option<Transition> {
    if let Some(session) = current {
        if event.occurred_at < session.last_seen_ts {
            return None;
        }
    }

    let opened = |channel_id| OpenVoiceSession {
        guild_id: event.guild_id,
        user_id: event.user_id,
        channel_id,
        start_ts: event.occurred_at,
        last_seen_ts: event.occurred_at,
    };
    let close = |session: &OpenVoiceSession| ClosedSession {
        session: session.clone(),
        end_ts: event.occurred_at,
    };

    match (current, event.kind) {
        (None, VoiceEventKind::Join { channel_id }) => Some(Transition {
            closed: None,
            next: Some(opened(channel_id)),
        }),
        // A repeated join restarts the session without recording the old one.
        (Some(session), VoiceEventKind::Join { channel_id }) if session.channel_id == channel_id => {
            Some(Transition {
                closed: None,
                next: Some(opened(channel_id)),
            })
        }
        (Some(session), VoiceEventKind::Join { channel_id }) => Some(Transition {
            closed: Some(close(session)),
            next: Some(opened(channel_id)),
        }),
        (Some(session), VoiceEventKind::Leave) => Some(Transition {
            closed: Some(close(session)),
            next: None,
        }),
        (Some(session), VoiceEventKind::Checkpoint) => Some(Transition {
            closed: None,
            next: Some(OpenVoiceSession {
                last_seen_ts: event.occurred_at,
                ..session.clone()
            }),
        }),
        (None, VoiceEventKind::Leave | VoiceEventKind::Checkpoint) => None,
    }
}

/// Stat row for a closed session. Negative durations are clamped to zero.
pub fn session_stat(
    session: &OpenVoiceSession,
    end_ts: NaiveDateTime,
    inferred: bool,
) -> NewVoiceSessionStat {
    NewVoiceSessionStat {
        guild_id: session.guild_id,
        channel_id: session.channel_id,
        user_id: session.user_id,
        start_ts: session.start_ts,
        end_ts,
        total_time_ms: (end_ts - session.start_ts).num_milliseconds().max(0),
        inferred,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TrackerSettings {
    pub backfill: Duration,
    /// Open sessions not seen for longer than this are closed by the sweep.
    pub max_session_gap: Duration,
    /// Closed sessions shorter than this are not recorded.
    pub min_session: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoiceSessionRun {
    pub events: usize,
    pub closed: usize,
    pub swept: usize,
    pub recorded: usize,
    pub checkpoint: Option<NaiveDateTime>,
}

pub struct VoiceSessionTracker<S> {
    ctx: JobContext<S>,
    settings: TrackerSettings,
}

impl<S: IngestStore> VoiceSessionTracker<S> {
    pub fn new(ctx: JobContext<S>, settings: TrackerSettings) -> Self {
        Self { ctx, settings }
    }

    pub fn run(&self) -> anyhow::Result<VoiceSessionRun> {
        let upper_bound = self.ctx.clock.now();

        let run = self.ctx.store.transaction(|tx| {
            let last_processed = tx.get_checkpoint(JOB_NAME)?.unwrap_or_else(zero_timestamp);
            let lower_bound = last_processed
                .checked_sub_signed(self.settings.backfill)
                .context("backfill window is out of range")?;

            info!(%lower_bound, %upper_bound, "aggregating voice channels");

            let events = tx
                .fetch_voice_events(lower_bound, upper_bound)?
                .into_iter()
                .map(VoiceEvent::try_from)
                .collect::<anyhow::Result<Vec<_>>>()
                .context("error decoding voice channel events")?;

            let mut run = VoiceSessionRun {
                events: events.len(),
                ..Default::default()
            };
            let max_processed = events.iter().map(|e| e.occurred_at).max();

            let mut per_user: BTreeMap<(u64, u64), Vec<VoiceEvent>> = BTreeMap::new();
            for event in events {
                per_user
                    .entry((event.guild_id, event.user_id))
                    .or_default()
                    .push(event);
            }

            for ((guild_id, user_id), mut events) in per_user {
                // Stable, so rows sharing a timestamp keep their insert order.
                events.sort_by_key(|e| e.occurred_at);
                self.replay_user(tx, guild_id, user_id, &events, &mut run)?;
            }

            self.sweep(tx, upper_bound, &mut run)?;

            run.checkpoint = max_processed.filter(|ts| *ts > last_processed);
            if let Some(ts) = run.checkpoint {
                tx.set_checkpoint(JOB_NAME, ts)?;
            }

            Ok(run)
        })?;

        info!(
            events = run.events,
            closed = run.closed,
            swept = run.swept,
            recorded = run.recorded,
            checkpoint = ?run.checkpoint,
            "aggregated voice channels"
        );
        Ok(run)
    }

    fn replay_user(
        &self,
        tx: &mut dyn IngestTx,
        guild_id: u64,
        user_id: u64,
        events: &[VoiceEvent],
        run: &mut VoiceSessionRun,
    ) -> anyhow::Result<()> {
        let mut current = tx.get_open_session(guild_id, user_id)?;
        let mut changed = false;

        for event in events {
            let transition = match apply(current.as_ref(), event) {
                Some(transition) => transition,
                None => {
                    debug!(
                        guild_id,
                        user_id,
                        kind = ?event.kind,
                        occurred_at = %event.occurred_at,
                        "ignoring voice event"
                    );
                    continue;
                }
            };
            if let Some(closed) = transition.closed {
                run.closed += 1;
                if self.record(tx, &closed.session, closed.end_ts, false)? {
                    run.recorded += 1;
                }
            }
            current = transition.next;
            changed = true;
        }

        if changed {
            match &current {
                Some(session) => tx.put_open_session(session)?,
                None => tx.delete_open_session(guild_id, user_id)?,
            }
        }
        Ok(())
    }

    /// Closes every open session, touched this run or not, whose last
    /// heartbeat is older than the allowed gap. The session ends at its last
    /// sighting rather than now.
    fn sweep(
        &self,
        tx: &mut dyn IngestTx,
        now: NaiveDateTime,
        run: &mut VoiceSessionRun,
    ) -> anyhow::Result<()> {
        for session in tx.list_open_sessions()? {
            if now - session.last_seen_ts <= self.settings.max_session_gap {
                continue;
            }
            debug!(
                guild_id = session.guild_id,
                user_id = session.user_id,
                last_seen_ts = %session.last_seen_ts,
                "closing stale voice session"
            );
            if self.record(tx, &session, session.last_seen_ts, true)? {
                run.recorded += 1;
            }
            tx.delete_open_session(session.guild_id, session.user_id)?;
            run.swept += 1;
        }
        Ok(())
    }

    fn record(
        &self,
        tx: &mut dyn IngestTx,
        session: &OpenVoiceSession,
        end_ts: NaiveDateTime,
        inferred: bool,
    ) -> anyhow::Result<bool> {
        let stat = session_stat(session, end_ts, inferred);
        if Duration::milliseconds(stat.total_time_ms) < self.settings.min_session {
            debug!(
                guild_id = stat.guild_id,
                user_id = stat.user_id,
                channel_id = stat.channel_id,
                total_time_ms = stat.total_time_ms,
                "skipping voice channel stat due to short duration"
            );
            return Ok(false);
        }

        let inserted = tx.insert_voice_stat(&stat)?;
        if !inserted {
            debug!(
                guild_id = stat.guild_id,
                user_id = stat.user_id,
                start_ts = %stat.start_ts,
                "voice channel stat already recorded"
            );
        }
        Ok(inserted)
    }
}
