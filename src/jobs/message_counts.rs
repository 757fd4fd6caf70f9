//! Rolls `ingest_message_events` into `guild_message_counts_hour`.
//!
//! Each run re-reads a trailing backfill margin before the checkpoint so
//! events committed slightly out of order are still counted. Counts are
//! replaced rather than incremented, which keeps overlapping windows from
//! double counting.

use anyhow::Context;
use chrono::{Duration, NaiveDateTime};

use super::{zero_timestamp, JobContext};
use crate::{database::IngestStore, models::HourlyMessageCount};

pub const JOB_NAME: &str = "guild_message_counts_hour";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageCountRun {
    pub lower_bound: NaiveDateTime,
    pub upper_bound: NaiveDateTime,
    pub groups: usize,
    /// New checkpoint, if the run advanced it.
    pub checkpoint: Option<NaiveDateTime>,
}

pub struct MessageCountAggregator<S> {
    ctx: JobContext<S>,
    backfill: Duration,
}

impl<S: IngestStore> MessageCountAggregator<S> {
    pub fn new(ctx: JobContext<S>, backfill: Duration) -> Self {
        Self { ctx, backfill }
    }

    pub fn run(&self) -> anyhow::Result<MessageCountRun> {
        let upper_bound = self.ctx.clock.now();

        let run = self.ctx.store.transaction(|tx| {
            let last_processed = tx.get_checkpoint(JOB_NAME)?.unwrap_or_else(zero_timestamp);
            let lower_bound = last_processed
                .checked_sub_signed(self.backfill)
                .context("backfill window is out of range")?;

            info!(%lower_bound, %upper_bound, "aggregating message counts");

            let groups = tx.group_message_counts(lower_bound, upper_bound)?;

            let mut max_processed = None;
            for group in &groups {
                tx.upsert_message_count(&HourlyMessageCount::from(group))?;
                max_processed = max_processed.max(Some(group.max_ts));
            }

            // No events leaves the checkpoint where it is, so the backfill
            // margin never drifts past unseen time.
            let checkpoint = max_processed.filter(|ts| *ts > last_processed);
            if let Some(ts) = checkpoint {
                tx.set_checkpoint(JOB_NAME, ts)?;
            }

            Ok(MessageCountRun {
                lower_bound,
                upper_bound,
                groups: groups.len(),
                checkpoint,
            })
        })?;

        info!(
            groups = run.groups,
            checkpoint = ?run.checkpoint,
            "aggregated message counts"
        );
        Ok(run)
    }
}
