//! Buffered writes of raw gateway events into the ingest tables.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    database::{IngestStore, IngestTx},
    jobs::run_blocking,
    models::{NewIngestMessageEvent, NewIngestVoiceEvent},
};

/// A row type that can be batch-inserted into one of the ingest tables.
pub trait IngestRow: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn write_batch(tx: &mut dyn IngestTx, rows: &[Self]) -> anyhow::Result<usize>;
}

impl IngestRow for NewIngestMessageEvent {
    const KIND: &'static str = "message";

    fn write_batch(tx: &mut dyn IngestTx, rows: &[Self]) -> anyhow::Result<usize> {
        tx.insert_message_events(rows)
    }
}

impl IngestRow for NewIngestVoiceEvent {
    const KIND: &'static str = "voice_channel";

    fn write_batch(tx: &mut dyn IngestTx, rows: &[Self]) -> anyhow::Result<usize> {
        tx.insert_voice_events(rows)
    }
}

/// Collects rows in memory and writes them in one insert once `limit` rows
/// are pending or [`IngestPusher::flush`] is called.
///
/// Ingest is best effort: a batch that fails to write is logged and dropped.
pub struct IngestPusher<S, R> {
    store: Arc<S>,
    limit: usize,
    buffer: Mutex<Vec<R>>,
}

impl<S: IngestStore, R: IngestRow> IngestPusher<S, R> {
    pub fn new(store: Arc<S>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            store,
            limit,
            buffer: Mutex::new(Vec::with_capacity(limit)),
        }
    }

    pub async fn push(&self, row: R) {
        let full = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(row);
            buffer.len() >= self.limit
        };
        if full {
            self.flush().await;
        }
    }

    #[cfg(test)]
    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Writes everything buffered so far. Returns the number of rows written.
    pub async fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.buffer.lock().await);
        if batch.is_empty() {
            return 0;
        }

        let rows = batch.len();
        let store = self.store.clone();
        let result =
            run_blocking(move || store.transaction(|tx| R::write_batch(tx, &batch))).await;

        match result {
            Ok(written) => {
                debug!(kind = R::KIND, rows = written, "flushed ingest events");
                written
            }
            Err(e) => {
                error!(kind = R::KIND, rows, error = ?e, "failed to flush ingest events");
                0
            }
        }
    }
}
