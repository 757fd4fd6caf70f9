pub mod gateway;
pub mod pusher;

use std::{sync::Arc, time::Duration};

use crate::{database::IngestStore, scheduled::Scheduler};

use self::pusher::{IngestPusher, IngestRow};

/// Flushes `pusher` every `interval` so a quiet buffer still reaches the
/// database.
pub fn schedule_flush<S: IngestStore, R: IngestRow>(
    scheduler: &mut Scheduler,
    name: &'static str,
    interval: Duration,
    pusher: Arc<IngestPusher<S, R>>,
) {
    scheduler.every(name, interval, move || {
        let pusher = pusher.clone();
        async move {
            pusher.flush().await;
            Ok::<_, anyhow::Error>(())
        }
    });
}
