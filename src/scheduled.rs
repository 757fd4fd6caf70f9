//! Periodic job execution.
//!
//! Every job registered with [`Scheduler::every`] fires once right away and
//! then once per interval. A job never overlaps with itself: a tick that
//! lands while the previous run is still executing is dropped, and the job
//! runs again on the following tick.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::FutureExt;
use tokio::{
    sync::watch,
    task::{JoinHandle, JoinSet},
    time::{Instant, MissedTickBehavior},
};
use tracing_futures::Instrument;

/// Single-slot guard allowing one run of a job at a time.
#[derive(Clone, Default)]
pub struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit(self.0.clone()))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Held for the duration of a run, releases the [`RunGuard`] when dropped.
pub struct RunPermit(Arc<AtomicBool>);

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    slow_run_warning: Duration,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Scheduler {
    pub fn new(slow_run_warning: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            slow_run_warning,
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    pub fn every<F, Fut>(&mut self, name: &'static str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        info!(job = name, interval = ?interval, "scheduling job");
        let shutdown = self.shutdown.subscribe();
        self.tasks.spawn(run_periodically(
            name,
            interval,
            self.slow_run_warning,
            shutdown,
            job,
        ));
    }

    /// Stops firing new runs and waits for in-flight runs to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "scheduler task ended abnormally");
            }
        }
    }
}

async fn run_periodically<F, Fut>(
    name: &'static str,
    interval: Duration,
    slow_run_warning: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let guard = RunGuard::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let permit = match guard.try_acquire() {
                    Some(permit) => permit,
                    None => {
                        warn!(job = name, "previous run still in progress, skipping tick");
                        continue;
                    }
                };
                let run = execute(name, slow_run_warning, permit, job())
                    .instrument(info_span!("job", job = name));
                in_flight = Some(tokio::spawn(run));
            }
        }
    }

    if let Some(handle) = in_flight {
        if guard.is_running() {
            info!(job = name, "waiting for in-flight run to finish");
        }
        if let Err(e) = handle.await {
            error!(job = name, error = %e, "in-flight run ended abnormally");
        }
    }
}

async fn execute<Fut>(name: &'static str, slow_run_warning: Duration, _permit: RunPermit, run: Fut)
where
    Fut: Future<Output = anyhow::Result<()>>,
{
    let started = Instant::now();
    info!("starting {} job", name);

    let result = AssertUnwindSafe(run).catch_unwind().await;
    let duration = started.elapsed();

    match result {
        Ok(Ok(())) if duration > slow_run_warning => {
            warn!(duration = ?duration, "{} took too long to run", name)
        }
        Ok(Ok(())) => info!(duration = ?duration, "{} completed", name),
        Ok(Err(e)) => error!(duration = ?duration, error = ?e, "{} failed", name),
        Err(_) => error!(duration = ?duration, "{} panicked", name),
    }
}
