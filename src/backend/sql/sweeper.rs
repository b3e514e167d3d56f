//! Background expiry and eviction for the relational backend.
//!
//! One task per backend runs every sweep, manual ones included, so sweeps
//! never overlap. It wakes on a fixed interval, on write triggers and on
//! manual requests. A trigger sweeps immediately unless a sweep started less
//! than `debounce` ago, in which case it waits out the rest of the window.
//! Triggers arriving meanwhile collapse into one pending run.

use super::clock::AccessClock;
use super::dialect::Statements;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use sqlx::AnyPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Rows removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Rows past their `expires`.
    pub expired: u64,
    /// Rows outside the `max` most recently accessed.
    pub evicted: u64,
}

/// One expiry and eviction pass, as run by the sweep task.
pub(crate) trait SweepJob: Send + Sync + 'static {
    fn sweep(&self) -> impl Future<Output = Result<SweepStats>> + Send;
}

/// The statements and bounds one sweep needs.
pub(crate) struct SweepPlan {
    pub(crate) pool: AnyPool,
    pub(crate) statements: Arc<Statements>,
    pub(crate) max: u64,
    pub(crate) clock: Arc<AccessClock>,
}

impl SweepPlan {
    /// Delete expired rows, then evict beyond `max`. Both policies run even
    /// if the first fails.
    pub(crate) async fn run(&self) -> Result<SweepStats> {
        let now = self.clock.now();
        let expired = sqlx::query(&self.statements.delete_expired)
            .bind(now)
            .execute(&self.pool)
            .await;

        let evicted = if self.max > 0 {
            let keep = i64::try_from(self.max).unwrap_or(i64::MAX);
            sqlx::query(&self.statements.evict_lru)
                .bind(keep)
                .execute(&self.pool)
                .await
                .map(|done| done.rows_affected())
        } else {
            Ok(0)
        };

        Ok(SweepStats {
            expired: expired?.rows_affected(),
            evicted: evicted?,
        })
    }
}

impl SweepJob for SweepPlan {
    fn sweep(&self) -> impl Future<Output = Result<SweepStats>> + Send {
        self.run()
    }
}

async fn run_logged<J: SweepJob>(job: &J) {
    match job.sweep().await {
        Ok(stats) if stats.expired > 0 || stats.evicted > 0 => debug!(
            "✓ SQL sweep removed {} expired, {} evicted",
            stats.expired, stats.evicted
        ),
        Ok(_) => {}
        Err(e) => error!("✗ SQL sweep failed: {}", e),
    }
}

type Reply = oneshot::Sender<Result<SweepStats>>;

enum Wake {
    Scheduled,
    Manual(Reply),
}

/// Handle to the sweep task.
///
/// Dropping the handle stops the task.
pub(crate) struct Sweeper {
    trigger: mpsc::Sender<()>,
    requests: mpsc::UnboundedSender<Reply>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    debounce: Duration,
}

impl Sweeper {
    /// Spawn the sweep task. A zero `interval` disables periodic sweeps and
    /// a zero `debounce` disables write triggers.
    pub(crate) fn spawn<J: SweepJob>(job: J, interval: Duration, debounce: Duration) -> Self {
        let (trigger, triggers) = mpsc::channel(1);
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            job,
            interval,
            debounce,
            triggers,
            requests_rx,
            shutdown_rx,
        ));

        Sweeper {
            trigger,
            requests,
            shutdown,
            handle: Mutex::new(Some(handle)),
            debounce,
        }
    }

    /// Request a sweep after a write. Never waits for it.
    pub(crate) fn schedule(&self) {
        if !self.debounce.is_zero() {
            // A full buffer already holds a pending trigger.
            let _ = self.trigger.try_send(());
        }
    }

    /// Run a sweep on the task, after any sweep already in progress, and
    /// wait for its result.
    ///
    /// # Errors
    /// Returns `Error::Destroyed` once the task has stopped, or the sweep's
    /// own error
    pub(crate) async fn sweep_now(&self) -> Result<SweepStats> {
        let (reply, result) = oneshot::channel();
        self.requests.send(reply).map_err(|_| Error::Destroyed)?;
        result.await.map_err(|_| Error::Destroyed)?
    }

    /// Stop the task and wait for an in-flight sweep to finish.
    pub(crate) async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("⚠ SQL sweeper task ended abnormally: {}", e);
            }
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run<J: SweepJob>(
    job: J,
    period: Duration,
    debounce: Duration,
    mut triggers: mpsc::Receiver<()>,
    mut requests: mpsc::UnboundedReceiver<Reply>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = (!period.is_zero()).then(|| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut last_started: Option<Instant> = None;

    loop {
        let wake = tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick(&mut interval) => Wake::Scheduled,
            Some(reply) = requests.recv() => Wake::Manual(reply),
            Some(()) = triggers.recv() => {
                let wait = last_started
                    .map(|started| debounce.saturating_sub(started.elapsed()))
                    .unwrap_or_default();
                if !wait.is_zero() {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Wake::Scheduled
            }
        };

        if *shutdown.borrow() {
            break;
        }
        match wake {
            Wake::Scheduled => {
                // This sweep covers every trigger received so far.
                while triggers.try_recv().is_ok() {}
                last_started = Some(Instant::now());
                run_logged(&job).await;
            }
            Wake::Manual(reply) => {
                let _ = reply.send(job.sweep().await);
            }
        }
    }

    debug!("✓ SQL sweeper stopped");
}
