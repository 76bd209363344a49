use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use alarmd_core::clock::Clock;
use alarmd_core::config::{SchedulerConfig, SchedulerMode};
use alarmd_core::error::LeaseError;
use alarmd_core::event::AlarmEvent;
use alarmd_core::lease::{LeaseProvider, NoopLeaseProvider};
use alarmd_core::store::AlarmStore;
use alarmd_duckdb::{DuckDbBackend, DuckDbLeaseProvider};

use crate::metrics::{ALARMS_DELIVERED, ALARM_DURATION, TICK_DURATION};

pub mod content;
pub mod trigger;

pub use trigger::{AlarmTrigger, TriggerOutcome};

/// Alarms of one batch processed at the same time.
pub const DELIVERY_CONCURRENCY: usize = 4;

/// Counts for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub sent: usize,
    /// Dropped without sending: event already started or recipient opted out.
    pub suppressed: usize,
    /// Another scheduler held the lease.
    pub lease_skipped: usize,
    pub failed: usize,
}

enum AlarmOutcome {
    Done(TriggerOutcome),
    LeaseHeld,
    Failed,
}

impl TickReport {
    fn record(&mut self, outcome: AlarmOutcome) {
        match outcome {
            AlarmOutcome::Done(TriggerOutcome::Sent) => self.sent += 1,
            AlarmOutcome::Done(_) => self.suppressed += 1,
            AlarmOutcome::LeaseHeld => self.lease_skipped += 1,
            AlarmOutcome::Failed => self.failed += 1,
        }
    }
}

/// Lease provider for `mode`: the shared DuckDB table in cluster mode, a
/// provider that always grants otherwise.
pub fn select_lease_provider(
    mode: SchedulerMode,
    db: Arc<DuckDbBackend>,
    clock: Arc<dyn Clock>,
    node_id: &str,
) -> Arc<dyn LeaseProvider> {
    match mode {
        SchedulerMode::Cluster => Arc::new(DuckDbLeaseProvider::new(db, clock, node_id)),
        SchedulerMode::Single | SchedulerMode::Disabled => Arc::new(NoopLeaseProvider),
    }
}

struct Worker {
    clock: Arc<dyn Clock>,
    store: Arc<dyn AlarmStore>,
    leases: Arc<dyn LeaseProvider>,
    trigger: AlarmTrigger,
    config: SchedulerConfig,
}

impl Worker {
    async fn tick(self: &Arc<Self>) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        match self.leases.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "purged expired alarm leases"),
            Err(err) => warn!(error = %err, "failed to purge expired alarm leases"),
        }

        match self
            .store
            .find_due(self.clock.now(), self.config.batch_size)
            .await
        {
            Ok(due) => {
                report.fetched = due.len();
                let mut results = stream::iter(due)
                    .map(|alarm| {
                        let worker = Arc::clone(self);
                        let key = alarm.lease_key();
                        let handle = tokio::spawn(async move { worker.process(alarm).await });
                        async move { (key, handle.await) }
                    })
                    .buffer_unordered(DELIVERY_CONCURRENCY);
                while let Some((key, joined)) = results.next().await {
                    match joined {
                        Ok(outcome) => report.record(outcome),
                        Err(err) => {
                            error!(key = %key, error = %err, "alarm task aborted");
                            // The task may have died holding the lease.
                            if let Err(release_err) = self.leases.release(&key).await {
                                warn!(key = %key, error = %release_err, "failed to release alarm lease");
                            }
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to query due alarms"),
        }

        metrics::histogram!(TICK_DURATION).record(started.elapsed().as_secs_f64());
        report
    }

    async fn process(&self, alarm: AlarmEvent) -> AlarmOutcome {
        let started = Instant::now();
        let key = alarm.lease_key();

        let outcome = match self.leases.acquire(&key, self.config.lease_ttl).await {
            Err(LeaseError::AlreadyHeld(_)) => {
                info!(alarm = %alarm, "alarm is being handled by another scheduler, skipping");
                AlarmOutcome::LeaseHeld
            }
            Err(err) => {
                error!(alarm = %alarm, error = %err, "failed to acquire alarm lease");
                AlarmOutcome::Failed
            }
            // The lease is kept on success and expires on its own.
            Ok(_lease) => match self.trigger.send_and_cleanup(&alarm).await {
                Ok(outcome) => {
                    if outcome == TriggerOutcome::Sent {
                        metrics::counter!(ALARMS_DELIVERED).increment(1);
                    }
                    AlarmOutcome::Done(outcome)
                }
                Err(err) => {
                    error!(alarm = %alarm, error = %err, "failed to process alarm, will retry");
                    if let Err(release_err) = self.leases.release(&key).await {
                        warn!(alarm = %alarm, error = %release_err, "failed to release alarm lease");
                    }
                    AlarmOutcome::Failed
                }
            },
        };

        metrics::histogram!(ALARM_DURATION).record(started.elapsed().as_secs_f64());
        outcome
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls the alarm store and delivers whatever is due.
pub struct AlarmScheduler {
    worker: Arc<Worker>,
    running: Mutex<Option<Running>>,
}

impl AlarmScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn AlarmStore>,
        leases: Arc<dyn LeaseProvider>,
        trigger: AlarmTrigger,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                clock,
                store,
                leases,
                trigger,
                config,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.worker.config.mode
    }

    /// Spawn the polling loop on the current tokio runtime. Does nothing in
    /// disabled mode or when the loop is already running.
    pub fn start(&self) {
        if self.worker.config.mode == SchedulerMode::Disabled {
            info!("alarm scheduler disabled");
            return;
        }
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.worker), token.clone()));
        *running = Some(Running { token, handle });
    }

    /// Cancel the polling loop. Alarms already in flight finish on their own.
    /// Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        let taken = self
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(running) = taken {
            running.token.cancel();
            info!("alarm scheduler stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run a single tick now, independent of the polling loop.
    pub async fn tick(&self) -> TickReport {
        self.worker.tick().await
    }
}

impl Drop for AlarmScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Sleep for `delay`; false when cancelled first.
async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn run_loop(worker: Arc<Worker>, token: CancellationToken) {
    let config = worker.config.clone();
    info!(
        mode = config.mode.as_str(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        batch_size = config.batch_size,
        "alarm scheduler started"
    );

    if pause(&token, jitter(config.initial_jitter_max)).await {
        let mut interval = tokio::time::interval(config.poll_interval.max(Duration::from_millis(1)));
        // A tick that comes due while a batch is still running is dropped.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let report = worker.tick().await;
            if report.fetched > 0 {
                debug!(?report, "alarm tick finished");
            }
            if !pause(&token, jitter(config.initial_jitter_max)).await {
                break;
            }
        }
    }
    info!("alarm scheduler stopped");
}
