use crate::coordinator::Coordinator;
use crate::store::RecordStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Diagnostic counters for one coordinator. Nothing reads these for correctness.
#[derive(Default, Debug)]
pub struct ScanTelemetry {
    refills: AtomicU64,
    units_fetched: AtomicU64,
    units_granted: AtomicU64,
    locked_signals: AtomicU64,
    empty_signals: AtomicU64,
    rescans: AtomicU64,
    fetch_time_ns: AtomicU64,
    grant_time_ns: AtomicU64,
}

impl ScanTelemetry {
    pub fn record_refill(&self, fetched: usize, elapsed: Duration) {
        self.refills.fetch_add(1, Ordering::Relaxed);
        self.units_fetched
            .fetch_add(fetched as u64, Ordering::Relaxed);
        self.fetch_time_ns
            .fetch_add(duration_to_nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_grant(&self, elapsed: Duration) {
        self.units_granted.fetch_add(1, Ordering::Relaxed);
        self.grant_time_ns
            .fetch_add(duration_to_nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_locked(&self) {
        self.locked_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty(&self) {
        self.empty_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rescan(&self) {
        self.rescans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refills(&self) -> u64 {
        self.refills.load(Ordering::Relaxed)
    }

    pub fn units_granted(&self) -> u64 {
        self.units_granted.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            refills: self.refills.load(Ordering::Relaxed),
            units_fetched: self.units_fetched.load(Ordering::Relaxed),
            units_granted: self.units_granted.load(Ordering::Relaxed),
            locked_signals: self.locked_signals.load(Ordering::Relaxed),
            empty_signals: self.empty_signals.load(Ordering::Relaxed),
            rescans: self.rescans.load(Ordering::Relaxed),
            fetch_time: Duration::from_nanos(self.fetch_time_ns.load(Ordering::Relaxed)),
            grant_time: Duration::from_nanos(self.grant_time_ns.load(Ordering::Relaxed)),
        }
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u128::from(u64::MAX)) as u64
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub refills: u64,
    pub units_fetched: u64,
    pub units_granted: u64,
    pub locked_signals: u64,
    pub empty_signals: u64,
    pub rescans: u64,
    pub fetch_time: Duration,
    pub grant_time: Duration,
}

/// Spawns a background task that periodically logs grant throughput, cursor position and
/// wait-signal counts.
pub fn spawn_metrics_reporter<S: RecordStore>(
    coordinator: Arc<Coordinator<S>>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let telemetry = coordinator.telemetry();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "scanbroker::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let granted_delta = current_snapshot
                        .units_granted
                        .saturating_sub(last_snapshot.units_granted);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        granted_delta as f64 / elapsed
                    };
                    let progress = coordinator.progress();

                    tracing::info!(
                        target: "scanbroker::metrics",
                        throughput = format!("{throughput:.2}"),
                        granted = current_snapshot.units_granted,
                        refills = current_snapshot.refills,
                        offset = progress.offset,
                        total = progress.total,
                        queued = progress.queued,
                        passes = progress.passes,
                        locked_signals = current_snapshot.locked_signals,
                        empty_signals = current_snapshot.empty_signals,
                        fetch_ms = current_snapshot.fetch_time.as_millis() as u64,
                        "scan metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
