use super::hook::{CompletionHook, ScanSummary};
use super::state::{lock_state, RefillGuard, ScanState};
use super::types::{LogLevel, LogRecord, PullSignal, ScanError, ScanProgress, SessionInfo};
use crate::runtime::config::ScanConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::ScanTelemetry;
use crate::store::{Identified, RecordStore, UnitId};
use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

enum RefillOutcome {
    Granted(Option<UnitId>),
    Exhausted(ScanSummary),
}

/// Owns the scan cursor and hands out unit identifiers one pull at a time.
///
/// Pulls never block on each other: while one caller refills the queue every other
/// caller is answered with [`PullSignal::Locked`].
pub struct Coordinator<S: RecordStore> {
    store: Arc<S>,
    config: ScanConfig,
    limit: u64,
    state: Mutex<ScanState>,
    completion_hook: Mutex<Option<CompletionHook>>,
    telemetry: Arc<ScanTelemetry>,
    termination: CancellationToken,
    fatal: FatalErrorHandler,
}

impl<S: RecordStore> Coordinator<S> {
    /// Counts the matching rows and prepares an empty queue at offset 0.
    pub async fn open(store: Arc<S>, config: ScanConfig) -> Result<Self> {
        let total = store
            .count(config.descriptor().conditions.as_deref())
            .await
            .context("initial count query failed")?;

        tracing::info!(
            total,
            queue_size = ?config.queue_size(),
            rescan = config.rescan_when_complete(),
            vigilant = config.vigilant(),
            "scan opened"
        );

        let termination = CancellationToken::new();
        Ok(Self {
            store,
            config,
            limit: total,
            state: Mutex::new(ScanState::with_total(total)),
            completion_hook: Mutex::new(None),
            telemetry: Arc::new(ScanTelemetry::default()),
            fatal: FatalErrorHandler::new(termination.clone()),
            termination,
        })
    }

    /// Registers the callback run once when the scan terminates.
    pub fn with_completion_hook(mut self, hook: CompletionHook) -> Self {
        self.completion_hook = Mutex::new(Some(hook));
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn telemetry(&self) -> Arc<ScanTelemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Token cancelled the moment the scan terminates (successfully or not).
    pub fn termination(&self) -> CancellationToken {
        self.termination.clone()
    }

    pub fn is_terminated(&self) -> bool {
        lock_state(&self.state).terminated
    }

    /// Failure raised by the completion hook, if any. Pulls never carry it.
    pub fn fatal_error(&self) -> Option<anyhow::Error> {
        self.fatal.error()
    }

    pub fn progress(&self) -> ScanProgress {
        lock_state(&self.state).progress()
    }

    pub fn session(&self) -> SessionInfo {
        SessionInfo {
            limit: self.limit,
            hydrate: self.config.descriptor().hydrate_options(),
            locked_queue_wait_ms: duration_to_millis(self.config.locked_queue_wait()),
            empty_queue_wait_ms: duration_to_millis(self.config.empty_queue_wait()),
        }
    }

    /// Hands out the next unit id, or a wait signal.
    pub async fn next_unit(&self) -> Result<PullSignal> {
        let started = Instant::now();

        let guard = {
            let mut state = lock_state(&self.state);
            if state.terminated {
                return Err(ScanError::Terminated.into());
            }
            if state.refilling {
                self.telemetry.record_locked();
                return Ok(PullSignal::Locked);
            }
            if let Some(id) = state.queue.pop_front() {
                self.telemetry.record_grant(started.elapsed());
                return Ok(PullSignal::Unit(id));
            }
            state.refilling = true;
            RefillGuard::new(&self.state)
        };

        let outcome = self.refill().await;
        drop(guard);

        match outcome? {
            RefillOutcome::Granted(Some(id)) => {
                self.telemetry.record_grant(started.elapsed());
                Ok(PullSignal::Unit(id))
            }
            RefillOutcome::Granted(None) => {
                self.telemetry.record_empty();
                Ok(PullSignal::Empty)
            }
            RefillOutcome::Exhausted(summary) => self.complete(summary).await,
        }
    }

    /// Forwards a worker's diagnostic line to the coordinator log.
    pub fn log(&self, record: &LogRecord) {
        let worker = record.worker.as_deref().unwrap_or("anonymous");
        let message = record.message.as_str();
        match record.level {
            LogLevel::Trace => tracing::trace!(target: "scanbroker::worker", worker, "{message}"),
            LogLevel::Debug => tracing::debug!(target: "scanbroker::worker", worker, "{message}"),
            LogLevel::Info => tracing::info!(target: "scanbroker::worker", worker, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "scanbroker::worker", worker, "{message}"),
            LogLevel::Error => tracing::error!(target: "scanbroker::worker", worker, "{message}"),
        }
    }

    /// Runs with the refill lock held. Reads and writes the state only in short
    /// critical sections; store queries run unlocked.
    async fn refill(&self) -> Result<RefillOutcome> {
        let (offset, total) = {
            let state = lock_state(&self.state);
            (state.offset, state.total)
        };

        let mut rescanned = false;
        let (offset, total) = if offset == 0 {
            (0, self.count_matching().await?)
        } else if offset >= total {
            if self.config.rescan_when_complete() {
                let recounted = self.count_matching().await?;
                tracing::info!(
                    previous_total = total,
                    total = recounted,
                    "scan pass complete; rescanning from offset 0"
                );
                rescanned = true;
                (0, recounted)
            } else if self.config.vigilant() {
                let recounted = self.count_matching().await?;
                if offset >= recounted {
                    return Ok(self.exhaust(recounted));
                }
                tracing::info!(
                    offset,
                    previous_total = total,
                    total = recounted,
                    "vigilant recount found new rows"
                );
                (offset, recounted)
            } else {
                return Ok(self.exhaust(total));
            }
        } else {
            (offset, total)
        };

        {
            let mut state = lock_state(&self.state);
            state.total = total;
            if rescanned {
                state.offset = 0;
                state.passes = state.passes.saturating_add(1);
                self.telemetry.record_rescan();
            }
            if self.config.compact_queue_before_refill() {
                state.queue.shrink_to_fit();
            }
        }

        let limit = self.page_size(total);
        if limit == 0 {
            return Ok(RefillOutcome::Granted(None));
        }

        let query = self.config.descriptor().find_query(limit, offset);
        let fetch_started = Instant::now();
        let ids: Vec<UnitId> = self
            .store
            .find(&query)
            .await
            .with_context(|| format!("find query failed at offset {offset}"))?
            .iter()
            .map(Identified::unit_id)
            .collect();
        self.telemetry
            .record_refill(ids.len(), fetch_started.elapsed());

        tracing::debug!(
            offset,
            limit,
            fetched = ids.len(),
            total,
            "refilled unit queue"
        );

        let granted = {
            let mut state = lock_state(&self.state);
            state.offset = state.offset.saturating_add(ids.len() as u64);
            state.queue.extend(ids);
            state.queue.pop_front()
        };
        Ok(RefillOutcome::Granted(granted))
    }

    async fn count_matching(&self) -> Result<u64> {
        self.store
            .count(self.config.descriptor().conditions.as_deref())
            .await
            .context("count query failed")
    }

    fn page_size(&self, total: u64) -> usize {
        self.config
            .queue_size()
            .unwrap_or_else(|| usize::try_from(total).unwrap_or(usize::MAX))
    }

    fn exhaust(&self, total: u64) -> RefillOutcome {
        let mut state = lock_state(&self.state);
        state.total = total;
        state.terminated = true;
        RefillOutcome::Exhausted(ScanSummary {
            total,
            offset: state.offset,
            passes: state.passes,
            telemetry: self.telemetry.snapshot(),
        })
    }

    async fn complete(&self, summary: ScanSummary) -> Result<PullSignal> {
        tracing::info!(
            total = summary.total,
            offset = summary.offset,
            passes = summary.passes,
            granted = summary.telemetry.units_granted,
            refills = summary.telemetry.refills,
            "scan exhausted; terminating coordinator"
        );

        let hook = self
            .completion_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let fatal = self.fatal.clone();
        let termination = self.termination.clone();

        // Detached so the scan still terminates if the pulling caller goes away.
        let completion = tokio::spawn(async move {
            let outcome = match hook {
                Some(hook) => AssertUnwindSafe(hook(summary)).catch_unwind().await,
                None => Ok(Ok(())),
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    fatal.trigger("completion hook", err.context("scan completion hook failed"));
                }
                Err(_) => {
                    fatal.trigger("completion hook", anyhow!("scan completion hook panicked"));
                }
            }
            termination.cancel();
        });
        if let Err(err) = completion.await {
            tracing::warn!(error = %err, "completion task did not finish");
        }

        // Hook failures belong to the supervisor; workers only see termination.
        Err(ScanError::Terminated.into())
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
