use super::clock::{sleep_with_cancellation, Sleeper, TokioSleeper};
use super::source::UnitSource;
use crate::coordinator::{LogLevel, LogRecord, PullSignal, ScanError, SessionInfo};
use crate::store::{HydrateOptions, RecordStore};
use anyhow::{Context, Result};
use futures::{Stream, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long a worker backs off after each wait signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub locked: Duration,
    pub empty: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            locked: Duration::from_secs(1),
            empty: Duration::from_secs(30),
        }
    }
}

impl WaitPolicy {
    pub fn from_session(session: &SessionInfo) -> Self {
        Self {
            locked: session.locked_queue_wait(),
            empty: session.empty_queue_wait(),
        }
    }
}

/// Worker-side view of a scan: pulls ids from a [`UnitSource`] and hydrates them
/// from the worker's own store.
///
/// A stub iterates at most `limit` times, the total captured when the scan
/// opened. Records added mid-scan may be handed to some stub, but no single stub
/// goes past that bound.
pub struct WorkerStub<S: RecordStore> {
    source: Arc<dyn UnitSource>,
    store: Arc<S>,
    limit: u64,
    hydrate: HydrateOptions,
    waits: WaitPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancellation: Option<CancellationToken>,
    name: Option<String>,
}

impl<S: RecordStore> WorkerStub<S> {
    /// Fetches the session from the coordinator and builds a stub from it.
    pub async fn connect(source: Arc<dyn UnitSource>, store: Arc<S>) -> Result<Self> {
        let session = source
            .session()
            .await
            .context("failed to fetch scan session")?;
        Ok(Self::new(source, store, &session))
    }

    pub fn new(source: Arc<dyn UnitSource>, store: Arc<S>, session: &SessionInfo) -> Self {
        Self {
            source,
            store,
            limit: session.limit,
            hydrate: session.hydrate.clone(),
            waits: WaitPolicy::from_session(session),
            sleeper: Arc::new(TokioSleeper),
            cancellation: None,
            name: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_wait_policy(mut self, waits: WaitPolicy) -> Self {
        self.waits = waits;
        self
    }

    /// Interrupts backoff waits (and subsequent pulls) once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Name attached to forwarded log lines.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.waits
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Pulls until a unit is granted, sleeping on wait signals, then hydrates it.
    pub async fn next_record(&self) -> Result<S::Record> {
        loop {
            if self
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                return Err(ScanError::WorkerCancelled.into());
            }

            let signal = self.source.next_unit().await?;
            let delay = match signal {
                PullSignal::Unit(id) => {
                    return self
                        .store
                        .find_by_id(id, &self.hydrate)
                        .await
                        .with_context(|| format!("failed to hydrate unit {id}"));
                }
                PullSignal::Locked => self.waits.locked,
                PullSignal::Empty => self.waits.empty,
            };

            tracing::trace!(
                worker = self.name.as_deref().unwrap_or("anonymous"),
                ?signal,
                delay_ms = delay.as_millis() as u64,
                "no unit available; backing off"
            );
            sleep_with_cancellation(self.sleeper.as_ref(), delay, self.cancellation.as_ref())
                .await?;
        }
    }

    /// Lazy stream of exactly `limit` hydrated records.
    ///
    /// Nothing is pulled until the stream is polled, and the stream ends after
    /// `limit` records or on the first error.
    pub fn records(&self) -> impl Stream<Item = Result<S::Record>> + '_ {
        futures::stream::try_unfold(0u64, move |yielded| async move {
            if yielded >= self.limit {
                return Ok(None);
            }
            let record = self.next_record().await?;
            Ok(Some((record, yielded + 1)))
        })
    }

    /// Drives [`records`](Self::records) through `processor`, returning how many
    /// records were processed.
    pub async fn for_each<F, Fut>(&self, mut processor: F) -> Result<u64>
    where
        F: FnMut(S::Record) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut records = std::pin::pin!(self.records());
        let mut processed = 0u64;
        while let Some(record) = records.try_next().await? {
            processor(record).await.context("record processor failed")?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Forwards a diagnostic line to the coordinator's log.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        let mut record = LogRecord::new(level, message);
        if let Some(name) = &self.name {
            record = record.with_worker(name.clone());
        }
        self.source.log(record).await
    }
}
