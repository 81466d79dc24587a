//! Runs several [`WorkerStub`]s against one coordinator.
//!
//! Each stub gets its own task. The first worker that fails (error or panic) is
//! recorded through the [`FatalErrorHandler`] and cancels its siblings. A worker
//! whose coordinator reports termination has run out of work and stops cleanly,
//! as does one stopped through the pool's cancellation token.

use super::stub::WorkerStub;
use crate::coordinator::ScanError;
use crate::runtime::fatal::FatalErrorHandler;
use crate::store::RecordStore;
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Records processed by each worker, indexed by worker id.
    pub per_worker: Vec<u64>,
}

impl PoolReport {
    pub fn processed(&self) -> u64 {
        self.per_worker.iter().sum()
    }
}

pub struct WorkerPool<S: RecordStore> {
    stubs: Vec<WorkerStub<S>>,
    shutdown: CancellationToken,
    fatal: FatalErrorHandler,
}

impl<S: RecordStore> WorkerPool<S> {
    pub fn new(stubs: Vec<WorkerStub<S>>) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            stubs,
            fatal: FatalErrorHandler::new(shutdown.clone()),
            shutdown,
        }
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Cancelling this token stops every worker at its next wait or pull.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Processes records on every stub until each finishes its limit or the scan
    /// terminates. Returns the first worker failure, if any.
    pub async fn run<F, Fut>(self, processor: F) -> Result<PoolReport>
    where
        F: Fn(usize, S::Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let processor = Arc::new(processor);
        let mut handles = Vec::with_capacity(self.stubs.len());

        for (worker_id, stub) in self.stubs.into_iter().enumerate() {
            let stub = stub.with_cancellation(self.shutdown.child_token());
            let processor = Arc::clone(&processor);
            let fatal = self.fatal.clone();

            handles.push(tokio::spawn(async move {
                let processed = AtomicU64::new(0);
                let result = AssertUnwindSafe(stub.for_each(|record| {
                    let processing = processor(worker_id, record);
                    let processed = &processed;
                    async move {
                        processing.await?;
                        processed.fetch_add(1, Ordering::Relaxed);
                        Ok::<(), anyhow::Error>(())
                    }
                }))
                .catch_unwind()
                .await;
                let processed = processed.load(Ordering::Relaxed);

                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) if is_clean_stop(&err) => {
                        tracing::debug!(
                            worker = worker_id,
                            processed,
                            reason = %err,
                            "worker stopped"
                        );
                    }
                    Ok(Err(err)) => {
                        tracing::error!(
                            worker = worker_id,
                            error = %err,
                            "worker task exited with error"
                        );
                        let context = format!("worker {worker_id} exited with error");
                        fatal.trigger(context.as_str(), err.context(context.clone()));
                    }
                    Err(panic_payload) => {
                        let panic_msg = panic_message(panic_payload.as_ref());
                        tracing::error!(
                            worker = worker_id,
                            panic = %panic_msg,
                            "worker task panicked"
                        );
                        let context = format!("worker {worker_id} panicked");
                        fatal.trigger(
                            context.as_str(),
                            anyhow!("worker {worker_id} panicked: {panic_msg}"),
                        );
                    }
                }
                processed
            }));
        }

        let mut report = PoolReport::default();
        for (worker_id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(processed) => report.per_worker.push(processed),
                Err(join_err) => {
                    report.per_worker.push(0);
                    let context = format!("worker {worker_id} task failed to join");
                    self.fatal
                        .trigger(context.as_str(), anyhow!("{context}: {join_err}"));
                }
            }
        }

        match self.fatal.error() {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

fn is_clean_stop(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ScanError>(),
        Some(ScanError::Terminated | ScanError::WorkerCancelled)
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
