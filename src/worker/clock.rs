//! Sleep abstraction used by worker backoff so waits can be observed in tests
//! without real delays.

use crate::coordinator::ScanError;
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::yield_now;
use tokio_util::sync::CancellationToken;

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Records every requested delay and returns after a single yield.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        Box::pin(yield_now())
    }
}

pub(super) async fn sleep_with_cancellation(
    sleeper: &dyn Sleeper,
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if let Some(token) = cancellation {
        if token.is_cancelled() {
            return Err(ScanError::WorkerCancelled.into());
        }
        tokio::select! {
            _ = token.cancelled() => Err(ScanError::WorkerCancelled.into()),
            _ = sleeper.sleep(delay) => Ok(()),
        }
    } else {
        sleeper.sleep(delay).await;
        Ok(())
    }
}
