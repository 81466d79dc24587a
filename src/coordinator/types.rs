use crate::store::{HydrateOptions, UnitId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Answer to a single pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullSignal {
    /// The next identifier to process.
    Unit(UnitId),
    /// A refill is in flight; poll again shortly.
    Locked,
    /// The last refill found no new rows; poll again later.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The scan reached its end and the coordinator no longer serves pulls.
    Terminated,
    /// The worker's cancellation token fired while it was waiting.
    WorkerCancelled,
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Terminated => write!(f, "scan coordinator has terminated"),
            ScanError::WorkerCancelled => write!(f, "worker cancelled while waiting for units"),
        }
    }
}

impl std::error::Error for ScanError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A diagnostic line a worker forwards to the coordinator's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub worker: Option<String>,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            worker: None,
            message: message.into(),
        }
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }
}

/// What a worker learns from the coordinator once, at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Number of records a worker iterates over: the total at scan start.
    pub limit: u64,
    pub hydrate: HydrateOptions,
    pub locked_queue_wait_ms: u64,
    pub empty_queue_wait_ms: u64,
}

impl SessionInfo {
    pub fn locked_queue_wait(&self) -> Duration {
        Duration::from_millis(self.locked_queue_wait_ms)
    }

    pub fn empty_queue_wait(&self) -> Duration {
        Duration::from_millis(self.empty_queue_wait_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Scanning,
    Terminated,
}

/// Point-in-time view of the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub offset: u64,
    pub total: u64,
    pub queued: usize,
    pub passes: u64,
    pub refilling: bool,
}
