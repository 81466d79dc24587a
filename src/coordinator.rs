//! Coordinator module split across focused submodules:
//! - `scan`: the coordinator itself and its refill algorithm
//! - `state`: the mutex-guarded cursor record and the refill lock guard
//! - `hook`: the optional completion callback
//! - `types`: pull signals, errors, and the values exchanged with workers
//! - `tests`: coordinator unit tests

mod hook;
mod scan;
mod state;
mod types;


pub use hook::{completion_hook, CompletionHook, ScanSummary};
pub use scan::Coordinator;
pub use types::{
    LogLevel, LogRecord, PullSignal, ScanError, ScanPhase, ScanProgress, SessionInfo,
};
