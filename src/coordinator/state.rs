use super::types::{ScanPhase, ScanProgress};
use crate::store::UnitId;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Everything the refill algorithm mutates, kept behind one mutex. The
/// `refilling` flag is the refill lock: it is checked and set while the mutex
/// is held, and store queries run with the mutex released.
#[derive(Debug, Default)]
pub(super) struct ScanState {
    pub(super) queue: VecDeque<UnitId>,
    pub(super) offset: u64,
    pub(super) total: u64,
    pub(super) passes: u64,
    pub(super) refilling: bool,
    pub(super) terminated: bool,
}

impl ScanState {
    pub(super) fn with_total(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub(super) fn progress(&self) -> ScanProgress {
        ScanProgress {
            phase: if self.terminated {
                ScanPhase::Terminated
            } else {
                ScanPhase::Scanning
            },
            offset: self.offset,
            total: self.total,
            queued: self.queue.len(),
            passes: self.passes,
            refilling: self.refilling,
        }
    }
}

pub(super) fn lock_state(state: &Mutex<ScanState>) -> MutexGuard<'_, ScanState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the refill lock when dropped, so a failing or cancelled refill never
/// leaves the coordinator stuck answering `Locked`.
pub(super) struct RefillGuard<'a> {
    state: &'a Mutex<ScanState>,
}

impl<'a> RefillGuard<'a> {
    /// Must be created while holding the state lock with `refilling` already set.
    pub(super) fn new(state: &'a Mutex<ScanState>) -> Self {
        Self { state }
    }
}

impl Drop for RefillGuard<'_> {
    fn drop(&mut self) {
        lock_state(self.state).refilling = false;
    }
}
