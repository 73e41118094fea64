//! Time sources.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::providers::TimeSource;

/// Wall-clock time source, in milliseconds since the Unix epoch.
///
/// On error (system clock before epoch) this falls back to 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl TimeSource for SystemClock {
    async fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis() as u64
    }
}

#[derive(Debug)]
struct ManualState {
    forced: VecDeque<u64>,
    last: u64,
}

/// Deterministic time source for tests.
///
/// Each call to `now` returns the next forced timestamp if one is
/// queued, otherwise the previous value plus one. Forcing a timestamp
/// also rebases the counter, so a forced `0` makes the next unforced
/// call return `1`.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    /// A clock starting at 1.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A clock whose first unforced `now` returns `start + 1`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            state: Mutex::new(ManualState {
                forced: VecDeque::new(),
                last: start,
            }),
        }
    }

    /// Queues `timestamp` to be returned by the next call to `now`.
    pub fn set_next_timestamp(&self, timestamp: u64) {
        self.state.lock().forced.push_back(timestamp);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeSource for ManualClock {
    async fn now(&self) -> u64 {
        let mut state = self.state.lock();
        match state.forced.pop_front() {
            Some(ts) => {
                state.last = ts;
                ts
            }
            None => {
                state.last += 1;
                state.last
            }
        }
    }
}
