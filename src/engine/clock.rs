//! ARRAYMETA - Fragment Timestamp Clock
//! Issues the millisecond timestamps that order metadata fragments.
//!
//! Fragments of one array are totally ordered by timestamp, so two
//! writes from the same process must never share one. The clock hands
//! out strictly increasing values even when several fragments are
//! written within the same wall-clock millisecond.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Timestamp;

/// Source of fragment timestamps, shared by every session of a `Context`.
pub trait Clock: Send + Sync {
    /// Current time, never earlier than any timestamp already issued.
    fn now_ms(&self) -> Timestamp;

    /// Issue a timestamp strictly greater than every previously issued one.
    fn next_timestamp(&self) -> Timestamp;
}

/// Wall-clock backed clock with a monotonic floor.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Timestamp {
        wall_ms().max(self.last.load(Ordering::Acquire))
    }

    fn next_timestamp(&self) -> Timestamp {
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = wall_ms().max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Manually driven clock for deterministic time-travel tests.
///
/// `next_timestamp` advances the clock by one tick past the
/// current time, so consecutive writes land on distinct timestamps.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Timestamp {
        self.now.load(Ordering::Acquire)
    }

    fn next_timestamp(&self) -> Timestamp {
        self.now.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Issues fragment timestamps and remembers the ones whose fragment is
/// not on disk yet.
///
/// A fragment stamped `t` becomes visible only once its file is renamed
/// into place, which happens after `t` is issued. Consolidation must not
/// claim a range that still has such a write in flight, or the write
/// would land inside an already consolidated range and stay hidden.
pub struct WriteTimestamps {
    clock: Arc<dyn Clock>,
    in_flight: Mutex<BTreeSet<Timestamp>>,
}

impl WriteTimestamps {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            in_flight: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Issue a timestamp for a fragment about to be written. It counts as
    /// in flight until the returned reservation is dropped.
    pub fn reserve(self: &Arc<Self>) -> TimestampReservation {
        let mut in_flight = self.lock();
        let timestamp = self.clock.next_timestamp();
        in_flight.insert(timestamp);
        TimestampReservation {
            owner: Arc::clone(self),
            timestamp,
        }
    }

    /// Highest timestamp at or below which every issued fragment is
    /// already on disk. Timestamps issued after this call are above it.
    pub fn durable_bound(&self) -> Timestamp {
        let in_flight = self.lock();
        let next = self.clock.next_timestamp();
        match in_flight.first() {
            Some(&oldest) => oldest.saturating_sub(1),
            None => next,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<Timestamp>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fragment timestamp that is in flight while this value lives.
pub struct TimestampReservation {
    owner: Arc<WriteTimestamps>,
    timestamp: Timestamp,
}

impl TimestampReservation {
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl Drop for TimestampReservation {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.timestamp);
    }
}

/// Get current time in milliseconds since Unix epoch.
///
/// Not a substitute for [`Clock::now_ms`]: after a burst of writes the
/// fragment clock can run ahead of the wall clock.
pub(crate) fn wall_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
