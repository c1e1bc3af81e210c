//! Time-bucketed outcome counters for a single command.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::time::{Duration, Instant};

use crate::event::EventKind;

type Counts = [u64; EventKind::COUNT];

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Instant,
    counts: Counts,
}

/// Point-in-time aggregate of a [`RollingWindow`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Calls resolved inside the window, one per primary outcome
    /// (see [`EventKind::is_primary`]). Fallback outcomes are not requests.
    pub total_requests: u64,
    /// Calls whose primary outcome is an error. A failed fallback does not add
    /// to this, so it never exceeds `total_requests`.
    pub error_count: u64,
    counts: Counts,
}

impl HealthSnapshot {
    /// Number of events of one kind in the window.
    pub fn count(&self, kind: EventKind) -> u64 {
        self.counts[kind.index()]
    }

    /// Error share of the window as a whole percentage, zero when empty.
    pub fn error_percentage(&self) -> u64 {
        if self.total_requests == 0 {
            return 0;
        }
        self.error_count * 100 / self.total_requests
    }
}

/// Rolling window of fixed-width buckets.
///
/// Stale buckets are dropped whenever the window is touched, so an idle
/// command costs nothing.
pub struct RollingWindow {
    buckets: Mutex<SmallVec<[Bucket; 16]>>,
    window_size: Duration,
    bucket_size: Duration,
}

impl RollingWindow {
    /// Creates a window of `window_size` split into `bucket_count` buckets.
    pub fn new(window_size: Duration, bucket_count: usize) -> Self {
        let bucket_count = u32::try_from(bucket_count.max(1)).unwrap_or(u32::MAX);
        Self {
            buckets: Mutex::new(SmallVec::new()),
            window_size,
            bucket_size: window_size / bucket_count,
        }
    }

    /// Length of the trailing window.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Records one event now.
    pub fn record(&self, kind: EventKind) {
        self.record_at(kind, Instant::now());
    }

    /// Records one event at `now`.
    pub fn record_at(&self, kind: EventKind, now: Instant) {
        let mut buckets = self.buckets.lock();
        self.prune(&mut buckets, now);

        if let Some(bucket) = buckets.last_mut() {
            if now.saturating_duration_since(bucket.start) < self.bucket_size {
                bucket.counts[kind.index()] += 1;
                return;
            }
        }

        let mut counts = [0; EventKind::COUNT];
        counts[kind.index()] = 1;
        buckets.push(Bucket { start: now, counts });
    }

    /// Aggregates the live buckets.
    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// Aggregates the buckets that are live at `now`.
    pub fn snapshot_at(&self, now: Instant) -> HealthSnapshot {
        let mut buckets = self.buckets.lock();
        self.prune(&mut buckets, now);

        let mut snapshot = HealthSnapshot::default();
        for bucket in buckets.iter() {
            for kind in EventKind::ALL {
                let n = bucket.counts[kind.index()];
                snapshot.counts[kind.index()] += n;
                if !kind.is_primary() {
                    continue;
                }
                snapshot.total_requests += n;
                if kind.is_error() {
                    snapshot.error_count += n;
                }
            }
        }
        snapshot
    }

    /// Drops every bucket.
    pub fn reset(&self) {
        self.buckets.lock().clear();
    }

    fn prune(&self, buckets: &mut SmallVec<[Bucket; 16]>, now: Instant) {
        // Nothing can be stale this close to the clock's origin.
        let Some(cutoff) = now.checked_sub(self.window_size) else {
            return;
        };

        let stale = buckets
            .iter()
            .take_while(|bucket| bucket.start < cutoff)
            .count();
        if stale > 0 {
            buckets.drain(..stale);
        }
    }
}
