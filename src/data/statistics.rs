//! Running counters for an acquisition session.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the daemons of one session.
#[derive(Debug, Default)]
pub struct AcqStatistics {
    buffers_received: AtomicU64,
    buffers_dropped: AtomicU64,
    buffers_sorted: AtomicU64,
    events_sorted: AtomicU64,
    events_discarded: AtomicU64,
    packets_received: AtomicU64,
    packets_rejected: AtomicU64,
}

/// Point-in-time copy of [`AcqStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    /// Buffers the feeder obtained from its source.
    pub buffers_received: u64,
    /// Of those, buffers the feeder could not place in the ring.
    pub buffers_dropped: u64,
    /// Buffers drained and decoded by the sorter.
    pub buffers_sorted: u64,
    /// Events passed to the sort callback.
    pub events_sorted: u64,
    /// Truncated events dropped while decoding.
    pub events_discarded: u64,
    /// Control packets received from the front end.
    pub packets_received: u64,
    /// Control packets that failed to decode.
    pub packets_rejected: u64,
}

impl AcqStatistics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn buffer_received(&self) {
        self.buffers_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn buffer_dropped(&self) {
        self.buffers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn buffer_sorted(&self, events: usize, discarded: usize) {
        self.buffers_sorted.fetch_add(1, Ordering::Relaxed);
        self.events_sorted.fetch_add(events as u64, Ordering::Relaxed);
        self.events_discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
    }

    pub(crate) fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packet_rejected(&self) {
        self.packets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current values.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            buffers_received: self.buffers_received.load(Ordering::Relaxed),
            buffers_dropped: self.buffers_dropped.load(Ordering::Relaxed),
            buffers_sorted: self.buffers_sorted.load(Ordering::Relaxed),
            events_sorted: self.events_sorted.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_rejected: self.packets_rejected.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter, typically at the start of a run.
    pub fn reset(&self) {
        for counter in [
            &self.buffers_received,
            &self.buffers_dropped,
            &self.buffers_sorted,
            &self.events_sorted,
            &self.events_discarded,
            &self.packets_received,
            &self.packets_rejected,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
