//! Destinations for values reported by the front end.
//!
//! The receive daemon forwards decoded scaler and counter packets to these traits,
//! so the state store that keeps them (and whatever displays them) stays outside
//! the acquisition core.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// Receives decoded scaler packets.
pub trait ScalerSink: Send + Sync {
    /// Called with the values of one scaler packet, in channel order.
    fn scalers_received(&self, values: &[i32]);
}

/// Receives decoded counter packets.
pub trait CounterSink: Send + Sync {
    /// Called with the values of one counter packet.
    fn counters_received(&self, values: &[i32]);
}

/// One scaler readout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalerReading {
    /// Scaler values in channel order.
    pub values: Vec<i32>,
    /// When the packet was received.
    pub received_at: DateTime<Utc>,
}

/// Keeps the most recent scaler readout.
#[derive(Debug, Default, Clone)]
pub struct ScalerStore(Arc<Mutex<Option<ScalerReading>>>);

impl ScalerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent readout, if any arrived.
    pub fn latest(&self) -> Option<ScalerReading> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forgets the stored readout.
    pub fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl ScalerSink for ScalerStore {
    fn scalers_received(&self, values: &[i32]) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(ScalerReading {
            values: values.to_vec(),
            received_at: Utc::now(),
        });
    }
}

/// Fans counter packets out to any number of subscribers.
///
/// Slow subscribers lose the oldest lists rather than blocking the receive daemon.
#[derive(Debug, Clone)]
pub struct CounterBroadcast {
    sender: broadcast::Sender<Arc<[i32]>>,
}

impl CounterBroadcast {
    /// Creates a broadcast retaining up to `capacity` unread lists per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[i32]>> {
        self.sender.subscribe()
    }
}

impl CounterSink for CounterBroadcast {
    fn counters_received(&self, values: &[i32]) {
        // No subscribers is not an error for the front end.
        let _ = self.sender.send(Arc::from(values));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaler_store_keeps_latest() {
        let store = ScalerStore::new();
        assert!(store.latest().is_none());
        store.scalers_received(&[1, 2]);
        store.scalers_received(&[3, 4, 5]);
        assert_eq!(store.latest().unwrap().values, vec![3, 4, 5]);
        store.clear();
        assert!(store.latest().is_none());
    }

    #[test]
    fn counter_broadcast_reaches_every_subscriber() {
        let broadcast = CounterBroadcast::new(4);
        let mut a = broadcast.subscribe();
        let mut b = broadcast.subscribe();
        broadcast.counters_received(&[7, 8]);
        assert_eq!(&*a.try_recv().unwrap(), &[7, 8]);
        assert_eq!(&*b.try_recv().unwrap(), &[7, 8]);
    }

    #[test]
    fn counter_broadcast_without_subscribers_is_silent() {
        CounterBroadcast::new(1).counters_received(&[1]);
    }
}
