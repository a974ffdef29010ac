//! Synthetic event source for running without hardware.
//!
//! Every event carries all `signals` parameters, each a uniform random value
//! below `max_value`. Buffers are filled with whole events and padded; an
//! event that no longer fits is kept and opens the next buffer.

use super::{Backpressure, BufferSource};
use crate::config::SimulatorConfig;
use crate::data::event_buffer::EventBufferWriter;
use crate::error::{AppResult, DaqError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;
use std::time::Duration;

/// How long a generated buffer may wait for ring space before it is dropped.
pub(crate) const RING_WAIT: Duration = Duration::from_millis(100);

/// Generates random fixed-width events.
#[derive(Debug)]
pub struct EventSimulator {
    signals: u16,
    max_value: u16,
    interval: Duration,
    rng: StdRng,
    pending: Vec<(u16, u16)>,
    events_generated: u64,
}

impl EventSimulator {
    /// Creates a simulator. The same seed always yields the same stream.
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            signals: u16::try_from(config.signals).unwrap_or(u16::MAX),
            max_value: config.max_value.max(1),
            interval: Duration::from_millis(config.buffer_interval_ms),
            rng: StdRng::seed_from_u64(config.seed),
            pending: Vec::with_capacity(config.signals),
            events_generated: 0,
        }
    }

    /// Events generated so far, including one still waiting for the next buffer.
    pub fn events_generated(&self) -> u64 {
        self.events_generated
    }

    fn generate(&mut self) {
        self.pending.clear();
        for index in 0..self.signals {
            let value = self.rng.gen_range(0..self.max_value);
            self.pending.push((index, value));
        }
        self.events_generated += 1;
    }
}

impl BufferSource for EventSimulator {
    fn next_buffer(&mut self, buffer: &mut [u8]) -> AppResult<bool> {
        let needed = EventBufferWriter::event_size(usize::from(self.signals));
        if needed > buffer.len() {
            return Err(DaqError::Argument(format!(
                "buffer of {} bytes cannot hold an event of {} bytes",
                buffer.len(),
                needed
            )));
        }

        let mut writer = EventBufferWriter::new(buffer);
        loop {
            if self.pending.is_empty() {
                self.generate();
            }
            if !writer.push_event(&self.pending) {
                break;
            }
            self.pending.clear();
        }
        writer.finish(false);

        if !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
        Ok(true)
    }

    fn backpressure(&self) -> Backpressure {
        Backpressure::Wait(RING_WAIT)
    }
}
