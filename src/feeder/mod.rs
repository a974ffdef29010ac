//! Producers that fill the buffer ring.
//!
//! A [`DataFeeder`] runs on its own thread and drives a [`BufferSource`]:
//!
//! 1. Park until the [`AcquisitionGate`] opens a new run (or the daemon is stopped).
//! 2. While that run is current, ask the source for buffers and put them in the ring.
//! 3. When the gate closes or moves on to a newer run, put one run-end buffer in
//!    the ring so the sorter can tell a finished run from a truncated one, and
//!    acknowledge it on the gate.
//!
//! Two sources exist: [`UdpDataSource`] relays buffers the front end sends over
//! UDP, and [`EventSimulator`] synthesises events when no hardware is attached.
//! Each source picks how the feeder reacts to a full ring ([`Backpressure`]).

pub mod simulator;
pub mod udp;

pub use simulator::EventSimulator;
pub use udp::UdpDataSource;

use crate::daemon::{DaemonControl, DaemonHandle};
use crate::data::event_buffer::fill_end_of_run;
use crate::data::{AcqStatistics, RingBuffer};
use crate::error::{AppResult, DaqError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

/// How often a parked feeder re-checks its daemon state.
const GATE_POLL: Duration = Duration::from_millis(100);

/// How long the run-end buffer may wait for a free slot.
pub const RUN_END_TIMEOUT: Duration = Duration::from_secs(1);

/// What a feeder does when the ring has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Drop the buffer at once. Used when the data source cannot be paused.
    Drop,
    /// Wait up to the given time for the sorter to free a slot, then drop.
    Wait(Duration),
}

/// A supplier of fixed-size event buffers.
pub trait BufferSource: Send {
    /// Fills `buffer` completely. Returns `Ok(false)` if nothing was available
    /// within the source's own timeout.
    fn next_buffer(&mut self, buffer: &mut [u8]) -> AppResult<bool>;

    /// Full-ring policy for this source.
    fn backpressure(&self) -> Backpressure;

    /// Called each time a run starts.
    fn begin_run(&mut self) {}
}

/// "Acquisition on" flag shared by the session and its feeder.
///
/// Every [`open`](Self::open) starts a new numbered run. The feeder acknowledges
/// the end of each run with [`run_ended`](Self::run_ended) once its run-end
/// buffer is queued, so closing and reopening the gate in quick succession still
/// ends the first run properly.
#[derive(Debug, Default)]
pub struct AcquisitionGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    running: bool,
    /// Number of the latest run; 0 before the first.
    run: u64,
    /// Latest run whose run-end buffer has been queued.
    ended: u64,
}

impl AcquisitionGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the gate for a new run and returns its number.
    pub fn open(&self) -> u64 {
        let mut state = self.lock();
        state.running = true;
        state.run += 1;
        self.changed.notify_all();
        state.run
    }

    /// Closes the gate and returns the number of the run it ended.
    pub fn close(&self) -> u64 {
        let mut state = self.lock();
        state.running = false;
        self.changed.notify_all();
        state.run
    }

    /// True while acquisition is on.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// True while `run` is the current run and the gate is open.
    pub fn is_running_run(&self, run: u64) -> bool {
        let state = self.lock();
        state.running && state.run == run
    }

    /// Waits up to `timeout` for a run newer than `last`. Returns its number.
    ///
    /// A run that was opened and closed again before the wait returns is still
    /// reported, so that it gets a run-end buffer.
    pub fn wait_for_run(&self, last: u64, timeout: Duration) -> Option<u64> {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.run <= last)
            .unwrap_or_else(PoisonError::into_inner);
        (state.run > last).then_some(state.run)
    }

    /// Records that the run-end buffer of `run` is queued.
    pub fn run_ended(&self, run: u64) {
        let mut state = self.lock();
        state.ended = state.ended.max(run);
        self.changed.notify_all();
    }

    /// Waits up to `timeout` for [`run_ended`](Self::run_ended) to cover `run`.
    pub fn wait_run_ended(&self, run: u64, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.ended < run)
            .unwrap_or_else(PoisonError::into_inner);
        state.ended >= run
    }
}

/// Moves buffers from a [`BufferSource`] into the ring.
pub struct DataFeeder<S> {
    source: S,
    ring: Arc<RingBuffer>,
    gate: Arc<AcquisitionGate>,
    statistics: Arc<AcqStatistics>,
    close_to_full: bool,
}

impl<S: BufferSource + 'static> DataFeeder<S> {
    /// Creates a feeder; nothing runs until [`spawn`](Self::spawn).
    pub fn new(
        source: S,
        ring: Arc<RingBuffer>,
        gate: Arc<AcquisitionGate>,
        statistics: Arc<AcqStatistics>,
    ) -> Self {
        Self {
            source,
            ring,
            gate,
            statistics,
            close_to_full: false,
        }
    }

    /// Starts the feeder thread.
    pub fn spawn(self, name: &str) -> AppResult<DaemonHandle> {
        Ok(DaemonHandle::spawn(name, move |control| self.run(&control))?)
    }

    fn run(mut self, control: &DaemonControl) {
        let span = info_span!("data_feeder");
        let _enter = span.enter();
        let mut buffer = vec![0u8; self.ring.buffer_size()];
        let mut last_run = 0;

        while control.check_state() {
            let Some(run) = self.gate.wait_for_run(last_run, GATE_POLL) else {
                continue;
            };
            if run > last_run + 1 {
                debug!(skipped = run - last_run - 1, "runs opened and closed while busy");
            }
            last_run = run;
            info!(run, "acquisition started");
            self.source.begin_run();

            while self.gate.is_running_run(run) && control.check_state() {
                match self.source.next_buffer(&mut buffer) {
                    Ok(true) => self.deliver(&buffer),
                    Ok(false) => {}
                    Err(e) if e.is_recoverable() => debug!(error = %e, "buffer skipped"),
                    Err(e) => {
                        warn!(error = %e, "data source failed");
                        control.wait_timeout(GATE_POLL);
                    }
                }
            }

            fill_end_of_run(&mut buffer);
            match self.ring.put_buffer_wait(&buffer, RUN_END_TIMEOUT) {
                Ok(()) => info!(run, "acquisition stopped, run-end buffer queued"),
                Err(e) if self.ring.is_null() => debug!(error = %e, "no ring for run-end buffer"),
                Err(e) => error!(run, error = %e, "could not queue run-end buffer"),
            }
            self.gate.run_ended(run);
        }
        debug!("data feeder exiting");
    }

    fn deliver(&mut self, buffer: &[u8]) {
        self.statistics.buffer_received();
        let result = match self.source.backpressure() {
            Backpressure::Drop => self.ring.put_buffer(buffer),
            Backpressure::Wait(timeout) => self.ring.put_buffer_wait(buffer, timeout),
        };
        match result {
            Ok(()) => {}
            Err(DaqError::RingFull { capacity }) => {
                self.statistics.buffer_dropped();
                if self.ring.is_null() {
                    debug!("no ring configured, buffer discarded");
                } else {
                    warn!(capacity, "ring full, buffer dropped");
                }
            }
            Err(e) => {
                self.statistics.buffer_dropped();
                error!(error = %e, "buffer rejected by ring");
            }
        }

        let close_to_full = !self.ring.is_null() && self.ring.is_close_to_full();
        if close_to_full && !self.close_to_full {
            warn!(
                used = self.ring.used_buffers(),
                capacity = self.ring.capacity(),
                "ring close to full, sorter is falling behind"
            );
        } else if !close_to_full && self.close_to_full {
            debug!("ring drained below threshold");
        }
        self.close_to_full = close_to_full;
    }
}
