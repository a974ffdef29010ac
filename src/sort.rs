//! Consumer side of the buffer ring.
//!
//! The [`SortDaemon`] drains buffers, decodes their events into one reusable
//! parameter array and hands each event to an [`EventSorter`]. The array is
//! zeroed before every event, so a parameter absent from an event reads as 0.
//! Buffers still queued when the daemon is stopped are sorted before it exits.

use crate::daemon::{DaemonControl, DaemonHandle};
use crate::data::event_buffer::parse_buffer;
use crate::data::{AcqStatistics, RingBuffer};
use crate::error::AppResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

/// Receives decoded events.
pub trait EventSorter: Send {
    /// Called once per complete event. Index `i` holds parameter `i`.
    fn sort_event(&mut self, parameters: &[i32]);

    /// Called after the last buffer of a run has been sorted.
    fn end_of_run(&mut self) {}
}

impl<F> EventSorter for F
where
    F: FnMut(&[i32]) + Send,
{
    fn sort_event(&mut self, parameters: &[i32]) {
        self(parameters)
    }
}

/// Drains the ring and feeds an [`EventSorter`].
pub struct SortDaemon<S> {
    sorter: S,
    ring: Arc<RingBuffer>,
    statistics: Arc<AcqStatistics>,
    parameters: usize,
    poll_interval: Duration,
}

impl<S: EventSorter + 'static> SortDaemon<S> {
    /// Creates a daemon decoding events of up to `parameters` parameters.
    pub fn new(
        sorter: S,
        ring: Arc<RingBuffer>,
        statistics: Arc<AcqStatistics>,
        parameters: usize,
    ) -> Self {
        Self {
            sorter,
            ring,
            statistics,
            parameters,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Upper bound on each wait for a buffer.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Starts the sort loop on its own thread.
    pub fn spawn(self) -> AppResult<DaemonHandle> {
        Ok(DaemonHandle::spawn("sort-daemon", move |control| {
            self.run(&control)
        })?)
    }

    fn run(mut self, control: &DaemonControl) {
        let span = info_span!("sort_daemon", parameters = self.parameters);
        let _enter = span.enter();
        let mut buffer = vec![0u8; self.ring.buffer_size()];
        let mut parameters = vec![0i32; self.parameters];

        while control.check_state() {
            match self.ring.get_buffer_timeout(&mut buffer, self.poll_interval) {
                Ok(true) => self.sort_buffer(&buffer, &mut parameters),
                Ok(false) => {
                    if self.ring.is_null() {
                        control.wait_timeout(self.poll_interval);
                    }
                }
                Err(e) => {
                    error!(error = %e, "could not take buffer from ring");
                    control.wait_timeout(self.poll_interval);
                }
            }
        }

        // Sort whatever the feeder queued before it stopped.
        while let Ok(true) = self.ring.get_buffer_timeout(&mut buffer, Duration::ZERO) {
            self.sort_buffer(&buffer, &mut parameters);
        }
        debug!("sort daemon exiting");
    }

    fn sort_buffer(&mut self, buffer: &[u8], parameters: &mut [i32]) {
        let sorter = &mut self.sorter;
        let summary = parse_buffer(buffer, parameters, |event| sorter.sort_event(event));
        self.statistics
            .buffer_sorted(summary.events, summary.discarded_events);

        if summary.invalid_words > 0 {
            warn!(invalid = summary.invalid_words, "buffer contained invalid words");
        }
        if summary.discarded_events > 0 {
            debug!(discarded = summary.discarded_events, "partial event discarded");
        }
        if summary.end_of_run {
            info!("end of run reached");
            self.sorter.end_of_run();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::event_buffer::{fill_end_of_run, EventBufferWriter};
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct Collected {
        events: Vec<Vec<i32>>,
        runs_ended: usize,
    }

    struct Collector(Arc<Mutex<Collected>>);

    impl EventSorter for Collector {
        fn sort_event(&mut self, parameters: &[i32]) {
            self.0.lock().unwrap().events.push(parameters.to_vec());
        }

        fn end_of_run(&mut self) {
            self.0.lock().unwrap().runs_ended += 1;
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn events_reach_sorter_with_missing_parameters_zeroed() {
        let ring = Arc::new(RingBuffer::create(4, 32, false).unwrap());
        let stats = Arc::new(AcqStatistics::new());
        let collected = Arc::new(Mutex::new(Collected::default()));

        let mut buffer = [0u8; 32];
        let mut writer = EventBufferWriter::new(&mut buffer);
        assert!(writer.push_event(&[(0, 5), (2, 7)]));
        assert!(writer.push_event(&[(1, 9)]));
        writer.finish(false);
        ring.put_buffer(&buffer).unwrap();
        fill_end_of_run(&mut buffer);
        ring.put_buffer(&buffer).unwrap();

        let handle = SortDaemon::new(
            Collector(Arc::clone(&collected)),
            Arc::clone(&ring),
            Arc::clone(&stats),
            3,
        )
        .with_poll_interval(Duration::from_millis(10))
        .spawn()
        .unwrap();

        wait_for(|| collected.lock().unwrap().runs_ended == 1);
        handle.stop_and_join();

        let collected = collected.lock().unwrap();
        assert_eq!(collected.events, vec![vec![5, 0, 7], vec![0, 9, 0]]);
        assert_eq!(collected.runs_ended, 1);
        let snap = stats.snapshot();
        assert_eq!(snap.buffers_sorted, 2);
        assert_eq!(snap.events_sorted, 2);
    }

    #[test]
    fn closure_sorter_counts_events() {
        let ring = Arc::new(RingBuffer::create(2, 16, false).unwrap());
        let stats = Arc::new(AcqStatistics::new());
        let mut buffer = [0u8; 16];
        let mut writer = EventBufferWriter::new(&mut buffer);
        writer.push_event(&[(0, 1)]);
        writer.push_event(&[(0, 2)]);
        writer.finish(false);
        ring.put_buffer(&buffer).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = SortDaemon::new(
            move |p: &[i32]| sink.lock().unwrap().push(p[0]),
            Arc::clone(&ring),
            Arc::clone(&stats),
            1,
        )
        .with_poll_interval(Duration::from_millis(10))
        .spawn()
        .unwrap();

        wait_for(|| stats.snapshot().events_sorted == 2);
        handle.stop_and_join();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn idle_daemon_stops_promptly() {
        let ring = Arc::new(RingBuffer::null(16));
        let handle = SortDaemon::new(
            |_: &[i32]| {},
            ring,
            Arc::new(AcqStatistics::new()),
            1,
        )
        .with_poll_interval(Duration::from_millis(10))
        .spawn()
        .unwrap();
        let start = Instant::now();
        handle.stop_and_join();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
