//! One acquisition session: ring, daemons and (optionally) the front-end link.
//!
//! ```text
//!  front end --UDP data--> [DataFeeder] --put--> [RingBuffer] --get--> [SortDaemon] --> EventSorter
//!      ^                        ^
//!      | START/STOP             | AcquisitionGate
//!  [FrontEndChannel] <---- OnlineSession::start_run / stop_run
//! ```
//!
//! With [`SourceMode::Simulator`] the feeder synthesises events and no sockets
//! are opened. `stop_run` returns once the feeder has queued the run-end buffer,
//! and the ring is never cleared under a live session, so every run reaches the
//! sorter followed by its run-end buffer. Daemons are stopped in data-flow order
//! on shutdown, so the sorter drains that buffer before it exits.

use crate::config::AcqConfig;
use crate::daemon::DaemonHandle;
use crate::data::{AcqStatistics, RingBuffer, StatisticsSnapshot};
use crate::error::{AppResult, DaqError};
use crate::feeder::{
    simulator, AcquisitionGate, DataFeeder, EventSimulator, UdpDataSource, RUN_END_TIMEOUT,
};
use crate::network::{CounterBroadcast, FrontEndChannel, ScalerStore};
use crate::sort::{EventSorter, SortDaemon};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Counter lists retained per subscriber.
const COUNTER_BACKLOG: usize = 16;

/// Slack on top of the feeder's own waits when stopping a run.
const STOP_MARGIN: Duration = Duration::from_millis(500);

/// Where event buffers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Generated locally from the `simulator` settings.
    Simulator,
    /// Sent by the front end to the data port. Events are decoded into
    /// `parameters` slots.
    FrontEnd {
        /// Length of the parameter array handed to the sorter.
        parameters: usize,
    },
}

/// Running acquisition pipeline.
pub struct OnlineSession {
    ring: Arc<RingBuffer>,
    gate: Arc<AcquisitionGate>,
    statistics: Arc<AcqStatistics>,
    scalers: ScalerStore,
    counters: CounterBroadcast,
    channel: Option<FrontEndChannel>,
    feeder: Option<DaemonHandle>,
    sorter: Option<DaemonHandle>,
    /// Longest `stop_run` waits for the run-end buffer.
    stop_timeout: Duration,
}

impl OnlineSession {
    /// Validates `config`, builds the ring and starts the daemons.
    ///
    /// Acquisition stays off until [`start_run`](Self::start_run).
    pub fn start<S>(config: &AcqConfig, mode: SourceMode, sorter: S) -> AppResult<Self>
    where
        S: EventSorter + 'static,
    {
        config.validate()?;

        let ring = Arc::new(RingBuffer::create(
            config.ring.capacity,
            config.ring.buffer_size,
            !config.ring.enabled,
        )?);
        if ring.is_null() {
            warn!("ring disabled, every buffer will be discarded");
        }
        let gate = Arc::new(AcquisitionGate::new());
        let statistics = Arc::new(AcqStatistics::new());
        let scalers = ScalerStore::new();
        let counters = CounterBroadcast::new(COUNTER_BACKLOG);

        // Worst case the feeder is inside one source read and one ring wait.
        let source_wait = match mode {
            SourceMode::Simulator => {
                Duration::from_millis(config.simulator.buffer_interval_ms) + simulator::RING_WAIT
            }
            SourceMode::FrontEnd { .. } => config.frontend.receive_timeout(),
        };
        let stop_timeout = source_wait + RUN_END_TIMEOUT + STOP_MARGIN;

        let (channel, feeder, parameters) = match mode {
            SourceMode::Simulator => {
                let feeder = DataFeeder::new(
                    EventSimulator::new(&config.simulator),
                    Arc::clone(&ring),
                    Arc::clone(&gate),
                    Arc::clone(&statistics),
                )
                .spawn("simulator-feeder")?;
                (None, feeder, config.simulator.signals)
            }
            SourceMode::FrontEnd { parameters } => {
                if parameters == 0 {
                    return Err(DaqError::Argument(
                        "front-end mode needs at least one parameter".to_string(),
                    ));
                }
                let mut channel = FrontEndChannel::new(
                    config.frontend.clone(),
                    Arc::new(scalers.clone()),
                    Arc::new(counters.clone()),
                    Arc::clone(&statistics),
                );
                channel.bind_sockets_and_set_active()?;
                let feeder = DataFeeder::new(
                    UdpDataSource::bind(&config.frontend)?,
                    Arc::clone(&ring),
                    Arc::clone(&gate),
                    Arc::clone(&statistics),
                )
                .spawn("udp-feeder")?;
                (Some(channel), feeder, parameters)
            }
        };

        let sorter = SortDaemon::new(
            sorter,
            Arc::clone(&ring),
            Arc::clone(&statistics),
            parameters,
        )
        .spawn()?;

        info!(
            capacity = ring.capacity(),
            buffer_size = ring.buffer_size(),
            ?mode,
            "session started"
        );
        Ok(Self {
            ring,
            gate,
            statistics,
            scalers,
            counters,
            channel,
            feeder: Some(feeder),
            sorter: Some(sorter),
            stop_timeout,
        })
    }

    /// Resets the counters, opens the gate and tells the front end to start.
    ///
    /// Buffers left from the previous run are not discarded; the sorter sees
    /// them, then that run's run-end buffer, before any data of the new run.
    pub fn start_run(&self) -> AppResult<()> {
        if self.gate.is_running() {
            return Err(DaqError::IllegalState("run already in progress".to_string()));
        }
        self.statistics.reset();
        let run = self.gate.open();
        if let Some(channel) = &self.channel {
            channel.start_acquisition()?;
        }
        info!(run, "run started");
        Ok(())
    }

    /// Tells the front end to stop, closes the gate and waits for the feeder
    /// to queue the run-end buffer.
    ///
    /// Fails with [`DaqError::IllegalState`] if the feeder does not acknowledge
    /// in time. The run-end buffer is then queued late, still ahead of any data
    /// from the next run.
    pub fn stop_run(&self) -> AppResult<()> {
        let sent = match &self.channel {
            Some(channel) => channel.stop_acquisition(),
            None => Ok(()),
        };
        let run = self.gate.close();
        if !self.gate.wait_run_ended(run, self.stop_timeout) {
            return Err(DaqError::IllegalState(format!(
                "run {run} not ended by the feeder within {:?}",
                self.stop_timeout
            )));
        }
        sent?;
        info!(run, "run stopped");
        Ok(())
    }

    /// True between `start_run` and `stop_run`.
    pub fn is_running(&self) -> bool {
        self.gate.is_running()
    }

    /// Current counters.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    /// Buffer ring shared by the daemons.
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Front-end command channel, when running against hardware.
    pub fn channel(&self) -> Option<&FrontEndChannel> {
        self.channel.as_ref()
    }

    /// Latest scaler values reported by the front end.
    pub fn scalers(&self) -> &ScalerStore {
        &self.scalers
    }

    /// Subscribes to counter lists reported by the front end.
    pub fn subscribe_counters(&self) -> broadcast::Receiver<Arc<[i32]>> {
        self.counters.subscribe()
    }

    /// Stops the feeder, then the sorter, then closes the front-end link.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.gate.is_running() {
            if let Err(e) = self.stop_run() {
                warn!(error = %e, "could not stop run cleanly");
            }
        }
        let Some(feeder) = self.feeder.take() else {
            return;
        };
        feeder.stop_and_join();
        if let Some(sorter) = self.sorter.take() {
            sorter.stop_and_join();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        info!("session shut down");
    }
}

impl Drop for OnlineSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
