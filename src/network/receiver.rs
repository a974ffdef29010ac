//! Background listener for replies from the front end.
//!
//! The daemon owns the command-receive socket. Each loop iteration checks the
//! daemon state, waits (bounded by the socket read timeout) for one datagram,
//! decodes it and routes it:
//!
//! | Packet | Destination |
//! |--------|-------------|
//! | `OK_MESSAGE` | `info!` log line |
//! | `ERROR` | `error!` log line |
//! | `SCALER` | [`ScalerSink`] |
//! | `COUNTER` | [`CounterSink`] |
//! | anything else | `warn!` as protocol anomaly |
//!
//! A bad packet is dropped and counted; it never ends the loop.

use crate::daemon::{DaemonControl, DaemonHandle, ThreadState};
use crate::data::AcqStatistics;
use crate::error::AppResult;
use crate::network::packet::{Packet, PacketType, MAX_PACKET_SIZE};
use crate::network::sinks::{CounterSink, ScalerSink};
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

/// Decodes and routes front-end replies.
pub struct ReceiveDaemon {
    socket: UdpSocket,
    scalers: Arc<dyn ScalerSink>,
    counters: Arc<dyn CounterSink>,
    statistics: Arc<AcqStatistics>,
}

impl ReceiveDaemon {
    /// Wraps an already bound socket.
    pub fn new(
        socket: UdpSocket,
        scalers: Arc<dyn ScalerSink>,
        counters: Arc<dyn CounterSink>,
        statistics: Arc<AcqStatistics>,
    ) -> Self {
        Self {
            socket,
            scalers,
            counters,
            statistics,
        }
    }

    /// Starts the receive loop on its own thread.
    ///
    /// `poll_interval` bounds each blocking receive so a stop request is seen promptly.
    pub fn spawn(self, poll_interval: Duration) -> AppResult<DaemonHandle> {
        self.socket.set_read_timeout(Some(poll_interval))?;
        let handle = DaemonHandle::spawn("receive-daemon", move |control| self.run(&control))?;
        Ok(handle)
    }

    fn run(self, control: &DaemonControl) {
        let span = info_span!("receive_daemon");
        let _enter = span.enter();
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        while control.check_state() {
            match self.socket.recv_from(&mut buffer) {
                Ok((len, from)) => {
                    debug!(%from, len, "packet received");
                    self.dispatch(&buffer[..len]);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if control.state() == ThreadState::Stop => {
                    debug!(error = %e, "receive interrupted by shutdown");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "receive failed");
                    control.wait_timeout(Duration::from_millis(100));
                }
            }
        }
        debug!("receive daemon exiting");
    }

    /// Decodes one datagram and forwards its content.
    pub fn dispatch(&self, datagram: &[u8]) {
        self.statistics.packet_received();
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.statistics.packet_rejected();
                warn!(error = %e, len = datagram.len(), "dropping malformed packet");
                return;
            }
        };

        match packet {
            Packet::Message {
                status: PacketType::Error,
                text,
            } => error!(text = %text, "front end reported error"),
            Packet::Message { text, .. } => info!(text = %text, "front end message"),
            Packet::Scaler(values) => {
                debug!(count = values.len(), "scalers received");
                self.scalers.scalers_received(&values);
            }
            Packet::Counter(values) => {
                debug!(count = values.len(), "counters received");
                self.counters.counters_received(&values);
            }
            other => {
                self.statistics.packet_rejected();
                warn!(
                    packet_type = ?other.packet_type(),
                    "unexpected packet type from front end"
                );
            }
        }
    }
}
