//! Relay of event buffers arriving from the front end over UDP.

use super::{Backpressure, BufferSource};
use crate::config::FrontEndConfig;
use crate::data::event_buffer::{fill_words, BUFFER_PAD};
use crate::error::{AppResult, CommunicationsError, DaqError};
use crate::network::front_end::resolve;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, warn};

/// Receives one event buffer per datagram on the data port.
#[derive(Debug)]
pub struct UdpDataSource {
    socket: UdpSocket,
    /// One byte longer than a ring slot, so an oversized datagram is detectable.
    scratch: Vec<u8>,
}

impl UdpDataSource {
    /// Binds `local_address:data_port` from the front-end configuration.
    ///
    /// `local_address` may be a host name; IPv4 addresses are preferred.
    pub fn bind(config: &FrontEndConfig) -> AppResult<Self> {
        let addr = resolve(&config.local_address, config.data_port)?;
        let socket = UdpSocket::bind(addr).map_err(|e| CommunicationsError::from_bind(addr, e))?;
        Self::from_socket(socket, config.receive_timeout())
    }

    /// Uses an already bound socket. `timeout` bounds each receive.
    pub fn from_socket(socket: UdpSocket, timeout: Duration) -> AppResult<Self> {
        socket.set_read_timeout(Some(timeout))?;
        Ok(Self {
            socket,
            scratch: Vec::new(),
        })
    }

    /// Address the front end should send data to.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl BufferSource for UdpDataSource {
    fn next_buffer(&mut self, buffer: &mut [u8]) -> AppResult<bool> {
        self.scratch.resize(buffer.len() + 1, 0);
        match self.socket.recv(&mut self.scratch) {
            Ok(0) => Ok(false),
            Ok(len) if len > buffer.len() => Err(DaqError::Protocol(format!(
                "data packet exceeds buffer size {}",
                buffer.len()
            ))),
            Ok(len) => {
                buffer[..len].copy_from_slice(&self.scratch[..len]);
                if len < buffer.len() {
                    debug!(len, expected = buffer.len(), "short data packet padded");
                    fill_words(&mut buffer[len..], BUFFER_PAD);
                }
                Ok(true)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) => Err(DaqError::Io(e)),
        }
    }

    fn backpressure(&self) -> Backpressure {
        // The front end cannot be paused; a late buffer is as bad as a lost one.
        Backpressure::Drop
    }

    fn begin_run(&mut self) {
        // Discard datagrams that queued up while acquisition was off.
        if let Err(e) = self.socket.set_nonblocking(true) {
            warn!(error = %e, "could not drain stale data packets");
            return;
        }
        let mut scratch = [0u8; 64];
        let mut stale = 0usize;
        while self.socket.recv(&mut scratch).is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "discarded stale data packets");
        }
        if let Err(e) = self.socket.set_nonblocking(false) {
            warn!(error = %e, "could not restore blocking data socket");
        }
    }
}
