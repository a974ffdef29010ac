//! Command channel to the acquisition front end.
//!
//! The channel owns two UDP sockets once bound: one it sends commands from, and
//! one handed to a [`ReceiveDaemon`] for the front end's replies. Sends are
//! best effort: a UDP failure is logged and the caller may simply resend. Only
//! misuse (sending while unbound) and unencodable input are reported as errors.
//!
//! ```text
//!            bind_sockets_and_set_active()
//!  INACTIVE ---------------------------------> ACTIVE
//!      ^                                         |
//!      +------------------ close() --------------+
//! ```

use crate::config::FrontEndConfig;
use crate::daemon::DaemonHandle;
use crate::data::AcqStatistics;
use crate::error::{AppResult, CommunicationsError, DaqError};
use crate::network::packet::{
    encode_cnaf_list, encode_counters, encode_interval, encode_message, Cnaf, PacketType,
};
use crate::network::receiver::ReceiveDaemon;
use crate::network::sinks::{CounterSink, ScalerSink};
use bytes::Bytes;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Command understood by the front end: begin taking data.
pub const START: &str = "START";
/// Stop taking data.
pub const STOP: &str = "STOP";
/// End the run; the front end flushes and sends its last buffer.
pub const END: &str = "END";
/// Send the partially filled buffer now.
pub const FLUSH: &str = "FLUSH";
/// Report scaler values.
pub const READ_SCALERS: &str = "list scaler";
/// Zero the scalers.
pub const CLEAR_SCALERS: &str = "zero scaler";
/// Report front-end counters.
pub const READ_COUNTERS: &str = "count read";
/// Zero front-end counters.
pub const ZERO_COUNTERS: &str = "count zero";

/// Whether the channel currently has bound sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No sockets bound.
    Inactive,
    /// Sockets bound and receive daemon running.
    Active,
}

struct Link {
    socket: UdpSocket,
    remote: SocketAddr,
    reply: SocketAddr,
    receiver: DaemonHandle,
}

/// Sends control verbs and command lists to the front end.
pub struct FrontEndChannel {
    config: FrontEndConfig,
    scalers: Arc<dyn ScalerSink>,
    counters: Arc<dyn CounterSink>,
    statistics: Arc<AcqStatistics>,
    link: Option<Link>,
}

impl FrontEndChannel {
    /// Creates an unbound channel.
    pub fn new(
        config: FrontEndConfig,
        scalers: Arc<dyn ScalerSink>,
        counters: Arc<dyn CounterSink>,
        statistics: Arc<AcqStatistics>,
    ) -> Self {
        Self {
            config,
            scalers,
            counters,
            statistics,
            link: None,
        }
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        if self.link.is_some() {
            ConnectionState::Active
        } else {
            ConnectionState::Inactive
        }
    }

    /// Front-end address resolved at bind time.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.remote)
    }

    /// Local address of the command-send socket.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.link.as_ref().and_then(|link| link.socket.local_addr().ok())
    }

    /// Local address the front end's replies must be sent to.
    pub fn reply_address(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.reply)
    }

    /// Resolves addresses, binds both sockets and starts the receive daemon.
    ///
    /// Binding an already active channel first closes the existing link, so the
    /// configured ports are re-read.
    pub fn bind_sockets_and_set_active(&mut self) -> AppResult<()> {
        self.close();

        let local_ip = resolve(&self.config.local_address, 0)?.ip();
        let remote = resolve(&self.config.remote_address, self.config.remote_port)?;

        let send_addr = SocketAddr::new(local_ip, self.config.command_send_port);
        let socket = UdpSocket::bind(send_addr)
            .map_err(|e| CommunicationsError::from_bind(send_addr, e))?;

        let receive_addr = SocketAddr::new(local_ip, self.config.command_receive_port);
        let receive_socket = UdpSocket::bind(receive_addr)
            .map_err(|e| CommunicationsError::from_bind(receive_addr, e))?;
        let reply = receive_socket.local_addr()?;

        let receiver = ReceiveDaemon::new(
            receive_socket,
            Arc::clone(&self.scalers),
            Arc::clone(&self.counters),
            Arc::clone(&self.statistics),
        )
        .spawn(self.config.receive_timeout())?;

        info!(local = %send_addr, %remote, "front-end link active");
        self.link = Some(Link {
            socket,
            remote,
            reply,
            receiver,
        });
        Ok(())
    }

    /// Stops the receive daemon and releases both sockets.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.receiver.stop_and_join();
            info!(remote = %link.remote, "front-end link closed");
        }
    }

    /// Sends an informational text message.
    pub fn send_message(&self, text: &str) -> AppResult<()> {
        let link = self.active_link()?;
        self.send(link, encode_message(PacketType::OkMessage, text)?, text);
        Ok(())
    }

    /// Sets the number of seconds between scaler blocks in the event stream.
    pub fn send_interval(&self, seconds: u32) -> AppResult<()> {
        let link = self.active_link()?;
        self.send(link, encode_interval(seconds)?, "interval");
        Ok(())
    }

    /// Sends a named CNAF command list.
    pub fn send_cnaf_list(&self, name: &str, commands: &[Cnaf]) -> AppResult<()> {
        let link = self.active_link()?;
        self.send(link, encode_cnaf_list(name, commands)?, name);
        Ok(())
    }

    /// Sends VME module base addresses.
    pub fn send_vme_addresses(&self, addresses: &[i32]) -> AppResult<()> {
        let link = self.active_link()?;
        self.send(
            link,
            encode_counters(PacketType::VmeAddress, addresses)?,
            "vme addresses",
        );
        Ok(())
    }

    /// Turns front-end debug output on or off.
    pub fn debug(&self, on: bool) -> AppResult<()> {
        self.send_message(if on { "debug on" } else { "debug off" })
    }

    /// Turns front-end verbose output on or off.
    pub fn verbose(&self, on: bool) -> AppResult<()> {
        self.send_message(if on { "verbose on" } else { "verbose off" })
    }

    /// Tells the front end to start taking data.
    pub fn start_acquisition(&self) -> AppResult<()> {
        self.send_message(START)
    }

    /// Tells the front end to stop taking data.
    pub fn stop_acquisition(&self) -> AppResult<()> {
        self.send_message(STOP)
    }

    /// Tells the front end the run is over.
    pub fn end(&self) -> AppResult<()> {
        self.send_message(END)
    }

    /// Asks the front end to send its partially filled buffer.
    pub fn flush(&self) -> AppResult<()> {
        self.send_message(FLUSH)
    }

    /// Requests a scaler packet.
    pub fn read_scalers(&self) -> AppResult<()> {
        self.send_message(READ_SCALERS)
    }

    /// Zeroes the scalers.
    pub fn clear_scalers(&self) -> AppResult<()> {
        self.send_message(CLEAR_SCALERS)
    }

    /// Requests a counter packet.
    pub fn read_counters(&self) -> AppResult<()> {
        self.send_message(READ_COUNTERS)
    }

    /// Zeroes the front-end counters.
    pub fn zero_counters(&self) -> AppResult<()> {
        self.send_message(ZERO_COUNTERS)
    }

    fn active_link(&self) -> AppResult<&Link> {
        self.link.as_ref().ok_or_else(|| {
            DaqError::IllegalState("front-end sockets are not bound".to_string())
        })
    }

    fn send(&self, link: &Link, datagram: Bytes, what: &str) {
        match link.socket.send_to(&datagram, link.remote) {
            Ok(_) => debug!(command = what, len = datagram.len(), "sent to front end"),
            Err(e) => error!(command = what, error = %e, remote = %link.remote, "send to front end failed"),
        }
    }
}

impl Drop for FrontEndChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolves `host:port`, preferring an IPv4 address.
pub(crate) fn resolve(host: &str, port: u16) -> AppResult<SocketAddr> {
    let unknown = |source| CommunicationsError::UnknownHost {
        host: host.to_string(),
        source,
    };
    let all: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| unknown(Some(e)))?
        .collect();
    // Prefer IPv4, matching the front end's own stack.
    all.iter()
        .find(|a| a.is_ipv4())
        .or_else(|| all.first())
        .copied()
        .ok_or_else(|| unknown(None).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::sinks::{CounterBroadcast, ScalerStore};

    fn channel(config: FrontEndConfig) -> FrontEndChannel {
        FrontEndChannel::new(
            config,
            Arc::new(ScalerStore::new()),
            Arc::new(CounterBroadcast::new(4)),
            Arc::new(AcqStatistics::new()),
        )
    }

    #[test]
    fn unbound_channel_refuses_to_send() {
        let ch = channel(FrontEndConfig::default());
        assert_eq!(ch.connection_state(), ConnectionState::Inactive);
        let err = ch.send_message("START").unwrap_err();
        assert!(matches!(err, DaqError::IllegalState(_)));
        assert!(matches!(ch.start_acquisition(), Err(DaqError::IllegalState(_))));
        assert!(matches!(
            ch.send_cnaf_list("init", &[]),
            Err(DaqError::IllegalState(_))
        ));
    }

    #[test]
    fn unknown_host_is_reported() {
        let config = FrontEndConfig {
            remote_address: "no-such-host.invalid".to_string(),
            ..FrontEndConfig::default()
        };
        let mut ch = channel(config);
        let err = ch.bind_sockets_and_set_active().unwrap_err();
        assert!(matches!(
            err,
            DaqError::Communications(CommunicationsError::UnknownHost { .. })
        ));
        assert_eq!(ch.connection_state(), ConnectionState::Inactive);
    }

    #[test]
    fn port_conflict_is_reported() {
        let blocker = UdpSocket::bind("127.0.0.1:0").unwrap();
        let taken = blocker.local_addr().unwrap().port();
        let config = FrontEndConfig {
            local_address: "127.0.0.1".to_string(),
            command_send_port: taken,
            command_receive_port: 0,
            remote_address: "127.0.0.1".to_string(),
            ..FrontEndConfig::default()
        };
        let mut ch = channel(config);
        let err = ch.bind_sockets_and_set_active().unwrap_err();
        assert!(matches!(
            err,
            DaqError::Communications(CommunicationsError::AddressInUse { .. })
        ));
        assert!(err.to_string().contains("another instance"));
    }
}
