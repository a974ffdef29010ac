//! Configuration loading using Figment.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`AcqConfig::default`])
//! 2. A TOML file
//! 3. Environment variables prefixed with `DAQ_ONLINE_`, nested keys separated by `__`
//!    (e.g. `DAQ_ONLINE_FRONTEND__REMOTE_ADDRESS=10.0.0.5`)
//!
//! The loaded [`AcqConfig`] is handed to the components that need it; nothing reads
//! configuration from global state.
//!
//! # Example
//! ```no_run
//! use daq_online::config::AcqConfig;
//!
//! let config = AcqConfig::load_from("config/daq_online.toml")?;
//! config.validate()?;
//! println!("front end at {}:{}", config.frontend.remote_address, config.frontend.remote_port);
//! # Ok::<(), daq_online::error::DaqError>(())
//! ```

use crate::data::ring_buffer::{BUFFER_SIZE, NUMBER_BUFFERS};
use crate::data::event_buffer::RECORD_SIZE;
use crate::error::{AppResult, DaqError};
use crate::validation::{is_in_range, is_not_empty, is_valid_host, is_valid_port};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DAQ_ONLINE_";

/// Largest accepted `ring.buffer_size`. A front-end buffer travels in one UDP datagram.
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Front-end addresses and ports
    pub frontend: FrontEndConfig,
    /// Buffer ring sizing
    pub ring: RingConfig,
    /// Event simulator settings
    pub simulator: SimulatorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "daq-online".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One plain line per event; suits long unattended runs.
    #[default]
    Compact,
    /// Multi-line, coloured.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Where the front end lives and which local ports talk to it.
///
/// Ports are read once when the channel binds and cached for the life of the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontEndConfig {
    /// Local interface the sockets bind to
    pub local_address: String,
    /// Local port commands are sent from
    pub command_send_port: u16,
    /// Local port replies are received on
    pub command_receive_port: u16,
    /// Local port event data arrives on
    pub data_port: u16,
    /// Front-end host name or address
    pub remote_address: String,
    /// Front-end command port
    pub remote_port: u16,
    /// Upper bound on each blocking receive in the daemons, in milliseconds
    pub receive_timeout_ms: u64,
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        Self {
            local_address: "127.0.0.1".to_string(),
            command_send_port: 5002,
            command_receive_port: 5003,
            data_port: 10205,
            remote_address: "192.168.1.100".to_string(),
            remote_port: 5002,
            receive_timeout_ms: 200,
        }
    }
}

impl FrontEndConfig {
    /// Receive timeout as a duration.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// Buffer ring sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of buffers
    pub capacity: usize,
    /// Bytes per buffer
    pub buffer_size: usize,
    /// When false, the null ring is used and nothing is buffered
    pub enabled: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: NUMBER_BUFFERS,
            buffer_size: BUFFER_SIZE,
            enabled: true,
        }
    }
}

/// Synthetic event generator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Parameters per event
    pub signals: usize,
    /// Random seed; the same seed yields the same event stream
    pub seed: u64,
    /// Values are drawn below this bound
    pub max_value: u16,
    /// Pause between generated buffers, in milliseconds (0 = as fast as possible)
    pub buffer_interval_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            signals: 8,
            seed: 0x5EED,
            max_value: 4096,
            buffer_interval_ms: 0,
        }
    }
}

impl AcqConfig {
    /// Loads defaults overridden by environment variables only.
    pub fn load() -> AppResult<Self> {
        Ok(Self::figment().extract()?)
    }

    /// Loads defaults, then `path`, then environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment_with_file(path.as_ref()).extract()?)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(AcqConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn figment_with_file(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AcqConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |what: &str, msg: &str| DaqError::Configuration(format!("{what}: {msg}"));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        is_not_empty(&self.application.name).map_err(|m| invalid("application.name", m))?;

        let fe = &self.frontend;
        is_valid_host(&fe.local_address).map_err(|m| invalid("frontend.local_address", m))?;
        is_valid_host(&fe.remote_address).map_err(|m| invalid("frontend.remote_address", m))?;
        for (name, port) in [
            ("frontend.command_send_port", fe.command_send_port),
            ("frontend.command_receive_port", fe.command_receive_port),
            ("frontend.data_port", fe.data_port),
            ("frontend.remote_port", fe.remote_port),
        ] {
            is_valid_port(port).map_err(|m| invalid(name, m))?;
        }
        let local_ports = [fe.command_send_port, fe.command_receive_port, fe.data_port];
        if local_ports[0] == local_ports[1]
            || local_ports[0] == local_ports[2]
            || local_ports[1] == local_ports[2]
        {
            return Err(DaqError::Configuration(format!(
                "Local ports must be distinct, got {local_ports:?}"
            )));
        }
        is_in_range(fe.receive_timeout_ms, 1..=60_000)
            .map_err(|m| invalid("frontend.receive_timeout_ms", m))?;

        let ring = &self.ring;
        if ring.enabled {
            is_in_range(ring.capacity, 1..=4096).map_err(|m| invalid("ring.capacity", m))?;
        }
        is_in_range(ring.buffer_size, RECORD_SIZE..=MAX_BUFFER_SIZE)
            .map_err(|m| invalid("ring.buffer_size", m))?;
        if ring.buffer_size % RECORD_SIZE != 0 {
            return Err(DaqError::Configuration(format!(
                "ring.buffer_size {} is not a multiple of {RECORD_SIZE}",
                ring.buffer_size
            )));
        }
        let smallest_event = (self.simulator.signals + 1) * RECORD_SIZE;
        if ring.buffer_size < smallest_event {
            return Err(DaqError::Configuration(format!(
                "ring.buffer_size {} cannot hold one event of {} parameters",
                ring.buffer_size, self.simulator.signals
            )));
        }

        is_in_range(self.simulator.signals, 1..=0x0F00)
            .map_err(|m| invalid("simulator.signals", m))?;
        if self.simulator.max_value == 0 {
            return Err(invalid("simulator.max_value", "Value must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AcqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring.capacity, NUMBER_BUFFERS);
        assert_eq!(config.ring.buffer_size, BUFFER_SIZE);
    }

    #[test]
    #[serial]
    fn test_load_from_file_keeps_unset_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_format = "json"

[frontend]
remote_address = "frontend.local"
remote_port = 6000

[ring]
capacity = 4
"#
        )
        .unwrap();

        let config = AcqConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_format, LogFormat::Json);
        assert_eq!(config.frontend.remote_address, "frontend.local");
        assert_eq!(config.frontend.remote_port, 6000);
        assert_eq!(config.frontend.command_receive_port, 5003);
        assert_eq!(config.ring.capacity, 4);
        assert_eq!(config.ring.buffer_size, BUFFER_SIZE);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ring]\ncapacity = 4").unwrap();

        std::env::set_var("DAQ_ONLINE_RING__CAPACITY", "16");
        let result = AcqConfig::load_from(file.path());
        std::env::remove_var("DAQ_ONLINE_RING__CAPACITY");

        assert_eq!(result.unwrap().ring.capacity, 16);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AcqConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_local_ports() {
        let mut config = AcqConfig::default();
        config.frontend.data_port = config.frontend.command_send_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buffer_size_alignment() {
        let mut config = AcqConfig::default();
        config.ring.buffer_size = 8190;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buffer_size_upper_bound() {
        let mut config = AcqConfig::default();
        config.ring.buffer_size = MAX_BUFFER_SIZE;
        assert!(config.validate().is_ok());
        config.ring.buffer_size = MAX_BUFFER_SIZE + RECORD_SIZE;
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_disabled_ring_allows_zero_capacity() {
        let mut config = AcqConfig::default();
        config.ring.enabled = false;
        config.ring.capacity = 0;
        assert!(config.validate().is_ok());
    }
}
