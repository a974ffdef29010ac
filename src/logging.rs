//! Tracing setup for the binary and for embedders.
//!
//! Every line carries the thread name, which is how feeder, sorter and receive
//! daemon output are told apart. The configured level applies to this crate only;
//! dependencies log at `warn` unless `RUST_LOG` says otherwise.
//!
//! ```no_run
//! use daq_online::{config::AcqConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AcqConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("acquisition core started");
//! # Ok(())
//! # }
//! ```

use crate::config::{AcqConfig, LogFormat};
use crate::error::{AppResult, DaqError};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Level for everything that is not this crate.
const DEPENDENCY_LEVEL: &str = "warn";

/// Installs the global subscriber described by `config.application`.
///
/// Does nothing if a subscriber is already installed, e.g. by a test harness
/// or an embedding application.
pub fn init_from_config(config: &AcqConfig) -> AppResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let filter = build_filter(&config.application.log_level)?;

    let base = fmt::layer().with_thread_names(true).with_target(false);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.application.log_format {
        // Compact output usually ends up in a run log file; keep it free of escapes.
        LogFormat::Compact => base.compact().with_ansi(false).boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| DaqError::Configuration(format!("could not install tracing: {e}")))
}

/// `RUST_LOG` if set, otherwise [`directives`] for `level`.
fn build_filter(level: &str) -> AppResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directives(level))
        .map_err(|e| DaqError::Configuration(format!("log_level '{level}': {e}")))
}

fn directives(level: &str) -> String {
    format!(
        "{DEPENDENCY_LEVEL},{}={}",
        env!("CARGO_CRATE_NAME"),
        level.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_applies_to_this_crate_only() {
        assert_eq!(directives("DEBUG"), "warn,daq_online=debug");
    }

    #[test]
    fn every_valid_level_parses() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(EnvFilter::try_new(directives(level)).is_ok(), "{level}");
        }
        assert!(EnvFilter::try_new(directives("loud")).is_err());
    }
}
