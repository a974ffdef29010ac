//! CLI Entry Point for daq_online
//!
//! Provides command-line interface for:
//! - Running a simulated acquisition (no hardware needed)
//! - Running an online acquisition against a front end
//! - Sending a single control verb to the front end
//!
//! # Usage
//!
//! Simulate for ten seconds and print statistics:
//! ```bash
//! daq_online simulate --seconds 10
//! ```
//!
//! Ask the front end for its scalers:
//! ```bash
//! daq_online --config config/daq_online.toml send read-scalers
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use daq_online::config::AcqConfig;
use daq_online::data::AcqStatistics;
use daq_online::logging;
use daq_online::network::{CounterBroadcast, FrontEndChannel, ScalerStore};
use daq_online::{OnlineSession, SourceMode};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "daq_online")]
#[command(about = "Online event acquisition core", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Environment variables still override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on simulated events
    Simulate {
        /// How long to acquire
        #[arg(long, default_value = "5")]
        seconds: u64,
    },

    /// Acquire from the front end
    Online {
        /// How long to acquire
        #[arg(long, default_value = "10")]
        seconds: u64,

        /// Parameters per event
        #[arg(long, default_value = "64")]
        parameters: usize,
    },

    /// Send one control verb to the front end
    Send {
        /// Verb to send
        verb: Verb,

        /// How long to wait for a reply, in milliseconds
        #[arg(long, default_value = "500")]
        wait_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Verb {
    Start,
    Stop,
    End,
    Flush,
    ReadScalers,
    ClearScalers,
    ReadCounters,
    ZeroCounters,
    DebugOn,
    DebugOff,
    VerboseOn,
    VerboseOff,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AcqConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AcqConfig::load().context("loading configuration")?,
    };
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    config.validate()?;
    logging::init_from_config(&config)?;
    info!(name = %config.application.name, "starting");

    match cli.command {
        Commands::Simulate { seconds } => {
            run_session(&config, SourceMode::Simulator, Duration::from_secs(seconds))
        }
        Commands::Online {
            seconds,
            parameters,
        } => run_session(
            &config,
            SourceMode::FrontEnd { parameters },
            Duration::from_secs(seconds),
        ),
        Commands::Send { verb, wait_ms } => send_verb(&config, verb, Duration::from_millis(wait_ms)),
    }
}

fn run_session(config: &AcqConfig, mode: SourceMode, duration: Duration) -> Result<()> {
    let events = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&events);
    let mut session = OnlineSession::start(config, mode, move |_: &[i32]| {
        counter.fetch_add(1, Ordering::Relaxed);
    })?;

    session.start_run()?;
    thread::sleep(duration);
    session.stop_run()?;
    session.shutdown();

    info!(events = events.load(Ordering::Relaxed), "acquisition finished");
    println!("{}", serde_json::to_string_pretty(&session.statistics())?);
    Ok(())
}

fn send_verb(config: &AcqConfig, verb: Verb, wait: Duration) -> Result<()> {
    let scalers = ScalerStore::new();
    let counters = CounterBroadcast::new(4);
    let mut replies = counters.subscribe();
    let mut channel = FrontEndChannel::new(
        config.frontend.clone(),
        Arc::new(scalers.clone()),
        Arc::new(counters),
        Arc::new(AcqStatistics::new()),
    );
    channel
        .bind_sockets_and_set_active()
        .context("binding front-end sockets")?;

    match verb {
        Verb::Start => channel.start_acquisition()?,
        Verb::Stop => channel.stop_acquisition()?,
        Verb::End => channel.end()?,
        Verb::Flush => channel.flush()?,
        Verb::ReadScalers => channel.read_scalers()?,
        Verb::ClearScalers => channel.clear_scalers()?,
        Verb::ReadCounters => channel.read_counters()?,
        Verb::ZeroCounters => channel.zero_counters()?,
        Verb::DebugOn => channel.debug(true)?,
        Verb::DebugOff => channel.debug(false)?,
        Verb::VerboseOn => channel.verbose(true)?,
        Verb::VerboseOff => channel.verbose(false)?,
    }

    // Replies arrive on the receive daemon; give the front end a moment.
    thread::sleep(wait);
    if let Some(reading) = scalers.latest() {
        println!("scalers at {}: {:?}", reading.received_at, reading.values);
    }
    while let Ok(values) = replies.try_recv() {
        println!("counters: {:?}", values);
    }
    channel.close();
    Ok(())
}
