//! # Online Acquisition Core
//!
//! This crate is the acquisition core of an online nuclear-physics data acquisition
//! system. It receives raw event buffers from a remote front end, stages them in a
//! bounded ring, and hands decoded events to a sorter, while a separate UDP
//! channel carries control verbs, CAMAC command lists and scaler/counter replies.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (defaults, TOML file, `DAQ_ONLINE_*`
//!   environment variables) loaded with `figment`. See `config::AcqConfig`.
//! - **`daemon`**: Cooperative run/suspend/stop control shared by every background thread.
//! - **`data`**: The fixed-capacity `RingBuffer`, the event buffer layout, and
//!   session statistics.
//! - **`error`**: The crate-wide `DaqError` enum and the `CommunicationsError`
//!   raised while setting up the front-end link.
//! - **`feeder`**: Producers that fill the ring: a UDP relay for buffers from the
//!   front end and an event simulator for running without hardware.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`network`**: The front-end packet codec, the `FrontEndChannel` command
//!   sender and the `ReceiveDaemon` that routes replies.
//! - **`session`**: `OnlineSession`, which wires all of the above together.
//! - **`sort`**: The consumer daemon that decodes buffers and calls an `EventSorter`.
//! - **`validation`**: Small helpers used when validating configuration.

pub mod config;
pub mod daemon;
pub mod data;
pub mod error;
pub mod feeder;
pub mod logging;
pub mod network;
pub mod session;
pub mod sort;
pub mod validation;

pub use error::{AppResult, DaqError};
pub use session::{OnlineSession, SourceMode};
