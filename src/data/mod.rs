//! Event buffer storage, layout and counters.
pub mod event_buffer;
pub mod ring_buffer;
pub mod statistics;

pub use ring_buffer::RingBuffer;
pub use statistics::{AcqStatistics, StatisticsSnapshot};
