//! UDP link to the acquisition front end: wire codec, command channel and reply daemon.
pub mod front_end;
pub mod packet;
pub mod receiver;
pub mod sinks;

pub use front_end::{ConnectionState, FrontEndChannel};
pub use packet::{Cnaf, CnafList, Packet, PacketType};
pub use receiver::ReceiveDaemon;
pub use sinks::{CounterBroadcast, CounterSink, ScalerSink, ScalerStore};
