//! Command channel against a fake front end on the loopback interface.

use daq_online::config::FrontEndConfig;
use daq_online::data::AcqStatistics;
use daq_online::network::packet::{encode_counters, Cnaf, Packet, PacketType, MAX_PACKET_SIZE};
use daq_online::network::{ConnectionState, CounterBroadcast, FrontEndChannel, ScalerStore};
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct FakeFrontEnd {
    socket: UdpSocket,
}

impl FakeFrontEnd {
    fn new() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Self { socket }
    }

    fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    fn receive(&self) -> Packet {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, _) = self.socket.recv_from(&mut buf).unwrap();
        Packet::decode(&buf[..len]).unwrap()
    }
}

fn config_for(front_end: &FakeFrontEnd) -> FrontEndConfig {
    FrontEndConfig {
        local_address: "127.0.0.1".to_string(),
        command_send_port: 0,
        command_receive_port: 0,
        remote_address: "127.0.0.1".to_string(),
        remote_port: front_end.port(),
        receive_timeout_ms: 20,
        ..FrontEndConfig::default()
    }
}

#[test]
fn commands_reach_front_end_and_replies_reach_sinks() {
    let front_end = FakeFrontEnd::new();
    let scalers = ScalerStore::new();
    let counters = CounterBroadcast::new(4);
    let mut counter_rx = counters.subscribe();
    let stats = Arc::new(AcqStatistics::new());

    let mut channel = FrontEndChannel::new(
        config_for(&front_end),
        Arc::new(scalers.clone()),
        Arc::new(counters),
        Arc::clone(&stats),
    );
    channel.bind_sockets_and_set_active().unwrap();
    assert_eq!(channel.connection_state(), ConnectionState::Active);
    assert_eq!(channel.remote_address().unwrap().port(), front_end.port());

    channel.start_acquisition().unwrap();
    assert_eq!(
        front_end.receive(),
        Packet::Message {
            status: PacketType::OkMessage,
            text: "START".to_string()
        }
    );

    let commands = vec![Cnaf::new(0, 1, 5, 0, 0), Cnaf::new(1, 1, 5, 1, 16).with_data(7)];
    channel.send_cnaf_list("event", &commands).unwrap();
    match front_end.receive() {
        Packet::Cnaf(list) => {
            assert_eq!(list.name, "event");
            assert_eq!(list.commands, commands);
        }
        other => panic!("unexpected packet {other:?}"),
    }

    channel.send_vme_addresses(&[0x2000_0000]).unwrap();
    assert_eq!(front_end.receive(), Packet::VmeAddress(vec![0x2000_0000]));

    let reply_to = channel.reply_address().unwrap();
    front_end
        .socket
        .send_to(&encode_counters(PacketType::Scaler, &[1, 2, 3]).unwrap(), reply_to)
        .unwrap();
    front_end
        .socket
        .send_to(&encode_counters(PacketType::Counter, &[10, 20, 30]).unwrap(), reply_to)
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut counters_seen = None;
    while (scalers.latest().is_none() || counters_seen.is_none()) && Instant::now() < deadline {
        if let Ok(values) = counter_rx.try_recv() {
            counters_seen = Some(values.to_vec());
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(scalers.latest().unwrap().values, vec![1, 2, 3]);
    assert_eq!(counters_seen, Some(vec![10, 20, 30]));
    assert_eq!(stats.snapshot().packets_received, 2);

    channel.close();
    assert_eq!(channel.connection_state(), ConnectionState::Inactive);
    assert!(channel.stop_acquisition().is_err());
}

#[test]
fn rebinding_replaces_the_link() {
    let front_end = FakeFrontEnd::new();
    let mut channel = FrontEndChannel::new(
        config_for(&front_end),
        Arc::new(ScalerStore::new()),
        Arc::new(CounterBroadcast::new(1)),
        Arc::new(AcqStatistics::new()),
    );
    channel.bind_sockets_and_set_active().unwrap();
    channel.bind_sockets_and_set_active().unwrap();
    channel.read_scalers().unwrap();
    assert_eq!(
        front_end.receive(),
        Packet::Message {
            status: PacketType::OkMessage,
            text: "list scaler".to_string()
        }
    );
}
