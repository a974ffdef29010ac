//! Wire format of the front-end UDP protocol.
//!
//! Every datagram starts with a big-endian `i32` type tag. The body layout depends
//! on the tag:
//!
//! ```text
//! OK_MESSAGE / ERROR / INTERVAL   [tag:4][ascii text][NUL:1]
//! CNAF                            [tag:4][name:16, NUL padded][count:4]
//!                                 [{param:1 crate:1 number:1 address:1 function:1 data:4} x count]
//!                                 [NUL:1]
//! SCALER / COUNTER / VME_ADDRESS  [tag:4][count:4][value:4 x count]
//! ```
//!
//! All integers are big-endian. Text is ASCII only.

use crate::error::{AppResult, DaqError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Longest message text, excluding the NUL terminator.
pub const MAX_MESSAGE_SIZE: usize = 80;
/// Largest datagram the protocol produces or accepts.
pub const MAX_PACKET_SIZE: usize = 1024;
/// Width of the NUL-padded CNAF list name field.
pub const CNAF_NAME_SIZE: usize = 16;
/// Wire size of one CNAF record.
pub const CNAF_RECORD_SIZE: usize = 9;

const TAG_SIZE: usize = 4;
const COUNT_SIZE: usize = 4;

/// Most CNAF records that fit in one datagram.
pub const MAX_CNAF_RECORDS: usize =
    (MAX_PACKET_SIZE - TAG_SIZE - CNAF_NAME_SIZE - COUNT_SIZE - 1) / CNAF_RECORD_SIZE;
/// Most counter values that fit in one datagram.
pub const MAX_COUNTER_VALUES: usize = (MAX_PACKET_SIZE - TAG_SIZE - COUNT_SIZE) / 4;

/// Datagram type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum PacketType {
    /// Informational text.
    OkMessage = 0,
    /// Error text.
    Error = 1,
    /// Scaler values.
    Scaler = 2,
    /// CNAF command list.
    Cnaf = 3,
    /// Front-end counters.
    Counter = 4,
    /// VME module base addresses.
    VmeAddress = 5,
    /// Scaler readout interval.
    Interval = 6,
}

impl PacketType {
    /// Maps a wire tag to its type.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PacketType::OkMessage),
            1 => Some(PacketType::Error),
            2 => Some(PacketType::Scaler),
            3 => Some(PacketType::Cnaf),
            4 => Some(PacketType::Counter),
            5 => Some(PacketType::VmeAddress),
            6 => Some(PacketType::Interval),
            _ => None,
        }
    }

    /// Wire tag.
    pub fn tag(self) -> i32 {
        self as i32
    }
}

/// One CAMAC bus operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cnaf {
    /// Event parameter the read value is stored in.
    pub param_id: u8,
    /// Crate (C).
    pub crate_number: u8,
    /// Slot (N).
    pub number: u8,
    /// Sub-address (A).
    pub address: u8,
    /// Function code (F).
    pub function: u8,
    /// Data word written by write functions.
    pub data: i32,
}

impl Cnaf {
    /// Builds a command with a zero data word.
    pub fn new(param_id: u8, crate_number: u8, number: u8, address: u8, function: u8) -> Self {
        Self {
            param_id,
            crate_number,
            number,
            address,
            function,
            data: 0,
        }
    }

    /// Sets the data word.
    pub fn with_data(mut self, data: i32) -> Self {
        self.data = data;
        self
    }
}

/// A named batch of CNAF commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnafList {
    /// List name, at most 15 ASCII bytes.
    pub name: String,
    /// Commands in execution order.
    pub commands: Vec<Cnaf>,
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// `OkMessage` or `Error` text.
    Message {
        /// Either [`PacketType::OkMessage`] or [`PacketType::Error`].
        status: PacketType,
        /// Message text.
        text: String,
    },
    /// Scaler values.
    Scaler(Vec<i32>),
    /// Front-end counters.
    Counter(Vec<i32>),
    /// CNAF command list.
    Cnaf(CnafList),
    /// VME base addresses.
    VmeAddress(Vec<i32>),
    /// Seconds between scaler insertions in the event stream.
    Interval(u32),
}

impl Packet {
    /// Type tag of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Message { status, .. } => *status,
            Packet::Scaler(_) => PacketType::Scaler,
            Packet::Counter(_) => PacketType::Counter,
            Packet::Cnaf(_) => PacketType::Cnaf,
            Packet::VmeAddress(_) => PacketType::VmeAddress,
            Packet::Interval(_) => PacketType::Interval,
        }
    }

    /// Encodes this packet as one datagram.
    pub fn encode(&self) -> AppResult<Bytes> {
        match self {
            Packet::Message { status, text } => encode_message(*status, text),
            Packet::Scaler(values) => encode_counters(PacketType::Scaler, values),
            Packet::Counter(values) => encode_counters(PacketType::Counter, values),
            Packet::VmeAddress(values) => encode_counters(PacketType::VmeAddress, values),
            Packet::Cnaf(list) => encode_cnaf_list(&list.name, &list.commands),
            Packet::Interval(seconds) => encode_interval(*seconds),
        }
    }

    /// Decodes a whole datagram, tag included.
    pub fn decode(datagram: &[u8]) -> AppResult<Self> {
        if datagram.len() < TAG_SIZE {
            return Err(DaqError::Protocol(format!(
                "datagram of {} bytes has no type tag",
                datagram.len()
            )));
        }
        let mut reader = datagram;
        let tag = reader.get_i32();
        let packet_type = PacketType::from_i32(tag)
            .ok_or_else(|| DaqError::Protocol(format!("unrecognized packet tag {tag}")))?;

        Ok(match packet_type {
            PacketType::OkMessage | PacketType::Error => Packet::Message {
                status: packet_type,
                text: decode_message(reader)?,
            },
            PacketType::Scaler => Packet::Scaler(decode_counters(reader)?),
            PacketType::Counter => Packet::Counter(decode_counters(reader)?),
            PacketType::VmeAddress => Packet::VmeAddress(decode_counters(reader)?),
            PacketType::Cnaf => Packet::Cnaf(decode_cnaf_list(reader)?),
            PacketType::Interval => Packet::Interval(decode_interval(reader)?),
        })
    }
}

/// Encodes `[status][text][NUL]`.
pub fn encode_message(status: PacketType, text: &str) -> AppResult<Bytes> {
    check_text(text, MAX_MESSAGE_SIZE, DaqError::Encoding)?;
    let mut buf = BytesMut::with_capacity(TAG_SIZE + text.len() + 1);
    buf.put_i32(status.tag());
    buf.put_slice(text.as_bytes());
    buf.put_u8(0);
    Ok(buf.freeze())
}

/// Reads NUL-terminated text from a message body (tag already consumed).
pub fn decode_message(body: &[u8]) -> AppResult<String> {
    let window = &body[..body.len().min(MAX_MESSAGE_SIZE + 1)];
    let end = match window.iter().position(|&b| b == 0) {
        Some(end) => end,
        None if body.len() > MAX_MESSAGE_SIZE => {
            return Err(DaqError::Protocol(format!(
                "message exceeds {MAX_MESSAGE_SIZE} bytes without terminator"
            )))
        }
        None => {
            return Err(DaqError::Protocol(
                "message has no NUL terminator".to_string(),
            ))
        }
    };
    ascii_string(&body[..end])
}

/// Encodes a named CNAF command list.
pub fn encode_cnaf_list(name: &str, commands: &[Cnaf]) -> AppResult<Bytes> {
    if name.len() >= CNAF_NAME_SIZE {
        return Err(DaqError::Argument(format!(
            "CNAF list name '{name}' is longer than {} bytes",
            CNAF_NAME_SIZE - 1
        )));
    }
    check_text(name, CNAF_NAME_SIZE - 1, DaqError::Argument)?;
    if commands.len() > MAX_CNAF_RECORDS {
        return Err(DaqError::Encoding(format!(
            "{} CNAF commands do not fit in one packet (max {MAX_CNAF_RECORDS})",
            commands.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(
        TAG_SIZE + CNAF_NAME_SIZE + COUNT_SIZE + commands.len() * CNAF_RECORD_SIZE + 1,
    );
    buf.put_i32(PacketType::Cnaf.tag());
    buf.put_slice(name.as_bytes());
    buf.put_bytes(0, CNAF_NAME_SIZE - name.len());
    buf.put_i32(commands.len() as i32);
    for cnaf in commands {
        buf.put_u8(cnaf.param_id);
        buf.put_u8(cnaf.crate_number);
        buf.put_u8(cnaf.number);
        buf.put_u8(cnaf.address);
        buf.put_u8(cnaf.function);
        buf.put_i32(cnaf.data);
    }
    buf.put_u8(0);
    Ok(buf.freeze())
}

/// Decodes a CNAF list body (tag already consumed).
pub fn decode_cnaf_list(mut body: &[u8]) -> AppResult<CnafList> {
    if body.remaining() < CNAF_NAME_SIZE + COUNT_SIZE {
        return Err(DaqError::Protocol("CNAF packet too short".to_string()));
    }
    let name_field = &body[..CNAF_NAME_SIZE];
    let name_end = name_field
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DaqError::Protocol("CNAF list name is not terminated".to_string()))?;
    let name = ascii_string(&name_field[..name_end])?;
    body.advance(CNAF_NAME_SIZE);

    let count = read_count(&mut body, CNAF_RECORD_SIZE)?;
    let mut commands = Vec::with_capacity(count);
    for _ in 0..count {
        commands.push(Cnaf {
            param_id: body.get_u8(),
            crate_number: body.get_u8(),
            number: body.get_u8(),
            address: body.get_u8(),
            function: body.get_u8(),
            data: body.get_i32(),
        });
    }
    if body.first() != Some(&0) {
        return Err(DaqError::Protocol(
            "CNAF packet has no NUL terminator".to_string(),
        ));
    }
    Ok(CnafList { name, commands })
}

/// Encodes `[tag][count][value x count]` for scaler, counter or address packets.
pub fn encode_counters(packet_type: PacketType, values: &[i32]) -> AppResult<Bytes> {
    if values.len() > MAX_COUNTER_VALUES {
        return Err(DaqError::Encoding(format!(
            "{} values do not fit in one packet (max {MAX_COUNTER_VALUES})",
            values.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(TAG_SIZE + COUNT_SIZE + values.len() * 4);
    buf.put_i32(packet_type.tag());
    buf.put_i32(values.len() as i32);
    for &value in values {
        buf.put_i32(value);
    }
    Ok(buf.freeze())
}

/// Decodes a counter-shaped body (tag already consumed).
pub fn decode_counters(mut body: &[u8]) -> AppResult<Vec<i32>> {
    let count = read_count(&mut body, 4)?;
    Ok((0..count).map(|_| body.get_i32()).collect())
}

/// Encodes the scaler interval as message text `"<seconds>\n"`.
pub fn encode_interval(seconds: u32) -> AppResult<Bytes> {
    encode_message(PacketType::Interval, &format!("{seconds}\n"))
}

/// Decodes an interval body (tag already consumed).
pub fn decode_interval(body: &[u8]) -> AppResult<u32> {
    let text = decode_message(body)?;
    text.trim()
        .parse()
        .map_err(|e| DaqError::Protocol(format!("invalid interval '{}': {e}", text.trim())))
}

/// Reads a count and checks that `count * record_size` bytes follow.
fn read_count(body: &mut &[u8], record_size: usize) -> AppResult<usize> {
    if body.remaining() < COUNT_SIZE {
        return Err(DaqError::Protocol("packet has no count field".to_string()));
    }
    let count = body.get_i32();
    let count = usize::try_from(count)
        .map_err(|_| DaqError::Protocol(format!("negative record count {count}")))?;
    if count.saturating_mul(record_size) > body.remaining() {
        return Err(DaqError::Protocol(format!(
            "count {count} needs {} bytes, only {} present",
            count.saturating_mul(record_size),
            body.remaining()
        )));
    }
    Ok(count)
}

fn check_text(text: &str, max_len: usize, err: fn(String) -> DaqError) -> AppResult<()> {
    if !text.is_ascii() {
        return Err(err(format!("'{text}' contains non-ASCII characters")));
    }
    if text.bytes().any(|b| b == 0) {
        return Err(err("text contains an embedded NUL".to_string()));
    }
    if text.len() > max_len {
        return Err(err(format!(
            "text of {} bytes exceeds maximum of {max_len}",
            text.len()
        )));
    }
    Ok(())
}

fn ascii_string(bytes: &[u8]) -> AppResult<String> {
    if !bytes.is_ascii() {
        return Err(DaqError::Protocol("text is not ASCII".to_string()));
    }
    Ok(bytes.iter().map(|&b| char::from(b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_layout() {
        let bytes = encode_message(PacketType::OkMessage, "START").unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 0, b'S', b'T', b'A', b'R', b'T', 0]);
    }

    #[test]
    fn test_message_roundtrip_at_max_length() {
        let text = "x".repeat(MAX_MESSAGE_SIZE);
        let bytes = encode_message(PacketType::Error, &text).unwrap();
        match Packet::decode(&bytes).unwrap() {
            Packet::Message { status, text: decoded } => {
                assert_eq!(status, PacketType::Error);
                assert_eq!(decoded, text);
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_message_too_long() {
        let err = encode_message(PacketType::OkMessage, &"x".repeat(MAX_MESSAGE_SIZE + 1))
            .unwrap_err();
        assert!(matches!(err, DaqError::Encoding(_)));
    }

    #[test]
    fn test_non_ascii_rejected() {
        let err = encode_message(PacketType::OkMessage, "Grüße").unwrap_err();
        assert!(matches!(err, DaqError::Encoding(_)));
    }

    #[test]
    fn test_missing_terminator() {
        assert!(matches!(
            decode_message(b"no terminator"),
            Err(DaqError::Protocol(_))
        ));
        let long = vec![b'a'; MAX_MESSAGE_SIZE + 20];
        assert!(matches!(decode_message(&long), Err(DaqError::Protocol(_))));
    }

    #[test]
    fn test_terminator_beyond_bound() {
        let mut body = vec![b'a'; MAX_MESSAGE_SIZE + 1];
        body.push(0);
        assert!(matches!(decode_message(&body), Err(DaqError::Protocol(_))));
    }

    #[test]
    fn test_cnaf_layout() {
        let cnaf = Cnaf::new(1, 2, 3, 4, 5).with_data(0x0102_0304);
        let bytes = encode_cnaf_list("init", &[cnaf]).unwrap();
        assert_eq!(bytes.len(), 4 + 16 + 4 + 9 + 1);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 3]);
        assert_eq!(&bytes[4..8], b"init");
        assert!(bytes[8..20].iter().all(|&b| b == 0));
        assert_eq!(&bytes[20..24], &[0, 0, 0, 1]);
        assert_eq!(&bytes[24..33], &[1, 2, 3, 4, 5, 1, 2, 3, 4]);
        assert_eq!(bytes[33], 0);
    }

    #[test]
    fn test_cnaf_name_length_limit() {
        assert!(encode_cnaf_list(&"n".repeat(15), &[]).is_ok());
        let err = encode_cnaf_list(&"n".repeat(16), &[]).unwrap_err();
        assert!(matches!(err, DaqError::Argument(_)));
    }

    #[test]
    fn test_cnaf_too_many_records() {
        let commands = vec![Cnaf::default(); MAX_CNAF_RECORDS + 1];
        let err = encode_cnaf_list("big", &commands).unwrap_err();
        assert!(matches!(err, DaqError::Encoding(_)));
        let fits = encode_cnaf_list("big", &commands[1..]).unwrap();
        assert!(fits.len() <= MAX_PACKET_SIZE);
    }

    #[test]
    fn test_counters_decode() {
        let body = [0, 0, 0, 3, 0, 0, 0, 10, 0, 0, 0, 20, 0, 0, 0, 30];
        assert_eq!(decode_counters(&body).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_counters_truncated() {
        let body = [0, 0, 0, 3, 0, 0, 0, 10];
        assert!(matches!(decode_counters(&body), Err(DaqError::Protocol(_))));
        let negative = [0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode_counters(&negative),
            Err(DaqError::Protocol(_))
        ));
    }

    #[test]
    fn test_interval_roundtrip() {
        let bytes = encode_interval(15).unwrap();
        assert_eq!(&bytes[4..], b"15\n\0");
        assert_eq!(Packet::decode(&bytes).unwrap(), Packet::Interval(15));
    }

    #[test]
    fn test_unknown_tag() {
        let err = Packet::decode(&[0, 0, 0, 42, 0]).unwrap_err();
        assert!(matches!(err, DaqError::Protocol(_)));
        assert!(matches!(Packet::decode(&[0, 0]), Err(DaqError::Protocol(_))));
    }
}
