//! Layout of raw event buffers as they travel through the ring.
//!
//! A buffer is a sequence of big-endian 16-bit words grouped in 4-byte records:
//!
//! ```text
//! [0x8000|param : 2][value : 2]   one parameter of the current event
//! [0xFFFF       : 2][0xFFFF : 2]   end of event
//! [0xFFF0 ...]                     pad to the end of a normal buffer
//! [0xFF03 ...]                     pad to the end of the last buffer of a run
//! ```
//!
//! Events never span buffers: the writer only appends an event when all of its
//! records fit, and the reader drops a trailing event that was never closed.

use bytes::{Buf, BufMut};

/// Marker bit carried by every parameter tag word.
pub const PARAMETER_MARKER: u16 = 0x8000;
/// Highest parameter index that can be encoded in a tag word.
pub const MAX_PARAMETER_INDEX: u16 = 0x0EFF;
/// Word marking the end of an event (written twice).
pub const EVENT_END: u16 = 0xFFFF;
/// Fill word for the unused tail of a buffer.
pub const BUFFER_PAD: u16 = 0xFFF0;
/// Fill word for the unused tail of the final buffer of a run.
pub const RUN_END_PAD: u16 = 0xFF03;
/// Size of one record in bytes.
pub const RECORD_SIZE: usize = 4;

/// Appends whole events to a caller-owned buffer.
#[derive(Debug)]
pub struct EventBufferWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
    events: usize,
}

impl<'a> EventBufferWriter<'a> {
    /// Starts writing at the beginning of `buffer`.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            events: 0,
        }
    }

    /// Bytes needed to store an event of `parameters` parameters.
    pub fn event_size(parameters: usize) -> usize {
        (parameters + 1) * RECORD_SIZE
    }

    /// Appends one event of `(parameter index, value)` pairs.
    ///
    /// Returns `false`, leaving the buffer untouched, when the event does not fit.
    /// Indices above [`MAX_PARAMETER_INDEX`] are masked into range.
    pub fn push_event(&mut self, parameters: &[(u16, u16)]) -> bool {
        let needed = Self::event_size(parameters.len());
        if self.position + needed > self.buffer.len() {
            return false;
        }
        let mut out = &mut self.buffer[self.position..self.position + needed];
        for &(index, value) in parameters {
            out.put_u16(PARAMETER_MARKER | (index & MAX_PARAMETER_INDEX));
            out.put_u16(value);
        }
        out.put_u16(EVENT_END);
        out.put_u16(EVENT_END);
        self.position += needed;
        self.events += 1;
        true
    }

    /// Number of events written so far.
    pub fn events(&self) -> usize {
        self.events
    }

    /// Bytes used by events so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Pads the rest of the buffer with [`BUFFER_PAD`] (or [`RUN_END_PAD`] when
    /// `end_of_run`) and returns the number of events written.
    pub fn finish(self, end_of_run: bool) -> usize {
        let pad = if end_of_run { RUN_END_PAD } else { BUFFER_PAD };
        fill_words(&mut self.buffer[self.position..], pad);
        self.events
    }
}

/// Fills `buffer` with a repeated big-endian word. A trailing odd byte gets the high half.
pub fn fill_words(buffer: &mut [u8], word: u16) {
    let [high, low] = word.to_be_bytes();
    for pair in buffer.chunks_mut(2) {
        pair[0] = high;
        if let Some(b) = pair.get_mut(1) {
            *b = low;
        }
    }
}

/// Writes an event-free buffer that marks the end of a run.
pub fn fill_end_of_run(buffer: &mut [u8]) {
    fill_words(buffer, RUN_END_PAD);
}

/// What [`parse_buffer`] found in one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferSummary {
    /// Complete events handed to the callback.
    pub events: usize,
    /// Events cut off by padding or the end of the buffer.
    pub discarded_events: usize,
    /// Words that were neither a parameter tag nor a sentinel, or a parameter
    /// index outside the parameter array.
    pub invalid_words: usize,
    /// Buffer was padded with [`RUN_END_PAD`].
    pub end_of_run: bool,
}

/// Decodes every event in `buffer`.
///
/// `parameters` is reused for each event: it is zeroed, filled from the event's
/// records, and passed to `on_event` when the event-end record is reached.
pub fn parse_buffer<F>(buffer: &[u8], parameters: &mut [i32], mut on_event: F) -> BufferSummary
where
    F: FnMut(&[i32]),
{
    let mut summary = BufferSummary::default();
    let mut reader = buffer;
    let mut in_event = false;
    parameters.fill(0);

    while reader.remaining() >= RECORD_SIZE {
        let tag = reader.get_u16();
        let value = reader.get_u16();
        match tag {
            EVENT_END => {
                on_event(parameters);
                summary.events += 1;
                parameters.fill(0);
                in_event = false;
            }
            BUFFER_PAD => break,
            RUN_END_PAD => {
                summary.end_of_run = true;
                break;
            }
            t if t & PARAMETER_MARKER != 0 && t & !PARAMETER_MARKER <= MAX_PARAMETER_INDEX => {
                in_event = true;
                match parameters.get_mut(usize::from(t & !PARAMETER_MARKER)) {
                    Some(slot) => *slot = i32::from(value),
                    None => summary.invalid_words += 1,
                }
            }
            _ => summary.invalid_words += 1,
        }
    }

    if in_event {
        summary.discarded_events += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_stops_at_whole_events_and_pads() {
        // Room for two 3-parameter events (16 bytes each) plus 8 spare bytes.
        let mut buffer = [0u8; 40];
        let mut writer = EventBufferWriter::new(&mut buffer);
        let event = [(0, 10), (1, 11), (2, 12)];
        assert!(writer.push_event(&event));
        assert!(writer.push_event(&event));
        assert!(!writer.push_event(&event));
        assert_eq!(writer.finish(false), 2);

        assert_eq!(&buffer[0..4], &[0x80, 0x00, 0x00, 10]);
        assert_eq!(&buffer[12..16], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&buffer[32..], &[0xFF, 0xF0, 0xFF, 0xF0, 0xFF, 0xF0, 0xFF, 0xF0]);
    }

    #[test]
    fn last_buffer_uses_run_end_pad() {
        let mut buffer = [0u8; 12];
        let mut writer = EventBufferWriter::new(&mut buffer);
        assert!(writer.push_event(&[(4, 1)]));
        writer.finish(true);
        assert_eq!(&buffer[8..], &[0xFF, 0x03, 0xFF, 0x03]);
    }

    #[test]
    fn parse_returns_events_in_order() {
        let mut buffer = [0u8; 64];
        let mut writer = EventBufferWriter::new(&mut buffer);
        writer.push_event(&[(0, 100), (2, 300)]);
        writer.push_event(&[(1, 7)]);
        writer.finish(false);

        let mut params = [0i32; 4];
        let mut seen = Vec::new();
        let summary = parse_buffer(&buffer, &mut params, |p| seen.push(p.to_vec()));
        assert_eq!(summary.events, 2);
        assert!(!summary.end_of_run);
        assert_eq!(seen, vec![vec![100, 0, 300, 0], vec![0, 7, 0, 0]]);
    }

    #[test]
    fn parse_flags_end_of_run() {
        let mut buffer = [0u8; 32];
        fill_end_of_run(&mut buffer);
        let summary = parse_buffer(&buffer, &mut [0i32; 2], |_| panic!("no events expected"));
        assert!(summary.end_of_run);
        assert_eq!(summary.events, 0);
    }

    #[test]
    fn parse_counts_truncated_event_and_out_of_range_parameter() {
        let mut buffer = Vec::new();
        buffer.put_u16(PARAMETER_MARKER | 9);
        buffer.put_u16(1);
        buffer.put_u16(EVENT_END);
        buffer.put_u16(EVENT_END);
        buffer.put_u16(PARAMETER_MARKER);
        buffer.put_u16(5);
        buffer.put_u16(BUFFER_PAD);
        buffer.put_u16(BUFFER_PAD);

        let mut params = [0i32; 2];
        let summary = parse_buffer(&buffer, &mut params, |_| {});
        assert_eq!(summary.events, 1);
        assert_eq!(summary.invalid_words, 1);
        assert_eq!(summary.discarded_events, 1);
    }
}
