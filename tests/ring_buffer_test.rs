//! Ring buffer behaviour seen from the feeder and sorter side.

use daq_online::data::ring_buffer::RingBuffer;
use daq_online::DaqError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SIZE: usize = 8;

fn slot(byte: u8) -> [u8; SIZE] {
    [byte; SIZE]
}

#[test]
fn full_ring_rejects_then_wraps_around() {
    let ring = RingBuffer::create(3, SIZE, false).unwrap();
    ring.put_buffer(&slot(b'A')).unwrap();
    ring.put_buffer(&slot(b'B')).unwrap();
    ring.put_buffer(&slot(b'C')).unwrap();
    assert!(ring.is_full());

    let err = ring.put_buffer(&slot(b'D')).unwrap_err();
    assert!(matches!(err, DaqError::RingFull { capacity: 3 }));

    let mut out = [0u8; SIZE];
    ring.get_buffer(&mut out).unwrap();
    assert_eq!(out, slot(b'A'));

    // The freed slot is reused at the start of the allocation.
    ring.put_buffer(&slot(b'D')).unwrap();
    for expected in [b'B', b'C', b'D'] {
        ring.get_buffer(&mut out).unwrap();
        assert_eq!(out, slot(expected));
    }
    assert!(ring.is_empty());
}

#[test]
fn order_is_preserved_across_threads() {
    let ring = Arc::new(RingBuffer::create(4, SIZE, false).unwrap());
    let producer = Arc::clone(&ring);
    let handle = thread::spawn(move || {
        for i in 0..200u8 {
            producer
                .put_buffer_wait(&slot(i), Duration::from_secs(5))
                .unwrap();
        }
    });

    let mut out = [0u8; SIZE];
    for i in 0..200u8 {
        ring.get_buffer(&mut out).unwrap();
        assert_eq!(out, slot(i));
    }
    handle.join().unwrap();
}

#[test]
fn occupancy_tracks_puts_and_gets() {
    let ring = RingBuffer::create(4, SIZE, false).unwrap();
    assert_eq!(ring.available_buffers(), 4);
    ring.put_buffer(&slot(1)).unwrap();
    ring.put_buffer(&slot(2)).unwrap();
    assert_eq!(ring.used_buffers(), 2);
    assert!(!ring.is_close_to_full());
    ring.put_buffer(&slot(3)).unwrap();
    assert!(ring.is_close_to_full());
    assert!(!ring.is_full());
}

#[test]
fn clear_empties_without_changing_capacity() {
    let ring = RingBuffer::create(2, SIZE, false).unwrap();
    ring.put_buffer(&slot(1)).unwrap();
    ring.put_buffer(&slot(2)).unwrap();
    ring.clear();
    assert!(ring.is_empty());
    assert_eq!(ring.capacity(), 2);
    assert_eq!(ring.available_buffers(), 2);
    ring.put_buffer(&slot(3)).unwrap();
    let mut out = [0u8; SIZE];
    ring.get_buffer(&mut out).unwrap();
    assert_eq!(out, slot(3));
}

#[test]
fn null_ring_is_both_full_and_empty() {
    let ring = RingBuffer::create(8, SIZE, true).unwrap();
    assert!(ring.is_null());
    assert!(ring.is_full());
    assert!(ring.is_empty());
    assert_eq!(ring.available_buffers(), 0);
    assert!(matches!(
        ring.put_buffer(&slot(1)),
        Err(DaqError::RingFull { capacity: 0 })
    ));
    let mut out = slot(9);
    ring.get_buffer(&mut out).unwrap();
    assert_eq!(out, slot(9));
}

#[test]
fn wrong_destination_size_is_rejected() {
    let ring = RingBuffer::create(2, SIZE, false).unwrap();
    let mut small = [0u8; SIZE - 1];
    assert!(matches!(
        ring.get_buffer(&mut small),
        Err(DaqError::Argument(_))
    ));
}

#[test]
fn short_put_is_zero_filled() {
    let ring = RingBuffer::create(2, SIZE, false).unwrap();
    ring.put_buffer(&slot(0xEE)).unwrap();
    let mut out = [0u8; SIZE];
    ring.get_buffer(&mut out).unwrap();
    ring.put_buffer(&[1, 2]).unwrap();
    ring.get_buffer(&mut out).unwrap();
    assert_eq!(out, [1, 2, 0, 0, 0, 0, 0, 0]);
}
