//! Fixed-capacity ring of fixed-size event buffers.
//!
//! The ring decouples the thread that receives raw event buffers (the data feeder)
//! from the thread that sorts them. It holds `capacity` slots of `buffer_size` bytes
//! each in one contiguous allocation, plus head/tail indices and an occupancy count.
//!
//! # Contract
//! - [`RingBuffer::put_buffer`] copies into the next free slot, or fails with
//!   [`DaqError::RingFull`] without touching the ring. It never blocks.
//! - [`RingBuffer::get_buffer`] copies out the oldest occupied slot (strict FIFO) and
//!   blocks while the ring is empty.
//! - [`RingBuffer::clear`] resets indices between runs; capacity never changes.
//!
//! # Variants
//! [`RingBuffer::create`] picks one of a closed set of implementations:
//! - **Locked**: mutex-protected state with two condition variables, one waking a
//!   consumer blocked on an empty ring, one waking a producer waiting for space.
//! - **Null**: zero capacity, used when no buffering is configured. It is always
//!   full *and* empty, rejects every put, and `get` returns immediately.
//!
//! # Memory Layout
//! ```text
//! slot 0             slot 1                   slot capacity-1
//! [buffer_size bytes][buffer_size bytes] ... [buffer_size bytes]
//!  ^head (oldest)                 ^tail (next free)
//! ```

use crate::error::{AppResult, DaqError};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default number of buffers in the ring.
pub const NUMBER_BUFFERS: usize = 8;

/// Default size of one event buffer in bytes.
pub const BUFFER_SIZE: usize = 8192;

/// Bounded FIFO of fixed-size byte buffers shared by one producer and one consumer.
#[derive(Debug)]
pub struct RingBuffer {
    buffer_size: usize,
    kind: RingKind,
}

#[derive(Debug)]
enum RingKind {
    Null,
    Locked(LockedRing),
}

#[derive(Debug)]
struct LockedRing {
    capacity: usize,
    state: Mutex<RingState>,
    /// Signalled after a put.
    not_empty: Condvar,
    /// Signalled after a get or clear.
    not_full: Condvar,
}

#[derive(Debug)]
struct RingState {
    slots: Vec<u8>,
    head: usize,
    tail: usize,
    occupied: usize,
}

impl RingBuffer {
    /// Creates a ring of `capacity` buffers of `buffer_size` bytes.
    ///
    /// With `empty` set (or a zero capacity) the null variant is returned. Fails
    /// with [`DaqError::Argument`] if the slots would not fit in memory.
    ///
    /// # Example
    /// ```
    /// use daq_online::data::ring_buffer::RingBuffer;
    ///
    /// let ring = RingBuffer::create(4, 16, false).unwrap();
    /// ring.put_buffer(&[7u8; 16]).unwrap();
    /// let mut out = [0u8; 16];
    /// ring.get_buffer(&mut out).unwrap();
    /// assert_eq!(out, [7u8; 16]);
    /// ```
    pub fn create(capacity: usize, buffer_size: usize, empty: bool) -> AppResult<Self> {
        if empty || capacity == 0 {
            return Ok(Self::null(buffer_size));
        }
        let total = capacity
            .checked_mul(buffer_size)
            .filter(|&total| total <= isize::MAX as usize)
            .ok_or_else(|| {
                DaqError::Argument(format!(
                    "{capacity} buffers of {buffer_size} bytes overflow the address space"
                ))
            })?;
        Ok(Self {
            buffer_size,
            kind: RingKind::Locked(LockedRing {
                capacity,
                state: Mutex::new(RingState {
                    slots: vec![0u8; total],
                    head: 0,
                    tail: 0,
                    occupied: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        })
    }

    /// Creates the null ring.
    pub fn null(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            kind: RingKind::Null,
        }
    }

    /// True for the zero-capacity variant.
    pub fn is_null(&self) -> bool {
        matches!(self.kind, RingKind::Null)
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        match &self.kind {
            RingKind::Null => 0,
            RingKind::Locked(ring) => ring.capacity,
        }
    }

    /// Size of each slot in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Copies `data` into the next free slot.
    ///
    /// `data` may be shorter than a slot; the remainder is zero-filled.
    pub fn put_buffer(&self, data: &[u8]) -> AppResult<()> {
        self.check_source(data)?;
        match &self.kind {
            RingKind::Null => Err(DaqError::RingFull { capacity: 0 }),
            RingKind::Locked(ring) => {
                let mut state = ring.lock();
                if state.occupied == ring.capacity {
                    return Err(DaqError::RingFull {
                        capacity: ring.capacity,
                    });
                }
                ring.store(&mut state, data, self.buffer_size);
                Ok(())
            }
        }
    }

    /// Like [`put_buffer`](Self::put_buffer) but waits up to `timeout` for a free slot.
    ///
    /// Fails with [`DaqError::RingFull`] if no slot frees up in time. The null ring
    /// fails immediately.
    pub fn put_buffer_wait(&self, data: &[u8], timeout: Duration) -> AppResult<()> {
        self.check_source(data)?;
        match &self.kind {
            RingKind::Null => Err(DaqError::RingFull { capacity: 0 }),
            RingKind::Locked(ring) => {
                let deadline = Instant::now() + timeout;
                let mut state = ring.lock();
                while state.occupied == ring.capacity {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(DaqError::RingFull {
                            capacity: ring.capacity,
                        });
                    }
                    state = ring
                        .not_full
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                ring.store(&mut state, data, self.buffer_size);
                Ok(())
            }
        }
    }

    /// Copies the oldest buffer into `destination`, blocking while the ring is empty.
    ///
    /// `destination` must be exactly one slot long. On the null ring this is a no-op.
    pub fn get_buffer(&self, destination: &mut [u8]) -> AppResult<()> {
        self.check_destination(destination)?;
        if let RingKind::Locked(ring) = &self.kind {
            let mut state = ring.lock();
            while state.occupied == 0 {
                state = ring
                    .not_empty
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            ring.take(&mut state, destination, self.buffer_size);
        }
        Ok(())
    }

    /// Like [`get_buffer`](Self::get_buffer) but gives up after `timeout`.
    ///
    /// Returns `Ok(true)` if a buffer was copied out. The null ring returns `Ok(false)`
    /// at once.
    pub fn get_buffer_timeout(&self, destination: &mut [u8], timeout: Duration) -> AppResult<bool> {
        self.check_destination(destination)?;
        match &self.kind {
            RingKind::Null => Ok(false),
            RingKind::Locked(ring) => {
                let state = ring.lock();
                let (mut state, _) = ring
                    .not_empty
                    .wait_timeout_while(state, timeout, |s| s.occupied == 0)
                    .unwrap_or_else(PoisonError::into_inner);
                if state.occupied == 0 {
                    return Ok(false);
                }
                ring.take(&mut state, destination, self.buffer_size);
                Ok(true)
            }
        }
    }

    /// Discards every buffer. Capacity is unchanged.
    pub fn clear(&self) {
        if let RingKind::Locked(ring) = &self.kind {
            let mut state = ring.lock();
            state.head = 0;
            state.tail = 0;
            state.occupied = 0;
            ring.not_full.notify_all();
        }
    }

    /// True when no buffer is waiting. Always true for the null ring.
    pub fn is_empty(&self) -> bool {
        self.used_buffers() == 0
    }

    /// True when no slot is free. Always true for the null ring.
    pub fn is_full(&self) -> bool {
        self.available_buffers() == 0
    }

    /// True when at most one slot is free.
    pub fn is_close_to_full(&self) -> bool {
        self.used_buffers() + 1 >= self.capacity()
    }

    /// Number of free slots.
    pub fn available_buffers(&self) -> usize {
        match &self.kind {
            RingKind::Null => 0,
            RingKind::Locked(ring) => ring.capacity - ring.lock().occupied,
        }
    }

    /// Number of occupied slots.
    pub fn used_buffers(&self) -> usize {
        match &self.kind {
            RingKind::Null => 0,
            RingKind::Locked(ring) => ring.lock().occupied,
        }
    }

    fn check_source(&self, data: &[u8]) -> AppResult<()> {
        if data.len() > self.buffer_size {
            return Err(DaqError::Argument(format!(
                "buffer of {} bytes exceeds ring slot size {}",
                data.len(),
                self.buffer_size
            )));
        }
        Ok(())
    }

    fn check_destination(&self, destination: &[u8]) -> AppResult<()> {
        if destination.len() != self.buffer_size {
            return Err(DaqError::Argument(format!(
                "destination of {} bytes does not match ring slot size {}",
                destination.len(),
                self.buffer_size
            )));
        }
        Ok(())
    }
}

impl LockedRing {
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self, state: &mut RingState, data: &[u8], buffer_size: usize) {
        let start = state.tail * buffer_size;
        let slot = &mut state.slots[start..start + buffer_size];
        slot[..data.len()].copy_from_slice(data);
        slot[data.len()..].fill(0);
        state.tail = (state.tail + 1) % self.capacity;
        state.occupied += 1;
        self.not_empty.notify_one();
    }

    fn take(&self, state: &mut RingState, destination: &mut [u8], buffer_size: usize) {
        let start = state.head * buffer_size;
        destination.copy_from_slice(&state.slots[start..start + buffer_size]);
        state.head = (state.head + 1) % self.capacity;
        state.occupied -= 1;
        self.not_full.notify_one();
    }
}
