//! Single-producer/single-consumer sample queue
//!
//! Bridges the decoder (producer) and the real-time pull callback (consumer)
//! without a lock. Both indices live in `0..capacity`; one slot is always
//! left empty so `read == write` unambiguously means "empty".
//!
//! ```text
//!        read                 write
//!         │                     │
//!   ┌─────▼─────────────────────▼──────────┐
//!   │     ██████████████████████           │   capacity C
//!   └──────────────────────────────────────┘
//!         └──── available_for_read ───┘
//!   available_for_read + available_for_write == C - 1
//! ```
//!
//! Power-of-two capacities wrap with a mask instead of a modulo; the
//! contract is identical either way.
//!
//! [`RingBuffer::clear`] runs on the producer side while the consumer may be
//! mid-read. It empties the buffer by moving the read index onto the write
//! index, then waits out any read in flight; that read's index update is a
//! compare-exchange against the index it started from, so it fails and the
//! samples it copied are discarded. The producer can therefore refill right
//! after `clear` returns without touching slots the consumer still reads.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::types::Sample;

/// Lock-free SPSC ring buffer of mono samples
///
/// Exactly one thread may call [`write`](Self::write) and exactly one
/// (other) thread may call [`read`](Self::read) at a time. [`clear`](Self::clear)
/// belongs to the producer side: it must not race a concurrent `write` (the
/// session only clears under its decode lock) but may race `read`.
pub struct RingBuffer {
    data: Box<[UnsafeCell<Sample>]>,
    capacity: usize,
    /// `capacity - 1` when capacity is a power of two
    mask: Option<usize>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    /// Set by the consumer for the duration of a `read`
    reading: AtomicBool,
}

// SAFETY: the producer only touches slots in [write, read - 1) and the
// consumer only touches slots in [read, write). The release/acquire pairs on
// the two indices order those accesses, so no slot is ever accessed by both
// sides at once.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a ring buffer with `capacity` slots (`capacity - 1` usable)
    ///
    /// Capacities below 2 are raised to 2 so that at least one sample fits.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let data = (0..capacity)
            .map(|_| UnsafeCell::new(0.0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let mask = capacity.is_power_of_two().then(|| capacity - 1);

        Self {
            data,
            capacity,
            mask,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            reading: AtomicBool::new(false),
        }
    }

    /// Total number of slots (one more than can ever be occupied)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn advance(&self, pos: usize, by: usize) -> usize {
        match self.mask {
            Some(mask) => (pos + by) & mask,
            None => (pos + by) % self.capacity,
        }
    }

    #[inline]
    fn occupied(&self, write: usize, read: usize) -> usize {
        if write >= read {
            write - read
        } else {
            self.capacity - read + write
        }
    }

    #[inline]
    fn base_ptr(&self) -> *mut Sample {
        // UnsafeCell<T> is repr(transparent), so the slice is a plain [Sample]
        self.data.as_ptr() as *mut Sample
    }

    /// Samples ready to be read
    pub fn available_for_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.occupied(write, read)
    }

    /// Free slots the producer may fill
    pub fn available_for_write(&self) -> usize {
        self.capacity - 1 - self.available_for_read()
    }

    /// Copy as many samples from `src` as fit; returns the number written
    ///
    /// Never blocks and never overwrites unread data.
    pub fn write(&self, src: &[Sample]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity - 1 - self.occupied(write, read);
        let count = src.len().min(free);
        if count == 0 {
            return 0;
        }

        let first = count.min(self.capacity - write);
        let base = self.base_ptr();
        // SAFETY: [write, write + count) (wrapping) is free space owned by
        // the producer; both spans lie inside the allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(write), first);
            if count > first {
                std::ptr::copy_nonoverlapping(src.as_ptr().add(first), base, count - first);
            }
        }

        self.write_pos
            .store(self.advance(write, count), Ordering::Release);
        count
    }

    /// Copy up to `dst.len()` samples out; returns the number read
    ///
    /// Any part of `dst` that could not be filled is zeroed, so an empty
    /// buffer yields silence and a return value of 0.
    pub fn read(&self, dst: &mut [Sample]) -> usize {
        // Pairs with the SeqCst store/load in `clear`: either clear sees us
        // reading and waits, or we see the index it moved
        self.reading.store(true, Ordering::SeqCst);
        let read = self.read_pos.load(Ordering::SeqCst);
        let write = self.write_pos.load(Ordering::Acquire);
        let mut count = dst.len().min(self.occupied(write, read));

        if count > 0 {
            let first = count.min(self.capacity - read);
            let base = self.base_ptr();
            // SAFETY: [read, read + count) (wrapping) was published by the
            // producer's release store. The producer does not reuse these
            // slots until the read index moves past them, and `clear` waits
            // for this read to finish before the producer writes again.
            unsafe {
                std::ptr::copy_nonoverlapping(base.add(read), dst.as_mut_ptr(), first);
                if count > first {
                    std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), count - first);
                }
            }
            let advanced = self.advance(read, count);
            if self
                .read_pos
                .compare_exchange(read, advanced, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                // Cleared underneath us; what we copied is stale
                count = 0;
            }
        }
        self.reading.store(false, Ordering::Release);

        dst[count..].fill(0.0);
        count
    }

    /// Drop everything buffered
    ///
    /// Producer side. Returns once no read started before the clear is
    /// still running.
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::SeqCst);
        while self.reading.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.available_for_read() == 0
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("available_for_read", &self.available_for_read())
            .finish()
    }
}
