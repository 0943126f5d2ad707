//! Lock-free ring buffer between the pump and the device callback.
//!
//! Single producer (the pump, always under the playback-context lock) and
//! single consumer (the cpal callback). Positions only ever grow; the slot
//! index is the position masked by the power-of-two capacity.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free single-producer, single-consumer ring of `f32` samples.
pub struct RingBuffer {
    slots: Box<[UnsafeCell<f32>]>,
    /// Total samples ever consumed.
    head: AtomicUsize,
    /// Total samples ever produced.
    tail: AtomicUsize,
    mask: usize,
}

impl RingBuffer {
    /// Create a new ring buffer.
    ///
    /// The capacity is rounded up to the next power of 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity).map(|_| UnsafeCell::new(0.0)).collect();

        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            mask: capacity - 1,
        }
    }

    /// Get the buffer capacity in samples.
    pub const fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Get the number of samples waiting to be consumed.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// Get the number of free slots for writing.
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split `count` samples starting at `pos` into at most two contiguous runs.
    const fn runs(&self, pos: usize, count: usize) -> (usize, usize, usize) {
        let start = pos & self.mask;
        let first = if count < self.capacity() - start {
            count
        } else {
            self.capacity() - start
        };
        (start, first, count - first)
    }

    /// Append samples, returning how many fit.
    ///
    /// Producer side only.
    pub fn push(&self, samples: &[f32]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        let count = samples.len().min(self.capacity() - tail.wrapping_sub(head));
        if count == 0 {
            return 0;
        }

        let (start, first, second) = self.runs(tail, count);
        #[allow(unsafe_code)]
        // SAFETY: slots in [tail, tail + count) are not visible to the consumer
        // until `tail` is published below, and there is only one producer.
        unsafe {
            let base = UnsafeCell::raw_get(self.slots.as_ptr());
            std::ptr::copy_nonoverlapping(samples.as_ptr(), base.add(start), first);
            std::ptr::copy_nonoverlapping(samples.as_ptr().add(first), base, second);
        }

        self.tail.store(tail.wrapping_add(count), Ordering::Release);
        count
    }

    /// Move up to `out.len()` samples into `out`, returning how many were read.
    ///
    /// Consumer side only.
    pub fn pop_into(&self, out: &mut [f32]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        let count = out.len().min(tail.wrapping_sub(head));
        if count == 0 {
            return 0;
        }

        let (start, first, second) = self.runs(head, count);
        #[allow(unsafe_code)]
        // SAFETY: slots in [head, head + count) were published by the producer
        // and are not reused until `head` advances below.
        unsafe {
            let base = UnsafeCell::raw_get(self.slots.as_ptr());
            std::ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), second);
        }

        self.head.store(head.wrapping_add(count), Ordering::Release);
        count
    }
}

// SAFETY: producer and consumer touch disjoint slot ranges, coordinated by the
// acquire/release pairs on `head` and `tail`.
#[allow(unsafe_code)]
unsafe impl Sync for RingBuffer {}

/// Thread-safe reference to a ring buffer.
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer.
pub fn shared_ring_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}
