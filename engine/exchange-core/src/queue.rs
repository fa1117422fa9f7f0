// engine/exchange-core/src/queue.rs
//
// Bounded lock-free SPSC ring buffer. One of these sits at each boundary
// of the core thread: commands in, sequenced events out. Exactly one
// producer thread and one consumer thread per queue; the producer owns
// `tail`, the consumer owns `head`, and each reads the other's index with
// acquire ordering.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct SpscQueue<T> {
    buffer: Box<[UnsafeCell<Option<T>>]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: slots are only written by the single producer before it
// publishes `tail`, and only taken by the single consumer before it
// publishes `head`; the release/acquire pairs order those accesses.
unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Capacity is rounded up to a power of two; one slot stays unused to
    /// distinguish full from empty.
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.next_power_of_two().max(2);
        let mut buffer = Vec::with_capacity(cap);
        for _ in 0..cap {
            buffer.push(UnsafeCell::new(None));
        }
        Self {
            buffer: buffer.into_boxed_slice(),
            mask: cap - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail.wrapping_sub(head)) & self.mask
    }

    /// Producer side. A full queue hands the value back so the caller can
    /// apply its own backpressure policy.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & self.mask;
        if next == self.head.load(Ordering::Acquire) {
            return Err(value);
        }
        unsafe {
            *self.buffer.get_unchecked(tail).get() = Some(value);
        }
        self.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Consumer side.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let value = unsafe { (*self.buffer.get_unchecked(head).get()).take() };
        self.head.store((head + 1) & self.mask, Ordering::Release);
        value
    }
}
