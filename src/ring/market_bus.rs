//! C2 — single-producer/multi-consumer market-data ring.
//!
//! One producer (the market-data ingress thread) publishes frames; any
//! number of consumers (strategy workers, the journal logger) read at
//! their own pace via an independent cursor. The ring never blocks the
//! producer: a slow consumer simply loses frames and counts the loss.
//! Grounded on the classic SPSC-cursor ring (cached head/tail, release/
//! acquire publication) generalized here to many independent consumer
//! cursors instead of one.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::cache_pad::CacheAligned;

#[repr(align(64))]
struct Slot<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for Slot<T> {}

/// Shared ring state: the slot storage and the producer's published
/// cursor. Consumers each hold their own tail, stored in [`Consumer`].
pub struct MarketBus<T: Copy + Default> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    capacity: u64,
    head: CacheAligned<AtomicU64>,
    producer_taken: std::sync::atomic::AtomicBool,
}

impl<T: Copy + Default> MarketBus<T> {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity.is_power_of_two(), "ring capacity must be power of two");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot(UnsafeCell::new(T::default())));
        Arc::new(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
            head: CacheAligned::new(AtomicU64::new(0)),
            producer_taken: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Takes ownership of the single producer handle. Returns `None` if a
    /// producer handle was already taken — enforces single-producer by
    /// construction rather than convention.
    pub fn producer(self: &Arc<Self>) -> Option<Producer<T>> {
        if self
            .producer_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(Producer {
                bus: self.clone(),
                next: 0,
            })
        } else {
            None
        }
    }

    /// Creates a new, independent consumer cursor starting at the current
    /// head (i.e. it only sees frames published from now on).
    pub fn consumer(self: &Arc<Self>) -> Consumer<T> {
        Consumer {
            bus: self.clone(),
            tail: self.head.load(Ordering::Acquire),
            dropped: 0,
        }
    }

    #[inline]
    unsafe fn read_slot(&self, idx: u64) -> T {
        *self.slots[(idx & self.mask) as usize].0.get()
    }

    #[inline]
    unsafe fn write_slot(&self, idx: u64, value: T) {
        *self.slots[(idx & self.mask) as usize].0.get() = value;
    }
}

/// The sole producer handle for a [`MarketBus`]. Never blocks; publishing
/// always succeeds by overwriting the oldest slot if consumers haven't
/// kept up.
pub struct Producer<T: Copy + Default> {
    bus: Arc<MarketBus<T>>,
    next: u64,
}

impl<T: Copy + Default> Producer<T> {
    /// Publishes a frame. Two-phase under the hood (write, then a single
    /// release store of the new head) but exposed as one call since callers
    /// always have the full frame in hand before publishing.
    #[inline]
    pub fn publish(&mut self, frame: T) {
        let idx = self.next;
        unsafe { self.bus.write_slot(idx, frame) };
        self.bus.head.store(idx + 1, Ordering::Release);
        self.next = idx + 1;
    }

    /// Reserves the next slot for in-place construction, avoiding a copy
    /// for large frames (e.g. `DepthEvent`). The slot is published when
    /// the guard drops.
    #[inline]
    pub fn reserve(&mut self) -> ReserveGuard<'_, T> {
        let idx = self.next;
        self.next = idx + 1;
        ReserveGuard {
            bus: &self.bus,
            idx,
        }
    }
}

pub struct ReserveGuard<'a, T: Copy + Default> {
    bus: &'a Arc<MarketBus<T>>,
    idx: u64,
}

impl<'a, T: Copy + Default> std::ops::Deref for ReserveGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.bus.slots[(self.idx & self.bus.mask) as usize].0.get() }
    }
}

impl<'a, T: Copy + Default> std::ops::DerefMut for ReserveGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.bus.slots[(self.idx & self.bus.mask) as usize].0.get() }
    }
}

impl<'a, T: Copy + Default> Drop for ReserveGuard<'a, T> {
    fn drop(&mut self) {
        self.bus.head.store(self.idx + 1, Ordering::Release);
    }
}

/// An independent read cursor into a [`MarketBus`]. Spins with a pause
/// hint while empty; never blocks on an OS primitive.
pub struct Consumer<T: Copy + Default> {
    bus: Arc<MarketBus<T>>,
    tail: u64,
    dropped: u64,
}

impl<T: Copy + Default> Consumer<T> {
    /// Total frames this consumer has lost to producer overwrite.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    fn catch_up_if_lapped(&mut self, head: u64) {
        if head.saturating_sub(self.tail) > self.bus.capacity {
            let behind = head - self.bus.capacity - self.tail;
            self.dropped += behind;
            self.tail = head - self.bus.capacity;
        }
    }

    /// Pops a single frame, if one is available.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let head = self.bus.head.load(Ordering::Acquire);
        self.catch_up_if_lapped(head);
        if self.tail >= head {
            return None;
        }
        let tail_before = self.tail;
        let frame = unsafe { self.bus.read_slot(tail_before) };
        // The producer may have lapped us while we copied; if so the slot
        // we just read was concurrently overwritten and the frame is
        // corrupt. Detect and count it as a drop instead of returning
        // torn data.
        let head_after = self.bus.head.load(Ordering::Acquire);
        if head_after.saturating_sub(tail_before) > self.bus.capacity {
            self.dropped += 1;
            self.tail = head_after - self.bus.capacity;
            return self.pop();
        }
        self.tail = tail_before + 1;
        Some(frame)
    }

    /// Pops up to `max` frames into `out`, returning the number popped.
    pub fn pop_batch(&mut self, out: &mut Vec<T>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.pop() {
                Some(frame) => {
                    out.push(frame);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
    struct Tick(u64);

    #[test]
    fn publish_then_pop_in_order() {
        let bus = MarketBus::<Tick>::new(8);
        let mut producer = bus.producer().unwrap();
        let mut consumer = bus.consumer();

        for i in 0..5 {
            producer.publish(Tick(i));
        }
        let mut out = Vec::new();
        consumer.pop_batch(&mut out, 10);
        assert_eq!(out, vec![Tick(0), Tick(1), Tick(2), Tick(3), Tick(4)]);
        assert_eq!(consumer.dropped_frames(), 0);
    }

    #[test]
    fn only_one_producer_handle_can_be_taken() {
        let bus = MarketBus::<Tick>::new(4);
        let p1 = bus.producer();
        let p2 = bus.producer();
        assert!(p1.is_some());
        assert!(p2.is_none());
    }

    #[test]
    fn slow_consumer_detects_loss_and_skips_forward() {
        let bus = MarketBus::<Tick>::new(4);
        let mut producer = bus.producer().unwrap();
        let mut consumer = bus.consumer();

        // Publish far more than capacity before the consumer reads at all.
        for i in 0..20u64 {
            producer.publish(Tick(i));
        }

        let first = consumer.pop().unwrap();
        // The consumer should have jumped forward to head - capacity.
        assert!(first.0 >= 20 - 4);
        assert!(consumer.dropped_frames() > 0);
    }

    #[test]
    fn independent_consumers_each_see_full_unlapped_stream() {
        let bus = MarketBus::<Tick>::new(16);
        let mut producer = bus.producer().unwrap();
        let mut slow = bus.consumer();

        producer.publish(Tick(1));
        producer.publish(Tick(2));

        let mut fast = bus.consumer();
        producer.publish(Tick(3));

        let mut out_slow = Vec::new();
        slow.pop_batch(&mut out_slow, 10);
        assert_eq!(out_slow, vec![Tick(1), Tick(2), Tick(3)]);

        // `fast` was created after frames 1 and 2 were published, so it
        // only observes frame 3.
        let mut out_fast = Vec::new();
        fast.pop_batch(&mut out_fast, 10);
        assert_eq!(out_fast, vec![Tick(3)]);
    }

    #[test]
    fn reserve_guard_publishes_on_drop() {
        let bus = MarketBus::<Tick>::new(4);
        let mut producer = bus.producer().unwrap();
        let mut consumer = bus.consumer();
        {
            let mut slot = producer.reserve();
            *slot = Tick(99);
        }
        assert_eq!(consumer.pop(), Some(Tick(99)));
    }
}
