//! C3 — multi-producer/single-consumer order-request queue.
//!
//! Many strategy-worker threads enqueue `OrderRequest`s; one OEMS thread
//! drains them. This is Dmitry Vyukov's bounded MPMC queue specialized to a
//! single consumer: each slot carries its own sequence number, so a
//! producer claims a slot with a CAS on the shared head cursor rather than
//! taking a lock, and the consumer advances its tail without any atomic
//! contention from producers.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::cache_pad::CacheAligned;

struct Cell<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send> Sync for Cell<T> {}

pub struct OrderBus<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CacheAligned<AtomicUsize>,
    dequeue_pos: CacheAligned<AtomicUsize>,
}

impl<T> OrderBus<T> {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity.is_power_of_two(), "order bus capacity must be power of two");
        let mut buffer = Vec::with_capacity(capacity);
        for i in 0..capacity {
            buffer.push(Cell {
                sequence: AtomicUsize::new(i),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }
        Arc::new(Self {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            enqueue_pos: CacheAligned::new(AtomicUsize::new(0)),
            dequeue_pos: CacheAligned::new(AtomicUsize::new(0)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Returns a producer handle. Any number of these may exist across
    /// threads — the queue is multi-producer by design.
    pub fn producer(self: &Arc<Self>) -> OrderBusProducer<T> {
        OrderBusProducer { bus: self.clone() }
    }

    /// Returns the single consumer handle. Callers are responsible for
    /// only ever running one at a time (the OEMS worker); the queue does
    /// not enforce this structurally because, unlike the market bus, a
    /// warm-standby OEMS may legitimately hold a second idle handle.
    pub fn consumer(self: &Arc<Self>) -> OrderBusConsumer<T> {
        OrderBusConsumer { bus: self.clone() }
    }

    /// Attempts to enqueue `item`. Returns `false` only when the queue is
    /// full; callers decide the backpressure policy (spin or fail with
    /// `QUEUE_FULL`).
    pub fn try_push(&self, item: T) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*cell.data.get()).write(item) };
                        cell.sequence.store(pos + 1, Ordering::Release);
                        return true;
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                return false; // full
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to dequeue one item. Single-consumer; never blocks.
    pub fn try_pop(&self) -> Option<T> {
        let pos = self.dequeue_pos.load(Ordering::Relaxed);
        let cell = &self.buffer[pos & self.mask];
        let seq = cell.sequence.load(Ordering::Acquire);
        let diff = seq as isize - (pos + 1) as isize;

        if diff == 0 {
            let item = unsafe { (*cell.data.get()).assume_init_read() };
            self.dequeue_pos.store(pos + 1, Ordering::Relaxed);
            cell.sequence.store(pos + self.mask + 1, Ordering::Release);
            Some(item)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        let tail = self.dequeue_pos.load(Ordering::Relaxed);
        let head = self.enqueue_pos.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct OrderBusProducer<T> {
    bus: Arc<OrderBus<T>>,
}

impl<T> Clone for OrderBusProducer<T> {
    fn clone(&self) -> Self {
        Self { bus: self.bus.clone() }
    }
}

impl<T> OrderBusProducer<T> {
    #[inline]
    pub fn try_push(&self, item: T) -> bool {
        self.bus.try_push(item)
    }
}

pub struct OrderBusConsumer<T> {
    bus: Arc<OrderBus<T>>,
}

impl<T> OrderBusConsumer<T> {
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        self.bus.try_pop()
    }

    /// Drains up to `max` requests into `out`, returning the count drained.
    pub fn drain_batch(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.bus.try_pop() {
                Some(item) => {
                    out.push(item);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        self.bus.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn single_producer_fifo() {
        let bus = OrderBus::<u64>::new(16);
        let producer = bus.producer();
        let consumer = bus.consumer();
        for i in 0..10 {
            assert!(producer.try_push(i));
        }
        for i in 0..10 {
            assert_eq!(consumer.try_pop(), Some(i));
        }
        assert_eq!(consumer.try_pop(), None);
    }

    #[test]
    fn reports_full_without_blocking() {
        let bus = OrderBus::<u64>::new(4);
        let producer = bus.producer();
        for i in 0..4 {
            assert!(producer.try_push(i));
        }
        assert!(!producer.try_push(99));
    }

    #[test]
    fn eight_producers_ten_thousand_each_no_loss_no_dupes() {
        let bus = OrderBus::<(u32, u64)>::new(1024);
        let consumer = bus.consumer();

        let handles: Vec<_> = (0..8u32)
            .map(|pid| {
                let producer = bus.producer();
                thread::spawn(move || {
                    for i in 0..10_000u64 {
                        loop {
                            if producer.try_push((pid, i)) {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        let mut received: Vec<(u32, u64)> = Vec::with_capacity(80_000);
        while received.len() < 80_000 {
            if let Some(item) = consumer.try_pop() {
                received.push(item);
            } else {
                std::hint::spin_loop();
            }
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(received.len(), 80_000);

        // FIFO within each producer.
        let mut last_per_producer = [None; 8];
        for &(pid, seq) in &received {
            let last = &mut last_per_producer[pid as usize];
            if let Some(prev) = *last {
                assert!(seq > prev, "producer {pid} saw out-of-order sequence");
            }
            *last = Some(seq);
        }

        // No duplicates.
        let unique: HashSet<(u32, u64)> = received.into_iter().collect();
        assert_eq!(unique.len(), 80_000);
    }
}
