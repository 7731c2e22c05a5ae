//! C6 — strategy worker.
//!
//! A CPU-pinned thread hosting an ordered list of strategies, each fed
//! every frame off the market bus in registration order. Spin/yield
//! pacing (spin_loop while idle, escalate to `yield_now` past a
//! threshold) is grounded on the matching-engine worker loops that share
//! a lock-free queue with a producer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::frames::{MarketEvent, OrderRequest};
use crate::ring::{MarketConsumer, OrderBusProducer};

/// Batch size polled from the market bus per loop iteration.
pub const POLL_BATCH: usize = 64;
/// Consecutive empty polls before the worker escalates from a bare
/// spin-loop hint to `thread::yield_now`.
pub const PAUSE_HINT_THRESHOLD: u32 = 1024;

/// One trading strategy hosted inside a [`StrategyWorker`].
///
/// `on_market` must not block on I/O, allocate, or retain `event` past
/// the call — the worker reuses its batch buffer across frames. Orders
/// are built on the caller's stack and handed to `send_order`, which
/// copies the frame into the MPSC order bus.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn on_market(&mut self, event: &MarketEvent, send_order: &mut dyn FnMut(OrderRequest) -> bool);

    /// Strategies that set this true suppress the worker's yield
    /// escalation entirely — they always spin, trading CPU for latency.
    fn is_hot(&self) -> bool {
        false
    }
}

/// Runs an ordered list of strategies against one market bus consumer on
/// a dedicated thread.
pub struct StrategyWorker {
    strategies: Vec<Box<dyn Strategy>>,
    consumer: MarketConsumer<MarketEvent>,
    order_producer: OrderBusProducer<OrderRequest>,
    running: Arc<AtomicBool>,
    pin_core: Option<usize>,
    realtime: bool,
}

impl StrategyWorker {
    pub fn new(
        strategies: Vec<Box<dyn Strategy>>,
        consumer: MarketConsumer<MarketEvent>,
        order_producer: OrderBusProducer<OrderRequest>,
        running: Arc<AtomicBool>,
        pin_core: Option<usize>,
    ) -> Self {
        Self {
            strategies,
            consumer,
            order_producer,
            running,
            pin_core,
            realtime: false,
        }
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Spawns the worker on its own OS thread, pinned if `pin_core` was
    /// given. Blocks the calling thread only long enough to hand off;
    /// returns the `JoinHandle` so the engine shell can await shutdown.
    pub fn spawn(mut self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("strategy-worker".to_string())
            .spawn(move || self.run())
            .expect("failed to spawn strategy worker thread")
    }

    fn run(&mut self) {
        crate::rt::apply(self.pin_core, self.realtime, "strategy-worker");

        info!(
            strategies = self.strategies.len(),
            "strategy worker starting"
        );

        let mut batch: Vec<MarketEvent> = Vec::with_capacity(POLL_BATCH);
        let mut empty_polls: u32 = 0;

        while self.running.load(Ordering::Relaxed) {
            batch.clear();
            self.consumer.pop_batch(&mut batch, POLL_BATCH);

            if batch.is_empty() {
                empty_polls += 1;
                let any_hot = self.strategies.iter().any(|s| s.is_hot());
                if any_hot {
                    std::hint::spin_loop();
                } else if empty_polls > PAUSE_HINT_THRESHOLD {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
                continue;
            }
            empty_polls = 0;

            for event in &batch {
                let started = Instant::now();
                for strategy in self.strategies.iter_mut() {
                    let producer = &self.order_producer;
                    strategy.on_market(event, &mut |req| producer.try_push(req));
                }
                crate::performance::global_profiler()
                    .pipeline
                    .record_strategy(started.elapsed().as_micros() as u64);
            }
        }

        debug!("strategy worker exiting");
    }

    pub fn dropped_frames(&self) -> u64 {
        self.consumer.dropped_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{ExchangeId, MarketEventType, OrdType, Side, SymbolId};
    use crate::ring::{MarketBus, OrderBus};
    use std::sync::Mutex as StdMutex;

    struct CountingStrategy {
        seen: Arc<StdMutex<Vec<f64>>>,
    }

    impl Strategy for CountingStrategy {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_market(&mut self, event: &MarketEvent, send_order: &mut dyn FnMut(OrderRequest) -> bool) {
            self.seen.lock().unwrap().push(event.last);
            if event.last > 100.0 {
                let req = OrderRequest::new(
                    event.ts,
                    1,
                    event.exchange_id,
                    event.symbol_id,
                    1,
                    Side::Buy,
                    OrdType::Market,
                    0.0,
                    1.0,
                    0,
                    "counting",
                );
                send_order(req);
            }
        }
    }

    #[test]
    fn dispatches_frames_to_strategies_in_order() {
        let bus = MarketBus::<MarketEvent>::new(16);
        let mut producer = bus.producer().unwrap();
        let consumer = bus.consumer();
        let order_bus = OrderBus::<OrderRequest>::new(16);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let strategies: Vec<Box<dyn Strategy>> = vec![Box::new(CountingStrategy { seen: seen.clone() })];
        let running = Arc::new(AtomicBool::new(true));

        let mut worker = StrategyWorker::new(
            strategies,
            consumer,
            order_bus.producer(),
            running.clone(),
            None,
        );

        producer.publish(MarketEvent::new(
            1,
            0,
            MarketEventType::Ticker,
            0 as ExchangeId,
            0 as SymbolId,
            150.0,
            149.0,
            151.0,
            10.0,
            1.0,
        ));

        let mut batch = Vec::new();
        worker.consumer.pop_batch(&mut batch, 64);
        for event in &batch {
            for s in worker.strategies.iter_mut() {
                let p = &worker.order_producer;
                s.on_market(event, &mut |req| p.try_push(req));
            }
        }

        assert_eq!(*seen.lock().unwrap(), vec![150.0]);
        let consumer = order_bus.consumer();
        assert!(consumer.try_pop().is_some());
    }
}
