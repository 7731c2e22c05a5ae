//! C9 — journal logger worker.
//!
//! A dedicated consumer of the market bus (and the OEMS's report stream)
//! that appends every observed frame to disk through the journal writer.
//! Runs on its own CPU so a disk stall never perturbs ingest or strategy
//! dispatch; it holds its own ring tails, so a slow disk only costs this
//! worker dropped-frame counts, never backpressure on the producers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::frames::{AccountEvent, MarketEvent, MsgType, OrderResponse, PositionEvent};
use crate::journal::JournalWriter;
use crate::ring::MarketConsumer;

pub const DRAIN_BATCH: usize = 64;

/// Feeds for a single `JournalLogger` instance. One instance covers the
/// market-data stream; OEMS report logging runs a second instance over
/// the `OrderResponse` bus so each has its own cursor and its own
/// overflow counter.
pub struct JournalLogger<T: Copy + Default> {
    name: &'static str,
    consumer: MarketConsumer<T>,
    writer: JournalWriter,
    running: Arc<AtomicBool>,
    pin_core: Option<usize>,
    realtime: bool,
}

impl<T: Copy + Default> JournalLogger<T> {
    pub fn new(name: &'static str, consumer: MarketConsumer<T>, writer: JournalWriter, running: Arc<AtomicBool>) -> Self {
        Self {
            name,
            consumer,
            writer,
            running,
            pin_core: None,
            realtime: false,
        }
    }

    pub fn with_pin_core(mut self, core: usize) -> Self {
        self.pin_core = Some(core);
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

/// Encodes one frame to journal payload bytes and the `MsgType` tag it
/// should be written under. Kept separate from `JournalLogger` so the
/// same worker shape serves every frame type without an enum wrapper.
pub trait JournalEncodable: Copy {
    fn msg_type(&self) -> MsgType;
    fn gen_time_ns(&self) -> i64;
    fn encode(&self) -> Vec<u8>;
}

impl JournalEncodable for MarketEvent {
    fn msg_type(&self) -> MsgType {
        MsgType::Ticker
    }
    fn gen_time_ns(&self) -> i64 {
        self.ts
    }
    fn encode(&self) -> Vec<u8> {
        crate::wire::as_bytes(self).to_vec()
    }
}

impl JournalEncodable for OrderResponse {
    fn msg_type(&self) -> MsgType {
        MsgType::OrderResponse
    }
    fn gen_time_ns(&self) -> i64 {
        self.ts
    }
    fn encode(&self) -> Vec<u8> {
        crate::wire::as_bytes(self).to_vec()
    }
}

impl JournalEncodable for PositionEvent {
    fn msg_type(&self) -> MsgType {
        MsgType::Position
    }
    fn gen_time_ns(&self) -> i64 {
        self.ts
    }
    fn encode(&self) -> Vec<u8> {
        crate::wire::as_bytes(self).to_vec()
    }
}

impl JournalEncodable for AccountEvent {
    fn msg_type(&self) -> MsgType {
        MsgType::Account
    }
    fn gen_time_ns(&self) -> i64 {
        self.ts
    }
    fn encode(&self) -> Vec<u8> {
        crate::wire::as_bytes(self).to_vec()
    }
}

impl<T: Copy + Default + JournalEncodable> JournalLogger<T> {
    pub fn spawn(mut self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name(format!("journal-logger-{}", self.name))
            .spawn(move || self.run())
            .expect("failed to spawn journal logger thread")
    }

    fn run(&mut self) {
        crate::rt::apply(self.pin_core, self.realtime, "journal-logger");

        info!(stream = self.name, "journal logger starting");
        let mut batch = Vec::with_capacity(DRAIN_BATCH);
        let mut last_reported_drops = 0u64;

        while self.running.load(Ordering::Relaxed) {
            batch.clear();
            self.consumer.pop_batch(&mut batch, DRAIN_BATCH);

            if batch.is_empty() {
                std::hint::spin_loop();
            }

            for frame in &batch {
                let started = std::time::Instant::now();
                let payload = frame.encode();
                let ts = frame.gen_time_ns() as u64;
                if let Err(e) = self.writer.append(frame.msg_type(), ts, ts, 0, 0, &payload) {
                    warn!(stream = self.name, error = %e, "journal append failed");
                    crate::performance::global_profiler().pipeline.record_error("journal_logger");
                    continue;
                }
                crate::performance::global_profiler()
                    .pipeline
                    .record_journal(started.elapsed().as_micros() as u64);
            }

            let dropped = self.consumer.dropped_frames();
            if dropped > last_reported_drops {
                warn!(
                    stream = self.name,
                    dropped = dropped - last_reported_drops,
                    "journal logger fell behind, frames dropped"
                );
                last_reported_drops = dropped;
            }
        }

        debug!(stream = self.name, "journal logger exiting");
    }
}
