//! Throughput Tracking
//!
//! Measures market data ticks, order submissions/acks/rejects, IPC
//! command volume, and UI snapshot pushes per second.

use parking_lot::RwLock;
use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

/// Throughput tracker for measuring rates
#[derive(Debug)]
pub struct ThroughputTracker {
    start_time: Instant,

    // Event counters
    pub market_ticks: AtomicU64,
    pub orders_submitted: AtomicU64,
    pub orders_acked: AtomicU64,
    pub orders_rejected: AtomicU64,
    pub orders_cancelled: AtomicU64,
    pub ipc_commands: AtomicU64,
    pub ws_snapshots_pushed: AtomicU64,

    // Sliding window for recent throughput (last 60 seconds)
    pub recent_events: RwLock<VecDeque<TimestampedCount>>,
    window_size_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TimestampedCount {
    pub timestamp: i64,
    pub ticks: u64,
    pub submitted: u64,
    pub acked: u64,
    pub ipc: u64,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            market_ticks: AtomicU64::new(0),
            orders_submitted: AtomicU64::new(0),
            orders_acked: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
            orders_cancelled: AtomicU64::new(0),
            ipc_commands: AtomicU64::new(0),
            ws_snapshots_pushed: AtomicU64::new(0),
            recent_events: RwLock::new(VecDeque::with_capacity(60)),
            window_size_secs: 60,
        }
    }

    /// Record an inbound market-data tick.
    pub fn record_market_tick(&self) {
        self.market_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an order submission to an exchange adapter.
    pub fn record_order_submitted(&self) {
        self.orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an exchange ack.
    pub fn record_order_acked(&self) {
        self.orders_acked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a risk or exchange rejection.
    pub fn record_order_rejected(&self) {
        self.orders_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancel that reached the exchange.
    pub fn record_order_cancelled(&self) {
        self.orders_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an IPC command handled.
    pub fn record_ipc_command(&self) {
        self.ipc_commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a UI snapshot push.
    pub fn record_ws_snapshot(&self) {
        self.ws_snapshots_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot for the sliding window (call every second)
    pub fn snapshot_window(&self) {
        let now = chrono::Utc::now().timestamp();
        let snapshot = TimestampedCount {
            timestamp: now,
            ticks: self.market_ticks.load(Ordering::Relaxed),
            submitted: self.orders_submitted.load(Ordering::Relaxed),
            acked: self.orders_acked.load(Ordering::Relaxed),
            ipc: self.ipc_commands.load(Ordering::Relaxed),
        };

        let mut recent = self.recent_events.write();
        recent.push_back(snapshot);

        while recent.len() > self.window_size_secs as usize {
            recent.pop_front();
        }
    }

    /// Calculate lifetime throughput rates (events per second)
    pub fn rates(&self) -> ThroughputRates {
        let elapsed_secs = self.start_time.elapsed().as_secs_f64().max(1.0);

        ThroughputRates {
            ticks_per_sec: self.market_ticks.load(Ordering::Relaxed) as f64 / elapsed_secs,
            submitted_per_sec: self.orders_submitted.load(Ordering::Relaxed) as f64 / elapsed_secs,
            acked_per_sec: self.orders_acked.load(Ordering::Relaxed) as f64 / elapsed_secs,
            rejected_per_sec: self.orders_rejected.load(Ordering::Relaxed) as f64 / elapsed_secs,
            ipc_per_sec: self.ipc_commands.load(Ordering::Relaxed) as f64 / elapsed_secs,
            ws_snapshots_per_sec: self.ws_snapshots_pushed.load(Ordering::Relaxed) as f64 / elapsed_secs,
        }
    }

    /// Calculate recent throughput (last 60 seconds)
    pub fn recent_rates(&self) -> ThroughputRates {
        let recent = self.recent_events.read();
        if recent.len() < 2 {
            return ThroughputRates::default();
        }

        let first = recent.front().unwrap();
        let last = recent.back().unwrap();
        let elapsed_secs = (last.timestamp - first.timestamp).max(1) as f64;

        ThroughputRates {
            ticks_per_sec: (last.ticks - first.ticks) as f64 / elapsed_secs,
            submitted_per_sec: (last.submitted - first.submitted) as f64 / elapsed_secs,
            acked_per_sec: (last.acked - first.acked) as f64 / elapsed_secs,
            rejected_per_sec: 0.0, // not tracked in window
            ipc_per_sec: (last.ipc - first.ipc) as f64 / elapsed_secs,
            ws_snapshots_per_sec: 0.0,
        }
    }

    /// Get snapshot
    pub fn snapshot(&self) -> ThroughputSnapshot {
        ThroughputSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
            totals: ThroughputTotals {
                market_ticks: self.market_ticks.load(Ordering::Relaxed),
                orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
                orders_acked: self.orders_acked.load(Ordering::Relaxed),
                orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
                orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
                ipc_commands: self.ipc_commands.load(Ordering::Relaxed),
                ws_snapshots_pushed: self.ws_snapshots_pushed.load(Ordering::Relaxed),
            },
            lifetime_rates: self.rates(),
            recent_rates: self.recent_rates(),
        }
    }
}

impl Default for ThroughputTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ThroughputRates {
    pub ticks_per_sec: f64,
    pub submitted_per_sec: f64,
    pub acked_per_sec: f64,
    pub rejected_per_sec: f64,
    pub ipc_per_sec: f64,
    pub ws_snapshots_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputTotals {
    pub market_ticks: u64,
    pub orders_submitted: u64,
    pub orders_acked: u64,
    pub orders_rejected: u64,
    pub orders_cancelled: u64,
    pub ipc_commands: u64,
    pub ws_snapshots_pushed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputSnapshot {
    pub uptime_secs: f64,
    pub totals: ThroughputTotals,
    pub lifetime_rates: ThroughputRates,
    pub recent_rates: ThroughputRates,
}
