//! Performance Measurement Module
//!
//! Comprehensive profiling for the trading engine:
//! - Memory usage (heap allocations, peak usage)
//! - CPU time and hot path detection
//! - IO bottlenecks (disk, network)
//! - Throughput (ticks/sec, orders/sec)
//! - Latency (response time, tick-to-order, tail latency p99/p999)
//!
//! Integrates with:
//! - tracing ecosystem for structured logging and flamegraph generation
//! - Custom allocator tracking for memory profiling
//! - Histograms for latency distribution analysis

pub mod allocator;
pub mod cpu;
pub mod io;
pub mod latency;
pub mod memory;
pub mod metrics;
pub mod network;
pub mod queues;
pub mod report;
pub mod throughput;
pub mod tracing_layer;

pub use allocator::*;
pub use metrics::*;
pub use network::*;
pub use queues::*;
pub use report::*;

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// Global performance profiler instance
static PROFILER: std::sync::OnceLock<Arc<PerformanceProfiler>> = std::sync::OnceLock::new();

pub fn global_profiler() -> &'static Arc<PerformanceProfiler> {
    PROFILER.get_or_init(|| Arc::new(PerformanceProfiler::new()))
}

/// Initialize the performance profiler (call early in main)
pub fn init() {
    let _ = global_profiler();
    tracing::info!("Performance profiler initialized");
}

/// Central performance profiler that aggregates all metrics
#[derive(Debug)]
pub struct PerformanceProfiler {
    pub memory: memory::MemoryProfiler,
    pub cpu: cpu::CpuProfiler,
    pub io: io::IoProfiler,
    pub throughput: throughput::ThroughputTracker,
    pub start_time: Instant,

    /// Component-specific profilers for the data ingestion pipeline
    pub pipeline: PipelineProfiler,
}

impl PerformanceProfiler {
    pub fn new() -> Self {
        Self {
            memory: memory::MemoryProfiler::new(),
            cpu: cpu::CpuProfiler::new(),
            io: io::IoProfiler::new(),
            throughput: throughput::ThroughputTracker::new(),
            start_time: Instant::now(),
            pipeline: PipelineProfiler::new(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Generate a full performance report
    pub fn report(&self) -> PerformanceReport {
        PerformanceReport {
            timestamp: chrono::Utc::now().timestamp(),
            uptime_secs: self.uptime_secs(),
            memory: self.memory.snapshot(),
            cpu: self.cpu.snapshot(),
            io: self.io.snapshot(),
            throughput: self.throughput.snapshot(),
            pipeline: self.pipeline.snapshot(),
        }
    }
}

impl Default for PerformanceProfiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Profiler for the trading pipeline's named components.
#[derive(Debug)]
pub struct PipelineProfiler {
    /// C5 market-data ingress (per-exchange WebSocket adapters)
    pub md_ingress: RwLock<ComponentMetrics>,
    /// C6 strategy worker `on_market` dispatch
    pub strategy_worker: RwLock<ComponentMetrics>,
    /// C7 OEMS drain-and-submit loop
    pub oems: RwLock<ComponentMetrics>,
    /// C9 journal logger writes
    pub journal_logger: RwLock<ComponentMetrics>,
    /// C10 IPC server socket traffic
    pub ipc_server: RwLock<ComponentMetrics>,
}

impl PipelineProfiler {
    pub fn new() -> Self {
        Self {
            md_ingress: RwLock::new(ComponentMetrics::new("md_ingress")),
            strategy_worker: RwLock::new(ComponentMetrics::new("strategy_worker")),
            oems: RwLock::new(ComponentMetrics::new("oems")),
            journal_logger: RwLock::new(ComponentMetrics::new("journal_logger")),
            ipc_server: RwLock::new(ComponentMetrics::new("ipc_server")),
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            md_ingress: self.md_ingress.read().clone(),
            strategy_worker: self.strategy_worker.read().clone(),
            oems: self.oems.read().clone(),
            journal_logger: self.journal_logger.read().clone(),
            ipc_server: self.ipc_server.read().clone(),
        }
    }

    /// Record a market-data ingress event.
    pub fn record_md_ingress(&self, latency_us: u64) {
        self.md_ingress.write().record_event(latency_us, 0);
    }

    /// Record a strategy worker dispatch.
    pub fn record_strategy(&self, latency_us: u64) {
        self.strategy_worker.write().record_event(latency_us, 0);
    }

    /// Record an OEMS submit round-trip.
    pub fn record_oems(&self, latency_us: u64) {
        self.oems.write().record_event(latency_us, 0);
    }

    /// Record a journal append.
    pub fn record_journal(&self, latency_us: u64) {
        self.journal_logger.write().record_event(latency_us, 0);
    }

    /// Record an IPC round-trip.
    pub fn record_ipc(&self, latency_us: u64) {
        self.ipc_server.write().record_event(latency_us, 0);
    }

    /// Record an error for a named component.
    pub fn record_error(&self, component: &str) {
        match component {
            "md_ingress" => self.md_ingress.write().record_error(),
            "strategy_worker" => self.strategy_worker.write().record_error(),
            "oems" => self.oems.write().record_error(),
            "journal_logger" => self.journal_logger.write().record_error(),
            "ipc_server" => self.ipc_server.write().record_error(),
            _ => {}
        }
    }
}

impl Default for PipelineProfiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a single pipeline component
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComponentMetrics {
    pub name: String,
    pub events_processed: u64,
    pub errors: u64,
    pub bytes_processed: u64,

    // Latency histogram (microseconds)
    pub latency_count: u64,
    pub latency_sum_us: u64,
    pub latency_min_us: u64,
    pub latency_max_us: u64,
    pub latency_buckets: Vec<u64>, // logarithmic buckets

    // Throughput
    pub last_event_ts: i64,
    pub events_per_sec: f64,

    // Memory estimate for this component
    pub estimated_memory_bytes: u64,
}

impl ComponentMetrics {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events_processed: 0,
            errors: 0,
            bytes_processed: 0,
            latency_count: 0,
            latency_sum_us: 0,
            latency_min_us: u64::MAX,
            latency_max_us: 0,
            latency_buckets: vec![0u64; 20], // 20 log buckets
            last_event_ts: 0,
            events_per_sec: 0.0,
            estimated_memory_bytes: 0,
        }
    }

    /// Record a successful event with latency
    pub fn record_event(&mut self, latency_us: u64, bytes: u64) {
        self.events_processed += 1;
        self.bytes_processed += bytes;
        self.latency_count += 1;
        self.latency_sum_us = self.latency_sum_us.saturating_add(latency_us);
        self.latency_min_us = self.latency_min_us.min(latency_us);
        self.latency_max_us = self.latency_max_us.max(latency_us);
        self.last_event_ts = chrono::Utc::now().timestamp();

        // Record to histogram bucket
        let bucket = latency_to_bucket(latency_us);
        if bucket < self.latency_buckets.len() {
            self.latency_buckets[bucket] += 1;
        }
    }

    /// Record an error
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Get mean latency in microseconds
    pub fn mean_latency_us(&self) -> f64 {
        if self.latency_count == 0 {
            0.0
        } else {
            self.latency_sum_us as f64 / self.latency_count as f64
        }
    }

    /// Get percentile latency
    pub fn percentile_us(&self, p: f64) -> u64 {
        if self.latency_count == 0 {
            return 0;
        }
        let target = ((p / 100.0) * self.latency_count as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.latency_buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return bucket_to_latency(i);
            }
        }
        self.latency_max_us
    }

    pub fn p50_us(&self) -> u64 {
        self.percentile_us(50.0)
    }
    pub fn p95_us(&self) -> u64 {
        self.percentile_us(95.0)
    }
    pub fn p99_us(&self) -> u64 {
        self.percentile_us(99.0)
    }
    pub fn p999_us(&self) -> u64 {
        self.percentile_us(99.9)
    }
}

/// Convert latency to histogram bucket index (logarithmic)
fn latency_to_bucket(latency_us: u64) -> usize {
    if latency_us == 0 {
        return 0;
    }
    // Buckets: 1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000, 5000, 10000, ...
    let log = (latency_us as f64).log10();
    ((log * 3.0) as usize).min(19)
}

/// Convert bucket index back to representative latency
fn bucket_to_latency(bucket: usize) -> u64 {
    let bounds: [u64; 20] = [
        1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000, 5000, 10_000, 20_000, 50_000, 100_000,
        200_000, 500_000, 1_000_000, 10_000_000,
    ];
    bounds.get(bucket).copied().unwrap_or(10_000_000)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineSnapshot {
    pub md_ingress: ComponentMetrics,
    pub strategy_worker: ComponentMetrics,
    pub oems: ComponentMetrics,
    pub journal_logger: ComponentMetrics,
    pub ipc_server: ComponentMetrics,
}

/// Convenience macro for timing a block and recording to a component
#[macro_export]
macro_rules! perf_measure {
    ($component:expr, $bytes:expr, $block:expr) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let latency_us = start.elapsed().as_micros() as u64;
        $component.write().record_event(latency_us, $bytes);
        result
    }};
}
