//! Unified Metrics Collection
//!
//! Aggregates all performance metrics into a single interface for the
//! engine shell's pipeline stages.

use serde::Serialize;

use super::{
    cpu::CpuSnapshot, io::IoSnapshot, memory::MemorySnapshot, throughput::ThroughputSnapshot,
    PipelineSnapshot,
};

/// Complete performance metrics for the trading engine
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub timestamp: i64,
    pub uptime_secs: f64,

    // Core metrics
    pub memory: MemorySnapshot,
    pub cpu: CpuSnapshot,
    pub io: IoSnapshot,
    pub throughput: ThroughputSnapshot,

    // Pipeline-specific
    pub pipeline: PipelineSnapshot,

    // Summary scores
    pub health: HealthScore,
}

/// Health score for quick assessment
#[derive(Debug, Clone, Serialize)]
pub struct HealthScore {
    /// Overall health 0-100
    pub overall: u8,
    /// Memory pressure (0 = good, 100 = critical)
    pub memory_pressure: u8,
    /// CPU pressure
    pub cpu_pressure: u8,
    /// Latency score (0 = fast, 100 = slow)
    pub latency_score: u8,
    /// Error rate score (0 = no errors, 100 = high errors)
    pub error_rate: u8,
    /// Throughput score (100 = meeting targets, 0 = far below)
    pub throughput_score: u8,
    /// Issues detected
    pub issues: Vec<String>,
}

impl HealthScore {
    pub fn compute(
        memory: &MemorySnapshot,
        cpu: &CpuSnapshot,
        _io: &IoSnapshot,
        throughput: &ThroughputSnapshot,
        pipeline: &PipelineSnapshot,
    ) -> Self {
        let mut issues = Vec::new();

        let memory_pressure = if memory.peak_heap_bytes > 1024 * 1024 * 1024 {
            issues.push("High memory usage (>1GB)".to_string());
            80
        } else if memory.peak_heap_bytes > 512 * 1024 * 1024 {
            50
        } else {
            20
        };

        let cpu_pressure = if cpu.cpu_utilization_pct > 80.0 {
            issues.push(format!(
                "High CPU utilization: {:.1}%",
                cpu.cpu_utilization_pct
            ));
            80
        } else if cpu.cpu_utilization_pct > 50.0 {
            50
        } else {
            20
        };

        // Latency score, worst p99 across the order-submission path (the
        // component the engine's drain-and-submit loop is most exposed to).
        let oems_p99 = pipeline.oems.p99_us();
        let latency_score = if oems_p99 > 100_000 {
            issues.push(format!("High OEMS p99 latency: {}ms", oems_p99 / 1000));
            80
        } else if oems_p99 > 10_000 {
            50
        } else {
            20
        };

        let total_errors = pipeline.md_ingress.errors + pipeline.strategy_worker.errors + pipeline.oems.errors;
        let total_events = pipeline.md_ingress.events_processed
            + pipeline.strategy_worker.events_processed
            + pipeline.oems.events_processed;

        let error_rate = if total_events > 0 {
            let rate = (total_errors as f64 / total_events as f64) * 100.0;
            if rate > 5.0 {
                issues.push(format!("High error rate: {:.1}%", rate));
                80
            } else if rate > 1.0 {
                50
            } else {
                20
            }
        } else {
            20
        };

        let throughput_score = if throughput.recent_rates.ticks_per_sec < 0.5 {
            issues.push("Low market data tick rate".to_string());
            40
        } else {
            80
        };

        let overall = 100
            - ((memory_pressure as u16 * 2
                + cpu_pressure as u16 * 2
                + latency_score as u16 * 3
                + error_rate as u16 * 3
                + (100 - throughput_score) as u16 * 2)
                / 12) as u8;

        Self {
            overall,
            memory_pressure,
            cpu_pressure,
            latency_score,
            error_rate,
            throughput_score,
            issues,
        }
    }
}

/// Tick-to-order latency breakdown across the pipeline's named stages.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineLatencyBreakdown {
    pub total_p50_us: u64,
    pub total_p99_us: u64,
    pub total_p999_us: u64,

    pub md_ingress_us: u64,
    pub strategy_us: u64,
    pub oems_us: u64,
    pub journal_us: u64,

    pub pct_md_ingress: f64,
    pub pct_strategy: f64,
    pub pct_oems: f64,
    pub pct_journal: f64,
}

impl PipelineLatencyBreakdown {
    pub fn from_pipeline(pipeline: &PipelineSnapshot) -> Self {
        let md_ingress = pipeline.md_ingress.p50_us();
        let strategy = pipeline.strategy_worker.p50_us();
        let oems = pipeline.oems.p50_us();
        let journal = pipeline.journal_logger.p50_us();
        let total = md_ingress + strategy + oems + journal;

        let pct = |v: u64| -> f64 {
            if total > 0 {
                (v as f64 / total as f64) * 100.0
            } else {
                0.0
            }
        };

        Self {
            total_p50_us: total,
            total_p99_us: pipeline.md_ingress.p99_us()
                + pipeline.strategy_worker.p99_us()
                + pipeline.oems.p99_us()
                + pipeline.journal_logger.p99_us(),
            total_p999_us: pipeline.md_ingress.p999_us()
                + pipeline.strategy_worker.p999_us()
                + pipeline.oems.p999_us()
                + pipeline.journal_logger.p999_us(),
            md_ingress_us: md_ingress,
            strategy_us: strategy,
            oems_us: oems,
            journal_us: journal,
            pct_md_ingress: pct(md_ingress),
            pct_strategy: pct(strategy),
            pct_oems: pct(oems),
            pct_journal: pct(journal),
        }
    }
}

/// Per-stage success/latency summary for the two stages most directly
/// tied to trading outcomes: strategy dispatch and order execution.
#[derive(Debug, Clone, Serialize)]
pub struct TradingEngineSummary {
    pub strategy: EngineMetrics,
    pub oems: EngineMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    pub events_processed: u64,
    pub errors: u64,
    pub success_rate: f64,
    pub avg_latency_us: f64,
    pub p99_latency_us: u64,
}

impl TradingEngineSummary {
    pub fn from_pipeline(pipeline: &PipelineSnapshot) -> Self {
        let metrics_for = |m: &super::ComponentMetrics| EngineMetrics {
            events_processed: m.events_processed,
            errors: m.errors,
            success_rate: if m.events_processed > 0 {
                1.0 - (m.errors as f64 / m.events_processed as f64)
            } else {
                1.0
            },
            avg_latency_us: m.mean_latency_us(),
            p99_latency_us: m.p99_us(),
        };

        Self {
            strategy: metrics_for(&pipeline.strategy_worker),
            oems: metrics_for(&pipeline.oems),
        }
    }
}
