//! A2 — logging & diagnostics layer.
//!
//! General diagnostics go to stdout plus a rotating file. The audit log
//! (account/strategy lifecycle commands, IPC `frontend_log` calls) and
//! the order-lifecycle log (every `OrderResponse` terminal state) are
//! separate `tracing` targets, filtered into their own files rather than
//! intermixed with general diagnostics. Grounded on the split
//! file/stdout layer registry pattern used elsewhere in this corpus for
//! rotating-file logging with an `EnvFilter`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

pub const AUDIT_TARGET: &str = "audit";
pub const ORDER_LIFECYCLE_TARGET: &str = "order_lifecycle";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub log_level: String,
    pub rotation: LogRotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "/var/log/trading-core".to_string(),
            log_level: "info".to_string(),
            rotation: LogRotation::Daily,
        }
    }
}

/// Holds every non-blocking writer's guard; dropping this flushes the
/// background writer threads. `main` must keep the returned handle alive
/// for the process lifetime.
pub struct LoggingGuards {
    _diagnostics: WorkerGuard,
    _audit: WorkerGuard,
    _order_lifecycle: WorkerGuard,
}

/// Initializes the global `tracing` subscriber: a stdout layer plus three
/// rotating file layers (diagnostics, audit, order-lifecycle), each
/// filtered so only its own target lands in its file. `prefix` is
/// `"trading"`/`"paper"`, keeping the two engines' logs from colliding on
/// the same host.
pub fn init(config: &LoggingConfig, prefix: &str) -> LoggingGuards {
    let rolling = |file_name: &str| match config.rotation {
        LogRotation::Hourly => tracing_appender::rolling::hourly(&config.log_dir, file_name),
        LogRotation::Daily => tracing_appender::rolling::daily(&config.log_dir, file_name),
        LogRotation::Never => tracing_appender::rolling::never(&config.log_dir, file_name),
    };

    let (diagnostics_writer, diagnostics_guard) = tracing_appender::non_blocking(rolling(&format!("{prefix}.log")));
    let (audit_writer, audit_guard) = tracing_appender::non_blocking(rolling(&format!("{prefix}.audit.log")));
    let (order_writer, order_guard) = tracing_appender::non_blocking(rolling(&format!("{prefix}.orders.log")));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stdout_layer = fmt::layer().with_target(true).with_ansi(true);

    let diagnostics_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(diagnostics_writer)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
            meta.target() != AUDIT_TARGET && meta.target() != ORDER_LIFECYCLE_TARGET
        }));

    let audit_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(audit_writer)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| meta.target() == AUDIT_TARGET));

    let order_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(order_writer)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| meta.target() == ORDER_LIFECYCLE_TARGET));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(diagnostics_layer)
        .with(audit_layer)
        .with(order_layer)
        .init();

    LoggingGuards {
        _diagnostics: diagnostics_guard,
        _audit: audit_guard,
        _order_lifecycle: order_guard,
    }
}
