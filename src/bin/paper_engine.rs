//! Paper-trading engine binary.
//!
//! Identical shell to the live engine, except every configured exchange
//! gets an in-process [`PaperAdapter`] fill simulator instead of a real
//! REST connection — no credentials required.
//!
//! Exit codes per `spec.md` §6: `0` clean shutdown, `1` startup failure,
//! `2` invalid config, `130` SIGINT.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use trading_core::config::{Config, ConfigHandle};
use trading_core::engine::Engine;
use trading_core::logging::{self, LoggingConfig, LogRotation};
use trading_core::oems::{ExchangeAdapter, PaperAdapter, PaperAdapterConfig};

#[derive(Parser, Debug)]
#[command(name = "paper-engine")]
#[command(about = "Paper-trading engine with simulated fills")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long)]
    config: String,

    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// Directory rotating log files are written to.
    #[arg(long, default_value = "/var/log/trading-core")]
    log_dir: String,

    /// Simulated reject probability, overriding `PaperAdapterConfig::default`.
    #[arg(long)]
    reject_prob: Option<f64>,

    /// Simulated partial-fill probability, overriding `PaperAdapterConfig::default`.
    #[arg(long)]
    partial_fill_prob: Option<f64>,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid config: {e}");
            std::process::exit(2);
        }
    };

    let log_level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    let _guards = logging::init(
        &LoggingConfig {
            log_dir: args.log_dir.clone(),
            log_level,
            rotation: LogRotation::Daily,
        },
        "paper",
    );

    match run(args, config) {
        Ok(()) => std::process::exit(0),
        Err(RunError::Startup(e)) => {
            error!(error = %e, "engine startup failed");
            std::process::exit(1);
        }
        Err(RunError::Interrupted) => std::process::exit(130),
    }
}

enum RunError {
    Startup(anyhow::Error),
    Interrupted,
}

/// Runs until SIGINT, then shuts the engine down cleanly. Always returns
/// `RunError::Interrupted` on the happy path — this binary only ever
/// stops by signal — so `main` can map that to exit code 130.
fn run(args: Args, config: Config) -> Result<(), RunError> {
    let adapters = build_adapters(&config, &args);

    let settings = config.to_engine_settings("paper");
    let ingress_configs = config.to_ingress_configs();
    let config_handle = ConfigHandle::new(config);

    let mut engine = Engine::start(settings, ingress_configs, Vec::new(), adapters, config_handle).map_err(RunError::Startup)?;
    engine.start_ipc().map_err(RunError::Startup)?;
    engine.start_ui_snapshot();

    info!(prefix = engine.prefix(), "paper engine running, waiting for SIGINT");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RunError::Startup(e.into()))?;
    rt.block_on(tokio::signal::ctrl_c()).map_err(|e| RunError::Startup(e.into()))?;
    drop(rt);

    engine.shutdown();
    Err(RunError::Interrupted)
}

fn build_adapters(config: &Config, args: &Args) -> HashMap<u16, Arc<dyn ExchangeAdapter>> {
    let mut adapter_config = PaperAdapterConfig::default();
    if let Some(reject_prob) = args.reject_prob {
        adapter_config.reject_prob = reject_prob;
    }
    if let Some(partial_fill_prob) = args.partial_fill_prob {
        adapter_config.partial_fill_prob = partial_fill_prob;
    }

    let mut adapters: HashMap<u16, Arc<dyn ExchangeAdapter>> = HashMap::new();
    for (index, _exchange) in config.exchanges.iter().enumerate() {
        let exchange_id = index as u16;
        adapters.insert(exchange_id, Arc::new(PaperAdapter::new(adapter_config.clone(), exchange_id)));
    }
    adapters
}
