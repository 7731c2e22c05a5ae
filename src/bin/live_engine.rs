//! Live/testnet trading engine binary.
//!
//! Wires a `TestnetAdapter` per configured exchange (credentials sourced
//! from `<EXCHANGE>_API_KEY`/`<EXCHANGE>_API_SECRET` environment
//! variables) and runs the engine shell until SIGINT.
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
use trading_core::oems::{ExchangeAdapter, TestnetAdapter, TestnetCredentials};

#[derive(Parser, Debug)]
#[command(name = "trading-engine")]
#[command(about = "Live/testnet trading engine")]
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

    /// Base URL each exchange's testnet REST endpoint is reached at,
    /// e.g. `https://testnet.binance.vision`. One instance used for every
    /// configured exchange until per-exchange endpoints are needed.
    #[arg(long)]
    testnet_base_url: String,
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
        "trading",
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
    let adapters = build_adapters(&config, &args.testnet_base_url).map_err(RunError::Startup)?;

    let settings = config.to_engine_settings("trading");
    let ingress_configs = config.to_ingress_configs();
    let config_handle = ConfigHandle::new(config);

    let mut engine = Engine::start(settings, ingress_configs, Vec::new(), adapters, config_handle).map_err(RunError::Startup)?;
    engine.start_ipc().map_err(RunError::Startup)?;
    engine.start_ui_snapshot();

    info!(prefix = engine.prefix(), "live engine running, waiting for SIGINT");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RunError::Startup(e.into()))?;
    rt.block_on(tokio::signal::ctrl_c()).map_err(|e| RunError::Startup(e.into()))?;
    drop(rt);

    engine.shutdown();
    Err(RunError::Interrupted)
}

/// Every exchange named in `exchanges[]` needs `<EXCHANGE>_API_KEY` and
/// `<EXCHANGE>_API_SECRET` set, matching the exchange name uppercased
/// (e.g. `binance` -> `BINANCE_API_KEY`).
fn build_adapters(
    config: &Config,
    base_url: &str,
) -> anyhow::Result<HashMap<u16, Arc<dyn ExchangeAdapter>>> {
    let mut adapters: HashMap<u16, Arc<dyn ExchangeAdapter>> = HashMap::new();
    for (index, exchange) in config.exchanges.iter().enumerate() {
        let exchange_id = index as u16;
        let env_prefix = exchange.to_uppercase();
        let api_key = std::env::var(format!("{env_prefix}_API_KEY"))
            .map_err(|_| anyhow::anyhow!("missing {env_prefix}_API_KEY environment variable for exchange '{exchange}'"))?;
        let secret = std::env::var(format!("{env_prefix}_API_SECRET"))
            .map_err(|_| anyhow::anyhow!("missing {env_prefix}_API_SECRET environment variable for exchange '{exchange}'"))?;
        let adapter = TestnetAdapter::new(base_url.to_string(), TestnetCredentials { api_key, secret }, exchange_id);
        adapters.insert(exchange_id, Arc::new(adapter));
    }
    Ok(adapters)
}
