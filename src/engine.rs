//! C11 — engine shell.
//!
//! Owns construction order, CPU allocation, and shutdown sequencing for
//! every other component. Nothing here touches the hot path directly;
//! it wires buses together, spawns workers in the order `spec.md` §4.10
//! specifies, and joins them back up on shutdown.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ConfigHandle;
use crate::frames::{AccountEvent, CommandEvent, ExchangeId, MarketEvent, OrderRequest, OrderResponse, PositionEvent};
use crate::ingress::{IngressConfig, MarketDataIngress};
use crate::ipc::{AccountRegistry, IpcConfig, IpcServer, StrategyRegistry};
use crate::journal::JournalWriter;
use crate::journal_logger::JournalLogger;
use crate::oems::{ExchangeAdapter, OemsConfig, OemsWorker};
use crate::ring::{MarketBus, MarketConsumer, OrderBus};
use crate::risk::{RiskConfig, RiskManager};
use crate::snapshot::{SnapshotConfig, SnapshotServer};
use crate::strategy::{Strategy, StrategyWorker};
use crate::symbol_table::SymbolTable;

/// CPU allocation defaults from `spec.md` §4.10: CPU 0 is left for the
/// kernel, CPU 1 is the MD thread, CPU 2 is OEMS, CPUs 3-10 are strategy
/// groups, and a separate CPU holds the logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuAllocation {
    pub md_core: usize,
    pub oems_core: usize,
    pub strategy_core: usize,
    pub logger_core: usize,
}

impl Default for CpuAllocation {
    fn default() -> Self {
        Self {
            md_core: 1,
            oems_core: 2,
            strategy_core: 3,
            logger_core: 11,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// `trading` for the live binary, `paper` for the paper-trading one —
    /// keeps journal files and IPC sockets from colliding if both run on
    /// the same host.
    pub prefix: String,
    pub exchanges: Vec<String>,
    pub symbols: Vec<String>,
    pub market_bus_capacity: usize,
    pub order_bus_capacity: usize,
    pub command_bus_capacity: usize,
    pub journal_dir: String,
    pub journal_page_size: u64,
    pub journal_sync_on_rotate: bool,
    pub risk: RiskConfig,
    pub oems: OemsConfig,
    pub ipc: IpcConfig,
    pub ui_snapshot: SnapshotConfig,
    pub enable_cpu_pinning: bool,
    pub enable_realtime: bool,
    pub cpu: CpuAllocation,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            prefix: "trading".to_string(),
            exchanges: Vec::new(),
            symbols: Vec::new(),
            market_bus_capacity: 1 << 16,
            order_bus_capacity: 1 << 14,
            command_bus_capacity: 1 << 10,
            journal_dir: "/var/lib/trading-core/journal".to_string(),
            journal_page_size: crate::journal::DEFAULT_PAGE_SIZE,
            journal_sync_on_rotate: true,
            risk: RiskConfig::default(),
            oems: OemsConfig::default(),
            ipc: IpcConfig::default(),
            ui_snapshot: SnapshotConfig::default(),
            enable_cpu_pinning: true,
            enable_realtime: false,
            cpu: CpuAllocation::default(),
        }
    }
}

/// Everything a running engine owns: the shared state the IPC server and
/// UI snapshot builder read from, plus the join handles shutdown needs.
pub struct Engine {
    settings: EngineSettings,
    running: Arc<AtomicBool>,
    config: ConfigHandle,

    risk: Arc<RiskManager>,
    symbols: Arc<SymbolTable>,
    accounts: Arc<AccountRegistry>,
    strategies_registry: Arc<StrategyRegistry>,

    market_bus: Arc<MarketBus<MarketEvent>>,
    report_bus: Arc<MarketBus<OrderResponse>>,
    position_bus: Arc<MarketBus<PositionEvent>>,
    account_bus: Arc<MarketBus<AccountEvent>>,
    order_bus: Arc<OrderBus<OrderRequest>>,
    command_bus: Arc<MarketBus<CommandEvent>>,

    logger_handles: Vec<JoinHandle<()>>,
    oems_handle: Option<JoinHandle<()>>,
    strategy_handle: Option<JoinHandle<()>>,
    ipc_handle: Option<JoinHandle<()>>,
    ui_snapshot_handle: Option<JoinHandle<()>>,
    md_handles: Vec<std::thread::JoinHandle<()>>,
}

impl Engine {
    /// Steps 1-4 of `spec.md` §4.10: advisory NUMA/scheduling log, then
    /// ring/MPSC/journal/risk construction, then logger, OEMS, strategy,
    /// and MD threads, each pinning itself before entering its loop.
    pub fn start(
        settings: EngineSettings,
        ingress_configs: Vec<IngressConfig>,
        strategies: Vec<Box<dyn Strategy>>,
        adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
        config: ConfigHandle,
    ) -> anyhow::Result<Self> {
        log_numa_advisory(&settings.cpu);

        let running = Arc::new(AtomicBool::new(true));
        let symbols = Arc::new(SymbolTable::build(&settings.exchanges, &settings.symbols));
        let risk = Arc::new(RiskManager::new(settings.risk.clone()));
        let accounts = Arc::new(AccountRegistry::new());
        let strategies_registry = Arc::new(StrategyRegistry::new());

        let market_bus = MarketBus::<MarketEvent>::new(settings.market_bus_capacity);
        let report_bus = MarketBus::<OrderResponse>::new(settings.market_bus_capacity);
        let position_bus = MarketBus::<PositionEvent>::new(settings.market_bus_capacity);
        let account_bus = MarketBus::<AccountEvent>::new(settings.market_bus_capacity);
        let order_bus = OrderBus::<OrderRequest>::new(settings.order_bus_capacity);
        let command_bus = MarketBus::<CommandEvent>::new(settings.command_bus_capacity);

        let core = |n: usize| if settings.enable_cpu_pinning { Some(n) } else { None };

        // --- logger (C9): drains market, report, position, and account
        // streams into their own journal prefixes. Only the market and
        // report loggers are pinned to the configured logger CPU — the
        // position/account streams run at OEMS's 500ms snapshot cadence
        // and do not need a dedicated core.
        let mut logger_handles = Vec::new();

        let open_journal = |prefix: &str| {
            JournalWriter::open_with_options(&settings.journal_dir, prefix, settings.journal_page_size, settings.journal_sync_on_rotate)
        };

        let market_writer = open_journal("market")?;
        let mut market_logger = JournalLogger::new("market", market_bus.consumer(), market_writer, running.clone())
            .with_realtime(settings.enable_realtime);
        if settings.enable_cpu_pinning {
            market_logger = market_logger.with_pin_core(settings.cpu.logger_core);
        }
        logger_handles.push(market_logger.spawn());

        let report_writer = open_journal("report")?;
        let mut report_logger = JournalLogger::new("report", report_bus.consumer(), report_writer, running.clone())
            .with_realtime(settings.enable_realtime);
        if settings.enable_cpu_pinning {
            report_logger = report_logger.with_pin_core(settings.cpu.logger_core);
        }
        logger_handles.push(report_logger.spawn());

        let position_writer = open_journal("position")?;
        let position_logger = JournalLogger::new("position", position_bus.consumer(), position_writer, running.clone());
        logger_handles.push(position_logger.spawn());

        let account_writer = open_journal("account")?;
        let account_logger = JournalLogger::new("account", account_bus.consumer(), account_writer, running.clone());
        logger_handles.push(account_logger.spawn());

        // --- OEMS (C7), fed the order MPSC and the command relay bus.
        let mut oems = OemsWorker::new(settings.oems.clone(), order_bus.consumer(), report_bus.producer().unwrap(), risk.clone(), adapters, running.clone())
            .with_commands(command_bus.consumer())
            .with_snapshot_buses(position_bus.producer().unwrap(), account_bus.producer().unwrap())
            .with_realtime(settings.enable_realtime);
        if settings.enable_cpu_pinning {
            oems = oems.with_pin_core(settings.cpu.oems_core);
        }
        let oems_handle = Some(oems.spawn());

        // --- strategy worker (C6), a single pinned thread hosting every
        // registered strategy in order.
        let strategy_worker = StrategyWorker::new(strategies, market_bus.consumer(), order_bus.producer(), running.clone(), core(settings.cpu.strategy_core))
            .with_realtime(settings.enable_realtime);
        let strategy_handle = Some(strategy_worker.spawn());

        // --- MD ingress (C5). The market bus enforces a single producer
        // by construction, so only the first configured feed gets wired
        // up; additional entries are a documented simplification pending
        // a multi-exchange-aware ingress that multiplexes several
        // connections behind one producer (see DESIGN.md).
        let mut md_handles = Vec::new();
        let system_bus = MarketBus::<crate::frames::SystemEvent>::new(1024);
        let system_producer = system_bus.producer();
        let mut ingress_iter = ingress_configs.into_iter();
        if let Some(mut ingress_config) = ingress_iter.next() {
            if settings.enable_cpu_pinning {
                ingress_config.pin_core = Some(settings.cpu.md_core);
            }
            ingress_config.realtime = settings.enable_realtime;
            let ingress = MarketDataIngress::new(ingress_config, symbols.clone(), running.clone());
            let market_producer = market_bus
                .producer()
                .expect("market bus producer not yet taken during construction");
            let system_producer = system_producer.expect("system bus producer not yet taken during construction");
            let handle = std::thread::Builder::new()
                .name("market-data-ingress".to_string())
                .spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed to build ingress runtime");
                    if let Err(e) = rt.block_on(ingress.run(market_producer, system_producer)) {
                        warn!(error = %e, "market-data ingress exited with error");
                    }
                })
                .expect("failed to spawn market-data ingress thread");
            md_handles.push(handle);
        }
        for skipped in ingress_iter {
            warn!(exchange = %skipped.exchange_name, "additional market-data feed not wired, single-producer market bus only supports one MD source per engine instance");
        }

        info!(prefix = %settings.prefix, "engine shell construction complete");

        Ok(Self {
            settings,
            running,
            config,
            risk,
            symbols,
            accounts,
            strategies_registry,
            market_bus,
            report_bus,
            position_bus,
            account_bus,
            order_bus,
            command_bus,
            logger_handles,
            oems_handle,
            strategy_handle,
            ipc_handle: None,
            ui_snapshot_handle: None,
            md_handles,
        })
    }

    /// Step 5: start the IPC server last, after every in-process worker
    /// is already draining its buses.
    pub fn start_ipc(&mut self) -> anyhow::Result<()> {
        let ipc = IpcServer::bind(
            self.settings.ipc.clone(),
            self.market_bus.consumer(),
            self.report_bus.consumer(),
            self.order_bus.producer(),
            self.command_bus.producer(),
            self.risk.clone(),
            self.symbols.clone(),
            self.accounts.clone(),
            self.strategies_registry.clone(),
            self.config.clone(),
            self.running.clone(),
        )?;
        self.ipc_handle = Some(ipc.spawn());
        Ok(())
    }

    /// Starts the UI snapshot builder (never reads the hot bus directly —
    /// it tails the same journal prefixes the logger writes).
    pub fn start_ui_snapshot(&mut self) {
        let mut snapshot_config = self.settings.ui_snapshot.clone();
        snapshot_config.journal_dir = self.settings.journal_dir.clone();
        let server = SnapshotServer::new(
            snapshot_config,
            self.risk.clone(),
            self.symbols.clone(),
            self.accounts.clone(),
            self.strategies_registry.clone(),
            self.running.clone(),
        );
        self.ui_snapshot_handle = Some(server.spawn());
    }

    pub fn risk(&self) -> Arc<RiskManager> {
        self.risk.clone()
    }

    pub fn symbols(&self) -> Arc<SymbolTable> {
        self.symbols.clone()
    }

    pub fn strategies_registry(&self) -> Arc<StrategyRegistry> {
        self.strategies_registry.clone()
    }

    pub fn market_consumer(&self) -> MarketConsumer<MarketEvent> {
        self.market_bus.consumer()
    }

    pub fn report_consumer(&self) -> MarketConsumer<OrderResponse> {
        self.report_bus.consumer()
    }

    pub fn position_consumer(&self) -> MarketConsumer<PositionEvent> {
        self.position_bus.consumer()
    }

    pub fn account_consumer(&self) -> MarketConsumer<AccountEvent> {
        self.account_bus.consumer()
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn journal_dir(&self) -> &str {
        &self.settings.journal_dir
    }

    pub fn prefix(&self) -> &str {
        &self.settings.prefix
    }

    /// Step 6: shuts every worker down in reverse construction order —
    /// IPC server, MD threads, strategy worker, OEMS, then logger — each
    /// cooperatively notices `running` clear and returns from its loop.
    pub fn shutdown(mut self) {
        info!("engine shell shutting down");
        self.running.store(false, std::sync::atomic::Ordering::Release);

        if let Some(handle) = self.ipc_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.ui_snapshot_handle.take() {
            let _ = handle.join();
        }
        for handle in self.md_handles.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.strategy_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.oems_handle.take() {
            let _ = handle.join();
        }
        for handle in self.logger_handles.drain(..) {
            let _ = handle.join();
        }
        info!("engine shell shutdown complete");
    }
}

/// Advisory-only NUMA/CPU reporting — `spec.md` §9 Open Question (iii):
/// when the requested allocation doesn't fit the machine, fall back to
/// node 0 and log a warning rather than fail construction.
fn log_numa_advisory(cpu: &CpuAllocation) {
    let mut sys = sysinfo::System::new();
    sys.refresh_cpu_all();
    let available = sys.cpus().len();
    let highest_requested = [cpu.md_core, cpu.oems_core, cpu.strategy_core, cpu.logger_core].into_iter().max().unwrap_or(0);

    if available == 0 {
        warn!("could not enumerate CPUs, pinning will be best-effort");
    } else if highest_requested >= available {
        warn!(available, highest_requested, "requested CPU allocation exceeds available cores, falling back to node 0 pinning");
    } else {
        info!(available, "NUMA/CPU allocation advisory check passed");
    }
}
