//! C10 — ZeroMQ IPC fabric.
//!
//! Binds five endpoints over `ipc://` transports and runs a single poll
//! loop: two PUB sockets fan the market and report buses out to external
//! subscribers, a PULL socket accepts externally-originated order
//! requests, and two REP sockets answer the JSON command protocol.
//! Blocking is permitted here (`zmq_poll` with a timeout) — this is one
//! of the two workers the concurrency model allows to block, the other
//! being the journal logger.

mod protocol;
mod registry;

pub use protocol::{CommandReply, CommandRequest};
pub use registry::{AccountRegistry, StrategyRegistry};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::frames::{Command, CommandEvent, MarketEvent, OrdType, OrderRequest, OrderResponse, Side, UNKNOWN_EXCHANGE, UNKNOWN_SYMBOL};
use crate::ring::{MarketConsumer, MarketProducer, OrderBusProducer};
use crate::risk::{RiskConfig, RiskManager};
use crate::symbol_table::SymbolTable;
use crate::wire;

pub const DEFAULT_POLL_TIMEOUT_MS: i64 = 100;
pub const DRAIN_BATCH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// `trading` for the live engine, `paper` for the paper-trading one,
    /// kept distinct so the two engines never collide on the same socket.
    pub prefix: String,
    pub socket_dir: String,
    pub poll_timeout_ms: i64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            prefix: "trading".to_string(),
            socket_dir: "/tmp".to_string(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

impl IpcConfig {
    fn endpoint(&self, channel: &str) -> String {
        format!("ipc://{}/{}_{}.ipc", self.socket_dir, self.prefix, channel)
    }
}

/// Runs the five-socket IPC fabric on its own thread.
pub struct IpcServer {
    config: IpcConfig,
    _ctx: zmq::Context,
    market_pub: zmq::Socket,
    order_pull: zmq::Socket,
    report_pub: zmq::Socket,
    query_rep: zmq::Socket,
    subscribe_rep: zmq::Socket,

    market_consumer: MarketConsumer<MarketEvent>,
    report_consumer: MarketConsumer<OrderResponse>,
    order_producer: OrderBusProducer<OrderRequest>,
    command_producer: Option<MarketProducer<CommandEvent>>,

    risk: Arc<RiskManager>,
    symbols: Arc<SymbolTable>,
    accounts: Arc<AccountRegistry>,
    strategies: Arc<StrategyRegistry>,
    config: ConfigHandle,
    next_local_order_id: AtomicU64,

    running: Arc<AtomicBool>,
}

impl IpcServer {
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        config: IpcConfig,
        market_consumer: MarketConsumer<MarketEvent>,
        report_consumer: MarketConsumer<OrderResponse>,
        order_producer: OrderBusProducer<OrderRequest>,
        command_producer: Option<MarketProducer<CommandEvent>>,
        risk: Arc<RiskManager>,
        symbols: Arc<SymbolTable>,
        accounts: Arc<AccountRegistry>,
        strategies: Arc<StrategyRegistry>,
        config: ConfigHandle,
        running: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let ctx = zmq::Context::new();

        let market_pub = ctx.socket(zmq::PUB)?;
        market_pub.bind(&config.endpoint("md"))?;

        let order_pull = ctx.socket(zmq::PULL)?;
        order_pull.bind(&config.endpoint("order"))?;

        let report_pub = ctx.socket(zmq::PUB)?;
        report_pub.bind(&config.endpoint("report"))?;

        let query_rep = ctx.socket(zmq::REP)?;
        query_rep.bind(&config.endpoint("query"))?;

        let subscribe_rep = ctx.socket(zmq::REP)?;
        subscribe_rep.bind(&config.endpoint("subscribe"))?;

        info!(prefix = %config.prefix, dir = %config.socket_dir, "IPC server bound all five endpoints");

        Ok(Self {
            config,
            _ctx: ctx,
            market_pub,
            order_pull,
            report_pub,
            query_rep,
            subscribe_rep,
            market_consumer,
            report_consumer,
            order_producer,
            command_producer,
            risk,
            symbols,
            accounts,
            strategies,
            config,
            next_local_order_id: AtomicU64::new(1),
            running,
        })
    }

    pub fn spawn(mut self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("ipc-server".to_string())
            .spawn(move || self.run())
            .expect("failed to spawn IPC server thread")
    }

    fn run(&mut self) {
        info!("IPC server starting");
        let mut market_batch = Vec::with_capacity(DRAIN_BATCH);
        let mut report_batch = Vec::with_capacity(DRAIN_BATCH);

        while self.running.load(Ordering::Relaxed) {
            self.drain_to_pub(&mut market_batch, &mut report_batch);

            // Poll result is copied out of `items` before any handler
            // below needs `&mut self` again — `items` borrows three of
            // its socket fields and must not outlive this block.
            let (order_readable, query_readable, subscribe_readable) = {
                let mut items = [
                    self.order_pull.as_poll_item(zmq::POLLIN),
                    self.query_rep.as_poll_item(zmq::POLLIN),
                    self.subscribe_rep.as_poll_item(zmq::POLLIN),
                ];
                match zmq::poll(&mut items, self.config.poll_timeout_ms) {
                    Ok(_) => (items[0].is_readable(), items[1].is_readable(), items[2].is_readable()),
                    Err(e) => {
                        warn!(error = %e, "zmq_poll failed");
                        (false, false, false)
                    }
                }
            };

            if order_readable {
                self.handle_order_pull();
            }
            if query_readable {
                self.handle_command_socket(SocketKind::Query);
            }
            if subscribe_readable {
                self.handle_command_socket(SocketKind::Subscribe);
            }
        }
        debug!("IPC server exiting");
    }

    fn drain_to_pub(&mut self, market_batch: &mut Vec<MarketEvent>, report_batch: &mut Vec<OrderResponse>) {
        market_batch.clear();
        self.market_consumer.pop_batch(market_batch, DRAIN_BATCH);
        for event in market_batch.drain(..) {
            if let Err(e) = self.market_pub.send(wire::as_bytes(&event), 0) {
                warn!(error = %e, "failed to publish market event over IPC");
            }
        }

        report_batch.clear();
        self.report_consumer.pop_batch(report_batch, DRAIN_BATCH);
        for resp in report_batch.drain(..) {
            if let Err(e) = self.report_pub.send(wire::as_bytes(&resp), 0) {
                warn!(error = %e, "failed to publish order report over IPC");
            }
        }
    }

    fn handle_order_pull(&mut self) {
        let bytes = match self.order_pull.recv_bytes(0) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to receive on order PULL socket");
                return;
            }
        };
        match wire::from_bytes::<OrderRequest>(&bytes) {
            Some(req) => {
                if !self.order_producer.try_push(req) {
                    warn!(local_order_id = req.local_order_id, "order MPSC full, external request dropped");
                }
            }
            None => warn!(len = bytes.len(), "malformed OrderRequest on order PULL socket"),
        }
    }

    fn handle_command_socket(&mut self, kind: SocketKind) {
        let socket = match kind {
            SocketKind::Query => &self.query_rep,
            SocketKind::Subscribe => &self.subscribe_rep,
        };
        let raw = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(bytes)) => {
                warn!(len = bytes.len(), "non-UTF8 command payload");
                let _ = socket.send("{}", 0);
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to receive command");
                return;
            }
        };

        let started = std::time::Instant::now();
        let reply = match serde_json::from_str::<CommandRequest>(&raw) {
            Ok(cmd) => self.dispatch(kind, &cmd),
            Err(e) => CommandReply::err(None, format!("malformed command: {e}")),
        };
        crate::performance::global_profiler()
            .pipeline
            .record_ipc(started.elapsed().as_micros() as u64);

        let body = serde_json::to_string(&reply).unwrap_or_else(|_| "{}".to_string());
        let socket = match kind {
            SocketKind::Query => &self.query_rep,
            SocketKind::Subscribe => &self.subscribe_rep,
        };
        if let Err(e) = socket.send(&body, 0) {
            warn!(error = %e, "failed to send command reply");
        }
    }

    fn dispatch(&mut self, kind: SocketKind, cmd: &CommandRequest) -> CommandReply {
        if kind == SocketKind::Subscribe && cmd.action != "subscribe" {
            return CommandReply::err(cmd.request_id.clone(), "subscribe socket only accepts 'subscribe'");
        }

        match cmd.action.as_str() {
            "subscribe" => CommandReply::ok(cmd.request_id.clone(), json!({})),
            "register_account" => self.cmd_register_account(cmd),
            "unregister_account" => self.cmd_unregister_account(cmd),
            "list_accounts" => self.cmd_list_accounts(cmd),
            "reset_account" => self.cmd_reset_account(cmd),
            "start_strategy" => self.cmd_start_strategy(cmd),
            "stop_strategy" => self.cmd_stop_strategy(cmd),
            "place_order" => self.cmd_place_order(cmd),
            "cancel_order" => self.cmd_cancel_order(cmd),
            "close_position" => self.cmd_cancel_order(cmd),
            "get_risk_status" => self.cmd_get_risk_status(cmd),
            "deactivate_kill_switch" => self.cmd_deactivate_kill_switch(cmd),
            "get_logs" | "get_log_dates" => {
                CommandReply::ok_msg(cmd.request_id.clone(), "log store not wired yet", json!({ "records": [] }))
            }
            "get_config" => self.cmd_get_config(cmd),
            "update_config" => self.cmd_update_config(cmd),
            "set_log_config" => self.cmd_set_log_config(cmd),
            "frontend_log" => {
                info!(target: "frontend", data = %cmd.data, "frontend log entry");
                CommandReply::ok(cmd.request_id.clone(), json!({}))
            }
            other => CommandReply::err(cmd.request_id.clone(), format!("unknown action '{other}'")),
        }
    }

    fn cmd_register_account(&mut self, cmd: &CommandRequest) -> CommandReply {
        let strategy_id = cmd.data.get("strategy_id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let exchange = cmd.data.get("exchange").and_then(|v| v.as_str()).unwrap_or("");
        let api_key = cmd.data.get("api_key").and_then(|v| v.as_str()).unwrap_or("");
        let is_testnet = cmd.data.get("is_testnet").and_then(|v| v.as_bool()).unwrap_or(true);
        let account_id = self.accounts.register(strategy_id, exchange, api_key, is_testnet);
        info!(target: crate::logging::AUDIT_TARGET, account_id, strategy_id, exchange, is_testnet, "account registered");
        CommandReply::ok(cmd.request_id.clone(), json!({ "account_id": account_id }))
    }

    fn cmd_unregister_account(&mut self, cmd: &CommandRequest) -> CommandReply {
        let account_id = cmd.data.get("account_id").and_then(|v| v.as_u64()).unwrap_or(0);
        if self.accounts.unregister(account_id) {
            info!(target: crate::logging::AUDIT_TARGET, account_id, "account unregistered");
            CommandReply::ok(cmd.request_id.clone(), json!({}))
        } else {
            CommandReply::err(cmd.request_id.clone(), "unknown account_id")
        }
    }

    fn cmd_list_accounts(&mut self, cmd: &CommandRequest) -> CommandReply {
        let accounts: Vec<_> = self
            .accounts
            .list()
            .into_iter()
            .map(|a| {
                json!({
                    "account_id": a.account_id,
                    "strategy_id": a.strategy_id,
                    "exchange": a.exchange,
                    "is_testnet": a.is_testnet,
                })
            })
            .collect();
        CommandReply::ok(cmd.request_id.clone(), json!({ "accounts": accounts }))
    }

    fn cmd_reset_account(&mut self, cmd: &CommandRequest) -> CommandReply {
        let account_id = cmd.data.get("account_id").and_then(|v| v.as_u64()).unwrap_or(0);
        if self.accounts.reset(account_id) {
            CommandReply::ok(cmd.request_id.clone(), json!({}))
        } else {
            CommandReply::err(cmd.request_id.clone(), "unknown account_id")
        }
    }

    fn cmd_start_strategy(&mut self, cmd: &CommandRequest) -> CommandReply {
        let id = cmd.data.get("id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let newly_started = self.strategies.start(id);
        info!(target: crate::logging::AUDIT_TARGET, strategy_id = id, newly_started, "start_strategy");
        CommandReply::ok_msg(
            cmd.request_id.clone(),
            if newly_started { "started" } else { "already running" },
            json!({ "id": id }),
        )
    }

    fn cmd_stop_strategy(&mut self, cmd: &CommandRequest) -> CommandReply {
        let id = cmd.data.get("id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let was_running = self.strategies.stop(id);
        info!(target: crate::logging::AUDIT_TARGET, strategy_id = id, was_running, "stop_strategy");
        CommandReply::ok_msg(
            cmd.request_id.clone(),
            if was_running { "stopped" } else { "was not running" },
            json!({ "id": id }),
        )
    }

    fn cmd_place_order(&mut self, cmd: &CommandRequest) -> CommandReply {
        let data = &cmd.data;
        let symbol = data.get("symbol").and_then(|v| v.as_str()).unwrap_or("");
        let exchange = data.get("exchange").and_then(|v| v.as_str()).unwrap_or("");
        let side = match data.get("side").and_then(|v| v.as_str()).unwrap_or("").to_ascii_uppercase().as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => return CommandReply::err(cmd.request_id.clone(), format!("invalid side '{other}'")),
        };
        let ord_type = match data.get("type").and_then(|v| v.as_str()).unwrap_or("LIMIT").to_ascii_uppercase().as_str() {
            "MARKET" => OrdType::Market,
            "LIMIT" => OrdType::Limit,
            "STOP_MARKET" => OrdType::StopMarket,
            "STOP_LIMIT" => OrdType::StopLimit,
            other => return CommandReply::err(cmd.request_id.clone(), format!("invalid order type '{other}'")),
        };
        let price = data.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let qty = data.get("qty").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let account_id = data.get("account_id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let strategy_id = data.get("strategy_id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        let symbol_id = self.symbols.symbol_id(symbol);
        let exchange_id = self.symbols.exchange_id(exchange);
        if symbol_id == UNKNOWN_SYMBOL || exchange_id == UNKNOWN_EXCHANGE {
            return CommandReply::err(cmd.request_id.clone(), "unknown symbol or exchange");
        }

        let local_order_id = self.next_local_order_id.fetch_add(1, Ordering::AcqRel);
        let req = OrderRequest::new(now_ns(), local_order_id, exchange_id, symbol_id, account_id, side, ord_type, price, qty, strategy_id, "ipc");

        if self.order_producer.try_push(req) {
            CommandReply::ok(cmd.request_id.clone(), json!({ "local_order_id": local_order_id }))
        } else {
            CommandReply::err(cmd.request_id.clone(), "order queue full")
        }
    }

    fn cmd_cancel_order(&mut self, cmd: &CommandRequest) -> CommandReply {
        let order_id = cmd.data.get("order_id").and_then(|v| v.as_u64()).unwrap_or(0);
        match self.command_producer.as_mut() {
            Some(producer) => {
                let event = CommandEvent::new(now_ns(), Command::CancelOrder, 0, UNKNOWN_SYMBOL, Side::Buy, order_id as f64, 0.0, "");
                producer.publish(event);
                CommandReply::ok(cmd.request_id.clone(), json!({}))
            }
            None => CommandReply::err(cmd.request_id.clone(), "cancel relay not wired"),
        }
    }

    fn cmd_get_risk_status(&mut self, cmd: &CommandRequest) -> CommandReply {
        let status = self.risk.status();
        CommandReply::ok(
            cmd.request_id.clone(),
            json!({
                "kill_switch": status.kill_switch_active,
                "open_orders": status.open_orders,
                "daily_pnl": status.daily_pnl,
                "total_exposure": status.aggregate_exposure,
                "per_strategy_stats": status.per_strategy,
            }),
        )
    }

    fn cmd_deactivate_kill_switch(&mut self, cmd: &CommandRequest) -> CommandReply {
        self.risk.deactivate_kill_switch();
        info!(target: crate::logging::AUDIT_TARGET, "kill switch deactivated");
        CommandReply::ok(cmd.request_id.clone(), json!({}))
    }

    /// `get_config`/`update_config`/`set_log_config` are the sole runtime
    /// config-mutation path: everything else in the config file is fixed
    /// at process start. `update_config` may touch both `risk.*` and
    /// `log_level` in one call; `set_log_config` only ever touches the
    /// level, keeping the current risk thresholds.
    fn cmd_get_config(&mut self, cmd: &CommandRequest) -> CommandReply {
        let current = self.config.load();
        CommandReply::ok(
            cmd.request_id.clone(),
            json!({
                "risk": current.risk,
                "log_level": current.log_level,
            }),
        )
    }

    fn cmd_update_config(&mut self, cmd: &CommandRequest) -> CommandReply {
        let current = self.config.load();
        let risk = parse_risk_patch(&cmd.data, &current.risk);
        let log_level = cmd.data.get("log_level").and_then(|v| v.as_str()).unwrap_or(&current.log_level).to_string();
        match self.config.update_config(risk, log_level) {
            Ok(()) => {
                info!(target: crate::logging::AUDIT_TARGET, "runtime config updated");
                CommandReply::ok(cmd.request_id.clone(), json!({}))
            }
            Err(e) => CommandReply::err(cmd.request_id.clone(), e.to_string()),
        }
    }

    fn cmd_set_log_config(&mut self, cmd: &CommandRequest) -> CommandReply {
        let Some(log_level) = cmd.data.get("log_level").and_then(|v| v.as_str()) else {
            return CommandReply::err(cmd.request_id.clone(), "missing log_level");
        };
        let current = self.config.load();
        match self.config.update_config(current.risk.clone(), log_level.to_string()) {
            Ok(()) => {
                info!(target: crate::logging::AUDIT_TARGET, log_level, "log level updated");
                CommandReply::ok(cmd.request_id.clone(), json!({}))
            }
            Err(e) => CommandReply::err(cmd.request_id.clone(), e.to_string()),
        }
    }
}

/// Builds a `RiskConfig` from an `update_config` request's `risk` object,
/// falling back field-by-field to the currently-active config so a
/// partial patch doesn't zero out the thresholds it omits.
fn parse_risk_patch(data: &Value, current: &RiskConfig) -> RiskConfig {
    let patch = data.get("risk");
    let field = |name: &str| patch.and_then(|r| r.get(name));
    RiskConfig {
        max_drawdown_pct: field("max_drawdown_pct").and_then(|v| v.as_f64()).unwrap_or(current.max_drawdown_pct),
        max_open_orders: field("max_open_orders").and_then(|v| v.as_u64()).map_or(current.max_open_orders, |v| v as u32),
        max_exposure: field("max_exposure").and_then(|v| v.as_f64()).unwrap_or(current.max_exposure),
        max_symbol_position: field("max_symbol_position").and_then(|v| v.as_f64()).unwrap_or(current.max_symbol_position),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketKind {
    Query,
    Subscribe,
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths_differ_between_live_and_paper_prefixes() {
        let live = IpcConfig {
            prefix: "trading".to_string(),
            ..IpcConfig::default()
        };
        let paper = IpcConfig {
            prefix: "paper".to_string(),
            ..IpcConfig::default()
        };
        assert_ne!(live.endpoint("order"), paper.endpoint("order"));
        assert_eq!(live.endpoint("order"), "ipc:///tmp/trading_order.ipc");
    }
}
