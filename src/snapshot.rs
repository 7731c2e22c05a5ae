//! C12 — UI snapshot builder.
//!
//! A dedicated thread, decoupled from the hot bus, that tails the market,
//! report, position, and account journals on a bounded cadence (default
//! 100 ms), folds them into a running snapshot alongside the risk
//! manager's and registries' in-memory state, and pushes the composed
//! document to every connected UI client over WebSocket. Grounded on the
//! teacher's broadcast-channel WebSocket fan-out (`websocket_handler`/
//! `handle_socket`/`broadcast::channel` in its `main.rs`), generalized
//! from a single signal stream to a multi-journal snapshot document.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::frames::{AccountEvent, ExchangeId, MarketEvent, MsgType, OrderResponse, OrderStatus, PositionEvent, SymbolId};
use crate::ipc::{AccountRegistry, StrategyRegistry};
use crate::journal::JournalReader;
use crate::risk::RiskManager;
use crate::symbol_table::SymbolTable;
use crate::wire;

pub const DEFAULT_SNAPSHOT_CADENCE: Duration = Duration::from_millis(100);
const BROADCAST_CAPACITY: usize = 256;
const JOURNAL_POLL_BATCH: usize = 256;
const MAX_RECENT_LOGS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub bind_addr: SocketAddr,
    pub journal_dir: String,
    /// Matches the engine's own journal stream prefixes, e.g. `"market"`.
    pub market_prefix: String,
    pub report_prefix: String,
    pub position_prefix: String,
    pub account_prefix: String,
    pub cadence: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8090".parse().unwrap(),
            journal_dir: "/var/lib/trading-core/journal".to_string(),
            market_prefix: "market".to_string(),
            report_prefix: "report".to_string(),
            position_prefix: "position".to_string(),
            account_prefix: "account".to_string(),
            cadence: DEFAULT_SNAPSHOT_CADENCE,
        }
    }
}

#[derive(Clone, Copy)]
struct TickerRow {
    exchange_id: ExchangeId,
    last: f64,
    bid: f64,
    ask: f64,
    volume: f64,
    ts: i64,
}

#[derive(Clone, Copy)]
struct OrderRow {
    status: OrderStatus,
    filled_qty: f64,
    cum_qty: f64,
    avg_price: f64,
    error_code: u16,
    ts: i64,
}

#[derive(Clone, Copy)]
struct PositionRow {
    exchange_id: ExchangeId,
    symbol_id: SymbolId,
    quantity: f64,
    avg_entry_price: f64,
    unrealized_pnl: f64,
    realized_pnl: f64,
    ts: i64,
}

#[derive(Clone, Copy)]
struct AccountRow {
    exchange_id: ExchangeId,
    equity: f64,
    available_balance: f64,
    used_margin: f64,
    daily_pnl: f64,
    ts: i64,
}

/// Running fold of every journal stream this builder tails. Lives only on
/// the builder's own thread — nothing here is shared or locked.
#[derive(Default)]
struct SnapshotState {
    tickers: HashMap<SymbolId, TickerRow>,
    orders: HashMap<u64, OrderRow>,
    positions: HashMap<(u32, SymbolId), PositionRow>,
    accounts: HashMap<u32, AccountRow>,
    logs: VecDeque<String>,
}

impl SnapshotState {
    fn push_log(&mut self, line: String) {
        if self.logs.len() >= MAX_RECENT_LOGS {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    fn ingest_market(&mut self, records: &[crate::journal::JournalRecord]) {
        for rec in records {
            if rec.msg_type != MsgType::Ticker && rec.msg_type != MsgType::Trade && rec.msg_type != MsgType::Depth {
                continue;
            }
            let Some(event) = wire::from_bytes::<MarketEvent>(&rec.payload) else {
                continue;
            };
            self.tickers.insert(
                event.symbol_id,
                TickerRow {
                    exchange_id: event.exchange_id,
                    last: event.last,
                    bid: event.bid,
                    ask: event.ask,
                    volume: event.volume,
                    ts: event.ts,
                },
            );
        }
    }

    fn ingest_report(&mut self, records: &[crate::journal::JournalRecord]) {
        for rec in records {
            if rec.msg_type != MsgType::OrderResponse {
                continue;
            }
            let Some(resp) = wire::from_bytes::<OrderResponse>(&rec.payload) else {
                continue;
            };
            let status = resp.status();
            self.orders.insert(
                resp.local_order_id,
                OrderRow {
                    status,
                    filled_qty: resp.filled_qty,
                    cum_qty: resp.cum_qty,
                    avg_price: resp.avg_price,
                    error_code: resp.error_code,
                    ts: resp.ts,
                },
            );

            if matches!(status, OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Failed) {
                self.push_log(format!(
                    "order {} -> {:?}{}",
                    resp.local_order_id,
                    status,
                    if status == OrderStatus::Rejected {
                        format!(" ({})", resp.error_msg.as_str())
                    } else {
                        String::new()
                    }
                ));
            }
        }
    }

    fn ingest_position(&mut self, records: &[crate::journal::JournalRecord]) {
        for rec in records {
            if rec.msg_type != MsgType::Position {
                continue;
            }
            let Some(pos) = wire::from_bytes::<PositionEvent>(&rec.payload) else {
                continue;
            };
            self.positions.insert(
                (pos.account_id, pos.symbol_id),
                PositionRow {
                    exchange_id: pos.exchange_id,
                    symbol_id: pos.symbol_id,
                    quantity: pos.quantity,
                    avg_entry_price: pos.avg_entry_price,
                    unrealized_pnl: pos.unrealized_pnl,
                    realized_pnl: pos.realized_pnl,
                    ts: pos.ts,
                },
            );
        }
    }

    fn ingest_account(&mut self, records: &[crate::journal::JournalRecord]) {
        for rec in records {
            if rec.msg_type != MsgType::Account {
                continue;
            }
            let Some(acc) = wire::from_bytes::<AccountEvent>(&rec.payload) else {
                continue;
            };
            self.accounts.insert(
                acc.account_id,
                AccountRow {
                    exchange_id: acc.exchange_id,
                    equity: acc.equity,
                    available_balance: acc.available_balance,
                    used_margin: acc.used_margin,
                    daily_pnl: acc.daily_pnl,
                    ts: acc.ts,
                },
            );
        }
    }

    fn compose(&self, symbols: &SymbolTable, accounts_registry: &AccountRegistry, strategies: &StrategyRegistry, risk: &RiskManager) -> Value {
        let tickers: Value = self
            .tickers
            .iter()
            .map(|(&symbol_id, row)| {
                (
                    symbols.symbol_name(symbol_id).to_string(),
                    json!({
                        "exchange": symbols.exchange_name(row.exchange_id),
                        "last": row.last,
                        "bid": row.bid,
                        "ask": row.ask,
                        "volume": row.volume,
                        "ts": row.ts,
                    }),
                )
            })
            .collect::<serde_json::Map<_, _>>()
            .into();

        let orders: Vec<Value> = self
            .orders
            .iter()
            .map(|(&local_order_id, row)| {
                json!({
                    "local_order_id": local_order_id,
                    "status": format!("{:?}", row.status),
                    "filled_qty": row.filled_qty,
                    "cum_qty": row.cum_qty,
                    "avg_price": row.avg_price,
                    "error_code": row.error_code,
                    "ts": row.ts,
                })
            })
            .collect();

        let positions: Vec<Value> = self
            .positions
            .iter()
            .filter(|(_, row)| row.quantity != 0.0)
            .map(|(&(account_id, _symbol_id), row)| {
                json!({
                    "account_id": account_id,
                    "symbol": symbols.symbol_name(row.symbol_id),
                    "exchange": symbols.exchange_name(row.exchange_id),
                    "quantity": row.quantity,
                    "avg_entry_price": row.avg_entry_price,
                    "unrealized_pnl": row.unrealized_pnl,
                    "realized_pnl": row.realized_pnl,
                    "ts": row.ts,
                })
            })
            .collect();

        let account_snapshots: Vec<Value> = self
            .accounts
            .iter()
            .map(|(&account_id, row)| {
                json!({
                    "account_id": account_id,
                    "exchange": symbols.exchange_name(row.exchange_id),
                    "equity": row.equity,
                    "available_balance": row.available_balance,
                    "used_margin": row.used_margin,
                    "daily_pnl": row.daily_pnl,
                    "ts": row.ts,
                })
            })
            .collect();

        let registered_accounts: Vec<Value> = accounts_registry
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

        let strategy_rows: Vec<Value> = strategies
            .list()
            .into_iter()
            .map(|(id, state)| json!({ "id": id, "state": format!("{:?}", state) }))
            .collect();

        let status = risk.status();
        let performance = crate::performance::global_profiler().report().trading_summary();

        json!({
            "accounts": {
                "registered": registered_accounts,
                "snapshots": account_snapshots,
            },
            "orders": orders,
            "positions": positions,
            "strategies": strategy_rows,
            "tickers": tickers,
            "logs": self.logs.iter().cloned().collect::<Vec<_>>(),
            "risk": {
                "kill_switch_active": status.kill_switch_active,
                "open_orders": status.open_orders,
                "aggregate_exposure": status.aggregate_exposure,
                "daily_pnl": status.daily_pnl,
            },
            "performance": performance,
        })
    }
}

struct AppState {
    tx: Arc<broadcast::Sender<String>>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

/// Runs the UI snapshot builder: a tokio runtime on its own thread hosting
/// both the periodic journal-tail/compose loop and the WebSocket server
/// that fans the composed document out to every connected client.
pub struct SnapshotServer {
    config: SnapshotConfig,
    risk: Arc<RiskManager>,
    symbols: Arc<SymbolTable>,
    accounts: Arc<AccountRegistry>,
    strategies: Arc<StrategyRegistry>,
    running: Arc<AtomicBool>,
}

impl SnapshotServer {
    pub fn new(
        config: SnapshotConfig,
        risk: Arc<RiskManager>,
        symbols: Arc<SymbolTable>,
        accounts: Arc<AccountRegistry>,
        strategies: Arc<StrategyRegistry>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            risk,
            symbols,
            accounts,
            strategies,
            running,
        }
    }

    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("ui-snapshot".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .expect("failed to build UI snapshot runtime");
                rt.block_on(self.serve());
            })
            .expect("failed to spawn UI snapshot thread")
    }

    async fn serve(self) {
        let (tx, _rx) = broadcast::channel::<String>(BROADCAST_CAPACITY);
        let tx = Arc::new(tx);

        let app_state = AppState { tx: tx.clone() };
        let app = Router::new().route("/ws", get(websocket_handler)).with_state(app_state);

        let listener = match tokio::net::TcpListener::bind(self.config.bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, addr = %self.config.bind_addr, "failed to bind UI snapshot WebSocket listener");
                return;
            }
        };

        info!(addr = %self.config.bind_addr, "UI snapshot server listening");

        let running_for_shutdown = self.running.clone();
        let serve_task = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(wait_for_shutdown(running_for_shutdown))
                .await;
        });

        self.run_builder_loop(&tx).await;
        let _ = serve_task.await;
    }

    async fn run_builder_loop(&self, tx: &broadcast::Sender<String>) {
        let mut market_reader: Option<JournalReader> = None;
        let mut report_reader: Option<JournalReader> = None;
        let mut position_reader: Option<JournalReader> = None;
        let mut account_reader: Option<JournalReader> = None;
        let mut state = SnapshotState::default();

        let mut interval = tokio::time::interval(self.config.cadence);
        while self.running.load(Ordering::Relaxed) {
            interval.tick().await;

            if let Some(reader) = ensure_open(&mut market_reader, &self.config.journal_dir, &self.config.market_prefix) {
                state.ingest_market(&reader.poll(JOURNAL_POLL_BATCH));
            }
            if let Some(reader) = ensure_open(&mut report_reader, &self.config.journal_dir, &self.config.report_prefix) {
                state.ingest_report(&reader.poll(JOURNAL_POLL_BATCH));
            }
            if let Some(reader) = ensure_open(&mut position_reader, &self.config.journal_dir, &self.config.position_prefix) {
                state.ingest_position(&reader.poll(JOURNAL_POLL_BATCH));
            }
            if let Some(reader) = ensure_open(&mut account_reader, &self.config.journal_dir, &self.config.account_prefix) {
                state.ingest_account(&reader.poll(JOURNAL_POLL_BATCH));
            }

            let doc = state.compose(&self.symbols, &self.accounts, &self.strategies, &self.risk);
            // No receivers yet is the common case between UI connects;
            // broadcast::send only errors when the channel is totally
            // unsubscribed, which is not a failure worth logging here.
            let _ = tx.send(doc.to_string());
        }
    }
}

/// Lazily opens a journal reader the first time its page file exists —
/// the writer may not have created it yet when this builder starts.
fn ensure_open<'a>(slot: &'a mut Option<JournalReader>, dir: &str, prefix: &str) -> Option<&'a mut JournalReader> {
    if slot.is_none() {
        match JournalReader::open(dir, prefix, 0) {
            Ok(reader) => *slot = Some(reader),
            Err(_) => return None,
        }
    }
    slot.as_mut()
}

async fn wait_for_shutdown(running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.tx.subscribe();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(doc) => {
                        if socket.send(Message::Text(doc)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{MarketEventType, UNKNOWN_EXCHANGE};
    use crate::journal::JournalRecord;

    fn market_record(symbol_id: SymbolId, last: f64) -> JournalRecord {
        let event = MarketEvent::new(1, 0, MarketEventType::Ticker, UNKNOWN_EXCHANGE, symbol_id, last, last - 0.1, last + 0.1, 10.0, 1.0);
        JournalRecord {
            msg_type: MsgType::Ticker,
            gen_time_ns: 1,
            trigger_time_ns: 1,
            source: 0,
            dest: 0,
            payload: wire::as_bytes(&event).to_vec(),
        }
    }

    #[test]
    fn ingest_market_keeps_latest_per_symbol() {
        let mut state = SnapshotState::default();
        state.ingest_market(&[market_record(1, 100.0), market_record(1, 101.0)]);
        assert_eq!(state.tickers.len(), 1);
        assert_eq!(state.tickers.get(&1).unwrap().last, 101.0);
    }

    #[test]
    fn terminal_order_status_adds_a_log_line() {
        let mut state = SnapshotState::default();
        let resp = OrderResponse::rejected(1, 7, crate::frames::RejectCode::KillSwitch, "kill switch active");
        let rec = JournalRecord {
            msg_type: MsgType::OrderResponse,
            gen_time_ns: 1,
            trigger_time_ns: 1,
            source: 0,
            dest: 0,
            payload: wire::as_bytes(&resp).to_vec(),
        };
        state.ingest_report(&[rec]);
        assert_eq!(state.logs.len(), 1);
        assert!(state.logs[0].contains("Rejected"));
    }
}
