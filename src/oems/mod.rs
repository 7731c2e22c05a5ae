//! C7 — order & execution management system worker.
//!
//! A single thread that drains the order MPSC, runs every request through
//! the risk gate (C8), and submits accepted requests to the exchange
//! adapter addressed by `exchange_id`. Reconciliation tables are kept
//! in-process; fill/cancel callbacks delivered asynchronously by the
//! adapter's private channel update the same tables and republish
//! `OrderResponse`s through the market bus, mirroring how C5 publishes
//! `MarketEvent`s.

mod adapter;
mod reconcile;

pub use adapter::{
    ExchangeAck, ExchangeAdapter, ExchangeError, ExchangeErrorKind, PaperAdapter, PaperAdapterConfig, TestnetAdapter, TestnetCredentials,
};
pub use reconcile::ReconciliationTable;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::frames::{
    AccountEvent, Command, CommandEvent, ExchangeId, OrderRequest, OrderResponse, OrderStatus, PositionEvent, RejectCode,
    UNKNOWN_EXCHANGE,
};
use crate::ring::{MarketConsumer, MarketProducer, OrderBusConsumer};
use crate::risk::RiskManager;

pub const DRAIN_BATCH: usize = 64;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(50);
/// Cadence for the `PositionEvent`/`AccountEvent` snapshots this worker
/// emits after reconciliation, per `spec.md` §3.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);
/// Synthetic account id used for the process-aggregate `AccountEvent`
/// until per-account books exist.
pub const AGGREGATE_ACCOUNT_ID: u32 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OemsConfig {
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl Default for OemsConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }
}

/// Drains the order bus, enforces risk, and submits to the exchange.
pub struct OemsWorker {
    config: OemsConfig,
    consumer: OrderBusConsumer<OrderRequest>,
    responses: MarketProducer<OrderResponse>,
    risk: Arc<RiskManager>,
    adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
    reconcile: ReconciliationTable,
    running: Arc<AtomicBool>,
    next_local_order_id: AtomicU64,
    /// `cancel_order` requests arriving off the query IPC socket, relayed
    /// in-process as `CommandEvent`s. `None` when the worker is wired
    /// without an IPC server (tests, paper engine without external access).
    commands: Option<MarketConsumer<CommandEvent>>,
    /// Periodic snapshot outputs consumed by the journal logger and, from
    /// there, the UI snapshot builder (C12). `None` when the worker is
    /// wired without that wiring (tests).
    positions: Option<MarketProducer<PositionEvent>>,
    accounts: Option<MarketProducer<AccountEvent>>,
    snapshot_interval: Duration,
    last_snapshot: Instant,
    pin_core: Option<usize>,
    realtime: bool,
}

impl OemsWorker {
    pub fn new(
        config: OemsConfig,
        consumer: OrderBusConsumer<OrderRequest>,
        responses: MarketProducer<OrderResponse>,
        risk: Arc<RiskManager>,
        adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            consumer,
            responses,
            risk,
            adapters,
            reconcile: ReconciliationTable::new(),
            running,
            next_local_order_id: AtomicU64::new(1),
            commands: None,
            positions: None,
            accounts: None,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            last_snapshot: Instant::now(),
            pin_core: None,
            realtime: false,
        }
    }

    /// Wires the worker to the IPC server's `CommandEvent` relay so
    /// `cancel_order` commands reach the reconciliation table that only
    /// this thread owns.
    pub fn with_commands(mut self, commands: MarketConsumer<CommandEvent>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Wires the periodic `PositionEvent`/`AccountEvent` snapshot outputs.
    /// Both buses are produced by this worker alone, matching the
    /// single-producer-per-stream rule the rest of the ring model follows.
    pub fn with_snapshot_buses(mut self, positions: MarketProducer<PositionEvent>, accounts: MarketProducer<AccountEvent>) -> Self {
        self.positions = Some(positions);
        self.accounts = Some(accounts);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_pin_core(mut self, core: usize) -> Self {
        self.pin_core = Some(core);
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn spawn(mut self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("oems-worker".to_string())
            .spawn(move || self.run())
            .expect("failed to spawn OEMS worker thread")
    }

    fn run(&mut self) {
        crate::rt::apply(self.pin_core, self.realtime, "oems-worker");

        info!("OEMS worker starting");
        let mut batch = Vec::with_capacity(DRAIN_BATCH);
        let mut cmd_batch = Vec::with_capacity(DRAIN_BATCH);
        let mut report_batch: Vec<(String, OrderResponse)> = Vec::new();
        while self.running.load(Ordering::Relaxed) {
            batch.clear();
            self.consumer.drain_batch(&mut batch, DRAIN_BATCH);
            for req in batch.drain(..) {
                self.handle_request(req);
            }

            report_batch.clear();
            for adapter in self.adapters.values() {
                report_batch.extend(adapter.poll_reports());
            }
            let had_reports = !report_batch.is_empty();
            for (exchange_order_id, resp) in report_batch.drain(..) {
                self.on_exchange_report(&exchange_order_id, resp);
            }

            let mut had_commands = false;
            if let Some(commands) = self.commands.as_mut() {
                cmd_batch.clear();
                commands.pop_batch(&mut cmd_batch, DRAIN_BATCH);
                had_commands = !cmd_batch.is_empty();
            }
            for cmd in cmd_batch.drain(..) {
                self.handle_command(cmd);
            }

            if self.last_snapshot.elapsed() >= self.snapshot_interval {
                self.emit_snapshots();
                self.last_snapshot = Instant::now();
            }

            if batch.is_empty() && !had_commands && !had_reports {
                std::hint::spin_loop();
            }
        }
        debug!("OEMS worker exiting");
    }

    /// Emits a `PositionEvent` per symbol with a nonzero aggregate
    /// position and a single process-aggregate `AccountEvent`, sourced
    /// from the risk manager's already-tracked exposure book — this
    /// worker has no separate position ledger of its own.
    fn emit_snapshots(&mut self) {
        let ts = now_ns();
        if let Some(positions) = self.positions.as_mut() {
            for (symbol_id, quantity) in self.risk.symbol_position_snapshot() {
                if quantity == 0.0 {
                    continue;
                }
                positions.publish(PositionEvent::new(ts, AGGREGATE_ACCOUNT_ID, UNKNOWN_EXCHANGE, symbol_id, quantity, 0.0, 0.0, 0.0));
            }
        }

        if let Some(accounts) = self.accounts.as_mut() {
            let status = self.risk.status();
            let equity: f64 = status.per_strategy.iter().map(|s| s.current_equity).sum();
            accounts.publish(AccountEvent::new(
                ts,
                AGGREGATE_ACCOUNT_ID,
                UNKNOWN_EXCHANGE,
                equity,
                equity - status.aggregate_exposure,
                status.aggregate_exposure,
                status.daily_pnl,
            ));
        }
    }

    fn handle_command(&mut self, cmd: CommandEvent) {
        if cmd.command() == Command::CancelOrder {
            self.handle_cancel(cmd.price as u64);
        }
    }

    /// `CancelOrder` commands carry `local_order_id` in `cmd.price` —
    /// the frame has no dedicated id field and price is otherwise unused
    /// for this command.
    fn handle_cancel(&mut self, local_order_id: u64) {
        let Some((exchange_order_id, exchange_id)) = self.reconcile.peek(local_order_id) else {
            self.publish(OrderResponse::rejected(
                now_ns(),
                local_order_id,
                RejectCode::ExchangeBusiness,
                "unknown or already-terminal order",
            ));
            return;
        };

        let Some(adapter) = self.adapters.get(&exchange_id).cloned() else {
            self.publish(OrderResponse::rejected(
                now_ns(),
                local_order_id,
                RejectCode::ExchangeBusiness,
                "no adapter registered for exchange",
            ));
            return;
        };

        match adapter.cancel(&exchange_order_id) {
            Ok(()) => {
                if let Some(req) = self.reconcile.remove(&exchange_order_id) {
                    self.risk.release(&req);
                }
                self.publish(OrderResponse::new(now_ns(), local_order_id, OrderStatus::Cancelled, &exchange_order_id));
            }
            Err(e) => {
                warn!(local_order_id, error = %e.message, "cancel request failed");
                self.publish(OrderResponse::rejected(now_ns(), local_order_id, RejectCode::ExchangeBusiness, &e.message));
            }
        }
    }

    fn handle_request(&mut self, req: OrderRequest) {
        if let Err(code) = self.risk.check(&req) {
            self.publish(OrderResponse::rejected(now_ns(), req.local_order_id, code, reject_message(code)));
            return;
        }

        let adapter = match self.adapters.get(&req.exchange_id) {
            Some(a) => a.clone(),
            None => {
                self.risk.release(&req);
                self.publish(OrderResponse::rejected(
                    now_ns(),
                    req.local_order_id,
                    RejectCode::ExchangeBusiness,
                    "no adapter registered for exchange",
                ));
                return;
            }
        };

        self.submit_with_retry(adapter, req);
    }

    fn submit_with_retry(&mut self, adapter: Arc<dyn ExchangeAdapter>, req: OrderRequest) {
        let mut attempt = 0u32;
        let started = Instant::now();
        loop {
            match adapter.submit(&req) {
                Ok(ack) => {
                    crate::performance::global_profiler()
                        .pipeline
                        .record_oems(started.elapsed().as_micros() as u64);
                    self.reconcile.insert(req.local_order_id, &ack.exchange_order_id, req);
                    let mut resp = OrderResponse::new(now_ns(), req.local_order_id, OrderStatus::Ack, &ack.exchange_order_id);
                    resp.exchange_ts = ack.exchange_ts;
                    self.publish(resp);
                    return;
                }
                Err(e) => match e.kind {
                    ExchangeErrorKind::Business => {
                        self.risk.release(&req);
                        self.publish(OrderResponse::rejected(
                            now_ns(),
                            req.local_order_id,
                            RejectCode::ExchangeBusiness,
                            &e.message,
                        ));
                        return;
                    }
                    ExchangeErrorKind::RateLimit => {
                        std::thread::sleep(e.retry_after.unwrap_or(self.config.retry_base));
                        attempt += 1;
                        if attempt > self.config.max_retries {
                            self.fail(&req, &e.message);
                            return;
                        }
                    }
                    ExchangeErrorKind::Transport => {
                        attempt += 1;
                        if attempt > self.config.max_retries {
                            self.fail(&req, &e.message);
                            return;
                        }
                        warn!(attempt, error = %e.message, "transport error submitting order, retrying");
                        std::thread::sleep(self.config.retry_base * attempt);
                    }
                },
            }
        }
    }

    fn fail(&mut self, req: &OrderRequest, message: &str) {
        crate::performance::global_profiler().pipeline.record_error("oems");
        self.risk.release(req);
        let mut resp = OrderResponse::new(now_ns(), req.local_order_id, OrderStatus::Failed, "");
        resp.error_msg = crate::frames::FixedStr::set(message);
        resp.error_code = RejectCode::ExchangeTransport as u16;
        self.publish(resp);
    }

    /// Called when the exchange adapter's private channel delivers a
    /// fill, partial fill, or cancel confirmation out of band.
    pub fn on_exchange_report(&mut self, exchange_order_id: &str, mut resp: OrderResponse) {
        resp.local_order_id = self
            .reconcile
            .local_order_id(exchange_order_id)
            .unwrap_or(resp.local_order_id);

        if resp.status().is_terminal() {
            if let Some(req) = self.reconcile.remove(exchange_order_id) {
                self.risk.release(&req);
            }
        }
        self.publish(resp);
    }

    fn publish(&mut self, resp: OrderResponse) {
        if resp.status().is_terminal() {
            info!(
                target: crate::logging::ORDER_LIFECYCLE_TARGET,
                local_order_id = resp.local_order_id,
                status = ?resp.status(),
                filled_qty = resp.filled_qty,
                avg_price = resp.avg_price,
                "order reached terminal state",
            );
        }
        self.responses.publish(resp);
    }

    pub fn open_order_count(&self) -> usize {
        self.reconcile.len()
    }
}

fn reject_message(code: RejectCode) -> &'static str {
    match code {
        RejectCode::KillSwitch => "kill switch active",
        RejectCode::TooManyOrders => "too many open orders",
        RejectCode::ExposureLimit => "aggregate exposure limit breached",
        RejectCode::SymbolLimit => "per-symbol position limit breached",
        _ => "rejected",
    }
}

#[inline]
fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{OrdType, Side};
    use crate::ring::{MarketBus, OrderBus};
    use crate::risk::RiskConfig;
    use std::sync::Mutex as StdMutex;

    struct MockAdapter {
        exchange_id: ExchangeId,
        responses: StdMutex<Vec<Result<ExchangeAck, ExchangeError>>>,
    }

    impl ExchangeAdapter for MockAdapter {
        fn submit(&self, _req: &OrderRequest) -> Result<ExchangeAck, ExchangeError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(ExchangeAck {
                    exchange_order_id: "fallback".to_string(),
                    exchange_ts: 0,
                }))
        }

        fn cancel(&self, _exchange_order_id: &str) -> Result<(), ExchangeError> {
            Ok(())
        }

        fn exchange_id(&self) -> ExchangeId {
            self.exchange_id
        }
    }

    fn make_worker(
        adapter: Arc<MockAdapter>,
    ) -> (OemsWorker, crate::ring::OrderBusProducer<OrderRequest>, crate::ring::MarketConsumer<OrderResponse>) {
        let order_bus = OrderBus::<OrderRequest>::new(16);
        let response_bus = MarketBus::<OrderResponse>::new(16);
        let responses_consumer = response_bus.consumer();
        let responses_producer = response_bus.producer().unwrap();

        let risk = Arc::new(RiskManager::new(RiskConfig::default()));
        let mut adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        adapters.insert(0, adapter);

        let worker = OemsWorker::new(
            OemsConfig::default(),
            order_bus.consumer(),
            responses_producer,
            risk,
            adapters,
            Arc::new(AtomicBool::new(true)),
        );
        (worker, order_bus.producer(), responses_consumer)
    }

    #[test]
    fn accepted_order_publishes_ack() {
        let adapter = Arc::new(MockAdapter {
            exchange_id: 0,
            responses: StdMutex::new(vec![Ok(ExchangeAck {
                exchange_order_id: "ex-1".to_string(),
                exchange_ts: 42,
            })]),
        });
        let (mut worker, _producer, mut responses) = make_worker(adapter);

        let req = OrderRequest::new(0, 1, 0, 0, 1, Side::Buy, OrdType::Limit, 10.0, 1.0, 0, "s");
        worker.handle_request(req);

        let resp = responses.pop().expect("response published");
        assert_eq!(resp.status(), OrderStatus::Ack);
        assert_eq!(resp.exchange_order_id.as_str(), "ex-1");
    }

    #[test]
    fn business_rejection_does_not_retry() {
        let adapter = Arc::new(MockAdapter {
            exchange_id: 0,
            responses: StdMutex::new(vec![Err(ExchangeError {
                kind: ExchangeErrorKind::Business,
                message: "invalid symbol".to_string(),
                retry_after: None,
            })]),
        });
        let (mut worker, _producer, mut responses) = make_worker(adapter);

        let req = OrderRequest::new(0, 1, 0, 0, 1, Side::Buy, OrdType::Limit, 10.0, 1.0, 0, "s");
        worker.handle_request(req);

        let resp = responses.pop().expect("response published");
        assert_eq!(resp.status(), OrderStatus::Rejected);
    }

    #[test]
    fn kill_switch_rejects_without_calling_adapter() {
        let adapter = Arc::new(MockAdapter {
            exchange_id: 0,
            responses: StdMutex::new(vec![]),
        });
        let (mut worker, _producer, mut responses) = make_worker(adapter);
        worker.risk.activate_kill_switch("test");

        let req = OrderRequest::new(0, 1, 0, 0, 1, Side::Buy, OrdType::Limit, 10.0, 1.0, 0, "s");
        worker.handle_request(req);

        let resp = responses.pop().expect("response published");
        assert_eq!(resp.status(), OrderStatus::Rejected);
        assert_eq!(resp.reject_code(), RejectCode::KillSwitch);
    }

    #[test]
    fn on_exchange_report_fills_order_and_releases_reservation() {
        let adapter = Arc::new(MockAdapter {
            exchange_id: 0,
            responses: StdMutex::new(vec![Ok(ExchangeAck {
                exchange_order_id: "ex-fill".to_string(),
                exchange_ts: 5,
            })]),
        });
        let (mut worker, _producer, mut responses) = make_worker(adapter);

        let req = OrderRequest::new(0, 1, 0, 0, 1, Side::Buy, OrdType::Limit, 10.0, 1.0, 0, "s");
        worker.handle_request(req);
        responses.pop().expect("ack published");
        assert_eq!(worker.open_order_count(), 1);

        let mut fill = OrderResponse::new(now_ns(), 0, OrderStatus::Filled, "ex-fill");
        fill.filled_qty = 1.0;
        fill.avg_price = 10.0;
        worker.on_exchange_report("ex-fill", fill);

        let resp = responses.pop().expect("fill response published");
        assert_eq!(resp.status(), OrderStatus::Filled);
        assert_eq!(resp.local_order_id, 1, "local_order_id resolved from the reconciliation table");
        assert_eq!(worker.open_order_count(), 0, "reservation released once the fill is terminal");
    }

    #[test]
    fn cancel_command_releases_reservation_and_publishes_cancelled() {
        let adapter = Arc::new(MockAdapter {
            exchange_id: 0,
            responses: StdMutex::new(vec![Ok(ExchangeAck {
                exchange_order_id: "ex-9".to_string(),
                exchange_ts: 1,
            })]),
        });
        let (mut worker, _producer, mut responses) = make_worker(adapter);

        let command_bus = MarketBus::<CommandEvent>::new(16);
        let mut command_producer = command_bus.producer().unwrap();
        worker = worker.with_commands(command_bus.consumer());

        let req = OrderRequest::new(0, 1, 0, 0, 1, Side::Buy, OrdType::Limit, 10.0, 1.0, 0, "s");
        worker.handle_request(req);
        responses.pop().expect("ack published");
        assert_eq!(worker.open_order_count(), 1);

        command_producer.publish(CommandEvent::new(0, Command::CancelOrder, 0, 0, Side::Buy, 1.0, 0.0, ""));
        let mut batch = Vec::new();
        worker.commands.as_mut().unwrap().pop_batch(&mut batch, 1);
        worker.handle_command(batch[0]);

        let resp = responses.pop().expect("cancel response published");
        assert_eq!(resp.status(), OrderStatus::Cancelled);
        assert_eq!(worker.open_order_count(), 0);
    }

    fn make_worker_with_config(
        adapter: Arc<MockAdapter>,
        config: OemsConfig,
    ) -> (OemsWorker, crate::ring::OrderBusProducer<OrderRequest>, crate::ring::MarketConsumer<OrderResponse>) {
        let order_bus = OrderBus::<OrderRequest>::new(16);
        let response_bus = MarketBus::<OrderResponse>::new(16);
        let responses_consumer = response_bus.consumer();
        let responses_producer = response_bus.producer().unwrap();

        let risk = Arc::new(RiskManager::new(RiskConfig::default()));
        let mut adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        adapters.insert(0, adapter);

        let worker = OemsWorker::new(config, order_bus.consumer(), responses_producer, risk, adapters, Arc::new(AtomicBool::new(true)));
        (worker, order_bus.producer(), responses_consumer)
    }

    #[test]
    fn transient_transport_error_retries_then_succeeds() {
        // MockAdapter pops from the back, so the list is the reverse of
        // call order: two transport errors, then a successful ack.
        let adapter = Arc::new(MockAdapter {
            exchange_id: 0,
            responses: StdMutex::new(vec![
                Ok(ExchangeAck {
                    exchange_order_id: "ex-retry".to_string(),
                    exchange_ts: 7,
                }),
                Err(ExchangeError {
                    kind: ExchangeErrorKind::Transport,
                    message: "timeout".to_string(),
                    retry_after: None,
                }),
                Err(ExchangeError {
                    kind: ExchangeErrorKind::Transport,
                    message: "timeout".to_string(),
                    retry_after: None,
                }),
            ]),
        });
        let config = OemsConfig {
            max_retries: 5,
            retry_base: Duration::from_millis(1),
        };
        let (mut worker, _producer, mut responses) = make_worker_with_config(adapter, config);

        let req = OrderRequest::new(0, 1, 0, 0, 1, Side::Buy, OrdType::Limit, 10.0, 1.0, 0, "s");
        worker.handle_request(req);

        let resp = responses.pop().expect("response published after retries");
        assert_eq!(resp.status(), OrderStatus::Ack);
        assert_eq!(resp.exchange_order_id.as_str(), "ex-retry");
    }

    #[test]
    fn exceeding_max_retries_fails_order_and_releases_risk() {
        let adapter = Arc::new(MockAdapter {
            exchange_id: 0,
            responses: StdMutex::new(vec![
                Err(ExchangeError {
                    kind: ExchangeErrorKind::Transport,
                    message: "down".to_string(),
                    retry_after: None,
                }),
                Err(ExchangeError {
                    kind: ExchangeErrorKind::Transport,
                    message: "down".to_string(),
                    retry_after: None,
                }),
            ]),
        });
        let config = OemsConfig {
            max_retries: 1,
            retry_base: Duration::from_millis(1),
        };
        let (mut worker, _producer, mut responses) = make_worker_with_config(adapter, config);

        let req = OrderRequest::new(0, 1, 0, 0, 1, Side::Buy, OrdType::Limit, 10.0, 1.0, 0, "s");
        assert_eq!(worker.risk.status().open_orders, 0);
        worker.handle_request(req);

        let resp = responses.pop().expect("failure response published");
        assert_eq!(resp.status(), OrderStatus::Failed);
        assert_eq!(worker.risk.status().open_orders, 0, "reservation released on final failure");
    }
}
