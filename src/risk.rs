//! C8 — pre-trade risk gate.
//!
//! A synchronous gate called inline by the OEMS worker (C7) before every
//! exchange submit. Checks run in a fixed order and the first failure
//! wins; passing all of them reserves the request's effect on the
//! aggregate counters so the next `check` sees it. The drawdown tracker
//! (peak/current equity, throttle-style activation) is grounded on the
//! teacher's `DrawdownMonitor`, generalized here from one bankroll to one
//! tracker per strategy and wired to the kill-switch instead of a size
//! multiplier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::frames::{OrderRequest, RejectCode, SymbolId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_drawdown_pct: f64,
    pub max_open_orders: u32,
    pub max_exposure: f64,
    pub max_symbol_position: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: 0.10,
            max_open_orders: 500,
            max_exposure: 1_000_000.0,
            max_symbol_position: 250_000.0,
        }
    }
}

/// Per-strategy peak/current equity and drawdown-from-peak, the same
/// shape the teacher tracked for a single bankroll.
#[derive(Debug, Clone)]
struct DrawdownMonitor {
    peak: f64,
    current: f64,
}

impl DrawdownMonitor {
    fn new(initial_equity: f64) -> Self {
        Self {
            peak: initial_equity.max(0.0),
            current: initial_equity.max(0.0),
        }
    }

    fn record(&mut self, equity: f64) {
        self.current = equity.max(0.0);
        if self.current > self.peak {
            self.peak = self.current;
        }
    }

    fn drawdown_pct(&self) -> f64 {
        if self.peak <= 0.0 {
            0.0
        } else {
            ((self.peak - self.current) / self.peak).clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub kill_switch_active: bool,
    pub open_orders: u32,
    pub aggregate_exposure: f64,
    pub daily_pnl: f64,
    pub config: RiskConfig,
    pub per_strategy: Vec<StrategyRiskStats>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StrategyRiskStats {
    pub strategy_id: u32,
    pub peak_equity: f64,
    pub current_equity: f64,
    pub drawdown_pct: f64,
}

/// Synchronous pre-trade gate (C8). Every field here is shared, lock-free
/// where the hot path touches it (`kill_switch`, `open_orders`), and
/// mutex-guarded where updates are infrequent relative to the OEMS's
/// drain rate (exposure book, per-symbol positions, drawdown trackers).
pub struct RiskManager {
    config: ArcSwap<RiskConfig>,
    kill_switch: AtomicBool,
    open_orders: AtomicU32,
    day_start_epoch: AtomicU64,
    strategy_equity: Mutex<HashMap<u32, DrawdownMonitor>>,
    aggregate_exposure: Mutex<f64>,
    symbol_positions: Mutex<HashMap<SymbolId, f64>>,
    daily_pnl: Mutex<f64>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            kill_switch: AtomicBool::new(false),
            open_orders: AtomicU32::new(0),
            day_start_epoch: AtomicU64::new(day_start_epoch_secs(Utc::now())),
            strategy_equity: Mutex::new(HashMap::new()),
            aggregate_exposure: Mutex::new(0.0),
            symbol_positions: Mutex::new(HashMap::new()),
            daily_pnl: Mutex::new(0.0),
        }
    }

    pub fn update_config(&self, config: RiskConfig) {
        self.config.store(std::sync::Arc::new(config));
    }

    /// Runs the ordered pre-trade checks from `spec.md` §4.7 and, on
    /// success, reserves the request's projected effect on the aggregate
    /// counters (released later via [`RiskManager::release`]).
    pub fn check(&self, req: &OrderRequest) -> Result<(), RejectCode> {
        self.maybe_roll_day();

        if self.kill_switch.load(Ordering::Acquire) {
            return Err(RejectCode::KillSwitch);
        }

        if let Some(monitor) = self.strategy_equity.lock().get(&req.strategy_id) {
            let config = self.config.load();
            if monitor.drawdown_pct() > config.max_drawdown_pct {
                self.activate_kill_switch("strategy drawdown exceeded max_drawdown_pct");
                return Err(RejectCode::KillSwitch);
            }
        }

        let config = self.config.load();

        if self.open_orders.load(Ordering::Acquire) >= config.max_open_orders {
            return Err(RejectCode::TooManyOrders);
        }

        let notional = req.notional().abs();
        {
            let exposure = self.aggregate_exposure.lock();
            if *exposure + notional > config.max_exposure {
                return Err(RejectCode::ExposureLimit);
            }
        }

        {
            let positions = self.symbol_positions.lock();
            let current = positions.get(&req.symbol_id).copied().unwrap_or(0.0);
            let signed = if matches!(req.side(), crate::frames::Side::Buy) {
                notional
            } else {
                -notional
            };
            if (current + signed).abs() > config.max_symbol_position {
                return Err(RejectCode::SymbolLimit);
            }
        }

        self.open_orders.fetch_add(1, Ordering::AcqRel);
        *self.aggregate_exposure.lock() += notional;
        let signed = if matches!(req.side(), crate::frames::Side::Buy) {
            notional
        } else {
            -notional
        };
        *self
            .symbol_positions
            .lock()
            .entry(req.symbol_id)
            .or_insert(0.0) += signed;

        Ok(())
    }

    /// Releases a request's reserved effect once its order reaches a
    /// terminal state (filled, cancelled, rejected-by-exchange, failed).
    pub fn release(&self, req: &OrderRequest) {
        self.open_orders.fetch_sub(1, Ordering::AcqRel);
        let notional = req.notional().abs();
        *self.aggregate_exposure.lock() -= notional;
        let signed = if matches!(req.side(), crate::frames::Side::Buy) {
            notional
        } else {
            -notional
        };
        if let Some(pos) = self.symbol_positions.lock().get_mut(&req.symbol_id) {
            *pos -= signed;
        }
    }

    /// Updates a strategy's current equity for drawdown tracking. Called
    /// by the OEMS whenever it recomputes account/position state.
    pub fn record_equity(&self, strategy_id: u32, equity: f64) {
        self.strategy_equity
            .lock()
            .entry(strategy_id)
            .or_insert_with(|| DrawdownMonitor::new(equity))
            .record(equity);
    }

    pub fn record_pnl(&self, delta: f64) {
        *self.daily_pnl.lock() += delta;
    }

    /// Trips the kill-switch. Per `spec.md` §4.7 this is a side-effecting
    /// event: the caller (OEMS) is expected to cancel resting orders
    /// best-effort and raise a CRITICAL alert once this returns.
    pub fn activate_kill_switch(&self, reason: &str) {
        if !self.kill_switch.swap(true, Ordering::AcqRel) {
            error!(reason, "kill-switch activated");
        }
    }

    /// Clears the kill-switch. Only reachable via the explicit
    /// `DEACTIVATE_KILL_SWITCH` command delivered through C10 — never
    /// automatic.
    pub fn deactivate_kill_switch(&self) {
        if self.kill_switch.swap(false, Ordering::AcqRel) {
            warn!("kill-switch deactivated by operator command");
        }
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.kill_switch.load(Ordering::Acquire)
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            kill_switch_active: self.is_kill_switch_active(),
            open_orders: self.open_orders.load(Ordering::Acquire),
            aggregate_exposure: *self.aggregate_exposure.lock(),
            daily_pnl: *self.daily_pnl.lock(),
            config: (**self.config.load()).clone(),
            per_strategy: self.per_strategy_stats(),
        }
    }

    /// Current per-symbol aggregate position, for the OEMS's periodic
    /// `PositionEvent` emission. Positions here are process-aggregate
    /// (summed across accounts), not the full per-account book.
    pub fn symbol_position_snapshot(&self) -> Vec<(SymbolId, f64)> {
        self.symbol_positions.lock().iter().map(|(&sym, &qty)| (sym, qty)).collect()
    }

    pub fn per_strategy_stats(&self) -> Vec<StrategyRiskStats> {
        self.strategy_equity
            .lock()
            .iter()
            .map(|(&strategy_id, monitor)| StrategyRiskStats {
                strategy_id,
                peak_equity: monitor.peak,
                current_equity: monitor.current,
                drawdown_pct: monitor.drawdown_pct(),
            })
            .collect()
    }

    /// Resets the daily P&L accumulator and each strategy's drawdown peak
    /// at the configured UTC rollover.
    fn maybe_roll_day(&self) {
        let now = day_start_epoch_secs(Utc::now());
        let prev = self.day_start_epoch.load(Ordering::Acquire);
        if prev != now
            && self
                .day_start_epoch
                .compare_exchange(prev, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            *self.daily_pnl.lock() = 0.0;
            let mut equities = self.strategy_equity.lock();
            for monitor in equities.values_mut() {
                monitor.peak = monitor.current;
            }
        }
    }
}

fn day_start_epoch_secs(now: DateTime<Utc>) -> u64 {
    now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{OrdType, Side};

    fn req(strategy_id: u32, symbol_id: SymbolId, price: f64, qty: f64, side: Side) -> OrderRequest {
        OrderRequest::new(0, 1, 0, symbol_id, 1, side, OrdType::Limit, price, qty, strategy_id, "s")
    }

    #[test]
    fn kill_switch_blocks_everything() {
        let rm = RiskManager::new(RiskConfig::default());
        rm.activate_kill_switch("test");
        let r = req(1, 0, 100.0, 1.0, Side::Buy);
        assert_eq!(rm.check(&r), Err(RejectCode::KillSwitch));
    }

    #[test]
    fn exposure_limit_rejects_oversized_order() {
        let rm = RiskManager::new(RiskConfig {
            max_exposure: 1_000.0,
            ..RiskConfig::default()
        });
        let r = req(1, 0, 100.0, 100.0, Side::Buy);
        assert_eq!(rm.check(&r), Err(RejectCode::ExposureLimit));
    }

    #[test]
    fn passes_and_reserves_then_releases() {
        let rm = RiskManager::new(RiskConfig::default());
        let r = req(1, 0, 100.0, 1.0, Side::Buy);
        assert!(rm.check(&r).is_ok());
        assert_eq!(rm.status().open_orders, 1);
        rm.release(&r);
        assert_eq!(rm.status().open_orders, 0);
    }

    #[test]
    fn drawdown_breach_activates_kill_switch() {
        let rm = RiskManager::new(RiskConfig {
            max_drawdown_pct: 0.10,
            ..RiskConfig::default()
        });
        rm.record_equity(1, 10_000.0);
        rm.record_equity(1, 8_500.0); // 15% drawdown
        let r = req(1, 0, 10.0, 1.0, Side::Buy);
        assert_eq!(rm.check(&r), Err(RejectCode::KillSwitch));
        assert!(rm.is_kill_switch_active());
    }

    #[test]
    fn symbol_limit_rejects_concentrated_position() {
        let rm = RiskManager::new(RiskConfig {
            max_symbol_position: 500.0,
            max_exposure: 1_000_000.0,
            ..RiskConfig::default()
        });
        let r1 = req(1, 3, 100.0, 4.0, Side::Buy);
        assert!(rm.check(&r1).is_ok());
        let r2 = req(1, 3, 100.0, 2.0, Side::Buy);
        assert_eq!(rm.check(&r2), Err(RejectCode::SymbolLimit));
    }

    #[test]
    fn too_many_open_orders_rejects() {
        let rm = RiskManager::new(RiskConfig {
            max_open_orders: 1,
            ..RiskConfig::default()
        });
        let r1 = req(1, 0, 10.0, 1.0, Side::Buy);
        assert!(rm.check(&r1).is_ok());
        let r2 = req(1, 1, 10.0, 1.0, Side::Buy);
        assert_eq!(rm.check(&r2), Err(RejectCode::TooManyOrders));
    }

    /// Several threads hammer `check`/`release` concurrently while another
    /// thread flips the kill switch mid-flight. Joining every checker
    /// thread is itself a synchronization point, so once `join` returns,
    /// every subsequent `check` on any thread is guaranteed to observe the
    /// switch as active — there is no lingering window where a racing
    /// reader keeps seeing the pre-activation state.
    #[test]
    fn kill_switch_activation_has_no_race_window_for_concurrent_checks() {
        use std::sync::Arc;
        use std::thread;

        let rm = Arc::new(RiskManager::new(RiskConfig {
            max_exposure: f64::MAX,
            max_open_orders: u32::MAX,
            max_symbol_position: f64::MAX,
            ..RiskConfig::default()
        }));

        let checker_handles: Vec<_> = (0..4u32)
            .map(|tid| {
                let rm = rm.clone();
                thread::spawn(move || {
                    for i in 0..20_000u64 {
                        let r = req(tid, 0, 10.0, 1.0, Side::Buy);
                        if rm.check(&r).is_ok() {
                            rm.release(&r);
                        }
                        let _ = i;
                    }
                })
            })
            .collect();

        thread::sleep(std::time::Duration::from_millis(5));
        rm.activate_kill_switch("race test");

        for h in checker_handles {
            h.join().unwrap();
        }

        assert!(rm.is_kill_switch_active());
        let r = req(0, 0, 10.0, 1.0, Side::Buy);
        assert_eq!(rm.check(&r), Err(RejectCode::KillSwitch));
    }
}
