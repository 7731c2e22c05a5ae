//! In-process bookkeeping for account and strategy lifecycle commands.
//!
//! Neither registry drives actual exchange authentication or strategy
//! hot-loading — those are engine-shell/adapter concerns. This just gives
//! the command surface somewhere to record state so `start_strategy` is
//! idempotent and `list_accounts`/`reset_account` have something to answer
//! from, mirroring the reconciliation table's "owned by the thread that
//! answers queries about it" shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub account_id: u64,
    pub strategy_id: u32,
    pub exchange: String,
    pub api_key: String,
    pub is_testnet: bool,
}

pub struct AccountRegistry {
    next_id: AtomicU64,
    accounts: Mutex<HashMap<u64, AccountRecord>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, strategy_id: u32, exchange: &str, api_key: &str, is_testnet: bool) -> u64 {
        let account_id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.accounts.lock().insert(
            account_id,
            AccountRecord {
                account_id,
                strategy_id,
                exchange: exchange.to_string(),
                api_key: api_key.to_string(),
                is_testnet,
            },
        );
        account_id
    }

    pub fn unregister(&self, account_id: u64) -> bool {
        self.accounts.lock().remove(&account_id).is_some()
    }

    pub fn reset(&self, account_id: u64) -> bool {
        self.accounts.lock().contains_key(&account_id)
    }

    pub fn list(&self) -> Vec<AccountRecord> {
        self.accounts.lock().values().cloned().collect()
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StrategyState {
    Running,
    Stopped,
}

pub struct StrategyRegistry {
    states: Mutex<HashMap<u32, StrategyState>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent: calling twice for the same id leaves exactly one
    /// running instance and returns `false` on the second call.
    pub fn start(&self, id: u32) -> bool {
        let mut states = self.states.lock();
        let already_running = states.get(&id) == Some(&StrategyState::Running);
        states.insert(id, StrategyState::Running);
        !already_running
    }

    pub fn stop(&self, id: u32) -> bool {
        let mut states = self.states.lock();
        let was_running = states.get(&id) == Some(&StrategyState::Running);
        states.insert(id, StrategyState::Stopped);
        was_running
    }

    pub fn state(&self, id: u32) -> Option<StrategyState> {
        self.states.lock().get(&id).copied()
    }

    pub fn list(&self) -> Vec<(u32, StrategyState)> {
        self.states.lock().iter().map(|(&id, &state)| (id, state)).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_strategy_is_idempotent() {
        let reg = StrategyRegistry::new();
        assert!(reg.start(1));
        assert!(!reg.start(1));
        assert_eq!(reg.state(1), Some(StrategyState::Running));
    }

    #[test]
    fn register_then_list_account() {
        let reg = AccountRegistry::new();
        let id = reg.register(1, "binance", "key", true);
        assert_eq!(reg.list().len(), 1);
        assert!(reg.unregister(id));
        assert!(reg.list().is_empty());
    }
}
